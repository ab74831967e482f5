use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use crate::api::{ApiReply, ApiResponse, PasswordSettings, RequestToken, RpcError};
use crate::clock::Clock;
use crate::config::PassportConfig;
use crate::element::{ElementError, PassportElement};
use crate::events::PanelEvent;
use crate::form::{AuthorizationForm, FormRequest, RequiredElement, RequiredType};
use crate::form_controller::FormController;
use crate::password::CredentialStore;
use crate::session::{ApiRequest, ChannelApi};
use crate::value::ValueType;

/// Clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<Instant>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap()
    }
}

pub fn required(value_type: ValueType) -> RequiredType {
    RequiredType {
        value_type,
        selfie_required: false,
        translation_required: false,
        native_names: false,
    }
}

pub fn authorization(rows: Vec<Vec<RequiredType>>) -> AuthorizationForm {
    AuthorizationForm {
        id: 100,
        required_elements: rows
            .into_iter()
            .map(|suitable| RequiredElement { suitable })
            .collect(),
        privacy_policy_url: Some("https://bot.example/privacy".to_string()),
    }
}

pub fn password_settings() -> PasswordSettings {
    PasswordSettings {
        has_password: true,
        has_recovery: true,
        hint: "pet".to_string(),
        unconfirmed_pattern: None,
        confirmed_email: Some("me@example.com".to_string()),
        outdated_client: false,
        server_error: None,
    }
}

pub fn form_request() -> FormRequest {
    FormRequest {
        bot_id: 42,
        scope: r#"{"v":1}"#.to_string(),
        callback_url: Some("https://bot.example/back".to_string()),
        public_key: "KEY".to_string(),
        nonce: "nonce".to_string(),
    }
}

pub fn png(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbaImage::from_pixel(width, height, image::Rgba([200, 10, 10, 255]));
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    bytes
}

/// A controller wired to channels, with helpers to play the server.
pub struct Harness {
    pub controller: FormController<ChannelApi>,
    pub requests: mpsc::UnboundedReceiver<ApiRequest>,
    pub events: mpsc::UnboundedReceiver<PanelEvent>,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_credentials(CredentialStore::new())
    }

    pub fn with_credentials(credentials: CredentialStore) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let (api, requests) = ChannelApi::new();
        let (events_tx, events) = mpsc::unbounded_channel();
        let clock = Arc::new(ManualClock::new());
        let controller = FormController::new(api, form_request(), events_tx)
            .with_config(PassportConfig::default())
            .with_clock(clock.clone())
            .with_credentials(credentials)
            .with_user_phone("+15550000");
        Self {
            controller,
            requests,
            events,
            clock,
        }
    }

    /// Runs `show()` and answers the form and password requests.
    pub fn shown(form: AuthorizationForm, settings: PasswordSettings) -> Self {
        let mut harness = Self::new();
        harness.controller.show();
        let form_token = harness.next_token();
        let password_token = harness.next_token();
        harness.ok(form_token, ApiResponse::AuthorizationForm(form));
        harness.ok(password_token, ApiResponse::PasswordState(settings));
        harness
    }

    /// A form already unlocked with `elements` stored on the server.
    pub fn unlocked(form: AuthorizationForm, elements: Vec<PassportElement>) -> Self {
        Self::unlocked_with_errors(form, elements, Vec::new())
    }

    pub fn unlocked_with_errors(
        form: AuthorizationForm,
        elements: Vec<PassportElement>,
        errors: Vec<ElementError>,
    ) -> Self {
        let mut harness = Self::shown(form, password_settings());
        harness.controller.submit_password("correct horse");
        let token = harness.next_token();
        harness.ok(token, ApiResponse::AvailableElements { elements, errors });
        harness.drain_events();
        harness
    }

    pub fn clock_now(&self) -> Instant {
        self.clock.now()
    }

    pub fn next_request(&mut self) -> ApiRequest {
        self.requests.try_recv().expect("expected a backend request")
    }

    pub fn next_token(&mut self) -> RequestToken {
        self.next_request().token().expect("request has no token")
    }

    pub fn drain_requests(&mut self) -> Vec<ApiRequest> {
        let mut all = Vec::new();
        while let Ok(request) = self.requests.try_recv() {
            all.push(request);
        }
        all
    }

    pub fn drain_events(&mut self) -> Vec<PanelEvent> {
        let mut all = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            all.push(event);
        }
        all
    }

    pub fn ok(&mut self, token: RequestToken, response: ApiResponse) {
        self.controller.handle_reply(ApiReply {
            token,
            result: Ok(response),
        });
    }

    pub fn fail(&mut self, token: RequestToken, code: &str) {
        self.controller.handle_reply(ApiReply {
            token,
            result: Err(RpcError::new(code)),
        });
    }
}

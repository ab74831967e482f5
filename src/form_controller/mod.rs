//! The passport form state machine.
//!
//! `FormController` never blocks and never touches a socket: it issues
//! requests through [`PassportApi`], is fed their replies through
//! [`FormController::handle_reply`] and file progress through
//! [`FormController::handle_file_event`], and tells the view what changed
//! by sending [`PanelEvent`]s. Timers are driven from outside through
//! [`FormController::tick`] and [`FormController::next_deadline`].

mod edit;
mod scans;
mod submit;
mod timers;
mod verification;


use log::{debug, info, warn};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use zeroize::Zeroizing;

use crate::api::{
    ApiReply, ApiResponse, PasswordSettings, PassportApi, Pending, RequestId, RequestToken,
    RpcError,
};
use crate::clock::{Clock, SystemClock};
use crate::config::PassportConfig;
use crate::element::ParsedElement;
use crate::errors::{classify_form_error, classify_password_error, forward_service_error};
use crate::errors::{FormFailure, PasswordFailure};
use crate::events::{PanelEvent, PanelSender};
use crate::file::FileKey;
use crate::form::{Form, FormRequest};
use crate::lang;
use crate::password::CredentialStore;
use crate::value::{PhoneCall, SaveState, Value, ValueType};

use self::timers::{Deferred, Timer};

pub struct FormController<A: PassportApi> {
    api: A,
    config: PassportConfig,
    clock: Arc<dyn Clock>,
    credentials: CredentialStore,
    events: PanelSender,
    request: FormRequest,
    user_phone: Option<String>,

    form: Form,
    form_received: bool,
    password: Option<PasswordSettings>,
    /// Password that unlocked the form; sent along with every save.
    password_value: Option<Zeroizing<String>>,
    checking_password: Option<Zeroizing<String>>,

    next_request_id: RequestId,
    form_request: Option<RequestId>,
    password_request: Option<RequestId>,
    password_check: Option<RequestId>,
    submit_request: Option<RequestId>,
    clear_password_request: Option<RequestId>,
    recovery_request: Option<RequestId>,

    secret_ready: bool,
    password_prompt_shown: bool,
    force_show_form: bool,
    submit_success: bool,
    cancelled: bool,
    suggesting_restart: bool,
    service_error: Option<String>,

    downloads: HashSet<FileKey>,
    deferred: VecDeque<Deferred>,
    timers: Vec<(Instant, Timer)>,
}

impl<A: PassportApi> FormController<A> {
    pub fn new(api: A, request: FormRequest, events: PanelSender) -> Self {
        Self {
            api,
            config: PassportConfig::default(),
            clock: Arc::new(SystemClock),
            credentials: CredentialStore::new(),
            events,
            request,
            user_phone: None,
            form: Form::default(),
            form_received: false,
            password: None,
            password_value: None,
            checking_password: None,
            next_request_id: 0,
            form_request: None,
            password_request: None,
            password_check: None,
            submit_request: None,
            clear_password_request: None,
            recovery_request: None,
            secret_ready: false,
            password_prompt_shown: false,
            force_show_form: false,
            submit_success: false,
            cancelled: false,
            suggesting_restart: false,
            service_error: None,
            downloads: HashSet::new(),
            deferred: VecDeque::new(),
            timers: Vec::new(),
        }
    }

    pub fn with_config(mut self, config: PassportConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Shares remembered passwords with other controllers of the same session.
    pub fn with_credentials(mut self, credentials: CredentialStore) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_user_phone(mut self, phone: impl Into<String>) -> Self {
        self.user_phone = Some(phone.into());
        self
    }

    pub fn form(&self) -> &Form {
        &self.form
    }

    pub fn value(&self, value_type: ValueType) -> Option<&Value> {
        self.form.value(value_type)
    }

    pub fn password_settings(&self) -> Option<&PasswordSettings> {
        self.password.as_ref()
    }

    pub fn default_email(&self) -> Option<&str> {
        self.password.as_ref()?.confirmed_email.as_deref()
    }

    pub fn default_phone_number(&self) -> Option<&str> {
        self.user_phone.as_deref()
    }

    pub fn privacy_policy_url(&self) -> Option<&str> {
        self.form.privacy_policy_url.as_deref()
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn api_mut(&mut self) -> &mut A {
        &mut self.api
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn submit_succeeded(&self) -> bool {
        self.submit_success
    }

    fn token(&mut self, pending: Pending) -> RequestToken {
        self.next_request_id += 1;
        RequestToken {
            id: self.next_request_id,
            pending,
        }
    }

    fn emit(&self, event: PanelEvent) {
        if self.events.send(event).is_err() {
            debug!("Panel is gone; event dropped");
        }
    }

    fn now(&self) -> Instant {
        self.clock.now()
    }

    /// Requests the form and the password settings in parallel.
    pub fn show(&mut self) {
        if self.cancelled {
            return;
        }
        if !self.form_received && self.form_request.is_none() {
            let token = self.token(Pending::Form);
            self.form_request = Some(token.id);
            self.api.get_authorization_form(token, &self.request);
        }
        self.request_password_state();
    }

    fn request_password_state(&mut self) {
        if self.password_request.is_some() {
            return;
        }
        let token = self.token(Pending::PasswordState);
        self.password_request = Some(token.id);
        self.api.get_password_state(token);
    }

    /// Re-reads the password settings, e.g. after the user set a password elsewhere.
    pub fn reload_password(&mut self) {
        self.force_show_form = true;
        self.request_password_state();
    }

    pub fn handle_reply(&mut self, reply: ApiReply) {
        let ApiReply { token, result } = reply;
        if self.cancelled {
            debug!("Reply {} after cancel dropped", token.id);
            return;
        }
        match token.pending {
            Pending::Form if take(&mut self.form_request, token.id) => self.form_done(result),
            Pending::PasswordState if take(&mut self.password_request, token.id) => {
                self.password_state_done(result)
            }
            Pending::AvailableElements if take(&mut self.password_check, token.id) => {
                self.available_elements_done(result)
            }
            Pending::Submit if take(&mut self.submit_request, token.id) => self.submit_done(result),
            Pending::ClearUnconfirmedPassword
                if take(&mut self.clear_password_request, token.id) =>
            {
                self.clear_unconfirmed_done(result)
            }
            Pending::PasswordRecovery if take(&mut self.recovery_request, token.id) => {
                self.recovery_done(result)
            }
            Pending::Save(ty) if self.value_request(ty, token) => self.save_done(ty, result),
            Pending::Delete(ty) if self.value_request(ty, token) => self.delete_done(ty, result),
            Pending::SendCode(ty) if self.value_request(ty, token) => {
                self.send_code_done(ty, result)
            }
            Pending::CheckCode(ty) if self.value_request(ty, token) => {
                self.check_code_done(ty, result)
            }
            Pending::ResendCall(ty) if self.value_request(ty, token) => {
                self.resend_call_done(ty, result)
            }
            pending => warn!("Stale reply {} for {:?} dropped", token.id, pending),
        }
    }

    /// Whether `token` is the request currently outstanding for the value.
    fn value_request(&self, ty: ValueType, token: RequestToken) -> bool {
        let Some(value) = self.form.value(ty) else {
            return false;
        };
        match token.pending {
            Pending::Save(_) | Pending::Delete(_) => value.save == SaveState::Pending(token.id),
            Pending::SendCode(_) | Pending::CheckCode(_) => {
                value.verification.request == Some(token.id)
            }
            Pending::ResendCall(_) => {
                value.verification.call == Some(PhoneCall::Calling { request: token.id })
            }
            _ => false,
        }
    }

    fn form_done(&mut self, result: Result<ApiResponse, RpcError>) {
        match result {
            Ok(ApiResponse::AuthorizationForm(form)) => {
                info!(
                    "Passport form {} received with {} requested elements",
                    form.id,
                    form.required_elements.len()
                );
                self.form = Form::from_authorization(&form);
                self.form_received = true;
                self.show_form();
            }
            Ok(other) => self.form_fail(RpcError::unexpected(&other)),
            Err(error) => self.form_fail(error),
        }
    }

    fn form_fail(&mut self, error: RpcError) {
        warn!("Passport form failed: {}", error);
        self.service_error = Some(error.code.clone());
        match classify_form_error(&error.code) {
            FormFailure::UpdateApp => self.emit(PanelEvent::UpdateAppRequired),
            FormFailure::Critical(code) => self.emit(PanelEvent::CriticalError { code }),
        }
    }

    fn password_state_done(&mut self, result: Result<ApiResponse, RpcError>) {
        let settings = match result {
            Ok(ApiResponse::PasswordState(settings)) => settings,
            Ok(other) => return self.password_state_fail(RpcError::unexpected(&other)),
            Err(error) => return self.password_state_fail(error),
        };

        self.cancel_timer(Timer::PasswordShortPoll);
        if settings.unconfirmed_pattern.is_some() {
            let at = self.now() + self.config.short_poll_interval;
            self.schedule(at, Timer::PasswordShortPoll);
        }

        let changed = self.password.as_ref() != Some(&settings);
        self.password = Some(settings);
        if changed || std::mem::take(&mut self.force_show_form) {
            self.show_form();
        }
    }

    fn password_state_fail(&mut self, error: RpcError) {
        if self.password.is_none() {
            self.form_fail(error);
        } else {
            warn!("Password state refresh failed: {}", error);
        }
    }

    /// Moves on once both the form and the password settings are known.
    fn show_form(&mut self) {
        if !self.form_received || self.secret_ready || self.service_error.is_some() {
            return;
        }
        let Some(settings) = self.password.as_ref() else {
            return;
        };
        if let Some(code) = settings.server_error.clone() {
            self.emit(PanelEvent::CriticalError { code });
        } else if settings.outdated_client {
            self.emit(PanelEvent::UpdateAppRequired);
        } else if !settings.has_password {
            self.emit(PanelEvent::NoPassword);
        } else if self.password_check.is_none() {
            match self.credentials.get(self.now()) {
                Some(remembered) => {
                    debug!("Unlocking passport with the remembered password");
                    self.check_password(remembered);
                }
                None => {
                    self.password_prompt_shown = true;
                    self.emit(PanelEvent::AskPassword);
                }
            }
        }
    }

    pub fn submit_password(&mut self, password: &str) {
        if self.password_check.is_some() || self.secret_ready || self.cancelled {
            return;
        }
        if password.is_empty() {
            self.emit(PanelEvent::PasswordError {
                message: String::new(),
            });
            return;
        }
        self.check_password(Zeroizing::new(password.to_string()));
    }

    fn check_password(&mut self, password: Zeroizing<String>) {
        let token = self.token(Pending::AvailableElements);
        self.password_check = Some(token.id);
        self.api
            .get_available_elements(token, self.form.id, password.as_str());
        self.checking_password = Some(password);
    }

    fn available_elements_done(&mut self, result: Result<ApiResponse, RpcError>) {
        let (elements, errors) = match result {
            Ok(ApiResponse::AvailableElements { elements, errors }) => (elements, errors),
            Ok(other) => return self.password_check_failed(RpcError::unexpected(&other)),
            Err(error) => return self.password_check_failed(error),
        };
        let Some(password) = self.checking_password.take() else {
            warn!("Elements arrived without a password being checked");
            return;
        };

        let expires_at = self.now() + self.config.remember_password_for;
        self.credentials.remember(&password, expires_at);
        self.schedule(expires_at, Timer::ForgetPassword);
        self.password_value = Some(password);

        let stored = elements.len();
        for element in elements {
            let ty = element.value_type();
            match self.form.values.get_mut(&ty) {
                Some(value) => value.fill(ParsedElement::from(element)),
                None => debug!("Stored {:?} is not requested; skipped", ty),
            }
        }
        for error in &errors {
            if let Some(value) = self.form.values.get_mut(&error.value_type) {
                value.apply_error(error);
            }
        }

        info!(
            "Passport unlocked: {} stored elements, {} errors",
            stored,
            errors.len()
        );
        self.secret_ready = true;
        self.emit(PanelEvent::SecretReady);
        self.emit(PanelEvent::ShowForm);
    }

    fn password_check_failed(&mut self, error: RpcError) {
        self.checking_password = None;
        warn!("Password check failed: {}", error);
        match classify_password_error(&error.code) {
            PasswordFailure::WrongPassword => {
                self.credentials.forget();
                if self.password_prompt_shown {
                    self.emit(PanelEvent::PasswordError {
                        message: lang::PASSWORD_WRONG.to_string(),
                    });
                } else {
                    // The remembered password went bad; ask for it.
                    self.password_prompt_shown = true;
                    self.emit(PanelEvent::AskPassword);
                }
            }
            PasswordFailure::Stale => {
                self.credentials.forget();
                self.force_show_form = true;
                self.request_password_state();
            }
            PasswordFailure::Flood => self.emit(PanelEvent::PasswordError {
                message: lang::FLOOD_ERROR.to_string(),
            }),
            PasswordFailure::UpdateApp => self.emit(PanelEvent::UpdateAppRequired),
            PasswordFailure::Other(code) => self.emit(PanelEvent::PasswordError { message: code }),
        }
    }

    pub fn clear_unconfirmed_password(&mut self) {
        if self.clear_password_request.is_some() {
            return;
        }
        let token = self.token(Pending::ClearUnconfirmedPassword);
        self.clear_password_request = Some(token.id);
        self.api.clear_unconfirmed_password(token);
    }

    fn clear_unconfirmed_done(&mut self, result: Result<ApiResponse, RpcError>) {
        match result {
            Ok(_) => self.reload_password(),
            Err(error) => self.emit(PanelEvent::ErrorBox { text: error.code }),
        }
    }

    pub fn request_password_recovery(&mut self) {
        if self.recovery_request.is_some() {
            return;
        }
        let token = self.token(Pending::PasswordRecovery);
        self.recovery_request = Some(token.id);
        self.api.request_password_recovery(token);
    }

    fn recovery_done(&mut self, result: Result<ApiResponse, RpcError>) {
        match result {
            Ok(ApiResponse::RecoveryEmail { email_pattern }) => {
                self.emit(PanelEvent::PasswordRecoveryStarted { email_pattern })
            }
            Ok(other) => {
                let error = RpcError::unexpected(&other);
                self.emit(PanelEvent::ErrorBox { text: error.code });
            }
            Err(error) => {
                warn!("Password recovery failed: {}", error);
                self.emit(PanelEvent::ErrorBox { text: error.code });
            }
        }
    }

    /// Closing asks first unless there is nothing left to lose.
    pub fn cancel(&mut self) {
        if self.cancelled {
            return;
        }
        if self.submit_success || self.service_error.is_some() {
            self.cancel_sure();
        } else {
            self.emit(PanelEvent::ConfirmCancel);
        }
    }

    pub fn cancel_sure(&mut self) {
        if self.cancelled {
            return;
        }
        self.cancelled = true;
        self.abort_network();
        let callback_url = self.callback_url();
        info!("Passport form closed (submitted: {})", self.submit_success);
        self.emit(PanelEvent::Close { callback_url });
    }

    /// Where to send the user back to, with the outcome appended.
    fn callback_url(&self) -> Option<String> {
        let base = self.request.callback_url.as_deref()?;
        let outcome = if self.submit_success {
            "tg_passport=success".to_string()
        } else if let Some(code) = &self.service_error {
            if !forward_service_error(code) {
                return None;
            }
            format!("tg_passport=error&error={}", urlencoding::encode(code))
        } else {
            "tg_passport=cancel".to_string()
        };
        let separator = if base.contains('?') { '&' } else { '?' };
        Some(format!("{}{}{}", base, separator, outcome))
    }

    pub fn suggest_restart(&mut self) {
        if self.suggesting_restart {
            return;
        }
        self.suggesting_restart = true;
        self.emit(PanelEvent::SuggestRestart);
    }

    pub fn dismiss_restart(&mut self) {
        self.suggesting_restart = false;
    }

    /// Throws away everything, including unsaved edits, and starts over.
    pub fn restart(&mut self) {
        if self.cancelled {
            return;
        }
        info!("Restarting passport session");
        self.abort_network();
        self.credentials.forget();
        self.form = Form::default();
        self.form_received = false;
        self.password = None;
        self.password_value = None;
        self.checking_password = None;
        self.secret_ready = false;
        self.password_prompt_shown = false;
        self.force_show_form = false;
        self.suggesting_restart = false;
        self.service_error = None;
        self.show();
    }

    /// Cancels every outstanding request, transfer and timer.
    fn abort_network(&mut self) {
        for slot in [
            &mut self.form_request,
            &mut self.password_request,
            &mut self.password_check,
            &mut self.submit_request,
            &mut self.clear_password_request,
            &mut self.recovery_request,
        ] {
            if let Some(id) = slot.take() {
                self.api.cancel(id);
            }
        }
        for value in self.form.values.values_mut() {
            if let SaveState::Pending(id) = value.save {
                self.api.cancel(id);
            }
            value.save = SaveState::Idle;
            if let Some(id) = value.verification.request.take() {
                self.api.cancel(id);
            }
            if let Some(PhoneCall::Calling { request }) = value.verification.call {
                self.api.cancel(request);
            }
            for file in value.edit_files() {
                if let Some(upload) = file.upload.as_ref().filter(|_| file.uploading()) {
                    self.api.cancel_upload(upload.key);
                }
            }
        }
        for key in self.downloads.drain() {
            self.api.cancel_download(key);
        }
        self.timers.clear();
        self.deferred.clear();
    }
}

fn take(slot: &mut Option<RequestId>, id: RequestId) -> bool {
    if *slot == Some(id) {
        *slot = None;
        true
    } else {
        false
    }
}

//! Tokio host for a [`FormController`]: a channel-backed [`PassportApi`]
//! and the loop that feeds replies, file events and timers back in.

use log::{info, warn};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, Notify};

use crate::api::{ApiReply, FileEvent, PassportApi, RequestId, RequestToken};
use crate::element::InputPassportElement;
use crate::file::{FileId, FileKey};
use crate::form::{FormId, FormRequest};
use crate::form_controller::FormController;
use crate::password::Secret;
use crate::value::{FileType, ValueType};

/// A backend call, as handed to whatever talks to the server.
#[derive(Serialize, Clone, Debug)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum ApiRequest {
    GetAuthorizationForm { token: RequestToken, request: FormRequest },
    GetPasswordState { token: RequestToken },
    GetAvailableElements { token: RequestToken, form_id: FormId, password: Secret },
    SetElement { token: RequestToken, element: InputPassportElement, password: Secret },
    DeleteElement { token: RequestToken, value_type: ValueType },
    SendAuthorizationForm { token: RequestToken, form_id: FormId, types: Vec<ValueType> },
    SendPhoneCode { token: RequestToken, phone: String },
    ResendPhoneCode { token: RequestToken, phone: String },
    CheckPhoneCode { token: RequestToken, phone: String, code: String },
    SendEmailCode { token: RequestToken, email: String },
    CheckEmailCode { token: RequestToken, email: String, code: String },
    ClearUnconfirmedPassword { token: RequestToken },
    RequestPasswordRecovery { token: RequestToken },
    Cancel { id: RequestId },
    UploadFile { key: FileKey, role: FileType, bytes: Vec<u8> },
    CancelUpload { key: FileKey },
    DownloadFile { key: FileKey, file_id: FileId, size: u64 },
    CancelDownload { key: FileKey },
}

impl ApiRequest {
    /// Token to answer with; transfer and cancel calls have none.
    pub fn token(&self) -> Option<RequestToken> {
        match self {
            ApiRequest::GetAuthorizationForm { token, .. }
            | ApiRequest::GetPasswordState { token }
            | ApiRequest::GetAvailableElements { token, .. }
            | ApiRequest::SetElement { token, .. }
            | ApiRequest::DeleteElement { token, .. }
            | ApiRequest::SendAuthorizationForm { token, .. }
            | ApiRequest::SendPhoneCode { token, .. }
            | ApiRequest::ResendPhoneCode { token, .. }
            | ApiRequest::CheckPhoneCode { token, .. }
            | ApiRequest::SendEmailCode { token, .. }
            | ApiRequest::CheckEmailCode { token, .. }
            | ApiRequest::ClearUnconfirmedPassword { token }
            | ApiRequest::RequestPasswordRecovery { token } => Some(*token),
            ApiRequest::Cancel { .. }
            | ApiRequest::UploadFile { .. }
            | ApiRequest::CancelUpload { .. }
            | ApiRequest::DownloadFile { .. }
            | ApiRequest::CancelDownload { .. } => None,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// [`PassportApi`] that hands every call to a channel.
#[derive(Clone, Debug)]
pub struct ChannelApi {
    tx: mpsc::UnboundedSender<ApiRequest>,
}

impl ChannelApi {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ApiRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn forward(&self, request: ApiRequest) {
        if let Err(e) = self.tx.send(request) {
            warn!("Backend channel closed, request dropped: {:?}", e.0.token());
        }
    }
}

impl PassportApi for ChannelApi {
    fn get_authorization_form(&mut self, token: RequestToken, request: &FormRequest) {
        self.forward(ApiRequest::GetAuthorizationForm {
            token,
            request: request.clone(),
        });
    }

    fn get_password_state(&mut self, token: RequestToken) {
        self.forward(ApiRequest::GetPasswordState { token });
    }

    fn get_available_elements(&mut self, token: RequestToken, form_id: FormId, password: &str) {
        self.forward(ApiRequest::GetAvailableElements {
            token,
            form_id,
            password: Secret::new(password),
        });
    }

    fn set_element(&mut self, token: RequestToken, element: InputPassportElement, password: &str) {
        self.forward(ApiRequest::SetElement {
            token,
            element,
            password: Secret::new(password),
        });
    }

    fn delete_element(&mut self, token: RequestToken, value_type: ValueType) {
        self.forward(ApiRequest::DeleteElement { token, value_type });
    }

    fn send_authorization_form(
        &mut self,
        token: RequestToken,
        form_id: FormId,
        types: Vec<ValueType>,
    ) {
        self.forward(ApiRequest::SendAuthorizationForm {
            token,
            form_id,
            types,
        });
    }

    fn send_phone_code(&mut self, token: RequestToken, phone: &str) {
        self.forward(ApiRequest::SendPhoneCode {
            token,
            phone: phone.to_string(),
        });
    }

    fn resend_phone_code(&mut self, token: RequestToken, phone: &str) {
        self.forward(ApiRequest::ResendPhoneCode {
            token,
            phone: phone.to_string(),
        });
    }

    fn check_phone_code(&mut self, token: RequestToken, phone: &str, code: &str) {
        self.forward(ApiRequest::CheckPhoneCode {
            token,
            phone: phone.to_string(),
            code: code.to_string(),
        });
    }

    fn send_email_code(&mut self, token: RequestToken, email: &str) {
        self.forward(ApiRequest::SendEmailCode {
            token,
            email: email.to_string(),
        });
    }

    fn check_email_code(&mut self, token: RequestToken, email: &str, code: &str) {
        self.forward(ApiRequest::CheckEmailCode {
            token,
            email: email.to_string(),
            code: code.to_string(),
        });
    }

    fn clear_unconfirmed_password(&mut self, token: RequestToken) {
        self.forward(ApiRequest::ClearUnconfirmedPassword { token });
    }

    fn request_password_recovery(&mut self, token: RequestToken) {
        self.forward(ApiRequest::RequestPasswordRecovery { token });
    }

    fn cancel(&mut self, id: RequestId) {
        self.forward(ApiRequest::Cancel { id });
    }

    fn upload_file(&mut self, key: FileKey, role: FileType, bytes: &[u8]) {
        self.forward(ApiRequest::UploadFile {
            key,
            role,
            bytes: bytes.to_vec(),
        });
    }

    fn cancel_upload(&mut self, key: FileKey) {
        self.forward(ApiRequest::CancelUpload { key });
    }

    fn download_file(&mut self, key: FileKey, file_id: FileId, size: u64) {
        self.forward(ApiRequest::DownloadFile { key, file_id, size });
    }

    fn cancel_download(&mut self, key: FileKey) {
        self.forward(ApiRequest::CancelDownload { key });
    }
}

/// Something arriving from the backend.
#[derive(Clone, Debug)]
pub enum Inbound {
    Reply(ApiReply),
    File(FileEvent),
}

/// Shares one controller between the view and the pump loop.
pub struct PassportSession<A: PassportApi> {
    controller: Arc<Mutex<FormController<A>>>,
    wake: Arc<Notify>,
}

impl<A: PassportApi> Clone for PassportSession<A> {
    fn clone(&self) -> Self {
        Self {
            controller: Arc::clone(&self.controller),
            wake: Arc::clone(&self.wake),
        }
    }
}

impl<A: PassportApi + Send + 'static> PassportSession<A> {
    pub fn new(controller: FormController<A>) -> Self {
        Self {
            controller: Arc::new(Mutex::new(controller)),
            wake: Arc::new(Notify::new()),
        }
    }

    /// Runs `f` against the controller and wakes the loop, since `f` may
    /// have armed a timer or queued deferred work.
    pub async fn with<R>(&self, f: impl FnOnce(&mut FormController<A>) -> R) -> R {
        let result = {
            let mut controller = self.controller.lock().await;
            f(&mut controller)
        };
        self.wake.notify_one();
        result
    }

    /// Pumps replies, file events and timers into the controller until the
    /// inbox closes or the form is closed.
    pub async fn run(&self, mut inbox: mpsc::UnboundedReceiver<Inbound>) {
        loop {
            let deadline = self.controller.lock().await.next_deadline();
            let timer = async {
                match deadline {
                    Some(at) => tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                inbound = inbox.recv() => {
                    let mut controller = self.controller.lock().await;
                    match inbound {
                        Some(Inbound::Reply(reply)) => controller.handle_reply(reply),
                        Some(Inbound::File(event)) => controller.handle_file_event(event),
                        None => {
                            info!("Passport inbox closed");
                            break;
                        }
                    }
                }
                _ = timer => self.controller.lock().await.tick(),
                _ = self.wake.notified() => {}
            }

            if self.controller.lock().await.is_cancelled() {
                info!("Passport session finished");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiResponse, Pending};
    use crate::events::PanelEvent;
    use crate::test_support::{authorization, password_settings, required};
    use std::time::Duration;

    #[test]
    fn test_request_json_carries_password_but_debug_redacts() {
        let request = ApiRequest::GetAvailableElements {
            token: RequestToken {
                id: 3,
                pending: Pending::AvailableElements,
            },
            form_id: 9,
            password: Secret::new("pw"),
        };
        let json = request.to_json().unwrap();
        assert!(json.contains(r#""method":"get_available_elements""#));
        assert!(json.contains(r#""password":"pw""#));
        assert!(!format!("{:?}", request).contains("\"pw\""));
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_pumps_replies_and_closes_after_submit() {
        let _ = env_logger::builder().is_test(true).try_init();
        let (api, mut requests) = ChannelApi::new();
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let request =
            FormRequest::from_query("bot_id=1&scope=%7B%7D&public_key=k&nonce=n").unwrap();
        let controller = FormController::new(api, request, events_tx);
        let session = PassportSession::new(controller);
        let (inbox_tx, inbox) = mpsc::unbounded_channel();

        let pump = {
            let session = session.clone();
            tokio::spawn(async move { session.run(inbox).await })
        };
        session.with(|c| c.show()).await;

        let answer = |token: RequestToken, response: ApiResponse| {
            Inbound::Reply(ApiReply {
                token,
                result: Ok(response),
            })
        };
        let mut next_token = || requests.try_recv().ok().and_then(|r| r.token());

        let form = next_token().unwrap();
        let password = next_token().unwrap();
        inbox_tx
            .send(answer(
                form,
                ApiResponse::AuthorizationForm(authorization(vec![vec![required(
                    ValueType::Email,
                )]])),
            ))
            .unwrap();
        inbox_tx
            .send(answer(password, ApiResponse::PasswordState(password_settings())))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(events.recv().await, Some(PanelEvent::AskPassword));

        session.with(|c| c.submit_password("pw")).await;
        let check = next_token().unwrap();
        inbox_tx
            .send(answer(
                check,
                ApiResponse::AvailableElements {
                    elements: vec![crate::element::PassportElement::Email("a@b.c".to_string())],
                    errors: Vec::new(),
                },
            ))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(session.with(|c| c.submit_get_errors()).await.is_empty());
        let submit = next_token().unwrap();
        assert_eq!(submit.pending, Pending::Submit);
        inbox_tx.send(answer(submit, ApiResponse::Ok)).unwrap();

        // The close timer fires on its own once the toast delay has passed.
        tokio::time::sleep(Duration::from_secs(3)).await;
        pump.await.unwrap();
        assert!(session.with(|c| c.is_cancelled()).await);

        let mut saw_close = false;
        while let Ok(event) = events.try_recv() {
            saw_close |= matches!(event, PanelEvent::Close { .. });
        }
        assert!(saw_close);
    }
}

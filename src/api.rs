//! Backend boundary: the requests the controller issues and the replies it
//! expects back.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::element::{ElementError, InputPassportElement, PassportElement};
use crate::file::{FileId, FileKey};
use crate::form::{AuthorizationForm, FormId, FormRequest};
use crate::value::{FileType, ValueType};

pub type RequestId = u64;

/// What a request was issued for. Travels with the request and comes back
/// in the reply, so no side table is needed to route it.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(tag = "op", content = "value", rename_all = "snake_case")]
pub enum Pending {
    Form,
    PasswordState,
    AvailableElements,
    Save(ValueType),
    Delete(ValueType),
    SendCode(ValueType),
    ResendCall(ValueType),
    CheckCode(ValueType),
    Submit,
    ClearUnconfirmedPassword,
    PasswordRecovery,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct RequestToken {
    pub id: RequestId,
    pub pending: Pending,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PasswordSettings {
    pub has_password: bool,
    #[serde(default)]
    pub has_recovery: bool,
    #[serde(default)]
    pub hint: String,
    /// Pattern of an email waiting for confirmation, e.g. `a***@example.com`.
    #[serde(default)]
    pub unconfirmed_pattern: Option<String>,
    #[serde(default)]
    pub confirmed_email: Option<String>,
    #[serde(default)]
    pub outdated_client: bool,
    #[serde(default)]
    pub server_error: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CodeDelivery {
    Sms { length: usize },
    Call { length: usize },
    FlashCall { pattern: String },
    App { length: usize },
}

impl CodeDelivery {
    /// Digits expected from the user, when the method tells.
    pub fn length(&self) -> Option<usize> {
        match self {
            CodeDelivery::Sms { length }
            | CodeDelivery::Call { length }
            | CodeDelivery::App { length } => Some(*length).filter(|l| *l > 0),
            CodeDelivery::FlashCall { .. } => None,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PhoneCodeInfo {
    pub kind: CodeDelivery,
    /// How the code will be resent, if at all.
    #[serde(default)]
    pub next: Option<CodeDelivery>,
    /// Seconds before the next delivery may be requested.
    #[serde(default)]
    pub timeout: u64,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct EmailCodeInfo {
    pub email_pattern: String,
    pub length: usize,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(tag = "response", rename_all = "snake_case")]
pub enum ApiResponse {
    AuthorizationForm(AuthorizationForm),
    PasswordState(PasswordSettings),
    AvailableElements {
        elements: Vec<PassportElement>,
        errors: Vec<ElementError>,
    },
    Element(PassportElement),
    PhoneCode(PhoneCodeInfo),
    EmailCode(EmailCodeInfo),
    RecoveryEmail { email_pattern: String },
    Ok,
}

impl ApiResponse {
    pub fn kind(&self) -> &'static str {
        match self {
            ApiResponse::AuthorizationForm(_) => "authorization_form",
            ApiResponse::PasswordState(_) => "password_state",
            ApiResponse::AvailableElements { .. } => "available_elements",
            ApiResponse::Element(_) => "element",
            ApiResponse::PhoneCode(_) => "phone_code",
            ApiResponse::EmailCode(_) => "email_code",
            ApiResponse::RecoveryEmail { .. } => "recovery_email",
            ApiResponse::Ok => "ok",
        }
    }
}

/// Server error as delivered by the transport, e.g. `FLOOD_WAIT_30`.
#[derive(Error, Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[error("{code}")]
pub struct RpcError {
    pub code: String,
}

impl RpcError {
    pub fn new(code: impl Into<String>) -> Self {
        Self { code: code.into() }
    }

    /// The reply did not have the shape the request calls for.
    pub fn unexpected(response: &ApiResponse) -> Self {
        log::warn!("Unexpected {} response", response.kind());
        Self::new("UNEXPECTED_RESPONSE")
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ApiReply {
    pub token: RequestToken,
    pub result: Result<ApiResponse, RpcError>,
}

/// Progress of uploads and downloads, keyed by the stable file key rather
/// than by any request id.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FileEvent {
    UploadProgress { key: FileKey, offset: u64 },
    UploadDone { key: FileKey, file_id: FileId },
    UploadFailed { key: FileKey },
    DownloadProgress { key: FileKey, offset: u64 },
    DownloadDone { key: FileKey, bytes: Vec<u8> },
    DownloadFailed { key: FileKey },
}

/// Requests the controller needs from the backend. Calls only enqueue; each
/// result comes back later as an [`ApiReply`] carrying the same token, and
/// file transfers report through [`FileEvent`]s.
pub trait PassportApi {
    fn get_authorization_form(&mut self, token: RequestToken, request: &FormRequest);
    fn get_password_state(&mut self, token: RequestToken);
    fn get_available_elements(&mut self, token: RequestToken, form_id: FormId, password: &str);
    fn set_element(&mut self, token: RequestToken, element: InputPassportElement, password: &str);
    fn delete_element(&mut self, token: RequestToken, value_type: ValueType);
    fn send_authorization_form(
        &mut self,
        token: RequestToken,
        form_id: FormId,
        types: Vec<ValueType>,
    );
    fn send_phone_code(&mut self, token: RequestToken, phone: &str);
    fn resend_phone_code(&mut self, token: RequestToken, phone: &str);
    fn check_phone_code(&mut self, token: RequestToken, phone: &str, code: &str);
    fn send_email_code(&mut self, token: RequestToken, email: &str);
    fn check_email_code(&mut self, token: RequestToken, email: &str, code: &str);
    fn clear_unconfirmed_password(&mut self, token: RequestToken);
    fn request_password_recovery(&mut self, token: RequestToken);
    /// Drops a request; its reply, if any, is ignored.
    fn cancel(&mut self, id: RequestId);
    fn upload_file(&mut self, key: FileKey, role: FileType, bytes: &[u8]);
    fn cancel_upload(&mut self, key: FileKey);
    fn download_file(&mut self, key: FileKey, file_id: FileId, size: u64);
    fn cancel_download(&mut self, key: FileKey);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_round_trips_through_json() {
        let reply = ApiReply {
            token: RequestToken {
                id: 12,
                pending: Pending::Save(ValueType::Phone),
            },
            result: Err(RpcError::new("PHONE_VERIFICATION_NEEDED")),
        };
        let json = serde_json::to_string(&reply).unwrap();
        let back: ApiReply = serde_json::from_str(&json).unwrap();
        assert_eq!(back.token, reply.token);
        assert_eq!(back.result.unwrap_err().code, "PHONE_VERIFICATION_NEEDED");
    }

    #[test]
    fn test_code_length_by_delivery() {
        assert_eq!(CodeDelivery::Sms { length: 5 }.length(), Some(5));
        assert_eq!(CodeDelivery::App { length: 0 }.length(), None);
        assert_eq!(
            CodeDelivery::FlashCall {
                pattern: "+1*".to_string()
            }
            .length(),
            None
        );
    }
}

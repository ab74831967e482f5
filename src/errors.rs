//! Caller errors and the tables that turn server error codes into outcomes.

use thiserror::Error;

use crate::lang;
use crate::value::{FileType, ValueType, PLAIN_VALUE_FIELD};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormError {
    #[error("Value {0:?} is not part of this form")]
    ValueNotFound(ValueType),
    #[error("No {role:?} file at {index:?} in {value:?}")]
    FileNotFound {
        value: ValueType,
        role: FileType,
        index: Option<usize>,
    },
    #[error("{0:?} is not being edited")]
    NotEditing(ValueType),
    #[error("No code was sent for {0:?}")]
    NoVerification(ValueType),
    #[error("Passport data is locked until the password is entered")]
    Locked,
    #[error("Invalid passport request: {0}")]
    InvalidRequest(String),
}

/// What a failed save turns into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveFailure {
    UpdateApp,
    PhoneVerification,
    EmailVerification,
    /// Rejected value; the message goes on the given field.
    Field { field: &'static str, message: &'static str },
    Restart,
    Generic(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PasswordFailure {
    WrongPassword,
    /// The password changed or the SRP session expired: ask again from scratch.
    Stale,
    Flood,
    UpdateApp,
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitFailure {
    UpdateApp,
    Restart,
    Generic(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodeFailure {
    WrongCode,
    Flood,
    Generic(String),
}

/// Errors that end the whole passport session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormFailure {
    UpdateApp,
    Critical(String),
}

const APP_VERSION_OUTDATED: &str = "APP_VERSION_OUTDATED";

fn restart_required(code: &str) -> bool {
    code == "PASSWORD_REQUIRED"
        || code.starts_with("SECURE_SECRET_REQUIRED")
        || code == "SECURE_SECRET_INVALID"
}

fn is_flood(code: &str) -> bool {
    code.starts_with("FLOOD_WAIT_")
}

pub fn classify_save_error(value_type: ValueType, code: &str) -> SaveFailure {
    match (value_type, code) {
        (_, APP_VERSION_OUTDATED) => SaveFailure::UpdateApp,
        (ValueType::Phone, "PHONE_VERIFICATION_NEEDED") => SaveFailure::PhoneVerification,
        (ValueType::Phone, "PHONE_NUMBER_INVALID") => SaveFailure::Field {
            field: PLAIN_VALUE_FIELD,
            message: lang::BAD_PHONE,
        },
        (ValueType::Email, "EMAIL_VERIFICATION_NEEDED") => SaveFailure::EmailVerification,
        (ValueType::Email, "EMAIL_INVALID") => SaveFailure::Field {
            field: PLAIN_VALUE_FIELD,
            message: lang::BAD_EMAIL,
        },
        (_, code) if restart_required(code) => SaveFailure::Restart,
        (_, code) => SaveFailure::Generic(code.to_string()),
    }
}

pub fn classify_password_error(code: &str) -> PasswordFailure {
    match code {
        "PASSWORD_HASH_INVALID" => PasswordFailure::WrongPassword,
        "SRP_ID_INVALID" | "SRP_PASSWORD_CHANGED" => PasswordFailure::Stale,
        APP_VERSION_OUTDATED => PasswordFailure::UpdateApp,
        code if is_flood(code) => PasswordFailure::Flood,
        code => PasswordFailure::Other(code.to_string()),
    }
}

pub fn classify_submit_error(code: &str) -> SubmitFailure {
    if code == APP_VERSION_OUTDATED {
        SubmitFailure::UpdateApp
    } else if code == "PASSWORD_REQUIRED"
        || code.starts_with("SECURE_SECRET_REQUIRED")
        || code.starts_with("SECURE_VALUE_HASH_INVALID")
        || code.starts_with("SECURE_VALUE_EMPTY")
    {
        SubmitFailure::Restart
    } else {
        SubmitFailure::Generic(code.to_string())
    }
}

pub fn classify_code_error(code: &str) -> CodeFailure {
    match code {
        "PHONE_CODE_INVALID" | "CODE_INVALID" | "EMAIL_VERIFY_CODE_INVALID" => {
            CodeFailure::WrongCode
        }
        code if is_flood(code) => CodeFailure::Flood,
        code => CodeFailure::Generic(code.to_string()),
    }
}

pub fn classify_form_error(code: &str) -> FormFailure {
    if code == APP_VERSION_OUTDATED {
        FormFailure::UpdateApp
    } else {
        FormFailure::Critical(code.to_string())
    }
}

/// Whether the requesting bot gets told about this error through its callback URL.
pub fn forward_service_error(code: &str) -> bool {
    matches!(
        code,
        "BOT_INVALID"
            | "PUBLIC_KEY_REQUIRED"
            | "PUBLIC_KEY_INVALID"
            | "SCOPE_EMPTY"
            | "PAYLOAD_EMPTY"
    )
}

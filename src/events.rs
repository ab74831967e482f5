use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::value::{FileType, ValueType};

/// Points at one file slot of a value.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ScanRef {
    pub value: ValueType,
    pub role: FileType,
    /// Position in the list; `None` for special roles.
    pub index: Option<usize>,
}

/// Everything the view has to react to.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PanelEvent {
    ShowForm,
    AskPassword,
    /// The user has no cloud password yet and must set one first.
    NoPassword,
    UpdateAppRequired,
    CriticalError { code: String },
    ScanUpdated(ScanRef),
    ValueSaveFinished { value: ValueType },
    ValueEditFailed { value: ValueType },
    /// A field of the edit buffer got an error from the server.
    FieldError { value: ValueType, field: String },
    VerificationNeeded { value: ValueType },
    VerificationUpdate { value: ValueType },
    SecretReady,
    PasswordError { message: String },
    PasswordRecoveryStarted { email_pattern: String },
    Toast { text: String },
    ErrorBox { text: String },
    SuggestRestart,
    ConfirmCancel,
    Close { callback_url: Option<String> },
}

pub type PanelSender = mpsc::UnboundedSender<PanelEvent>;

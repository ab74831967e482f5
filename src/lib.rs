//! Identity document ("passport") form handling for the desktop client.
//!
//! [`FormController`] drives the whole authorization form: it fetches the
//! form and password settings from a [`PassportApi`] backend, keeps per-value
//! edit buffers, uploads and downloads scans, runs phone/email verification
//! and finally submits the chosen documents. The view talks to it through
//! imperative calls and receives [`PanelEvent`]s back over a channel.

pub mod api;
pub mod clock;
pub mod config;
pub mod element;
pub mod errors;
pub mod events;
pub mod file;
pub mod form;
pub mod form_controller;
pub mod lang;
pub mod password;
pub mod session;
pub mod value;

#[cfg(test)]
pub(crate) mod test_support;

pub use api::{ApiReply, ApiResponse, FileEvent, PassportApi, Pending, RequestToken, RpcError};
pub use config::PassportConfig;
pub use errors::FormError;
pub use events::{PanelEvent, ScanRef};
pub use form::{Form, FormRequest};
pub use form_controller::FormController;
pub use session::{ApiRequest, ChannelApi, Inbound, PassportSession};
pub use value::{FileType, Value, ValueMap, ValueType};

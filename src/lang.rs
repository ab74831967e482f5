//! User-facing strings.

pub const BAD_PHONE: &str = "Invalid phone number";
pub const BAD_EMAIL: &str = "Invalid email address";
pub const BAD_DATE: &str = "Invalid date";
pub const UPLOAD_FAILED: &str = "Upload failed. Try attaching the file again.";
pub const WRONG_CODE: &str = "Invalid code";
pub const PASSWORD_WRONG: &str = "Wrong password";
pub const FLOOD_ERROR: &str = "Too many tries. Please try again later.";
pub const SUBMIT_SUCCESS: &str = "Data sent";

pub fn scans_limit_reached(limit: usize) -> String {
    format!("You can attach up to {} files.", limit)
}

use serde::{Serialize, Serializer};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use zeroize::Zeroizing;

struct Remembered {
    password: Zeroizing<String>,
    expires_at: Instant,
}

/// In-memory remembrance of the cloud password, shared by every controller
/// of one session. Never written anywhere; wiped when forgotten or dropped.
#[derive(Clone, Default)]
pub struct CredentialStore {
    inner: Arc<Mutex<Option<Remembered>>>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn remember(&self, password: &str, expires_at: Instant) {
        let mut slot = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        *slot = Some(Remembered {
            password: Zeroizing::new(password.to_string()),
            expires_at,
        });
    }

    /// The password, unless it has expired by `now`.
    pub fn get(&self, now: Instant) -> Option<Zeroizing<String>> {
        let mut slot = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        match slot.as_ref() {
            Some(r) if r.expires_at > now => Some(r.password.clone()),
            Some(_) => {
                *slot = None;
                None
            }
            None => None,
        }
    }

    pub fn forget(&self) {
        let mut slot = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        *slot = None;
    }

    /// Returns true when something was dropped.
    pub fn forget_if_expired(&self, now: Instant) -> bool {
        let mut slot = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|r| r.expires_at <= now) {
            *slot = None;
            true
        } else {
            false
        }
    }

    pub fn expires_at(&self) -> Option<Instant> {
        let slot = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        slot.as_ref().map(|r| r.expires_at)
    }
}

impl fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialStore")
            .field("expires_at", &self.expires_at())
            .finish_non_exhaustive()
    }
}

/// Password travelling in an outbound request. Debug output is redacted.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(Zeroizing<String>);

impl Secret {
    pub fn new(value: &str) -> Self {
        Self(Zeroizing::new(value.to_string()))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl Serialize for Secret {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_remembered_password_expires() {
        let store = CredentialStore::new();
        let now = Instant::now();
        store.remember("hunter2", now + Duration::from_secs(60));

        assert_eq!(store.get(now).as_deref().map(String::as_str), Some("hunter2"));
        assert!(!store.forget_if_expired(now));
        assert!(store.get(now + Duration::from_secs(61)).is_none());
        assert!(store.expires_at().is_none());
    }

    #[test]
    fn test_clones_share_the_slot() {
        let store = CredentialStore::new();
        let other = store.clone();
        let now = Instant::now();
        store.remember("pw", now + Duration::from_secs(5));
        assert!(other.get(now).is_some());
        other.forget();
        assert!(store.get(now).is_none());
    }

    #[test]
    fn test_debug_output_is_redacted() {
        let secret = Secret::new("hunter2");
        assert!(!format!("{:?}", secret).contains("hunter2"));
        assert_eq!(serde_json::to_string(&secret).unwrap(), "\"hunter2\"");

        let store = CredentialStore::new();
        store.remember("hunter2", Instant::now() + Duration::from_secs(5));
        assert!(!format!("{:?}", store).contains("hunter2"));
    }
}

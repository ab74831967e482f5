use std::env;
use std::time::Duration;

use crate::value::FileType;

/// Tunables of the passport controller, env-driven.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PassportConfig {
    /// How long an accepted password is kept in memory.
    pub remember_password_for: Duration,
    /// Re-poll interval for password state while an email is unconfirmed.
    pub short_poll_interval: Duration,
    /// Time the success toast stays up before the panel closes.
    pub close_delay: Duration,
    pub scans_limit: usize,
    pub translations_limit: usize,
    /// Refresh rate of the "calling you in N s" countdown.
    pub call_tick: Duration,
}

impl Default for PassportConfig {
    fn default() -> Self {
        Self {
            remember_password_for: Duration::from_secs(30 * 60),
            short_poll_interval: Duration::from_millis(3000),
            close_delay: Duration::from_millis(2000),
            scans_limit: 20,
            translations_limit: 20,
            call_tick: Duration::from_millis(1000),
        }
    }
}

fn env_number(name: &str) -> Option<u64> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

impl PassportConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let remember_password_for = env_number("PASSPORT_REMEMBER_PASSWORD_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.remember_password_for);

        let short_poll_interval = env_number("PASSPORT_SHORT_POLL_MS")
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(defaults.short_poll_interval);

        let close_delay = env_number("PASSPORT_CLOSE_DELAY_MS")
            .map(Duration::from_millis)
            .unwrap_or(defaults.close_delay);

        let scans_limit = env_number("PASSPORT_SCANS_LIMIT")
            .map(|n| n as usize)
            .unwrap_or(defaults.scans_limit);

        let translations_limit = env_number("PASSPORT_TRANSLATIONS_LIMIT")
            .map(|n| n as usize)
            .unwrap_or(defaults.translations_limit);

        let call_tick = env_number("PASSPORT_CALL_TICK_MS")
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(defaults.call_tick);

        Self {
            remember_password_for,
            short_poll_interval,
            close_delay,
            scans_limit,
            translations_limit,
            call_tick,
        }
    }

    /// Cap on files of `role` per value; special roles hold one file and have none.
    pub fn scan_limit(&self, role: FileType) -> Option<usize> {
        match role {
            FileType::Scan => Some(self.scans_limit),
            FileType::Translation => Some(self.translations_limit),
            FileType::FrontSide | FileType::ReverseSide | FileType::Selfie => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PassportConfig::default();
        assert_eq!(config.remember_password_for, Duration::from_secs(1800));
        assert_eq!(config.short_poll_interval, Duration::from_secs(3));
        assert_eq!(config.scan_limit(FileType::Scan), Some(20));
        assert_eq!(config.scan_limit(FileType::Selfie), None);
    }

    #[test]
    fn test_from_env_overrides_and_ignores_garbage() {
        env::set_var("PASSPORT_SCANS_LIMIT", "3");
        env::set_var("PASSPORT_SHORT_POLL_MS", "not a number");
        let config = PassportConfig::from_env();
        env::remove_var("PASSPORT_SCANS_LIMIT");
        env::remove_var("PASSPORT_SHORT_POLL_MS");

        assert_eq!(config.scans_limit, 3);
        assert_eq!(config.short_poll_interval, Duration::from_millis(3000));
    }
}

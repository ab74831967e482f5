use std::time::Instant;

/// Source of "now" for timers and credential expiry.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Follows tokio's clock, so paused-time tests move it too.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }
}

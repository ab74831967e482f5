use log::debug;
use std::time::Instant;

use super::FormController;
use crate::api::PassportApi;
use crate::value::ValueType;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Timer {
    CloseAfterSuccess,
    PasswordShortPoll,
    ForgetPassword,
    CallTick(ValueType),
}

/// Work postponed to the next tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Deferred {
    FinishUnchangedSave(ValueType),
}

impl<A: PassportApi> FormController<A> {
    /// Arms `timer`, replacing an earlier deadline for it.
    pub(super) fn schedule(&mut self, at: Instant, timer: Timer) {
        self.cancel_timer(timer);
        self.timers.push((at, timer));
    }

    pub(super) fn cancel_timer(&mut self, timer: Timer) {
        self.timers.retain(|(_, t)| *t != timer);
    }

    /// When `tick` next has something to do. Deferred work is due right away.
    pub fn next_deadline(&self) -> Option<Instant> {
        if !self.deferred.is_empty() {
            return Some(self.now());
        }
        self.timers.iter().map(|(at, _)| *at).min()
    }

    /// Runs deferred work and every timer that is due.
    pub fn tick(&mut self) {
        while let Some(work) = self.deferred.pop_front() {
            if self.cancelled {
                break;
            }
            match work {
                Deferred::FinishUnchangedSave(ty) => self.finish_unchanged_save(ty),
            }
        }

        let now = self.now();
        let (due, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut self.timers)
            .into_iter()
            .partition(|(at, _)| *at <= now);
        self.timers = pending;
        for (_, timer) in due {
            if self.cancelled {
                break;
            }
            debug!("Timer {:?} fired", timer);
            match timer {
                Timer::CloseAfterSuccess => self.cancel_sure(),
                Timer::PasswordShortPoll => self.request_password_state(),
                Timer::ForgetPassword => {
                    if self.credentials.forget_if_expired(now) {
                        debug!("Remembered password expired");
                    }
                }
                Timer::CallTick(ty) => self.call_tick(ty),
            }
        }
    }
}

use log::{debug, info, warn};

use super::timers::Timer;
use super::FormController;
use crate::api::{ApiResponse, PassportApi, Pending, RpcError};
use crate::errors::{classify_submit_error, SubmitFailure};
use crate::events::PanelEvent;
use crate::lang;
use crate::value::ValueType;

impl<A: PassportApi> FormController<A> {
    /// Checks every scope locally. Returns the values to fix, or sends the
    /// form and returns nothing when all scopes can be satisfied.
    pub fn submit_get_errors(&mut self) -> Vec<ValueType> {
        if self.submit_request.is_some() || self.submit_success || self.cancelled {
            return Vec::new();
        }
        if !self.form_received || !self.secret_ready {
            debug!("Submit ignored, form is not unlocked yet");
            return Vec::new();
        }
        let mut errors = Vec::new();
        let mut types = Vec::new();
        for scope in self.form.scopes() {
            match self.form.check_scope(&scope) {
                Ok(chosen) => types.extend(chosen),
                Err(value) => errors.push(value),
            }
        }
        if !errors.is_empty() {
            info!("Form incomplete: {:?}", errors);
            return errors;
        }
        types.sort();
        types.dedup();

        let token = self.token(Pending::Submit);
        self.submit_request = Some(token.id);
        info!("Submitting form {} with {:?}", self.form.id, types);
        self.api.send_authorization_form(token, self.form.id, types);
        Vec::new()
    }

    pub(super) fn submit_done(&mut self, result: Result<ApiResponse, RpcError>) {
        match result {
            Ok(_) => {
                self.submit_success = true;
                self.emit(PanelEvent::Toast {
                    text: lang::SUBMIT_SUCCESS.to_string(),
                });
                let at = self.now() + self.config.close_delay;
                self.schedule(at, Timer::CloseAfterSuccess);
            }
            Err(error) => {
                warn!("Submitting form failed: {}", error);
                match classify_submit_error(&error.code) {
                    SubmitFailure::UpdateApp => self.emit(PanelEvent::UpdateAppRequired),
                    SubmitFailure::Restart => self.suggest_restart(),
                    SubmitFailure::Generic(code) => self.emit(PanelEvent::ErrorBox { text: code }),
                }
            }
        }
    }
}

use log::{debug, info, warn};
use std::time::Duration;

use super::timers::Timer;
use super::FormController;
use crate::api::{ApiResponse, CodeDelivery, PassportApi, Pending, RpcError};
use crate::errors::{classify_code_error, CodeFailure, FormError};
use crate::events::PanelEvent;
use crate::lang;
use crate::value::{CodeLength, PhoneCall, ValueType, Verification, PLAIN_VALUE_FIELD};

impl<A: PassportApi> FormController<A> {
    fn verification_target(&self, ty: ValueType) -> Option<String> {
        let value = self.form.value(ty)?;
        Some(
            value
                .data
                .parsed_in_edit
                .text(PLAIN_VALUE_FIELD)
                .trim()
                .to_string(),
        )
    }

    pub(super) fn start_phone_verification(&mut self, ty: ValueType) {
        let Some(phone) = self.verification_target(ty) else {
            return;
        };
        let token = self.token(Pending::SendCode(ty));
        if let Some(value) = self.form.values.get_mut(&ty) {
            value.verification = Verification {
                request: Some(token.id),
                ..Verification::default()
            };
            self.api.send_phone_code(token, &phone);
        }
    }

    pub(super) fn start_email_verification(&mut self, ty: ValueType) {
        let Some(email) = self.verification_target(ty) else {
            return;
        };
        let token = self.token(Pending::SendCode(ty));
        if let Some(value) = self.form.values.get_mut(&ty) {
            value.verification = Verification {
                request: Some(token.id),
                ..Verification::default()
            };
            self.api.send_email_code(token, &email);
        }
    }

    pub(super) fn send_code_done(&mut self, ty: ValueType, result: Result<ApiResponse, RpcError>) {
        let now = self.now();
        let call_tick = self.config.call_tick;
        let Some(value) = self.form.values.get_mut(&ty) else {
            return;
        };
        value.verification.request = None;
        let mut countdown = false;
        match result {
            Ok(ApiResponse::PhoneCode(info)) if ty == ValueType::Phone => {
                value.verification.code_length =
                    Some(info.kind.length().map_or(CodeLength::Unknown, CodeLength::Exact));
                if matches!(info.next, Some(CodeDelivery::Call { .. })) && info.timeout > 0 {
                    value.verification.call = Some(PhoneCall::Waiting {
                        until: now + Duration::from_secs(info.timeout),
                    });
                    countdown = true;
                }
            }
            Ok(ApiResponse::EmailCode(info)) if ty == ValueType::Email => {
                value.verification.code_length = Some(match info.length {
                    0 => CodeLength::Unknown,
                    n => CodeLength::Exact(n),
                });
            }
            Ok(other) => return self.send_code_failed(ty, RpcError::unexpected(&other)),
            Err(error) => return self.send_code_failed(ty, error),
        }
        if countdown {
            self.schedule(now + call_tick, Timer::CallTick(ty));
        }
        info!("Verification code sent for {:?}", ty);
        self.emit(PanelEvent::VerificationNeeded { value: ty });
    }

    fn send_code_failed(&mut self, ty: ValueType, error: RpcError) {
        warn!("Sending verification code for {:?} failed: {}", ty, error);
        if let Some(value) = self.form.values.get_mut(&ty) {
            value.verification = Verification::default();
        }
        let text = match classify_code_error(&error.code) {
            CodeFailure::Flood => lang::FLOOD_ERROR.to_string(),
            CodeFailure::WrongCode | CodeFailure::Generic(_) => error.code,
        };
        self.emit(PanelEvent::ErrorBox { text });
        self.value_edit_failed(ty);
    }

    /// Checks the code the user typed. Obviously wrong codes are rejected
    /// without asking the server.
    pub fn verify(&mut self, ty: ValueType, code: &str) -> Result<(), FormError> {
        let code = code.trim();
        let value = self.form.value_mut(ty)?;
        let Some(length) = value.verification.code_length else {
            return Err(FormError::NoVerification(ty));
        };
        if value.verification.request.is_some() {
            debug!("Code for {:?} is already being checked", ty);
            return Ok(());
        }
        let wrong = match length {
            CodeLength::Exact(n) => code.chars().count() != n,
            CodeLength::Unknown => code.is_empty(),
        };
        if wrong {
            value.verification.error = Some(lang::WRONG_CODE.to_string());
            self.emit(PanelEvent::VerificationUpdate { value: ty });
            return Ok(());
        }
        value.verification.error = None;

        let target = value.data.parsed_in_edit.text(PLAIN_VALUE_FIELD).trim().to_string();
        let token = self.token(Pending::CheckCode(ty));
        self.form.value_mut(ty)?.verification.request = Some(token.id);
        match ty {
            ValueType::Email => self.api.check_email_code(token, &target, code),
            _ => self.api.check_phone_code(token, &target, code),
        }
        Ok(())
    }

    pub(super) fn check_code_done(&mut self, ty: ValueType, result: Result<ApiResponse, RpcError>) {
        let Some(value) = self.form.values.get_mut(&ty) else {
            return;
        };
        value.verification.request = None;
        match result {
            Ok(_) => {
                if let Some(PhoneCall::Calling { request }) = value.verification.call {
                    self.api.cancel(request);
                }
                value.verification = Verification::default();
                self.cancel_timer(Timer::CallTick(ty));
                info!("{:?} verified, saving", ty);
                self.emit(PanelEvent::VerificationUpdate { value: ty });
                if let Err(error) = self.send_save_request(ty) {
                    warn!("Could not resume saving {:?}: {}", ty, error);
                    self.value_edit_failed(ty);
                }
            }
            Err(error) => {
                warn!("Verification of {:?} failed: {}", ty, error);
                value.verification.error = Some(match classify_code_error(&error.code) {
                    CodeFailure::WrongCode => lang::WRONG_CODE.to_string(),
                    CodeFailure::Flood => lang::FLOOD_ERROR.to_string(),
                    CodeFailure::Generic(code) => code,
                });
                self.emit(PanelEvent::VerificationUpdate { value: ty });
            }
        }
    }

    /// Gives up on verifying; the edit counts as failed once nothing else is pending.
    pub fn cancel_value_verification(&mut self, ty: ValueType) -> Result<(), FormError> {
        let value = self.form.value_mut(ty)?;
        let code_sent = value.verification.code_length.is_some();
        if let Some(id) = value.verification.request.take() {
            self.api.cancel(id);
        }
        if let Some(PhoneCall::Calling { request }) = value.verification.call {
            self.api.cancel(request);
        }
        value.verification = Verification::default();
        let still_saving = value.saving();
        self.cancel_timer(Timer::CallTick(ty));
        if code_sent {
            self.emit(PanelEvent::VerificationUpdate { value: ty });
        }
        if !still_saving {
            self.value_edit_failed(ty);
        }
        Ok(())
    }

    /// Countdown to the voice call; places the call once it runs out.
    pub(super) fn call_tick(&mut self, ty: ValueType) {
        let now = self.now();
        let Some(call) = self.form.value(ty).map(|v| v.verification.call) else {
            return;
        };
        match call {
            Some(PhoneCall::Waiting { until }) if until <= now => {
                let Some(phone) = self.verification_target(ty) else {
                    return;
                };
                let token = self.token(Pending::ResendCall(ty));
                if let Some(value) = self.form.values.get_mut(&ty) {
                    value.verification.call = Some(PhoneCall::Calling { request: token.id });
                }
                self.api.resend_phone_code(token, &phone);
                self.emit(PanelEvent::VerificationUpdate { value: ty });
            }
            Some(PhoneCall::Waiting { .. }) => {
                self.schedule(now + self.config.call_tick, Timer::CallTick(ty));
                self.emit(PanelEvent::VerificationUpdate { value: ty });
            }
            _ => {}
        }
    }

    pub(super) fn resend_call_done(
        &mut self,
        ty: ValueType,
        result: Result<ApiResponse, RpcError>,
    ) {
        let Some(value) = self.form.values.get_mut(&ty) else {
            return;
        };
        match result {
            Ok(_) => value.verification.call = Some(PhoneCall::Called),
            Err(error) => {
                warn!("Requesting a call for {:?} failed: {}", ty, error);
                value.verification.call = None;
                value.verification.error = Some(error.code);
            }
        }
        self.emit(PanelEvent::VerificationUpdate { value: ty });
    }
}

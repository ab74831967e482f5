use log::{debug, info, warn};

use super::timers::Deferred;
use super::FormController;
use crate::api::{ApiResponse, PassportApi, Pending, RpcError};
use crate::element::{build_input_element, invalid_date_fields, ParsedElement};
use crate::errors::{classify_save_error, FormError, SaveFailure};
use crate::events::{PanelEvent, ScanRef};
use crate::lang;
use crate::value::{SaveState, ValueMap, ValueType};

impl<A: PassportApi> FormController<A> {
    /// Opens one more editor on the value. The first one snapshots the
    /// committed state into the edit buffers and starts loading scans.
    pub fn start_value_edit(&mut self, ty: ValueType) -> Result<(), FormError> {
        let value = self.form.value_mut(ty)?;
        value.edit_screens += 1;
        if value.edit_screens == 1 && !value.saving() {
            value.save_in_edit();
            self.load_scans(ty);
        }
        Ok(())
    }

    /// Closes an editor. In-flight requests keep running; the buffers are
    /// dropped once the last editor is gone and nothing is outstanding.
    pub fn cancel_value_edit(&mut self, ty: ValueType) -> Result<(), FormError> {
        let value = self.form.value_mut(ty)?;
        if value.edit_screens == 0 {
            return Err(FormError::NotEditing(ty));
        }
        value.edit_screens -= 1;
        self.clear_if_idle(ty);
        Ok(())
    }

    pub(super) fn clear_if_idle(&mut self, ty: ValueType) {
        if let Some(value) = self.form.values.get_mut(&ty) {
            if value.edit_screens == 0 && !value.saving() {
                value.clear_edit_data();
            }
        }
    }

    /// Saves `changes` on top of the edit buffer. Does nothing while the
    /// value or the whole form is being written.
    pub fn save_value_edit(&mut self, ty: ValueType, changes: ValueMap) -> Result<(), FormError> {
        if !self.secret_ready {
            return Err(FormError::Locked);
        }
        if self.submit_request.is_some() {
            debug!("Save of {:?} ignored while submitting", ty);
            return Ok(());
        }
        let value = self.form.value_mut(ty)?;
        if value.saving() {
            debug!("Save of {:?} ignored, already saving", ty);
            return Ok(());
        }
        if value.edit_screens == 0 {
            value.save_in_edit();
        }
        if let Some((role, index)) = value.failed_upload() {
            warn!("Save of {:?} refused, {:?} upload failed", ty, role);
            if let Some(file) = value.edit_file_mut(role, index) {
                file.fields.error = Some(lang::UPLOAD_FAILED.to_string());
            }
            self.emit(PanelEvent::ScanUpdated(ScanRef {
                value: ty,
                role,
                index,
            }));
            self.emit(PanelEvent::ErrorBox {
                text: lang::UPLOAD_FAILED.to_string(),
            });
            return Ok(());
        }

        if !value.changed_by(&changes) {
            value.save = SaveState::SyntheticComplete;
            value.clear_edit_data();
            if value.edit_screens > 0 {
                value.save_in_edit();
            }
            self.deferred.push_back(Deferred::FinishUnchangedSave(ty));
            return Ok(());
        }

        value.data.parsed_in_edit.apply_changes(changes);
        let bad_dates = invalid_date_fields(ty, &value.data.parsed_in_edit);
        if !bad_dates.is_empty() {
            for field in &bad_dates {
                value.data.parsed_in_edit.set_error(field, lang::BAD_DATE);
            }
            for field in bad_dates {
                self.emit(PanelEvent::FieldError {
                    value: ty,
                    field: field.to_string(),
                });
            }
            return Ok(());
        }
        self.send_save_request(ty)
    }

    /// Writes the current edit buffer of the value.
    pub(super) fn send_save_request(&mut self, ty: ValueType) -> Result<(), FormError> {
        let Some(password) = self.password_value.clone() else {
            return Err(FormError::Locked);
        };
        let token = self.token(Pending::Save(ty));
        let value = self.form.value_mut(ty)?;
        let element = build_input_element(value);
        value.save = SaveState::Pending(token.id);
        debug!("Saving {:?} as request {}", ty, token.id);
        self.api.set_element(token, element, password.as_str());
        Ok(())
    }

    pub(super) fn finish_unchanged_save(&mut self, ty: ValueType) {
        let Some(value) = self.form.values.get_mut(&ty) else {
            return;
        };
        if value.save != SaveState::SyntheticComplete {
            return;
        }
        value.save = SaveState::Idle;
        self.clear_if_idle(ty);
        self.emit(PanelEvent::ValueSaveFinished { value: ty });
    }

    pub(super) fn save_done(&mut self, ty: ValueType, result: Result<ApiResponse, RpcError>) {
        let element = match result {
            Ok(ApiResponse::Element(element)) => element,
            Ok(other) => return self.save_failed(ty, RpcError::unexpected(&other)),
            Err(error) => return self.save_failed(ty, error),
        };
        if element.value_type() != ty {
            return self.save_failed(ty, RpcError::new("ELEMENT_TYPE_MISMATCH"));
        }
        let Some(value) = self.form.values.get_mut(&ty) else {
            return;
        };
        value.save = SaveState::Idle;
        value.commit_saved(ParsedElement::from(element));
        info!("Saved {:?}", ty);
        self.emit(PanelEvent::ValueSaveFinished { value: ty });
    }

    fn save_failed(&mut self, ty: ValueType, error: RpcError) {
        warn!("Saving {:?} failed: {}", ty, error);
        let Some(value) = self.form.values.get_mut(&ty) else {
            return;
        };
        value.save = SaveState::Idle;
        match classify_save_error(ty, &error.code) {
            SaveFailure::UpdateApp => {
                self.emit(PanelEvent::UpdateAppRequired);
                self.value_edit_failed(ty);
            }
            SaveFailure::PhoneVerification => self.start_phone_verification(ty),
            SaveFailure::EmailVerification => self.start_email_verification(ty),
            SaveFailure::Field { field, message } => {
                value.data.parsed_in_edit.set_error(field, message);
                self.emit(PanelEvent::FieldError {
                    value: ty,
                    field: field.to_string(),
                });
            }
            SaveFailure::Restart => {
                self.clear_if_idle(ty);
                self.suggest_restart();
            }
            SaveFailure::Generic(code) => {
                self.emit(PanelEvent::ErrorBox { text: code });
                self.value_edit_failed(ty);
            }
        }
    }

    pub(super) fn value_edit_failed(&mut self, ty: ValueType) {
        self.clear_if_idle(ty);
        self.emit(PanelEvent::ValueEditFailed { value: ty });
    }

    /// Deletes the whole value from the server.
    pub fn delete_value_edit(&mut self, ty: ValueType) -> Result<(), FormError> {
        if !self.secret_ready {
            return Err(FormError::Locked);
        }
        if self.submit_request.is_some() || self.form.value_mut(ty)?.saving() {
            debug!("Delete of {:?} ignored while a write is outstanding", ty);
            return Ok(());
        }
        let token = self.token(Pending::Delete(ty));
        self.form.value_mut(ty)?.save = SaveState::Pending(token.id);
        self.api.delete_element(token, ty);
        Ok(())
    }

    pub(super) fn delete_done(&mut self, ty: ValueType, result: Result<ApiResponse, RpcError>) {
        let Some(value) = self.form.values.get_mut(&ty) else {
            return;
        };
        match result {
            Ok(_) => {
                value.reset();
                info!("Deleted {:?}", ty);
                self.emit(PanelEvent::ValueSaveFinished { value: ty });
            }
            Err(error) => {
                warn!("Deleting {:?} failed: {}", ty, error);
                value.save = SaveState::Idle;
                self.emit(PanelEvent::ErrorBox { text: error.code });
                self.value_edit_failed(ty);
            }
        }
    }
}

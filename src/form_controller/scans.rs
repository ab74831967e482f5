use chrono::Utc;
use log::{debug, warn};

use super::FormController;
use crate::api::{FileEvent, PassportApi};
use crate::errors::FormError;
use crate::events::{PanelEvent, ScanRef};
use crate::file::{EditFile, File, FileId, FileKey, LoadStatus, ScanPreview, UploadData};
use crate::lang;
use crate::value::{FileType, ValueType};

impl<A: PassportApi> FormController<A> {
    /// Adds a scan to the edit buffer and starts uploading it. Over the
    /// per-role cap this only shows a toast.
    pub fn upload_scan(
        &mut self,
        ty: ValueType,
        role: FileType,
        bytes: Vec<u8>,
    ) -> Result<(), FormError> {
        let limit = self.config.scan_limit(role);
        let value = self.form.value_mut(ty)?;
        if value.edit_screens == 0 {
            return Err(FormError::NotEditing(ty));
        }
        if !value.can_add_file(role, limit) {
            self.emit(PanelEvent::Toast {
                text: lang::scans_limit_reached(limit.unwrap_or_default()),
            });
            return Ok(());
        }

        let key = FileKey(rand::random());
        let preview = ScanPreview::decode(&bytes);
        if preview.is_none() {
            debug!("Scan {:?} has no decodable preview", key);
        }
        let fields = File {
            id: key.0,
            size: bytes.len() as u64,
            access_hash: 0,
            date: Utc::now().timestamp(),
            preview,
            download: LoadStatus::Done,
            error: None,
        };
        self.api.upload_file(key, role, &bytes);
        let file = EditFile::uploaded(ty, role, fields, UploadData::started(key, bytes));
        let (index, replaced) = value.push_file_in_edit(file);
        if let Some(mut old) = replaced {
            if let Some(upload) = old.upload.as_ref().filter(|_| old.uploading()) {
                self.api.cancel_upload(upload.key);
            }
            // Keep the committed file around until the new one is on the server.
            let previous = if old.upload.is_some() {
                old.replaced.take()
            } else {
                Some(Box::new(old))
            };
            if let Some(file) = value.edit_file_mut(role, index) {
                file.replaced = previous;
            }
        }
        self.emit(PanelEvent::ScanUpdated(ScanRef {
            value: ty,
            role,
            index,
        }));
        Ok(())
    }

    /// Marks a file for removal on the next save.
    pub fn delete_scan(
        &mut self,
        ty: ValueType,
        role: FileType,
        index: Option<usize>,
    ) -> Result<(), FormError> {
        self.set_deleted(ty, role, index, true)
    }

    /// Takes a pending removal back, subject to the same cap as an upload.
    pub fn restore_scan(
        &mut self,
        ty: ValueType,
        role: FileType,
        index: Option<usize>,
    ) -> Result<(), FormError> {
        self.set_deleted(ty, role, index, false)
    }

    fn set_deleted(
        &mut self,
        ty: ValueType,
        role: FileType,
        index: Option<usize>,
        deleted: bool,
    ) -> Result<(), FormError> {
        let limit = self.config.scan_limit(role);
        let value = self.form.value_mut(ty)?;
        let missing = FormError::FileNotFound {
            value: ty,
            role,
            index,
        };
        let current = value.edit_file(role, index).ok_or(missing.clone())?.deleted;
        if current == deleted {
            return Ok(());
        }
        if !deleted && !value.can_add_file(role, limit) {
            self.emit(PanelEvent::Toast {
                text: lang::scans_limit_reached(limit.unwrap_or_default()),
            });
            return Ok(());
        }
        value.edit_file_mut(role, index).ok_or(missing)?.deleted = deleted;
        self.emit(PanelEvent::ScanUpdated(ScanRef {
            value: ty,
            role,
            index,
        }));
        Ok(())
    }

    /// Starts downloading every committed file of the value not yet in memory.
    pub(super) fn load_scans(&mut self, ty: ValueType) {
        let Some(value) = self.form.value(ty) else {
            return;
        };
        let slots: Vec<(FileType, Option<usize>)> = value
            .positions()
            .into_iter()
            .filter(|(role, index)| value.file(*role, *index).is_some())
            .collect();
        for (role, index) in slots {
            if let Err(error) = self.load_file(ty, role, index) {
                warn!("Could not load {:?} scan: {}", ty, error);
            }
        }
    }

    /// Fetches a committed file for display. No-op when it is already
    /// resident or on its way.
    pub fn load_file(
        &mut self,
        ty: ValueType,
        role: FileType,
        index: Option<usize>,
    ) -> Result<(), FormError> {
        let value = self.form.value_mut(ty)?;
        let file = value.file_mut(role, index).ok_or(FormError::FileNotFound {
            value: ty,
            role,
            index,
        })?;
        if file.preview.is_some() || matches!(file.download, LoadStatus::InProgress(_)) {
            return Ok(());
        }
        file.download = LoadStatus::InProgress(0);
        let (id, size) = (file.id, file.size);
        self.start_download(id, size);
        Ok(())
    }

    fn start_download(&mut self, id: FileId, size: u64) {
        let key = FileKey(id);
        if self.downloads.insert(key) {
            self.api.download_file(key, id, size);
        }
    }

    pub fn handle_file_event(&mut self, event: FileEvent) {
        if self.cancelled {
            return;
        }
        match event {
            FileEvent::UploadProgress { key, offset } => {
                self.update_upload(key, |file| {
                    if let Some(upload) = file.upload.as_mut() {
                        upload.status = LoadStatus::InProgress(offset);
                    }
                });
            }
            FileEvent::UploadDone { key, file_id } => {
                debug!("Upload {:?} done as file {}", key, file_id);
                self.update_upload(key, |file| {
                    file.fields.id = file_id;
                    file.replaced = None;
                    if let Some(upload) = file.upload.as_mut() {
                        upload.status = LoadStatus::Done;
                        upload.bytes = None;
                    }
                });
            }
            FileEvent::UploadFailed { key } => {
                warn!("Upload {:?} failed", key);
                self.update_upload(key, |file| {
                    if let Some(previous) = file.replaced.take() {
                        *file = *previous;
                        return;
                    }
                    if let Some(upload) = file.upload.as_mut() {
                        upload.status = LoadStatus::Failed;
                        upload.bytes = None;
                    }
                });
            }
            FileEvent::DownloadProgress { key, offset } => {
                self.update_download(key, |file| file.download = LoadStatus::InProgress(offset));
            }
            FileEvent::DownloadDone { key, bytes } => {
                self.downloads.remove(&key);
                let preview = ScanPreview::decode(&bytes);
                if preview.is_none() {
                    warn!("Downloaded file {:?} is not an image", key);
                }
                self.update_download(key, |file| match &preview {
                    Some(preview) => {
                        file.preview = Some(preview.clone());
                        file.download = LoadStatus::Done;
                    }
                    None => file.download = LoadStatus::Failed,
                });
            }
            FileEvent::DownloadFailed { key } => {
                self.downloads.remove(&key);
                warn!("Download {:?} failed", key);
                self.update_download(key, |file| file.download = LoadStatus::Failed);
            }
        }
    }

    fn update_upload(&mut self, key: FileKey, apply: impl FnOnce(&mut EditFile)) {
        let Some(scan) = self.form.find_upload(key) else {
            debug!("Upload {:?} no longer tracked", key);
            return;
        };
        let Some(file) = self
            .form
            .values
            .get_mut(&scan.value)
            .and_then(|value| value.edit_file_mut(scan.role, scan.index))
        else {
            return;
        };
        apply(file);
        self.emit(PanelEvent::ScanUpdated(scan));
        // The editor may have closed while this was uploading.
        self.clear_if_idle(scan.value);
    }

    /// Applies a download update to every committed file and edit mirror
    /// showing the downloaded file.
    fn update_download(&mut self, key: FileKey, apply: impl Fn(&mut File)) {
        let id = key.0;
        for scan in self.form.find_file(id) {
            let Some(value) = self.form.values.get_mut(&scan.value) else {
                continue;
            };
            if let Some(file) = value.file_mut(scan.role, scan.index).filter(|f| f.id == id) {
                apply(file);
            }
            if let Some(file) = value
                .edit_file_mut(scan.role, scan.index)
                .filter(|f| f.upload.is_none() && f.fields.id == id)
            {
                apply(&mut file.fields);
            }
            self.emit(PanelEvent::ScanUpdated(scan));
        }
    }
}

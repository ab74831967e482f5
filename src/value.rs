use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use crate::api::RequestId;
use crate::element::{ElementError, ErrorSource, ParsedElement};
use crate::file::{EditFile, File, FileId, LoadStatus, ScanPreview};

/// Field holding the text of phone and email values.
pub const PLAIN_VALUE_FIELD: &str = "value";

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    PersonalDetails,
    Passport,
    DriverLicense,
    IdentityCard,
    InternalPassport,
    Address,
    UtilityBill,
    BankStatement,
    RentalAgreement,
    PassportRegistration,
    TemporaryRegistration,
    Phone,
    Email,
}

impl ValueType {
    /// Documents proving identity (front side scan, optional selfie).
    pub fn is_identity_document(self) -> bool {
        matches!(
            self,
            ValueType::Passport
                | ValueType::DriverLicense
                | ValueType::IdentityCard
                | ValueType::InternalPassport
        )
    }

    /// Documents proving residence (a list of scans).
    pub fn is_address_document(self) -> bool {
        matches!(
            self,
            ValueType::UtilityBill
                | ValueType::BankStatement
                | ValueType::RentalAgreement
                | ValueType::PassportRegistration
                | ValueType::TemporaryRegistration
        )
    }

    pub fn is_document(self) -> bool {
        self.is_identity_document() || self.is_address_document()
    }

    pub fn is_plain_text(self) -> bool {
        matches!(self, ValueType::Phone | ValueType::Email)
    }

    /// Phone and email never carry a whole-value error.
    pub fn can_have_errors(self) -> bool {
        !self.is_plain_text()
    }

    /// Fields that must be non-empty before the value can be submitted.
    pub fn required_fields(self, native_names: bool) -> Vec<&'static str> {
        match self {
            ValueType::PersonalDetails => {
                let mut fields = vec![
                    "first_name",
                    "last_name",
                    "birth_date",
                    "gender",
                    "country_code",
                    "residence_country_code",
                ];
                if native_names {
                    fields.extend(["first_name_native", "last_name_native"]);
                }
                fields
            }
            ValueType::Passport
            | ValueType::DriverLicense
            | ValueType::IdentityCard
            | ValueType::InternalPassport => vec!["document_no"],
            ValueType::Address => vec!["street_line1", "city", "country_code", "post_code"],
            ValueType::UtilityBill
            | ValueType::BankStatement
            | ValueType::RentalAgreement
            | ValueType::PassportRegistration
            | ValueType::TemporaryRegistration => Vec::new(),
            ValueType::Phone | ValueType::Email => vec![PLAIN_VALUE_FIELD],
        }
    }
}

/// Role of an attached file.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum FileType {
    Scan,
    Translation,
    FrontSide,
    ReverseSide,
    Selfie,
}

impl FileType {
    /// Special roles hold a single file instead of a list.
    pub fn is_special(self) -> bool {
        matches!(self, FileType::FrontSide | FileType::ReverseSide | FileType::Selfie)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ValueField {
    pub text: String,
    pub error: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ValueMap {
    pub fields: BTreeMap<String, ValueField>,
}

impl ValueMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(&self, key: &str) -> &str {
        self.fields.get(key).map(|f| f.text.as_str()).unwrap_or("")
    }

    pub fn set_text(&mut self, key: &str, text: impl Into<String>) {
        self.fields.entry(key.to_string()).or_default().text = text.into();
    }

    pub fn set_error(&mut self, key: &str, error: impl Into<String>) {
        self.fields.entry(key.to_string()).or_default().error = Some(error.into());
    }

    pub fn has_errors(&self) -> bool {
        self.fields.values().any(|f| f.error.is_some())
    }

    /// Overlays `changes` on top of this map, keeping fields it doesn't mention.
    pub fn apply_changes(&mut self, changes: ValueMap) {
        for (key, field) in changes.fields {
            self.fields.insert(key, field);
        }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ValueMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let fields = iter
            .into_iter()
            .map(|(k, v)| {
                (
                    k.into(),
                    ValueField {
                        text: v.into(),
                        error: None,
                    },
                )
            })
            .collect();
        Self { fields }
    }
}

/// Committed fields and the edit buffer. `parsed_in_edit` mirrors `parsed`
/// outside of an edit session.
#[derive(Clone, Debug, Default)]
pub struct ValueData {
    pub parsed: ValueMap,
    pub parsed_in_edit: ValueMap,
}

/// Write request state of a value.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SaveState {
    #[default]
    Idle,
    Pending(RequestId),
    /// Nothing changed; completion is reported on the next tick without a request.
    SyntheticComplete,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CodeLength {
    Exact(usize),
    /// Length not reported; not validated locally.
    Unknown,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PhoneCall {
    Waiting { until: Instant },
    Calling { request: RequestId },
    Called,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Verification {
    pub request: Option<RequestId>,
    pub code_length: Option<CodeLength>,
    pub call: Option<PhoneCall>,
    pub error: Option<String>,
}

impl Verification {
    /// Seconds left before the voice call is placed, if one is scheduled.
    pub fn call_seconds_left(&self, now: Instant) -> Option<u64> {
        match self.call {
            Some(PhoneCall::Waiting { until }) => {
                Some(until.saturating_duration_since(now).as_secs())
            }
            _ => None,
        }
    }
}

/// One element of the form: its fields, scans and edit state.
#[derive(Clone, Debug)]
pub struct Value {
    pub value_type: ValueType,
    pub data: ValueData,
    pub(crate) scans: Vec<File>,
    pub(crate) translations: Vec<File>,
    pub(crate) special_scans: BTreeMap<FileType, File>,
    pub(crate) scans_in_edit: Vec<EditFile>,
    pub(crate) translations_in_edit: Vec<EditFile>,
    pub(crate) special_scans_in_edit: BTreeMap<FileType, EditFile>,
    pub error: Option<String>,
    pub scan_missing_error: Option<String>,
    pub translation_missing_error: Option<String>,
    pub selfie_required: bool,
    pub translation_required: bool,
    pub native_names: bool,
    /// Number of editors currently open for this value.
    pub edit_screens: u32,
    pub verification: Verification,
    pub save: SaveState,
    /// Set once the server has returned this element.
    pub present: bool,
}

impl Value {
    pub fn new(value_type: ValueType) -> Self {
        Self {
            value_type,
            data: ValueData::default(),
            scans: Vec::new(),
            translations: Vec::new(),
            special_scans: BTreeMap::new(),
            scans_in_edit: Vec::new(),
            translations_in_edit: Vec::new(),
            special_scans_in_edit: BTreeMap::new(),
            error: None,
            scan_missing_error: None,
            translation_missing_error: None,
            selfie_required: false,
            translation_required: false,
            native_names: false,
            edit_screens: 0,
            verification: Verification::default(),
            save: SaveState::Idle,
            present: false,
        }
    }

    /// Committed files of a list role. Special roles have no list and yield nothing.
    pub fn files(&self, role: FileType) -> &[File] {
        match role {
            FileType::Scan => &self.scans,
            FileType::Translation => &self.translations,
            _ => &[],
        }
    }

    pub fn files_in_edit(&self, role: FileType) -> &[EditFile] {
        match role {
            FileType::Scan => &self.scans_in_edit,
            FileType::Translation => &self.translations_in_edit,
            _ => &[],
        }
    }

    pub(crate) fn files_in_edit_mut(&mut self, role: FileType) -> Option<&mut Vec<EditFile>> {
        match role {
            FileType::Scan => Some(&mut self.scans_in_edit),
            FileType::Translation => Some(&mut self.translations_in_edit),
            _ => None,
        }
    }

    pub fn special_scan(&self, role: FileType) -> Option<&File> {
        self.special_scans.get(&role)
    }

    pub fn special_scan_in_edit(&self, role: FileType) -> Option<&EditFile> {
        self.special_scans_in_edit.get(&role)
    }

    /// Committed file by role; `index` is ignored for special roles.
    pub fn file(&self, role: FileType, index: Option<usize>) -> Option<&File> {
        if role.is_special() {
            self.special_scans.get(&role)
        } else {
            index.and_then(|i| self.files(role).get(i))
        }
    }

    pub(crate) fn file_mut(&mut self, role: FileType, index: Option<usize>) -> Option<&mut File> {
        match role {
            FileType::Scan => index.and_then(|i| self.scans.get_mut(i)),
            FileType::Translation => index.and_then(|i| self.translations.get_mut(i)),
            _ => self.special_scans.get_mut(&role),
        }
    }

    pub fn edit_file(&self, role: FileType, index: Option<usize>) -> Option<&EditFile> {
        if role.is_special() {
            self.special_scans_in_edit.get(&role)
        } else {
            index.and_then(|i| self.files_in_edit(role).get(i))
        }
    }

    pub(crate) fn edit_file_mut(
        &mut self,
        role: FileType,
        index: Option<usize>,
    ) -> Option<&mut EditFile> {
        match role {
            FileType::Scan => index.and_then(|i| self.scans_in_edit.get_mut(i)),
            FileType::Translation => index.and_then(|i| self.translations_in_edit.get_mut(i)),
            _ => self.special_scans_in_edit.get_mut(&role),
        }
    }

    /// Adds a file to the edit buffer. List roles append and return the new
    /// index; special roles replace and return the previous file.
    pub(crate) fn push_file_in_edit(
        &mut self,
        file: EditFile,
    ) -> (Option<usize>, Option<EditFile>) {
        let role = file.role;
        match self.files_in_edit_mut(role) {
            Some(list) => {
                list.push(file);
                (Some(list.len() - 1), None)
            }
            None => (None, self.special_scans_in_edit.insert(role, file)),
        }
    }

    /// Non-deleted files of `role` in the edit buffer.
    pub fn active_files_in_edit(&self, role: FileType) -> usize {
        if role.is_special() {
            self.special_scans_in_edit
                .get(&role)
                .map_or(0, |f| usize::from(!f.deleted))
        } else {
            self.files_in_edit(role).iter().filter(|f| !f.deleted).count()
        }
    }

    pub fn can_add_file(&self, role: FileType, limit: Option<usize>) -> bool {
        match limit {
            Some(limit) => self.active_files_in_edit(role) < limit,
            None => true,
        }
    }

    pub fn requires_special_scan(&self, role: FileType) -> bool {
        match role {
            FileType::FrontSide => self.value_type.is_identity_document(),
            FileType::ReverseSide => matches!(
                self.value_type,
                ValueType::DriverLicense | ValueType::IdentityCard
            ),
            FileType::Selfie => self.selfie_required,
            FileType::Scan | FileType::Translation => false,
        }
    }

    pub fn requires_scan(&self, role: FileType) -> bool {
        match role {
            FileType::Scan => self.value_type.is_address_document(),
            FileType::Translation => self.translation_required,
            _ => self.requires_special_scan(role),
        }
    }

    /// Every required committed file is present.
    pub fn scans_are_filled(&self) -> bool {
        let lists_ok = [FileType::Scan, FileType::Translation]
            .into_iter()
            .all(|role| !self.requires_scan(role) || !self.files(role).is_empty());
        let special_ok = [FileType::FrontSide, FileType::ReverseSide, FileType::Selfie]
            .into_iter()
            .all(|role| {
                !self.requires_special_scan(role) || self.special_scans.contains_key(&role)
            });
        lists_ok && special_ok
    }

    pub fn fields_filled(&self) -> bool {
        self.value_type
            .required_fields(self.native_names)
            .iter()
            .all(|key| !self.data.parsed.text(key).trim().is_empty())
    }

    pub fn has_errors(&self) -> bool {
        self.error.is_some()
            || self.scan_missing_error.is_some()
            || self.translation_missing_error.is_some()
            || self.data.parsed.has_errors()
            || self.committed_files().any(|f| f.error.is_some())
    }

    /// Complete enough to be sent in the final submission.
    pub fn is_ready(&self) -> bool {
        self.present && self.fields_filled() && self.scans_are_filled() && !self.has_errors()
    }

    pub fn uploading_scan(&self) -> bool {
        self.edit_files().any(EditFile::uploading)
    }

    /// First non-deleted file in the edit buffer whose upload failed.
    pub fn failed_upload(&self) -> Option<(FileType, Option<usize>)> {
        self.positions().into_iter().find(|(role, index)| {
            self.edit_file(*role, *index)
                .is_some_and(|f| !f.deleted && f.upload_failed())
        })
    }

    /// A write, a verification or an upload is outstanding.
    pub fn saving(&self) -> bool {
        self.save != SaveState::Idle
            || self.verification.request.is_some()
            || self.verification.code_length.is_some()
            || self.uploading_scan()
    }

    /// Whether saving `candidate` would change anything compared to the committed state.
    pub fn changed_by(&self, candidate: &ValueMap) -> bool {
        if self.edit_files().any(EditFile::changed) {
            return true;
        }
        let existing = &self.data.parsed.fields;
        candidate.fields.iter().any(|(key, field)| match existing.get(key) {
            Some(committed) => committed.text != field.text,
            None => !field.text.is_empty(),
        })
    }

    /// Snapshots the committed state into the edit buffers.
    pub fn save_in_edit(&mut self) {
        let ty = self.value_type;
        self.data.parsed_in_edit = self.data.parsed.clone();
        self.scans_in_edit = self
            .scans
            .iter()
            .map(|f| EditFile::committed(ty, FileType::Scan, f))
            .collect();
        self.translations_in_edit = self
            .translations
            .iter()
            .map(|f| EditFile::committed(ty, FileType::Translation, f))
            .collect();
        self.special_scans_in_edit = self
            .special_scans
            .iter()
            .map(|(role, f)| (*role, EditFile::committed(ty, *role, f)))
            .collect();
    }

    pub fn clear_edit_data(&mut self) {
        self.data.parsed_in_edit = self.data.parsed.clone();
        self.scans_in_edit.clear();
        self.translations_in_edit.clear();
        self.special_scans_in_edit.clear();
    }

    /// Replaces the committed state with an element returned by the server.
    pub fn fill(&mut self, element: ParsedElement) {
        self.data.parsed = element.fields;
        self.scans = element.scans;
        self.translations = element.translations;
        self.special_scans = element.special_scans;
        self.error = None;
        self.scan_missing_error = None;
        self.translation_missing_error = None;
        self.present = true;
        if self.edit_screens == 0 {
            self.data.parsed_in_edit = self.data.parsed.clone();
        }
    }

    /// Commits the echo of a successful save, reusing local previews of the
    /// files that were in the edit buffer.
    pub(crate) fn commit_saved(&mut self, element: ParsedElement) {
        let previews: HashMap<FileId, ScanPreview> = self
            .edit_files()
            .filter_map(|f| f.fields.preview.clone().map(|p| (f.fields.id, p)))
            .collect();
        self.fill(element);
        for file in self.committed_files_mut() {
            if let Some(preview) = previews.get(&file.id) {
                file.preview = Some(preview.clone());
                file.download = LoadStatus::Done;
            }
        }
        if self.edit_screens == 0 {
            self.clear_edit_data();
        } else {
            self.save_in_edit();
        }
    }

    /// Back to the empty placeholder, keeping what the form requires of it.
    pub fn reset(&mut self) {
        let mut fresh = Value::new(self.value_type);
        fresh.selfie_required = self.selfie_required;
        fresh.translation_required = self.translation_required;
        fresh.native_names = self.native_names;
        fresh.edit_screens = self.edit_screens;
        *self = fresh;
        if self.edit_screens > 0 {
            self.save_in_edit();
        }
    }

    /// Attaches a server-reported error to the matching field, file or the value itself.
    pub fn apply_error(&mut self, error: &ElementError) {
        let message = error.message.clone();
        match &error.source {
            ErrorSource::Unspecified => {
                if self.value_type.can_have_errors() {
                    self.error = Some(message);
                } else {
                    self.data.parsed.set_error(PLAIN_VALUE_FIELD, message);
                }
            }
            ErrorSource::DataField { field } => self.data.parsed.set_error(field, message),
            ErrorSource::FrontSide => self.special_file_error(FileType::FrontSide, message),
            ErrorSource::ReverseSide => self.special_file_error(FileType::ReverseSide, message),
            ErrorSource::Selfie => self.special_file_error(FileType::Selfie, message),
            ErrorSource::File { index } => match self.scans.get_mut(*index) {
                Some(file) => file.error = Some(message),
                None => self.scan_missing_error = Some(message),
            },
            ErrorSource::Files => self.scan_missing_error = Some(message),
            ErrorSource::TranslationFile { index } => match self.translations.get_mut(*index) {
                Some(file) => file.error = Some(message),
                None => self.translation_missing_error = Some(message),
            },
            ErrorSource::TranslationFiles => self.translation_missing_error = Some(message),
        }
        if self.edit_screens == 0 && !self.saving() {
            self.data.parsed_in_edit = self.data.parsed.clone();
        }
    }

    fn special_file_error(&mut self, role: FileType, message: String) {
        match self.special_scans.get_mut(&role) {
            Some(file) => file.error = Some(message),
            None => self.error = Some(message),
        }
    }

    pub(crate) fn committed_files(&self) -> impl Iterator<Item = &File> {
        self.scans
            .iter()
            .chain(self.translations.iter())
            .chain(self.special_scans.values())
    }

    pub(crate) fn committed_files_mut(&mut self) -> impl Iterator<Item = &mut File> {
        self.scans
            .iter_mut()
            .chain(self.translations.iter_mut())
            .chain(self.special_scans.values_mut())
    }

    pub(crate) fn edit_files(&self) -> impl Iterator<Item = &EditFile> {
        self.scans_in_edit
            .iter()
            .chain(self.translations_in_edit.iter())
            .chain(self.special_scans_in_edit.values())
    }

    /// Every file slot with its position, committed files first.
    pub(crate) fn positions(&self) -> Vec<(FileType, Option<usize>)> {
        let mut positions = Vec::new();
        for role in [FileType::Scan, FileType::Translation] {
            let len = self.files(role).len().max(self.files_in_edit(role).len());
            positions.extend((0..len).map(|i| (role, Some(i))));
        }
        for role in [FileType::FrontSide, FileType::ReverseSide, FileType::Selfie] {
            if self.special_scans.contains_key(&role)
                || self.special_scans_in_edit.contains_key(&role)
            {
                positions.push((role, None));
            }
        }
        positions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::{FileKey, UploadData};

    fn stored_file(id: FileId) -> File {
        File {
            id,
            size: 100,
            ..File::default()
        }
    }

    fn passport_with_front() -> Value {
        let mut value = Value::new(ValueType::Passport);
        value.data.parsed.set_text("document_no", "AB123");
        value.special_scans.insert(FileType::FrontSide, stored_file(7));
        value.present = true;
        value
    }

    #[test]
    fn test_edit_buffer_snapshot_and_clear() {
        let mut value = passport_with_front();
        value.save_in_edit();
        assert_eq!(value.data.parsed_in_edit, value.data.parsed);
        assert!(value.special_scan_in_edit(FileType::FrontSide).is_some());

        value.data.parsed_in_edit.set_text("document_no", "ZZ999");
        value.clear_edit_data();
        assert_eq!(value.data.parsed_in_edit.text("document_no"), "AB123");
        assert!(value.special_scan_in_edit(FileType::FrontSide).is_none());
    }

    #[test]
    fn test_changed_by_compares_fields_and_files() {
        let mut value = passport_with_front();
        value.save_in_edit();

        let same: ValueMap = [("document_no", "AB123")].into_iter().collect();
        assert!(!value.changed_by(&same));

        // An absent field only counts when the candidate has text.
        let blank: ValueMap = [("expiry_date", "")].into_iter().collect();
        assert!(!value.changed_by(&blank));
        let filled: ValueMap = [("expiry_date", "01.01.2030")].into_iter().collect();
        assert!(value.changed_by(&filled));

        value
            .special_scans_in_edit
            .get_mut(&FileType::FrontSide)
            .unwrap()
            .deleted = true;
        assert!(value.changed_by(&same));
    }

    #[test]
    fn test_saving_includes_uploads_and_verification() {
        let mut value = Value::new(ValueType::Phone);
        assert!(!value.saving());

        value.verification.code_length = Some(CodeLength::Exact(5));
        assert!(value.saving());
        value.verification = Verification::default();

        let mut upload = EditFile::committed(ValueType::Phone, FileType::Scan, &stored_file(1));
        upload.upload = Some(UploadData::started(FileKey(1), vec![1, 2, 3]));
        value.scans_in_edit.push(upload);
        assert!(value.saving());
    }

    #[test]
    fn test_scans_are_filled_per_type() {
        let mut license = Value::new(ValueType::DriverLicense);
        license.special_scans.insert(FileType::FrontSide, stored_file(1));
        assert!(!license.scans_are_filled());
        license.special_scans.insert(FileType::ReverseSide, stored_file(2));
        assert!(license.scans_are_filled());

        license.selfie_required = true;
        assert!(!license.scans_are_filled());

        let mut bill = Value::new(ValueType::UtilityBill);
        assert!(!bill.scans_are_filled());
        bill.scans.push(stored_file(3));
        assert!(bill.scans_are_filled());
        bill.translation_required = true;
        assert!(!bill.scans_are_filled());
    }

    #[test]
    fn test_apply_error_mapping() {
        let mut value = passport_with_front();
        let error = |source| ElementError {
            value_type: ValueType::Passport,
            message: "bad".to_string(),
            source,
        };

        value.apply_error(&error(ErrorSource::DataField {
            field: "document_no".to_string(),
        }));
        assert_eq!(
            value.data.parsed.fields["document_no"].error.as_deref(),
            Some("bad")
        );

        value.apply_error(&error(ErrorSource::FrontSide));
        assert_eq!(
            value.special_scan(FileType::FrontSide).unwrap().error.as_deref(),
            Some("bad")
        );

        // No selfie stored: lands on the value itself.
        value.apply_error(&error(ErrorSource::Selfie));
        assert_eq!(value.error.as_deref(), Some("bad"));

        value.apply_error(&error(ErrorSource::TranslationFile { index: 3 }));
        assert_eq!(value.translation_missing_error.as_deref(), Some("bad"));
        assert!(value.has_errors());

        let mut phone = Value::new(ValueType::Phone);
        phone.apply_error(&ElementError {
            value_type: ValueType::Phone,
            message: "bad".to_string(),
            source: ErrorSource::Unspecified,
        });
        assert!(phone.error.is_none());
        assert_eq!(
            phone.data.parsed.fields[PLAIN_VALUE_FIELD].error.as_deref(),
            Some("bad")
        );
    }

    #[test]
    fn test_reset_keeps_requirements() {
        let mut value = passport_with_front();
        value.selfie_required = true;
        value.edit_screens = 1;
        value.reset();
        assert!(value.selfie_required);
        assert_eq!(value.edit_screens, 1);
        assert!(!value.present);
        assert!(value.special_scan(FileType::FrontSide).is_none());
    }
}

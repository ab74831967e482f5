//! Wire representation of document elements and their conversion to and
//! from [`Value`] state.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::file::{File, FileId, LoadStatus};
use crate::value::{FileType, Value, ValueMap, ValueType, PLAIN_VALUE_FIELD};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct Date {
    pub day: u32,
    pub month: u32,
    pub year: i32,
}

impl Date {
    /// Parses `DD.MM.YYYY`, rejecting dates that don't exist.
    pub fn parse(text: &str) -> Option<Self> {
        let date = NaiveDate::parse_from_str(text.trim(), "%d.%m.%Y").ok()?;
        use chrono::Datelike;
        Some(Self {
            day: date.day(),
            month: date.month(),
            year: date.year(),
        })
    }

    pub fn format(&self) -> String {
        format!("{:02}.{:02}.{:04}", self.day, self.month, self.year)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct RemoteFile {
    pub id: FileId,
    pub size: u64,
    #[serde(default)]
    pub access_hash: u64,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct DatedFile {
    pub file: RemoteFile,
    pub date: i64,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct PersonalDetails {
    pub first_name: String,
    #[serde(default)]
    pub middle_name: String,
    pub last_name: String,
    #[serde(default)]
    pub native_first_name: String,
    #[serde(default)]
    pub native_middle_name: String,
    #[serde(default)]
    pub native_last_name: String,
    pub birthdate: Option<Date>,
    pub gender: String,
    pub country_code: String,
    pub residence_country_code: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct IdentityDocument {
    pub number: String,
    #[serde(default)]
    pub expiry_date: Option<Date>,
    #[serde(default)]
    pub front_side: Option<DatedFile>,
    #[serde(default)]
    pub reverse_side: Option<DatedFile>,
    #[serde(default)]
    pub selfie: Option<DatedFile>,
    #[serde(default)]
    pub translation: Vec<DatedFile>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct PersonalDocument {
    #[serde(default)]
    pub files: Vec<DatedFile>,
    #[serde(default)]
    pub translation: Vec<DatedFile>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct Address {
    pub street_line1: String,
    #[serde(default)]
    pub street_line2: String,
    pub city: String,
    #[serde(default)]
    pub state: String,
    pub country_code: String,
    pub postal_code: String,
}

/// Element as stored on the server.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum PassportElement {
    PersonalDetails(PersonalDetails),
    Passport(IdentityDocument),
    DriverLicense(IdentityDocument),
    IdentityCard(IdentityDocument),
    InternalPassport(IdentityDocument),
    Address(Address),
    UtilityBill(PersonalDocument),
    BankStatement(PersonalDocument),
    RentalAgreement(PersonalDocument),
    PassportRegistration(PersonalDocument),
    TemporaryRegistration(PersonalDocument),
    Phone(String),
    Email(String),
}

impl PassportElement {
    pub fn value_type(&self) -> ValueType {
        match self {
            PassportElement::PersonalDetails(_) => ValueType::PersonalDetails,
            PassportElement::Passport(_) => ValueType::Passport,
            PassportElement::DriverLicense(_) => ValueType::DriverLicense,
            PassportElement::IdentityCard(_) => ValueType::IdentityCard,
            PassportElement::InternalPassport(_) => ValueType::InternalPassport,
            PassportElement::Address(_) => ValueType::Address,
            PassportElement::UtilityBill(_) => ValueType::UtilityBill,
            PassportElement::BankStatement(_) => ValueType::BankStatement,
            PassportElement::RentalAgreement(_) => ValueType::RentalAgreement,
            PassportElement::PassportRegistration(_) => ValueType::PassportRegistration,
            PassportElement::TemporaryRegistration(_) => ValueType::TemporaryRegistration,
            PassportElement::Phone(_) => ValueType::Phone,
            PassportElement::Email(_) => ValueType::Email,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct InputIdentityDocument {
    pub number: String,
    pub expiry_date: Option<Date>,
    pub front_side: Option<FileId>,
    pub reverse_side: Option<FileId>,
    pub selfie: Option<FileId>,
    pub translation: Vec<FileId>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct InputPersonalDocument {
    pub files: Vec<FileId>,
    pub translation: Vec<FileId>,
}

/// Element as sent in a save request.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum InputPassportElement {
    PersonalDetails(PersonalDetails),
    Passport(InputIdentityDocument),
    DriverLicense(InputIdentityDocument),
    IdentityCard(InputIdentityDocument),
    InternalPassport(InputIdentityDocument),
    Address(Address),
    UtilityBill(InputPersonalDocument),
    BankStatement(InputPersonalDocument),
    RentalAgreement(InputPersonalDocument),
    PassportRegistration(InputPersonalDocument),
    TemporaryRegistration(InputPersonalDocument),
    Phone(String),
    Email(String),
}

impl InputPassportElement {
    pub fn value_type(&self) -> ValueType {
        match self {
            InputPassportElement::PersonalDetails(_) => ValueType::PersonalDetails,
            InputPassportElement::Passport(_) => ValueType::Passport,
            InputPassportElement::DriverLicense(_) => ValueType::DriverLicense,
            InputPassportElement::IdentityCard(_) => ValueType::IdentityCard,
            InputPassportElement::InternalPassport(_) => ValueType::InternalPassport,
            InputPassportElement::Address(_) => ValueType::Address,
            InputPassportElement::UtilityBill(_) => ValueType::UtilityBill,
            InputPassportElement::BankStatement(_) => ValueType::BankStatement,
            InputPassportElement::RentalAgreement(_) => ValueType::RentalAgreement,
            InputPassportElement::PassportRegistration(_) => ValueType::PassportRegistration,
            InputPassportElement::TemporaryRegistration(_) => ValueType::TemporaryRegistration,
            InputPassportElement::Phone(_) => ValueType::Phone,
            InputPassportElement::Email(_) => ValueType::Email,
        }
    }
}

/// Where a server-reported error points inside an element.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ErrorSource {
    Unspecified,
    DataField { field: String },
    FrontSide,
    ReverseSide,
    Selfie,
    File { index: usize },
    Files,
    TranslationFile { index: usize },
    TranslationFiles,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ElementError {
    pub value_type: ValueType,
    pub message: String,
    pub source: ErrorSource,
}

/// Committed state extracted from a [`PassportElement`].
#[derive(Clone, Debug, Default)]
pub struct ParsedElement {
    pub fields: ValueMap,
    pub scans: Vec<File>,
    pub translations: Vec<File>,
    pub special_scans: BTreeMap<FileType, File>,
}

fn stored_file(dated: DatedFile) -> File {
    File {
        id: dated.file.id,
        size: dated.file.size,
        access_hash: dated.file.access_hash,
        date: dated.date,
        preview: None,
        download: LoadStatus::NotStarted,
        error: None,
    }
}

fn date_text(date: Option<Date>) -> String {
    date.map(|d| d.format()).unwrap_or_default()
}

fn parse_identity(doc: IdentityDocument) -> ParsedElement {
    let mut parsed = ParsedElement::default();
    parsed.fields.set_text("document_no", doc.number);
    parsed.fields.set_text("expiry_date", date_text(doc.expiry_date));
    for (role, file) in [
        (FileType::FrontSide, doc.front_side),
        (FileType::ReverseSide, doc.reverse_side),
        (FileType::Selfie, doc.selfie),
    ] {
        if let Some(file) = file {
            parsed.special_scans.insert(role, stored_file(file));
        }
    }
    parsed.translations = doc.translation.into_iter().map(stored_file).collect();
    parsed
}

fn parse_personal_document(doc: PersonalDocument) -> ParsedElement {
    ParsedElement {
        scans: doc.files.into_iter().map(stored_file).collect(),
        translations: doc.translation.into_iter().map(stored_file).collect(),
        ..ParsedElement::default()
    }
}

fn plain(text: String) -> ParsedElement {
    let mut parsed = ParsedElement::default();
    parsed.fields.set_text(PLAIN_VALUE_FIELD, text);
    parsed
}

impl From<PassportElement> for ParsedElement {
    fn from(element: PassportElement) -> Self {
        match element {
            PassportElement::PersonalDetails(details) => {
                let mut parsed = ParsedElement::default();
                let fields = &mut parsed.fields;
                fields.set_text("first_name", details.first_name);
                fields.set_text("middle_name", details.middle_name);
                fields.set_text("last_name", details.last_name);
                fields.set_text("first_name_native", details.native_first_name);
                fields.set_text("middle_name_native", details.native_middle_name);
                fields.set_text("last_name_native", details.native_last_name);
                fields.set_text("birth_date", date_text(details.birthdate));
                fields.set_text("gender", details.gender);
                fields.set_text("country_code", details.country_code);
                fields.set_text("residence_country_code", details.residence_country_code);
                parsed
            }
            PassportElement::Passport(doc)
            | PassportElement::DriverLicense(doc)
            | PassportElement::IdentityCard(doc)
            | PassportElement::InternalPassport(doc) => parse_identity(doc),
            PassportElement::Address(address) => {
                let mut parsed = ParsedElement::default();
                let fields = &mut parsed.fields;
                fields.set_text("street_line1", address.street_line1);
                fields.set_text("street_line2", address.street_line2);
                fields.set_text("city", address.city);
                fields.set_text("state", address.state);
                fields.set_text("country_code", address.country_code);
                fields.set_text("post_code", address.postal_code);
                parsed
            }
            PassportElement::UtilityBill(doc)
            | PassportElement::BankStatement(doc)
            | PassportElement::RentalAgreement(doc)
            | PassportElement::PassportRegistration(doc)
            | PassportElement::TemporaryRegistration(doc) => parse_personal_document(doc),
            PassportElement::Phone(phone) => plain(phone),
            PassportElement::Email(email) => plain(email),
        }
    }
}

/// Ids of the non-deleted, uploaded files of a list role in the edit buffer.
fn edit_list(value: &Value, role: FileType) -> Vec<FileId> {
    value
        .files_in_edit(role)
        .iter()
        .filter(|f| !f.deleted)
        .filter_map(|f| f.remote_id())
        .collect()
}

fn edit_special(value: &Value, role: FileType) -> Option<FileId> {
    value
        .special_scan_in_edit(role)
        .filter(|f| !f.deleted)
        .and_then(|f| f.remote_id())
}

fn identity_input(value: &Value) -> InputIdentityDocument {
    let fields = &value.data.parsed_in_edit;
    InputIdentityDocument {
        number: fields.text("document_no").trim().to_string(),
        expiry_date: Date::parse(fields.text("expiry_date")),
        front_side: edit_special(value, FileType::FrontSide),
        reverse_side: edit_special(value, FileType::ReverseSide),
        selfie: edit_special(value, FileType::Selfie),
        translation: edit_list(value, FileType::Translation),
    }
}

fn personal_document_input(value: &Value) -> InputPersonalDocument {
    InputPersonalDocument {
        files: edit_list(value, FileType::Scan),
        translation: edit_list(value, FileType::Translation),
    }
}

/// Date fields holding text that is not a real `DD.MM.YYYY` date.
pub fn invalid_date_fields(value_type: ValueType, fields: &ValueMap) -> Vec<&'static str> {
    let keys: &[&'static str] = match value_type {
        ValueType::PersonalDetails => &["birth_date"],
        ty if ty.is_identity_document() => &["expiry_date"],
        _ => &[],
    };
    keys.iter()
        .copied()
        .filter(|key| {
            let text = fields.text(key).trim();
            !text.is_empty() && Date::parse(text).is_none()
        })
        .collect()
}

/// Builds the save request body from a value's edit buffer. Deleted files and
/// uploads that never finished are left out.
pub fn build_input_element(value: &Value) -> InputPassportElement {
    let fields = &value.data.parsed_in_edit;
    let text = |key: &str| fields.text(key).trim().to_string();
    match value.value_type {
        ValueType::PersonalDetails => InputPassportElement::PersonalDetails(PersonalDetails {
            first_name: text("first_name"),
            middle_name: text("middle_name"),
            last_name: text("last_name"),
            native_first_name: text("first_name_native"),
            native_middle_name: text("middle_name_native"),
            native_last_name: text("last_name_native"),
            birthdate: Date::parse(fields.text("birth_date")),
            gender: text("gender"),
            country_code: text("country_code"),
            residence_country_code: text("residence_country_code"),
        }),
        ValueType::Passport => InputPassportElement::Passport(identity_input(value)),
        ValueType::DriverLicense => InputPassportElement::DriverLicense(identity_input(value)),
        ValueType::IdentityCard => InputPassportElement::IdentityCard(identity_input(value)),
        ValueType::InternalPassport => {
            InputPassportElement::InternalPassport(identity_input(value))
        }
        ValueType::Address => InputPassportElement::Address(Address {
            street_line1: text("street_line1"),
            street_line2: text("street_line2"),
            city: text("city"),
            state: text("state"),
            country_code: text("country_code"),
            postal_code: text("post_code"),
        }),
        ValueType::UtilityBill => {
            InputPassportElement::UtilityBill(personal_document_input(value))
        }
        ValueType::BankStatement => {
            InputPassportElement::BankStatement(personal_document_input(value))
        }
        ValueType::RentalAgreement => {
            InputPassportElement::RentalAgreement(personal_document_input(value))
        }
        ValueType::PassportRegistration => {
            InputPassportElement::PassportRegistration(personal_document_input(value))
        }
        ValueType::TemporaryRegistration => {
            InputPassportElement::TemporaryRegistration(personal_document_input(value))
        }
        ValueType::Phone => InputPassportElement::Phone(text(PLAIN_VALUE_FIELD)),
        ValueType::Email => InputPassportElement::Email(text(PLAIN_VALUE_FIELD)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::{EditFile, FileKey, UploadData};

    fn dated(id: FileId) -> DatedFile {
        DatedFile {
            file: RemoteFile {
                id,
                size: 2048,
                access_hash: 0,
            },
            date: 1_700_000_000,
        }
    }

    #[test]
    fn test_date_parse_and_format() {
        let date = Date::parse("09.03.1990").unwrap();
        assert_eq!(date, Date { day: 9, month: 3, year: 1990 });
        assert_eq!(date.format(), "09.03.1990");
        assert!(Date::parse("31.02.2001").is_none());
        assert!(Date::parse("").is_none());
    }

    #[test]
    fn test_invalid_date_fields() {
        let details: ValueMap = [("birth_date", "31.02.2001")].into_iter().collect();
        assert_eq!(
            invalid_date_fields(ValueType::PersonalDetails, &details),
            vec!["birth_date"]
        );

        let empty: ValueMap = [("birth_date", " ")].into_iter().collect();
        assert!(invalid_date_fields(ValueType::PersonalDetails, &empty).is_empty());

        let passport: ValueMap = [("expiry_date", "1.1"), ("birth_date", "x")]
            .into_iter()
            .collect();
        assert_eq!(
            invalid_date_fields(ValueType::Passport, &passport),
            vec!["expiry_date"]
        );
        assert!(invalid_date_fields(ValueType::Address, &passport).is_empty());
    }

    #[test]
    fn test_identity_document_parses_special_scans() {
        let element = PassportElement::DriverLicense(IdentityDocument {
            number: "D-1".to_string(),
            expiry_date: Some(Date { day: 1, month: 12, year: 2030 }),
            front_side: Some(dated(1)),
            reverse_side: Some(dated(2)),
            selfie: None,
            translation: vec![dated(3)],
        });
        assert_eq!(element.value_type(), ValueType::DriverLicense);

        let parsed = ParsedElement::from(element);
        assert_eq!(parsed.fields.text("document_no"), "D-1");
        assert_eq!(parsed.fields.text("expiry_date"), "01.12.2030");
        assert_eq!(parsed.special_scans[&FileType::FrontSide].id, 1);
        assert_eq!(parsed.special_scans[&FileType::ReverseSide].id, 2);
        assert!(!parsed.special_scans.contains_key(&FileType::Selfie));
        assert_eq!(parsed.translations.len(), 1);
    }

    #[test]
    fn test_element_json_shape() {
        let json = r#"{"type":"phone","value":"+15550001"}"#;
        let element: PassportElement = serde_json::from_str(json).unwrap();
        assert_eq!(element, PassportElement::Phone("+15550001".to_string()));

        let error: ElementError = serde_json::from_str(
            r#"{"value_type":"passport","message":"Scan is blurry","source":{"type":"file","index":0}}"#,
        )
        .unwrap();
        assert_eq!(error.source, ErrorSource::File { index: 0 });
    }

    #[test]
    fn test_input_skips_deleted_and_unfinished_files() {
        let mut value = Value::new(ValueType::UtilityBill);
        value.fill(ParsedElement::from(PassportElement::UtilityBill(PersonalDocument {
            files: vec![dated(10), dated(11)],
            translation: Vec::new(),
        })));
        value.save_in_edit();
        value.scans_in_edit[1].deleted = true;
        value.scans_in_edit.push(EditFile::uploaded(
            ValueType::UtilityBill,
            FileType::Scan,
            File {
                id: 99,
                ..File::default()
            },
            UploadData::started(FileKey(99), vec![1]),
        ));

        match build_input_element(&value) {
            InputPassportElement::UtilityBill(doc) => assert_eq!(doc.files, vec![10]),
            other => panic!("unexpected element {:?}", other),
        }
    }

    #[test]
    fn test_personal_details_input_trims_and_parses_birthdate() {
        let mut value = Value::new(ValueType::PersonalDetails);
        value.data.parsed_in_edit = [
            ("first_name", " Ada "),
            ("last_name", "Lovelace"),
            ("birth_date", "10.12.1815"),
            ("gender", "female"),
        ]
        .into_iter()
        .collect();

        match build_input_element(&value) {
            InputPassportElement::PersonalDetails(details) => {
                assert_eq!(details.first_name, "Ada");
                assert_eq!(details.birthdate, Some(Date { day: 10, month: 12, year: 1815 }));
                assert_eq!(details.country_code, "");
            }
            other => panic!("unexpected element {:?}", other),
        }
    }
}

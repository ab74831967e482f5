use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::errors::FormError;
use crate::events::ScanRef;
use crate::file::FileKey;
use crate::value::{Value, ValueType};

pub type FormId = i64;

/// Which bot asks for which data, as carried by a `passport` deep link.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct FormRequest {
    pub bot_id: i64,
    /// Raw JSON scope description, forwarded to the server untouched.
    pub scope: String,
    pub callback_url: Option<String>,
    pub public_key: String,
    pub nonce: String,
}

impl FormRequest {
    /// Parses the query part of a deep link (`bot_id=..&scope=..&public_key=..&nonce=..`).
    /// A full link is accepted too; everything up to `?` is skipped.
    pub fn from_query(query: &str) -> Result<Self, FormError> {
        let query = query.split_once('?').map_or(query, |(_, q)| q);
        let mut params: HashMap<&str, String> = HashMap::new();
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, raw) = pair.split_once('=').unwrap_or((pair, ""));
            let decoded = urlencoding::decode(&raw.replace('+', " "))
                .map_err(|e| FormError::InvalidRequest(format!("{}: {}", key, e)))?
                .into_owned();
            params.insert(key, decoded);
        }

        let bot_id = params
            .get("bot_id")
            .and_then(|v| v.trim().parse::<i64>().ok())
            .filter(|id| *id > 0)
            .ok_or_else(|| FormError::InvalidRequest("bot_id".to_string()))?;
        let scope = params
            .remove("scope")
            .ok_or_else(|| FormError::InvalidRequest("scope".to_string()))?;
        serde_json::from_str::<serde_json::Value>(&scope)
            .map_err(|e| FormError::InvalidRequest(format!("scope: {}", e)))?;

        // Old clients sent `payload` where `nonce` is expected now.
        let nonce = params
            .remove("nonce")
            .or_else(|| params.remove("payload"))
            .unwrap_or_default();

        Ok(Self {
            bot_id,
            scope,
            callback_url: params.remove("callback_url").filter(|u| !u.is_empty()),
            public_key: params.remove("public_key").unwrap_or_default(),
            nonce,
        })
    }
}

/// One acceptable type of a requested element with what it must include.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct RequiredType {
    pub value_type: ValueType,
    #[serde(default)]
    pub selfie_required: bool,
    #[serde(default)]
    pub translation_required: bool,
    #[serde(default)]
    pub native_names: bool,
}

/// A requested element: any one of `suitable` satisfies it.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct RequiredElement {
    pub suitable: Vec<RequiredType>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct AuthorizationForm {
    pub id: FormId,
    pub required_elements: Vec<RequiredElement>,
    pub privacy_policy_url: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ScopeKind {
    PersonalDetails,
    Identity,
    AddressDetails,
    Address,
    Phone,
    Email,
}

/// A requirement of the form as presented to the user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Scope {
    pub kind: ScopeKind,
    /// Details value shown on top of the documents, if requested.
    pub details: Option<ValueType>,
    /// Alternative documents, any one of which is enough.
    pub documents: Vec<ValueType>,
}

impl Scope {
    fn details(kind: ScopeKind, value_type: ValueType) -> Self {
        Self {
            kind,
            details: Some(value_type),
            documents: Vec::new(),
        }
    }

    /// The value the user is sent to when this scope is incomplete.
    pub fn representative(&self) -> Option<ValueType> {
        self.details.or_else(|| self.documents.first().copied())
    }
}

#[derive(Clone, Debug, Default)]
pub struct Form {
    pub id: FormId,
    pub values: BTreeMap<ValueType, Value>,
    /// Requested rows, each a list of alternatives.
    pub request: Vec<Vec<ValueType>>,
    pub privacy_policy_url: Option<String>,
}

impl Form {
    /// Creates one placeholder per requested type. A type listed in several
    /// rows gets the union of their requirements.
    pub fn from_authorization(form: &AuthorizationForm) -> Self {
        let mut values: BTreeMap<ValueType, Value> = BTreeMap::new();
        let mut request = Vec::new();
        for element in &form.required_elements {
            let mut row = Vec::new();
            for required in &element.suitable {
                let value = values
                    .entry(required.value_type)
                    .or_insert_with(|| Value::new(required.value_type));
                value.selfie_required |= required.selfie_required;
                value.translation_required |= required.translation_required;
                value.native_names |= required.native_names;
                if !row.contains(&required.value_type) {
                    row.push(required.value_type);
                }
            }
            if !row.is_empty() {
                request.push(row);
            }
        }
        Self {
            id: form.id,
            values,
            request,
            privacy_policy_url: form.privacy_policy_url.clone(),
        }
    }

    pub fn value(&self, value_type: ValueType) -> Option<&Value> {
        self.values.get(&value_type)
    }

    pub fn value_mut(&mut self, value_type: ValueType) -> Result<&mut Value, FormError> {
        self.values
            .get_mut(&value_type)
            .ok_or(FormError::ValueNotFound(value_type))
    }

    fn requested_alone(&self, value_type: ValueType) -> bool {
        self.request.iter().any(|row| row.as_slice() == [value_type])
    }

    /// Groups the requested rows into scopes. Identity documents attach to
    /// personal details and address documents to the address when those are
    /// requested too.
    pub fn scopes(&self) -> Vec<Scope> {
        let mut scopes: Vec<Scope> = Vec::new();
        let personal = self.requested_alone(ValueType::PersonalDetails);
        let address = self.requested_alone(ValueType::Address);
        if personal {
            scopes.push(Scope::details(ScopeKind::PersonalDetails, ValueType::PersonalDetails));
        }
        if address {
            scopes.push(Scope::details(ScopeKind::AddressDetails, ValueType::Address));
        }

        for row in &self.request {
            match row.as_slice() {
                [ValueType::PersonalDetails] | [ValueType::Address] => {}
                [ValueType::Phone] => {
                    scopes.push(Scope::details(ScopeKind::Phone, ValueType::Phone))
                }
                [ValueType::Email] => {
                    scopes.push(Scope::details(ScopeKind::Email, ValueType::Email))
                }
                documents => {
                    let identity = documents.iter().all(|t| t.is_identity_document());
                    let (kind, details_kind, attach) = if identity {
                        (ScopeKind::Identity, ScopeKind::PersonalDetails, personal)
                    } else {
                        (ScopeKind::Address, ScopeKind::AddressDetails, address)
                    };
                    let documents: Vec<ValueType> =
                        documents.iter().copied().filter(|t| t.is_document()).collect();
                    if documents.is_empty() {
                        continue;
                    }
                    let host = scopes
                        .iter_mut()
                        .find(|s| attach && s.kind == details_kind && s.documents.is_empty());
                    match host {
                        Some(scope) => scope.documents = documents,
                        None => scopes.push(Scope {
                            kind,
                            details: None,
                            documents,
                        }),
                    }
                }
            }
        }
        scopes.sort_by_key(|s| s.kind);
        scopes
    }

    /// Types to send for a complete scope, or the value to fix first.
    pub fn check_scope(&self, scope: &Scope) -> Result<Vec<ValueType>, ValueType> {
        let ready = |t: ValueType| self.value(t).is_some_and(Value::is_ready);
        let mut chosen = Vec::new();
        if let Some(details) = scope.details {
            if !ready(details) {
                return Err(details);
            }
            chosen.push(details);
        }
        if !scope.documents.is_empty() {
            match scope.documents.iter().copied().find(|t| ready(*t)) {
                Some(document) => chosen.push(document),
                None => return Err(scope.documents[0]),
            }
        }
        Ok(chosen)
    }

    /// Locates the edit file uploading under `key`.
    pub fn find_upload(&self, key: FileKey) -> Option<ScanRef> {
        self.values.values().find_map(|value| {
            value.positions().into_iter().find_map(|(role, index)| {
                let file = value.edit_file(role, index)?;
                let upload = file.upload.as_ref()?;
                (upload.key == key).then_some(ScanRef {
                    value: value.value_type,
                    role,
                    index,
                })
            })
        })
    }

    /// Every committed or edit slot showing the server file `id`.
    pub fn find_file(&self, id: u64) -> Vec<ScanRef> {
        let mut found = Vec::new();
        for value in self.values.values() {
            for (role, index) in value.positions() {
                let committed = value.file(role, index).is_some_and(|f| f.id == id);
                let in_edit = value
                    .edit_file(role, index)
                    .is_some_and(|f| f.upload.is_none() && f.fields.id == id);
                if committed || in_edit {
                    found.push(ScanRef {
                        value: value.value_type,
                        role,
                        index,
                    });
                }
            }
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn required(value_type: ValueType) -> RequiredType {
        RequiredType {
            value_type,
            selfie_required: false,
            translation_required: false,
            native_names: false,
        }
    }

    fn authorization(rows: Vec<Vec<RequiredType>>) -> AuthorizationForm {
        AuthorizationForm {
            id: 5,
            required_elements: rows
                .into_iter()
                .map(|suitable| RequiredElement { suitable })
                .collect(),
            privacy_policy_url: None,
        }
    }

    #[test]
    fn test_from_query_parses_deep_link() {
        let link = "tg://passport?bot_id=777&scope=%7B%22v%22%3A1%7D&public_key=KEY&payload=abc&callback_url=https%3A%2F%2Fbot.example%2Fdone";
        let request = FormRequest::from_query(link).unwrap();
        assert_eq!(request.bot_id, 777);
        assert_eq!(request.scope, r#"{"v":1}"#);
        assert_eq!(request.nonce, "abc");
        assert_eq!(request.callback_url.as_deref(), Some("https://bot.example/done"));
    }

    #[test]
    fn test_from_query_rejects_bad_input() {
        assert!(matches!(
            FormRequest::from_query("scope=%7B%7D"),
            Err(FormError::InvalidRequest(_))
        ));
        assert!(matches!(
            FormRequest::from_query("bot_id=1&scope=not-json"),
            Err(FormError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_flags_are_merged_across_rows() {
        let mut selfie = required(ValueType::Passport);
        selfie.selfie_required = true;
        let form = Form::from_authorization(&authorization(vec![
            vec![required(ValueType::Passport), required(ValueType::IdentityCard)],
            vec![selfie],
        ]));
        assert_eq!(form.values.len(), 2);
        assert!(form.values[&ValueType::Passport].selfie_required);
        assert!(!form.values[&ValueType::IdentityCard].selfie_required);
    }

    #[test]
    fn test_documents_attach_to_requested_details() {
        let form = Form::from_authorization(&authorization(vec![
            vec![required(ValueType::Email)],
            vec![required(ValueType::Passport), required(ValueType::DriverLicense)],
            vec![required(ValueType::PersonalDetails)],
            vec![required(ValueType::UtilityBill)],
        ]));
        let scopes = form.scopes();
        assert_eq!(scopes.len(), 3);
        assert_eq!(scopes[0].kind, ScopeKind::PersonalDetails);
        assert_eq!(
            scopes[0].documents,
            vec![ValueType::Passport, ValueType::DriverLicense]
        );
        // No address requested, so the bill stands alone.
        assert_eq!(scopes[1].kind, ScopeKind::Address);
        assert_eq!(scopes[1].details, None);
        assert_eq!(scopes[2].kind, ScopeKind::Email);
    }

    #[test]
    fn test_check_scope_picks_first_ready_document() {
        let mut form = Form::from_authorization(&authorization(vec![vec![
            required(ValueType::UtilityBill),
            required(ValueType::BankStatement),
        ]]));
        let scope = form.scopes().remove(0);
        assert_eq!(form.check_scope(&scope), Err(ValueType::UtilityBill));

        let statement = form.value_mut(ValueType::BankStatement).unwrap();
        statement.present = true;
        statement.scans.push(crate::file::File {
            id: 1,
            ..Default::default()
        });
        assert_eq!(form.check_scope(&scope), Ok(vec![ValueType::BankStatement]));
    }
}

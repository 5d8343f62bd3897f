use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

use crate::collection::Keyed;

pub const ID_FIELD: &str = "id";
pub const STATUS_FIELD: &str = "status";

/// Dedup key of a [`Record`]. Numeric ids are kept in their decimal text
/// form, so `1` and `"1"` name the same record.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum RecordError {
    #[error("record is not a JSON object")]
    NotAnObject,

    #[error("record has no `id` field")]
    MissingId,

    #[error("record `id` must be a non-empty string or a number, got {found}")]
    InvalidId { found: String },
}

/// A server record passed through untouched apart from its `id` (dedup key)
/// and optional `status` (grouping key).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Map<String, Value>", into = "Map<String, Value>")]
pub struct Record {
    id: RecordId,
    fields: Map<String, Value>,
}

impl Record {
    pub fn from_value(value: Value) -> Result<Self, RecordError> {
        match value {
            Value::Object(fields) => Self::try_from(fields),
            _ => Err(RecordError::NotAnObject),
        }
    }

    pub fn record_id(&self) -> &RecordId {
        &self.id
    }

    pub fn status(&self) -> Option<&str> {
        self.fields.get(STATUS_FIELD).and_then(Value::as_str)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Grouping key for `field`; records lacking it group under `null`.
    pub fn key_of(&self, field: &str) -> Value {
        self.fields.get(field).cloned().unwrap_or(Value::Null)
    }

}

impl TryFrom<Map<String, Value>> for Record {
    type Error = RecordError;

    fn try_from(fields: Map<String, Value>) -> Result<Self, Self::Error> {
        let id = match fields.get(ID_FIELD) {
            None | Some(Value::Null) => return Err(RecordError::MissingId),
            Some(Value::String(s)) if !s.trim().is_empty() => RecordId::new(s.clone()),
            Some(Value::Number(n)) => RecordId::new(n.to_string()),
            Some(other) => {
                return Err(RecordError::InvalidId {
                    found: other.to_string(),
                })
            }
        };

        Ok(Self { id, fields })
    }
}

impl From<Record> for Map<String, Value> {
    fn from(record: Record) -> Self {
        record.fields
    }
}

impl Keyed for Record {
    type Id = RecordId;

    fn id(&self) -> &RecordId {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn numeric_and_string_ids_are_accepted() {
        let a = Record::from_value(json!({"id": 42, "name": "Asha"})).unwrap();
        let b = Record::from_value(json!({"id": "LN-7"})).unwrap();
        assert_eq!(a.record_id().as_str(), "42");
        assert_eq!(b.record_id().as_str(), "LN-7");
    }

    #[test]
    fn numeric_and_text_forms_of_an_id_are_one_record() {
        let number = Record::from_value(json!({"id": 1, "status": "Due"})).unwrap();
        let text = Record::from_value(json!({"id": "1", "status": "Paid"})).unwrap();
        assert_eq!(number.record_id(), text.record_id());

        let merged = crate::collection::Collection::new()
            .merge(crate::collection::Page::new(vec![number, text], 20));
        assert_eq!(merged.len(), 1);
        assert_eq!(merged.items()[0].status(), Some("Due"));
    }

    #[test]
    fn missing_or_blank_id_is_rejected() {
        assert_eq!(
            Record::from_value(json!({"name": "x"})),
            Err(RecordError::MissingId)
        );
        assert!(matches!(
            Record::from_value(json!({"id": "  "})),
            Err(RecordError::InvalidId { .. })
        ));
        assert!(matches!(
            Record::from_value(json!({"id": [1]})),
            Err(RecordError::InvalidId { .. })
        ));
        assert_eq!(Record::from_value(json!(7)), Err(RecordError::NotAnObject));
    }

    #[test]
    fn unknown_fields_pass_through() {
        let raw = json!({"id": 1, "status": "Paid", "emi": 1250.5, "meta": {"branch": "KOL"}});
        let record: Record = serde_json::from_value(raw.clone()).unwrap();

        assert_eq!(record.status(), Some("Paid"));
        assert_eq!(serde_json::to_value(&record).unwrap(), raw);
    }

    #[test]
    fn key_of_missing_field_is_null() {
        let record = Record::from_value(json!({"id": 1})).unwrap();
        assert_eq!(record.key_of("status"), Value::Null);
    }
}

//! Document storage: a backend seam plus the keyed adapter the repositories use.
//!
//! A collection is a named set of JSON objects. Backends only know how to
//! store and match documents; the uniqueness guarantees and index repair
//! live in [`DocumentAdapter`].

mod adapter;
pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub use adapter::DocumentAdapter;

/// A stored JSON object.
pub type Document = Map<String, Value>;

/// Postgres truncates identifiers beyond this length.
const MAX_IDENTIFIER_LEN: usize = 63;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid store configuration: {0}")]
    Config(String),

    #[error("duplicate key rejected by index {index}")]
    Duplicate { index: String },

    #[error("{operation} on {collection} affected {affected} documents, expected at most one")]
    InvariantViolation {
        collection: String,
        operation: &'static str,
        affected: u64,
    },

    #[error("document has no key field `{0}`")]
    MissingField(String),

    #[error("document (de)serialization failed: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// One required index: a field and whether its values must be unique.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    pub field: String,
    pub unique: bool,
}

impl IndexSpec {
    pub fn new(field: impl Into<String>, unique: bool) -> Self {
        Self {
            field: field.into(),
            unique,
        }
    }

    pub fn unique(field: impl Into<String>) -> Self {
        Self::new(field, true)
    }

    /// Name the index gets inside `collection`.
    pub fn index_name(&self, collection: &str) -> String {
        format!("{}_{}_idx", collection, self.field)
    }

    /// Parses `field[:unique]` entries separated by commas,
    /// e.g. `book_id:unique,book_name`.
    pub fn parse_list(raw: &str) -> Result<Vec<IndexSpec>, StoreError> {
        let mut specs = Vec::new();
        for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let spec = match entry.split_once(':') {
                None => IndexSpec::new(entry, false),
                Some((field, "unique")) => IndexSpec::unique(field.trim()),
                Some((_, flag)) => {
                    return Err(StoreError::Config(format!(
                        "unknown index flag `{flag}` in `{entry}`"
                    )))
                }
            };
            specs.push(spec);
        }
        Ok(specs)
    }
}

lazy_static! {
    static ref IDENTIFIER_RE: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();
}

/// Collection and field names end up as SQL identifiers, so they are held
/// to a plain identifier shape.
pub(crate) fn validate_identifier(kind: &str, name: &str) -> Result<(), StoreError> {
    if !IDENTIFIER_RE.is_match(name) {
        return Err(StoreError::Config(format!("{kind} `{name}` is not a valid identifier")));
    }
    if name.len() > MAX_IDENTIFIER_LEN {
        return Err(StoreError::Config(format!(
            "{kind} `{name}` is longer than {MAX_IDENTIFIER_LEN} characters"
        )));
    }
    Ok(())
}

/// Checks a required-index set before anything touches the backend.
pub(crate) fn validate_index_specs(collection: &str, specs: &[IndexSpec]) -> Result<(), StoreError> {
    for (i, spec) in specs.iter().enumerate() {
        validate_identifier("index field", &spec.field)?;
        validate_identifier("index name", &spec.index_name(collection))?;
        if let Some(other) = specs[..i].iter().find(|s| s.field == spec.field) {
            if other.unique != spec.unique {
                return Err(StoreError::Config(format!(
                    "index on `{}` is declared both unique and non-unique",
                    spec.field
                )));
            }
        }
    }
    Ok(())
}

/// Builds the single-field filter `{field: value}`.
pub fn field_filter(field: &str, value: Value) -> Document {
    let mut filter = Document::new();
    filter.insert(field.to_string(), value);
    filter
}

/// Serializes a record into a stored document; the record must serialize
/// to a JSON object.
pub fn to_document<T: Serialize>(value: &T) -> Result<Document, StoreError> {
    match serde_json::to_value(value)? {
        Value::Object(doc) => Ok(doc),
        other => Err(StoreError::Serde(serde::ser::Error::custom(format!(
            "expected a JSON object, got {other}"
        )))),
    }
}

pub fn from_document<T: DeserializeOwned>(doc: Document) -> Result<T, StoreError> {
    Ok(serde_json::from_value(Value::Object(doc))?)
}

/// True when `doc` contains `filter` the way JSONB `@>` does: nested objects
/// match on a subset of their keys and arrays on a subset of their elements.
pub fn matches(doc: &Document, filter: &Document) -> bool {
    filter
        .iter()
        .all(|(k, v)| doc.get(k).is_some_and(|stored| contains(stored, v)))
}

fn contains(stored: &Value, wanted: &Value) -> bool {
    match (stored, wanted) {
        (Value::Object(stored), Value::Object(wanted)) => matches(stored, wanted),
        (Value::Array(stored), Value::Array(wanted)) => wanted
            .iter()
            .all(|w| stored.iter().any(|s| contains(s, w))),
        (s, w) => s == w,
    }
}

/// Key a unique index compares, the text `doc ->> field` yields in Postgres.
/// `null` yields no key and never collides.
pub(crate) fn index_key(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Result of a keyed replace as reported by the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplaceOutcome {
    pub matched: u64,
    pub modified: u64,
    pub upserted_id: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub deleted_count: u64,
}

/// Storage engine behind a [`DocumentAdapter`].
///
/// Filters select documents by containment (see [`matches`]). Unique indexes
/// compare the text form of a field (see [`index_key`]), so `1` and `"1"`
/// collide and `null` never does.
///
/// `replace_single` and `delete_single` must leave the collection untouched
/// when more than one document matches the filter, and still report the
/// number of matches so the caller can raise the violation.
#[async_trait]
pub trait DocumentBackend: Send + Sync {
    /// Creates the collection if it does not exist yet.
    async fn create_collection(&self, collection: &str) -> Result<(), StoreError>;

    async fn collection_names(&self) -> Result<Vec<String>, StoreError>;

    async fn index_names(&self, collection: &str) -> Result<Vec<String>, StoreError>;

    async fn create_index(
        &self,
        collection: &str,
        name: &str,
        spec: &IndexSpec,
    ) -> Result<(), StoreError>;

    /// Stores `doc` and returns its generated id.
    async fn insert_one(&self, collection: &str, doc: Document) -> Result<String, StoreError>;

    async fn replace_single(
        &self,
        collection: &str,
        filter: &Document,
        doc: Document,
        upsert: bool,
    ) -> Result<ReplaceOutcome, StoreError>;

    /// Matching documents in insertion order.
    async fn find(
        &self,
        collection: &str,
        filter: &Document,
        limit: Option<usize>,
    ) -> Result<Vec<Document>, StoreError>;

    async fn delete_single(&self, collection: &str, filter: &Document) -> Result<u64, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_list_reads_fields_and_flags() {
        let specs = IndexSpec::parse_list("book_id:unique, author ,").unwrap();
        assert_eq!(
            specs,
            vec![IndexSpec::unique("book_id"), IndexSpec::new("author", false)]
        );
    }

    #[test]
    fn parse_list_rejects_unknown_flag() {
        let err = IndexSpec::parse_list("book_id:sparse").unwrap_err();
        assert!(matches!(err, StoreError::Config(_)));
    }

    #[test]
    fn index_specs_must_be_identifiers() {
        let err = validate_index_specs("books", &[IndexSpec::unique("name'); drop")]).unwrap_err();
        assert!(matches!(err, StoreError::Config(_)));
        assert!(validate_index_specs("books", &[IndexSpec::unique("")]).is_err());
    }

    #[test]
    fn index_specs_reject_conflicting_uniqueness() {
        let specs = [IndexSpec::unique("isbn"), IndexSpec::new("isbn", false)];
        assert!(validate_index_specs("books", &specs).is_err());

        let repeated = [IndexSpec::unique("isbn"), IndexSpec::unique("isbn")];
        assert!(validate_index_specs("books", &repeated).is_ok());
    }

    #[test]
    fn index_name_length_is_bounded() {
        let long_collection = "c".repeat(60);
        let err = validate_index_specs(&long_collection, &[IndexSpec::unique("field")]).unwrap_err();
        assert!(err.to_string().contains("longer than"));
    }

    #[test]
    fn matches_follows_containment_into_nested_values() {
        let doc = json!({
            "book_name": "Dune",
            "tags": ["sf", "classic"],
            "meta": {"pages": 412, "lang": "en"}
        });
        let doc = doc.as_object().unwrap();

        let nested = json!({"meta": {"lang": "en"}});
        assert!(matches(doc, nested.as_object().unwrap()));
        let subset = json!({"tags": ["classic"]});
        assert!(matches(doc, subset.as_object().unwrap()));
        let missing = json!({"tags": ["fantasy"]});
        assert!(!matches(doc, missing.as_object().unwrap()));
        let wrong_type = json!({"meta": {"pages": "412"}});
        assert!(!matches(doc, wrong_type.as_object().unwrap()));
    }

    #[test]
    fn index_key_uses_text_form() {
        assert_eq!(index_key(&json!(1)), index_key(&json!("1")));
        assert_eq!(index_key(&json!(true)), Some("true".into()));
        assert_eq!(index_key(&Value::Null), None);
    }

    #[test]
    fn matches_is_a_superset_check() {
        let doc = json!({"issue": "test_issue_1", "test_key_1": "v", "n": 3});
        let doc = doc.as_object().unwrap();
        let partial = json!({"issue": "test_issue_1", "n": 3});
        assert!(matches(doc, partial.as_object().unwrap()));
        let other = json!({"issue": "test_issue_1", "n": 4});
        assert!(!matches(doc, other.as_object().unwrap()));
        assert!(matches(doc, &Document::new()));
    }
}

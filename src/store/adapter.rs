use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error, info};

use super::{
    field_filter, validate_identifier, validate_index_specs, DeleteOutcome, Document,
    DocumentBackend, IndexSpec, ReplaceOutcome, StoreError,
};

/// Keyed access to one collection.
///
/// Writes and deletes addressed by a field are expected to hit at most one
/// document; anything else is reported as [`StoreError::InvariantViolation`].
#[derive(Clone)]
pub struct DocumentAdapter {
    backend: Arc<dyn DocumentBackend>,
    collection: String,
}

impl DocumentAdapter {
    /// Opens `collection`, creating it if needed, and repairs the required
    /// indexes when `recreate_indexes` is set.
    pub async fn open(
        backend: Arc<dyn DocumentBackend>,
        collection: &str,
        required: &[IndexSpec],
        recreate_indexes: bool,
    ) -> Result<Self, StoreError> {
        validate_identifier("collection", collection)?;
        validate_index_specs(collection, required)?;

        backend.create_collection(collection).await?;
        let adapter = Self {
            backend,
            collection: collection.to_string(),
        };
        if recreate_indexes {
            adapter.ensure_indexes(required).await?;
        }
        Ok(adapter)
    }

    /// Creates every required index that is missing and returns the names of
    /// the ones it created. Existing indexes are never dropped or altered.
    pub async fn ensure_indexes(&self, required: &[IndexSpec]) -> Result<Vec<String>, StoreError> {
        validate_index_specs(&self.collection, required)?;

        let existing = self.backend.index_names(&self.collection).await?;
        let mut created = Vec::new();
        for spec in required {
            let name = spec.index_name(&self.collection);
            if existing.contains(&name) || created.contains(&name) {
                continue;
            }
            self.backend.create_index(&self.collection, &name, spec).await?;
            info!(collection = %self.collection, index = %name, unique = spec.unique, "index created");
            created.push(name);
        }
        Ok(created)
    }

    pub async fn insert(&self, doc: Document) -> Result<String, StoreError> {
        let id = self.backend.insert_one(&self.collection, doc).await?;
        debug!(collection = %self.collection, %id, "document inserted");
        Ok(id)
    }

    /// Replaces the document whose `field` equals `doc[field]`, inserting
    /// `doc` when there is none.
    pub async fn upsert_by_field(
        &self,
        field: &str,
        doc: Document,
    ) -> Result<ReplaceOutcome, StoreError> {
        let key = doc
            .get(field)
            .cloned()
            .ok_or_else(|| StoreError::MissingField(field.to_string()))?;
        let filter = field_filter(field, key);

        let outcome = self
            .backend
            .replace_single(&self.collection, &filter, doc, true)
            .await?;
        let affected = outcome.matched.max(outcome.modified) + u64::from(outcome.upserted_id.is_some());
        self.check_single("upsert", affected)?;

        debug!(
            collection = %self.collection,
            field,
            matched = outcome.matched,
            upserted_id = ?outcome.upserted_id,
            "document upserted"
        );
        Ok(outcome)
    }

    pub async fn get_by_field(&self, field: &str, value: Value) -> Result<Option<Document>, StoreError> {
        self.find_matching(&field_filter(field, value)).await
    }

    /// First document containing every entry of `partial`.
    pub async fn find_matching(&self, partial: &Document) -> Result<Option<Document>, StoreError> {
        let mut found = self.backend.find(&self.collection, partial, Some(1)).await?;
        Ok(found.pop())
    }

    /// All documents in insertion order, at most `limit` of them.
    pub async fn list(&self, limit: Option<usize>) -> Result<Vec<Document>, StoreError> {
        self.backend.find(&self.collection, &Document::new(), limit).await
    }

    pub async fn delete_by_field(&self, field: &str, value: Value) -> Result<DeleteOutcome, StoreError> {
        let filter = field_filter(field, value);
        let deleted_count = self.backend.delete_single(&self.collection, &filter).await?;
        self.check_single("delete", deleted_count)?;
        Ok(DeleteOutcome { deleted_count })
    }

    pub async fn list_collection_names(&self) -> Result<Vec<String>, StoreError> {
        self.backend.collection_names().await
    }

    fn check_single(&self, operation: &'static str, affected: u64) -> Result<(), StoreError> {
        if affected > 1 {
            error!(collection = %self.collection, operation, affected, "keyed write matched more than one document");
            return Err(StoreError::InvariantViolation {
                collection: self.collection.clone(),
                operation,
                affected,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryBackend;
    use serde_json::json;

    fn doc(v: Value) -> Document {
        v.as_object().cloned().unwrap()
    }

    async fn open(backend: &Arc<MemoryBackend>, indexes: &[IndexSpec]) -> DocumentAdapter {
        DocumentAdapter::open(backend.clone(), "book_shelf", indexes, true)
            .await
            .expect("open adapter")
    }

    #[tokio::test]
    async fn ensure_indexes_is_idempotent() {
        let backend = Arc::new(MemoryBackend::new());
        let required = [IndexSpec::unique("book_id"), IndexSpec::unique("book_name")];
        let adapter = open(&backend, &required).await;
        assert_eq!(backend.created_indexes().await.len(), 2);

        let created = adapter.ensure_indexes(&required).await.unwrap();
        assert!(created.is_empty());
        assert_eq!(backend.created_indexes().await.len(), 2);
    }

    #[tokio::test]
    async fn ensure_indexes_only_adds_missing() {
        let backend = Arc::new(MemoryBackend::new());
        let adapter = open(&backend, &[IndexSpec::unique("book_id")]).await;

        let created = adapter
            .ensure_indexes(&[IndexSpec::unique("book_id"), IndexSpec::new("author", false)])
            .await
            .unwrap();
        assert_eq!(created, vec!["book_shelf_author_idx".to_string()]);
    }

    #[tokio::test]
    async fn open_rejects_malformed_index_spec() {
        let backend = Arc::new(MemoryBackend::new());
        let err = DocumentAdapter::open(backend.clone(), "book_shelf", &[IndexSpec::unique("a-b")], true)
            .await
            .err()
            .expect("malformed spec");
        assert!(matches!(err, StoreError::Config(_)));
        assert!(backend.created_indexes().await.is_empty());
    }

    #[tokio::test]
    async fn skipped_index_repair_creates_nothing() {
        let backend = Arc::new(MemoryBackend::new());
        DocumentAdapter::open(backend.clone(), "users", &[IndexSpec::unique("username")], false)
            .await
            .unwrap();
        assert!(backend.created_indexes().await.is_empty());
    }

    #[tokio::test]
    async fn insert_then_find_first_match() {
        let backend = Arc::new(MemoryBackend::new());
        let adapter = open(&backend, &[]).await;
        let data = doc(json!({"test_key_1": "test_value_1", "issue": "test_issue_1"}));

        let id = adapter.insert(data.clone()).await.unwrap();
        assert!(!id.is_empty());
        assert_eq!(adapter.find_matching(&data).await.unwrap(), Some(data));
    }

    #[tokio::test]
    async fn insert_duplicate_is_rejected_by_unique_index() {
        let backend = Arc::new(MemoryBackend::new());
        let adapter = open(&backend, &[IndexSpec::unique("book_id")]).await;
        adapter.insert(doc(json!({"book_id": "a"}))).await.unwrap();

        let err = adapter.insert(doc(json!({"book_id": "a"}))).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate { .. }));
    }

    #[tokio::test]
    async fn upsert_inserts_new_key_once() {
        let backend = Arc::new(MemoryBackend::new());
        let adapter = open(&backend, &[IndexSpec::unique("issue")]).await;

        let outcome = adapter
            .upsert_by_field("issue", doc(json!({"issue": "test_issue_3", "k": 1})))
            .await
            .unwrap();
        assert_eq!(outcome.matched, 0);
        assert!(outcome.upserted_id.is_some());
        assert_eq!(adapter.list(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn upsert_replaces_only_the_keyed_document() {
        let backend = Arc::new(MemoryBackend::new());
        let adapter = open(&backend, &[IndexSpec::unique("issue")]).await;
        adapter.insert(doc(json!({"issue": "one", "v": 1}))).await.unwrap();
        adapter.insert(doc(json!({"issue": "two", "v": 2}))).await.unwrap();

        let outcome = adapter
            .upsert_by_field("issue", doc(json!({"issue": "one", "v": 10})))
            .await
            .unwrap();
        assert_eq!(outcome.matched, 1);
        assert_eq!(outcome.modified, 1);
        assert_eq!(outcome.upserted_id, None);

        let one = adapter.get_by_field("issue", json!("one")).await.unwrap().unwrap();
        assert_eq!(one.get("v"), Some(&json!(10)));
        let two = adapter.get_by_field("issue", json!("two")).await.unwrap().unwrap();
        assert_eq!(two.get("v"), Some(&json!(2)));
        assert_eq!(adapter.list(None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn upsert_without_key_field_fails() {
        let backend = Arc::new(MemoryBackend::new());
        let adapter = open(&backend, &[]).await;
        let err = adapter
            .upsert_by_field("issue", doc(json!({"other": 1})))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::MissingField(f) if f == "issue"));
    }

    #[tokio::test]
    async fn upsert_on_non_selective_key_is_an_invariant_violation() {
        let backend = Arc::new(MemoryBackend::new());
        let adapter = open(&backend, &[]).await;
        adapter.insert(doc(json!({"issue": "dup", "v": 1}))).await.unwrap();
        adapter.insert(doc(json!({"issue": "dup", "v": 2}))).await.unwrap();

        let err = adapter
            .upsert_by_field("issue", doc(json!({"issue": "dup", "v": 3})))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvariantViolation { affected: 2, .. }));

        // nothing was overwritten
        let left = adapter.list(None).await.unwrap();
        assert!(left.iter().all(|d| d.get("v") != Some(&json!(3))));
    }

    #[tokio::test]
    async fn delete_removes_at_most_one() {
        let backend = Arc::new(MemoryBackend::new());
        let adapter = open(&backend, &[]).await;
        adapter.insert(doc(json!({"issue": "a"}))).await.unwrap();

        let outcome = adapter.delete_by_field("issue", json!("a")).await.unwrap();
        assert_eq!(outcome.deleted_count, 1);
        let again = adapter.delete_by_field("issue", json!("a")).await.unwrap();
        assert_eq!(again.deleted_count, 0);
    }

    #[tokio::test]
    async fn delete_on_non_selective_key_keeps_documents() {
        let backend = Arc::new(MemoryBackend::new());
        let adapter = open(&backend, &[]).await;
        adapter.insert(doc(json!({"issue": "dup"}))).await.unwrap();
        adapter.insert(doc(json!({"issue": "dup"}))).await.unwrap();

        let err = adapter.delete_by_field("issue", json!("dup")).await.unwrap_err();
        assert!(matches!(err, StoreError::InvariantViolation { operation: "delete", .. }));
        assert_eq!(adapter.list(None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn lists_collection_names() {
        let backend = Arc::new(MemoryBackend::new());
        let books = open(&backend, &[]).await;
        DocumentAdapter::open(backend.clone(), "users", &[], true).await.unwrap();

        let names = books.list_collection_names().await.unwrap();
        assert!(names.contains(&"book_shelf".to_string()));
        assert!(names.contains(&"users".to_string()));
        assert!(!names.contains(&"some_fake_collection_name".to_string()));
    }
}

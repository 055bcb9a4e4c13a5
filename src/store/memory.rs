use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{index_key, matches, Document, DocumentBackend, IndexSpec, ReplaceOutcome, StoreError};

#[derive(Debug, Clone)]
struct MemoryIndex {
    name: String,
    spec: IndexSpec,
}

#[derive(Debug, Default)]
struct MemoryCollection {
    docs: Vec<(String, Document)>,
    indexes: Vec<MemoryIndex>,
}

impl MemoryCollection {
    /// Unique index `doc` would violate, ignoring the document stored under `skip_id`.
    fn violated_index(&self, doc: &Document, skip_id: Option<&str>) -> Option<&str> {
        self.indexes
            .iter()
            .filter(|idx| idx.spec.unique)
            .find(|idx| {
                let Some(key) = doc.get(&idx.spec.field).and_then(index_key) else {
                    return false;
                };
                self.docs
                    .iter()
                    .filter(|(id, _)| Some(id.as_str()) != skip_id)
                    .any(|(_, other)| {
                        other.get(&idx.spec.field).and_then(index_key).as_ref() == Some(&key)
                    })
            })
            .map(|idx| idx.name.as_str())
    }

    fn matching_ids(&self, filter: &Document) -> Vec<String> {
        self.docs
            .iter()
            .filter(|(_, doc)| matches(doc, filter))
            .map(|(id, _)| id.clone())
            .collect()
    }

    fn push(&mut self, doc: Document) -> Result<String, StoreError> {
        if let Some(index) = self.violated_index(&doc, None) {
            return Err(StoreError::Duplicate { index: index.to_string() });
        }
        let id = Uuid::new_v4().to_string();
        self.docs.push((id.clone(), doc));
        Ok(id)
    }
}

/// Process-local store used by tests and by `STORE_BACKEND=memory`.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    collections: RwLock<BTreeMap<String, MemoryCollection>>,
    created_indexes: RwLock<Vec<String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of every index created so far, in creation order.
    pub async fn created_indexes(&self) -> Vec<String> {
        self.created_indexes.read().await.clone()
    }
}

#[async_trait]
impl DocumentBackend for MemoryBackend {
    async fn create_collection(&self, collection: &str) -> Result<(), StoreError> {
        self.collections
            .write()
            .await
            .entry(collection.to_string())
            .or_default();
        Ok(())
    }

    async fn collection_names(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.collections.read().await.keys().cloned().collect())
    }

    async fn index_names(&self, collection: &str) -> Result<Vec<String>, StoreError> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .map(|c| c.indexes.iter().map(|i| i.name.clone()).collect())
            .unwrap_or_default())
    }

    async fn create_index(
        &self,
        collection: &str,
        name: &str,
        spec: &IndexSpec,
    ) -> Result<(), StoreError> {
        let mut collections = self.collections.write().await;
        let coll = collections.entry(collection.to_string()).or_default();
        if coll.indexes.iter().any(|i| i.name == name) {
            return Ok(());
        }

        let index = MemoryIndex {
            name: name.to_string(),
            spec: spec.clone(),
        };
        if spec.unique {
            let mut seen = HashSet::new();
            for (_, doc) in &coll.docs {
                if let Some(key) = doc.get(&spec.field).and_then(index_key) {
                    if !seen.insert(key) {
                        return Err(StoreError::Duplicate { index: index.name });
                    }
                }
            }
        }
        coll.indexes.push(index);
        self.created_indexes.write().await.push(name.to_string());
        Ok(())
    }

    async fn insert_one(&self, collection: &str, doc: Document) -> Result<String, StoreError> {
        let mut collections = self.collections.write().await;
        collections.entry(collection.to_string()).or_default().push(doc)
    }

    async fn replace_single(
        &self,
        collection: &str,
        filter: &Document,
        doc: Document,
        upsert: bool,
    ) -> Result<ReplaceOutcome, StoreError> {
        let mut collections = self.collections.write().await;
        let coll = collections.entry(collection.to_string()).or_default();

        let ids = coll.matching_ids(filter);
        match ids.as_slice() {
            [] if upsert => {
                let id = coll.push(doc)?;
                Ok(ReplaceOutcome {
                    upserted_id: Some(id),
                    ..ReplaceOutcome::default()
                })
            }
            [] => Ok(ReplaceOutcome::default()),
            [id] => {
                if let Some(index) = coll.violated_index(&doc, Some(id.as_str())) {
                    return Err(StoreError::Duplicate { index: index.to_string() });
                }
                let slot = coll
                    .docs
                    .iter_mut()
                    .find(|(stored_id, _)| stored_id == id)
                    .map(|(_, stored)| stored);
                let mut modified = 0;
                if let Some(stored) = slot {
                    if *stored != doc {
                        *stored = doc;
                        modified = 1;
                    }
                }
                Ok(ReplaceOutcome {
                    matched: 1,
                    modified,
                    upserted_id: None,
                })
            }
            many => Ok(ReplaceOutcome {
                matched: many.len() as u64,
                ..ReplaceOutcome::default()
            }),
        }
    }

    async fn find(
        &self,
        collection: &str,
        filter: &Document,
        limit: Option<usize>,
    ) -> Result<Vec<Document>, StoreError> {
        let collections = self.collections.read().await;
        let Some(coll) = collections.get(collection) else {
            return Ok(Vec::new());
        };
        Ok(coll
            .docs
            .iter()
            .filter(|(_, doc)| matches(doc, filter))
            .take(limit.unwrap_or(usize::MAX))
            .map(|(_, doc)| doc.clone())
            .collect())
    }

    async fn delete_single(&self, collection: &str, filter: &Document) -> Result<u64, StoreError> {
        let mut collections = self.collections.write().await;
        let Some(coll) = collections.get_mut(collection) else {
            return Ok(0);
        };
        let ids = coll.matching_ids(filter);
        if let [id] = ids.as_slice() {
            coll.docs.retain(|(stored_id, _)| stored_id != id);
        }
        Ok(ids.len() as u64)
    }
}

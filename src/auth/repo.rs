use serde_json::Value;

use crate::auth::repo_types::User;
use crate::store::{from_document, to_document, DocumentAdapter, StoreError};

/// Users keyed by `username`.
#[derive(Clone)]
pub struct UserRepo {
    store: DocumentAdapter,
}

impl UserRepo {
    pub fn new(store: DocumentAdapter) -> Self {
        Self { store }
    }

    /// Find a user by username.
    pub async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        self.store
            .get_by_field("username", Value::from(username))
            .await?
            .map(from_document)
            .transpose()
    }

    /// Insert a new user; a taken username is rejected by the unique index.
    pub async fn create(&self, user: &User) -> Result<String, StoreError> {
        self.store.insert(to_document(user)?).await
    }
}

use serde_json::Value;
use uuid::Uuid;

use super::dto::{Book, BookReplacement, IncomingBook};
use crate::store::{from_document, to_document, DocumentAdapter, ReplaceOutcome, StoreError};

/// Books keyed by `book_id`; names are unique too.
#[derive(Clone)]
pub struct BookRepo {
    store: DocumentAdapter,
}

impl BookRepo {
    pub fn new(store: DocumentAdapter) -> Self {
        Self { store }
    }

    /// Stores a new, available book under a freshly generated id.
    pub async fn add(&self, incoming: IncomingBook) -> Result<Book, StoreError> {
        let book = Book {
            book_id: Uuid::new_v4().simple().to_string(),
            book_name: incoming.book_name,
            author: incoming.author.filter(|a| !a.is_empty()),
            description: incoming.description.filter(|d| !d.is_empty()),
            available: true,
        };
        self.insert(&book).await?;
        Ok(book)
    }

    pub async fn insert(&self, book: &Book) -> Result<String, StoreError> {
        self.store.insert(to_document(book)?).await
    }

    pub async fn get(&self, book_id: &str) -> Result<Option<Book>, StoreError> {
        self.store
            .get_by_field("book_id", Value::from(book_id))
            .await?
            .map(from_document)
            .transpose()
    }

    pub async fn find_by_name(&self, book_name: &str) -> Result<Option<Book>, StoreError> {
        self.store
            .get_by_field("book_name", Value::from(book_name))
            .await?
            .map(from_document)
            .transpose()
    }

    pub async fn list(&self, limit: usize) -> Result<Vec<Book>, StoreError> {
        self.store
            .list(Some(limit))
            .await?
            .into_iter()
            .map(from_document)
            .collect()
    }

    /// Creates or replaces the book stored under `book_id`.
    pub async fn replace(
        &self,
        book_id: &str,
        data: BookReplacement,
    ) -> Result<(Book, ReplaceOutcome), StoreError> {
        let book = Book {
            book_id: book_id.to_string(),
            book_name: data.book_name,
            author: data.author,
            description: data.description,
            available: data.available,
        };
        let outcome = self.store.upsert_by_field("book_id", to_document(&book)?).await?;
        Ok((book, outcome))
    }

    /// Removes the book with this name; returns false when there was none.
    pub async fn delete_by_name(&self, book_name: &str) -> Result<bool, StoreError> {
        let outcome = self
            .store
            .delete_by_field("book_name", Value::from(book_name))
            .await?;
        Ok(outcome.deleted_count == 1)
    }
}

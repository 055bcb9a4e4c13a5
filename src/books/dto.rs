use serde::{Deserialize, Serialize};

/// Book data as submitted by clients.
#[derive(Debug, Clone, Deserialize)]
pub struct IncomingBook {
    pub book_name: String,
    pub author: Option<String>,
    pub description: Option<String>,
}

/// Body of `PUT /books/:book_id`.
#[derive(Debug, Clone, Deserialize)]
pub struct BookReplacement {
    pub book_name: String,
    pub author: Option<String>,
    pub description: Option<String>,
    #[serde(default = "default_available")]
    pub available: bool,
}
fn default_available() -> bool {
    true
}

/// Book record as stored in the book collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Book {
    pub book_id: String,
    pub book_name: String,
    pub author: Option<String>,
    pub description: Option<String>,
    pub available: bool,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}
fn default_limit() -> usize {
    10
}

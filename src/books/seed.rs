use tracing::info;

use super::{dto::Book, repo::BookRepo};
use crate::store::StoreError;

fn book(id: &str, name: &str, author: &str, description: &str) -> Book {
    Book {
        book_id: id.into(),
        book_name: name.into(),
        author: Some(author.into()),
        description: Some(description.into()),
        available: true,
    }
}

/// The demo shelf the service ships with.
pub fn demo_books() -> Vec<Book> {
    vec![
        book(
            "936d4b41ec874007af150bbac8e714c3",
            "Shantaram",
            "Gregory David Roberts",
            "Shantaram is a journey through the life of a convict on the lamb, a slum dweller, a prisoner in a crowded Indian jail",
        ),
        book(
            "f9b028134ef74bc3a70e1b5e68d69a72",
            "Harry Potter and the Chamber of Secrets",
            "Joan K. Rowling",
            "The second book about Harry Potter adventures",
        ),
        book(
            "414a1cf5764840c588afab3d17fb97df",
            "The adventures of Sherlock Holmes",
            "Sir Arthur Conan Doyle",
            "The Adventures of Sherlock Holmes is a collection of twelve short stories",
        ),
    ]
}

/// Inserts each demo book whose id and name are both free. Returns how many were added.
pub async fn seed_demo_books(books: &BookRepo) -> Result<usize, StoreError> {
    let mut added = 0;
    for b in demo_books() {
        if books.get(&b.book_id).await?.is_some() || books.find_by_name(&b.book_name).await?.is_some() {
            continue;
        }
        books.insert(&b).await?;
        added += 1;
    }
    info!(added, "demo books seeded");
    Ok(added)
}

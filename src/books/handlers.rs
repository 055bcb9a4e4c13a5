use axum::{
    extract::State,
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use tracing::{info, instrument, warn};

use super::dto::{Book, BookReplacement, IncomingBook, ListQuery};
use crate::{
    auth::extractors::CurrentUser,
    dto::Message,
    error::{AppError, AppResult},
    extract::{JsonBody, PathParam, QueryParams},
    state::AppState,
};

pub fn read_routes() -> Router<AppState> {
    Router::new()
        .route("/books", get(show_books))
        .route("/books/:book_id", get(read_book).put(replace_book))
}

pub fn write_routes() -> Router<AppState> {
    Router::new()
        .route("/books/add_book", post(add_book))
        .route("/books/delete/:book_name", delete(delete_book))
}

#[instrument(skip(state, _user))]
pub async fn show_books(
    State(state): State<AppState>,
    _user: CurrentUser,
    QueryParams(q): QueryParams<ListQuery>,
) -> AppResult<Json<Vec<Book>>> {
    Ok(Json(state.books.list(q.limit).await?))
}

#[instrument(skip(state, _user))]
pub async fn read_book(
    State(state): State<AppState>,
    _user: CurrentUser,
    PathParam(book_id): PathParam<String>,
) -> AppResult<Json<Book>> {
    state.books.get(&book_id).await?.map(Json).ok_or_else(|| {
        AppError::NotFound(format!(
            "The book with ID {book_id} was not found in the book shelf!"
        ))
    })
}

#[instrument(skip(state, user, incoming), fields(book_name = %incoming.book_name))]
pub async fn add_book(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    JsonBody(incoming): JsonBody<IncomingBook>,
) -> AppResult<(StatusCode, Json<Message>)> {
    if incoming.book_name.trim().is_empty() {
        return Err(AppError::BadRequest("book_name must not be empty".into()));
    }
    if state.books.find_by_name(&incoming.book_name).await?.is_some() {
        warn!("book already on the shelf");
        return Err(AppError::Conflict(
            "The aforementioned book already exists in the book shelf!".into(),
        ));
    }

    let book = state.books.add(incoming).await?;
    info!(book_id = %book.book_id, added_by = %user.username, "book added");
    Ok((
        StatusCode::CREATED,
        Json(Message::new(format!(
            "Book {} was successfully added to the book shelf! Book ID assigned: {}",
            book.book_name, book.book_id
        ))),
    ))
}

#[instrument(skip(state, _user, data))]
pub async fn replace_book(
    State(state): State<AppState>,
    _user: CurrentUser,
    PathParam(book_id): PathParam<String>,
    JsonBody(data): JsonBody<BookReplacement>,
) -> AppResult<(StatusCode, Json<Book>)> {
    if data.book_name.trim().is_empty() {
        return Err(AppError::BadRequest("book_name must not be empty".into()));
    }
    let (book, outcome) = state.books.replace(&book_id, data).await?;
    let status = if outcome.upserted_id.is_some() {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    info!(%book_id, created = outcome.upserted_id.is_some(), "book stored");
    Ok((status, Json(book)))
}

#[instrument(skip(state, _user))]
pub async fn delete_book(
    State(state): State<AppState>,
    _user: CurrentUser,
    PathParam(book_name): PathParam<String>,
) -> AppResult<Json<Message>> {
    if !state.books.delete_by_name(&book_name).await? {
        return Err(AppError::NotFound(format!(
            "The book {book_name} was not found in the book shelf!"
        )));
    }
    info!(%book_name, "book deleted");
    Ok(Json(Message::new(format!(
        "Book {book_name} was successfully deleted from the book shelf!"
    ))))
}

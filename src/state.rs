use std::sync::Arc;

use tracing::info;

use crate::auth::repo::UserRepo;
use crate::books::{repo::BookRepo, seed::seed_demo_books};
use crate::config::{AppConfig, StoreBackendKind};
use crate::store::{memory::MemoryBackend, postgres::PgBackend, DocumentAdapter, DocumentBackend};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub users: UserRepo,
    pub books: BookRepo,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        Self::from_config(AppConfig::from_env()?).await
    }

    pub async fn from_config(config: AppConfig) -> anyhow::Result<Self> {
        let backend: Arc<dyn DocumentBackend> = match config.store.backend {
            StoreBackendKind::Postgres => Arc::new(PgBackend::connect(&config.store).await?),
            StoreBackendKind::Memory => Arc::new(MemoryBackend::new()),
        };
        Self::with_backend(config, backend).await
    }

    /// Opens both collections on `backend`, creating their indexes as configured.
    pub async fn with_backend(
        config: AppConfig,
        backend: Arc<dyn DocumentBackend>,
    ) -> anyhow::Result<Self> {
        let store = &config.store;
        let users = DocumentAdapter::open(
            backend.clone(),
            &store.user_collection,
            &store.user_indexes,
            store.recreate_indexes,
        )
        .await?;
        let books = DocumentAdapter::open(
            backend,
            &store.book_collection,
            &store.book_indexes,
            store.recreate_indexes,
        )
        .await?;

        let collections = books.list_collection_names().await?;
        info!(?collections, backend = ?store.backend, "document store ready");

        let books = BookRepo::new(books);
        if config.seed_demo_books {
            seed_demo_books(&books).await?;
        }

        Ok(Self {
            config: Arc::new(config),
            users: UserRepo::new(users),
            books,
        })
    }

    #[cfg(test)]
    pub async fn fake() -> Self {
        let config = AppConfig {
            host: "127.0.0.1".into(),
            port: 0,
            jwt: crate::config::JwtConfig {
                secret: "test".into(),
                ttl_minutes: 30,
            },
            store: crate::config::StoreConfig::in_memory(),
            seed_demo_books: false,
        };
        Self::with_backend(config, Arc::new(MemoryBackend::new()))
            .await
            .expect("in-memory state")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn seeding_fills_the_shelf_once() {
        let backend: Arc<dyn DocumentBackend> = Arc::new(MemoryBackend::new());
        let mut config = AppState::fake().await.config.as_ref().clone();
        config.seed_demo_books = true;

        let state = AppState::with_backend(config.clone(), backend.clone()).await.unwrap();
        assert_eq!(state.books.list(10).await.unwrap().len(), 3);

        let state = AppState::with_backend(config, backend).await.unwrap();
        assert_eq!(state.books.list(10).await.unwrap().len(), 3);
    }
}

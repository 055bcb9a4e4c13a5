use std::str::FromStr;

use anyhow::Context;

use crate::store::IndexSpec;

/// Longest accepted access token lifetime: one year.
pub const MAX_TOKEN_TTL_MINUTES: i64 = 60 * 24 * 365;

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: String,
    pub ttl_minutes: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackendKind {
    Postgres,
    Memory,
}

impl FromStr for StoreBackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "memory" | "in-memory" => Ok(Self::Memory),
            other => anyhow::bail!("unknown STORE_BACKEND `{other}`"),
        }
    }
}

/// Accepted for parity with other document stores. Postgres negotiates the
/// mechanism during the handshake, so only the value is validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMechanism {
    Default,
    ScramSha256,
}

impl FromStr for AuthMechanism {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DEFAULT" => Ok(Self::Default),
            "SCRAM-SHA-256" => Ok(Self::ScramSha256),
            other => anyhow::bail!("unsupported STORE_AUTH_MECHANISM `{other}`"),
        }
    }
}

#[derive(Clone)]
pub struct StoreCredentials {
    pub username: String,
    pub password: String,
    pub auth_source: String,
    pub auth_mechanism: AuthMechanism,
}

// keeps the password out of logs
impl std::fmt::Debug for StoreCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreCredentials")
            .field("username", &self.username)
            .field("auth_source", &self.auth_source)
            .field("auth_mechanism", &self.auth_mechanism)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub backend: StoreBackendKind,
    pub host: String,
    pub port: u16,
    pub db_name: String,
    pub credentials: Option<StoreCredentials>,
    pub user_collection: String,
    pub book_collection: String,
    pub user_indexes: Vec<IndexSpec>,
    pub book_indexes: Vec<IndexSpec>,
    pub recreate_indexes: bool,
}

impl StoreConfig {
    pub fn default_user_indexes() -> Vec<IndexSpec> {
        vec![IndexSpec::unique("username")]
    }

    pub fn default_book_indexes() -> Vec<IndexSpec> {
        vec![IndexSpec::unique("book_id"), IndexSpec::unique("book_name")]
    }

    /// In-memory store with the default collections and indexes.
    pub fn in_memory() -> Self {
        Self {
            backend: StoreBackendKind::Memory,
            host: "localhost".into(),
            port: 5432,
            db_name: "bookshelf".into(),
            credentials: None,
            user_collection: "users".into(),
            book_collection: "book_shelf".into(),
            user_indexes: Self::default_user_indexes(),
            book_indexes: Self::default_book_indexes(),
            recreate_indexes: true,
        }
    }

    fn from_env() -> anyhow::Result<Self> {
        let backend = env_or("STORE_BACKEND", "postgres").parse()?;
        let db_name = env_or("STORE_DB_NAME", "bookshelf");
        let credentials = credentials_from_env(&db_name)?;

        let user_indexes = match std::env::var("STORE_USER_INDEXES") {
            Ok(raw) => IndexSpec::parse_list(&raw).context("STORE_USER_INDEXES")?,
            Err(_) => Self::default_user_indexes(),
        };
        let book_indexes = match std::env::var("STORE_BOOK_INDEXES") {
            Ok(raw) => IndexSpec::parse_list(&raw).context("STORE_BOOK_INDEXES")?,
            Err(_) => Self::default_book_indexes(),
        };

        Ok(Self {
            backend,
            host: env_or("STORE_HOST", "localhost"),
            port: env_or("STORE_PORT", "5432")
                .parse()
                .context("STORE_PORT must be a port number")?,
            db_name,
            credentials,
            user_collection: env_or("STORE_USER_COLLECTION", "users"),
            book_collection: env_or("STORE_BOOK_COLLECTION", "book_shelf"),
            user_indexes,
            book_indexes,
            recreate_indexes: env_flag("STORE_RECREATE_INDEXES", true),
        })
    }
}

fn credentials_from_env(db_name: &str) -> anyhow::Result<Option<StoreCredentials>> {
    let username = std::env::var("STORE_USERNAME").ok();
    let password = std::env::var("STORE_PASSWORD").ok();
    let (username, password) = match (username, password) {
        (Some(u), Some(p)) => (u, p),
        (None, None) => return Ok(None),
        _ => anyhow::bail!("STORE_USERNAME and STORE_PASSWORD must be set together"),
    };

    let auth_source = env_or("STORE_AUTH_SOURCE", db_name);
    // Postgres authenticates against the database it connects to.
    if auth_source != db_name {
        anyhow::bail!("STORE_AUTH_SOURCE `{auth_source}` must match STORE_DB_NAME `{db_name}`");
    }
    let auth_mechanism = env_or("STORE_AUTH_MECHANISM", "DEFAULT").parse()?;

    Ok(Some(StoreCredentials {
        username,
        password,
        auth_source,
        auth_mechanism,
    }))
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub jwt: JwtConfig,
    pub store: StoreConfig,
    pub seed_demo_books: bool,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET").context("JWT_SECRET is required")?,
            ttl_minutes: parse_ttl_minutes(&env_or("ACCESS_TOKEN_EXPIRE_MINUTES", "180"))?,
        };
        Ok(Self {
            host: env_or("APP_HOST", "0.0.0.0"),
            port: env_or("APP_PORT", "8080")
                .parse()
                .context("APP_PORT must be a port number")?,
            jwt,
            store: StoreConfig::from_env()?,
            seed_demo_books: env_flag("SEED_DEMO_BOOKS", false),
        })
    }
}

fn parse_ttl_minutes(raw: &str) -> anyhow::Result<i64> {
    let minutes: i64 = raw
        .trim()
        .parse()
        .context("ACCESS_TOKEN_EXPIRE_MINUTES must be a whole number of minutes")?;
    if !(1..=MAX_TOKEN_TTL_MINUTES).contains(&minutes) {
        anyhow::bail!(
            "ACCESS_TOKEN_EXPIRE_MINUTES must be between 1 and {MAX_TOKEN_TTL_MINUTES}, got {minutes}"
        );
    }
    Ok(minutes)
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

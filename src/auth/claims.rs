use serde::{Deserialize, Serialize};

/// JWT payload. Timestamps are unix seconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    pub sub: String, // username
    pub iat: i64,
    pub exp: i64,
}

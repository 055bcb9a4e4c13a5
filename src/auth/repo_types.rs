use serde::{Deserialize, Serialize};

/// Credential record as stored in the user collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    pub hashed_password: String, // argon2 PHC string
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

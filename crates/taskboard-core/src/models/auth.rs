use serde::{Deserialize, Serialize};

/// Body for `POST /login` and `POST /signup`.
#[derive(Debug, Clone, Serialize)]
pub struct AuthRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

/// Token pair returned by login (and by signup on servers that log the new
/// account in directly).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<i64>,
}

/// An account as returned by signup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub email: String,
}

/// Signup answers either with tokens or with the created account.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SignupResponse {
    Tokens(TokenPair),
    Account(User),
}

/// `GET /protected/me`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Me {
    pub user_id: i64,
}

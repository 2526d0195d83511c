use serde::{Deserialize, Serialize};

/// Body of the login call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    /// Account name.
    pub user_name: String,
    /// Account password.
    pub password: String,
}

/// Access and refresh tokens returned by login and refresh.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TokenPair {
    /// Bearer token sent on every authenticated call.
    #[serde(rename = "Token", alias = "token")]
    pub token: String,
    /// Token used to obtain a new pair once the bearer token is rejected.
    #[serde(rename = "RefreshToken", alias = "refreshToken")]
    pub refresh_token: String,
}

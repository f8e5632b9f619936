use serde::{Deserialize, Serialize};

use crate::auth::repo_types::User;

/// Request body for `POST /signup`.
#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

/// Request body for `POST /login`.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: &'static str,
}

impl TokenResponse {
    pub fn bearer(access_token: String) -> Self {
        Self {
            access_token,
            token_type: "bearer",
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SignupResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub pending_verification: bool,
    pub verification_email_sent: bool,
    pub msg: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct VerifyEmailQuery {
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub msg: &'static str,
}

/// Public part of the user returned to the client.
#[derive(Debug, Serialize)]
pub struct UserRead {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub avatar: Option<String>,
    pub is_verified: bool,
}

impl From<User> for UserRead {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            username: u.username,
            email: u.email,
            avatar: u.avatar,
            is_verified: u.is_verified,
        }
    }
}

/// Request body for `PATCH /avatar`.
#[derive(Debug, Deserialize)]
pub struct AvatarUpdate {
    pub avatar_url: String,
}

#[derive(Debug, Serialize)]
pub struct AvatarResponse {
    pub avatar: Option<String>,
}

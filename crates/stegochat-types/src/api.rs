use serde::{Deserialize, Serialize};

use crate::models::{User, UserId};

// -- Auth --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Returned by both register and login.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResponse {
    #[serde(alias = "access_token")]
    pub token: String,
    pub user: User,
}

// -- Friends --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FriendRequest {
    pub friend_username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FriendAdded {
    #[serde(default)]
    pub message: String,
    pub friend: User,
}

// -- Messages --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendTextRequest {
    pub receiver_id: UserId,
    pub content: String,
}

/// Error body shape used by the server for non-2xx responses.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorBody {
    pub detail: String,
}

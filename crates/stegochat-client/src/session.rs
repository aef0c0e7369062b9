use std::fmt;

use stegochat_types::api::AuthResponse;
use stegochat_types::models::{User, UserId};

/// Authenticated session: the bearer token plus the local user.
///
/// Created only from a successful register, login or resume, and handed
/// explicitly to the REST client, the engine and the push feed. The REST
/// client owns the live copy; logging out consumes it.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    token: String,
    user: User,
}

impl Session {
    pub fn new(token: impl Into<String>, user: User) -> Self {
        Self {
            token: token.into(),
            user,
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn user(&self) -> &User {
        &self.user
    }

    pub fn user_id(&self) -> UserId {
        self.user.id
    }

    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.token)
    }

    /// Consume the session, discarding the token. Clones made earlier are
    /// not affected; [`ApiClient::logout`](crate::api::ApiClient::logout)
    /// ends the one the client holds.
    pub fn end(self) -> User {
        tracing::info!(user_id = self.user.id, "Session ended");
        self.user
    }
}

impl From<AuthResponse> for Session {
    fn from(resp: AuthResponse) -> Self {
        Self::new(resp.token, resp.user)
    }
}

// Keep the token out of logs.
impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("user", &self.user)
            .field("token", &"<redacted>")
            .finish()
    }
}

use std::future::Future;

use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};
use url::Url;

use stegochat_types::api::{
    AuthResponse, ErrorBody, FriendAdded, FriendRequest, LoginRequest, RegisterRequest,
    SendTextRequest,
};
use stegochat_types::models::{AuditLogEntry, HiddenPayload, Message, MessageId, User, UserId};

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::session::Session;

/// Search queries shorter than this return nothing without a request.
pub const MIN_SEARCH_LEN: usize = 3;

/// An image picked for upload.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub file_name: String,
    pub bytes: Bytes,
}

impl ImageUpload {
    pub fn new(file_name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes: bytes.into(),
        }
    }

    pub fn mime_type(&self) -> &'static str {
        let ext = self
            .file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "png" => "image/png",
            "jpg" | "jpeg" => "image/jpeg",
            "gif" => "image/gif",
            "bmp" => "image/bmp",
            "webp" => "image/webp",
            _ => "application/octet-stream",
        }
    }
}

/// Authenticated chat operations: the seam the engine and the audit
/// aggregator consume. [`ApiClient`] implements it over HTTP.
pub trait ChatApi: Send + Sync {
    /// Every registered user.
    fn users(&self) -> impl Future<Output = Result<Vec<User>>> + Send;

    fn friends(&self) -> impl Future<Output = Result<Vec<User>>> + Send;

    fn search_users(&self, query: &str) -> impl Future<Output = Result<Vec<User>>> + Send;

    fn add_friend(&self, username: &str) -> impl Future<Output = Result<User>> + Send;

    /// Conversation with `peer`, oldest first.
    fn history(&self, peer: UserId) -> impl Future<Output = Result<Vec<Message>>> + Send;

    fn send_text(
        &self,
        receiver: UserId,
        content: &str,
    ) -> impl Future<Output = Result<Message>> + Send;

    fn send_image(
        &self,
        receiver: UserId,
        image: ImageUpload,
    ) -> impl Future<Output = Result<Message>> + Send;

    fn security_logs(&self) -> impl Future<Output = Result<Vec<AuditLogEntry>>> + Send;

    fn hidden_payload(
        &self,
        message: MessageId,
    ) -> impl Future<Output = Result<HiddenPayload>> + Send;
}

fn build_http(config: &ClientConfig) -> Result<Client> {
    Ok(Client::builder().timeout(config.request_timeout).build()?)
}

async fn send_json<T: DeserializeOwned>(request: RequestBuilder) -> Result<T> {
    let resp = request.send().await?;
    let status = resp.status();
    let url = resp.url().clone();
    let body = resp.text().await?;
    debug!(%url, %status, "API response");

    if status == StatusCode::UNAUTHORIZED {
        return Err(ClientError::Auth(error_detail(status, &body)));
    }
    if !status.is_success() {
        let detail = error_detail(status, &body);
        warn!(%url, %status, detail = %detail, "API request failed");
        return Err(ClientError::Server { status, detail });
    }
    Ok(serde_json::from_str(&body)?)
}

/// Prefer the server's JSON `detail`, then the raw body.
fn error_detail(status: StatusCode, body: &str) -> String {
    if let Ok(err) = serde_json::from_str::<ErrorBody>(body) {
        return err.detail;
    }
    let body = body.trim();
    if body.is_empty() {
        format!("Request failed with status {}", status.as_u16())
    } else {
        body.chars().take(500).collect()
    }
}

/// Calls made before a session exists: register, login, resuming a stored
/// token, and waking a sleeping server.
#[derive(Clone)]
pub struct AuthClient {
    http: Client,
    config: ClientConfig,
}

impl AuthClient {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        Ok(Self {
            http: build_http(config)?,
            config: config.clone(),
        })
    }

    pub async fn register(&self, req: &RegisterRequest) -> Result<Session> {
        let resp: AuthResponse = send_json(
            self.http
                .post(self.config.endpoint("/register"))
                .json(req),
        )
        .await?;
        info!(user_id = resp.user.id, username = %resp.user.username, "Registered");
        Ok(resp.into())
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<Session> {
        let req = LoginRequest {
            username: username.to_string(),
            password: password.to_string(),
        };
        let resp: AuthResponse =
            send_json(self.http.post(self.config.endpoint("/login")).json(&req)).await?;
        info!(user_id = resp.user.id, username = %resp.user.username, "Logged in");
        Ok(resp.into())
    }

    /// Rebuild a session from a stored token by asking the server who it
    /// belongs to. An expired or revoked token is an auth error.
    pub async fn resume(&self, token: &str) -> Result<Session> {
        let user: User = send_json(
            self.http
                .get(self.config.endpoint("/me"))
                .bearer_auth(token),
        )
        .await?;
        info!(user_id = user.id, username = %user.username, "Session resumed");
        Ok(Session::new(token, user))
    }

    /// Poke the server until it answers. Hosted instances sleep when idle
    /// and can take minutes to come back; any HTTP response, even an error
    /// status, means it is up.
    pub async fn wake_up(&self) -> Result<()> {
        let url = format!("{}/docs", self.config.api_url.as_str().trim_end_matches('/'));
        debug!(%url, timeout = ?self.config.wake_timeout, "Waking server");
        let resp = self
            .http
            .head(&url)
            .timeout(self.config.wake_timeout)
            .send()
            .await
            .inspect_err(|e| warn!(%url, "Server did not wake up: {}", e))?;
        info!(status = %resp.status(), "Server is awake");
        Ok(())
    }
}

/// Bearer-authenticated REST client. It owns the session; [`ApiClient::logout`]
/// consumes both.
pub struct ApiClient {
    http: Client,
    config: ClientConfig,
    session: Session,
}

impl ApiClient {
    pub fn new(config: &ClientConfig, session: Session) -> Result<Self> {
        Ok(Self {
            http: build_http(config)?,
            config: config.clone(),
            session,
        })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Drop the client and its token. Returns who was logged in.
    pub fn logout(self) -> User {
        self.session.end()
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.http
            .get(self.config.endpoint(path))
            .header(reqwest::header::AUTHORIZATION, self.session.bearer())
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.http
            .post(self.config.endpoint(path))
            .header(reqwest::header::AUTHORIZATION, self.session.bearer())
    }
}

impl ChatApi for ApiClient {
    async fn users(&self) -> Result<Vec<User>> {
        send_json(self.get("/users")).await
    }

    async fn friends(&self) -> Result<Vec<User>> {
        send_json(self.get("/friends")).await
    }

    async fn search_users(&self, query: &str) -> Result<Vec<User>> {
        let query = query.trim();
        if query.chars().count() < MIN_SEARCH_LEN {
            return Ok(Vec::new());
        }
        let url = Url::parse_with_params(&self.config.endpoint("/users/search"), [("q", query)])
            .map_err(|e| ClientError::Config(format!("search URL: {}", e)))?;
        send_json(
            self.http
                .get(url)
                .header(reqwest::header::AUTHORIZATION, self.session.bearer()),
        )
        .await
    }

    async fn add_friend(&self, username: &str) -> Result<User> {
        let req = FriendRequest {
            friend_username: username.trim().to_string(),
        };
        let added: FriendAdded = send_json(self.post("/friends/request").json(&req)).await?;
        Ok(added.friend)
    }

    async fn history(&self, peer: UserId) -> Result<Vec<Message>> {
        send_json(self.get(&format!("/messages/{}", peer))).await
    }

    async fn send_text(&self, receiver: UserId, content: &str) -> Result<Message> {
        let req = SendTextRequest {
            receiver_id: receiver,
            content: content.to_string(),
        };
        send_json(self.post("/messages/text").json(&req)).await
    }

    async fn send_image(&self, receiver: UserId, image: ImageUpload) -> Result<Message> {
        let mime = image.mime_type();
        let part = Part::stream(image.bytes)
            .file_name(image.file_name)
            .mime_str(mime)?;
        let form = Form::new()
            .text("receiver_id", receiver.to_string())
            .part("file", part);

        // Older servers read the receiver from the query string.
        let url = Url::parse_with_params(
            &self.config.endpoint("/messages/image"),
            [("receiver_id", receiver.to_string())],
        )
        .map_err(|e| ClientError::Config(format!("upload URL: {}", e)))?;

        send_json(
            self.http
                .post(url)
                .header(reqwest::header::AUTHORIZATION, self.session.bearer())
                .multipart(form),
        )
        .await
    }

    async fn security_logs(&self) -> Result<Vec<AuditLogEntry>> {
        send_json(self.get("/admin/security-logs")).await
    }

    async fn hidden_payload(&self, message: MessageId) -> Result<HiddenPayload> {
        send_json(self.get(&format!("/messages/{}/hidden-code", message))).await
    }
}

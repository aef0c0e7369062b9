#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, Ordering};

use axum::Router;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use reqwest::StatusCode;
use tokio::sync::oneshot;

use stegochat_client::api::{ChatApi, ImageUpload};
use stegochat_client::error::{ClientError, Result};
use stegochat_client::session::Session;
use stegochat_types::models::{
    AuditLogEntry, HiddenPayload, ImageSecurityData, Message, MessageId, MessageKind,
    SecurityStatus, User, UserId,
};

pub const ME: UserId = 1;

pub fn user(id: UserId) -> User {
    User {
        id,
        username: format!("user{}", id),
        email: None,
    }
}

pub fn session() -> Session {
    Session::new("test-token", user(ME))
}

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

pub fn text(id: MessageId, from: UserId, to: UserId, secs: i64) -> Message {
    Message {
        id,
        sender_id: from,
        receiver_id: to,
        content: format!("message {}", id),
        message_type: MessageKind::Text,
        created_at: at(secs),
        sender_username: format!("user{}", from),
        image_data: None,
    }
}

pub fn image(
    id: MessageId,
    from: UserId,
    to: UserId,
    secs: i64,
    status: SecurityStatus,
    hidden: bool,
    code: bool,
) -> Message {
    Message {
        id,
        sender_id: from,
        receiver_id: to,
        content: format!("/uploads/img{}.png", id),
        message_type: MessageKind::Image,
        created_at: at(secs),
        sender_username: format!("user{}", from),
        image_data: Some(ImageSecurityData {
            id: id * 100,
            security_status: status,
            has_hidden_data: hidden,
            is_code: code,
            confidence_score: 80,
            extracted_text: None,
        }),
    }
}

fn server_error(what: &str) -> ClientError {
    ClientError::Server {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        detail: format!("{} unavailable", what),
    }
}

/// Scriptable in-memory chat server.
#[derive(Default)]
pub struct FakeApi {
    pub users: Mutex<Vec<User>>,
    pub histories: Mutex<HashMap<UserId, Vec<Message>>>,
    pub failing_histories: Mutex<HashSet<UserId>>,
    /// `None` makes the security log endpoint fail.
    pub logs: Mutex<Option<Vec<AuditLogEntry>>>,
    pub payloads: Mutex<HashMap<MessageId, HiddenPayload>>,
    pub payload_requests: Mutex<Vec<MessageId>>,
    gates: Mutex<HashMap<UserId, oneshot::Receiver<()>>>,
    next_id: AtomicI64,
}

impl FakeApi {
    pub fn new() -> Self {
        let api = Self::default();
        api.next_id.store(1000, Ordering::SeqCst);
        *api.logs.lock() = Some(Vec::new());
        api
    }

    pub fn with_history(self, peer: UserId, messages: Vec<Message>) -> Self {
        self.histories.lock().insert(peer, messages);
        self
    }

    /// Hold the next history fetch for `peer` until the returned sender
    /// fires (or is dropped).
    pub fn gate(&self, peer: UserId) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.gates.lock().insert(peer, rx);
        tx
    }

    pub fn fail_history(&self, peer: UserId) {
        self.failing_histories.lock().insert(peer);
    }

    pub fn push_history(&self, peer: UserId, message: Message) {
        self.histories.lock().entry(peer).or_default().push(message);
    }

    fn next_message(&self, receiver: UserId, kind: MessageKind, content: String) -> Message {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let message = Message {
            id,
            sender_id: ME,
            receiver_id: receiver,
            content,
            message_type: kind,
            created_at: Utc::now(),
            sender_username: format!("user{}", ME),
            image_data: (kind == MessageKind::Image).then(|| ImageSecurityData {
                id,
                security_status: SecurityStatus::Pending,
                has_hidden_data: false,
                is_code: false,
                confidence_score: 0,
                extracted_text: None,
            }),
        };
        self.push_history(receiver, message.clone());
        message
    }
}

impl ChatApi for FakeApi {
    async fn users(&self) -> Result<Vec<User>> {
        Ok(self.users.lock().clone())
    }

    async fn friends(&self) -> Result<Vec<User>> {
        Ok(self.users.lock().iter().filter(|u| u.id != ME).cloned().collect())
    }

    async fn search_users(&self, query: &str) -> Result<Vec<User>> {
        Ok(self
            .users
            .lock()
            .iter()
            .filter(|u| u.username.contains(query))
            .cloned()
            .collect())
    }

    async fn add_friend(&self, username: &str) -> Result<User> {
        self.users
            .lock()
            .iter()
            .find(|u| u.username == username)
            .cloned()
            .ok_or_else(|| ClientError::Server {
                status: StatusCode::NOT_FOUND,
                detail: "User not found".into(),
            })
    }

    async fn history(&self, peer: UserId) -> Result<Vec<Message>> {
        let gate = self.gates.lock().remove(&peer);
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        if self.failing_histories.lock().contains(&peer) {
            return Err(server_error("history"));
        }
        Ok(self.histories.lock().get(&peer).cloned().unwrap_or_default())
    }

    async fn send_text(&self, receiver: UserId, content: &str) -> Result<Message> {
        Ok(self.next_message(receiver, MessageKind::Text, content.to_string()))
    }

    async fn send_image(&self, receiver: UserId, image: ImageUpload) -> Result<Message> {
        Ok(self.next_message(
            receiver,
            MessageKind::Image,
            format!("/uploads/{}", image.file_name),
        ))
    }

    async fn security_logs(&self) -> Result<Vec<AuditLogEntry>> {
        self.logs.lock().clone().ok_or_else(|| server_error("logs"))
    }

    async fn hidden_payload(&self, message: MessageId) -> Result<HiddenPayload> {
        self.payload_requests.lock().push(message);
        self.payloads
            .lock()
            .get(&message)
            .cloned()
            .ok_or_else(|| server_error("payload"))
    }
}

/// Serve `router` on an ephemeral loopback port.
pub async fn serve(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

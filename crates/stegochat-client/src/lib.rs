pub mod api;
pub mod audit;
pub mod classification;
pub mod config;
pub mod engine;
pub mod error;
pub mod push;
pub mod reveal;
pub mod selector;
pub mod session;
pub mod store;

pub use api::{ApiClient, AuthClient, ChatApi, ImageUpload};
pub use audit::{AuditAggregator, AuditFilter, AuditReport, AuditRow};
pub use classification::{Severity, Verdict};
pub use config::ClientConfig;
pub use engine::{ChatEngine, ConversationView, FetchOutcome, PushOutcome};
pub use error::{ClientError, Result};
pub use push::{FeedEvent, PushFeed};
pub use reveal::{ImageClick, PendingPolicy, PayloadState, SecurityReview};
pub use session::Session;

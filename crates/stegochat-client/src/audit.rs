use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use tracing::{debug, info, warn};

use stegochat_types::models::{AuditLogEntry, Message, MessageId, SecurityStatus, UserId};

use crate::api::ChatApi;
use crate::classification::{Severity, Verdict, classify};
use crate::error::Result;

/// Shown for fields the server did not provide.
pub const MISSING: &str = "—";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuditFilter {
    #[default]
    All,
    /// Resolved above `Clean`.
    Flagged,
    Clean,
}

impl AuditFilter {
    pub fn matches(self, row: &AuditRow) -> bool {
        match self {
            Self::All => true,
            Self::Flagged => row.verdict.is_flagged(),
            Self::Clean => row.verdict.is_clean(),
        }
    }
}

/// What could not be collected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditSource {
    History(UserId),
    SecurityLogs,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditFailure {
    pub source: AuditSource,
    pub error: String,
}

/// One image message, one unmatched log entry, or both joined.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditRow {
    pub message_id: Option<MessageId>,
    pub sender_username: Option<String>,
    pub image_name: Option<String>,
    pub verdict: Verdict,
    pub confidence_score: Option<u8>,
    pub has_hidden_data: bool,
    pub log: Option<AuditLogEntry>,
    pub created_at: DateTime<Utc>,
}

impl AuditRow {
    fn from_message(message: Message, log: Option<AuditLogEntry>) -> Self {
        let data = message.image_data.as_ref();
        Self {
            message_id: Some(message.id),
            image_name: message.image_name().map(str::to_string),
            verdict: classify(data),
            confidence_score: data.map(|d| d.confidence_score),
            has_hidden_data: data.is_some_and(|d| d.has_hidden_data),
            sender_username: Some(message.sender_username).filter(|s| !s.is_empty()),
            created_at: message.created_at,
            log,
        }
    }

    fn from_log(log: AuditLogEntry) -> Self {
        Self {
            message_id: log.message_id,
            sender_username: None,
            image_name: None,
            verdict: verdict_from_log(&log),
            confidence_score: Some(log.confidence.round().clamp(0.0, 100.0) as u8),
            has_hidden_data: log.extracted_payload.is_some(),
            created_at: log.created_at,
            log: Some(log),
        }
    }

    pub fn sender(&self) -> &str {
        self.sender_username.as_deref().unwrap_or(MISSING)
    }

    pub fn image(&self) -> &str {
        self.image_name.as_deref().unwrap_or(MISSING)
    }

    /// Language the detector attributed to the payload: `detected_language`,
    /// then `classification`.
    pub fn language(&self) -> &str {
        self.log
            .as_ref()
            .and_then(|l| {
                [l.detected_language.as_deref(), l.classification.as_deref()]
                    .into_iter()
                    .flatten()
                    .find(|c| !c.trim().is_empty())
            })
            .unwrap_or(MISSING)
    }

    pub fn action(&self) -> &str {
        self.log
            .as_ref()
            .and_then(|l| l.action_taken.as_deref())
            .unwrap_or(MISSING)
    }
}

/// Log-only rows: the explicit status if the server sent a known one, then
/// the "Marked as <status>" action. A log entry exists only for detections,
/// so anything else counts as a warning.
fn verdict_from_log(log: &AuditLogEntry) -> Verdict {
    let from_label = |label: &str| match SecurityStatus::from(label.trim().to_string()) {
        SecurityStatus::Pending => None,
        SecurityStatus::Clean => Some(Severity::Clean),
        SecurityStatus::Warning => Some(Severity::Warning),
        SecurityStatus::Suspicious => Some(Severity::Suspicious),
    };
    let severity = log
        .status
        .as_deref()
        .and_then(from_label)
        .or_else(|| {
            log.action_taken
                .as_deref()
                .and_then(|a| a.rsplit_once(' '))
                .and_then(|(_, last)| from_label(last))
        })
        .unwrap_or(Severity::Warning);
    Verdict::Resolved(severity)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuditReport {
    /// Newest first.
    pub rows: Vec<AuditRow>,
    pub failures: Vec<AuditFailure>,
}

impl AuditReport {
    pub fn filtered(&self, filter: AuditFilter) -> impl Iterator<Item = &AuditRow> {
        self.rows.iter().filter(move |r| filter.matches(r))
    }

    pub fn count(&self, filter: AuditFilter) -> usize {
        self.filtered(filter).count()
    }

    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Joins every image message the local user can see with the server's
/// security log. Histories are fetched for all known users concurrently; a
/// failing user costs only that user's rows.
pub struct AuditAggregator<'a, A> {
    api: &'a A,
}

impl<'a, A: ChatApi> AuditAggregator<'a, A> {
    pub fn new(api: &'a A) -> Self {
        Self { api }
    }

    /// Build the full report. Only failing to list users, or an auth
    /// failure anywhere, is an error.
    pub async fn collect_all(&self) -> Result<AuditReport> {
        let users = self.api.users().await?;
        debug!(users = users.len(), "Collecting audit histories");

        let fetches = users.iter().map(|user| async move {
            let result = self.api.history(user.id).await;
            (user.id, result)
        });
        let (histories, logs) = tokio::join!(join_all(fetches), self.api.security_logs());

        let mut failures = Vec::new();
        let mut images: BTreeMap<MessageId, Message> = BTreeMap::new();
        for (user_id, result) in histories {
            match result {
                Ok(messages) => {
                    for message in messages.into_iter().filter(Message::is_image) {
                        images.entry(message.id).or_insert(message);
                    }
                }
                Err(e) if e.is_auth() => return Err(e),
                Err(e) => {
                    warn!(user_id, "Audit history fetch failed: {}", e);
                    failures.push(AuditFailure {
                        source: AuditSource::History(user_id),
                        error: e.to_string(),
                    });
                }
            }
        }

        let logs = match logs {
            Ok(logs) => logs,
            Err(e) if e.is_auth() => return Err(e),
            Err(e) => {
                warn!("Security log fetch failed: {}", e);
                failures.push(AuditFailure {
                    source: AuditSource::SecurityLogs,
                    error: e.to_string(),
                });
                Vec::new()
            }
        };

        let rows = correlate(images.into_values().collect(), logs);
        info!(
            rows = rows.len(),
            failures = failures.len(),
            "Audit report collected"
        );
        Ok(AuditReport { rows, failures })
    }
}

fn is_newer(candidate: &AuditLogEntry, current: &AuditLogEntry) -> bool {
    (candidate.created_at, candidate.id) > (current.created_at, current.id)
}

/// Join image messages with log entries. An entry belongs to the message
/// named by its `message_id`, or else to the message whose classification
/// record is its `source_id`. Of all entries belonging to one message the
/// most recent wins, whichever key matched. Entries that belong to no
/// message become standalone rows.
fn correlate(images: Vec<Message>, logs: Vec<AuditLogEntry>) -> Vec<AuditRow> {
    let message_ids: HashSet<MessageId> = images.iter().map(|m| m.id).collect();
    let by_source: HashMap<i64, MessageId> = images
        .iter()
        .filter_map(|m| m.image_data.as_ref().map(|d| (d.id, m.id)))
        .collect();

    let mut latest: HashMap<MessageId, AuditLogEntry> = HashMap::new();
    let mut rows = Vec::new();

    for log in logs {
        let owner = log
            .message_id
            .filter(|id| message_ids.contains(id))
            .or_else(|| log.source_id.and_then(|id| by_source.get(&id).copied()));
        let Some(owner) = owner else {
            rows.push(AuditRow::from_log(log));
            continue;
        };
        match latest.get(&owner) {
            Some(current) if !is_newer(&log, current) => {}
            _ => {
                latest.insert(owner, log);
            }
        }
    }

    for message in images {
        let log = latest.remove(&message.id);
        rows.push(AuditRow::from_message(message, log));
    }

    rows.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.message_id.cmp(&a.message_id))
    });
    rows
}

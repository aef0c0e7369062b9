use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type UserId = i64;
pub type MessageId = i64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    /// Absent from search results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
}

/// A one-to-one chat message, as returned by history fetches, send
/// responses and push frames alike.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    /// Text body, or the server path of the uploaded image.
    pub content: String,
    pub message_type: MessageKind,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub sender_username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_data: Option<ImageSecurityData>,
}

impl Message {
    pub fn is_image(&self) -> bool {
        self.message_type == MessageKind::Image
    }

    /// The other participant from `local`'s point of view, or `None` when
    /// `local` is on neither side of the message.
    pub fn peer_of(&self, local: UserId) -> Option<UserId> {
        if self.sender_id == local {
            Some(self.receiver_id)
        } else if self.receiver_id == local {
            Some(self.sender_id)
        } else {
            None
        }
    }

    /// True iff the message was exchanged between exactly `a` and `b`.
    pub fn is_between(&self, a: UserId, b: UserId) -> bool {
        (self.sender_id == a && self.receiver_id == b)
            || (self.sender_id == b && self.receiver_id == a)
    }

    /// Last path segment of an image message's content.
    pub fn image_name(&self) -> Option<&str> {
        if !self.is_image() {
            return None;
        }
        self.content.rsplit('/').next().filter(|s| !s.is_empty())
    }
}

/// Server-side classification label of an image.
///
/// Labels this client does not know are read as `Pending`: the verdict is
/// not yet usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum SecurityStatus {
    Pending,
    Clean,
    Suspicious,
    Warning,
}

impl From<String> for SecurityStatus {
    fn from(label: String) -> Self {
        match label.to_ascii_lowercase().as_str() {
            "clean" => Self::Clean,
            "suspicious" => Self::Suspicious,
            "warning" => Self::Warning,
            _ => Self::Pending,
        }
    }
}

impl SecurityStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Clean => "clean",
            Self::Suspicious => "suspicious",
            Self::Warning => "warning",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageSecurityData {
    pub id: i64,
    pub security_status: SecurityStatus,
    #[serde(default)]
    pub has_hidden_data: bool,
    #[serde(default)]
    pub is_code: bool,
    /// 0..=100
    #[serde(default)]
    pub confidence_score: u8,
    #[serde(default)]
    pub extracted_text: Option<String>,
}

/// One row of the server's security log stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: i64,
    pub detection_type: String,
    /// Identifier of the analysed image record, when the server exposes it.
    #[serde(default, alias = "image_message_id")]
    pub source_id: Option<i64>,
    #[serde(default)]
    pub message_id: Option<MessageId>,
    #[serde(default)]
    pub classification: Option<String>,
    /// Some servers report the payload language separately from `classification`.
    #[serde(default)]
    pub detected_language: Option<String>,
    /// Percent, 0..=100.
    #[serde(default)]
    pub confidence: f32,
    #[serde(default)]
    pub extracted_payload: Option<String>,
    #[serde(default)]
    pub action_taken: Option<String>,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Decoded hidden payload of a flagged image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HiddenPayload {
    #[serde(default)]
    pub detected_language: Option<String>,
    #[serde(default)]
    pub extracted_text: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub confidence: Option<f32>,
}

impl HiddenPayload {
    /// Detector confidence in percent. The structured field wins; older
    /// servers only embed `detector_confidence=NN%` in `reason`.
    pub fn confidence_percent(&self) -> Option<f32> {
        if let Some(c) = self.confidence {
            return Some(c);
        }
        let reason = self.reason.as_deref()?;
        const KEY: &str = "detector_confidence=";
        let start = reason.find(KEY)? + KEY.len();
        let rest = &reason[start..];
        let end = rest.find('%')?;
        rest[..end].trim().parse().ok()
    }
}

/// ISO-8601 timestamps. The server emits naive timestamps (no offset);
/// those are read as UTC.
pub mod timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&ts.to_rfc3339())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        parse(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp '{}'", raw)))
    }

    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        if let Ok(ts) = raw.parse::<DateTime<Utc>>() {
            return Some(ts);
        }
        ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
            .map(|ndt| ndt.and_utc())
    }
}

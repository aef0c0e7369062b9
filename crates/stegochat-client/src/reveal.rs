use std::collections::HashSet;

use stegochat_types::models::{HiddenPayload, ImageSecurityData, Message, MessageId};

use crate::classification::{Verdict, classify};

/// What to do with images whose verdict has not arrived yet, including
/// images with no classification record at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PendingPolicy {
    /// Blur until a clean verdict arrives.
    #[default]
    Blur,
    /// Show unless hidden data is already reported.
    Show,
}

/// Outcome of clicking an image.
#[derive(Debug, Clone, PartialEq)]
pub enum ImageClick {
    /// Not gated (or already revealed): display it.
    Show,
    /// Gated: show the security review first.
    Review(SecurityReview),
}

/// Loading state of the decoded hidden payload inside a review.
#[derive(Debug, Clone, PartialEq)]
pub enum PayloadState {
    /// No hidden data reported, nothing to fetch.
    NotRequested,
    Loading,
    Loaded(HiddenPayload),
    Failed(String),
}

/// Security detail shown before a gated image may be revealed.
#[derive(Debug, Clone, PartialEq)]
pub struct SecurityReview {
    pub message_id: MessageId,
    pub verdict: Verdict,
    pub headline: &'static str,
    pub status_label: &'static str,
    pub confidence_score: u8,
    pub has_hidden_data: bool,
    pub is_code: bool,
    pub extracted_preview: Option<String>,
    pub payload: PayloadState,
}

impl SecurityReview {
    pub fn open(message: &Message) -> Self {
        let data = message.image_data.as_ref();
        let verdict = classify(data);
        let has_hidden_data = data.is_some_and(|d| d.has_hidden_data);
        let is_code = data.is_some_and(|d| d.is_code);

        let headline = if is_code {
            "Suspicious Code Detected"
        } else if has_hidden_data {
            "Hidden Data Detected"
        } else if verdict == Verdict::Pending {
            "Security Scan In Progress"
        } else if verdict.is_flagged() {
            "Image Flagged By Scanner"
        } else {
            "Image Appears Clean"
        };

        Self {
            message_id: message.id,
            verdict,
            headline,
            status_label: data.map_or("pending", |d| d.security_status.as_str()),
            confidence_score: data.map_or(0, |d| d.confidence_score),
            has_hidden_data,
            is_code,
            extracted_preview: data.and_then(|d| d.extracted_text.clone()),
            payload: PayloadState::NotRequested,
        }
    }

    /// Whether the decoded payload is worth fetching.
    pub fn wants_payload(&self) -> bool {
        self.has_hidden_data && self.payload == PayloadState::NotRequested
    }

    pub fn begin_loading(&mut self) {
        self.payload = PayloadState::Loading;
    }

    pub fn finish_loading(&mut self, result: Result<HiddenPayload, String>) {
        self.payload = match result {
            Ok(payload) => PayloadState::Loaded(payload),
            Err(e) => PayloadState::Failed(e),
        };
    }

    /// Detected language of the payload, `"—"` when unknown.
    pub fn language(&self) -> &str {
        match &self.payload {
            PayloadState::Loaded(p) => p.detected_language.as_deref().unwrap_or("—"),
            _ => "—",
        }
    }
}

/// Session-local disclosure state of image messages. Clicking a blurred
/// image opens a [`SecurityReview`]; only [`RevealGate::proceed`] or
/// [`RevealGate::reveal`] lifts the blur, and nothing puts it back.
#[derive(Debug, Default)]
pub struct RevealGate {
    policy: PendingPolicy,
    revealed: HashSet<MessageId>,
}

impl RevealGate {
    pub fn new(policy: PendingPolicy) -> Self {
        Self {
            policy,
            revealed: HashSet::new(),
        }
    }

    pub fn policy(&self) -> PendingPolicy {
        self.policy
    }

    /// Whether the image is subject to the gate at all, ignoring reveals.
    pub fn is_gated(&self, message: &Message) -> bool {
        if !message.is_image() {
            return false;
        }
        match message.image_data.as_ref() {
            None => self.policy == PendingPolicy::Blur,
            Some(data) => self.gates(data),
        }
    }

    fn gates(&self, data: &ImageSecurityData) -> bool {
        if data.has_hidden_data {
            return true;
        }
        match classify(Some(data)) {
            Verdict::Pending => self.policy == PendingPolicy::Blur,
            verdict => !verdict.is_clean(),
        }
    }

    pub fn should_blur(&self, message: &Message) -> bool {
        self.is_gated(message) && !self.revealed.contains(&message.id)
    }

    pub fn is_revealed(&self, id: MessageId) -> bool {
        self.revealed.contains(&id)
    }

    /// Irreversible for the session.
    pub fn reveal(&mut self, id: MessageId) {
        if self.revealed.insert(id) {
            tracing::info!(message_id = id, "Image revealed by user");
        }
    }

    pub fn on_image_click(&self, message: &Message) -> ImageClick {
        if self.should_blur(message) {
            ImageClick::Review(SecurityReview::open(message))
        } else {
            ImageClick::Show
        }
    }

    /// The user chose to view the image after reading the review.
    pub fn proceed(&mut self, review: SecurityReview) -> MessageId {
        self.reveal(review.message_id);
        review.message_id
    }

    /// The user backed out of the review; the image stays blurred.
    pub fn dismiss(&self, review: SecurityReview) {
        tracing::debug!(message_id = review.message_id, "Security review dismissed");
    }
}

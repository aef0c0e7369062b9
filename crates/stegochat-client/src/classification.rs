use std::fmt;

use stegochat_types::models::{ImageSecurityData, Message, SecurityStatus};

/// Terminal severity, ordered `Clean < Warning < Suspicious`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Clean,
    Warning,
    Suspicious,
}

/// Starts `Pending` and moves to a terminal severity once the server reports
/// one. The client never turns one terminal label into another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verdict {
    Pending,
    Resolved(Severity),
}

impl Verdict {
    pub fn severity(self) -> Option<Severity> {
        match self {
            Self::Pending => None,
            Self::Resolved(s) => Some(s),
        }
    }

    pub fn is_clean(self) -> bool {
        self == Self::Resolved(Severity::Clean)
    }

    /// Resolved to anything above `Clean`.
    pub fn is_flagged(self) -> bool {
        matches!(self, Self::Resolved(s) if s > Severity::Clean)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Resolved(Severity::Clean) => "Clean",
            Self::Resolved(Severity::Warning) => "Warning",
            Self::Resolved(Severity::Suspicious) => "Suspicious",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Effective verdict of a classification record. `is_code` overrides the
/// textual status with the highest severity, even while it is pending.
pub fn classify(data: Option<&ImageSecurityData>) -> Verdict {
    let Some(data) = data else {
        return Verdict::Pending;
    };
    if data.is_code {
        return Verdict::Resolved(Severity::Suspicious);
    }
    match data.security_status {
        SecurityStatus::Pending => Verdict::Pending,
        SecurityStatus::Clean => Verdict::Resolved(Severity::Clean),
        SecurityStatus::Warning => Verdict::Resolved(Severity::Warning),
        SecurityStatus::Suspicious => Verdict::Resolved(Severity::Suspicious),
    }
}

/// Verdict of an image message; `None` for text messages.
pub fn verdict_of(message: &Message) -> Option<Verdict> {
    message
        .is_image()
        .then(|| classify(message.image_data.as_ref()))
}

/// Merge a newly observed classification record into the stored one.
pub fn merge_image_data(
    existing: Option<ImageSecurityData>,
    incoming: Option<ImageSecurityData>,
) -> Option<ImageSecurityData> {
    let (existing, mut incoming) = match (existing, incoming) {
        (None, incoming) => return incoming,
        (existing, None) => return existing,
        (Some(e), Some(i)) => (e, i),
    };

    // A stale pending record never downgrades a verdict already received.
    if existing.security_status.is_terminal() && !incoming.security_status.is_terminal() {
        return Some(existing);
    }

    if !existing.security_status.is_terminal() && !incoming.security_status.is_terminal() {
        incoming.has_hidden_data |= existing.has_hidden_data;
        incoming.is_code |= existing.is_code;
    }
    if incoming.extracted_text.is_none() {
        incoming.extracted_text = existing.extracted_text;
    }
    Some(incoming)
}

use serde::{Deserialize, Serialize};

use crate::models::Message;

/// Outbound liveness frame. The server does not answer it.
pub const KEEPALIVE_FRAME: &str = "ping";

/// Frames pushed by the server over the live channel.
///
/// Servers have used three names for the same "a message was created"
/// event; all of them carry the full message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PushEvent {
    #[serde(rename = "message.created")]
    MessageCreated { message: Message },

    #[serde(rename = "text_message")]
    TextMessage { message: Message },

    #[serde(rename = "image_message")]
    ImageMessage { message: Message },

    /// Any other frame type.
    #[serde(other)]
    Unknown,
}

impl PushEvent {
    /// The message carried by a "message created" event.
    pub fn message(&self) -> Option<&Message> {
        match self {
            Self::MessageCreated { message }
            | Self::TextMessage { message }
            | Self::ImageMessage { message } => Some(message),
            Self::Unknown => None,
        }
    }

    pub fn into_message(self) -> Option<Message> {
        match self {
            Self::MessageCreated { message }
            | Self::TextMessage { message }
            | Self::ImageMessage { message } => Some(message),
            Self::Unknown => None,
        }
    }
}

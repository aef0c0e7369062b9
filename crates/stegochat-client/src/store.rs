use std::collections::{HashMap, HashSet};

use stegochat_types::models::{Message, MessageId, UserId};
use tracing::{trace, warn};

use crate::classification::merge_image_data;

/// Result of a single upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Inserted,
    Updated,
    Unchanged,
    /// The local user is on neither side of the message.
    Rejected,
}

#[derive(Debug, Default)]
struct Timeline {
    messages: Vec<Message>,
    ids: HashSet<MessageId>,
}

impl Timeline {
    fn upsert(&mut self, incoming: Message) -> Upsert {
        if self.ids.contains(&incoming.id) {
            let Some(stored) = self.messages.iter_mut().find(|m| m.id == incoming.id) else {
                return Upsert::Unchanged;
            };
            return if merge_into(stored, incoming) {
                Upsert::Updated
            } else {
                Upsert::Unchanged
            };
        }

        let at = self
            .messages
            .partition_point(|m| m.created_at <= incoming.created_at);
        self.ids.insert(incoming.id);
        self.messages.insert(at, incoming);
        Upsert::Inserted
    }
}

/// Fold a redelivered copy into the stored message. Identity, parties and
/// position (`created_at`) never change. Returns whether anything did.
fn merge_into(stored: &mut Message, incoming: Message) -> bool {
    let mut changed = false;

    if stored.content != incoming.content {
        stored.content = incoming.content;
        changed = true;
    }
    if !incoming.sender_username.is_empty() && stored.sender_username != incoming.sender_username {
        stored.sender_username = incoming.sender_username;
        changed = true;
    }

    let previous = stored.image_data.clone();
    let merged = merge_image_data(stored.image_data.take(), incoming.image_data);
    changed |= merged != previous;
    stored.image_data = merged;
    changed
}

/// Ordered, deduplicated messages for every peer of one local user. History,
/// send responses and pushes all land through the same upsert; equal
/// timestamps keep arrival order.
#[derive(Debug)]
pub struct MessageStore {
    local: UserId,
    timelines: HashMap<UserId, Timeline>,
}

impl MessageStore {
    pub fn new(local: UserId) -> Self {
        Self {
            local,
            timelines: HashMap::new(),
        }
    }

    /// Insert `message` into its peer's timeline, or merge it into the copy
    /// already stored under the same id.
    pub fn upsert(&mut self, message: Message) -> Upsert {
        let Some(peer) = message.peer_of(self.local) else {
            warn!(
                message_id = message.id,
                sender_id = message.sender_id,
                receiver_id = message.receiver_id,
                "Message does not involve the local user, ignoring"
            );
            return Upsert::Rejected;
        };
        let id = message.id;
        let outcome = self.timelines.entry(peer).or_default().upsert(message);
        trace!(peer_id = peer, message_id = id, ?outcome, "Upsert");
        outcome
    }

    /// Push-origin delivery. Same semantics as [`MessageStore::upsert`].
    pub fn append(&mut self, message: Message) -> Upsert {
        self.upsert(message)
    }

    /// Merge a pre-ordered history batch for `peer`. Messages that do not
    /// belong to the conversation are skipped. Returns how many entries were
    /// inserted or changed.
    pub fn merge_history(&mut self, peer: UserId, batch: Vec<Message>) -> usize {
        let mut touched = 0;
        for message in batch {
            if !message.is_between(self.local, peer) {
                warn!(
                    peer_id = peer,
                    message_id = message.id,
                    "History entry outside the conversation, skipping"
                );
                continue;
            }
            if matches!(self.upsert(message), Upsert::Inserted | Upsert::Updated) {
                touched += 1;
            }
        }
        // An empty history still establishes an (empty) timeline.
        self.timelines.entry(peer).or_default();
        touched
    }

    /// Ordered messages for `peer`. Empty if nothing is known yet.
    pub fn list_for(&self, peer: UserId) -> &[Message] {
        self.timelines
            .get(&peer)
            .map(|t| t.messages.as_slice())
            .unwrap_or(&[])
    }

    pub fn get(&self, peer: UserId, id: MessageId) -> Option<&Message> {
        self.list_for(peer).iter().find(|m| m.id == id)
    }

    /// Look a message up by id across every timeline.
    pub fn find(&self, id: MessageId) -> Option<&Message> {
        self.timelines
            .values()
            .filter(|t| t.ids.contains(&id))
            .find_map(|t| t.messages.iter().find(|m| m.id == id))
    }

    pub fn is_loaded(&self, peer: UserId) -> bool {
        self.timelines.contains_key(&peer)
    }
}

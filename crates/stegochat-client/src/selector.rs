use stegochat_types::models::{Message, User, UserId};

/// Binds an in-flight history fetch to the selection that started it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchTicket {
    pub peer_id: UserId,
    generation: u64,
}

/// Tracks the active conversation peer. Each selection starts a new
/// generation; results carrying an older ticket are discarded on arrival.
#[derive(Debug)]
pub struct ConversationSelector {
    local: UserId,
    active: Option<User>,
    generation: u64,
}

impl ConversationSelector {
    pub fn new(local: UserId) -> Self {
        Self {
            local,
            active: None,
            generation: 0,
        }
    }

    pub fn select(&mut self, peer: User) -> FetchTicket {
        self.generation += 1;
        let ticket = FetchTicket {
            peer_id: peer.id,
            generation: self.generation,
        };
        self.active = Some(peer);
        ticket
    }

    /// Ticket for re-fetching the current selection without changing it.
    pub fn ticket(&self) -> Option<FetchTicket> {
        self.active.as_ref().map(|peer| FetchTicket {
            peer_id: peer.id,
            generation: self.generation,
        })
    }

    pub fn current(&self) -> Option<&User> {
        self.active.as_ref()
    }

    pub fn clear(&mut self) {
        self.generation += 1;
        self.active = None;
    }

    /// Last selection wins.
    pub fn is_current(&self, ticket: FetchTicket) -> bool {
        ticket.generation == self.generation
            && self.active.as_ref().is_some_and(|p| p.id == ticket.peer_id)
    }

    /// Push relevance: the message was exchanged between the local user and
    /// the active peer, in either direction.
    pub fn accepts(&self, message: &Message) -> bool {
        self.active
            .as_ref()
            .is_some_and(|peer| message.is_between(self.local, peer.id))
    }
}

use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use stegochat_types::events::PushEvent;
use stegochat_types::models::{Message, MessageId, User, UserId};

use crate::api::{ChatApi, ImageUpload};
use crate::error::{ClientError, Result};
use crate::push::FeedEvent;
use crate::reveal::{ImageClick, PendingPolicy, RevealGate, SecurityReview};
use crate::selector::{ConversationSelector, FetchTicket};
use crate::session::Session;
use crate::store::{MessageStore, Upsert};

/// Longest text message accepted, in characters.
pub const MAX_TEXT_LEN: usize = 4000;

/// Snapshot of the active conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationView {
    pub peer: User,
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The history was merged; `changed` entries were inserted or updated.
    Applied { peer_id: UserId, changed: usize },
    /// A newer selection superseded this fetch before it returned.
    Discarded { peer_id: UserId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Applied(Upsert),
    /// Not part of the active conversation.
    Dropped,
}

struct EngineState {
    store: MessageStore,
    gate: RevealGate,
    selector: ConversationSelector,
}

/// Ties the selector, the message store and the reveal gate to a
/// [`ChatApi`].
///
/// All mutable state sits behind one lock that is never held across an
/// `.await`. History fetches take a [`FetchTicket`] before awaiting and only
/// apply their result if that ticket is still current when they return.
pub struct ChatEngine<A> {
    api: A,
    local: User,
    state: Mutex<EngineState>,
}

impl<A: ChatApi> ChatEngine<A> {
    pub fn new(session: &Session, api: A, policy: PendingPolicy) -> Self {
        let local = session.user().clone();
        Self {
            state: Mutex::new(EngineState {
                store: MessageStore::new(local.id),
                gate: RevealGate::new(policy),
                selector: ConversationSelector::new(local.id),
            }),
            api,
            local,
        }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn local_user(&self) -> &User {
        &self.local
    }

    /// Give the client back, e.g. to log out.
    pub fn into_api(self) -> A {
        self.api
    }

    // -- Selection ----------------------------------------------------------

    /// Make `peer` the active conversation and load its history.
    ///
    /// If another selection happens while this fetch is in flight, the late
    /// result is discarded. On error the store is left untouched.
    pub async fn select(&self, peer: User) -> Result<FetchOutcome> {
        let peer_id = peer.id;
        let ticket = self.state.lock().selector.select(peer);
        info!(peer_id, "Conversation selected");
        self.fetch(ticket).await
    }

    /// Re-fetch the active conversation. `None` when nothing is selected.
    pub async fn refresh(&self) -> Result<Option<FetchOutcome>> {
        let ticket = self.state.lock().selector.ticket();
        match ticket {
            Some(ticket) => self.fetch(ticket).await.map(Some),
            None => Ok(None),
        }
    }

    /// Leave the active conversation. Fetches still in flight are discarded
    /// and pushes are dropped until the next selection.
    pub fn clear_selection(&self) {
        self.state.lock().selector.clear();
    }

    async fn fetch(&self, ticket: FetchTicket) -> Result<FetchOutcome> {
        let result = self.api.history(ticket.peer_id).await;

        let mut state = self.state.lock();
        if !state.selector.is_current(ticket) {
            debug!(peer_id = ticket.peer_id, "Discarding superseded history fetch");
            return Ok(FetchOutcome::Discarded {
                peer_id: ticket.peer_id,
            });
        }

        let batch = result.inspect_err(|e| {
            warn!(peer_id = ticket.peer_id, "History fetch failed: {}", e);
        })?;
        let changed = state.store.merge_history(ticket.peer_id, batch);
        debug!(peer_id = ticket.peer_id, changed, "History merged");
        Ok(FetchOutcome::Applied {
            peer_id: ticket.peer_id,
            changed,
        })
    }

    pub fn current(&self) -> Option<User> {
        self.state.lock().selector.current().cloned()
    }

    pub fn view(&self) -> Option<ConversationView> {
        let state = self.state.lock();
        let peer = state.selector.current()?.clone();
        let messages = state.store.list_for(peer.id).to_vec();
        Some(ConversationView { peer, messages })
    }

    /// Cached timeline for any peer seen this session.
    pub fn list_for(&self, peer: UserId) -> Vec<Message> {
        self.state.lock().store.list_for(peer).to_vec()
    }

    pub fn message(&self, id: MessageId) -> Option<Message> {
        self.state.lock().store.find(id).cloned()
    }

    // -- Push ---------------------------------------------------------------

    /// Route one push event. Events outside the active conversation are
    /// dropped; the rest go through the store's upsert.
    pub fn handle_push(&self, event: PushEvent) -> PushOutcome {
        let Some(message) = event.into_message() else {
            return PushOutcome::Dropped;
        };

        let mut state = self.state.lock();
        if !state.selector.accepts(&message) {
            trace!(
                message_id = message.id,
                sender_id = message.sender_id,
                receiver_id = message.receiver_id,
                "Push event outside the active conversation"
            );
            return PushOutcome::Dropped;
        }
        PushOutcome::Applied(state.store.append(message))
    }

    /// Consume one notification from the push feed. A (re)connect triggers
    /// a refresh of the active conversation.
    pub async fn apply_feed_event(&self, event: FeedEvent) -> Result<()> {
        match event {
            FeedEvent::Event(event) => {
                self.handle_push(event);
                Ok(())
            }
            FeedEvent::Connected { conn_id } => {
                debug!(%conn_id, "Push channel up, refreshing active conversation");
                self.refresh().await.map(|_| ())
            }
            FeedEvent::Disconnected { error } => {
                debug!(error = %error, "Push channel down");
                Ok(())
            }
        }
    }

    // -- Sending ------------------------------------------------------------

    /// Send a text message to the active peer. The server's copy is stored
    /// right away, so the later push echo is a no-op.
    pub async fn send_text(&self, content: &str) -> Result<Message> {
        let content = content.trim();
        if content.is_empty() {
            return Err(ClientError::InvalidInput("message is empty".into()));
        }
        if content.chars().count() > MAX_TEXT_LEN {
            return Err(ClientError::InvalidInput(format!(
                "message exceeds {} characters",
                MAX_TEXT_LEN
            )));
        }
        let peer = self.active_peer()?;
        let sent = self.api.send_text(peer, content).await?;
        self.state.lock().store.upsert(sent.clone());
        Ok(sent)
    }

    pub async fn send_image(&self, image: ImageUpload) -> Result<Message> {
        if image.bytes.is_empty() {
            return Err(ClientError::InvalidInput(format!(
                "image '{}' is empty",
                image.file_name
            )));
        }
        let peer = self.active_peer()?;
        let sent = self.api.send_image(peer, image).await?;
        info!(message_id = sent.id, peer_id = peer, "Image sent");
        self.state.lock().store.upsert(sent.clone());
        Ok(sent)
    }

    fn active_peer(&self) -> Result<UserId> {
        self.state
            .lock()
            .selector
            .current()
            .map(|p| p.id)
            .ok_or(ClientError::NoActivePeer)
    }

    // -- Reveal -------------------------------------------------------------

    /// Whether image `id` must be shown blurred. Unknown ids are not.
    pub fn should_blur(&self, id: MessageId) -> bool {
        let state = self.state.lock();
        state
            .store
            .find(id)
            .is_some_and(|m| state.gate.should_blur(m))
    }

    /// Clicking an image. A gated image opens its security review, with the
    /// hidden payload fetched when one is reported; it is not revealed.
    pub async fn click_image(&self, id: MessageId) -> Option<ImageClick> {
        let click = {
            let state = self.state.lock();
            let message = state.store.find(id)?;
            state.gate.on_image_click(message)
        };
        match click {
            ImageClick::Show => Some(ImageClick::Show),
            ImageClick::Review(mut review) => {
                self.load_review(&mut review).await;
                Some(ImageClick::Review(review))
            }
        }
    }

    /// Fetch the decoded payload into `review` if it has one to fetch.
    /// Failures end up in the review, not in the caller.
    pub async fn load_review(&self, review: &mut SecurityReview) {
        if !review.wants_payload() {
            return;
        }
        review.begin_loading();
        let result = self.api.hidden_payload(review.message_id).await;
        if let Err(e) = &result {
            warn!(message_id = review.message_id, "Hidden payload fetch failed: {}", e);
        }
        review.finish_loading(result.map_err(|e| e.to_string()));
    }

    pub fn proceed(&self, review: SecurityReview) -> MessageId {
        self.state.lock().gate.proceed(review)
    }

    pub fn dismiss(&self, review: SecurityReview) {
        self.state.lock().gate.dismiss(review);
    }

    pub fn reveal(&self, id: MessageId) {
        self.state.lock().gate.reveal(id);
    }

    pub fn is_revealed(&self, id: MessageId) -> bool {
        self.state.lock().gate.is_revealed(id)
    }
}

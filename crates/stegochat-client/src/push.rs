use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use url::Url;
use uuid::Uuid;

use stegochat_types::events::{KEEPALIVE_FRAME, PushEvent};

use crate::config::{ClientConfig, ReconnectPolicy};
use crate::error::{ClientError, Result};
use crate::session::Session;

const EVENT_BUFFER: usize = 256;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Notifications delivered to the feed's consumer.
#[derive(Debug)]
pub enum FeedEvent {
    /// The channel is open. Re-fetch history now.
    Connected { conn_id: Uuid },
    Event(PushEvent),
    /// The channel dropped or could not be opened. Always a
    /// [`ClientError::PushChannel`].
    Disconnected { error: ClientError },
}

enum ConnectionEnd {
    Cancelled,
    ConsumerGone,
    Lost(WsError),
}

/// Handle to a running push feed. Dropping it closes the channel.
///
/// The feed only decodes and forwards; the consumer re-fetches history after
/// every `Connected` to cover whatever was missed while it was down.
pub struct PushFeed {
    events: mpsc::Receiver<FeedEvent>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl PushFeed {
    /// Open the push channel for `session`. Must be called once the local
    /// user is known.
    pub fn connect(config: &ClientConfig, session: &Session) -> Result<Self> {
        let url = feed_url(&config.push_url, session)?;
        let (tx, events) = mpsc::channel(EVENT_BUFFER);
        let cancel = CancellationToken::new();

        let task = tokio::spawn(run_feed(
            url,
            config.keepalive_interval,
            config.reconnect,
            tx,
            cancel.clone(),
        ));

        Ok(Self {
            events,
            cancel,
            task,
        })
    }

    /// Next notification, or `None` once the feed has stopped for good.
    pub async fn next(&mut self) -> Option<FeedEvent> {
        self.events.recv().await
    }

    /// Close the channel and wait for the feed task (and its keep-alive
    /// timer) to finish.
    pub async fn close(mut self) {
        self.cancel.cancel();
        if let Err(e) = (&mut self.task).await {
            warn!("Push feed task ended abnormally: {}", e);
        }
    }
}

impl Drop for PushFeed {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// `{push_url}/ws/{user_id}?token=...`
pub fn feed_url(base: &Url, session: &Session) -> Result<Url> {
    if !matches!(base.scheme(), "ws" | "wss") {
        return Err(ClientError::Config(format!(
            "push URL must use ws:// or wss://, got '{}'",
            base
        )));
    }
    let mut url = base.clone();
    let path = format!("{}/ws/{}", url.path().trim_end_matches('/'), session.user_id());
    url.set_path(&path);
    url.query_pairs_mut().append_pair("token", session.token());
    Ok(url)
}

/// Decode one inbound text frame. Malformed and unknown frames are logged
/// and dropped.
pub fn decode_frame(text: &str) -> Option<PushEvent> {
    match serde_json::from_str::<PushEvent>(text) {
        Ok(PushEvent::Unknown) => {
            trace!("Ignoring push frame of unknown type");
            None
        }
        Ok(event) => Some(event),
        Err(e) => {
            warn!(
                "Bad push frame: {} -- raw: {}",
                e,
                text.chars().take(200).collect::<String>()
            );
            None
        }
    }
}

async fn run_feed(
    url: Url,
    keepalive: Duration,
    reconnect: ReconnectPolicy,
    tx: mpsc::Sender<FeedEvent>,
    cancel: CancellationToken,
) {
    let mut attempt: u32 = 0;

    loop {
        let connected = tokio::select! {
            _ = cancel.cancelled() => break,
            result = connect_async(url.as_str()) => result,
        };

        let error: ClientError = match connected {
            Ok((ws, _)) => {
                let conn_id = Uuid::new_v4();
                info!(%conn_id, "Push channel connected");
                attempt = 0;
                if tx.send(FeedEvent::Connected { conn_id }).await.is_err() {
                    break;
                }
                match run_connection(ws, keepalive, &tx, &cancel).await {
                    ConnectionEnd::Cancelled | ConnectionEnd::ConsumerGone => break,
                    ConnectionEnd::Lost(e) => {
                        warn!(%conn_id, "Push channel lost: {}", e);
                        e.into()
                    }
                }
            }
            Err(e) => {
                warn!(attempt, "Push channel connect failed: {}", e);
                e.into()
            }
        };

        if tx.send(FeedEvent::Disconnected { error }).await.is_err() {
            break;
        }
        if !reconnect.enabled {
            break;
        }

        let delay = reconnect.delay_for(attempt);
        attempt = attempt.saturating_add(1);
        debug!(?delay, attempt, "Reconnecting push channel");
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    debug!("Push feed stopped");
}

async fn run_connection(
    ws: WsStream,
    keepalive: Duration,
    tx: &mpsc::Sender<FeedEvent>,
    cancel: &CancellationToken,
) -> ConnectionEnd {
    let (mut sink, mut stream) = ws.split();

    let mut heartbeat = tokio::time::interval(keepalive);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    heartbeat.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = sink.send(WsMessage::Close(None)).await;
                return ConnectionEnd::Cancelled;
            }
            _ = heartbeat.tick() => {
                if let Err(e) = sink.send(WsMessage::text(KEEPALIVE_FRAME)).await {
                    return ConnectionEnd::Lost(e);
                }
            }
            frame = stream.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => {
                    let Some(event) = decode_frame(&text) else { continue };
                    if tx.send(FeedEvent::Event(event)).await.is_err() {
                        return ConnectionEnd::ConsumerGone;
                    }
                }
                Some(Ok(WsMessage::Close(_))) | None => {
                    return ConnectionEnd::Lost(WsError::ConnectionClosed);
                }
                // Pings are answered by tungstenite on the next write.
                Some(Ok(_)) => {}
                Some(Err(e)) => return ConnectionEnd::Lost(e),
            }
        }
    }
}

use anyhow::{Context, bail};
use tracing::{info, warn};

use stegochat_client::audit::{AuditAggregator, AuditFilter};
use stegochat_client::push::{FeedEvent, PushFeed};
use stegochat_client::{
    ApiClient, AuthClient, ChatApi, ChatEngine, ClientConfig, ImageUpload, Session,
};
use stegochat_types::models::Message;

const USAGE: &str = "usage: stegochat <chat [peer] | send <peer> <text> | send-image <peer> <file> | audit [all|flagged|clean]>";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stegochat=info,stegochat_client=debug".into()),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first().map(String::as_str) else {
        bail!(USAGE);
    };

    // Config
    let config = ClientConfig::from_env()?;
    let session = authenticate(&config).await?;
    info!(api = %config.api_url, user = %session.user().username, "Connected");

    let api = ApiClient::new(&config, session)?;

    let api = match command {
        "chat" => chat(&config, api, args.get(1).map(String::as_str)).await?,
        "send" => {
            let Some(peer) = args.get(1).filter(|_| args.len() > 2) else {
                bail!(USAGE);
            };
            let engine = open_conversation(&config, api, Some(peer.as_str())).await?;
            let sent = engine.send_text(&args[2..].join(" ")).await?;
            println!("sent #{}", sent.id);
            engine.into_api()
        }
        "send-image" => {
            let (Some(peer), Some(path)) = (args.get(1), args.get(2)) else {
                bail!(USAGE);
            };
            let bytes = tokio::fs::read(path)
                .await
                .with_context(|| format!("reading {}", path))?;
            let file_name = std::path::Path::new(path)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.clone());
            let engine = open_conversation(&config, api, Some(peer.as_str())).await?;
            let sent = engine.send_image(ImageUpload::new(file_name, bytes)).await?;
            println!("sent image #{} ({})", sent.id, config.asset_url(&sent.content));
            engine.into_api()
        }
        "audit" => {
            let filter = match args.get(1).map(String::as_str) {
                None | Some("all") => AuditFilter::All,
                Some("flagged") => AuditFilter::Flagged,
                Some("clean") => AuditFilter::Clean,
                Some(other) => bail!("unknown audit filter '{}'", other),
            };
            audit(&api, filter).await?;
            api
        }
        other => bail!("unknown command '{}'\n{}", other, USAGE),
    };

    api.logout();
    Ok(())
}

/// Resume `STEGOCHAT_TOKEN` if set, otherwise log in with
/// `STEGOCHAT_USERNAME` / `STEGOCHAT_PASSWORD`. Wakes the server first.
async fn authenticate(config: &ClientConfig) -> anyhow::Result<Session> {
    let auth = AuthClient::new(config)?;
    auth.wake_up().await.context("server is not responding")?;

    if let Ok(token) = std::env::var("STEGOCHAT_TOKEN") {
        return auth.resume(&token).await.context("stored token rejected");
    }
    let username = std::env::var("STEGOCHAT_USERNAME").context("STEGOCHAT_USERNAME not set")?;
    let password = std::env::var("STEGOCHAT_PASSWORD").context("STEGOCHAT_PASSWORD not set")?;
    auth.login(&username, &password).await.context("login failed")
}

/// Select `peer` (by username), or the first friend when none is given.
async fn open_conversation(
    config: &ClientConfig,
    api: ApiClient,
    peer: Option<&str>,
) -> anyhow::Result<ChatEngine<ApiClient>> {
    let friends = api.friends().await?;
    let target = match peer {
        Some(name) => match friends.iter().find(|f| f.username == name) {
            Some(friend) => friend.clone(),
            None => api
                .add_friend(name)
                .await
                .with_context(|| format!("'{}' is not a friend and could not be added", name))?,
        },
        None => friends
            .first()
            .cloned()
            .context("no friends yet; pass a peer username")?,
    };

    let session = api.session().clone();
    let engine = ChatEngine::new(&session, api, config.pending_policy);
    engine.select(target).await?;
    Ok(engine)
}

async fn chat(
    config: &ClientConfig,
    api: ApiClient,
    peer: Option<&str>,
) -> anyhow::Result<ApiClient> {
    let engine = open_conversation(config, api, peer).await?;
    let me = engine.local_user().id;
    if let Some(view) = engine.view() {
        println!("-- conversation with {} --", view.peer.username);
        for message in &view.messages {
            print_message(config, &engine, message);
        }
    }

    let mut feed = PushFeed::connect(config, engine.api().session())?;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            event = feed.next() => {
                let Some(event) = event else { break };
                let shown = match &event {
                    FeedEvent::Event(e) => e.message().map(|m| m.id),
                    _ => None,
                };
                if let Err(e) = engine.apply_feed_event(event).await {
                    if e.is_auth() {
                        return Err(e).context("session expired, log in again");
                    }
                    warn!("Refresh failed: {}", e);
                }
                if let Some(message) = shown.and_then(|id| engine.message(id)) {
                    if engine.current().is_some_and(|p| message.peer_of(me) == Some(p.id)) {
                        print_message(config, &engine, &message);
                    }
                }
            }
        }
    }

    feed.close().await;
    Ok(engine.into_api())
}

fn print_message<A: ChatApi>(config: &ClientConfig, engine: &ChatEngine<A>, message: &Message) {
    let when = message.created_at.format("%Y-%m-%d %H:%M");
    if message.is_image() {
        let name = message.image_name().unwrap_or("image");
        let marker = if engine.should_blur(message.id) {
            "[blurred: review required]"
        } else {
            ""
        };
        println!(
            "{} {}: <{}> {} {}",
            when,
            message.sender_username,
            name,
            config.asset_url(&message.content),
            marker
        );
    } else {
        println!("{} {}: {}", when, message.sender_username, message.content);
    }
}

async fn audit(api: &ApiClient, filter: AuditFilter) -> anyhow::Result<()> {
    let report = AuditAggregator::new(api).collect_all().await?;
    println!(
        "{:<8} {:<12} {:<24} {:<10} {:<10} {}",
        "ID", "SENDER", "IMAGE", "VERDICT", "LANGUAGE", "ACTION"
    );
    for row in report.filtered(filter) {
        let id = row
            .message_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "—".into());
        println!(
            "{:<8} {:<12} {:<24} {:<10} {:<10} {}",
            id,
            row.sender(),
            row.image(),
            row.verdict.label(),
            row.language(),
            row.action()
        );
    }
    for failure in &report.failures {
        warn!(source = ?failure.source, "Not collected: {}", failure.error);
    }
    Ok(())
}

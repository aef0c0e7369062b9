use std::time::Duration;

use url::Url;

use crate::error::{ClientError, Result};
use crate::reveal::PendingPolicy;

const DEFAULT_API_URL: &str = "http://127.0.0.1:8000";
const DEFAULT_API_PREFIX: &str = "/api";

/// Client configuration. Every setting has a default suitable for a server
/// running locally, so `from_env()` works with an empty environment.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the REST API.
    /// Env: `STEGOCHAT_API_URL`
    /// Default: `http://127.0.0.1:8000`
    pub api_url: Url,

    /// Path prefix prepended to every REST route.
    /// Env: `STEGOCHAT_API_PREFIX`
    /// Default: `/api`
    pub api_prefix: String,

    /// Base URL of the push channel.
    /// Env: `STEGOCHAT_WS_URL`
    /// Default: `api_url` with `http` -> `ws`, `https` -> `wss`.
    pub push_url: Url,

    /// Interval between keep-alive frames on the push channel.
    /// Env: `STEGOCHAT_KEEPALIVE_SECS`
    /// Default: 20 seconds.
    pub keepalive_interval: Duration,

    /// Per-request timeout for REST calls.
    /// Env: `STEGOCHAT_HTTP_TIMEOUT_SECS`
    /// Default: 30 seconds.
    pub request_timeout: Duration,

    /// How long to wait for a sleeping server to answer the wake-up check.
    /// Env: `STEGOCHAT_WAKE_TIMEOUT_SECS`
    /// Default: 120 seconds.
    pub wake_timeout: Duration,

    pub reconnect: ReconnectPolicy,

    /// Whether images still awaiting a verdict are blurred.
    /// Env: `STEGOCHAT_BLUR_PENDING` (true/false)
    /// Default: `true`
    pub pending_policy: PendingPolicy,
}

/// Automatic reconnection of the push channel.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    /// Env: `STEGOCHAT_RECONNECT` (true/false). Default: `true`.
    pub enabled: bool,
    pub initial_delay: Duration,
    /// Env: `STEGOCHAT_RECONNECT_MAX_SECS`. Default: 30 seconds.
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt `attempt` (0-based): doubles from
    /// `initial_delay`, capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX);
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

impl ClientConfig {
    /// Build a configuration for `api_url` with every other setting at its
    /// default.
    pub fn new(api_url: &str) -> Result<Self> {
        let api_url = parse_url(api_url)?;
        let push_url = derive_push_url(&api_url)?;
        Ok(Self {
            api_url,
            api_prefix: DEFAULT_API_PREFIX.to_string(),
            push_url,
            keepalive_interval: Duration::from_secs(20),
            request_timeout: Duration::from_secs(30),
            wake_timeout: Duration::from_secs(120),
            reconnect: ReconnectPolicy::default(),
            pending_policy: PendingPolicy::default(),
        })
    }

    /// Load from the environment. Call `dotenvy::dotenv()` first to pick up
    /// a `.env` file.
    pub fn from_env() -> Result<Self> {
        let api_url =
            std::env::var("STEGOCHAT_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.into());
        let mut config = Self::new(&api_url)?;

        if let Ok(prefix) = std::env::var("STEGOCHAT_API_PREFIX") {
            config.api_prefix = prefix;
        }
        if let Ok(ws) = std::env::var("STEGOCHAT_WS_URL") {
            config.push_url = parse_url(&ws)?;
        }
        if let Some(secs) = env_parse::<u64>("STEGOCHAT_KEEPALIVE_SECS")? {
            config.keepalive_interval = Duration::from_secs(secs.max(1));
        }
        if let Some(secs) = env_parse::<u64>("STEGOCHAT_HTTP_TIMEOUT_SECS")? {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("STEGOCHAT_WAKE_TIMEOUT_SECS")? {
            config.wake_timeout = Duration::from_secs(secs);
        }
        if let Some(enabled) = env_parse::<bool>("STEGOCHAT_RECONNECT")? {
            config.reconnect.enabled = enabled;
        }
        if let Some(secs) = env_parse::<u64>("STEGOCHAT_RECONNECT_MAX_SECS")? {
            config.reconnect.max_delay = Duration::from_secs(secs.max(1));
        }
        if let Some(blur) = env_parse::<bool>("STEGOCHAT_BLUR_PENDING")? {
            config.pending_policy = if blur {
                PendingPolicy::Blur
            } else {
                PendingPolicy::Show
            };
        }

        Ok(config)
    }

    /// Absolute URL of a REST route, e.g. `endpoint("/messages/4")`.
    pub fn endpoint(&self, path: &str) -> String {
        let base = self.api_url.as_str().trim_end_matches('/');
        let prefix = self.api_prefix.trim_matches('/');
        let path = path.trim_start_matches('/');
        if prefix.is_empty() {
            format!("{}/{}", base, path)
        } else {
            format!("{}/{}/{}", base, prefix, path)
        }
    }

    /// Absolute URL of a server-hosted image path (`/uploads/...`).
    pub fn asset_url(&self, content_path: &str) -> String {
        format!(
            "{}/{}",
            self.api_url.as_str().trim_end_matches('/'),
            content_path.trim_start_matches('/')
        )
    }
}

fn parse_url(raw: &str) -> Result<Url> {
    Url::parse(raw).map_err(|e| ClientError::Config(format!("invalid URL '{}': {}", raw, e)))
}

fn derive_push_url(api_url: &Url) -> Result<Url> {
    let mut url = api_url.clone();
    let scheme = match api_url.scheme() {
        "https" => "wss",
        "http" => "ws",
        other => other,
    }
    .to_string();
    url.set_scheme(&scheme)
        .map_err(|_| ClientError::Config(format!("cannot derive push URL from '{}'", api_url)))?;
    Ok(url)
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| ClientError::Config(format!("{}: {}", key, e))),
        Err(_) => Ok(None),
    }
}

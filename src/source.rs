//! Update Source
//!
//! Interface to the streaming service delivering transaction updates. The
//! transport itself lives outside this crate; it plugs in either through a
//! channel or as any `Stream` of updates. This module also carries the
//! connection settings and subscription filter the transport has to honour.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_stream::{Stream, StreamExt};
use tracing::{error, info, warn};

use crate::update::SubscribeUpdate;

/// Endpoint used when none is configured
pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:10000";

/// Port assumed when the endpoint URL does not name one
pub const DEFAULT_PORT: u16 = 80;

/// Interval between keep-alive pings on an idle connection
pub const KEEPALIVE_INTERVAL_SECS: u64 = 1000;

/// Time to wait for a keep-alive acknowledgement
pub const KEEPALIVE_TIMEOUT_SECS: u64 = 1;

/// Maximum number of connection attempts before giving up
pub const MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Initial backoff delay between connection attempts
pub const INITIAL_BACKOFF_MS: u64 = 100;

/// Maximum backoff delay between connection attempts
pub const MAX_BACKOFF_MS: u64 = 30000;

/// Errors raised by an update source
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Stream error: {0}")]
    Transport(String),

    #[error("Max connection attempts ({0}) exceeded")]
    MaxReconnectAttemptsExceeded(u32),
}

/// Host, port and transport security derived from an endpoint URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

impl Endpoint {
    /// Parse `http://host[:port]` or `https://host[:port]`
    pub fn parse(endpoint: &str) -> Result<Self, SourceError> {
        let (tls, rest) = if let Some(rest) = endpoint.strip_prefix("https://") {
            (true, rest)
        } else if let Some(rest) = endpoint.strip_prefix("http://") {
            (false, rest)
        } else {
            return Err(SourceError::InvalidEndpoint(format!(
                "'{endpoint}' must start with http:// or https://"
            )));
        };

        let authority = rest.split('/').next().unwrap_or_default();
        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|e| SourceError::InvalidEndpoint(format!("bad port in '{endpoint}': {e}")))?;
                (host, port)
            }
            None => (authority, DEFAULT_PORT),
        };

        if host.is_empty() {
            return Err(SourceError::InvalidEndpoint(format!("'{endpoint}' has no host")));
        }

        Ok(Self {
            host: host.to_string(),
            port,
            tls,
        })
    }

    /// `host:port` form used to dial the service
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Configuration for the connection to the streaming service
#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// Service URL, scheme selects TLS
    pub endpoint: String,
    /// Optional access token sent with every request
    pub x_token: Option<String>,
    /// Keep-alive ping interval
    pub keepalive_interval: Duration,
    /// Keep-alive acknowledgement timeout
    pub keepalive_timeout: Duration,
    /// Maximum connection attempts
    pub max_reconnect_attempts: u32,
    /// Initial backoff delay in milliseconds
    pub initial_backoff_ms: u64,
    /// Maximum backoff delay in milliseconds
    pub max_backoff_ms: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            x_token: None,
            keepalive_interval: Duration::from_secs(KEEPALIVE_INTERVAL_SECS),
            keepalive_timeout: Duration::from_secs(KEEPALIVE_TIMEOUT_SECS),
            max_reconnect_attempts: MAX_RECONNECT_ATTEMPTS,
            initial_backoff_ms: INITIAL_BACKOFF_MS,
            max_backoff_ms: MAX_BACKOFF_MS,
        }
    }
}

impl SourceConfig {
    /// Create a new config for the given endpoint
    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    /// Parsed endpoint
    pub fn endpoint(&self) -> Result<Endpoint, SourceError> {
        Endpoint::parse(&self.endpoint)
    }

    /// Calculate backoff delay for a given attempt number
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let delay_ms = self.initial_backoff_ms.saturating_mul(2u64.pow(attempt.min(10)));
        Duration::from_millis(delay_ms.min(self.max_backoff_ms))
    }
}

/// Transaction filter sent with the subscription request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionFilter {
    pub account_include: Vec<String>,
    pub account_exclude: Vec<String>,
    pub account_required: Vec<String>,
    /// `Some(false)` keeps failed transactions out of the stream
    pub failed: Option<bool>,
    /// `Some(false)` keeps vote transactions out of the stream
    pub vote: Option<bool>,
}

impl SubscriptionFilter {
    /// Successful, non-vote transactions touching `account`
    pub fn for_account(account: impl Into<String>) -> Self {
        Self {
            account_include: vec![account.into()],
            failed: Some(false),
            vote: Some(false),
            ..Default::default()
        }
    }

    /// Also deliver failed transactions
    pub fn with_failed(mut self, include: bool) -> Self {
        self.failed = if include { None } else { Some(false) };
        self
    }

    /// Also deliver vote transactions
    pub fn with_votes(mut self, include: bool) -> Self {
        self.vote = if include { None } else { Some(false) };
        self
    }
}

/// Sequential producer of stream updates
///
/// `Ok(None)` marks the end of the stream; an error is fatal to the stream.
pub trait UpdateSource: Send {
    fn next_update(&mut self) -> impl Future<Output = Result<Option<SubscribeUpdate>, SourceError>> + Send;
}

/// Source fed through a tokio channel
pub struct ChannelSource {
    receiver: mpsc::Receiver<Result<SubscribeUpdate, SourceError>>,
}

impl ChannelSource {
    /// Create a bounded channel; the sender side belongs to the transport
    pub fn channel(capacity: usize) -> (mpsc::Sender<Result<SubscribeUpdate, SourceError>>, Self) {
        let (sender, receiver) = mpsc::channel(capacity);
        (sender, Self { receiver })
    }
}

impl UpdateSource for ChannelSource {
    async fn next_update(&mut self) -> Result<Option<SubscribeUpdate>, SourceError> {
        self.receiver.recv().await.transpose()
    }
}

/// Source wrapping any stream of updates, such as a gRPC subscription
pub struct StreamSource<S> {
    stream: S,
}

impl<S> StreamSource<S> {
    pub fn new(stream: S) -> Self {
        Self { stream }
    }
}

impl<S, E> UpdateSource for StreamSource<S>
where
    S: Stream<Item = Result<SubscribeUpdate, E>> + Unpin + Send,
    E: Display + Send,
{
    async fn next_update(&mut self) -> Result<Option<SubscribeUpdate>, SourceError> {
        match self.stream.next().await {
            Some(Ok(update)) => Ok(Some(update)),
            Some(Err(e)) => Err(SourceError::Transport(e.to_string())),
            None => Ok(None),
        }
    }
}

/// Establish a connection, retrying with exponential backoff
///
/// # Arguments
/// * `config` - Endpoint and backoff settings
/// * `connect` - Dials the service once
///
/// # Returns
/// The connected value, or an error once `max_reconnect_attempts` is exhausted
pub async fn connect_with_retry<T, F, Fut>(config: &SourceConfig, mut connect: F) -> Result<T, SourceError>
where
    F: FnMut(Endpoint) -> Fut,
    Fut: Future<Output = Result<T, SourceError>>,
{
    let endpoint = config.endpoint()?;

    for attempt in 0..config.max_reconnect_attempts {
        if attempt > 0 {
            let delay = config.backoff_delay(attempt - 1);
            warn!(
                "Attempting to reconnect (attempt {}/{}), waiting {:?}",
                attempt + 1,
                config.max_reconnect_attempts,
                delay
            );
            sleep(delay).await;
        }

        info!("Connecting to {} (tls: {})", endpoint.authority(), endpoint.tls);
        match connect(endpoint.clone()).await {
            Ok(connection) => {
                info!("Successfully connected to {}", endpoint.authority());
                return Ok(connection);
            }
            Err(e) => error!("Connection attempt {} failed: {}", attempt + 1, e),
        }
    }

    Err(SourceError::MaxReconnectAttemptsExceeded(config.max_reconnect_attempts))
}

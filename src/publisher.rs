//! Record Sinks
//!
//! Receives decoded transactions and decode failures from the dispatch loop.
//! Both can be handed to an in-process channel, or published as JSON on a
//! Redis pub/sub channel.

use std::time::{SystemTime, UNIX_EPOCH};

use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::decoder::{DecodeError, DecodedTransaction, TransactionRecord};

/// Default Redis channel for publishing decoded transactions
pub const DEFAULT_CHANNEL: &str = "solana_transactions";

/// Errors that can occur while delivering a record
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Redis connection error: {0}")]
    Connection(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Sink channel closed")]
    Closed,
}

/// Outcome of one update as seen by a channel consumer
pub type SinkItem = Result<DecodedTransaction, DecodeError>;

/// Consumer of decoded transactions
///
/// Called concurrently from decode tasks, so implementations only get `&self`.
pub trait RecordSink: Send + Sync + 'static {
    /// Hand over a decoded transaction
    fn deliver(&self, decoded: DecodedTransaction) -> Result<(), SinkError>;

    /// Hand over an update that could not be decoded at all
    fn rejected(&self, error: &DecodeError) -> Result<(), SinkError>;
}

/// Sink forwarding into an unbounded tokio channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<SinkItem>,
}

impl ChannelSink {
    /// Create the sink and the receiving end for the consumer
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SinkItem>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl RecordSink for ChannelSink {
    fn deliver(&self, decoded: DecodedTransaction) -> Result<(), SinkError> {
        self.sender.send(Ok(decoded)).map_err(|_| SinkError::Closed)
    }

    fn rejected(&self, error: &DecodeError) -> Result<(), SinkError> {
        self.sender.send(Err(error.clone())).map_err(|_| SinkError::Closed)
    }
}

/// Record format for Redis publication
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RecordMessage {
    #[serde(flatten)]
    pub record: TransactionRecord,
    /// Entries skipped while decoding, human readable
    #[serde(default)]
    pub warnings: Vec<String>,
    /// Unix timestamp in milliseconds when the record was published
    pub timestamp: u64,
}

impl RecordMessage {
    /// Create a new RecordMessage from a decoded transaction
    pub fn from_decoded(decoded: DecodedTransaction) -> Self {
        Self {
            warnings: decoded.warnings.iter().map(ToString::to_string).collect(),
            record: decoded.record,
            timestamp: current_timestamp_millis(),
        }
    }

    /// Serialize the message to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize a message from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Format for updates that produced no record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RejectionMessage {
    pub slot: u64,
    /// Human readable decode error
    pub error: String,
    /// Unix timestamp in milliseconds when the rejection was published
    pub timestamp: u64,
}

impl RejectionMessage {
    pub fn from_error(error: &DecodeError) -> Self {
        Self {
            slot: error.slot(),
            error: error.to_string(),
            timestamp: current_timestamp_millis(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Get current timestamp in milliseconds
pub fn current_timestamp_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Redis publisher for decoded transactions
pub struct Publisher {
    connection: MultiplexedConnection,
    channel: String,
}

impl Publisher {
    /// Create a new publisher with a Redis connection
    ///
    /// # Arguments
    /// * `connection` - An established Redis multiplexed connection
    /// * `channel` - The pub/sub channel name to publish to
    pub fn new(connection: MultiplexedConnection, channel: impl Into<String>) -> Self {
        Self {
            connection,
            channel: channel.into(),
        }
    }

    /// Create a new publisher with the default channel
    pub fn with_default_channel(connection: MultiplexedConnection) -> Self {
        Self::new(connection, DEFAULT_CHANNEL)
    }

    /// Open a connection to `redis_url` and publish on `channel`
    pub async fn connect(redis_url: &str, channel: impl Into<String>) -> Result<Self, SinkError> {
        let client = redis::Client::open(redis_url)?;
        let connection = client.get_multiplexed_async_connection().await?;
        Ok(Self::new(connection, channel))
    }

    /// Publish a decoded transaction
    ///
    /// # Returns
    /// The number of subscribers that received the message
    pub async fn publish(&mut self, decoded: DecodedTransaction) -> Result<i64, SinkError> {
        self.publish_message(&RecordMessage::from_decoded(decoded)).await
    }

    /// Publish a pre-formatted message
    pub async fn publish_message(&mut self, message: &RecordMessage) -> Result<i64, SinkError> {
        let json = message.to_json()?;
        let subscribers: i64 = self.connection.publish(&self.channel, &json).await?;
        Ok(subscribers)
    }

    /// Publish a decode failure so subscribers see the update was dropped
    pub async fn publish_rejection(&mut self, error: &DecodeError) -> Result<i64, SinkError> {
        let json = RejectionMessage::from_error(error).to_json()?;
        let subscribers: i64 = self.connection.publish(&self.channel, &json).await?;
        Ok(subscribers)
    }

    /// Publish everything arriving on `receiver` until the channel closes
    ///
    /// Records and rejections share the channel. Failed publishes are logged
    /// and do not stop the loop.
    ///
    /// # Returns
    /// The number of messages published successfully
    pub async fn drain(mut self, mut receiver: mpsc::UnboundedReceiver<SinkItem>) -> u64 {
        let mut published = 0;
        while let Some(item) = receiver.recv().await {
            match item {
                Ok(decoded) => {
                    let signature = decoded.record.signature.clone();
                    match self.publish(decoded).await {
                        Ok(subscribers) => {
                            published += 1;
                            debug!(%signature, subscribers, "Published transaction");
                        }
                        Err(e) => error!(%signature, "Failed to publish transaction: {}", e),
                    }
                }
                Err(rejection) => match self.publish_rejection(&rejection).await {
                    Ok(subscribers) => {
                        published += 1;
                        debug!(slot = rejection.slot(), subscribers, "Published rejection");
                    }
                    Err(e) => error!(slot = rejection.slot(), "Failed to publish rejection: {}", e),
                },
            }
        }
        info!("Publisher on '{}' stopped after {} messages", self.channel, published);
        published
    }

    /// Get the channel name
    pub fn channel(&self) -> &str {
        &self.channel
    }
}

//! TxStream Decoder Library
//!
//! This crate decodes Solana transaction updates received from a streaming
//! service into fully resolved records (account permissions, instruction tree,
//! balance changes and logs) and hands them to a sink such as Redis.

pub mod accounts;
pub mod balances;
pub mod config;
pub mod decoder;
pub mod instructions;
pub mod logging;
pub mod pipeline;
pub mod publisher;
pub mod source;
pub mod update;

// Re-export commonly used types
pub use accounts::{AccountReference, AccountTable};
pub use decoder::{decode_transaction, decode_update, DecodeError, DecodedTransaction, TransactionRecord};
pub use pipeline::{Pipeline, PipelineStats};
pub use publisher::{ChannelSink, Publisher, RecordSink, SinkItem};
pub use source::{ChannelSource, StreamSource, SubscriptionFilter, UpdateSource};

//! Transaction Decoder
//!
//! Turns one stream update into a self-contained [`TransactionRecord`]: resolves
//! the account table, extracts balance changes and rebuilds the instruction tree.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::accounts::AccountTable;
use crate::balances::{extract_balance_changes, BalanceChange, BalanceTableMismatch};
use crate::instructions::{InstructionRecord, InstructionTreeBuilder, InvalidIndex};
use crate::update::{SubscribeUpdate, TokenBalance, TransactionMeta, TransactionUpdate};

/// Errors that abort decoding of a single update
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Update at slot {slot} carries no {missing}")]
    MissingTransaction { slot: u64, missing: &'static str },
}

impl DecodeError {
    /// Slot of the update that failed
    pub fn slot(&self) -> u64 {
        match self {
            DecodeError::MissingTransaction { slot, .. } => *slot,
        }
    }
}

/// Recoverable problems found while decoding; the record is still produced
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeWarning {
    #[error(transparent)]
    InvalidIndex(#[from] InvalidIndex),

    #[error(transparent)]
    BalanceTableMismatch(#[from] BalanceTableMismatch),
}

/// Token balances before and after execution, passed through untouched
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenBalanceSnapshot {
    pub pre: Vec<TokenBalance>,
    pub post: Vec<TokenBalance>,
}

/// Fully resolved transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    /// Base-58 encoded first signature
    pub signature: String,
    pub slot: u64,
    /// Lamports charged to the fee payer
    pub fee: u64,
    pub compute_units_consumed: u64,
    pub instructions: Vec<InstructionRecord>,
    pub balance_changes: Vec<BalanceChange>,
    pub token_balances: TokenBalanceSnapshot,
    pub logs: Vec<String>,
}

/// A decoded record together with everything that had to be skipped
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedTransaction {
    pub record: TransactionRecord,
    pub warnings: Vec<DecodeWarning>,
}

impl DecodedTransaction {
    /// True when nothing was skipped while decoding
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// Decode a raw stream update
///
/// # Returns
/// * `Ok(None)` for updates that are not transactions or carry no signature
///   (keep-alive traffic)
/// * `Ok(Some(_))` with the record and any recoverable warnings
/// * `Err(DecodeError)` when the transaction or its message is missing
pub fn decode_update(update: &SubscribeUpdate) -> Result<Option<DecodedTransaction>, DecodeError> {
    match update.as_transaction() {
        Some(tx) => decode_transaction(tx),
        None => Ok(None),
    }
}

/// Decode a transaction update
#[instrument(level = "debug", skip_all, fields(slot = update.slot))]
pub fn decode_transaction(update: &TransactionUpdate) -> Result<Option<DecodedTransaction>, DecodeError> {
    let slot = update.slot;
    let info = update.transaction.as_ref().ok_or(DecodeError::MissingTransaction {
        slot,
        missing: "transaction",
    })?;

    if info.signature.is_empty() {
        debug!(slot, "Skipping update without signature");
        return Ok(None);
    }

    let message = info.message.as_ref().ok_or(DecodeError::MissingTransaction {
        slot,
        missing: "message",
    })?;

    let default_meta = TransactionMeta::default();
    let meta = info.meta.as_ref().unwrap_or(&default_meta);
    let signature = bs58::encode(&info.signature).into_string();

    let table = AccountTable::build(
        &message.account_keys,
        &message.header,
        &meta.loaded_writable_addresses,
        &meta.loaded_readonly_addresses,
    );

    let mut warnings = Vec::new();

    let balance_changes = match extract_balance_changes(&table, &meta.pre_balances, &meta.post_balances) {
        Ok(changes) => changes,
        Err(mismatch) => {
            warn!(%signature, slot, "Dropping balance changes: {}", mismatch);
            warnings.push(DecodeWarning::from(mismatch));
            Vec::new()
        }
    };

    let (instructions, invalid) = InstructionTreeBuilder::new(&table).build(&message.instructions, meta);
    warnings.extend(invalid.into_iter().map(DecodeWarning::from));

    debug!(
        %signature,
        slot,
        accounts = table.len(),
        instructions = instructions.len(),
        warnings = warnings.len(),
        "Decoded transaction"
    );

    let record = TransactionRecord {
        signature,
        slot,
        fee: meta.fee,
        compute_units_consumed: meta.compute_units_consumed.unwrap_or_default(),
        instructions,
        balance_changes,
        token_balances: TokenBalanceSnapshot {
            pre: meta.pre_token_balances.clone(),
            post: meta.post_token_balances.clone(),
        },
        logs: meta.log_messages.clone(),
    };

    Ok(Some(DecodedTransaction { record, warnings }))
}

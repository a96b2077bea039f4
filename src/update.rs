//! Stream Update Model
//!
//! Owned mirror of the updates delivered by the streaming service. A transport
//! crate converts its wire types into these before handing them to the decoder,
//! which keeps the decode pipeline free of any gRPC or protobuf dependency.

use serde::{Deserialize, Serialize};

/// One message received from the update stream
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeUpdate {
    /// Names of the subscription filters this update matched
    #[serde(default)]
    pub filters: Vec<String>,
    /// Payload, absent for keep-alive traffic
    pub update: Option<UpdateKind>,
}

impl SubscribeUpdate {
    /// Wrap a transaction update
    pub fn transaction(update: TransactionUpdate) -> Self {
        Self {
            filters: Vec::new(),
            update: Some(UpdateKind::Transaction(update)),
        }
    }

    /// A keep-alive ping
    pub fn ping() -> Self {
        Self {
            filters: Vec::new(),
            update: Some(UpdateKind::Ping),
        }
    }

    /// Returns the transaction payload, if this is a transaction update
    pub fn as_transaction(&self) -> Option<&TransactionUpdate> {
        match &self.update {
            Some(UpdateKind::Transaction(tx)) => Some(tx),
            _ => None,
        }
    }
}

/// Payload variants carried on the stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UpdateKind {
    Transaction(TransactionUpdate),
    Slot { slot: u64, parent: Option<u64> },
    Ping,
}

/// A transaction seen at a given slot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionUpdate {
    pub slot: u64,
    pub transaction: Option<TransactionInfo>,
}

/// Signature, message and execution metadata of one transaction
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionInfo {
    /// First signature, raw bytes; empty when the stream omitted it
    #[serde(default)]
    pub signature: Vec<u8>,
    pub message: Option<Message>,
    pub meta: Option<TransactionMeta>,
}

/// Compiled transaction message
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(default)]
    pub header: MessageHeader,
    #[serde(default)]
    pub account_keys: Vec<Vec<u8>>,
    #[serde(default)]
    pub instructions: Vec<CompiledInstruction>,
}

/// Positional counts describing how static account keys are classified
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageHeader {
    pub num_required_signatures: u32,
    pub num_readonly_signed_accounts: u32,
    pub num_readonly_unsigned_accounts: u32,
}

/// Instruction whose program and accounts are indices into the merged table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompiledInstruction {
    pub program_id_index: u32,
    #[serde(default)]
    pub accounts: Vec<u32>,
    #[serde(default)]
    pub data: Vec<u8>,
}

/// Inner instructions emitted by the top-level instruction at `index`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InnerInstructions {
    pub index: u32,
    #[serde(default)]
    pub instructions: Vec<InnerInstruction>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InnerInstruction {
    pub program_id_index: u32,
    #[serde(default)]
    pub accounts: Vec<u32>,
    #[serde(default)]
    pub data: Vec<u8>,
    pub stack_height: Option<u32>,
}

/// Execution metadata attached by the validator
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransactionMeta {
    pub fee: u64,
    pub compute_units_consumed: Option<u64>,
    pub log_messages: Vec<String>,
    pub pre_balances: Vec<u64>,
    pub post_balances: Vec<u64>,
    pub pre_token_balances: Vec<TokenBalance>,
    pub post_token_balances: Vec<TokenBalance>,
    pub loaded_writable_addresses: Vec<Vec<u8>>,
    pub loaded_readonly_addresses: Vec<Vec<u8>>,
    pub inner_instructions: Vec<InnerInstructions>,
}

impl TransactionMeta {
    /// Inner instructions recorded for the top-level instruction at `index`
    pub fn inner_instructions_for(&self, index: u32) -> &[InnerInstruction] {
        self.inner_instructions
            .iter()
            .find(|group| group.index == index)
            .map(|group| group.instructions.as_slice())
            .unwrap_or(&[])
    }
}

/// SPL token balance snapshot, carried through without interpretation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TokenBalance {
    pub account_index: u32,
    pub mint: String,
    pub owner: String,
    pub program_id: String,
    pub ui_token_amount: Option<UiTokenAmount>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UiTokenAmount {
    pub ui_amount: f64,
    pub decimals: u32,
    pub amount: String,
    pub ui_amount_string: String,
}

//! Instruction Tree Builder
//!
//! Resolves top-level instructions and their inner instructions against the
//! merged account table. Indices that fall outside the table never abort the
//! transaction: the offending instruction or account is left out and reported.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::accounts::{AccountReference, AccountTable};
use crate::update::{CompiledInstruction, InnerInstruction, TransactionMeta};

/// A resolved top-level instruction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstructionRecord {
    /// 1-based position in the message
    pub index: usize,
    pub program_id: AccountReference,
    #[serde(with = "base58_bytes")]
    pub data: Vec<u8>,
    pub accounts: Vec<AccountReference>,
    pub inner_instructions: Vec<InnerInstructionRecord>,
}

/// A resolved inner instruction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InnerInstructionRecord {
    /// 1-based position of the parent top-level instruction
    pub outer_index: usize,
    /// 1-based position within the parent's inner instructions
    pub inner_index: usize,
    pub program_id: AccountReference,
    #[serde(with = "base58_bytes")]
    pub data: Vec<u8>,
    pub accounts: Vec<AccountReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_height: Option<u32>,
}

/// Where an instruction sits in the tree, 1-based
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstructionLocation {
    pub outer: usize,
    pub inner: Option<usize>,
}

impl fmt::Display for InstructionLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner {
            Some(inner) => write!(f, "inner instruction {}.{}", self.outer, inner),
            None => write!(f, "instruction {}", self.outer),
        }
    }
}

/// An index that points past the end of the merged account table
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidIndex {
    #[error("{location}: program id index {index} out of range for {table_len} accounts")]
    ProgramId {
        location: InstructionLocation,
        index: u32,
        table_len: usize,
    },

    #[error("{location}: account index {index} at position {position} out of range for {table_len} accounts")]
    Account {
        location: InstructionLocation,
        position: usize,
        index: u32,
        table_len: usize,
    },
}

/// Resolves instructions of one transaction against its account table
pub struct InstructionTreeBuilder<'a> {
    table: &'a AccountTable,
    issues: Vec<InvalidIndex>,
}

impl<'a> InstructionTreeBuilder<'a> {
    pub fn new(table: &'a AccountTable) -> Self {
        Self {
            table,
            issues: Vec::new(),
        }
    }

    /// Build the instruction tree
    ///
    /// # Arguments
    /// * `instructions` - Top-level instructions of the message, in order
    /// * `meta` - Execution metadata holding the inner instructions
    ///
    /// # Returns
    /// The resolved instructions and every index that had to be skipped
    pub fn build(
        mut self,
        instructions: &[CompiledInstruction],
        meta: &TransactionMeta,
    ) -> (Vec<InstructionRecord>, Vec<InvalidIndex>) {
        let mut records = Vec::with_capacity(instructions.len());

        for (position, instruction) in instructions.iter().enumerate() {
            let location = InstructionLocation {
                outer: position + 1,
                inner: None,
            };

            let Some(program_id) = self.program_id(location, instruction.program_id_index) else {
                continue;
            };
            let accounts = self.accounts(location, &instruction.accounts);
            let inner_instructions = self.inner_instructions(position, meta);

            records.push(InstructionRecord {
                index: location.outer,
                program_id,
                data: instruction.data.clone(),
                accounts,
                inner_instructions,
            });
        }

        (records, self.issues)
    }

    fn inner_instructions(&mut self, position: usize, meta: &TransactionMeta) -> Vec<InnerInstructionRecord> {
        // A position beyond u32 cannot have a recorded group
        let Ok(outer) = u32::try_from(position) else {
            return Vec::new();
        };

        meta.inner_instructions_for(outer)
            .iter()
            .enumerate()
            .filter_map(|(inner_position, inner)| self.inner_instruction(position, inner_position, inner))
            .collect()
    }

    fn inner_instruction(
        &mut self,
        position: usize,
        inner_position: usize,
        inner: &InnerInstruction,
    ) -> Option<InnerInstructionRecord> {
        let location = InstructionLocation {
            outer: position + 1,
            inner: Some(inner_position + 1),
        };

        let program_id = self.program_id(location, inner.program_id_index)?;
        let accounts = self.accounts(location, &inner.accounts);

        Some(InnerInstructionRecord {
            outer_index: location.outer,
            inner_index: inner_position + 1,
            program_id,
            data: inner.data.clone(),
            accounts,
            stack_height: inner.stack_height,
        })
    }

    fn program_id(&mut self, location: InstructionLocation, index: u32) -> Option<AccountReference> {
        match self.table.resolve(index) {
            Some(account) => Some(account.clone()),
            None => {
                self.report(InvalidIndex::ProgramId {
                    location,
                    index,
                    table_len: self.table.len(),
                });
                None
            }
        }
    }

    fn accounts(&mut self, location: InstructionLocation, indices: &[u32]) -> Vec<AccountReference> {
        let mut accounts = Vec::with_capacity(indices.len());
        for (position, index) in indices.iter().enumerate() {
            match self.table.resolve(*index) {
                Some(account) => accounts.push(account.clone()),
                None => self.report(InvalidIndex::Account {
                    location,
                    position,
                    index: *index,
                    table_len: self.table.len(),
                }),
            }
        }
        accounts
    }

    fn report(&mut self, issue: InvalidIndex) {
        warn!("Skipping unresolvable index: {}", issue);
        self.issues.push(issue);
    }
}

/// Serialize opaque instruction payloads as base-58 text
mod base58_bytes {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&bs58::encode(bytes).into_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        bs58::decode(&text).into_vec().map_err(de::Error::custom)
    }
}

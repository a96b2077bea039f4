//! Account Resolution
//!
//! Builds the merged account table of a transaction (static keys, then
//! addresses loaded from lookup tables) and classifies every address with its
//! permission flags.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::update::MessageHeader;

/// An account as referenced from within a transaction, with its permissions
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountReference {
    /// Base-58 encoded public key
    pub pubkey: String,
    pub is_writable: bool,
    pub is_readable: bool,
    pub is_signer: bool,
    /// Address was pulled in through an address lookup table
    pub is_loaded_via_table: bool,
}

impl AccountReference {
    fn new(pubkey: String) -> Self {
        Self {
            pubkey,
            ..Default::default()
        }
    }
}

/// Positional class of a static account key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaticClass {
    WritableSigner,
    ReadonlySigner,
    Writable,
    Readonly,
}

impl StaticClass {
    /// Classify the static account at `position` among `total` keys
    ///
    /// Boundaries saturate when the header counts exceed `total`, so every
    /// position falls into exactly one class.
    pub fn of(position: usize, total: usize, header: &MessageHeader) -> Self {
        let signers = header.num_required_signatures as usize;
        let readonly_signers = header.num_readonly_signed_accounts as usize;
        let readonly_unsigned = header.num_readonly_unsigned_accounts as usize;

        if position < signers {
            StaticClass::WritableSigner
        } else if position < signers.saturating_add(readonly_signers) {
            StaticClass::ReadonlySigner
        } else if position < total.saturating_sub(readonly_unsigned) {
            StaticClass::Writable
        } else {
            StaticClass::Readonly
        }
    }

    fn apply(self, account: &mut AccountReference) {
        match self {
            StaticClass::WritableSigner => {
                account.is_writable = true;
                account.is_signer = true;
            }
            StaticClass::ReadonlySigner => {
                account.is_readable = true;
                account.is_signer = true;
            }
            StaticClass::Writable => account.is_writable = true,
            StaticClass::Readonly => account.is_readable = true,
        }
    }
}

/// Base-58 rendering used as the account identity everywhere
pub fn encode_pubkey(key: &[u8]) -> String {
    bs58::encode(key).into_string()
}

/// Merged account table of one transaction plus the permission of each address
#[derive(Debug, Clone, Default)]
pub struct AccountTable {
    /// Static keys, then loaded writable, then loaded readonly
    merged: Vec<String>,
    static_len: usize,
    permissions: HashMap<String, AccountReference>,
}

impl AccountTable {
    /// Resolve the accounts of one transaction
    ///
    /// # Arguments
    /// * `account_keys` - Static keys listed in the message
    /// * `header` - Signature and readonly counts of the message
    /// * `loaded_writable` - Writable addresses loaded from lookup tables
    /// * `loaded_readonly` - Readonly addresses loaded from lookup tables
    pub fn build(
        account_keys: &[Vec<u8>],
        header: &MessageHeader,
        loaded_writable: &[Vec<u8>],
        loaded_readonly: &[Vec<u8>],
    ) -> Self {
        let total = account_keys.len();
        let mut merged = Vec::with_capacity(total + loaded_writable.len() + loaded_readonly.len());
        let mut permissions = HashMap::with_capacity(merged.capacity());

        for (position, key) in account_keys.iter().enumerate() {
            let pubkey = encode_pubkey(key);
            let mut account = AccountReference::new(pubkey.clone());
            StaticClass::of(position, total, header).apply(&mut account);
            // A duplicated static key takes the classification of its last position
            permissions.insert(pubkey.clone(), account);
            merged.push(pubkey);
        }

        let writable: Vec<String> = loaded_writable.iter().map(|k| encode_pubkey(k)).collect();
        let readonly: Vec<String> = loaded_readonly.iter().map(|k| encode_pubkey(k)).collect();

        for pubkey in &writable {
            let account = permissions
                .entry(pubkey.clone())
                .or_insert_with(|| AccountReference::new(pubkey.clone()));
            account.is_writable = true;
            account.is_loaded_via_table = true;
        }
        for pubkey in &readonly {
            let account = permissions
                .entry(pubkey.clone())
                .or_insert_with(|| AccountReference::new(pubkey.clone()));
            account.is_readable = true;
            account.is_loaded_via_table = true;
        }

        merged.extend(writable);
        merged.extend(readonly);

        Self {
            merged,
            static_len: total,
            permissions,
        }
    }

    /// Number of entries in the merged table
    pub fn len(&self) -> usize {
        self.merged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.merged.is_empty()
    }

    /// Number of static keys at the front of the merged table
    pub fn static_len(&self) -> usize {
        self.static_len
    }

    /// Merged table in resolution order
    pub fn merged(&self) -> &[String] {
        &self.merged
    }

    /// Final permissions of an address, if it belongs to this transaction
    pub fn lookup(&self, pubkey: &str) -> Option<&AccountReference> {
        self.permissions.get(pubkey)
    }

    /// Resolve a merged-table index, `None` when out of range
    pub fn resolve(&self, index: u32) -> Option<&AccountReference> {
        let pubkey = self.merged.get(index as usize)?;
        self.permissions.get(pubkey)
    }

    /// Static accounts in positional order, with their final permissions
    pub fn static_accounts(&self) -> impl Iterator<Item = &AccountReference> + '_ {
        self.merged[..self.static_len]
            .iter()
            .filter_map(|pubkey| self.permissions.get(pubkey))
    }
}

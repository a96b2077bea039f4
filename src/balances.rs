//! Native balance changes
//!
//! Pairs static accounts positionally with the pre/post lamport tables.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::accounts::{AccountReference, AccountTable};

/// Lamport balance of one static account before and after execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceChange {
    pub account: AccountReference,
    pub before: u64,
    pub after: u64,
}

impl BalanceChange {
    /// Signed lamport difference
    pub fn delta(&self) -> i128 {
        i128::from(self.after) - i128::from(self.before)
    }
}

/// A balance table does not line up with the static account keys
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("balance tables do not match {accounts} static accounts (pre: {pre}, post: {post})")]
pub struct BalanceTableMismatch {
    pub accounts: usize,
    pub pre: usize,
    pub post: usize,
}

/// Build one balance change per static account, in positional order
pub fn extract_balance_changes(
    table: &AccountTable,
    pre_balances: &[u64],
    post_balances: &[u64],
) -> Result<Vec<BalanceChange>, BalanceTableMismatch> {
    let accounts = table.static_len();
    if pre_balances.len() != accounts || post_balances.len() != accounts {
        return Err(BalanceTableMismatch {
            accounts,
            pre: pre_balances.len(),
            post: post_balances.len(),
        });
    }

    Ok(table
        .static_accounts()
        .zip(pre_balances.iter().zip(post_balances))
        .map(|(account, (before, after))| BalanceChange {
            account: account.clone(),
            before: *before,
            after: *after,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::update::MessageHeader;

    fn table(keys: u8) -> AccountTable {
        let keys: Vec<Vec<u8>> = (1..=keys).map(|b| vec![b; 32]).collect();
        let header = MessageHeader {
            num_required_signatures: 1,
            num_readonly_signed_accounts: 0,
            num_readonly_unsigned_accounts: 1,
        };
        AccountTable::build(&keys, &header, &[], &[])
    }

    #[test]
    fn test_changes_follow_account_order() {
        let table = table(3);
        let changes = extract_balance_changes(&table, &[100, 200, 300], &[90, 200, 310]).unwrap();

        assert_eq!(changes.len(), 3);
        assert_eq!((changes[0].before, changes[0].after), (100, 90));
        assert_eq!((changes[1].before, changes[1].after), (200, 200));
        assert_eq!((changes[2].before, changes[2].after), (300, 310));
        assert_eq!(changes[0].account.pubkey, table.merged()[0]);
        assert_eq!(changes[2].account.pubkey, table.merged()[2]);
    }

    #[test]
    fn test_changes_reuse_resolved_permissions() {
        let table = table(3);
        let changes = extract_balance_changes(&table, &[1, 2, 3], &[1, 2, 3]).unwrap();

        assert!(changes[0].account.is_signer && changes[0].account.is_writable);
        assert!(changes[1].account.is_writable && !changes[1].account.is_signer);
        assert!(changes[2].account.is_readable);
    }

    #[test]
    fn test_delta() {
        let table = table(2);
        let changes = extract_balance_changes(&table, &[100, 0], &[90, u64::MAX]).unwrap();
        assert_eq!(changes[0].delta(), -10);
        assert_eq!(changes[1].delta(), i128::from(u64::MAX));
    }

    #[test]
    fn test_short_pre_table_is_mismatch() {
        let err = extract_balance_changes(&table(3), &[1, 2], &[1, 2, 3]).unwrap_err();
        assert_eq!(err, BalanceTableMismatch { accounts: 3, pre: 2, post: 3 });
    }

    #[test]
    fn test_long_post_table_is_mismatch() {
        let err = extract_balance_changes(&table(2), &[1, 2], &[1, 2, 3]).unwrap_err();
        assert_eq!(err.post, 3);
    }

    #[test]
    fn test_empty_tables_for_no_accounts() {
        let changes = extract_balance_changes(&table(0), &[], &[]).unwrap();
        assert!(changes.is_empty());
    }
}

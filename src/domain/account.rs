use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A ledger account. The balance is kept in the smallest denomination of the
/// account's currency and is only ever changed through
/// [`LedgerStore::add_account_balance`](crate::domain::traits::LedgerStore::add_account_balance),
/// never by assigning over a stale read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub owner: String,
    pub balance: i64,
    pub currency: String,
    pub created_at: DateTime<Utc>,
}

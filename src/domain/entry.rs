use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One signed balance delta posted against one account. Entries are
/// append-only: once written they are never updated or deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub id: i64,
    pub account_id: i64,
    /// Can be negative (money leaving the account).
    pub amount: i64,
    pub created_at: DateTime<Utc>,
}

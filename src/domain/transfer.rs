use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A logical money movement between two accounts, always backed by exactly
/// two offsetting entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub id: i64,
    pub from_account_id: i64,
    pub to_account_id: i64,
    /// Always positive; the direction lives in the account ids.
    pub amount: i64,
    pub created_at: DateTime<Utc>,
}

use async_trait::async_trait;

use crate::domain::{Account, Entry, Error, Transfer};

/// The operation set shared by the top-level store and a transaction-scoped
/// handle. Every operation is individually atomic at the storage engine;
/// `add_account_balance` in particular is a single read-modify-write that
/// takes the account's row lock for the duration of the statement.
#[async_trait]
pub trait LedgerStore: Send {
    async fn create_transfer(
        &mut self,
        from_account_id: i64,
        to_account_id: i64,
        amount: i64,
    ) -> Result<Transfer, Error>;

    async fn create_entry(&mut self, account_id: i64, amount: i64) -> Result<Entry, Error>;

    /// Adds `delta` to the account's balance and returns the updated row.
    async fn add_account_balance(&mut self, account_id: i64, delta: i64)
    -> Result<Account, Error>;

    async fn get_account(&self, account_id: i64) -> Result<Account, Error>;
}

/// A live storage-engine transaction. Writes made through the `LedgerStore`
/// surface are invisible to other transactions until `commit`; dropping the
/// handle without committing must leave no visible trace.
#[async_trait]
pub trait TxHandle: LedgerStore + Send + Sized {
    async fn commit(self) -> Result<(), Error>;
    async fn rollback(self) -> Result<(), Error>;
}

/// A storage engine offering ACID transactions over the ledger rows.
#[async_trait]
pub trait StorageEngine: Send + Sync {
    type Tx: TxHandle;

    async fn begin(&self) -> Result<Self::Tx, Error>;
}

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tokio::time::timeout;
use tracing::debug;

use crate::domain::{Account, Entry, Error, LedgerStore, StorageEngine, Transfer, TxHandle};

/// How long a transaction waits for another transaction's row lock before
/// the wait is reported as a concurrency conflict, the way a relational
/// engine's deadlock detector would rather than blocking forever.
const LOCK_WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// An in-memory storage engine with strict two-phase locking per account
/// row. Balance updates take the row lock and hold it until commit or
/// rollback; transfer and entry rows are staged inside the transaction and
/// published atomically at commit. Committed reads never block on a held
/// row lock.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    accounts: RwLock<HashMap<i64, Arc<AccountRow>>>,
    transfers: RwLock<HashMap<i64, Transfer>>,
    entries: RwLock<HashMap<i64, Entry>>,
    account_seq: Sequence,
    transfer_seq: Sequence,
    entry_seq: Sequence,
}

#[derive(Debug)]
struct AccountRow {
    /// The row write lock. Held from the first balance update until the
    /// owning transaction commits or rolls back.
    lock: Arc<Mutex<()>>,
    /// Last committed value. Readers see this regardless of who holds the
    /// row lock.
    committed: RwLock<Account>,
}

/// Monotonically increasing, never-reused ids starting at 1. Ids handed to a
/// transaction that later rolls back are simply skipped, like a database
/// sequence.
#[derive(Debug)]
struct Sequence(AtomicI64);

impl Default for Sequence {
    fn default() -> Self {
        Self(AtomicI64::new(1))
    }
}

impl Sequence {
    fn next(&self) -> i64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an account with the given opening balance and returns it.
    pub async fn create_account(
        &self,
        owner: impl Into<String>,
        currency: impl Into<String>,
        balance: i64,
    ) -> Account {
        let account = Account {
            id: self.inner.account_seq.next(),
            owner: owner.into(),
            balance,
            currency: currency.into(),
            created_at: Utc::now(),
        };
        let row = Arc::new(AccountRow {
            lock: Arc::new(Mutex::new(())),
            committed: RwLock::new(account.clone()),
        });
        self.inner.accounts.write().await.insert(account.id, row);
        account
    }

    /// Last committed state of the account.
    pub async fn get_account(&self, account_id: i64) -> Result<Account, Error> {
        let row = self.inner.row(account_id).await?;
        let account = row.committed.read().await.clone();
        Ok(account)
    }

    pub async fn get_transfer(&self, transfer_id: i64) -> Option<Transfer> {
        self.inner.transfers.read().await.get(&transfer_id).cloned()
    }

    pub async fn get_entry(&self, entry_id: i64) -> Option<Entry> {
        self.inner.entries.read().await.get(&entry_id).cloned()
    }

    /// Committed transfers between the given pair, any amount, unordered.
    pub async fn list_transfers(&self, from_account_id: i64, to_account_id: i64) -> Vec<Transfer> {
        self.inner
            .transfers
            .read()
            .await
            .values()
            .filter(|t| t.from_account_id == from_account_id && t.to_account_id == to_account_id)
            .cloned()
            .collect()
    }

    /// Committed entries posted against the given account.
    pub async fn list_entries(&self, account_id: i64) -> Vec<Entry> {
        self.inner
            .entries
            .read()
            .await
            .values()
            .filter(|e| e.account_id == account_id)
            .cloned()
            .collect()
    }
}

/// The top-level store offers the same operation set as a transaction
/// handle, each call delegating to a single-operation transaction
/// (autocommit).
#[async_trait]
impl LedgerStore for MemoryStore {
    async fn create_transfer(
        &mut self,
        from_account_id: i64,
        to_account_id: i64,
        amount: i64,
    ) -> Result<Transfer, Error> {
        let mut tx = self.begin().await?;
        let transfer = tx
            .create_transfer(from_account_id, to_account_id, amount)
            .await?;
        tx.commit().await?;
        Ok(transfer)
    }

    async fn create_entry(&mut self, account_id: i64, amount: i64) -> Result<Entry, Error> {
        let mut tx = self.begin().await?;
        let entry = tx.create_entry(account_id, amount).await?;
        tx.commit().await?;
        Ok(entry)
    }

    async fn add_account_balance(
        &mut self,
        account_id: i64,
        delta: i64,
    ) -> Result<Account, Error> {
        let mut tx = self.begin().await?;
        let account = tx.add_account_balance(account_id, delta).await?;
        tx.commit().await?;
        Ok(account)
    }

    async fn get_account(&self, account_id: i64) -> Result<Account, Error> {
        MemoryStore::get_account(self, account_id).await
    }
}

impl Inner {
    async fn row(&self, account_id: i64) -> Result<Arc<AccountRow>, Error> {
        self.accounts
            .read()
            .await
            .get(&account_id)
            .cloned()
            .ok_or(Error::AccountNotFound(account_id))
    }
}

#[async_trait]
impl StorageEngine for MemoryStore {
    type Tx = MemoryTx;

    async fn begin(&self) -> Result<MemoryTx, Error> {
        Ok(MemoryTx {
            inner: Arc::clone(&self.inner),
            held: HashMap::new(),
            staged_transfers: Vec::new(),
            staged_entries: Vec::new(),
        })
    }
}

/// One open transaction against a [`MemoryStore`].
pub struct MemoryTx {
    inner: Arc<Inner>,
    held: HashMap<i64, HeldRow>,
    staged_transfers: Vec<Transfer>,
    staged_entries: Vec<Entry>,
}

struct HeldRow {
    row: Arc<AccountRow>,
    /// Keeps the row lock until the transaction ends.
    _guard: OwnedMutexGuard<()>,
    pending: Account,
}

impl MemoryTx {
    async fn ensure_account(&self, account_id: i64) -> Result<(), Error> {
        if self.held.contains_key(&account_id) {
            return Ok(());
        }
        self.inner.row(account_id).await.map(|_| ())
    }
}

#[async_trait]
impl LedgerStore for MemoryTx {
    async fn create_transfer(
        &mut self,
        from_account_id: i64,
        to_account_id: i64,
        amount: i64,
    ) -> Result<Transfer, Error> {
        // Referential check, standing in for the foreign keys the relational
        // schema declares on transfers.
        self.ensure_account(from_account_id).await?;
        self.ensure_account(to_account_id).await?;

        let transfer = Transfer {
            id: self.inner.transfer_seq.next(),
            from_account_id,
            to_account_id,
            amount,
            created_at: Utc::now(),
        };
        self.staged_transfers.push(transfer.clone());
        Ok(transfer)
    }

    async fn create_entry(&mut self, account_id: i64, amount: i64) -> Result<Entry, Error> {
        self.ensure_account(account_id).await?;

        let entry = Entry {
            id: self.inner.entry_seq.next(),
            account_id,
            amount,
            created_at: Utc::now(),
        };
        self.staged_entries.push(entry.clone());
        Ok(entry)
    }

    async fn add_account_balance(
        &mut self,
        account_id: i64,
        delta: i64,
    ) -> Result<Account, Error> {
        if let Some(held) = self.held.get_mut(&account_id) {
            held.pending.balance = held.pending.balance.checked_add(delta).ok_or_else(|| {
                Error::Constraint(format!("balance out of range for account {account_id}"))
            })?;
            return Ok(held.pending.clone());
        }

        let row = self.inner.row(account_id).await?;
        let guard = match timeout(LOCK_WAIT_TIMEOUT, Arc::clone(&row.lock).lock_owned()).await {
            Ok(guard) => guard,
            Err(_) => {
                return Err(Error::Concurrency(format!(
                    "timed out waiting for row lock on account {account_id}"
                )));
            }
        };
        debug!(account_id, delta, "row lock acquired");

        let mut pending = row.committed.read().await.clone();
        pending.balance = pending.balance.checked_add(delta).ok_or_else(|| {
            Error::Constraint(format!("balance out of range for account {account_id}"))
        })?;

        let updated = pending.clone();
        self.held.insert(
            account_id,
            HeldRow {
                row,
                _guard: guard,
                pending,
            },
        );
        Ok(updated)
    }

    async fn get_account(&self, account_id: i64) -> Result<Account, Error> {
        if let Some(held) = self.held.get(&account_id) {
            return Ok(held.pending.clone());
        }
        let row = self.inner.row(account_id).await?;
        let account = row.committed.read().await.clone();
        Ok(account)
    }
}

#[async_trait]
impl TxHandle for MemoryTx {
    async fn commit(self) -> Result<(), Error> {
        // Write balances while the row locks are still held, so no other
        // transaction can interleave between the read that produced the
        // pending value and this write.
        for held in self.held.values() {
            *held.row.committed.write().await = held.pending.clone();
        }

        if !self.staged_transfers.is_empty() {
            let mut transfers = self.inner.transfers.write().await;
            transfers.extend(self.staged_transfers.into_iter().map(|t| (t.id, t)));
        }
        if !self.staged_entries.is_empty() {
            let mut entries = self.inner.entries.write().await;
            entries.extend(self.staged_entries.into_iter().map(|e| (e.id, e)));
        }

        // Row locks release when `held` drops.
        Ok(())
    }

    async fn rollback(self) -> Result<(), Error> {
        // Staged rows and pending balances are simply discarded; dropping
        // the guards releases the row locks.
        debug!(
            transfers = self.staged_transfers.len(),
            entries = self.staged_entries.len(),
            "transaction rolled back",
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::{DateTime, Utc};

    use super::*;

    #[tokio::test]
    async fn create_and_get_account() {
        let store = MemoryStore::new();
        let account = store.create_account("alice", "USD", 250).await;

        assert!(account.id > 0);
        assert!(account.created_at > DateTime::<Utc>::UNIX_EPOCH);
        assert_eq!(store.get_account(account.id).await.unwrap(), account);
    }

    #[tokio::test]
    async fn missing_account_is_not_found() {
        let store = MemoryStore::new();

        assert!(matches!(
            store.get_account(404).await,
            Err(Error::AccountNotFound(404))
        ));

        let mut tx = store.begin().await.unwrap();
        assert!(matches!(
            tx.add_account_balance(404, 1).await,
            Err(Error::AccountNotFound(404))
        ));
        assert!(matches!(
            tx.create_entry(404, 1).await,
            Err(Error::AccountNotFound(404))
        ));
        tx.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn writes_are_invisible_until_commit() {
        let store = MemoryStore::new();
        let account = store.create_account("bob", "EUR", 100).await;

        let mut tx = store.begin().await.unwrap();
        let entry = tx.create_entry(account.id, -40).await.unwrap();
        let updated = tx.add_account_balance(account.id, -40).await.unwrap();
        assert_eq!(updated.balance, 60);

        // Inside the transaction the pending value is visible...
        assert_eq!(tx.get_account(account.id).await.unwrap().balance, 60);
        // ...outside only the committed one.
        assert_eq!(store.get_account(account.id).await.unwrap().balance, 100);
        assert!(store.get_entry(entry.id).await.is_none());

        tx.commit().await.unwrap();

        assert_eq!(store.get_account(account.id).await.unwrap().balance, 60);
        assert_eq!(store.get_entry(entry.id).await.unwrap(), entry);
    }

    #[tokio::test]
    async fn rollback_leaves_no_trace() {
        let store = MemoryStore::new();
        let a = store.create_account("a", "USD", 100).await;
        let b = store.create_account("b", "USD", 100).await;

        let mut tx = store.begin().await.unwrap();
        let transfer = tx.create_transfer(a.id, b.id, 30).await.unwrap();
        tx.create_entry(a.id, -30).await.unwrap();
        tx.add_account_balance(a.id, -30).await.unwrap();
        tx.rollback().await.unwrap();

        assert_eq!(store.get_account(a.id).await.unwrap().balance, 100);
        assert!(store.get_transfer(transfer.id).await.is_none());
        assert!(store.list_entries(a.id).await.is_empty());
    }

    #[tokio::test]
    async fn repeated_adjustments_fold_into_one_pending_value() {
        let store = MemoryStore::new();
        let account = store.create_account("carol", "USD", 10).await;

        let mut tx = store.begin().await.unwrap();
        assert_eq!(
            tx.add_account_balance(account.id, 5).await.unwrap().balance,
            15
        );
        assert_eq!(
            tx.add_account_balance(account.id, 7).await.unwrap().balance,
            22
        );
        tx.commit().await.unwrap();

        assert_eq!(store.get_account(account.id).await.unwrap().balance, 22);
    }

    #[tokio::test]
    async fn balance_overflow_is_a_constraint_violation() {
        let store = MemoryStore::new();
        let account = store.create_account("max", "USD", i64::MAX - 1).await;

        let mut tx = store.begin().await.unwrap();
        let err = tx.add_account_balance(account.id, 2).await.unwrap_err();
        assert!(matches!(err, Error::Constraint(_)));
        tx.rollback().await.unwrap();

        assert_eq!(
            store.get_account(account.id).await.unwrap().balance,
            i64::MAX - 1
        );
    }

    #[tokio::test]
    async fn row_lock_blocks_second_writer_until_commit() {
        let store = MemoryStore::new();
        let account = store.create_account("dave", "USD", 100).await;

        let mut tx1 = store.begin().await.unwrap();
        tx1.add_account_balance(account.id, -10).await.unwrap();

        let contender = store.clone();
        let account_id = account.id;
        let mut second = tokio::spawn(async move {
            let mut tx2 = contender.begin().await.unwrap();
            let updated = tx2.add_account_balance(account_id, -10).await.unwrap();
            tx2.commit().await.unwrap();
            updated.balance
        });

        let blocked = tokio::time::timeout(Duration::from_millis(100), &mut second).await;
        assert!(blocked.is_err(), "second writer ran while lock was held");

        tx1.commit().await.unwrap();

        // The second writer saw the committed value, not the stale one.
        assert_eq!(second.await.unwrap(), 80);
        assert_eq!(store.get_account(account.id).await.unwrap().balance, 80);
    }

    #[tokio::test]
    async fn autocommit_ops_take_effect_immediately() {
        let mut store = MemoryStore::new();
        let account = store.create_account("erin", "USD", 50).await;

        let entry = LedgerStore::create_entry(&mut store, account.id, 25)
            .await
            .unwrap();
        let updated = LedgerStore::add_account_balance(&mut store, account.id, 25)
            .await
            .unwrap();

        assert_eq!(updated.balance, 75);
        assert_eq!(store.get_entry(entry.id).await.unwrap(), entry);
        assert_eq!(store.get_account(account.id).await.unwrap().balance, 75);
    }

    #[tokio::test]
    async fn ids_are_unique_and_never_reused_after_rollback() {
        let store = MemoryStore::new();
        let a = store.create_account("a", "USD", 0).await;
        let b = store.create_account("b", "USD", 0).await;

        let mut tx = store.begin().await.unwrap();
        let rolled_back = tx.create_transfer(a.id, b.id, 1).await.unwrap();
        tx.rollback().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let committed = tx.create_transfer(a.id, b.id, 1).await.unwrap();
        tx.commit().await.unwrap();

        assert!(committed.id > rolled_back.id);
        assert!(store.get_transfer(rolled_back.id).await.is_none());
    }
}

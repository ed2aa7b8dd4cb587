use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::context::TxContext;
use crate::domain::{Account, Entry, Error, LedgerStore, StorageEngine, Transfer, TxHandle};

/// Input for one money transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferTxParams {
    pub from_account_id: i64,
    pub to_account_id: i64,
    /// Positive; validated by the caller.
    pub amount: i64,
}

/// Everything a committed transfer produced: the transfer row, the two
/// offsetting entries, and both accounts as of their balance update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferTxResult {
    pub transfer: Transfer,
    pub from_account: Account,
    pub to_account: Account,
    pub from_entry: Entry,
    pub to_entry: Entry,
}

/// The transactional ledger: wraps a storage engine and runs units of work
/// against transaction-scoped store handles.
#[derive(Debug)]
pub struct Ledger<S: StorageEngine> {
    store: S,
}

impl<S: StorageEngine> Ledger<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Executes `work` within one storage-engine transaction.
    ///
    /// Commits if `work` succeeds and the context was not cancelled in the
    /// meantime; commit failure is returned as-is. On failure the
    /// transaction is rolled back, and if the rollback fails too the result
    /// is [`Error::RollbackFailed`] carrying both causes.
    pub async fn run_tx<T, F>(&self, cx: &TxContext, work: F) -> Result<T, Error>
    where
        F: AsyncFnOnce(&mut S::Tx) -> Result<T, Error>,
    {
        if cx.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let mut tx = self.store.begin().await?;

        let mut outcome = work(&mut tx).await;
        // Cancellation is honored up to the moment commit is issued; once we
        // decide to commit there is no turning back.
        if outcome.is_ok() && cx.is_cancelled() {
            outcome = Err(Error::Cancelled);
        }

        match outcome {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(err) => match tx.rollback().await {
                Ok(()) => Err(err),
                Err(rb_err) => Err(Error::RollbackFailed {
                    source: Box::new(err),
                    rollback: Box::new(rb_err),
                }),
            },
        }
    }

    /// Moves money from one account to the other: creates the transfer row,
    /// the two offsetting entries, and applies both balance deltas, all
    /// within a single transaction.
    ///
    /// Balance rows are always locked in ascending account-id order,
    /// regardless of transfer direction. That single total order means two
    /// opposite transfers between the same pair of accounts can never each
    /// hold one row lock while waiting on the other.
    pub async fn transfer_tx(
        &self,
        cx: &TxContext,
        params: TransferTxParams,
    ) -> Result<TransferTxResult, Error> {
        debug!(
            trace_id = %cx.trace_id(),
            from = params.from_account_id,
            to = params.to_account_id,
            amount = params.amount,
            "transfer tx start",
        );

        self.run_tx(cx, async |tx| {
            let transfer = tx
                .create_transfer(params.from_account_id, params.to_account_id, params.amount)
                .await?;
            debug!(trace_id = %cx.trace_id(), transfer_id = transfer.id, "transfer created");

            let from_entry = tx
                .create_entry(params.from_account_id, -params.amount)
                .await?;
            let to_entry = tx.create_entry(params.to_account_id, params.amount).await?;
            debug!(trace_id = %cx.trace_id(), "entries created");

            let (from_account, to_account) = if params.from_account_id < params.to_account_id {
                add_money(
                    tx,
                    params.from_account_id,
                    -params.amount,
                    params.to_account_id,
                    params.amount,
                )
                .await?
            } else {
                let (to_account, from_account) = add_money(
                    tx,
                    params.to_account_id,
                    params.amount,
                    params.from_account_id,
                    -params.amount,
                )
                .await?;
                (from_account, to_account)
            };
            debug!(trace_id = %cx.trace_id(), "balances updated");

            Ok(TransferTxResult {
                transfer,
                from_account,
                to_account,
                from_entry,
                to_entry,
            })
        })
        .await
    }
}

/// Applies `delta1` to `account_id1`, then `delta2` to `account_id2`, in that
/// literal order. Callers present the ids already in the required
/// lock-acquisition order; if the first adjustment fails the second is never
/// attempted.
pub async fn add_money<L: LedgerStore>(
    store: &mut L,
    account_id1: i64,
    delta1: i64,
    account_id2: i64,
    delta2: i64,
) -> Result<(Account, Account), Error> {
    let account1 = store.add_account_balance(account_id1, delta1).await?;
    let account2 = store.add_account_balance(account_id2, delta2).await?;
    Ok((account1, account2))
}

//! A transactional ledger core: moves money between two accounts as one
//! atomic unit (transfer row, two offsetting entries, two balance updates)
//! and stays deadlock-free under arbitrary concurrent load by always
//! acquiring balance-row locks in ascending account-id order.
//!
//! The storage engine sits behind the [`domain::traits::StorageEngine`] seam;
//! [`MemoryStore`] is the bundled implementation with real per-row locking.

pub mod context;
pub mod domain;
pub mod ledger;
pub mod memory_store;
pub mod telemetry;

pub use context::{CancelHandle, TxContext};
pub use domain::{Account, Entry, Error, Transfer};
pub use ledger::{Ledger, TransferTxParams, TransferTxResult};
pub use memory_store::{MemoryStore, MemoryTx};

pub mod account;
pub mod entry;
pub mod error;
pub mod traits;
pub mod transfer;

pub use account::Account;
pub use entry::Entry;
pub use error::Error;
pub use traits::{LedgerStore, StorageEngine, TxHandle};
pub use transfer::Transfer;

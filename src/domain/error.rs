#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("account {0} not found")]
    AccountNotFound(i64),

    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("concurrency conflict: {0}")]
    Concurrency(String),

    #[error("transaction cancelled")]
    Cancelled,

    /// The unit of work failed and the rollback failed too. Neither cause is
    /// dropped: the original failure is the std error source, the rollback
    /// failure rides along.
    #[error("tx err: {source}; rollback err: {rollback}")]
    RollbackFailed {
        source: Box<Error>,
        rollback: Box<Error>,
    },
}

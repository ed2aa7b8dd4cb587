use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use uuid::Uuid;

/// Per-call context for one transactional operation: a correlation id for
/// tracing concurrent transactions, plus a cancellation flag.
///
/// The trace id is passed explicitly and shows up on every log event the
/// transaction emits, so interleavings of concurrent transfers can be read
/// straight out of the logs.
#[derive(Debug, Clone)]
pub struct TxContext {
    trace_id: Uuid,
    cancelled: Arc<AtomicBool>,
}

impl TxContext {
    pub fn new() -> Self {
        Self {
            trace_id: Uuid::new_v4(),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn trace_id(&self) -> Uuid {
        self.trace_id
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// A handle the caller can keep to cancel the operation from another
    /// task. Cancellation is honored up to the point commit is issued.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(Arc::clone(&self.cancelled))
    }
}

impl Default for TxContext {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

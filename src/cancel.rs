//! A single cancellation signal shared by every stage. Checked at loop
//! boundaries rather than threaded through blocking I/O calls: a stage
//! that observes cancellation simply stops pulling from its input and
//! returns, which closes its output channel and cascades the shutdown
//! downstream exactly like closing the input queue would.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        CancelToken(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

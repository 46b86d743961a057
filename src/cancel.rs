use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crossbeam_channel::{Receiver, Sender, bounded};

/// Cooperative cancellation shared by all pipeline stages.
///
/// Nothing is ever sent on the inner channel; cancelling drops the only
/// sender, so `done()` becomes ready in every `select!` waiting on it.
#[derive(Debug, Clone)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    trigger: Arc<Mutex<Option<Sender<()>>>>,
    done: Receiver<()>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = bounded(0);
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            trigger: Arc::new(Mutex::new(Some(tx))),
            done: rx,
        }
    }

    /// Cancel every holder of this token. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        let sender = match self.trigger.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        drop(sender);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Receiver that disconnects once the token is cancelled.
    pub fn done(&self) -> &Receiver<()> {
        &self.done
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

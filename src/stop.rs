use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Cross-context cancellation flag for cooperative shutdown.
///
/// Exactly two observable states: clear and set. The clear→set transition
/// happens at most once per run; later `set` calls are no-ops. Cloning is
/// cheap and every clone observes the same flag, so one copy can live in the
/// signal listener while another is polled by the worker.
#[derive(Clone, Default)]
pub struct StopSignal {
    inner: Arc<StopInner>,
}

#[derive(Default)]
struct StopInner {
    set: AtomicBool,
    notify: Notify,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transition the flag to set and wake all waiters.
    ///
    /// Returns `true` only for the transition that actually flipped the flag;
    /// repeat calls (from any context, in any order) return `false` and do
    /// nothing else.
    pub fn set(&self) -> bool {
        if self.inner.set.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.inner.notify.notify_waiters();
        true
    }

    pub fn is_set(&self) -> bool {
        self.inner.set.load(Ordering::SeqCst)
    }

    /// Wait until the flag is set. Resolves immediately if it already is.
    pub async fn wait(&self) {
        loop {
            if self.is_set() {
                return;
            }
            let notified = self.inner.notify.notified();
            // Re-check after registering as a waiter: a set between the load
            // above and `notified()` would otherwise be a lost wakeup.
            if self.is_set() {
                return;
            }
            notified.await;
        }
    }
}

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::net::DeadlineHandle;

/// A cancellation signal a connection can watch.
///
/// Triggering the token interrupts whatever I/O the watching connection is
/// blocked on by moving its deadlines into the past; the interrupted
/// operation fails with [`Error::Canceled`] and the connection must then
/// be closed, because the protocol state is no longer known.
///
/// [`Error::Canceled`]: crate::Error::Canceled
#[derive(Clone, Default)]
pub struct WatchToken {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    notify: Notify,
    triggered: AtomicBool,
}

impl WatchToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the token. Idempotent; wakes current and future watchers.
    pub fn trigger(&self) {
        self.inner.triggered.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.triggered.load(Ordering::SeqCst)
    }

    async fn wait(&self) {
        // register interest before checking the flag, or a trigger landing
        // between the check and the await would be lost
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if self.is_triggered() {
            return;
        }

        notified.await;
    }
}

/// The watcher task owned by a connection; aborted on drop, which is what
/// makes `unwatch` (and connection teardown) release it.
pub(super) struct WatchGuard {
    task: JoinHandle<()>,
}

impl Drop for WatchGuard {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub(super) fn spawn(token: &WatchToken, deadlines: DeadlineHandle) -> WatchGuard {
    let token = token.clone();

    WatchGuard {
        task: tokio::spawn(async move {
            token.wait().await;
            deadlines.cancel();
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::WatchToken;

    #[tokio::test]
    async fn a_trigger_before_the_wait_is_not_lost() {
        let token = WatchToken::new();

        token.trigger();

        // must complete immediately
        token.wait().await;
        assert!(token.is_triggered());
    }
}

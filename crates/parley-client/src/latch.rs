//! One-shot readiness flags ("identity received", "member list loaded").

use std::sync::Arc;

use tokio::sync::watch;

/// A flag that callers can await until it opens. It can be reset for the
/// next round (e.g. a new server selection) and opened again.
#[derive(Debug, Clone)]
pub struct Latch {
    tx: Arc<watch::Sender<bool>>,
}

impl Latch {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Open the latch. Waiters are woken only on the closed → open edge.
    pub fn open(&self) {
        self.tx.send_if_modified(|open| !std::mem::replace(open, true));
    }

    pub fn reset(&self) {
        self.tx.send_if_modified(|open| std::mem::replace(open, false));
    }

    pub fn is_open(&self) -> bool {
        *self.tx.borrow()
    }

    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // the sender lives as long as `self`, so this cannot fail
        let _ = rx.wait_for(|open| *open).await;
    }
}

impl Default for Latch {
    fn default() -> Self {
        Self::new()
    }
}

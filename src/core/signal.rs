//! One-shot signal - settles once, any number of waiters

use tokio::sync::watch;

/// A value that is set at most once and can be awaited by many tasks
pub struct OneShot<T> {
    tx: watch::Sender<Option<T>>,
}

impl<T: Copy> OneShot<T> {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    /// Settle the signal. Returns false if it had already settled.
    pub fn set(&self, value: T) -> bool {
        self.tx.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(value);
            true
        })
    }

    /// Current value, if settled
    pub fn get(&self) -> Option<T> {
        *self.tx.borrow()
    }

    pub fn is_set(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// Wait until the signal settles
    pub async fn wait(&self) -> T {
        let mut rx = self.tx.subscribe();
        loop {
            if let Some(value) = *rx.borrow_and_update() {
                return value;
            }
            // `self` owns the sender, so this only resolves on a send
            let _ = rx.changed().await;
        }
    }
}

impl<T: Copy> Default for OneShot<T> {
    fn default() -> Self {
        Self::new()
    }
}

//! Observable variables with change notification.
//!
//! [`Var`] holds the latest value of some shared state (resolved
//! bounds, schema snapshots, progress stats) and lets any number of observers
//! read it or wait for the next change. Writers go through
//! [`Var::update`], which serializes read-modify-write cycles so that a
//! stat merge never clobbers a concurrent one.

use parking_lot::Mutex;
use tokio::sync::watch;

/// A shared, observable variable.
///
/// Backed by a [`watch`] channel: readers may [`subscribe`](Var::subscribe)
/// and await change notifications, or call [`get`](Var::get) for the
/// latest snapshot. The sender half never closes while the `Var` is
/// alive, so subscribers only see channel closure at drop.
pub struct Var<T> {
    tx: watch::Sender<T>,
    write: Mutex<()>,
}

impl<T> std::fmt::Debug for Var<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Var").finish_non_exhaustive()
    }
}

impl<T: Clone> Var<T> {
    /// Creates a variable holding `initial`.
    pub fn new(initial: T) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self {
            tx,
            write: Mutex::new(()),
        }
    }

    /// Returns a clone of the current value.
    pub fn get(&self) -> T {
        self.tx.borrow().clone()
    }

    /// Replaces the current value and notifies observers.
    pub fn set(&self, value: T) {
        let _guard = self.write.lock();
        self.tx.send_replace(value);
    }

    /// Applies a read-modify-write cycle.
    ///
    /// The callback receives the current value and returns the
    /// replacement. Cycles are serialized: a concurrent `update` blocks
    /// until this one has committed, which is what keeps accumulated
    /// counters and monotone progress maps consistent.
    ///
    /// # Errors
    ///
    /// Propagates the callback's error without changing the value.
    pub fn update<E>(&self, apply: impl FnOnce(&T) -> Result<T, E>) -> Result<T, E> {
        let _guard = self.write.lock();
        let next = apply(&self.tx.borrow())?;
        self.tx.send_replace(next.clone());
        Ok(next)
    }

    /// Subscribes to change notifications.
    ///
    /// The receiver starts out already marked changed for the current
    /// value, so a subscribe-then-wait loop observes the latest state
    /// before blocking.
    pub fn subscribe(&self) -> watch::Receiver<T> {
        let mut rx = self.tx.subscribe();
        // watch receivers start "seen"; re-mark so the first wait fires.
        rx.mark_changed();
        rx
    }

    /// Returns the number of live subscribers.
    pub fn observer_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl<T: Clone + Default> Default for Var<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_returns_latest() {
        let v = Var::new(1);
        assert_eq!(v.get(), 1);
        v.set(2);
        assert_eq!(v.get(), 2);
    }

    #[test]
    fn test_update_applies_callback() {
        let v = Var::new(10);
        let next = v.update::<()>(|old| Ok(old + 5)).unwrap();
        assert_eq!(next, 15);
        assert_eq!(v.get(), 15);
    }

    #[test]
    fn test_update_error_leaves_value() {
        let v = Var::new(10);
        let res = v.update(|_| Err("nope"));
        assert_eq!(res, Err("nope"));
        assert_eq!(v.get(), 10);
    }

    #[tokio::test]
    async fn test_subscribe_sees_initial_and_changes() {
        let v = Var::new(0);
        let mut rx = v.subscribe();

        // First wait resolves immediately for the current value.
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), 0);

        v.set(7);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), 7);
    }

    #[tokio::test]
    async fn test_multiple_observers() {
        let v = Var::new(String::from("a"));
        let mut rx1 = v.subscribe();
        let mut rx2 = v.subscribe();
        v.set(String::from("b"));

        rx1.changed().await.unwrap();
        rx2.changed().await.unwrap();
        assert_eq!(*rx1.borrow(), "b");
        assert_eq!(*rx2.borrow(), "b");
    }
}

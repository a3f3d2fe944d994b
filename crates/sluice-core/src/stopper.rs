//! Cancellable task contexts with grace-bounded shutdown.
//!
//! Every long-lived loop in the pipeline runs under a [`Context`]: a
//! cancellation token paired with a task tracker. Stopping a context
//! cancels its token (and, transitively, every child context) and lets
//! the owner wait for the tracked tasks to drain within a grace period.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// A cancellable context owning a set of spawned tasks.
///
/// Cloning is cheap and shares the same token and tracker. Child
/// contexts created with [`child`](Context::child) are cancelled when
/// any ancestor stops, but track their own tasks so a generation can be
/// retired without waiting on unrelated work.
#[derive(Debug, Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    token: CancellationToken,
    tracker: TaskTracker,
}

impl Context {
    /// Creates a root context.
    #[must_use]
    pub fn root() -> Self {
        Self {
            inner: Arc::new(Inner {
                token: CancellationToken::new(),
                tracker: TaskTracker::new(),
            }),
        }
    }

    /// Creates a child context cancelled together with its parent but
    /// tracking its own tasks.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            inner: Arc::new(Inner {
                token: self.inner.token.child_token(),
                tracker: TaskTracker::new(),
            }),
        }
    }

    /// Spawns a task tracked by this context.
    ///
    /// The task itself is responsible for observing
    /// [`stopping`](Context::stopping); spawning does not race the
    /// cancellation signal.
    pub fn spawn<F>(&self, fut: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.inner.tracker.spawn(fut)
    }

    /// Returns `true` once the context has been asked to stop.
    #[must_use]
    pub fn is_stopping(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// Resolves when the context is asked to stop.
    pub async fn stopping(&self) {
        self.inner.token.cancelled().await;
    }

    /// Requests a stop without waiting for tasks to finish.
    pub fn stop(&self) {
        self.inner.token.cancel();
        self.inner.tracker.close();
    }

    /// Stops the context and waits up to `grace` for its tasks to drain.
    ///
    /// Returns `true` when every tracked task finished in time; `false`
    /// means stragglers were abandoned and the caller may want to log
    /// them.
    pub async fn stop_and_wait(&self, grace: Duration) -> bool {
        self.stop();
        tokio::time::timeout(grace, self.inner.tracker.wait())
            .await
            .is_ok()
    }

    /// Waits for all tracked tasks without a deadline. Used by tests and
    /// by callers that already bounded the wait elsewhere.
    pub async fn wait(&self) {
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stop_cancels_children() {
        let root = Context::root();
        let child = root.child();
        assert!(!child.is_stopping());
        root.stop();
        assert!(child.is_stopping());
        child.stopping().await;
    }

    #[tokio::test]
    async fn test_child_stop_leaves_parent_running() {
        let root = Context::root();
        let child = root.child();
        child.stop();
        assert!(child.is_stopping());
        assert!(!root.is_stopping());
    }

    #[tokio::test]
    async fn test_stop_and_wait_drains_tasks() {
        let ctx = Context::root();
        let marker = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let m = Arc::clone(&marker);
        let inner = ctx.clone();
        ctx.spawn(async move {
            inner.stopping().await;
            m.store(true, std::sync::atomic::Ordering::SeqCst);
        });

        assert!(ctx.stop_and_wait(Duration::from_secs(1)).await);
        assert!(marker.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_stop_and_wait_times_out_on_straggler() {
        let ctx = Context::root();
        ctx.spawn(async {
            // Ignores cancellation entirely.
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        assert!(!ctx.stop_and_wait(Duration::from_millis(20)).await);
    }
}

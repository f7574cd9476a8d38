//! Acknowledgement callbacks, with and without a timeout.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use serde_json::Value as JsonValue;
use tokio::task::JoinHandle;

/// A plain ack callback: invoked once with the flattened reply args.
pub type AckFn = Box<dyn FnOnce(Vec<JsonValue>) + Send>;

/// An ack callback that also fires if no reply arrives within
/// `timeout`. `call` and the timeout handler are mutually exclusive —
/// whichever fires first wins, and it cancels the other.
pub struct AckWithTimeout {
    timeout: Duration,
    on_success: Mutex<Option<Box<dyn FnOnce(Vec<JsonValue>) + Send>>>,
    on_timeout: Mutex<Option<Box<dyn FnOnce() + Send>>>,
    completed: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl AckWithTimeout {
    pub fn new<S, T>(timeout: Duration, on_success: S, on_timeout: T) -> Self
    where
        S: FnOnce(Vec<JsonValue>) + Send + 'static,
        T: FnOnce() + Send + 'static,
    {
        Self {
            timeout,
            on_success: Mutex::new(Some(Box::new(on_success))),
            on_timeout: Mutex::new(Some(Box::new(on_timeout))),
            completed: AtomicBool::new(false),
            task: Mutex::new(None),
        }
    }

    /// The caller's reply arrived: cancel the timer and invoke
    /// `on_success`. A no-op if already completed (by a prior `call`
    /// or a fired timeout).
    pub fn call(&self, args: Vec<JsonValue>) {
        if self.completed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(task) = self.task.lock().unwrap().take() {
            task.abort();
        }
        if let Some(cb) = self.on_success.lock().unwrap().take() {
            cb(args);
        }
    }

    /// Force the timeout branch to fire immediately, bypassing the
    /// scheduled delay. Used when the owning socket disconnects while
    /// this ack is still outstanding; no
    /// `cleanup` runs since the caller is already draining the table
    /// this ack lived in.
    pub fn force_timeout(&self) {
        if self.completed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(task) = self.task.lock().unwrap().take() {
            task.abort();
        }
        if let Some(cb) = self.on_timeout.lock().unwrap().take() {
            cb();
        }
    }

    /// Start the timeout timer. `cleanup` runs (ack-table/send-buffer
    /// removal) before `on_timeout` if the timer fires first.
    /// Re-scheduling while a timer is already active is a no-op.
    pub fn schedule<C>(self: &std::sync::Arc<Self>, cleanup: C)
    where
        C: FnOnce() + Send + 'static,
    {
        let mut task_slot = self.task.lock().unwrap();
        if task_slot.is_some() {
            return;
        }

        let me = self.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(me.timeout).await;
            if me.completed.swap(true, Ordering::SeqCst) {
                return;
            }
            cleanup();
            if let Some(cb) = me.on_timeout.lock().unwrap().take() {
                cb();
            }
        });
        *task_slot = Some(handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration as StdDuration;

    #[tokio::test]
    async fn call_before_timeout_invokes_on_success_only() {
        let success_fired = Arc::new(AtomicBool::new(false));
        let timeout_fired = Arc::new(AtomicBool::new(false));
        let (s1, t1) = (success_fired.clone(), timeout_fired.clone());

        let ack = Arc::new(AckWithTimeout::new(
            StdDuration::from_millis(50),
            move |_args| s1.store(true, Ordering::SeqCst),
            move || t1.store(true, Ordering::SeqCst),
        ));
        ack.schedule(|| {});
        ack.call(vec![serde_json::json!("ok")]);

        tokio::time::sleep(StdDuration::from_millis(80)).await;
        assert!(success_fired.load(Ordering::SeqCst));
        assert!(!timeout_fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn timeout_fires_cleanup_then_on_timeout_when_no_reply() {
        let cleanup_fired = Arc::new(AtomicBool::new(false));
        let timeout_fired = Arc::new(AtomicBool::new(false));
        let (c1, t1) = (cleanup_fired.clone(), timeout_fired.clone());

        let ack = Arc::new(AckWithTimeout::new(
            StdDuration::from_millis(20),
            |_args| {},
            move || t1.store(true, Ordering::SeqCst),
        ));
        ack.schedule(move || c1.store(true, Ordering::SeqCst));

        tokio::time::sleep(StdDuration::from_millis(60)).await;
        assert!(cleanup_fired.load(Ordering::SeqCst));
        assert!(timeout_fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn rescheduling_an_active_timer_is_a_no_op() {
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let ack = Arc::new(AckWithTimeout::new(
            StdDuration::from_millis(30),
            |_| {},
            || {},
        ));
        let c1 = calls.clone();
        ack.schedule(move || {
            c1.fetch_add(1, Ordering::SeqCst);
        });
        let c2 = calls.clone();
        ack.schedule(move || {
            c2.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(StdDuration::from_millis(60)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn force_timeout_fires_without_waiting() {
        let timeout_fired = Arc::new(AtomicBool::new(false));
        let t1 = timeout_fired.clone();
        let ack = Arc::new(AckWithTimeout::new(
            StdDuration::from_secs(60),
            |_| {},
            move || t1.store(true, Ordering::SeqCst),
        ));
        ack.schedule(|| {});
        ack.force_timeout();
        assert!(timeout_fired.load(Ordering::SeqCst));

        // A reply arriving afterwards must not double-fire either callback.
        ack.call(vec![]);
    }
}

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Trailing-edge debouncer over an arbitrary value type.
///
/// Collapses a burst of [`observe`](Debouncer::observe) calls into a single
/// emission of the latest value once the quiet window elapses. Intermediate
/// values are discarded without side effects, and no leading-edge emission is
/// ever produced. The debouncer knows nothing about what happens to emitted
/// values; it delivers them to the channel handed in at construction.
pub struct Debouncer<T> {
    window: Duration,
    tx: mpsc::UnboundedSender<T>,
    pending: Option<JoinHandle<()>>,
}

impl<T> Debouncer<T> {
    /// Creates a debouncer that emits into `tx` after `window` of quiet.
    pub fn new(window: Duration, tx: mpsc::UnboundedSender<T>) -> Self {
        Self {
            window,
            tx,
            pending: None,
        }
    }

    /// Stops a pending timer with no emission. Idempotent; nothing is
    /// emitted afterwards until a new `observe` call arrives.
    pub fn cancel(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
    }

    /// Returns `true` while an emission timer is armed.
    pub fn is_pending(&self) -> bool {
        self.pending
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }
}

impl<T: Send + 'static> Debouncer<T> {
    /// Records `value` as the latest candidate and restarts the quiet timer.
    ///
    /// Any previously armed timer is cancelled first, so at most one timer
    /// is pending at any instant and only the final value of a burst is
    /// emitted.
    pub fn observe(&mut self, value: T) {
        self.cancel();
        let tx = self.tx.clone();
        let window = self.window;
        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(window).await;
            // The receiver may already be gone during session teardown.
            let _ = tx.send(value);
        }));
    }
}

impl<T> Drop for Debouncer<T> {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{sleep, timeout};

    const WINDOW: Duration = Duration::from_millis(40);

    fn debouncer() -> (Debouncer<&'static str>, mpsc::UnboundedReceiver<&'static str>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Debouncer::new(WINDOW, tx), rx)
    }

    #[tokio::test]
    async fn burst_emits_only_the_latest_value() {
        let (mut debouncer, mut rx) = debouncer();

        debouncer.observe("v1");
        sleep(Duration::from_millis(5)).await;
        debouncer.observe("v2");
        sleep(Duration::from_millis(5)).await;
        debouncer.observe("v3");

        let emitted = timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("emission expected")
            .expect("channel open");
        assert_eq!(emitted, "v3");

        // Nothing else may arrive for the burst.
        sleep(WINDOW * 3).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn quiet_gaps_produce_separate_emissions() {
        let (mut debouncer, mut rx) = debouncer();

        debouncer.observe("first");
        let first = timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("first emission")
            .expect("channel open");

        debouncer.observe("second");
        let second = timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("second emission")
            .expect("channel open");

        assert_eq!((first, second), ("first", "second"));
    }

    #[tokio::test]
    async fn cancel_suppresses_pending_emission() {
        let (mut debouncer, mut rx) = debouncer();

        debouncer.observe("doomed");
        debouncer.cancel();
        // Idempotent.
        debouncer.cancel();

        sleep(WINDOW * 3).await;
        assert!(rx.try_recv().is_err());
        assert!(!debouncer.is_pending());
    }

    #[tokio::test]
    async fn observe_after_cancel_rearms_the_timer() {
        let (mut debouncer, mut rx) = debouncer();

        debouncer.observe("dropped");
        debouncer.cancel();
        debouncer.observe("kept");

        let emitted = timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("emission expected")
            .expect("channel open");
        assert_eq!(emitted, "kept");
    }

    #[tokio::test]
    async fn drop_aborts_the_pending_timer() {
        let (tx, mut rx) = mpsc::unbounded_channel::<&'static str>();
        {
            let mut debouncer = Debouncer::new(WINDOW, tx);
            debouncer.observe("never");
        }

        sleep(WINDOW * 3).await;
        assert!(rx.try_recv().is_err());
    }
}

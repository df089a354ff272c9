use std::sync::{Arc, Mutex};

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::autosave::AutosaveScheduler;
use crate::backend::PersistBackend;
use crate::debounce::Debouncer;
use crate::types::{AutosaveConfig, AutosaveEvent, PersistOutcome};

/// One logical edit session: a debouncer feeding a scheduler.
///
/// Created when a record is opened for editing and closed when that editing
/// session ends. Edit-buffer changes flow in through
/// [`on_observed_change`](AutosaveSession::on_observed_change); the manual
/// save path bypasses the debouncer but shares the scheduler's write
/// discipline.
pub struct AutosaveSession<S> {
    debouncer: Mutex<Debouncer<S>>,
    scheduler: AutosaveScheduler<S>,
    pump: JoinHandle<()>,
}

impl<S> AutosaveSession<S>
where
    S: Clone + PartialEq + Send + Sync + 'static,
{
    /// Wires a debouncer to a fresh scheduler over `backend` and starts the
    /// emission pump.
    pub fn spawn(config: AutosaveConfig, backend: Arc<dyn PersistBackend<S>>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let debouncer = Debouncer::new(config.debounce_window, tx);
        let scheduler = AutosaveScheduler::new(backend, config.enabled);

        let pump = tokio::spawn({
            let scheduler = scheduler.clone();
            async move {
                while let Some(snapshot) = rx.recv().await {
                    scheduler.handle_emission(snapshot);
                }
            }
        });

        Self {
            debouncer: Mutex::new(debouncer),
            scheduler,
            pump,
        }
    }

    /// Called whenever the edit buffer changes; restarts the quiet timer.
    pub fn on_observed_change(&self, snapshot: S) {
        self.debouncer
            .lock()
            .expect("debouncer poisoned")
            .observe(snapshot);
    }

    /// Explicit "save now". Always persists, independent of debounce timing.
    pub async fn flush_now(&self, snapshot: S) -> PersistOutcome {
        self.scheduler.flush_now(snapshot).await
    }

    /// Subscribes to persist-attempt notifications for this session.
    pub fn subscribe(&self) -> broadcast::Receiver<AutosaveEvent> {
        self.scheduler.subscribe()
    }

    /// Snapshot most recently confirmed durable, if any.
    pub fn last_persisted(&self) -> Option<S> {
        self.scheduler.last_persisted()
    }

    /// Ends the session: the pending debounce timer is cancelled with no
    /// emission, while an in-flight persist runs to completion.
    pub fn close(&self) {
        self.debouncer
            .lock()
            .expect("debouncer poisoned")
            .cancel();
        self.scheduler.close();
        self.pump.abort();
    }
}

impl<S> Drop for AutosaveSession<S> {
    fn drop(&mut self) {
        self.scheduler.close();
        self.pump.abort();
    }
}

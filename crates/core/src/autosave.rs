use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

use metrics::{counter, histogram};
use serde::Serialize;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, warn};

use crate::backend::PersistBackend;
use crate::types::{AutosaveEvent, PersistOutcome};

/// What caused a persist attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    /// Debounced emission after editing quiesced.
    Auto,
    /// Explicit "save now" request from the user.
    Manual,
}

impl Trigger {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Manual => "manual",
        }
    }
}

/// Serializes persist attempts for one edit session against a backend.
///
/// The scheduler enforces the write discipline described in the module
/// contract: at most one persist in flight, a single latest-wins queued
/// slot behind it, redundant automatic writes suppressed by structural
/// equality, and a baseline recorded from the first emission so the
/// just-loaded state is never written back.
///
/// Handles are cheap to clone and share one state.
pub struct AutosaveScheduler<S> {
    inner: Arc<Inner<S>>,
}

impl<S> Clone for AutosaveScheduler<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<S> {
    backend: Arc<dyn PersistBackend<S>>,
    enabled: bool,
    closed: AtomicBool,
    state: Mutex<SchedulerState<S>>,
    events: broadcast::Sender<AutosaveEvent>,
}

struct SchedulerState<S> {
    last_persisted: Option<S>,
    baseline_recorded: bool,
    in_flight: bool,
    queued: Option<QueuedWrite<S>>,
}

/// Single-slot latest-wins buffer behind the in-flight write.
struct QueuedWrite<S> {
    snapshot: S,
    trigger: Trigger,
    waiters: Vec<oneshot::Sender<PersistOutcome>>,
}

impl<S> Inner<S> {
    fn emit(&self, trigger: Trigger, outcome: &PersistOutcome) {
        // Nobody listening is fine; UI subscribers come and go.
        let _ = self.events.send(AutosaveEvent::from_outcome(trigger, outcome));
    }
}

impl<S> AutosaveScheduler<S> {
    /// Stops accepting new work. An in-flight persist runs to completion and
    /// still updates state; anything waiting behind it is discarded.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
    }
}

impl<S> AutosaveScheduler<S>
where
    S: Clone + PartialEq + Send + Sync + 'static,
{
    pub fn new(backend: Arc<dyn PersistBackend<S>>, enabled: bool) -> Self {
        let (events, _) = broadcast::channel(32);
        Self {
            inner: Arc::new(Inner {
                backend,
                enabled,
                closed: AtomicBool::new(false),
                state: Mutex::new(SchedulerState {
                    last_persisted: None,
                    baseline_recorded: false,
                    in_flight: false,
                    queued: None,
                }),
                events,
            }),
        }
    }

    /// Subscribes to persist-attempt notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<AutosaveEvent> {
        self.inner.events.subscribe()
    }

    /// Returns the snapshot most recently confirmed durable, if any.
    pub fn last_persisted(&self) -> Option<S> {
        self.inner
            .state
            .lock()
            .expect("scheduler state poisoned")
            .last_persisted
            .clone()
    }

    /// Handles one debounced emission from the automatic path.
    ///
    /// The first emission of the session only records the baseline: it is
    /// the initial load, not an edit. Later emissions persist unless they
    /// structurally equal the last durable snapshot.
    pub fn handle_emission(&self, snapshot: S) {
        {
            let mut state = self.inner.state.lock().expect("scheduler state poisoned");
            if !state.baseline_recorded {
                state.baseline_recorded = true;
                state.last_persisted = Some(snapshot);
                counter!("autosave_suppressed_total", "reason" => "baseline").increment(1);
                return;
            }
            if !self.inner.enabled {
                return;
            }
            if state.last_persisted.as_ref() == Some(&snapshot) {
                counter!("autosave_suppressed_total", "reason" => "unchanged").increment(1);
                return;
            }
        }
        self.submit(snapshot, Trigger::Auto, None);
    }

    /// Persists `snapshot` on explicit user intent, bypassing the
    /// redundant-write check, and reports the outcome for UI feedback.
    ///
    /// When a write is already in flight the request takes the queued slot;
    /// if a newer trigger supersedes it there, the caller receives the
    /// outcome of the superseding write, which contains their edits.
    pub async fn flush_now(&self, snapshot: S) -> PersistOutcome {
        let (tx, rx) = oneshot::channel();
        self.submit(snapshot, Trigger::Manual, Some(tx));
        match rx.await {
            Ok(outcome) => outcome,
            Err(_) => PersistOutcome::failed("session closed before the save could run"),
        }
    }

    fn submit(&self, snapshot: S, trigger: Trigger, waiter: Option<oneshot::Sender<PersistOutcome>>) {
        let mut waiters: Vec<_> = waiter.into_iter().collect();
        if self.inner.closed.load(Ordering::SeqCst) {
            for w in waiters {
                let _ = w.send(PersistOutcome::failed("session closed"));
            }
            return;
        }

        {
            let mut state = self.inner.state.lock().expect("scheduler state poisoned");
            if state.in_flight {
                if let Some(previous) = state.queued.take() {
                    // Latest wins; the earlier value is never written. Its
                    // waiters ride along since the newer snapshot contains
                    // their edits.
                    counter!("autosave_queue_superseded_total").increment(1);
                    let mut carried = previous.waiters;
                    carried.append(&mut waiters);
                    waiters = carried;
                }
                state.queued = Some(QueuedWrite {
                    snapshot,
                    trigger,
                    waiters,
                });
                return;
            }
            state.in_flight = true;
        }

        let inner = Arc::clone(&self.inner);
        tokio::spawn(run_writes(inner, snapshot, trigger, waiters));
    }
}

/// Drives the in-flight write and drains the queued slot until it is empty.
///
/// This is the only suspension point in the subsystem: every await here is
/// a `persist` call. Scheduler state is only touched between writes, under
/// the lock, so no lock is ever held across an await.
async fn run_writes<S>(
    inner: Arc<Inner<S>>,
    mut snapshot: S,
    mut trigger: Trigger,
    mut waiters: Vec<oneshot::Sender<PersistOutcome>>,
) where
    S: Clone + PartialEq + Send + Sync + 'static,
{
    loop {
        let started = std::time::Instant::now();
        let result = inner.backend.persist(&snapshot).await;
        histogram!("autosave_persist_duration_seconds").record(started.elapsed().as_secs_f64());
        let outcome = match &result {
            Ok(()) => {
                debug!(trigger = trigger.as_str(), "draft persisted");
                counter!("autosave_persist_total", "trigger" => trigger.as_str(), "result" => "ok")
                    .increment(1);
                PersistOutcome::ok()
            }
            Err(err) => {
                // Automatic failures are absorbed here: the baseline does
                // not advance, so the next changed emission retries.
                warn!(trigger = trigger.as_str(), error = %err, "persist attempt failed");
                counter!("autosave_persist_total", "trigger" => trigger.as_str(), "result" => "error")
                    .increment(1);
                PersistOutcome::failed(err.to_string())
            }
        };
        for w in waiters.drain(..) {
            let _ = w.send(outcome.clone());
        }
        inner.emit(trigger, &outcome);

        let next = {
            let mut state = inner.state.lock().expect("scheduler state poisoned");
            if result.is_ok() {
                state.last_persisted = Some(snapshot.clone());
            }
            match state.queued.take() {
                Some(queued) if inner.closed.load(Ordering::SeqCst) => {
                    // Torn down mid-write: the completed write counted, the
                    // follow-up does not.
                    state.in_flight = false;
                    for w in queued.waiters {
                        let _ = w.send(PersistOutcome::failed("session closed"));
                    }
                    None
                }
                Some(queued)
                    if result.is_ok() && state.last_persisted.as_ref() == Some(&queued.snapshot) =>
                {
                    // The queued value just became durable via the write
                    // that finished; nothing left to do.
                    state.in_flight = false;
                    counter!("autosave_suppressed_total", "reason" => "unchanged").increment(1);
                    for w in queued.waiters {
                        let _ = w.send(PersistOutcome::ok());
                    }
                    None
                }
                Some(queued) => Some(queued),
                None => {
                    state.in_flight = false;
                    None
                }
            }
        };

        match next {
            Some(queued) => {
                snapshot = queued.snapshot;
                trigger = queued.trigger;
                waiters = queued.waiters;
            }
            None => break,
        }
    }
}

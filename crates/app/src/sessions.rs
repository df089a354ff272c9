use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tracing::info;

use recdesk_core::{AutosaveConfig, AutosaveSession, CandidateDraft};
use recdesk_storage::{Database, DraftStore};

use crate::hub::{UpdateHub, UpdateNotice};

/// Context object owning the table of open edit sessions.
///
/// Constructed once per process and passed to the command dispatcher; there
/// is no module-level shared state. Each open record gets its own
/// [`AutosaveSession`] bound to a [`DraftStore`] for that record.
pub struct SessionRegistry {
    database: Database,
    hub: UpdateHub,
    autosave: AutosaveConfig,
    sessions: Mutex<HashMap<String, Arc<AutosaveSession<CandidateDraft>>>>,
}

impl SessionRegistry {
    pub fn new(database: Database, hub: UpdateHub, autosave: AutosaveConfig) -> Self {
        Self {
            database,
            hub,
            autosave,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Opens an edit session for `record_id`, creating the autosave wiring.
    ///
    /// Opening an already-open record returns the existing session; the UI
    /// may re-mount a form without tearing the old one down first.
    pub fn open(&self, record_id: &str) -> Arc<AutosaveSession<CandidateDraft>> {
        let mut sessions = self.sessions.lock().expect("session table poisoned");
        if let Some(existing) = sessions.get(record_id) {
            return Arc::clone(existing);
        }

        let backend = Arc::new(DraftStore::new(&self.database, record_id));
        let session = Arc::new(AutosaveSession::spawn(self.autosave, backend));
        self.forward_events(record_id, &session);
        sessions.insert(record_id.to_string(), Arc::clone(&session));
        info!(record_id, "edit session opened");
        session
    }

    /// Looks up the open session for `record_id`.
    pub fn get(
        &self,
        record_id: &str,
    ) -> Result<Arc<AutosaveSession<CandidateDraft>>, SessionError> {
        self.sessions
            .lock()
            .expect("session table poisoned")
            .get(record_id)
            .cloned()
            .ok_or_else(|| SessionError::NotOpen(record_id.to_string()))
    }

    /// Closes the session for `record_id`, cancelling its pending debounce
    /// timer. An in-flight persist is left to complete.
    pub fn close(&self, record_id: &str) -> bool {
        let removed = self
            .sessions
            .lock()
            .expect("session table poisoned")
            .remove(record_id);
        match removed {
            Some(session) => {
                session.close();
                info!(record_id, "edit session closed");
                true
            }
            None => false,
        }
    }

    /// Closes every open session; used at shutdown.
    pub fn close_all(&self) {
        let drained: Vec<_> = self
            .sessions
            .lock()
            .expect("session table poisoned")
            .drain()
            .collect();
        for (record_id, session) in drained {
            session.close();
            info!(record_id, "edit session closed");
        }
    }

    pub fn open_count(&self) -> usize {
        self.sessions.lock().expect("session table poisoned").len()
    }

    fn forward_events(&self, record_id: &str, session: &AutosaveSession<CandidateDraft>) {
        let mut events = session.subscribe();
        let hub = self.hub.clone();
        let record_id = record_id.to_string();
        tokio::spawn(async move {
            // Ends when the session's event channel closes at teardown.
            loop {
                match events.recv().await {
                    Ok(event) => hub.publish(UpdateNotice::from_autosave(&record_id, event)),
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                }
            }
        });
    }
}

/// Errors from session lookup.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no open edit session for record {0}")]
    NotOpen(String),
}

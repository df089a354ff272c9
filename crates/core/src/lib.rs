//! Domain layer for the recdesk backend.
//!
//! Hosts the draft types shared across the application, the trailing-edge
//! debounce primitive, and the auto-persistence scheduler that commits edit
//! buffers to the store once editing activity quiesces.

pub mod autosave;
pub mod backend;
pub mod debounce;
pub mod session;
pub mod types;

pub use autosave::{AutosaveScheduler, Trigger};
pub use backend::{PersistBackend, PersistError};
pub use debounce::Debouncer;
pub use session::AutosaveSession;
pub use types::{AutosaveConfig, AutosaveEvent, CandidateDraft, PersistOutcome};

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::autosave::Trigger;

/// Editable candidate record state as held by the UI shell.
///
/// Snapshots are compared structurally; two drafts with identical field
/// values are the same snapshot regardless of how they were produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateDraft {
    pub full_name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub current_title: Option<String>,
    #[serde(default)]
    pub notes: String,
}

/// Configuration for one autosave session.
#[derive(Debug, Clone, Copy)]
pub struct AutosaveConfig {
    /// Quiet period that must elapse with no further edits before the
    /// pending draft is committed.
    pub debounce_window: Duration,
    /// When `false` the automatic path is inert; manual flushes still work.
    pub enabled: bool,
}

/// Result of a persist attempt, shaped for UI feedback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PersistOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PersistOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Notification emitted after every persist attempt resolves.
#[derive(Debug, Clone, Serialize)]
pub struct AutosaveEvent {
    pub trigger: Trigger,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AutosaveEvent {
    pub(crate) fn from_outcome(trigger: Trigger, outcome: &PersistOutcome) -> Self {
        Self {
            trigger,
            success: outcome.success,
            error: outcome.error.clone(),
        }
    }
}

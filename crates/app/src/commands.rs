use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc};

use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

use recdesk_core::CandidateDraft;
use recdesk_storage::{CandidateError, Database, DraftError};

use crate::hub::UpdateHub;
use crate::sessions::{SessionError, SessionRegistry};
use crate::telemetry;

/// Everything a command handler may touch, assembled once in `main`.
pub struct CommandContext {
    pub database: Database,
    pub sessions: SessionRegistry,
    pub hub: UpdateHub,
    pub metrics: PrometheusHandle,
}

type HandlerFuture = Pin<Box<dyn Future<Output = Result<Value, CommandError>> + Send>>;
type Handler = Box<dyn Fn(Arc<CommandContext>, Value) -> HandlerFuture + Send + Sync>;

/// Dispatch table mapping command names to handlers.
///
/// Each handler has an explicit serde input contract and produces a JSON
/// payload; anything else (unknown name, malformed payload) becomes a
/// structured [`CommandError`], never a crash.
pub struct CommandRegistry {
    handlers: HashMap<&'static str, Handler>,
}

impl CommandRegistry {
    /// Builds the registry with every command the UI shell may issue.
    pub fn with_default_commands() -> Self {
        let mut registry = Self {
            handlers: HashMap::new(),
        };
        registry.register("session.open", session_open);
        registry.register("session.close", session_close);
        registry.register("draft.update", draft_update);
        registry.register("draft.flush", draft_flush);
        registry.register("draft.load", draft_load);
        registry.register("candidate.create", candidate_create);
        registry.register("candidate.list", candidate_list);
        registry.register("diagnostics.metrics", diagnostics_metrics);
        registry
    }

    fn register<F, Fut>(&mut self, name: &'static str, handler: F)
    where
        F: Fn(Arc<CommandContext>, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, CommandError>> + Send + 'static,
    {
        self.handlers
            .insert(name, Box::new(move |ctx, payload| Box::pin(handler(ctx, payload))));
    }

    /// Looks up and runs the handler for `command`.
    pub async fn dispatch(
        &self,
        ctx: Arc<CommandContext>,
        command: &str,
        payload: Value,
    ) -> Result<Value, CommandError> {
        let Some(handler) = self.handlers.get(command) else {
            counter!("ipc_commands_total", "command" => "unknown", "result" => "error")
                .increment(1);
            return Err(CommandError::UnknownCommand(command.to_string()));
        };

        let result = handler(Arc::clone(&ctx), payload).await;
        counter!(
            "ipc_commands_total",
            "command" => command.to_string(),
            "result" => if result.is_ok() { "ok" } else { "error" }
        )
        .increment(1);
        result
    }

    pub fn command_names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.handlers.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

/// Errors surfaced to the UI shell as structured replies.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("unknown command '{0}'")]
    UnknownCommand(String),
    #[error("invalid payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("storage error: {0}")]
    Storage(String),
}

impl CommandError {
    /// Stable machine-readable code for the error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownCommand(_) => "unknown_command",
            Self::InvalidPayload(_) => "invalid_payload",
            Self::Session(_) => "session_not_open",
            Self::Storage(_) => "storage",
        }
    }
}

impl From<DraftError> for CommandError {
    fn from(err: DraftError) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<CandidateError> for CommandError {
    fn from(err: CandidateError) -> Self {
        Self::Storage(err.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct RecordRef {
    record_id: String,
}

#[derive(Debug, Deserialize)]
struct DraftInput {
    record_id: String,
    draft: CandidateDraft,
}

#[derive(Debug, Deserialize)]
struct CandidateInput {
    draft: CandidateDraft,
}

fn parse<T: for<'de> Deserialize<'de>>(payload: Value) -> Result<T, CommandError> {
    Ok(serde_json::from_value(payload)?)
}

async fn load_stored_draft(
    ctx: &CommandContext,
    record_id: &str,
) -> Result<Option<CandidateDraft>, CommandError> {
    let row = ctx.database.drafts().fetch(record_id).await?;
    match row {
        Some(row) => Ok(Some(row.into_draft()?)),
        None => Ok(None),
    }
}

async fn session_open(ctx: Arc<CommandContext>, payload: Value) -> Result<Value, CommandError> {
    let input: RecordRef = parse(payload)?;
    ctx.sessions.open(&input.record_id);
    let draft = load_stored_draft(&ctx, &input.record_id).await?;
    Ok(json!({ "record_id": input.record_id, "draft": draft }))
}

async fn session_close(ctx: Arc<CommandContext>, payload: Value) -> Result<Value, CommandError> {
    let input: RecordRef = parse(payload)?;
    let closed = ctx.sessions.close(&input.record_id);
    Ok(json!({ "closed": closed }))
}

async fn draft_update(ctx: Arc<CommandContext>, payload: Value) -> Result<Value, CommandError> {
    let input: DraftInput = parse(payload)?;
    let session = ctx.sessions.get(&input.record_id)?;
    session.on_observed_change(input.draft);
    Ok(json!({ "accepted": true }))
}

async fn draft_flush(ctx: Arc<CommandContext>, payload: Value) -> Result<Value, CommandError> {
    let input: DraftInput = parse(payload)?;
    let session = ctx.sessions.get(&input.record_id)?;
    let outcome = session.flush_now(input.draft).await;
    Ok(serde_json::to_value(outcome)?)
}

async fn draft_load(ctx: Arc<CommandContext>, payload: Value) -> Result<Value, CommandError> {
    let input: RecordRef = parse(payload)?;
    let draft = load_stored_draft(&ctx, &input.record_id).await?;
    Ok(json!({ "draft": draft }))
}

async fn candidate_create(ctx: Arc<CommandContext>, payload: Value) -> Result<Value, CommandError> {
    let input: CandidateInput = parse(payload)?;
    let id = ctx.database.candidates().insert(&input.draft).await?;
    Ok(json!({ "id": id }))
}

async fn candidate_list(ctx: Arc<CommandContext>, _payload: Value) -> Result<Value, CommandError> {
    let rows = ctx.database.candidates().list().await?;
    let candidates: Vec<Value> = rows
        .into_iter()
        .map(|row| {
            json!({
                "id": row.id,
                "full_name": row.full_name,
                "email": row.email,
                "phone": row.phone,
                "current_title": row.current_title,
            })
        })
        .collect();
    Ok(json!({ "candidates": candidates }))
}

async fn diagnostics_metrics(
    ctx: Arc<CommandContext>,
    _payload: Value,
) -> Result<Value, CommandError> {
    Ok(json!({ "metrics": telemetry::render_metrics(&ctx.metrics) }))
}

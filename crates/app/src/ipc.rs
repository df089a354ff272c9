use std::io;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::commands::{CommandContext, CommandRegistry};

/// One request from the UI shell, newline-delimited JSON on stdin.
#[derive(Debug, Deserialize)]
pub struct Request {
    pub id: u64,
    pub command: String,
    #[serde(default)]
    pub payload: Value,
}

/// Reply envelope written to stdout, one JSON object per line.
#[derive(Debug, Serialize)]
pub struct Response {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

impl Response {
    fn success(id: u64, payload: Value) -> Self {
        Self {
            id: Some(id),
            ok: true,
            payload: Some(payload),
            error: None,
        }
    }

    fn failure(id: Option<u64>, code: &'static str, message: String) -> Self {
        Self {
            id,
            ok: false,
            payload: None,
            error: Some(ErrorBody { code, message }),
        }
    }
}

/// Drives the command loop until stdin closes.
///
/// Replies and autosave notifications are interleaved on stdout; both are
/// single-line JSON so the shell can frame them trivially.
pub async fn run(ctx: Arc<CommandContext>, registry: CommandRegistry) -> io::Result<()> {
    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    let mut stdout = tokio::io::stdout();
    let mut notices = ctx.hub.subscribe();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if line.trim().is_empty() {
                    continue;
                }
                let response = process_line(&registry, Arc::clone(&ctx), &line).await;
                write_json(&mut stdout, &response).await?;
            }
            notice = notices.recv() => {
                match notice {
                    Ok(notice) => write_json(&mut stdout, &notice).await?,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "update notices dropped");
                    }
                    // The context owns the hub, so the channel cannot close
                    // while we run; resubscribe rather than spin.
                    Err(RecvError::Closed) => notices = ctx.hub.subscribe(),
                }
            }
        }
    }

    info!("stdin closed, shutting down");
    ctx.sessions.close_all();
    Ok(())
}

/// Parses and dispatches a single request line.
pub async fn process_line(
    registry: &CommandRegistry,
    ctx: Arc<CommandContext>,
    line: &str,
) -> Response {
    let request: Request = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(err) => {
            return Response::failure(None, "invalid_request", format!("unparseable request: {err}"))
        }
    };

    match registry.dispatch(ctx, &request.command, request.payload).await {
        Ok(payload) => Response::success(request.id, payload),
        Err(err) => Response::failure(Some(request.id), err.code(), err.to_string()),
    }
}

async fn write_json<W, T>(writer: &mut W, value: &T) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut buf = serde_json::to_vec(value)
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
    buf.push(b'\n');
    writer.write_all(&buf).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::UpdateHub;
    use crate::sessions::SessionRegistry;
    use crate::telemetry;
    use recdesk_core::AutosaveConfig;
    use recdesk_storage::Database;
    use serde_json::json;
    use std::time::Duration;

    async fn context(name: &str) -> Arc<CommandContext> {
        let url = format!("sqlite:file:{name}?mode=memory&cache=shared");
        let database = Database::connect(&url).await.expect("connect");
        database.run_migrations().await.expect("migrations");
        let hub = UpdateHub::new();
        let sessions = SessionRegistry::new(
            database.clone(),
            hub.clone(),
            AutosaveConfig {
                debounce_window: Duration::from_millis(20),
                enabled: true,
            },
        );
        let metrics = telemetry::init_metrics().expect("metrics recorder");
        Arc::new(CommandContext {
            database,
            sessions,
            hub,
            metrics,
        })
    }

    #[tokio::test]
    async fn unparseable_line_gets_an_error_envelope() {
        let ctx = context("ipc_unparseable").await;
        let registry = CommandRegistry::with_default_commands();

        let response = process_line(&registry, ctx, "not json").await;
        assert!(!response.ok);
        assert!(response.id.is_none());
        assert_eq!(response.error.expect("error body").code, "invalid_request");
    }

    #[tokio::test]
    async fn valid_request_round_trips() {
        let ctx = context("ipc_roundtrip").await;
        let registry = CommandRegistry::with_default_commands();

        let line = json!({
            "id": 7,
            "command": "session.open",
            "payload": { "record_id": "rec-1" },
        })
        .to_string();

        let response = process_line(&registry, ctx, &line).await;
        assert!(response.ok);
        assert_eq!(response.id, Some(7));
        assert_eq!(response.payload.expect("payload")["record_id"], "rec-1");
    }

    #[tokio::test]
    async fn command_errors_keep_the_request_id() {
        let ctx = context("ipc_command_error").await;
        let registry = CommandRegistry::with_default_commands();

        let line = json!({
            "id": 9,
            "command": "draft.update",
            "payload": { "record_id": "rec-1", "draft": { "full_name": "Ada", "notes": "" } },
        })
        .to_string();

        let response = process_line(&registry, ctx, &line).await;
        assert!(!response.ok);
        assert_eq!(response.id, Some(9));
        assert_eq!(response.error.expect("error body").code, "session_not_open");
    }

    #[test]
    fn response_envelope_serializes_compactly() {
        let response = Response::success(1, json!({ "accepted": true }));
        let encoded = serde_json::to_string(&response).expect("encode");
        assert_eq!(encoded, r#"{"id":1,"ok":true,"payload":{"accepted":true}}"#);
    }
}

mod commands;
mod hub;
mod ipc;
mod sessions;
mod telemetry;

use std::sync::Arc;

use tracing::info;

use recdesk_core::AutosaveConfig;
use recdesk_storage::Database;
use recdesk_util::{load_env_file, AppConfig};

use commands::{CommandContext, CommandRegistry};
use hub::UpdateHub;
use sessions::SessionRegistry;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    load_env_file();
    let config = AppConfig::from_env()?;

    telemetry::init_tracing(&config)?;
    let metrics = telemetry::init_metrics()?;

    let database = Database::connect(&config.database_url).await?;
    database.run_migrations().await?;

    let hub = UpdateHub::new();
    let sessions = SessionRegistry::new(
        database.clone(),
        hub.clone(),
        AutosaveConfig {
            debounce_window: config.autosave_debounce,
            enabled: config.autosave_enabled,
        },
    );

    let registry = CommandRegistry::with_default_commands();
    let ctx = Arc::new(CommandContext {
        database,
        sessions,
        hub,
        metrics,
    });

    info!(
        env = %config.environment.as_str(),
        debounce_ms = config.autosave_debounce.as_millis() as u64,
        autosave_enabled = config.autosave_enabled,
        "recdesk backend ready"
    );

    ipc::run(ctx, registry).await.map_err(|err| err.into())
}

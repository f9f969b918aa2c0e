// Best-ball draft server entry point.
//
// Startup sequence:
// 1. Load config
// 2. Initialize tracing (log file, or stdout when configured)
// 3. Open database
// 4. Load the player pool
// 5. Build the room supervisor
// 6. Recover rooms left mid-draft
// 7. Spawn WebSocket server task
// 8. Wait for Ctrl+C, then stop

use std::sync::Arc;

use anyhow::Context;
use bestball_engine::db::Database;
use bestball_engine::pool::CsvPlayerPool;
use bestball_engine::supervisor::RoomSupervisor;
use bestball_server::config;
use bestball_server::ws_server;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Load config
    let config = config::load_config().context("failed to load configuration")?;

    // 2. Initialize tracing
    init_tracing(config.log_stdout)?;
    info!("Best-ball draft server starting up");
    info!(
        "Config loaded: port={}, {} rounds, {}s per pick, autodraft after {:?} misses",
        config.ws_port,
        config.draft.total_rounds,
        config.draft.pick_seconds,
        config.policy.missed_picks_before_autodraft
    );

    // 3. Open database
    if let Some(parent) = config.db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let db_path = config.db_path.to_string_lossy();
    let db = Arc::new(Database::open(&db_path).context("failed to open database")?);
    info!("Database opened at {}", db_path);

    // 4. Load the player pool
    let pool = CsvPlayerPool::load(&config.players_csv).with_context(|| {
        format!("failed to load players from {}", config.players_csv.display())
    })?;
    info!("Player pool loaded from {}", config.players_csv.display());

    // 5. Build the room supervisor; queues persist alongside the pick log.
    let supervisor = Arc::new(RoomSupervisor::new(
        Arc::clone(&db),
        Arc::new(pool),
        db,
        config.engine_settings(),
    ));

    // 6. Recover rooms left mid-draft
    match supervisor.recover() {
        Ok(ids) if ids.is_empty() => info!("No rooms to recover"),
        Ok(ids) => info!("Recovered {} room(s): {}", ids.len(), ids.join(", ")),
        Err(e) => {
            error!("Room recovery failed: {}", e);
            return Err(anyhow::Error::new(e).context("room recovery failed"));
        }
    }

    // 7. Spawn WebSocket server task
    let ws_port = config.ws_port;
    let ws_supervisor = Arc::clone(&supervisor);
    let defaults = config.draft.clone();
    let ws_handle = tokio::spawn(async move {
        if let Err(e) = ws_server::run(ws_port, ws_supervisor, defaults).await {
            error!("WebSocket server error on port {}: {}", ws_port, e);
        }
    });
    info!("Server ready on 127.0.0.1:{}", ws_port);

    // 8. Wait for Ctrl+C. Rooms still drafting keep their status so the next
    // start recovers them.
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;
    ws_handle.abort();
    info!("Active rooms at shutdown: {:?}", supervisor.room_ids());
    info!("Best-ball draft server shut down");
    Ok(())
}

/// Install the global tracing subscriber, writing to `logs/bestball.log`
/// unless stdout logging is enabled.
fn init_tracing(stdout: bool) -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("bestball_server=info,bestball_engine=info,warn"));
    let builder = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true);

    if stdout {
        tracing::subscriber::set_global_default(builder.finish())
            .context("failed to set tracing subscriber")?;
        return Ok(());
    }

    let log_dir = std::env::current_dir()?.join("logs");
    std::fs::create_dir_all(&log_dir)?;
    let log_file = std::fs::File::create(log_dir.join("bestball.log"))?;

    let subscriber = builder.with_writer(log_file).with_ansi(false).finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;
    Ok(())
}

// laddu entry point.
//
// Startup sequence:
// 1. Initialize tracing (log to file, not terminal)
// 2. Load config, resolve the session code
// 3. Open database, load/create the device identity
// 4. Fetch the initial session snapshot
// 5. Create mpsc channels
// 6. Spawn the realtime subscriber task
// 7. Spawn the app logic task
// 8. Run the TUI until the user quits
// 9. Cleanup on exit

use laddu::app;
use laddu::config;
use laddu::db;
use laddu::realtime;
use laddu::rpc::RpcClient;
use laddu::session::validate::normalize_session_code;
use laddu::tui;

use std::time::Duration;

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initialize tracing (log to file, not terminal)
    init_tracing()?;
    info!("laddu starting up");

    // 2. Load config
    let config = config::load_config().context("failed to load configuration")?;

    // Session code: CLI argument wins over config.
    let code = std::env::args()
        .nth(1)
        .or_else(|| {
            config
                .session
                .code
                .clone()
                .filter(|c| !c.trim().is_empty())
        })
        .context("no session code: pass one as the first argument or set [session] code")?;
    let code = normalize_session_code(&code);
    info!("opening session {code} at {}", config.backend.url);

    // 3. Open database, load/create the device identity
    let db = db::Database::open(&config.database.path).context("failed to open database")?;
    let device_id = db
        .get_or_create_device_id()
        .context("failed to establish device identity")?;
    let saved_name = db.display_name().unwrap_or(None);
    info!("device id {device_id}");

    // 4. Fetch the initial session snapshot (also validates the code before
    //    the terminal is put into raw mode).
    let rpc = RpcClient::new(
        &config.backend.url,
        &config.backend.anon_key,
        Duration::from_secs(config.backend.rpc_timeout_secs),
    )?;
    let snapshot = rpc
        .get_session_details(&code)
        .await
        .with_context(|| format!("could not load session {code}"))?;
    info!(
        "session loaded: {} ({} participants)",
        snapshot.session.title,
        snapshot.participants.len()
    );
    let session_id = snapshot.session.id.clone();

    // 5. Create mpsc channels
    let (rt_tx, rt_rx) = mpsc::channel(256);
    let (outcome_tx, outcome_rx) = mpsc::channel(64);
    let (cmd_tx, cmd_rx) = mpsc::channel(64);
    let (ui_tx, ui_rx) = mpsc::channel(256);

    let mut app_state = app::AppState::new(
        config.clone(),
        db,
        rpc,
        code.clone(),
        device_id,
        outcome_tx,
    );
    app_state
        .store
        .replace_all(snapshot.session, snapshot.participants);

    // Restore the bid audit trail observed in previous runs of this session.
    match app_state.db.load_bids(&session_id) {
        Ok(bids) => {
            // Stored newest-first; re-apply oldest-first so the in-memory log
            // ends up newest-first again.
            for bid in bids.into_iter().rev() {
                app_state.store.apply_bid(bid);
            }
        }
        Err(e) => error!("failed to load stored bid log: {e}"),
    }

    // 6. Spawn the realtime subscriber task
    let ws_url = realtime::websocket_url(&config.backend.url, &config.backend.anon_key);
    let rt_handle = tokio::spawn(async move {
        if let Err(e) = realtime::run(ws_url, session_id, rt_tx).await {
            error!("realtime subscriber error: {e}");
        }
    });

    // 7. Spawn the app logic task. Its startup snapshot refresh covers any
    //    events that land between the fetch above and the channel join.
    let app_handle = tokio::spawn(async move {
        if let Err(e) = app::run(rt_rx, outcome_rx, cmd_rx, ui_tx, app_state).await {
            error!("application loop error: {e}");
        }
    });

    // 8. Run the TUI event loop (blocking until the user quits)
    if let Err(e) = tui::run(ui_rx, cmd_tx, saved_name).await {
        error!("TUI error: {e}");
    }

    // 9. Cleanup: wait briefly for the app task, then stop the subscriber
    //    (it reconnects forever otherwise).
    let _ = tokio::time::timeout(Duration::from_secs(5), async {
        let _ = app_handle.await;
    })
    .await;
    rt_handle.abort();

    info!("laddu shut down cleanly");
    Ok(())
}

/// Initialize tracing to log to a file (not the terminal, which is used by
/// the TUI).
fn init_tracing() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let log_dir = std::env::current_dir()?.join("logs");
    std::fs::create_dir_all(&log_dir)?;

    let log_file = std::fs::File::create(log_dir.join("laddu.log"))?;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("laddu=info,warn")),
        )
        .with_writer(log_file)
        .with_ansi(false)
        .with_target(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}

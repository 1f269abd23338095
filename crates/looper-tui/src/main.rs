mod action;
mod app;
mod app_state;
mod component;
mod components;
mod core;
mod focus;
mod history;
mod player;
mod theme;
mod widgets;

use tokio::sync::{broadcast, mpsc};

use looper_proto::player::LoopSnapshot;

/// What the LoopCore broadcasts to its listeners.
#[derive(Debug, Clone)]
pub enum BroadcastMessage {
    /// The loop session changed; the payload is a full snapshot.
    SessionUpdated(LoopSnapshot),
    /// A log message from the core event loop.
    Log(String),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let data_dir = looper_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;

    let log_path = data_dir.join("looper.log");
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    // Allow RUST_LOG override; default to debug for app code but suppress noisy
    // connection-level DEBUG from HTTP client internals (hyper_util, reqwest).
    let log_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "debug,hyper_util=warn,reqwest=warn,hyper=warn".to_string());
    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_env_filter(log_filter.as_str())
        .with_ansi(false)
        .init();

    // Print log path to stderr so the operator can tail it immediately.
    eprintln!("looper log: {}", log_path.display());

    tracing::info!("looper starting…");

    // ── Load config ──────────────────────────────────────────────────────────
    let config = looper_proto::config::Config::load().unwrap_or_default();

    // ── Broadcast channel (LoopCore → TUI) ───────────────────────────────────
    let (broadcast_tx, broadcast_rx) = broadcast::channel::<BroadcastMessage>(1024);

    // ── CoreEvent channel (TUI → LoopCore) ───────────────────────────────────
    let (event_tx, event_rx) = mpsc::channel::<core::CoreEvent>(1024);

    // ── Build + spawn the loop core ──────────────────────────────────────────
    let loop_core = core::LoopCore::new(&config, broadcast_tx.clone(), event_tx.clone());
    tokio::spawn(async move {
        if let Err(e) = loop_core.run(event_rx).await {
            tracing::error!("LoopCore exited with error: {}", e);
        }
    });

    // ── Run TUI ──────────────────────────────────────────────────────────────
    let app = app::App::new(&config, event_tx);
    app.run(broadcast_rx).await?;

    Ok(())
}

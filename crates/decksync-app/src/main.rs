//! Binary entrypoint that wires the DeckSync services together and blocks
//! until shutdown.
//!
//! Boot order matters: the listener comes up first so browsers can connect
//! and show the analysing overlay, then the startup BPM scan runs in the
//! background, and only after it completes do the directory watchers start.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use decksync_api::{ApiServer, ApiState};
use decksync_data::{BpmCache, ConfigStore, EffectStore, OverlayStore};
use decksync_engine::Engine;
use decksync_events::{EventBus, LibraryKind};
use decksync_library::LibraryIndex;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Directory poll cadence for both library watchers.
const WATCH_INTERVAL: Duration = Duration::from_secs(2);

/// How long open connections get to drain after the shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Parser)]
#[command(
    name = "decksync",
    version,
    about = "Coordination server bridging a DJ console to browser video walls"
)]
struct Cli {
    /// HTTP listen address.
    #[arg(long, default_value = "0.0.0.0:8090")]
    addr: SocketAddr,

    /// SQLite database path.
    #[arg(long, default_value = "decksync.db")]
    db: PathBuf,

    /// Directory containing song video files.
    #[arg(long, default_value = "./videos")]
    videos: PathBuf,

    /// Directory containing transition video files.
    #[arg(long = "transition-videos", default_value = "./transition-videos")]
    transition_videos: PathBuf,

    /// Enable debug logging.
    #[arg(long)]
    debug: bool,

    /// Do not open the dashboard in a browser on startup.
    #[arg(long = "no-browser")]
    no_browser: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug)?;
    run(cli).await
}

fn init_logging(debug: bool) -> anyhow::Result<()> {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|err| anyhow::anyhow!("failed to install tracing subscriber: {err}"))
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let pool = decksync_data::open(&cli.db)
        .await
        .with_context(|| format!("failed to open database {}", cli.db.display()))?;
    let config = ConfigStore::new(pool.clone())
        .await
        .context("failed to load configuration")?;
    let effects = EffectStore::new(pool.clone())
        .await
        .context("failed to load transition effects")?;
    let overlays = OverlayStore::new(pool.clone());
    let bpm_cache = BpmCache::new(pool);

    let songs_dir = config.get("videos_dir", &cli.videos.to_string_lossy());
    let transitions_dir = config.get(
        "transition_videos_dir",
        &cli.transition_videos.to_string_lossy(),
    );
    let songs = Arc::new(LibraryIndex::new(
        songs_dir.as_str(),
        "/videos/",
        Some(bpm_cache.clone()),
    ));
    let transitions = Arc::new(LibraryIndex::new(
        transitions_dir.as_str(),
        "/transition-videos/",
        Some(bpm_cache.clone()),
    ));

    let engine = Engine::new(
        EventBus::new(),
        config.clone(),
        effects.clone(),
        Arc::clone(&songs),
        Arc::clone(&transitions),
    );
    let state = Arc::new(ApiState::new(engine.clone(), config, effects, overlays));
    let shutdown = Arc::clone(&state.shutdown);

    let listener = TcpListener::bind(cli.addr)
        .await
        .with_context(|| format!("failed to bind {}", cli.addr))?;
    info!(addr = %cli.addr, "HTTP server starting");

    if !cli.no_browser && !cli.debug {
        open_dashboard(cli.addr);
    }

    // Deferred startup scan plus the directory watchers, all in one task so
    // a single abort tears them down together.
    let background = {
        let engine = engine.clone();
        let songs = Arc::clone(&songs);
        let transitions = Arc::clone(&transitions);
        tokio::spawn(async move {
            engine.set_analysing(true);
            info!("bpm analysis starting");
            songs.scan().await;
            transitions.scan().await;
            if let Err(err) = bpm_cache.cleanup().await {
                warn!(error = %err, "bpm cache cleanup failed");
            }
            engine.set_analysing(false);
            info!("bpm analysis complete");

            engine.library_updated(LibraryKind::Song).await;
            engine.library_updated(LibraryKind::Transition).await;

            let song_watch = songs.watch(WATCH_INTERVAL, {
                let engine = engine.clone();
                move || {
                    let engine = engine.clone();
                    async move { engine.library_updated(LibraryKind::Song).await }
                }
            });
            let transition_watch = transitions.watch(WATCH_INTERVAL, {
                let engine = engine.clone();
                move || {
                    let engine = engine.clone();
                    async move { engine.library_updated(LibraryKind::Transition).await }
                }
            });
            tokio::join!(song_watch, transition_watch);
        })
    };

    // One shared signal: interrupt or the shutdown endpoint.
    let (signal_tx, signal_rx) = tokio::sync::watch::channel(false);
    let signal_task = tokio::spawn(async move {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(err) = result {
                    warn!(error = %err, "failed to listen for interrupt");
                }
                info!("interrupt received");
            }
            () = shutdown.notified() => info!("shutdown endpoint triggered"),
        }
        let _ = signal_tx.send(true);
    });

    let graceful = {
        let mut rx = signal_rx.clone();
        async move {
            let _ = rx.wait_for(|fired| *fired).await;
        }
    };
    let server = tokio::spawn(ApiServer::new(state).serve(listener, graceful));

    {
        let mut rx = signal_rx;
        let _ = rx.wait_for(|fired| *fired).await;
    }
    info!("shutting down...");
    background.abort();

    // Long-lived SSE streams hold their connections open; bound the drain
    // and cut them loose at process exit, like the reference server does.
    match tokio::time::timeout(SHUTDOWN_GRACE, server).await {
        Ok(joined) => joined
            .context("server task panicked")?
            .context("server terminated unexpectedly")?,
        Err(_) => info!("drain window elapsed with streams still open"),
    }
    signal_task.abort();

    info!("shutdown complete");
    Ok(())
}

fn open_dashboard(addr: SocketAddr) {
    let host = if addr.ip().is_unspecified() {
        "localhost".to_string()
    } else {
        addr.ip().to_string()
    };
    let url = format!("http://{host}:{}/", addr.port());
    info!(url = %url, "opening dashboard in browser");
    if let Err(err) = open::that_detached(&url) {
        warn!(error = %err, "failed to open browser");
    }
}

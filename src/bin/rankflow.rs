use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use rankflow::config::Settings;
use rankflow::proxy::MediaProxy;
use rankflow::runtime::ChromiumSession;
use rankflow::server::{AppState, build_router};
use rankflow::session::SessionController;

#[derive(Parser, Debug)]
#[command(name = "rankflow", about = "Scraping proxy for the twivideo ranking feed")]
struct Cli {
    /// Listen port (overrides PORT)
    #[arg(long)]
    port: Option<u16>,

    /// Chrome/Chromium executable (overrides RANKFLOW_CHROME_BIN)
    #[arg(long)]
    chrome_bin: Option<PathBuf>,

    /// Run the browser with a visible window
    #[arg(long)]
    show_browser: bool,

    /// Static file document root (overrides RANKFLOW_STATIC_ROOT)
    #[arg(long)]
    static_root: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut settings = Settings::from_env()?;
    if let Some(port) = cli.port {
        settings.port = port;
    }
    if let Some(chrome_bin) = cli.chrome_bin {
        settings.chrome_executable = Some(chrome_bin);
    }
    if cli.show_browser {
        settings.headless = false;
    }
    if let Some(static_root) = cli.static_root {
        settings.static_root = static_root;
    }

    let port = settings.port;
    let static_root = settings.static_root.clone();

    let controller = Arc::new(SessionController::new(ChromiumSession::new(settings)));
    let state = Arc::new(AppState {
        controller: Arc::clone(&controller),
        proxy: MediaProxy::new()?,
        statics: rankflow::assets::StaticFiles::new(static_root),
    });

    // Warm the session in the background; the server starts serving static
    // files and status immediately, and /api/videos answers 503 until the
    // session comes up.
    let warmup = Arc::clone(&controller);
    tokio::spawn(async move {
        if let Err(err) = warmup.init().await {
            error!(error = %err, "browser session initialisation failed");
        }
    });

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "rankflow listening");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutting down");
    controller.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "ctrl-c handler failed");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => warn!(error = %err, "SIGTERM handler failed"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

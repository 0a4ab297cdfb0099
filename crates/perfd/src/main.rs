//! perfd - on-device profiler daemon.
//!
//! Samples CPU, thread, memory, network and agent state of profiled
//! processes into an in-memory event buffer and serves it over HTTP.

mod handlers;
mod state;

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use chrono::Utc;
use clap::Parser;
use tokio::sync::Notify;
use tower_http::cors::CorsLayer;
use tracing::{Level, error, info, warn};
use tracing_subscriber::EnvFilter;

use perfd_core::clock::SteadyClock;
use perfd_core::config::DaemonConfig;
use perfd_core::daemon::Daemon;
use perfd_core::procfs::RealFs;
use perfd_core::service::TransportService;

use state::AppState;

/// On-device profiler daemon.
#[derive(Parser)]
#[command(name = "perfd", about = "On-device profiler daemon", version = perfd_core::VERSION)]
struct Args {
    /// Listen address.
    #[arg(long, default_value = "127.0.0.1:12389", env = "PERFD_LISTEN")]
    listen: String,

    /// Path to a JSON config file. Command-line flags override its values.
    #[arg(long, env = "PERFD_CONFIG")]
    config: Option<PathBuf>,

    /// Number of events retained in memory.
    #[arg(long)]
    event_capacity: Option<usize>,

    /// Number of distinct event groups tracked.
    #[arg(long)]
    group_capacity: Option<usize>,

    /// Path to /proc filesystem (for testing/mocking).
    #[arg(long)]
    proc_path: Option<PathBuf>,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

/// Initializes the tracing subscriber with the appropriate log level.
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let mut filter = EnvFilter::from_default_env();
    for target in ["perfd", "perfd_core"] {
        match format!("{}={}", target, level).parse() {
            Ok(directive) => filter = filter.add_directive(directive),
            Err(e) => eprintln!("invalid log directive for {}: {}", target, e),
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Loads the config file, if any, and applies command-line overrides.
fn build_config(args: &Args) -> Result<DaemonConfig, String> {
    let mut config = match &args.config {
        Some(path) => DaemonConfig::from_file(path)
            .map_err(|e| format!("failed to load config {}: {}", path.display(), e))?,
        None => DaemonConfig::default(),
    };

    if let Some(capacity) = args.event_capacity {
        config.event_capacity = capacity;
    }
    if let Some(capacity) = args.group_capacity {
        config.group_capacity = capacity;
    }
    if let Some(path) = &args.proc_path {
        config.proc_path = path.clone();
    }
    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    let config = match build_config(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            process::exit(1);
        }
    };

    info!(version = perfd_core::VERSION, "perfd starting");
    info!(
        event_capacity = config.event_capacity,
        group_capacity = config.group_capacity,
        proc = %config.proc_path.display(),
        "event buffer configured"
    );

    let daemon = Daemon::new(config, Arc::new(SteadyClock::new()), Arc::new(RealFs::new()));
    let service = TransportService::new(Arc::new(daemon));

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "failed to build tokio runtime");
            process::exit(1);
        }
    };
    runtime.block_on(serve(args.listen, service));
}

async fn serve(listen: String, service: TransportService) {
    let addr: SocketAddr = match listen.parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!(listen, error = %e, "invalid listen address");
            process::exit(1);
        }
    };

    // Graceful shutdown: end sessions and release streaming readers first,
    // then let the server drain.
    let stop = Arc::new(Notify::new());
    {
        let service = service.clone();
        let stop = stop.clone();
        if let Err(e) = ctrlc::set_handler(move || {
            info!("Received shutdown signal");
            service.shutdown();
            stop.notify_one();
        }) {
            warn!("Failed to set Ctrl-C handler: {}", e);
        }
    }

    let state = AppState::new(service, Utc::now());
    let app = Router::new()
        .route("/api/v1/health", get(handlers::handle_health))
        .route("/api/v1/time", get(handlers::handle_time))
        .route("/api/v1/events", get(handlers::handle_events))
        .route("/api/v1/groups", get(handlers::handle_groups))
        .route("/api/v1/execute", post(handlers::handle_execute))
        .route("/api/v1/sessions", get(handlers::handle_sessions))
        .with_state(state)
        .layer(CorsLayer::permissive());

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(%addr, error = %e, "failed to bind");
            process::exit(1);
        }
    };
    info!(%addr, "listening");

    let shutdown = async move { stop.notified().await };
    if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(shutdown).await {
        error!(error = %e, "server error");
    }
    info!("perfd stopped");
}

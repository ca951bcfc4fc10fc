mod config;
mod http;
mod metrics;
mod pbs;
mod poll;
mod state;

use axum::serve;
use clap::Parser;
use config::Config;
use metrics::Metrics;
use pbs::client::PbsClient;
use state::State;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::net::TcpListener;
use tokio::sync::{watch, RwLock};
use tokio::time::MissedTickBehavior;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "pbsmond")]
#[command(version)]
struct Cli {
    #[arg(long, default_value = "./config.yaml")]
    config: String,
    #[arg(long)]
    print_default_config: bool,
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    if cli.print_default_config {
        println!("{}", Config::example_yaml());
        return;
    }

    let cfg = if std::path::Path::new(&cli.config).exists() {
        match Config::load_from_file(&cli.config) {
            Ok(cfg) => cfg,
            Err(err) => {
                error!(error = %err, "failed to load configuration");
                std::process::exit(1);
            }
        }
    } else {
        info!(path = %cli.config, "config file not found, using defaults");
        Config::default_config()
    };

    info!(
        listen = %cfg.listen,
        interval_secs = cfg.interval_secs,
        "starting pbsmond"
    );

    let shared_state = Arc::new(RwLock::new(State::new(now_unix())));
    let metrics = match Metrics::new() {
        Ok(m) => m,
        Err(err) => {
            error!(error = %err, "failed to initialize metrics");
            std::process::exit(1);
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let http_task = {
        let cfg = cfg.clone();
        let metrics = metrics.clone();
        let http_state = shared_state.clone();
        let mut shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            let app = http::build_router(metrics, http_state);
            let addr: SocketAddr = match cfg.listen.parse() {
                Ok(addr) => addr,
                Err(err) => {
                    error!(error = %err, listen = %cfg.listen, "invalid listen address");
                    return;
                }
            };

            let listener = match TcpListener::bind(addr).await {
                Ok(l) => l,
                Err(err) => {
                    error!(error = %err, "failed to start HTTP server");
                    return;
                }
            };
            info!(addr = %addr, "metrics available at /metrics");

            let server = serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
            });

            if let Err(err) = server.await {
                error!(error = %err, "HTTP server error");
            }
        })
    };

    let poll_task = {
        let cfg = cfg.clone();
        let metrics = metrics.clone();
        let shared_state = shared_state.clone();
        let mut shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            let client = PbsClient::new(
                cfg.qstat_command.clone(),
                cfg.pbsnodes_command.clone(),
                Duration::from_secs(cfg.command_timeout_secs),
            );
            // The first tick fires immediately, so metrics are populated
            // before the first interval elapses.
            let mut ticker = tokio::time::interval(Duration::from_secs(cfg.interval_secs));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        info!("shutdown signal received, stopping poll loop");
                        break;
                    }
                    _ = ticker.tick() => {
                        poll::run_cycle(&client, &cfg, &metrics, &shared_state).await;
                    }
                }
            }
        })
    };

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to wait for Ctrl+C");
    }
    info!("Ctrl+C received, shutting down");

    let _ = shutdown_tx.send(true);

    let _ = poll_task.await;
    let _ = http_task.await;
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

mod check;
mod config;
mod error;
mod metrics;
mod prober;
mod server;
mod util;

use config::{ConfigManager, LogFormat};
use metrics::initialize_metrics;

use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main(flavor = "multi_thread", worker_threads = 4)]
async fn main() -> anyhow::Result<()> {
    // Load config first to get log level
    let config_mgr = Arc::new(ConfigManager::start().await?);
    let startup = config_mgr.config.read().await.clone();
    let log_level = startup.get_tracing_level()?;

    println!("Starting device_ping");

    // Init tracing with configured log level
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(format!("device_ping={}", log_level.as_str().to_lowercase()).parse()?);
    match startup.log_format {
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }

    initialize_metrics(startup.enable_latency_history)?;
    if startup.enable_latency_history {
        info!("Latency history tracking enabled");
    }

    // Start metrics endpoint
    let metrics_addr = startup.metrics_socket_addr()?;
    tokio::spawn(metrics::serve_metrics(metrics_addr));

    let listen_addr = startup.listen_socket_addr()?;
    info!(
        "reachability checks on http://{}/ping (probe port {}, timeout {}ms), metrics on http://{}/metrics",
        listen_addr, startup.probe_port, startup.connect_timeout_ms, metrics_addr
    );

    let routes = server::routes(config_mgr.config.clone());
    tokio::select! {
        _ = warp::serve(routes).run(listen_addr) => {}
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                warn!("failed to listen for shutdown signal: {:?}", e);
            }
            info!("shutting down");
        }
    }
    config_mgr.shutdown();

    Ok(())
}

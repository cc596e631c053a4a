use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, watch};
use anyhow::Result;
use aws_config::meta::region::RegionProviderChain;
use aws_sdk_appconfigdata::Client as AppConfigClient;
use crate::prober::ProbeSettings;
use std::path::Path;
use tokio::fs;
use tokio::task::JoinHandle;

const DEFAULT_CONFIG_FILE: &str = "ping.json";

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct PingConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_metrics_addr")]
    pub metrics_addr: String,
    /// Port dialed by every check. Echo (7) unless the device firmware listens elsewhere.
    #[serde(default = "default_probe_port")]
    pub probe_port: u16,
    /// Deadline for resolution plus connect, per check.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_format: LogFormat,
    #[serde(default = "default_enable_latency_history")]
    pub enable_latency_history: bool,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_metrics_addr() -> String {
    "0.0.0.0:9100".to_string()
}

fn default_probe_port() -> u16 {
    7
}

fn default_connect_timeout_ms() -> u64 {
    3000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_enable_latency_history() -> bool {
    false
}

impl Default for PingConfig {
    fn default() -> Self {
        PingConfig {
            listen_addr: default_listen_addr(),
            metrics_addr: default_metrics_addr(),
            probe_port: default_probe_port(),
            connect_timeout_ms: default_connect_timeout_ms(),
            log_level: default_log_level(),
            log_format: LogFormat::default(),
            enable_latency_history: default_enable_latency_history(),
        }
    }
}

impl PingConfig {
    /// Get the log level as a tracing::Level
    pub fn get_tracing_level(&self) -> Result<tracing::Level> {
        match self.log_level.to_lowercase().as_str() {
            "trace" => Ok(tracing::Level::TRACE),
            "debug" => Ok(tracing::Level::DEBUG),
            "info" => Ok(tracing::Level::INFO),
            "warn" | "warning" => Ok(tracing::Level::WARN),
            "error" => Ok(tracing::Level::ERROR),
            _ => Err(anyhow::anyhow!("Invalid log level: {}. Valid levels are: trace, debug, info, warn, error", self.log_level))
        }
    }

    pub fn listen_socket_addr(&self) -> Result<SocketAddr> {
        self.listen_addr
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid listen_addr {}: {}", self.listen_addr, e))
    }

    pub fn metrics_socket_addr(&self) -> Result<SocketAddr> {
        self.metrics_addr
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid metrics_addr {}: {}", self.metrics_addr, e))
    }

    pub fn probe_settings(&self) -> ProbeSettings {
        ProbeSettings {
            port: self.probe_port,
            timeout: Duration::from_millis(self.connect_timeout_ms),
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.get_tracing_level()?;
        self.listen_socket_addr()?;
        self.metrics_socket_addr()?;
        if self.probe_port == 0 {
            return Err(anyhow::anyhow!("probe_port must be non-zero"));
        }
        if self.connect_timeout_ms == 0 {
            return Err(anyhow::anyhow!("connect_timeout_ms must be greater than zero"));
        }
        Ok(())
    }
}

pub struct ConfigManager {
    pub config: Arc<RwLock<PingConfig>>,

    // Poll loops exit once this fires or is dropped.
    shutdown: watch::Sender<()>,
}

impl ConfigManager {
    pub async fn start() -> Result<Self> {
        // Check if we should use AppConfig or local file
        let use_app_config = std::env::var("USE_APP_CONFIG")
            .unwrap_or_else(|_| "false".to_string())
            .parse::<bool>()
            .unwrap_or(false);

        if use_app_config {
            Self::start_with_app_config().await
        } else {
            Self::start_with_local_file().await
        }
    }

    /// Stop the background config polling.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(());
    }

    async fn start_with_app_config() -> Result<Self> {
        println!("Starting with AWS AppConfig");

        let region_provider = RegionProviderChain::default_provider().or_else("us-east-1");
        let aws_cfg = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(region_provider)
            .load()
            .await;
        let client = AppConfigClient::new(&aws_cfg);

        let app_id = std::env::var("APP_CONFIG_APPLICATION_ID")?;
        let env_id = std::env::var("APP_CONFIG_ENVIRONMENT_ID")?;
        let profile_id = std::env::var("APP_CONFIG_PROFILE_ID")?;
        let poll_interval_sec: u64 = std::env::var("APP_CONFIG_POLL_INTERVAL_SECONDS")
            .unwrap_or_else(|_| "60".to_string())
            .parse()
            .unwrap_or(60);

        let initial = Self::fetch_app_config(&client, &app_id, &env_id, &profile_id).await?;
        initial.validate()?;
        let config = Arc::new(RwLock::new(initial));

        let (shutdown_tx, mut shutdown_rx) = watch::channel(());

        {
            let config_clone = config.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown_rx.changed() => {
                            tracing::info!("AppConfig polling stopped");
                            break;
                        }
                        _ = tokio::time::sleep(Duration::from_secs(poll_interval_sec)) => {}
                    }
                    match Self::fetch_app_config(&client, &app_id, &env_id, &profile_id).await {
                        Ok(new_cfg) => Self::apply_update(&config_clone, new_cfg, "AppConfig").await,
                        Err(e) => {
                            tracing::error!("Error polling AppConfig: {:?}", e);
                        }
                    }
                }
            });
        }

        Ok(ConfigManager {
            config,
            shutdown: shutdown_tx,
        })
    }

    async fn start_with_local_file() -> Result<Self> {
        let explicit = std::env::var("PING_CONFIG").ok();
        let config_file = explicit.clone().unwrap_or_else(|| DEFAULT_CONFIG_FILE.to_string());

        // An unset PING_CONFIG with no ping.json next to the binary means "run on defaults".
        let initial = if explicit.is_none() && !Path::new(&config_file).exists() {
            println!("No {} found, starting with default config", config_file);
            PingConfig::default()
        } else {
            println!("Starting with local file: {}", config_file);
            Self::load_file_config(&config_file).await?
        };
        initial.validate()?;
        let config = Arc::new(RwLock::new(initial));

        let poll_interval_sec: u64 = std::env::var("CONFIG_POLL_INTERVAL_SECONDS")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .unwrap_or(30);

        let (shutdown_tx, shutdown_rx) = watch::channel(());
        Self::watch_file(
            config.clone(),
            config_file,
            explicit.is_some(),
            Duration::from_secs(poll_interval_sec),
            shutdown_rx,
        );

        Ok(ConfigManager {
            config,
            shutdown: shutdown_tx,
        })
    }

    /// Re-read `config_file` every `interval` until shutdown. A missing file is
    /// only an error when it was named explicitly.
    fn watch_file(
        config: Arc<RwLock<PingConfig>>,
        config_file: String,
        required: bool,
        interval: Duration,
        mut shutdown_rx: watch::Receiver<()>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        tracing::info!("Config file watch on {} stopped", config_file);
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {}
                }
                if !required && !Path::new(&config_file).exists() {
                    continue;
                }
                match Self::load_file_config(&config_file).await {
                    Ok(new_cfg) => Self::apply_update(&config, new_cfg, "Local config file").await,
                    Err(e) => {
                        tracing::error!("Error reading config file {}: {:?}", config_file, e);
                    }
                }
            }
        })
    }

    /// Swap in a reloaded config. Only the probe settings take effect without a
    /// restart; listeners and logging are fixed at startup.
    async fn apply_update(config: &RwLock<PingConfig>, new_cfg: PingConfig, source: &str) {
        if let Err(e) = new_cfg.validate() {
            tracing::error!("{} update rejected: {:?}", source, e);
            return;
        }
        let mut c = config.write().await;
        if *c != new_cfg {
            tracing::info!(
                "{} updated: probe_port={} connect_timeout_ms={}",
                source, new_cfg.probe_port, new_cfg.connect_timeout_ms
            );
            *c = new_cfg;
        }
    }

    async fn load_file_config(file_path: &str) -> Result<PingConfig> {
        if !Path::new(file_path).exists() {
            return Err(anyhow::anyhow!("Config file not found: {}", file_path));
        }

        let content = fs::read_to_string(file_path).await?;
        let config: PingConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    async fn fetch_app_config(
        client: &AppConfigClient,
        app_id: &str,
        env_id: &str,
        profile_id: &str,
    ) -> Result<PingConfig> {
        let session_resp = client
            .start_configuration_session()
            .application_identifier(app_id)
            .environment_identifier(env_id)
            .configuration_profile_identifier(profile_id)
            .send()
            .await?;

        let token = session_resp
            .initial_configuration_token()
            .ok_or_else(|| anyhow::anyhow!("No initial token from AppConfigData"))?;

        let latest = client
            .get_latest_configuration()
            .configuration_token(token)
            .send()
            .await?;

        let cfg_bytes = latest
            .configuration()
            .map(|c| c.as_ref())
            .unwrap_or_default();

        let cfg: PingConfig = serde_json::from_slice(cfg_bytes)?;
        Ok(cfg)
    }
}

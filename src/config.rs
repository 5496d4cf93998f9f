use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Capture source identifier (interface name)
    #[serde(default = "default_interface")]
    pub network_interface: String,

    #[serde(default)]
    pub detection: DetectionConfig,

    #[serde(default)]
    pub alerts: AlertsConfig,

    #[serde(default)]
    pub osint: OsintConfig,

    #[serde(default)]
    pub geolocation: GeolocationConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub llm: LlmConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            network_interface: default_interface(),
            detection: DetectionConfig::default(),
            alerts: AlertsConfig::default(),
            osint: OsintConfig::default(),
            geolocation: GeolocationConfig::default(),
            storage: StorageConfig::default(),
            api: ApiConfig::default(),
            llm: LlmConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Config = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;

        Ok(config)
    }

    /// Load config from the given path, creating it with defaults when
    /// missing. A parse failure falls back to defaults with a warning
    /// rather than refusing to start.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if path.exists() {
            match Self::load(path) {
                Ok(config) => return config,
                Err(e) => {
                    warn!("Error loading config: {:#}. Using defaults.", e);
                    return Self::default();
                }
            }
        }

        let config = Self::default();
        if let Err(e) = config.save(path) {
            warn!("Could not write default config to {}: {}", path.display(), e);
        }
        config
    }

    /// Save configuration to a JSON file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Capture interface, with the `NETWORK_INTERFACE` environment
    /// variable taking priority over the file.
    pub fn network_interface(&self) -> String {
        std::env::var("NETWORK_INTERFACE").unwrap_or_else(|_| self.network_interface.clone())
    }

    pub fn db_path(&self) -> PathBuf {
        PathBuf::from(&self.storage.db_file)
    }

    pub fn log_path(&self) -> PathBuf {
        PathBuf::from(&self.storage.log_file)
    }
}

/// Detector thresholds and windows
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// Requests to a single port within the window before a DDoS fires
    #[serde(default = "default_ddos_threshold")]
    pub ddos_threshold: usize,

    /// Unique-port and total-event floor for the port scan heuristic
    #[serde(default = "default_port_scan_threshold")]
    pub port_scan_threshold: usize,

    /// SQLi pattern hits within the web window before an alert
    #[serde(default = "default_injection_threshold")]
    pub sql_injection_threshold: usize,

    /// XSS pattern hits within the web window before an alert. The
    /// legacy key `xss_threshold` is accepted on read.
    #[serde(
        rename = "xss_injection_threshold",
        alias = "xss_threshold",
        default = "default_injection_threshold"
    )]
    pub xss_threshold: usize,

    /// SYN count floor for the flood detector
    #[serde(default = "default_syn_flood_threshold")]
    pub syn_flood_threshold: usize,

    /// ACK/SYN ratio ceiling; below this with enough SYNs means flood
    #[serde(default = "default_syn_ack_ratio")]
    pub syn_ack_ratio_threshold: f64,

    /// Sliding window for the volumetric/scan/SYN detectors (seconds)
    #[serde(default = "default_time_window")]
    pub time_window_seconds: u64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            ddos_threshold: default_ddos_threshold(),
            port_scan_threshold: default_port_scan_threshold(),
            sql_injection_threshold: default_injection_threshold(),
            xss_threshold: default_injection_threshold(),
            syn_flood_threshold: default_syn_flood_threshold(),
            syn_ack_ratio_threshold: default_syn_ack_ratio(),
            time_window_seconds: default_time_window(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Minimum seconds between alerts for the same (source, kind)
    #[serde(default = "default_throttle")]
    pub throttle_seconds: u64,

    #[serde(default = "default_smtp_server")]
    pub smtp_server: String,

    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            throttle_seconds: default_throttle(),
            smtp_server: default_smtp_server(),
            smtp_port: default_smtp_port(),
        }
    }
}

/// SMTP credentials and recipients, environment-only
#[derive(Debug, Clone, Default)]
pub struct EmailEnv {
    pub sender: Option<String>,
    pub password: Option<String>,
    pub recipients: Vec<String>,
}

impl EmailEnv {
    pub fn from_env() -> Self {
        let recipients = std::env::var("ALERT_RECIPIENT_EMAILS")
            .unwrap_or_default()
            .split(',')
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty())
            .collect();

        Self {
            sender: std::env::var("ALERT_SENDER_EMAIL").ok().filter(|s| !s.is_empty()),
            password: std::env::var("ALERT_SENDER_PASSWORD").ok().filter(|s| !s.is_empty()),
            recipients,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.sender.is_some() && self.password.is_some() && !self.recipients.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OsintConfig {
    #[serde(default = "default_feodo_url")]
    pub feodo_tracker_url: String,

    #[serde(default = "default_urlhaus_url")]
    pub urlhaus_url: String,

    #[serde(default = "default_update_interval")]
    pub update_interval_hours: u64,
}

impl Default for OsintConfig {
    fn default() -> Self {
        Self {
            feodo_tracker_url: default_feodo_url(),
            urlhaus_url: default_urlhaus_url(),
            update_interval_hours: default_update_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeolocationConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Primary provider: "ipapi", "ip-api", or "ipinfo". The other two are
    /// tried in order when the primary fails.
    #[serde(default = "default_geo_provider")]
    pub api_provider: String,

    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for GeolocationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_provider: default_geo_provider(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Legacy CSV log, read once for migration
    #[serde(default = "default_log_file")]
    pub log_file: String,

    /// SQLite database file
    #[serde(default = "default_db_file")]
    pub db_file: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            log_file: default_log_file(),
            db_file: default_db_file(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen_port: default_listen_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Ollama server base URL
    #[serde(default = "default_llm_url")]
    pub url: String,

    #[serde(default = "default_llm_model")]
    pub model: String,

    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            url: default_llm_url(),
            model: default_llm_model(),
            timeout_secs: default_llm_timeout(),
        }
    }
}

// Default value functions

fn default_interface() -> String {
    "eth0".to_string()
}

fn default_ddos_threshold() -> usize {
    300
}

fn default_port_scan_threshold() -> usize {
    10
}

fn default_injection_threshold() -> usize {
    3
}

fn default_syn_flood_threshold() -> usize {
    200
}

fn default_syn_ack_ratio() -> f64 {
    0.1
}

fn default_time_window() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

fn default_throttle() -> u64 {
    300
}

fn default_smtp_server() -> String {
    "smtp.gmail.com".to_string()
}

fn default_smtp_port() -> u16 {
    587
}

fn default_feodo_url() -> String {
    "https://feodotracker.abuse.ch/downloads/ipblocklist.txt".to_string()
}

fn default_urlhaus_url() -> String {
    "https://urlhaus.abuse.ch/downloads/text/".to_string()
}

fn default_update_interval() -> u64 {
    24
}

fn default_geo_provider() -> String {
    "ipapi".to_string()
}

fn default_log_file() -> String {
    "data/realtime_logs.csv".to_string()
}

fn default_db_file() -> String {
    "data/threats.db".to_string()
}

fn default_listen_port() -> u16 {
    5000
}

fn default_llm_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_llm_model() -> String {
    "phi3".to_string()
}

fn default_llm_timeout() -> u64 {
    60
}

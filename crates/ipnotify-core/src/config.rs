//! Configuration types for ipnotify
//!
//! This module defines all configuration structures used throughout the workspace.
//! Every field has a named default; the daemon overlays environment values on top.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// History store configuration
    #[serde(default)]
    pub history: HistoryConfig,

    /// IP resolver configuration
    #[serde(default)]
    pub resolver: ResolverConfig,

    /// Discord webhook configuration
    pub discord: DiscordConfig,

    /// Daily scheduler configuration
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl AppConfig {
    /// Create a configuration with defaults around the given webhook URL
    pub fn new(webhook_url: impl Into<String>) -> Self {
        Self {
            history: HistoryConfig::default(),
            resolver: ResolverConfig::default(),
            discord: DiscordConfig::new(webhook_url),
            scheduler: SchedulerConfig::default(),
            log_level: default_log_level(),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        self.history.validate()?;
        self.resolver.validate()?;
        self.discord.validate()?;
        self.scheduler.validate()?;

        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "warning" | "error" => Ok(()),
            other => Err(crate::Error::config(format!(
                "LOG_LEVEL '{}' is not valid. Valid levels: trace, debug, info, warn, error",
                other
            ))),
        }
    }
}

/// History store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Path to the history JSON file
    #[serde(default = "default_history_path")]
    pub path: PathBuf,

    /// Records older than this many days are removed by cleanup.
    ///
    /// Zero or negative disables cleanup entirely.
    #[serde(default = "default_keep_days")]
    pub keep_days: i64,

    /// Upper bound on retained history records
    #[serde(default = "default_max_records")]
    pub max_records: usize,

    /// Run cleanup after every recorded check
    #[serde(default = "default_true")]
    pub auto_cleanup: bool,

    /// Copy an unreadable history file aside before resetting it
    #[serde(default = "default_true")]
    pub backup_on_corruption: bool,
}

impl HistoryConfig {
    /// Create a history configuration for the given path with default retention
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Set the retention window in days
    pub fn with_keep_days(mut self, keep_days: i64) -> Self {
        self.keep_days = keep_days;
        self
    }

    /// Set the record cap
    pub fn with_max_records(mut self, max_records: usize) -> Self {
        self.max_records = max_records;
        self
    }

    /// Enable or disable cleanup after each recorded check
    pub fn with_auto_cleanup(mut self, auto_cleanup: bool) -> Self {
        self.auto_cleanup = auto_cleanup;
        self
    }

    /// Enable or disable backups of corrupted files
    pub fn with_backup_on_corruption(mut self, backup: bool) -> Self {
        self.backup_on_corruption = backup;
        self
    }

    /// Validate the history configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.path.as_os_str().is_empty() {
            return Err(crate::Error::config("IP_HISTORY_FILE cannot be empty"));
        }
        if self.max_records == 0 {
            return Err(crate::Error::config("IP_HISTORY_MAX_RECORDS must be > 0"));
        }
        Ok(())
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            path: default_history_path(),
            keep_days: default_keep_days(),
            max_records: default_max_records(),
            auto_cleanup: true,
            backup_on_corruption: true,
        }
    }
}

/// IP resolver configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Per-request timeout (in seconds)
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Attempts per public IP service
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: usize,

    /// Delay between attempts (in seconds)
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,

    /// Query the public IP
    #[serde(default = "default_true")]
    pub check_public_ip: bool,

    /// Query the local IP
    #[serde(default = "default_true")]
    pub check_local_ip: bool,

    /// Plain-text IP echo services, tried in order
    #[serde(default = "default_public_ip_services")]
    pub public_ip_services: Vec<String>,
}

impl ResolverConfig {
    /// Validate the resolver configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.timeout_secs == 0 {
            return Err(crate::Error::config("IP_CHECK_TIMEOUT must be > 0"));
        }
        if self.retry_attempts == 0 {
            return Err(crate::Error::config("IP_RETRY_ATTEMPTS must be > 0"));
        }
        if self.check_public_ip && self.public_ip_services.is_empty() {
            return Err(crate::Error::config(
                "At least one public IP service is required when CHECK_PUBLIC_IP is enabled",
            ));
        }
        for url in &self.public_ip_services {
            if !url.starts_with("https://") && !url.starts_with("http://") {
                return Err(crate::Error::config(format!(
                    "Public IP service must use HTTP or HTTPS scheme. Got: {}",
                    url
                )));
            }
        }
        Ok(())
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            retry_attempts: default_retry_attempts(),
            retry_delay_secs: default_retry_delay_secs(),
            check_public_ip: true,
            check_local_ip: true,
            public_ip_services: default_public_ip_services(),
        }
    }
}

/// Prefix every Discord webhook URL must carry
pub const DISCORD_WEBHOOK_PREFIX: &str = "https://discord.com/api/webhooks/";

/// Discord webhook configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordConfig {
    /// Webhook URL (secret; never logged)
    pub webhook_url: String,

    /// Message template; `{ip}` is replaced by the public IP
    #[serde(default = "default_message_template")]
    pub message_template: String,

    /// Delivery attempts before giving up
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: usize,

    /// Per-request timeout (in seconds)
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Delay between attempts (in seconds)
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,

    /// Discord's content length limit
    #[serde(default = "default_max_message_length")]
    pub max_message_length: usize,
}

impl DiscordConfig {
    /// Create a Discord configuration with defaults
    pub fn new(webhook_url: impl Into<String>) -> Self {
        Self {
            webhook_url: webhook_url.into(),
            message_template: default_message_template(),
            retry_attempts: default_retry_attempts(),
            timeout_secs: default_timeout_secs(),
            retry_delay_secs: default_retry_delay_secs(),
            max_message_length: default_max_message_length(),
        }
    }

    /// Validate the Discord configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        let url = self.webhook_url.trim();
        if url.is_empty() {
            return Err(crate::Error::config("DISCORD_WEBHOOK_URL is required"));
        }
        if !url.starts_with(DISCORD_WEBHOOK_PREFIX) {
            return Err(crate::Error::config(format!(
                "DISCORD_WEBHOOK_URL must start with {}",
                DISCORD_WEBHOOK_PREFIX
            )));
        }
        if !self.message_template.contains("{ip}") {
            return Err(crate::Error::config(
                "DISCORD_MESSAGE_TEMPLATE must contain the {ip} placeholder",
            ));
        }
        if self.retry_attempts == 0 {
            return Err(crate::Error::config("DISCORD_RETRY_ATTEMPTS must be > 0"));
        }
        if self.timeout_secs == 0 {
            return Err(crate::Error::config("DISCORD_TIMEOUT must be > 0"));
        }
        Ok(())
    }
}

/// Daily scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Local time of the daily scheduled check, `HH:MM`
    #[serde(default = "default_daily_time")]
    pub daily_time: String,

    /// Interval between status log lines (in seconds)
    #[serde(default = "default_status_update_interval_secs")]
    pub status_update_interval_secs: u64,

    /// Bounded size of the in-memory execution log
    #[serde(default = "default_max_execution_history")]
    pub max_execution_history: usize,
}

impl SchedulerConfig {
    /// Parse `daily_time` into (hour, minute)
    pub fn daily_time_parts(&self) -> Result<(u32, u32), crate::Error> {
        parse_daily_time(&self.daily_time)
    }

    /// Validate the scheduler configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        self.daily_time_parts()?;
        if self.status_update_interval_secs == 0 {
            return Err(crate::Error::config("STATUS_UPDATE_INTERVAL must be > 0"));
        }
        Ok(())
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            daily_time: default_daily_time(),
            status_update_interval_secs: default_status_update_interval_secs(),
            max_execution_history: default_max_execution_history(),
        }
    }
}

/// Parse an `HH:MM` wall-clock time
pub fn parse_daily_time(value: &str) -> Result<(u32, u32), crate::Error> {
    let invalid = || {
        crate::Error::config(format!("SCHEDULE_TIME is not a valid HH:MM time: {}", value))
    };

    let (hours, minutes) = value.trim().split_once(':').ok_or_else(invalid)?;
    let hours: u32 = hours.parse().map_err(|_| invalid())?;
    let minutes: u32 = minutes.parse().map_err(|_| invalid())?;

    if hours > 23 || minutes > 59 {
        return Err(invalid());
    }
    Ok((hours, minutes))
}

fn default_history_path() -> PathBuf {
    PathBuf::from("config/ip_history.json")
}

fn default_keep_days() -> i64 {
    30
}

fn default_max_records() -> usize {
    1000
}

fn default_true() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_retry_attempts() -> usize {
    3
}

fn default_retry_delay_secs() -> u64 {
    2
}

fn default_public_ip_services() -> Vec<String> {
    [
        "https://api.ipify.org",
        "https://icanhazip.com",
        "https://ident.me",
        "https://checkip.amazonaws.com",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_message_template() -> String {
    "Minecraft Server IP: {ip}:25565".to_string()
}

fn default_max_message_length() -> usize {
    2000
}

fn default_daily_time() -> String {
    "09:00".to_string()
}

fn default_status_update_interval_secs() -> u64 {
    60
}

fn default_max_execution_history() -> usize {
    50
}

fn default_log_level() -> String {
    "info".to_string()
}

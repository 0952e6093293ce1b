//! Environment configuration for ipnotifyd
//!
//! Every setting comes from an environment variable (optionally seeded from a
//! `.env` file). Unset variables keep the defaults from `ipnotify_core::config`.

use anyhow::Result;
use ipnotify_core::config::{AppConfig, DISCORD_WEBHOOK_PREFIX};
use std::path::PathBuf;
use std::str::FromStr;

/// Values accepted as "true" for boolean variables
const TRUE_VALUES: [&str; 5] = ["true", "1", "yes", "on", "enabled"];

/// Configuration plus any problems that were tolerated while reading it
///
/// Warnings are collected instead of logged because tracing is not set up yet
/// when configuration is read.
#[derive(Debug)]
pub struct LoadedConfig {
    pub config: AppConfig,
    pub warnings: Vec<String>,
}

/// Read configuration from the process environment
pub fn from_env() -> LoadedConfig {
    from_lookup(|key| std::env::var(key).ok())
}

/// Read configuration through an arbitrary variable lookup
pub fn from_lookup<F>(lookup: F) -> LoadedConfig
where
    F: Fn(&str) -> Option<String>,
{
    let mut reader = EnvReader {
        lookup,
        warnings: Vec::new(),
    };

    let mut config = AppConfig::new(reader.string("DISCORD_WEBHOOK_URL").unwrap_or_default());

    if let Some(template) = reader.string("DISCORD_MESSAGE_TEMPLATE") {
        config.discord.message_template = template;
    }
    config.discord.retry_attempts =
        reader.number("DISCORD_RETRY_ATTEMPTS", config.discord.retry_attempts);
    config.discord.timeout_secs = reader.number("DISCORD_TIMEOUT", config.discord.timeout_secs);
    config.discord.retry_delay_secs =
        reader.number("DISCORD_RETRY_DELAY", config.discord.retry_delay_secs);

    config.resolver.timeout_secs = reader.number("IP_CHECK_TIMEOUT", config.resolver.timeout_secs);
    config.resolver.retry_attempts =
        reader.number("IP_RETRY_ATTEMPTS", config.resolver.retry_attempts);
    config.resolver.retry_delay_secs =
        reader.number("IP_RETRY_DELAY", config.resolver.retry_delay_secs);
    config.resolver.check_public_ip = reader.flag("CHECK_PUBLIC_IP", config.resolver.check_public_ip);
    config.resolver.check_local_ip = reader.flag("CHECK_LOCAL_IP", config.resolver.check_local_ip);
    if let Some(services) = reader.string("IP_SERVICES") {
        let services: Vec<String> = services
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if !services.is_empty() {
            config.resolver.public_ip_services = services;
        }
    }

    if let Some(path) = reader.string("IP_HISTORY_FILE") {
        config.history.path = PathBuf::from(path);
    }
    config.history.keep_days = reader.number("IP_HISTORY_KEEP_DAYS", config.history.keep_days);
    config.history.max_records =
        reader.number("IP_HISTORY_MAX_RECORDS", config.history.max_records);
    config.history.auto_cleanup = reader.flag("IP_HISTORY_AUTO_CLEANUP", config.history.auto_cleanup);
    config.history.backup_on_corruption = reader.flag(
        "IP_HISTORY_BACKUP_ON_CORRUPTION",
        config.history.backup_on_corruption,
    );

    if let Some(time) = reader.string("SCHEDULE_TIME") {
        config.scheduler.daily_time = time;
    }
    config.scheduler.status_update_interval_secs = reader.number(
        "STATUS_UPDATE_INTERVAL",
        config.scheduler.status_update_interval_secs,
    );
    config.scheduler.max_execution_history =
        reader.number("MAX_EXECUTION_HISTORY", config.scheduler.max_execution_history);

    if let Some(level) = reader.string("LOG_LEVEL") {
        config.log_level = level;
    }

    LoadedConfig {
        config,
        warnings: reader.warnings,
    }
}

/// Validate for the given run mode
///
/// Modes that never talk to Discord do not need a webhook.
pub fn validate(config: &AppConfig, require_webhook: bool) -> Result<()> {
    if require_webhook {
        if config.discord.webhook_url.trim().is_empty() {
            anyhow::bail!(
                "DISCORD_WEBHOOK_URL is required. \
                Set it in .env or via: export DISCORD_WEBHOOK_URL={}<id>/<token>",
                DISCORD_WEBHOOK_PREFIX
            );
        }
        config.validate()?;
    } else {
        config.history.validate()?;
        config.resolver.validate()?;
        config.scheduler.validate()?;
    }

    Ok(())
}

/// Human-readable configuration with secrets masked, grouped by section
pub fn describe(config: &AppConfig) -> Vec<(&'static str, Vec<(&'static str, String)>)> {
    let webhook = if config.discord.webhook_url.trim().is_empty() {
        "(not set)".to_string()
    } else {
        ipnotify_notifier_discord::mask_webhook_url(config.discord.webhook_url.trim())
    };

    vec![
        (
            "discord",
            vec![
                ("webhook_url", webhook),
                ("message_template", config.discord.message_template.clone()),
                ("retry_attempts", config.discord.retry_attempts.to_string()),
                ("timeout_secs", config.discord.timeout_secs.to_string()),
                ("retry_delay_secs", config.discord.retry_delay_secs.to_string()),
            ],
        ),
        (
            "resolver",
            vec![
                ("check_public_ip", config.resolver.check_public_ip.to_string()),
                ("check_local_ip", config.resolver.check_local_ip.to_string()),
                ("timeout_secs", config.resolver.timeout_secs.to_string()),
                ("retry_attempts", config.resolver.retry_attempts.to_string()),
                ("retry_delay_secs", config.resolver.retry_delay_secs.to_string()),
                ("services", config.resolver.public_ip_services.join(", ")),
            ],
        ),
        (
            "history",
            vec![
                ("path", config.history.path.display().to_string()),
                ("keep_days", config.history.keep_days.to_string()),
                ("max_records", config.history.max_records.to_string()),
                ("auto_cleanup", config.history.auto_cleanup.to_string()),
                (
                    "backup_on_corruption",
                    config.history.backup_on_corruption.to_string(),
                ),
            ],
        ),
        (
            "scheduler",
            vec![
                ("daily_time", config.scheduler.daily_time.clone()),
                (
                    "status_update_interval_secs",
                    config.scheduler.status_update_interval_secs.to_string(),
                ),
                (
                    "max_execution_history",
                    config.scheduler.max_execution_history.to_string(),
                ),
            ],
        ),
        ("logging", vec![("log_level", config.log_level.clone())]),
    ]
}

/// Boolean parsing shared by every flag variable
pub fn parse_bool(value: &str) -> bool {
    TRUE_VALUES.contains(&value.trim().to_lowercase().as_str())
}

struct EnvReader<F> {
    lookup: F,
    warnings: Vec<String>,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Trimmed, non-empty value
    fn string(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn flag(&self, key: &str, default: bool) -> bool {
        self.string(key).map(|v| parse_bool(&v)).unwrap_or(default)
    }

    /// Numeric value; unparsable input keeps the default and records a warning
    fn number<T>(&mut self, key: &str, default: T) -> T
    where
        T: FromStr + std::fmt::Display + Copy,
    {
        match self.string(key) {
            None => default,
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                self.warnings.push(format!(
                    "{} value '{}' is not a valid number, using default {}",
                    key, raw, default
                ));
                default
            }),
        }
    }
}

// # History Store
//
// File-backed, corruption-tolerant persistence of IP check history.
//
// ## Durability
//
// - Atomic writes: the document goes to a `.tmp` sibling, is synced, then
//   renamed over the target
// - Clone-then-commit: a mutation is applied to a copy of the in-memory
//   document and only becomes live once the save succeeded
// - Self-healing: content that fails validation is copied aside to
//   `<stem>.corrupted.<unix-secs>.bak` and replaced by a fresh document
// - Inaccessible files (permissions, OS errors) are reported, never healed
//
// Only one process is expected to own a history file; there is no
// cross-process locking.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use super::model::{HISTORY_FILE_VERSION, HistoryData, HistoryRecord, HistoryStats, NotificationOutcome};
use super::timestamp;
use crate::Error;
use crate::config::HistoryConfig;
use crate::traits::ip_resolver::Observation;

/// Same-second backups get a numeric suffix up to this many
const MAX_BACKUP_ATTEMPTS: u32 = 1000;

/// Top-level keys every history document must carry
const REQUIRED_KEYS: [&str; 4] = ["metadata", "current", "statistics", "history"];

/// Durable IP check history
///
/// # Example
///
/// ```rust,no_run
/// use ipnotify_core::config::HistoryConfig;
/// use ipnotify_core::history::HistoryStore;
/// use ipnotify_core::Observation;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = HistoryStore::open(HistoryConfig::new("config/ip_history.json")).await?;
///
///     let observation = Observation::new("192.168.1.10", "203.0.113.7");
///     store.record_ip_check(&observation, "manual", true, 0.42).await?;
///
///     assert_eq!(store.get_last_public_ip().await.as_deref(), Some("203.0.113.7"));
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct HistoryStore {
    path: PathBuf,
    config: HistoryConfig,
    data: RwLock<HistoryData>,
}

impl HistoryStore {
    /// Open the history file, creating it (and its directory) when missing
    ///
    /// Invalid content is healed; an inaccessible file is an error.
    pub async fn open(config: HistoryConfig) -> Result<Self, Error> {
        let path = config.path.clone();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            fs::create_dir_all(parent).await.map_err(|e| {
                Error::file(format!(
                    "Failed to create history directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let data = Self::load_with_recovery(&path, &config).await?;

        Ok(Self {
            path,
            config,
            data: RwLock::new(data),
        })
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Configuration the store was opened with
    pub fn config(&self) -> &HistoryConfig {
        &self.config
    }

    /// Read and validate the backing file without touching the live state
    pub async fn load(&self) -> Result<HistoryData, Error> {
        Self::load_file(&self.path).await
    }

    /// Replace the live state with the file's content, healing if necessary
    pub async fn reload(&self) -> Result<(), Error> {
        let fresh = Self::load_with_recovery(&self.path, &self.config).await?;
        *self.data.write().await = fresh;
        Ok(())
    }

    /// Persist `data` and make it the live state
    pub async fn save(&self, mut data: HistoryData) -> Result<(), Error> {
        let mut guard = self.data.write().await;
        Self::persist(&self.path, &mut data).await?;
        *guard = data;
        Ok(())
    }

    /// Copy of the live document
    pub async fn snapshot(&self) -> HistoryData {
        self.data.read().await.clone()
    }

    /// Last recorded public IP, if any real value was ever recorded
    pub async fn get_last_public_ip(&self) -> Option<String> {
        self.data
            .read()
            .await
            .last_public_ip()
            .map(str::to_string)
    }

    /// Exact-string change detection against the last recorded public IP
    pub async fn has_ip_changed(&self, candidate: &str) -> bool {
        let data = self.data.read().await;
        let changed = data.has_ip_changed(candidate);

        match (changed, data.last_public_ip()) {
            (true, Some(previous)) => {
                tracing::info!("Public IP changed: {} -> {}", previous, candidate)
            }
            (true, None) => tracing::info!("First public IP observation: {}", candidate),
            (false, _) => tracing::debug!("Public IP unchanged or unavailable: {}", candidate),
        }

        changed
    }

    /// Append a check to history, update counters and persist
    ///
    /// On failure both the file and the in-memory state are left as they were
    /// after the last successful save.
    pub async fn record_ip_check(
        &self,
        observation: &Observation,
        mode: &str,
        notification: impl Into<NotificationOutcome>,
        execution_duration: f64,
    ) -> Result<(), Error> {
        let notification = notification.into();
        let mut guard = self.data.write().await;
        let mut next = guard.clone();
        let now = timestamp::now();

        let changed = next.apply_check(observation, mode, &notification, execution_duration, now);

        if self.config.auto_cleanup {
            let removed = next.cleanup(now, self.config.keep_days, self.config.max_records);
            if removed > 0 {
                tracing::debug!("Auto-cleanup removed {} history records", removed);
            }
        }

        Self::persist(&self.path, &mut next).await.inspect_err(|e| {
            tracing::error!("Failed to record IP check: {}", e);
        })?;
        *guard = next;

        tracing::debug!(
            "Recorded {} check: public_ip={} changed={} notification={:?}",
            mode,
            observation.public_ip,
            changed,
            notification
        );
        Ok(())
    }

    /// Remove records older than `keep_days` and enforce `max_records`
    ///
    /// Saves only when something was removed.
    pub async fn cleanup_old_records(&self, keep_days: i64) -> Result<usize, Error> {
        let mut guard = self.data.write().await;
        let mut next = guard.clone();

        let removed = next.cleanup(timestamp::now(), keep_days, self.config.max_records);
        if removed == 0 {
            return Ok(0);
        }

        Self::persist(&self.path, &mut next).await?;
        *guard = next;

        tracing::info!("Cleaned up {} old history records", removed);
        Ok(removed)
    }

    /// Summary for status output
    pub async fn get_history_stats(&self) -> HistoryStats {
        let size = match fs::metadata(&self.path).await {
            Ok(meta) => format_file_size(meta.len()),
            Err(_) => "0 B".to_string(),
        };
        self.data.read().await.stats(size)
    }

    /// Changed records within the last `days`, newest first
    pub async fn get_ip_change_timeline(&self, days: i64) -> Vec<HistoryRecord> {
        self.data
            .read()
            .await
            .ip_change_timeline(timestamp::now(), days)
    }

    /// Write the full document as pretty JSON
    ///
    /// Without a target, writes `ip_history_export_<YYYYmmdd_HHMMSS>.json`
    /// in the current directory. Returns the path written.
    pub async fn export_history(&self, target: Option<&Path>) -> Result<PathBuf, Error> {
        let target = match target {
            Some(path) => path.to_path_buf(),
            None => PathBuf::from(default_export_name(Utc::now())),
        };

        let json = {
            let data = self.data.read().await;
            serde_json::to_string_pretty(&*data)?
        };

        fs::write(&target, json).await.map_err(|e| {
            Error::file(format!("Failed to export history to {}: {}", target.display(), e))
        })?;

        tracing::info!("History exported to {}", target.display());
        Ok(target)
    }

    /// Load, healing validation failures
    async fn load_with_recovery(path: &Path, config: &HistoryConfig) -> Result<HistoryData, Error> {
        if !path.exists() {
            tracing::info!("History file not found, initializing {}", path.display());
            let mut data = HistoryData::new();
            Self::persist(path, &mut data).await?;
            return Ok(data);
        }

        match Self::load_file(path).await {
            Ok(data) => {
                tracing::debug!(
                    "Loaded history from {}: {} records",
                    path.display(),
                    data.history.len()
                );
                Ok(data)
            }
            Err(e) if e.is_validation() => {
                tracing::warn!("History file is invalid: {}. Resetting.", e);

                if config.backup_on_corruption {
                    match Self::write_backup(path, Utc::now()).await {
                        Ok(backup) => {
                            tracing::warn!("Corrupted history saved to {}", backup.display())
                        }
                        Err(backup_err) => {
                            tracing::error!("Failed to back up corrupted history: {}", backup_err)
                        }
                    }
                }

                let mut data = HistoryData::new();
                Self::persist(path, &mut data).await?;
                Ok(data)
            }
            Err(e) => Err(e),
        }
    }

    /// Read and validate a history file
    async fn load_file(path: &Path) -> Result<HistoryData, Error> {
        let bytes = fs::read(path).await.map_err(|e| {
            Error::file(format!("Failed to read history file {}: {}", path.display(), e))
        })?;

        let content = String::from_utf8(bytes).map_err(|e| {
            Error::validation(format!("History file {} is not UTF-8: {}", path.display(), e))
        })?;

        let raw: Value = serde_json::from_str(&content).map_err(|e| {
            Error::validation(format!("Failed to parse history file {}: {}", path.display(), e))
        })?;

        let raw = Self::validate_structure(raw)?;

        let stats_has_total = raw["statistics"].get("total_checks").is_some();

        let mut data: HistoryData = serde_json::from_value(raw)
            .map_err(|e| Error::validation(format!("Malformed history document: {}", e)))?;

        if data.metadata.version != HISTORY_FILE_VERSION {
            tracing::warn!(
                "History file version mismatch: expected {}, got {}. Loading anyway.",
                HISTORY_FILE_VERSION,
                data.metadata.version
            );
        }

        if !stats_has_total {
            data.statistics.total_checks = data.metadata.total_checks;
        }
        for mode in crate::policy::CheckMode::ALL {
            data.statistics
                .check_frequency
                .entry(mode.as_str().to_string())
                .or_insert(0);
        }

        Ok(data)
    }

    /// Structural checks that run before the typed decode
    fn validate_structure(raw: Value) -> Result<Value, Error> {
        let Some(object) = raw.as_object() else {
            return Err(Error::validation("History document is not a JSON object"));
        };

        if let Some(missing) = REQUIRED_KEYS.iter().find(|key| !object.contains_key(**key)) {
            return Err(Error::validation(format!("Missing required key: {}", missing)));
        }

        let total_checks = &raw["metadata"]["total_checks"];
        if !total_checks.is_u64() {
            return Err(Error::validation(format!(
                "metadata.total_checks must be a non-negative integer, got {}",
                total_checks
            )));
        }

        if !raw["history"].is_array() {
            return Err(Error::validation("history must be an array"));
        }

        Ok(raw)
    }

    /// Refresh `last_updated` and write atomically
    async fn persist(path: &Path, data: &mut HistoryData) -> Result<(), Error> {
        data.metadata.last_updated = timestamp::now();

        let json = serde_json::to_string_pretty(data)?;

        let temp_path = Self::temp_path(path);
        {
            let mut file = fs::File::create(&temp_path).await.map_err(|e| {
                Error::file(format!(
                    "Failed to create temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;

            file.write_all(json.as_bytes()).await.map_err(|e| {
                Error::file(format!(
                    "Failed to write temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;

            file.flush().await.map_err(|e| {
                Error::file(format!(
                    "Failed to flush temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;

            file.sync_all().await.map_err(|e| {
                Error::file(format!(
                    "Failed to sync temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
        }

        if let Err(e) = fs::rename(&temp_path, path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(Error::file(format!(
                "Failed to rename {} to {}: {}",
                temp_path.display(),
                path.display(),
                e
            )));
        }

        tracing::trace!("History written to {}", path.display());
        Ok(())
    }

    fn temp_path(path: &Path) -> PathBuf {
        let mut temp = path.to_path_buf();
        temp.set_extension("tmp");
        temp
    }

    /// Copy `path` to a backup name that is not taken yet
    ///
    /// Existing backups are never overwritten, even within the same second.
    async fn write_backup(path: &Path, at: DateTime<Utc>) -> Result<PathBuf, Error> {
        let content = fs::read(path).await.map_err(|e| {
            Error::file(format!("Failed to read {} for backup: {}", path.display(), e))
        })?;

        for attempt in 0..MAX_BACKUP_ATTEMPTS {
            let backup = Self::backup_path(path, at, attempt);
            let mut file = match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&backup)
                .await
            {
                Ok(file) => file,
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    return Err(Error::file(format!(
                        "Failed to create backup {}: {}",
                        backup.display(),
                        e
                    )));
                }
            };

            file.write_all(&content).await.map_err(|e| {
                Error::file(format!("Failed to write backup {}: {}", backup.display(), e))
            })?;
            file.sync_all().await.map_err(|e| {
                Error::file(format!("Failed to sync backup {}: {}", backup.display(), e))
            })?;
            return Ok(backup);
        }

        Err(Error::file(format!(
            "No free backup name for {} after {} attempts",
            path.display(),
            MAX_BACKUP_ATTEMPTS
        )))
    }

    /// `<dir>/<stem>.corrupted.<unix-secs>.bak`, then `.<unix-secs>.<n>.bak`
    fn backup_path(path: &Path, at: DateTime<Utc>, attempt: u32) -> PathBuf {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "ip_history".to_string());
        if attempt == 0 {
            path.with_file_name(format!("{}.corrupted.{}.bak", stem, at.timestamp()))
        } else {
            path.with_file_name(format!(
                "{}.corrupted.{}.{}.bak",
                stem,
                at.timestamp(),
                attempt
            ))
        }
    }
}

fn default_export_name(at: DateTime<Utc>) -> String {
    format!("ip_history_export_{}.json", at.format("%Y%m%d_%H%M%S"))
}

/// Human-readable byte count (B, KB, MB)
pub fn format_file_size(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;

    let size = bytes as f64;
    if size < KB {
        format!("{} B", bytes)
    } else if size < MB {
        format!("{:.1} KB", size / KB)
    } else {
        format!("{:.1} MB", size / MB)
    }
}

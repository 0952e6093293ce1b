//! Persisted history document
//!
//! ```json
//! {
//!   "metadata":   { "created_at": "...", "last_updated": "...", "version": "1.0", "total_checks": 3 },
//!   "current":    { "public_ip": "203.0.113.1", "local_ip": "192.168.1.10",
//!                   "last_updated": "...", "last_notification_sent": null },
//!   "statistics": { "total_checks": 3, "total_ip_changes": 1, "total_notifications_sent": 1,
//!                   "total_notification_failures": 0, "last_change_date": "...",
//!                   "check_frequency": { "manual": 1, "scheduled": 2, "test": 0 } },
//!   "history":    [ { "timestamp": "...", "public_ip": "...", "mode": "scheduled", ... } ]
//! }
//! ```
//!
//! Key names are part of the on-disk contract; renaming one requires a bump
//! of [`HISTORY_FILE_VERSION`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use super::timestamp;
use crate::policy::CheckMode;
use crate::traits::ip_resolver::{Observation, is_available};

/// History file format version
pub const HISTORY_FILE_VERSION: &str = "1.0";

/// Number of records returned as recent activity
const RECENT_ACTIVITY_LEN: usize = 10;

/// The whole persisted history document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryData {
    pub metadata: Metadata,
    pub current: CurrentState,
    pub statistics: Statistics,
    pub history: Vec<HistoryRecord>,
}

/// File-level bookkeeping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "timestamp")]
    pub last_updated: DateTime<Utc>,
    pub version: String,
    pub total_checks: u64,
}

/// Last known good addresses
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CurrentState {
    pub public_ip: Option<String>,
    pub local_ip: Option<String>,
    #[serde(default, with = "timestamp::option")]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default, with = "timestamp::option")]
    pub last_notification_sent: Option<DateTime<Utc>>,
}

/// Running counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    /// Mirrors `metadata.total_checks`
    #[serde(default)]
    pub total_checks: u64,
    #[serde(default)]
    pub total_ip_changes: u64,
    #[serde(default)]
    pub total_notifications_sent: u64,
    /// Notifications attempted but not delivered
    #[serde(default)]
    pub total_notification_failures: u64,
    #[serde(default, with = "timestamp::option")]
    pub last_change_date: Option<DateTime<Utc>>,
    #[serde(default = "empty_frequency")]
    pub check_frequency: BTreeMap<String, u64>,
}

/// One recorded check; never modified after it is appended
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    #[serde(with = "timestamp")]
    pub timestamp: DateTime<Utc>,
    pub public_ip: Option<String>,
    pub local_ip: Option<String>,
    pub mode: String,
    pub ip_changed: bool,
    pub notification_sent: bool,
    #[serde(default)]
    pub execution_duration: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_public_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification_error: Option<String>,
}

/// What happened to the notification for a recorded check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationOutcome {
    /// Policy said no, or nothing was attempted
    NotAttempted,
    /// Delivered (or, for intent-only recording, approved by policy)
    Sent,
    /// Attempted and the transport gave up
    Failed(String),
}

impl NotificationOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, Self::Sent)
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Failed(reason) => Some(reason),
            _ => None,
        }
    }
}

impl From<bool> for NotificationOutcome {
    fn from(sent: bool) -> Self {
        if sent { Self::Sent } else { Self::NotAttempted }
    }
}

/// Read-only summary for status and reporting commands
#[derive(Debug, Clone, Serialize)]
pub struct HistoryStats {
    pub metadata: Metadata,
    pub current_status: CurrentState,
    pub statistics: Statistics,
    /// Share of checks per mode, in percent with one decimal
    pub frequency_percentage: BTreeMap<String, f64>,
    /// Newest first
    pub recent_activity: Vec<HistoryRecord>,
    pub history_file_size: String,
    pub total_history_records: usize,
}

fn empty_frequency() -> BTreeMap<String, u64> {
    CheckMode::ALL
        .iter()
        .map(|mode| (mode.as_str().to_string(), 0))
        .collect()
}

/// Instant `days` before `now`; `None` when the window reaches past the
/// representable range, meaning no age limit
fn age_cutoff(now: DateTime<Utc>, days: i64) -> Option<DateTime<Utc>> {
    chrono::Duration::try_days(days).and_then(|window| now.checked_sub_signed(window))
}

/// JSON has no representation for NaN or infinity
fn sanitize_duration(seconds: f64) -> f64 {
    if seconds.is_finite() {
        round_to(seconds.max(0.0), 2)
    } else {
        0.0
    }
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

impl HistoryData {
    /// Fresh document: version 1.0, every counter zero
    pub fn new() -> Self {
        let now = timestamp::now();
        Self {
            metadata: Metadata {
                created_at: now,
                last_updated: now,
                version: HISTORY_FILE_VERSION.to_string(),
                total_checks: 0,
            },
            current: CurrentState::default(),
            statistics: Statistics {
                total_checks: 0,
                total_ip_changes: 0,
                total_notifications_sent: 0,
                total_notification_failures: 0,
                last_change_date: None,
                check_frequency: empty_frequency(),
            },
            history: Vec::new(),
        }
    }

    /// Last recorded public IP, ignoring empty and sentinel values
    pub fn last_public_ip(&self) -> Option<&str> {
        self.current
            .public_ip
            .as_deref()
            .filter(|ip| is_available(ip))
    }

    /// Exact string comparison against the last recorded public IP
    pub fn has_ip_changed(&self, candidate: &str) -> bool {
        if !is_available(candidate) {
            return false;
        }
        match self.last_public_ip() {
            None => true,
            Some(last) => candidate != last,
        }
    }

    /// Append one check and update current state and counters.
    ///
    /// Change detection runs before `current.public_ip` is overwritten.
    /// Returns whether the public IP changed.
    pub fn apply_check(
        &mut self,
        observation: &Observation,
        mode: &str,
        notification: &NotificationOutcome,
        execution_duration: f64,
        now: DateTime<Utc>,
    ) -> bool {
        let public_ip = observation.public_ip.as_str();
        let local_ip = observation.local_ip.as_str();

        let ip_changed = is_available(public_ip) && self.has_ip_changed(public_ip);
        let previous_public_ip = if ip_changed {
            self.last_public_ip().map(str::to_string)
        } else {
            None
        };

        self.history.push(HistoryRecord {
            timestamp: now,
            public_ip: Some(public_ip.to_string()).filter(|ip| !ip.is_empty()),
            local_ip: Some(local_ip.to_string()).filter(|ip| !ip.is_empty()),
            mode: mode.to_string(),
            ip_changed,
            notification_sent: notification.is_sent(),
            execution_duration: sanitize_duration(execution_duration),
            previous_public_ip,
            notification_error: notification.error().map(str::to_string),
        });

        if is_available(public_ip) {
            self.current.public_ip = Some(public_ip.to_string());
            self.current.last_updated = Some(now);
        }
        if is_available(local_ip) {
            self.current.local_ip = Some(local_ip.to_string());
        }
        if notification.is_sent() {
            self.current.last_notification_sent = Some(now);
        }

        self.metadata.total_checks += 1;
        self.statistics.total_checks = self.metadata.total_checks;

        if mode.parse::<CheckMode>().is_ok() {
            *self
                .statistics
                .check_frequency
                .entry(mode.to_string())
                .or_insert(0) += 1;
        }
        if ip_changed {
            self.statistics.total_ip_changes += 1;
            self.statistics.last_change_date = Some(now);
        }
        match notification {
            NotificationOutcome::Sent => self.statistics.total_notifications_sent += 1,
            NotificationOutcome::Failed(_) => self.statistics.total_notification_failures += 1,
            NotificationOutcome::NotAttempted => {}
        }

        ip_changed
    }

    /// Drop records older than `keep_days`, then keep at most `max_records`
    /// of the newest. Survivors stay in their original order.
    ///
    /// Returns the number of removed records; `keep_days <= 0` is a no-op.
    pub fn cleanup(&mut self, now: DateTime<Utc>, keep_days: i64, max_records: usize) -> usize {
        if keep_days <= 0 {
            return 0;
        }

        let original = self.history.len();
        let cutoff = age_cutoff(now, keep_days);

        let mut kept: Vec<HistoryRecord> = std::mem::take(&mut self.history)
            .into_iter()
            .filter(|record| cutoff.is_none_or(|cutoff| record.timestamp >= cutoff))
            .collect();

        if kept.len() > max_records {
            let newest: HashSet<usize> = newest_first(&kept)
                .into_iter()
                .take(max_records)
                .collect();
            kept = kept
                .into_iter()
                .enumerate()
                .filter(|(index, _)| newest.contains(index))
                .map(|(_, record)| record)
                .collect();
        }

        self.history = kept;
        original - self.history.len()
    }

    /// Changed records within the last `days`, newest first
    pub fn ip_change_timeline(&self, now: DateTime<Utc>, days: i64) -> Vec<HistoryRecord> {
        let cutoff = age_cutoff(now, days);
        newest_first(&self.history)
            .into_iter()
            .map(|index| &self.history[index])
            .filter(|record| {
                record.ip_changed && cutoff.is_none_or(|cutoff| record.timestamp >= cutoff)
            })
            .cloned()
            .collect()
    }

    /// Build the reporting summary; `history_file_size` is supplied by the store
    pub fn stats(&self, history_file_size: String) -> HistoryStats {
        let total_checks = self.metadata.total_checks;

        let mut frequency_percentage = BTreeMap::new();
        if total_checks > 0 {
            for (mode, count) in &self.statistics.check_frequency {
                let share = (*count as f64 / total_checks as f64) * 100.0;
                frequency_percentage.insert(mode.clone(), round_to(share, 1));
            }
        }

        let recent_activity = newest_first(&self.history)
            .into_iter()
            .take(RECENT_ACTIVITY_LEN)
            .map(|index| self.history[index].clone())
            .collect();

        HistoryStats {
            metadata: self.metadata.clone(),
            current_status: self.current.clone(),
            statistics: self.statistics.clone(),
            frequency_percentage,
            recent_activity,
            history_file_size,
            total_history_records: self.history.len(),
        }
    }
}

impl Default for HistoryData {
    fn default() -> Self {
        Self::new()
    }
}

/// Indices ordered newest first; equal timestamps favour later insertion
fn newest_first(records: &[HistoryRecord]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..records.len()).collect();
    order.sort_by(|&a, &b| {
        records[b]
            .timestamp
            .cmp(&records[a].timestamp)
            .then(b.cmp(&a))
    });
    order
}

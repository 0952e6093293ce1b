//! Daily scheduler for daemon mode
//!
//! One scheduled check per day at the configured local wall-clock time, plus a
//! periodic status line. Checks run one at a time; the loop awaits each check
//! before computing the next run.

use anyhow::Result;
use chrono::{DateTime, Days, Local, TimeZone};
use ipnotify_core::engine::{CheckEngine, CheckEvent, CheckResult};
use ipnotify_core::CheckMode;
use std::collections::VecDeque;
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// Next occurrence of `hour:minute` strictly after `now`, in `now`'s zone
///
/// A wall-clock time that does not exist on a given day (DST gap) moves to
/// the following day. Ambiguous times resolve to the earlier instant.
pub fn next_run_after<Tz: TimeZone>(now: &DateTime<Tz>, hour: u32, minute: u32) -> Option<DateTime<Tz>> {
    let tz = now.timezone();
    let today = now.date_naive();

    for offset in 0..3 {
        let date = today.checked_add_days(Days::new(offset))?;
        let naive = date.and_hms_opt(hour, minute, 0)?;
        if let Some(candidate) = tz.from_local_datetime(&naive).earliest()
            && candidate > *now
        {
            return Some(candidate);
        }
    }

    None
}

/// One executed check as seen by the daemon
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionEntry {
    pub mode: CheckMode,
    pub public_ip: String,
    pub has_changed: bool,
    pub notified: bool,
    pub error: Option<String>,
}

impl ExecutionEntry {
    fn succeeded(&self) -> bool {
        self.error.is_none()
    }

    fn summary(&self) -> String {
        match &self.error {
            Some(error) => format!("{} check failed: {}", self.mode, error),
            None => format!(
                "{} check ok, ip={} changed={} notified={}",
                self.mode, self.public_ip, self.has_changed, self.notified
            ),
        }
    }
}

/// Bounded in-memory log of recent checks, fed from engine events
#[derive(Debug)]
pub struct ExecutionLog {
    entries: VecDeque<ExecutionEntry>,
    capacity: usize,
    total: u64,
    pending_failure: Option<String>,
}

impl ExecutionLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(256)),
            capacity,
            total: 0,
            pending_failure: None,
        }
    }

    /// Fold one engine event into the log
    pub fn observe(&mut self, event: CheckEvent) {
        match event {
            CheckEvent::NotificationFailed { error, .. } => {
                self.pending_failure = Some(error);
            }
            CheckEvent::CheckCompleted { result } => {
                let delivery_error = self.pending_failure.take();
                self.push(entry_from(&result, delivery_error));
            }
            CheckEvent::CheckFailed { mode, error } => {
                self.pending_failure = None;
                self.push(ExecutionEntry {
                    mode,
                    public_ip: String::new(),
                    has_changed: false,
                    notified: false,
                    error: Some(error),
                });
            }
            _ => {}
        }
    }

    /// Checks executed since startup, including ones evicted from the log
    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&ExecutionEntry> {
        self.entries.back()
    }

    /// Number of failed checks currently in the log
    pub fn failures(&self) -> usize {
        self.entries.iter().filter(|e| !e.succeeded()).count()
    }

    fn push(&mut self, entry: ExecutionEntry) {
        self.total += 1;
        if self.capacity == 0 {
            return;
        }
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }
}

fn entry_from(result: &CheckResult, delivery_error: Option<String>) -> ExecutionEntry {
    let error = result.error.clone().or(delivery_error.clone());
    ExecutionEntry {
        mode: result.mode,
        public_ip: result.public_ip.clone(),
        has_changed: result.has_changed,
        notified: result.should_notify && delivery_error.is_none(),
        error,
    }
}

/// Scheduler settings resolved from configuration
#[derive(Debug, Clone, Copy)]
pub struct Schedule {
    pub hour: u32,
    pub minute: u32,
    pub status_interval: Duration,
    pub max_execution_history: usize,
}

/// Run the daemon loop until `shutdown` completes
pub async fn run<S>(
    engine: CheckEngine,
    mut events: mpsc::Receiver<CheckEvent>,
    schedule: Schedule,
    shutdown: S,
) -> Result<()>
where
    S: Future<Output = Result<&'static str>>,
{
    let mut log = ExecutionLog::new(schedule.max_execution_history);
    let mut status = tokio::time::interval(schedule.status_interval);
    status.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    tokio::pin!(shutdown);

    info!(
        "Daily check scheduled at {:02}:{:02} local time",
        schedule.hour, schedule.minute
    );

    loop {
        let now = Local::now();
        let next_run = next_run_after(&now, schedule.hour, schedule.minute).ok_or_else(|| {
            anyhow::anyhow!(
                "Cannot compute next run for {:02}:{:02}",
                schedule.hour,
                schedule.minute
            )
        })?;
        let wait = (next_run - now).to_std().unwrap_or(Duration::ZERO);
        debug!("Next scheduled check at {} (in {:?})", next_run, wait);

        let sleep = tokio::time::sleep(wait);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                signal = &mut shutdown => {
                    let signal = signal?;
                    info!("Received shutdown signal: {}", signal);
                    info!("Executed {} check(s) this session", log.total());
                    return Ok(());
                }
                _ = &mut sleep => {
                    info!("Running scheduled check");
                    if let Err(e) = engine.run_check(CheckMode::Scheduled).await {
                        error!("Scheduled check failed: {}", e);
                    }
                    while let Ok(event) = events.try_recv() {
                        log.observe(event);
                    }
                    break;
                }
                _ = status.tick() => {
                    let last = log
                        .last()
                        .map(ExecutionEntry::summary)
                        .unwrap_or_else(|| "none".to_string());
                    info!(
                        "Status: next run {}, {} check(s) executed, {} failed in log, last: {}",
                        next_run.format("%Y-%m-%d %H:%M"),
                        log.total(),
                        log.failures(),
                        last
                    );
                }
            }
        }
    }
}

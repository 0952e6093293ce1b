//! Test doubles and common utilities for contract tests
//!
//! The doubles replace the network-facing collaborators so the history store
//! and the check engine can be exercised against a real file in a tempdir.

#![allow(dead_code)]

use ipnotify_core::config::HistoryConfig;
use ipnotify_core::error::Result;
use ipnotify_core::history::HistoryStore;
use ipnotify_core::traits::{IpResolver, Notifier, Observation};
use ipnotify_core::{CheckEngine, CheckEvent, Error};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// A resolver that replays scripted observations
///
/// Once the script is exhausted the last observation repeats.
pub struct ScriptedResolver {
    script: Arc<Mutex<VecDeque<Observation>>>,
    last: Arc<Mutex<Observation>>,
    resolve_call_count: Arc<AtomicUsize>,
}

impl ScriptedResolver {
    /// Always resolve to the same public IP
    pub fn fixed(public_ip: &str) -> Self {
        Self::scripted(vec![Observation::new("192.168.1.100", public_ip)])
    }

    /// Resolve to each observation in turn
    pub fn scripted(observations: Vec<Observation>) -> Self {
        let last = observations
            .last()
            .cloned()
            .unwrap_or_else(|| Observation::unavailable(vec!["empty script".to_string()]));
        Self {
            script: Arc::new(Mutex::new(observations.into())),
            last: Arc::new(Mutex::new(last)),
            resolve_call_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Report both addresses as unavailable
    pub fn offline() -> Self {
        Self::scripted(vec![Observation::unavailable(vec![
            "api.ipify.org: connection refused".to_string(),
            "local: network unreachable".to_string(),
        ])])
    }

    /// Get the number of times resolve() was called
    pub fn resolve_call_count(&self) -> usize {
        self.resolve_call_count.load(Ordering::SeqCst)
    }

    /// Create a new ScriptedResolver that shares its script and counters
    pub fn sharing_counters_with(other: &Self) -> Self {
        Self {
            script: Arc::clone(&other.script),
            last: Arc::clone(&other.last),
            resolve_call_count: Arc::clone(&other.resolve_call_count),
        }
    }
}

#[async_trait::async_trait]
impl IpResolver for ScriptedResolver {
    async fn resolve(&self) -> Observation {
        self.resolve_call_count.fetch_add(1, Ordering::SeqCst);

        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(observation) => {
                *self.last.lock().unwrap() = observation.clone();
                observation
            }
            None => self.last.lock().unwrap().clone(),
        }
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// A notifier that records messages and can be told to fail
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<String>>>,
    send_call_count: Arc<AtomicUsize>,
    failing: Arc<AtomicBool>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self {
            sent: Arc::new(Mutex::new(Vec::new())),
            send_call_count: Arc::new(AtomicUsize::new(0)),
            failing: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A notifier whose every send fails with a transport error
    pub fn failing() -> Self {
        let notifier = Self::new();
        notifier.set_failing(true);
        notifier
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Get the number of times send() was called
    pub fn send_call_count(&self) -> usize {
        self.send_call_count.load(Ordering::SeqCst)
    }

    /// Messages successfully delivered
    pub fn sent_messages(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    /// Create a new RecordingNotifier that shares counters with an existing one
    pub fn sharing_counters_with(other: &Self) -> Self {
        Self {
            sent: Arc::clone(&other.sent),
            send_call_count: Arc::clone(&other.send_call_count),
            failing: Arc::clone(&other.failing),
        }
    }
}

#[async_trait::async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, message: &str) -> Result<()> {
        self.send_call_count.fetch_add(1, Ordering::SeqCst);

        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::transport("webhook returned status 500"));
        }

        self.sent.lock().unwrap().push(message.to_string());
        Ok(())
    }

    fn format_notification(&self, observation: &Observation) -> Result<String> {
        if !observation.public_ip_available() {
            return Err(Error::invalid_input("public IP unavailable"));
        }
        Ok(format!("IP: {}", observation.public_ip))
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

/// History config pointing into `dir`, with default retention
pub fn history_config(dir: &Path) -> HistoryConfig {
    HistoryConfig::new(dir.join("ip_history.json"))
}

/// Open a store in `dir`
pub async fn open_store(dir: &Path) -> Arc<HistoryStore> {
    Arc::new(
        HistoryStore::open(history_config(dir))
            .await
            .expect("store opens"),
    )
}

/// Build an engine over shared doubles
pub fn engine_with(
    store: Arc<HistoryStore>,
    resolver: &ScriptedResolver,
    notifier: &RecordingNotifier,
) -> (CheckEngine, mpsc::Receiver<CheckEvent>) {
    CheckEngine::new(
        Box::new(ScriptedResolver::sharing_counters_with(resolver)),
        store,
        Box::new(RecordingNotifier::sharing_counters_with(notifier)),
        64,
    )
}

/// Drain every event currently queued
pub fn drain_events(rx: &mut mpsc::Receiver<CheckEvent>) -> Vec<CheckEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Files in `dir` that are corruption backups
pub fn corrupted_backups(dir: &Path) -> Vec<std::path::PathBuf> {
    std::fs::read_dir(dir)
        .expect("dir readable")
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.file_name()
                .map(|name| name.to_string_lossy().contains(".corrupted."))
                .unwrap_or(false)
        })
        .collect()
}

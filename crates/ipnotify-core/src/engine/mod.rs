//! Check orchestration
//!
//! The CheckEngine is responsible for:
//! - Observing addresses via IpResolver
//! - Detecting a public IP change against the HistoryStore
//! - Applying the NotificationPolicy
//! - Delivering through the Notifier (full checks only)
//! - Recording the check in history
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐
//! │ IpResolver  │─── Observation ─────┐
//! └─────────────┘                     │
//!                                     ▼
//!                            ┌──────────────┐
//!                            │ CheckEngine  │
//!                            └──────────────┘
//!                                     │
//!         ┌───────────────────────────┼───────────────────────────┐
//!         │                           │                           │
//!         ▼                           ▼                           ▼
//! ┌──────────────┐          ┌──────────────┐           ┌─────────────┐
//! │ HistoryStore │          │   Notifier   │           │   Events    │
//! │ (detect/rec) │          │   (send)     │           │  (observe)  │
//! └──────────────┘          └──────────────┘           └─────────────┘
//! ```
//!
//! ## Failure handling
//!
//! Resolver failures never become errors: they surface as
//! [`CheckResult::error`] or [`CheckResult::warnings`]. Only store I/O
//! failures and exhausted notifier retries are returned as `Err`.

use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::history::{HistoryStore, NotificationOutcome, timestamp};
use crate::policy::{CheckMode, NotificationPolicy};
use crate::traits::{IpResolver, Notifier, Observation};

/// Events emitted by the CheckEngine
#[derive(Debug, Clone, PartialEq)]
pub enum CheckEvent {
    /// A check began
    CheckStarted { mode: CheckMode },

    /// The public IP differs from the last recorded one
    IpChanged {
        previous: Option<String>,
        current: String,
    },

    /// Notification delivered
    NotificationSent { mode: CheckMode, public_ip: String },

    /// Policy decided not to notify
    NotificationSkipped { mode: CheckMode },

    /// Notification attempted and failed
    NotificationFailed { mode: CheckMode, error: String },

    /// The check could not be recorded
    CheckFailed { mode: CheckMode, error: String },

    /// The check finished and was recorded (unless in test mode)
    CheckCompleted { result: CheckResult },
}

/// Uniform outcome of a check
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckResult {
    pub local_ip: String,
    pub public_ip: String,
    pub has_changed: bool,
    pub should_notify: bool,
    pub mode: CheckMode,
    #[serde(with = "timestamp")]
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Wall-clock seconds, rounded to 2 decimals
    pub execution_duration: f64,
    /// Set when neither address could be resolved
    pub error: Option<String>,
    /// Resolver problems that did not prevent the check
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Observation plus the decisions derived from it
struct Evaluation {
    observation: Observation,
    previous_ip: Option<String>,
    has_changed: bool,
    should_notify: bool,
    error: Option<String>,
}

/// Check orchestrator
///
/// One call to [`CheckEngine::perform_check`] or [`CheckEngine::run_check`]
/// is one check. The engine schedules nothing itself; the caller owns the
/// cadence.
///
/// ## Threading
///
/// Checks are expected to run one at a time. Each history write is atomic
/// under the store's write lock, but change detection reads the store
/// before that lock is taken, so two overlapping checks can both see the
/// same change and both notify.
pub struct CheckEngine {
    /// Address discovery
    resolver: Box<dyn IpResolver>,

    /// History and change detection
    store: Arc<HistoryStore>,

    /// Notification transport
    notifier: Box<dyn Notifier>,

    /// Event sender for external monitoring
    event_tx: mpsc::Sender<CheckEvent>,
}

impl CheckEngine {
    /// Create a new check engine
    ///
    /// # Returns
    ///
    /// A tuple of (engine, event_receiver). The channel holds at most
    /// `event_capacity` events; further events are dropped with a warning.
    pub fn new(
        resolver: Box<dyn IpResolver>,
        store: Arc<HistoryStore>,
        notifier: Box<dyn Notifier>,
        event_capacity: usize,
    ) -> (Self, mpsc::Receiver<CheckEvent>) {
        let (tx, rx) = mpsc::channel(event_capacity.max(1));

        let engine = Self {
            resolver,
            store,
            notifier,
            event_tx: tx,
        };

        (engine, rx)
    }

    /// Shared handle to the history store
    pub fn store(&self) -> &Arc<HistoryStore> {
        &self.store
    }

    /// The notifier in use
    pub fn notifier(&self) -> &dyn Notifier {
        self.notifier.as_ref()
    }

    /// Observe, detect, decide and record the *intended* notification
    ///
    /// Nothing is sent. Test mode records nothing.
    ///
    /// # Returns
    ///
    /// - `Ok(CheckResult)`: Always, unless the store could not be written
    /// - `Err(Error::File)`: History could not be persisted
    pub async fn perform_check(&self, mode: CheckMode) -> Result<CheckResult> {
        let started = Instant::now();
        self.emit_event(CheckEvent::CheckStarted { mode });

        let evaluation = self.evaluate(mode).await;
        let outcome = NotificationOutcome::from(evaluation.should_notify);

        self.finish(mode, evaluation, outcome, started).await
    }

    /// Full check: observe, detect, decide, deliver, then record the actual
    /// delivery outcome
    ///
    /// The notifier is called at most once; it owns its retries.
    ///
    /// # Returns
    ///
    /// - `Ok(CheckResult)`: Check recorded, notification delivered or skipped
    /// - `Err(Error::Transport)`: Delivery failed; the failure was recorded
    /// - `Err(Error::File)`: History could not be persisted
    pub async fn run_check(&self, mode: CheckMode) -> Result<CheckResult> {
        let started = Instant::now();
        self.emit_event(CheckEvent::CheckStarted { mode });

        let evaluation = self.evaluate(mode).await;

        let mut delivery_error = None;
        let outcome = if evaluation.should_notify {
            match self.deliver(&evaluation.observation).await {
                Ok(()) => {
                    info!(
                        "Notification sent via {}: {}",
                        self.notifier.name(),
                        evaluation.observation.public_ip
                    );
                    self.emit_event(CheckEvent::NotificationSent {
                        mode,
                        public_ip: evaluation.observation.public_ip.clone(),
                    });
                    NotificationOutcome::Sent
                }
                Err(e) => {
                    error!("Notification via {} failed: {}", self.notifier.name(), e);
                    self.emit_event(CheckEvent::NotificationFailed {
                        mode,
                        error: e.to_string(),
                    });
                    let outcome = NotificationOutcome::Failed(e.to_string());
                    delivery_error = Some(e);
                    outcome
                }
            }
        } else {
            NotificationOutcome::NotAttempted
        };

        let result = self.finish(mode, evaluation, outcome, started).await?;

        match delivery_error {
            Some(e) => Err(e),
            None => Ok(result),
        }
    }

    /// Resolve and apply change detection and policy
    async fn evaluate(&self, mode: CheckMode) -> Evaluation {
        let observation = self.resolver.resolve().await;
        debug!(
            "{} resolved local={} public={}",
            self.resolver.name(),
            observation.local_ip,
            observation.public_ip
        );

        if observation.is_total_failure() {
            let reason = if observation.errors.is_empty() {
                "no address could be determined".to_string()
            } else {
                observation.errors.join("; ")
            };
            warn!("IP resolution failed: {}", reason);
            return Evaluation {
                observation,
                previous_ip: None,
                has_changed: false,
                should_notify: false,
                error: Some(format!("IP resolution failed: {}", reason)),
            };
        }

        for warning in &observation.errors {
            warn!("Partial IP resolution failure: {}", warning);
        }

        let previous_ip = self.store.get_last_public_ip().await;
        let has_changed = self.store.has_ip_changed(&observation.public_ip).await;
        let should_notify =
            NotificationPolicy::decide(mode, has_changed) && observation.public_ip_available();

        if has_changed {
            self.emit_event(CheckEvent::IpChanged {
                previous: previous_ip.clone(),
                current: observation.public_ip.clone(),
            });
        }

        Evaluation {
            observation,
            previous_ip,
            has_changed,
            should_notify,
            error: None,
        }
    }

    async fn deliver(&self, observation: &Observation) -> Result<()> {
        let message = self.notifier.format_notification(observation)?;
        self.notifier.send(&message).await
    }

    /// Record (unless test mode), build the result and emit completion
    async fn finish(
        &self,
        mode: CheckMode,
        evaluation: Evaluation,
        outcome: NotificationOutcome,
        started: Instant,
    ) -> Result<CheckResult> {
        let execution_duration = (started.elapsed().as_secs_f64() * 100.0).round() / 100.0;
        let Evaluation {
            observation,
            previous_ip,
            has_changed,
            should_notify,
            error,
        } = evaluation;

        if !should_notify {
            self.emit_event(CheckEvent::NotificationSkipped { mode });
        }

        if mode != CheckMode::Test {
            if let Err(e) = self
                .store
                .record_ip_check(&observation, mode.as_str(), outcome, execution_duration)
                .await
            {
                error!("Failed to record {} check: {}", mode, e);
                self.emit_event(CheckEvent::CheckFailed {
                    mode,
                    error: e.to_string(),
                });
                return Err(e);
            }
        } else {
            debug!("Test mode, check not recorded");
        }

        if has_changed {
            info!(
                "Check complete ({}): public IP changed {} -> {}",
                mode,
                previous_ip.as_deref().unwrap_or("none"),
                observation.public_ip
            );
        } else {
            info!(
                "Check complete ({}): public IP {} unchanged",
                mode, observation.public_ip
            );
        }

        let result = CheckResult {
            local_ip: observation.local_ip,
            public_ip: observation.public_ip,
            has_changed,
            should_notify,
            mode,
            timestamp: observation.timestamp,
            execution_duration,
            warnings: if error.is_some() {
                Vec::new()
            } else {
                observation.errors
            },
            error,
        };

        self.emit_event(CheckEvent::CheckCompleted {
            result: result.clone(),
        });

        Ok(result)
    }

    /// Emit an event, dropping it when the channel is full
    fn emit_event(&self, event: CheckEvent) {
        if self.event_tx.try_send(event).is_err() {
            warn!("Event channel full, dropping event. Consider draining events faster.");
        }
    }
}

// # ipnotify-core
//
// Core library for the IP change notifier.
//
// ## Architecture Overview
//
// - **IpResolver**: Trait for discovering local and public addresses
// - **Notifier**: Trait for delivering a notification
// - **HistoryStore**: Durable, self-healing IP check history with change detection
// - **NotificationPolicy**: Pure decision of whether a check notifies
// - **CheckEngine**: Orchestrates resolve → detect → decide → notify → record
//
// ## Design Principles
//
// 1. **Fail-soft checks**: resolver failures become result fields, never errors
// 2. **Durable history**: atomic writes; invalid files are backed up and reset
// 3. **Library-first**: scheduling, signals and process lifecycle live in the daemon

pub mod config;
pub mod engine;
pub mod error;
pub mod history;
pub mod policy;
pub mod traits;

// Re-export core types for convenience
pub use config::{AppConfig, DiscordConfig, HistoryConfig, ResolverConfig, SchedulerConfig};
pub use engine::{CheckEngine, CheckEvent, CheckResult};
pub use error::{Error, Result};
pub use history::{HistoryData, HistoryRecord, HistoryStats, HistoryStore, NotificationOutcome};
pub use policy::{CheckMode, NotificationPolicy};
pub use traits::{IpResolver, Notifier, Observation, UNAVAILABLE, is_available};

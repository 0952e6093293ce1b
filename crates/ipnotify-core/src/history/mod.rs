//! IP check history
//!
//! - [`HistoryStore`]: durable, self-healing store and change detector
//! - [`HistoryData`]: the persisted document and its pure update rules
//! - [`timestamp`]: canonical UTC timestamp encoding

pub mod model;
pub mod store;
pub mod timestamp;

pub use model::{
    CurrentState, HISTORY_FILE_VERSION, HistoryData, HistoryRecord, HistoryStats, Metadata,
    NotificationOutcome, Statistics,
};
pub use store::{HistoryStore, format_file_size};

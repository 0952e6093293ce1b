//! Collaborator traits for ipnotify
//!
//! This module defines the abstract interfaces the check engine consumes.
//!
//! - [`IpResolver`]: Discover local and public addresses
//! - [`Notifier`]: Deliver a formatted notification

pub mod ip_resolver;
pub mod notifier;

pub use ip_resolver::{IpResolver, Observation, UNAVAILABLE, is_available};
pub use notifier::Notifier;

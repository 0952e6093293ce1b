// # Notifier Trait
//
// Defines the interface for delivering an IP notification to an operator.
//
// ## Implementations
//
// - Discord webhook: `ipnotify-notifier-discord` crate
//
// ## Usage
//
// ```rust,ignore
// use ipnotify_core::Notifier;
//
// #[tokio::main]
// async fn main() -> ipnotify_core::Result<()> {
//     let notifier = /* Notifier implementation */;
//
//     let message = notifier.format_notification(&observation)?;
//     notifier.send(&message).await?;
//
//     Ok(())
// }
// ```

use async_trait::async_trait;

use crate::traits::ip_resolver::Observation;

/// Trait for notification transport implementations
///
/// # Contract
///
/// - `send` owns its retries, backoff and rate-limit handling
/// - `send` returns `Error::Transport` only once those retries are exhausted
/// - The engine never retries a failed `send`; it records the failure and
///   hands the error back to its caller
/// - Implementations hold no history and never decide *whether* to notify
///   (owned by `NotificationPolicy`)
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver an already formatted message
    ///
    /// # Returns
    ///
    /// - `Ok(())`: Delivered
    /// - `Err(Error::Transport)`: Unrecoverable after internal retries
    async fn send(&self, message: &str) -> Result<(), crate::Error>;

    /// Render the notification for an observation
    ///
    /// # Returns
    ///
    /// - `Ok(String)`: The message to pass to [`Notifier::send`]
    /// - `Err(Error::InvalidInput)`: No usable public IP, or the message
    ///   exceeds the transport's limits
    fn format_notification(&self, observation: &Observation) -> Result<String, crate::Error>;

    /// Short name used in logs
    fn name(&self) -> &'static str;
}

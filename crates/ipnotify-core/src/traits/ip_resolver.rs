// # IP Resolver Trait
//
// Defines the interface for discovering the host's local and public addresses.
//
// ## Implementations
//
// - HTTP echo services + UDP route lookup: `ipnotify-resolver-http` crate
//
// ## Usage
//
// ```rust,ignore
// use ipnotify_core::IpResolver;
//
// #[tokio::main]
// async fn main() {
//     let resolver = /* IpResolver implementation */;
//
//     let observation = resolver.resolve().await;
//     if observation.public_ip_available() {
//         println!("public IP: {}", observation.public_ip);
//     }
// }
// ```

use async_trait::async_trait;

/// Reserved value meaning "address could not be determined"
pub const UNAVAILABLE: &str = "unavailable";

/// Returns true when `ip` is a real value rather than empty or the sentinel
pub fn is_available(ip: &str) -> bool {
    !ip.is_empty() && ip != UNAVAILABLE
}

/// One resolver invocation's result
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Observation {
    /// Local (LAN) address, or [`UNAVAILABLE`]
    pub local_ip: String,
    /// Public (WAN) address, or [`UNAVAILABLE`]
    pub public_ip: String,
    /// When the observation was taken
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Per-source failures; empty when both lookups succeeded
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl Observation {
    /// Create an observation from resolved addresses
    pub fn new(local_ip: impl Into<String>, public_ip: impl Into<String>) -> Self {
        Self {
            local_ip: local_ip.into(),
            public_ip: public_ip.into(),
            timestamp: crate::history::timestamp::now(),
            errors: Vec::new(),
        }
    }

    /// Create an observation where neither address could be determined
    pub fn unavailable(errors: Vec<String>) -> Self {
        Self {
            local_ip: UNAVAILABLE.to_string(),
            public_ip: UNAVAILABLE.to_string(),
            timestamp: crate::history::timestamp::now(),
            errors,
        }
    }

    /// Attach failure reasons
    pub fn with_errors(mut self, errors: Vec<String>) -> Self {
        self.errors = errors;
        self
    }

    /// Whether the public address was determined
    pub fn public_ip_available(&self) -> bool {
        is_available(&self.public_ip)
    }

    /// Whether the local address was determined
    pub fn local_ip_available(&self) -> bool {
        is_available(&self.local_ip)
    }

    /// Whether both lookups failed
    pub fn is_total_failure(&self) -> bool {
        !self.public_ip_available() && !self.local_ip_available()
    }
}

/// Trait for IP resolver implementations
///
/// # Contract
///
/// - Never fails: a source that cannot be reached yields [`UNAVAILABLE`] for
///   its address and a message in [`Observation::errors`]
/// - Total failure returns both addresses as [`UNAVAILABLE`] with a non-empty
///   error list
/// - Network calls are bounded by a timeout and a small fixed retry count;
///   the orchestrator never retries on the resolver's behalf
/// - The resolver owns no history and makes no notification decisions
#[async_trait]
pub trait IpResolver: Send + Sync {
    /// Resolve the current local and public addresses
    async fn resolve(&self) -> Observation;

    /// Short name used in logs
    fn name(&self) -> &'static str {
        "resolver"
    }
}

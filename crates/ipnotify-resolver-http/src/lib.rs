// # HTTP IP Resolver
//
// This crate provides the IP resolver for ipnotify.
//
// ## Sources
//
// - **Public IP**: plain-text echo services (api.ipify.org, icanhazip.com,
//   ident.me, checkip.amazonaws.com), tried in order. Each service gets
//   `retry_attempts` tries with `retry_delay` between them.
// - **Local IP**: the source address the OS picks for a UDP socket
//   "connected" to a public address. No packet is sent.
//
// ## Failure model
//
// `resolve()` never fails. An address that cannot be determined is reported
// as the `unavailable` sentinel and the reasons are collected in
// `Observation::errors`.

use ipnotify_core::config::ResolverConfig;
use ipnotify_core::traits::{IpResolver, Observation, UNAVAILABLE};
use ipnotify_core::{Error, Result};

use std::net::Ipv4Addr;
use std::time::Duration;

use tokio::net::UdpSocket;

/// Address used to pick the outbound interface for the local IP
const LOCAL_PROBE_ADDR: &str = "8.8.8.8:80";

/// User agent sent to echo services
const USER_AGENT: &str = concat!("ipnotify/", env!("CARGO_PKG_VERSION"));

/// Resolver backed by HTTP echo services and a UDP route lookup
pub struct HttpIpResolver {
    /// Resolver settings
    config: ResolverConfig,

    /// Target used for the local address lookup
    local_probe: String,

    /// HTTP client
    client: reqwest::Client,
}

impl HttpIpResolver {
    /// Create a resolver from configuration
    ///
    /// # Errors
    ///
    /// `Error::Config` if the HTTP client cannot be built.
    pub fn new(config: ResolverConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            config,
            local_probe: LOCAL_PROBE_ADDR.to_string(),
            client,
        })
    }

    /// Use a different address for the local IP route lookup
    pub fn with_local_probe(mut self, addr: impl Into<String>) -> Self {
        self.local_probe = addr.into();
        self
    }

    /// Query the configured services in order until one answers
    pub async fn public_ip(&self) -> Result<String> {
        let mut failures = Vec::new();

        for service in &self.config.public_ip_services {
            match self.query_service(service).await {
                Ok(ip) => {
                    tracing::debug!("Public IP {} from {}", ip, service);
                    return Ok(ip);
                }
                Err(e) => {
                    tracing::warn!("Public IP service {} failed: {}", service, e);
                    failures.push(format!("{}: {}", service, e));
                }
            }
        }

        Err(Error::network(format!(
            "all public IP services failed ({})",
            failures.join("; ")
        )))
    }

    /// Source address the OS would use to reach the probe address
    pub async fn local_ip(&self) -> Result<String> {
        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(|e| Error::network(format!("Failed to bind UDP socket: {}", e)))?;

        socket
            .connect(self.local_probe.as_str())
            .await
            .map_err(|e| Error::network(format!("No route to {}: {}", self.local_probe, e)))?;

        let addr = socket
            .local_addr()
            .map_err(|e| Error::network(format!("Failed to read local address: {}", e)))?;

        Ok(addr.ip().to_string())
    }

    /// One service with retries
    async fn query_service(&self, url: &str) -> Result<String> {
        let attempts = self.config.retry_attempts.max(1);
        let delay = Duration::from_secs(self.config.retry_delay_secs);
        let mut last_error = Error::network("no attempt made");

        for attempt in 1..=attempts {
            match self.fetch_once(url).await {
                Ok(ip) => return Ok(ip),
                Err(e) => {
                    tracing::debug!("Attempt {}/{} against {} failed: {}", attempt, attempts, url, e);
                    last_error = e;
                }
            }

            if attempt < attempts {
                tokio::time::sleep(delay).await;
            }
        }

        Err(last_error)
    }

    /// Single GET; only HTTP 200 with an IPv4 body counts
    async fn fetch_once(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::network(format!("Request failed: {}", e)))?;

        if response.status() != reqwest::StatusCode::OK {
            return Err(Error::network(format!("HTTP error: {}", response.status())));
        }

        let body = response
            .text()
            .await
            .map_err(|e| Error::network(format!("Failed to read response: {}", e)))?;

        parse_ipv4(&body)
            .map(str::to_string)
            .ok_or_else(|| Error::network(format!("Invalid IPv4 address: {}", body.trim())))
    }
}

#[async_trait::async_trait]
impl IpResolver for HttpIpResolver {
    async fn resolve(&self) -> Observation {
        let mut errors = Vec::new();

        let local_ip = if self.config.check_local_ip {
            self.local_ip().await.unwrap_or_else(|e| {
                tracing::warn!("Local IP lookup failed: {}", e);
                errors.push(format!("local IP: {}", e));
                UNAVAILABLE.to_string()
            })
        } else {
            UNAVAILABLE.to_string()
        };

        let public_ip = if self.config.check_public_ip {
            self.public_ip().await.unwrap_or_else(|e| {
                tracing::error!("Public IP lookup failed: {}", e);
                errors.push(format!("public IP: {}", e));
                UNAVAILABLE.to_string()
            })
        } else {
            UNAVAILABLE.to_string()
        };

        Observation::new(local_ip, public_ip).with_errors(errors)
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// Trim `text` and return it when it is a dotted-quad IPv4 address
///
/// The returned slice is the trimmed input, not a re-rendered address.
pub fn parse_ipv4(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    trimmed.parse::<Ipv4Addr>().ok().map(|_| trimmed)
}

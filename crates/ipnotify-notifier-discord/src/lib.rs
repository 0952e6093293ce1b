// # Discord Webhook Notifier
//
// This crate delivers ipnotify notifications to a Discord channel through an
// incoming webhook.
//
// ## Delivery
//
// - POST `{"content": "<message>"}` to the webhook URL
// - 204 (or any other 2xx) is success
// - 429 waits for `Retry-After` seconds (default 1), then tries again
// - Any other status fails immediately
// - Network errors are retried `retry_attempts` times with `retry_delay`
//   between attempts
//
// ## Security Requirements
//
// - The webhook URL is a credential and NEVER appears in logs or Debug output
// - Use `masked_url()` when the URL has to be shown

use async_trait::async_trait;
use ipnotify_core::config::{DISCORD_WEBHOOK_PREFIX, DiscordConfig};
use ipnotify_core::traits::{Notifier, Observation};
use ipnotify_core::{Error, Result};
use serde::Serialize;
use std::time::Duration;

/// Message sent by [`DiscordNotifier::test_connection`]
pub const TEST_MESSAGE: &str = "🔍 ipnotify connection test";

/// Wait applied when a 429 carries no usable `Retry-After`
const DEFAULT_RATE_LIMIT_WAIT: Duration = Duration::from_secs(1);

/// Longest `Retry-After` honoured; larger values are clamped
const MAX_RATE_LIMIT_WAIT: Duration = Duration::from_secs(60);

/// User agent sent with every webhook call
const USER_AGENT: &str = concat!("ipnotify/", env!("CARGO_PKG_VERSION"));

#[derive(Serialize)]
struct WebhookPayload<'a> {
    content: &'a str,
}

/// Discord webhook notifier
///
/// # Security
///
/// The Debug implementation does NOT expose the webhook URL.
pub struct DiscordNotifier {
    /// Webhook URL
    /// ⚠️ NEVER log this value
    webhook_url: String,

    /// Template with an `{ip}` placeholder
    message_template: String,

    /// Longest message Discord accepts
    max_message_length: usize,

    /// Delivery attempts for network failures and rate limits
    retry_attempts: usize,

    /// Delay between attempts after a network failure
    retry_delay: Duration,

    /// HTTP client for webhook requests
    client: reqwest::Client,
}

// Custom Debug implementation that hides the webhook URL
impl std::fmt::Debug for DiscordNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscordNotifier")
            .field("webhook_url", &"<REDACTED>")
            .field("message_template", &self.message_template)
            .field("max_message_length", &self.max_message_length)
            .field("retry_attempts", &self.retry_attempts)
            .field("retry_delay", &self.retry_delay)
            .finish()
    }
}

impl DiscordNotifier {
    /// Create a notifier from validated configuration
    ///
    /// # Errors
    ///
    /// `Error::Config` when the webhook URL or template is invalid, or the
    /// HTTP client cannot be built.
    pub fn new(config: DiscordConfig) -> Result<Self> {
        config.validate()?;
        Self::from_config(config)
    }

    /// Build without validating the webhook URL
    fn from_config(config: DiscordConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            webhook_url: config.webhook_url.trim().to_string(),
            message_template: config.message_template,
            max_message_length: config.max_message_length,
            retry_attempts: config.retry_attempts.max(1),
            retry_delay: Duration::from_secs(config.retry_delay_secs),
            client,
        })
    }

    /// Webhook URL with the token hidden, safe for display
    pub fn masked_url(&self) -> String {
        mask_webhook_url(&self.webhook_url)
    }

    /// Render the template for `ip`
    ///
    /// # Errors
    ///
    /// `Error::InvalidInput` for an empty IP or a message over the length limit.
    pub fn format_message(&self, ip: &str) -> Result<String> {
        let ip = ip.trim();
        if ip.is_empty() {
            return Err(Error::invalid_input("IP address cannot be empty"));
        }

        let message = self.message_template.replace("{ip}", ip);

        let length = message.chars().count();
        if length > self.max_message_length {
            return Err(Error::invalid_input(format!(
                "Message too long ({} > {})",
                length, self.max_message_length
            )));
        }

        Ok(message)
    }

    /// Send the fixed probe message
    pub async fn test_connection(&self) -> Result<()> {
        tracing::info!("Testing Discord webhook {}", self.masked_url());
        self.send(TEST_MESSAGE).await
    }

    /// POST with retry
    async fn post(&self, message: &str) -> Result<()> {
        let payload = WebhookPayload { content: message };
        let mut last_error = String::from("no attempt made");

        for attempt in 1..=self.retry_attempts {
            tracing::debug!("Sending Discord message (attempt {}/{})", attempt, self.retry_attempts);

            let response = match self.client.post(&self.webhook_url).json(&payload).send().await {
                Ok(response) => response,
                Err(e) => {
                    // reqwest errors may embed the URL
                    let reason = e.without_url().to_string();
                    tracing::warn!("Discord request failed (attempt {}): {}", attempt, reason);
                    last_error = reason;
                    if attempt < self.retry_attempts {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                    continue;
                }
            };

            let status = response.status();
            match status.as_u16() {
                200..=299 => {
                    tracing::info!("Discord message delivered ({})", status);
                    return Ok(());
                }
                429 => {
                    last_error = format!("rate limited ({})", status);
                    if attempt < self.retry_attempts {
                        let wait = retry_after(response.headers());
                        tracing::warn!("Discord rate limit hit, waiting {:?} before retrying", wait);
                        tokio::time::sleep(wait).await;
                    } else {
                        tracing::warn!("Discord rate limit hit on the last attempt");
                    }
                }
                _ => {
                    let body = response.text().await.unwrap_or_default();
                    let mut reason = format!("Discord returned status {}", status);
                    if !body.is_empty() {
                        reason.push_str(&format!(": {}", body));
                    }
                    return Err(Error::transport(reason));
                }
            }
        }

        Err(Error::transport(format!(
            "All {} delivery attempts failed, last error: {}",
            self.retry_attempts, last_error
        )))
    }
}

#[async_trait]
impl Notifier for DiscordNotifier {
    async fn send(&self, message: &str) -> Result<()> {
        self.post(message).await.inspect_err(|e| {
            tracing::error!("Discord delivery failed: {}", e);
        })
    }

    fn format_notification(&self, observation: &Observation) -> Result<String> {
        if !observation.public_ip_available() {
            return Err(Error::invalid_input(
                "No valid public IP available for the notification",
            ));
        }
        self.format_message(&observation.public_ip)
    }

    fn name(&self) -> &'static str {
        "discord"
    }
}

/// Hide the token part of a webhook URL
///
/// `https://discord.com/api/webhooks/<id>/<token>` becomes
/// `https://discord.com/api/webhooks/<id>/****`. Anything else is reduced to
/// its scheme and host.
pub fn mask_webhook_url(url: &str) -> String {
    if let Some(rest) = url.strip_prefix(DISCORD_WEBHOOK_PREFIX) {
        let id = rest.split('/').next().unwrap_or_default();
        return format!("{}{}/****", DISCORD_WEBHOOK_PREFIX, id);
    }

    match reqwest::Url::parse(url) {
        Ok(parsed) => format!(
            "{}://{}/****",
            parsed.scheme(),
            parsed.host_str().unwrap_or("unknown")
        ),
        Err(_) => "****".to_string(),
    }
}

/// `Retry-After` in (possibly fractional) seconds, at most `MAX_RATE_LIMIT_WAIT`
fn retry_after(headers: &reqwest::header::HeaderMap) -> Duration {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<f64>().ok())
        .filter(|secs| !secs.is_nan() && *secs >= 0.0)
        .map(|secs| Duration::try_from_secs_f64(secs).unwrap_or(MAX_RATE_LIMIT_WAIT))
        .map(|wait| wait.min(MAX_RATE_LIMIT_WAIT))
        .unwrap_or(DEFAULT_RATE_LIMIT_WAIT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::mpsc;

    const WEBHOOK: &str = "https://discord.com/api/webhooks/123456789/secret-token-abcdef";

    const NO_CONTENT: &str = "HTTP/1.1 204 No Content\r\nConnection: close\r\n\r\n";
    const RATE_LIMITED: &str =
        "HTTP/1.1 429 Too Many Requests\r\nRetry-After: 0\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";
    const BAD_REQUEST: &str =
        "HTTP/1.1 400 Bad Request\r\nContent-Length: 15\r\nConnection: close\r\n\r\n{\"code\": 50006}";

    /// Read one HTTP request and return its body
    async fn read_body(stream: &mut TcpStream) -> String {
        let mut data = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            let n = stream.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            data.extend_from_slice(&buf[..n]);

            let text = String::from_utf8_lossy(&data).to_string();
            if let Some(split) = text.find("\r\n\r\n") {
                let length = text[..split]
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if data.len() >= split + 4 + length {
                    return text[split + 4..split + 4 + length].to_string();
                }
            }
        }
        String::new()
    }

    /// Serve canned responses in order, forwarding each request body
    async fn serve(responses: Vec<&'static str>) -> (String, mpsc::UnboundedReceiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            for response in responses {
                let (mut stream, _) = listener.accept().await.unwrap();
                let body = read_body(&mut stream).await;
                let _ = tx.send(body);
                stream.write_all(response.as_bytes()).await.unwrap();
                let _ = stream.shutdown().await;
            }
        });

        (format!("http://{}/api/webhooks/1/token", addr), rx)
    }

    fn local_notifier(url: String) -> DiscordNotifier {
        let mut config = DiscordConfig::new(url);
        config.retry_attempts = 3;
        config.retry_delay_secs = 0;
        config.timeout_secs = 2;
        DiscordNotifier::from_config(config).unwrap()
    }

    #[test]
    fn test_rejects_non_discord_url() {
        let result = DiscordNotifier::new(DiscordConfig::new("https://example.com/hook"));
        assert!(matches!(result, Err(Error::Config(_))));

        assert!(DiscordNotifier::new(DiscordConfig::new(WEBHOOK)).is_ok());
    }

    #[test]
    fn test_template_requires_placeholder() {
        let mut config = DiscordConfig::new(WEBHOOK);
        config.message_template = "Server is up".to_string();
        assert!(DiscordNotifier::new(config).is_err());
    }

    #[test]
    fn test_default_template() {
        let notifier = DiscordNotifier::new(DiscordConfig::new(WEBHOOK)).unwrap();
        assert_eq!(
            notifier.format_message(" 203.0.113.7\n").unwrap(),
            "Minecraft Server IP: 203.0.113.7:25565"
        );
        assert!(notifier.format_message("  ").is_err());
    }

    #[test]
    fn test_message_length_limit() {
        let mut config = DiscordConfig::new(WEBHOOK);
        config.message_template = format!("{}{{ip}}", "x".repeat(1990));
        let notifier = DiscordNotifier::new(config).unwrap();

        assert!(notifier.format_message("1.2.3.4").is_ok());
        let err = notifier.format_message("203.0.113.7").unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_format_notification_needs_public_ip() {
        let notifier = DiscordNotifier::new(DiscordConfig::new(WEBHOOK)).unwrap();

        let observed = Observation::new("192.168.1.10", "203.0.113.7");
        assert!(notifier.format_notification(&observed).is_ok());

        let offline = Observation::unavailable(vec!["offline".to_string()]);
        assert!(notifier.format_notification(&offline).is_err());
    }

    #[test]
    fn test_webhook_url_not_exposed_in_debug() {
        let notifier = DiscordNotifier::new(DiscordConfig::new(WEBHOOK)).unwrap();

        let debug_str = format!("{:?}", notifier);
        assert!(!debug_str.contains("secret-token"));
        assert!(!debug_str.contains("123456789"));
        assert!(debug_str.contains("DiscordNotifier"));
    }

    #[test]
    fn test_masked_url() {
        assert_eq!(
            mask_webhook_url(WEBHOOK),
            "https://discord.com/api/webhooks/123456789/****"
        );
        assert_eq!(mask_webhook_url("http://127.0.0.1:9/x/y"), "http://127.0.0.1/****");
        assert_eq!(mask_webhook_url("not a url"), "****");
    }

    #[test]
    fn test_retry_after_parsing() {
        let mut headers = reqwest::header::HeaderMap::new();
        assert_eq!(retry_after(&headers), DEFAULT_RATE_LIMIT_WAIT);

        headers.insert(reqwest::header::RETRY_AFTER, "2.5".parse().unwrap());
        assert_eq!(retry_after(&headers), Duration::from_millis(2500));

        headers.insert(reqwest::header::RETRY_AFTER, "soon".parse().unwrap());
        assert_eq!(retry_after(&headers), DEFAULT_RATE_LIMIT_WAIT);

        headers.insert(reqwest::header::RETRY_AFTER, "-3".parse().unwrap());
        assert_eq!(retry_after(&headers), DEFAULT_RATE_LIMIT_WAIT);
    }

    #[test]
    fn test_retry_after_is_capped() {
        let mut headers = reqwest::header::HeaderMap::new();

        headers.insert(reqwest::header::RETRY_AFTER, "3600".parse().unwrap());
        assert_eq!(retry_after(&headers), MAX_RATE_LIMIT_WAIT);

        headers.insert(reqwest::header::RETRY_AFTER, "1e20".parse().unwrap());
        assert_eq!(retry_after(&headers), MAX_RATE_LIMIT_WAIT);

        headers.insert(reqwest::header::RETRY_AFTER, "inf".parse().unwrap());
        assert_eq!(retry_after(&headers), MAX_RATE_LIMIT_WAIT);
    }

    #[tokio::test]
    async fn test_last_attempt_does_not_wait_for_rate_limit() {
        const RATE_LIMITED_LONG: &str = "HTTP/1.1 429 Too Many Requests\r\nRetry-After: 1e20\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";
        let (url, _bodies) = serve(vec![RATE_LIMITED_LONG]).await;
        let mut config = DiscordConfig::new(url);
        config.retry_attempts = 1;
        config.timeout_secs = 2;
        let notifier = DiscordNotifier::from_config(config).unwrap();

        let err = tokio::time::timeout(Duration::from_secs(10), notifier.send("hello"))
            .await
            .expect("send returns without sleeping")
            .unwrap_err();
        assert!(err.to_string().contains("All 1 delivery attempts failed"));
    }

    #[tokio::test]
    async fn test_send_posts_content_payload() {
        let (url, mut bodies) = serve(vec![NO_CONTENT]).await;
        let notifier = local_notifier(url);

        notifier.send("Minecraft Server IP: 1.2.3.4:25565").await.unwrap();

        let body: serde_json::Value = serde_json::from_str(&bodies.recv().await.unwrap()).unwrap();
        assert_eq!(body["content"], "Minecraft Server IP: 1.2.3.4:25565");
    }

    #[tokio::test]
    async fn test_rate_limit_then_success() {
        let (url, mut bodies) = serve(vec![RATE_LIMITED, NO_CONTENT]).await;
        let notifier = local_notifier(url);

        notifier.send("hello").await.unwrap();

        assert!(bodies.recv().await.is_some());
        assert!(bodies.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_client_error_fails_without_retry() {
        let (url, mut bodies) = serve(vec![BAD_REQUEST, NO_CONTENT]).await;
        let notifier = local_notifier(url);

        let err = notifier.send("hello").await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
        assert!(err.to_string().contains("400"));

        assert!(bodies.recv().await.is_some());
        assert!(bodies.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_persistent_rate_limit_exhausts_attempts() {
        let (url, _bodies) = serve(vec![RATE_LIMITED, RATE_LIMITED, RATE_LIMITED]).await;
        let notifier = local_notifier(url);

        let err = notifier.send("hello").await.unwrap_err();
        assert!(err.to_string().contains("All 3 delivery attempts failed"));
    }

    #[tokio::test]
    async fn test_unreachable_webhook_is_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let notifier = local_notifier(format!("http://{}/api/webhooks/1/token", addr));
        let err = notifier.test_connection().await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }
}

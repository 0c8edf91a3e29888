use std::time::Duration;

use url::Url;

use crate::TransportError;

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub url: Url,
    /// Fixed wait between a failed or dropped connection and the next attempt.
    pub reconnect_delay: Duration,
    /// Upper bound on a single connection handshake.
    pub connect_timeout: Duration,
    /// `None` retries forever.
    pub max_connect_attempts: Option<u32>,
}

impl TransportConfig {
    pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);
    pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(20);

    pub fn new(url: Url) -> Self {
        Self {
            url,
            reconnect_delay: Self::DEFAULT_RECONNECT_DELAY,
            connect_timeout: Self::DEFAULT_CONNECT_TIMEOUT,
            max_connect_attempts: None,
        }
    }

    pub fn parse(url: &str) -> Result<Self, TransportError> {
        let url = Url::parse(url).map_err(|err| TransportError::InvalidUrl(err.to_string()))?;
        match url.scheme() {
            "ws" | "wss" => Ok(Self::new(url)),
            other => Err(TransportError::InvalidUrl(format!(
                "unsupported scheme {other:?}"
            ))),
        }
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_max_connect_attempts(mut self, attempts: u32) -> Self {
        self.max_connect_attempts = Some(attempts.max(1));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_retry_forever() {
        let config = TransportConfig::parse("ws://127.0.0.1:8080/dashboard/api/websocket").unwrap();
        assert_eq!(config.reconnect_delay, Duration::from_secs(3));
        assert_eq!(config.connect_timeout, Duration::from_secs(20));
        assert_eq!(config.max_connect_attempts, None);
    }

    #[test]
    fn rejects_http_urls() {
        let err = TransportConfig::parse("http://localhost/ws").unwrap_err();
        assert!(matches!(err, TransportError::InvalidUrl(_)));
        assert!(TransportConfig::parse("not a url").is_err());
    }

    #[test]
    fn attempt_limit_is_at_least_one() {
        let config = TransportConfig::parse("wss://example.com/ws")
            .unwrap()
            .with_max_connect_attempts(0);
        assert_eq!(config.max_connect_attempts, Some(1));
    }
}

use std::time::Duration;

use crate::errors::ClientError;
use crate::playback::PlaybackConfig;

/// Default service origin used when no URL is configured.
pub const DEFAULT_BASE_URL: &str = "http://localhost:5001";

/// Path of the streaming generation endpoint.
pub const GENERATE_PATH: &str = "/api/generate_podcast";

/// Configuration for talking to the generation service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientConfig {
    /// Service origin. Relative artifact references resolve against it.
    pub base_url: String,
    /// Connect timeout for every request.
    pub connect_timeout: Duration,
    /// Overall request timeout. `None` leaves the stream open for as long as
    /// the service keeps it open.
    pub timeout: Option<Duration>,
    /// Buffer handoff timing.
    pub playback: PlaybackConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            connect_timeout: Duration::from_secs(10),
            timeout: None,
            playback: PlaybackConfig::default(),
        }
    }

    /// Builds a config from `PODCAST_API_URL`, `PODCAST_TIMEOUT_SECS`,
    /// `PODCAST_SETTLE_DELAY_MS` and `PODCAST_READY_TIMEOUT_MS`. Unset
    /// variables keep their defaults.
    pub fn from_env() -> Result<Self, ClientError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ClientError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let mut config = match get("PODCAST_API_URL") {
            Some(url) => Self::new(url.trim()),
            None => Self::default(),
        };
        if !config.base_url.starts_with("http://") && !config.base_url.starts_with("https://") {
            return Err(ClientError::Config(format!(
                "PODCAST_API_URL must be an http(s) URL, got `{}`",
                config.base_url
            )));
        }
        if let Some(secs) = get("PODCAST_TIMEOUT_SECS") {
            config.timeout = Some(Duration::from_secs(parse_number("PODCAST_TIMEOUT_SECS", &secs)?));
        }
        if let Some(ms) = get("PODCAST_SETTLE_DELAY_MS") {
            config.playback.settle_delay =
                Duration::from_millis(parse_number("PODCAST_SETTLE_DELAY_MS", &ms)?);
        }
        if let Some(ms) = get("PODCAST_READY_TIMEOUT_MS") {
            config.playback.ready_timeout =
                Duration::from_millis(parse_number("PODCAST_READY_TIMEOUT_MS", &ms)?);
        }
        Ok(config)
    }

    /// Overrides the service origin.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets an overall request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn playback(mut self, playback: PlaybackConfig) -> Self {
        self.playback = playback;
        self
    }

    pub fn generate_url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), GENERATE_PATH)
    }

    /// Resolves an artifact reference against the service origin. Absolute
    /// URLs are returned unchanged.
    pub fn resolve(&self, reference: &str) -> String {
        if reference.starts_with("http://") || reference.starts_with("https://") {
            return reference.to_string();
        }
        let base = self.base_url.trim_end_matches('/');
        if reference.starts_with('/') {
            format!("{base}{reference}")
        } else {
            format!("{base}/{reference}")
        }
    }
}

fn parse_number(key: &str, value: &str) -> Result<u64, ClientError> {
    value
        .trim()
        .parse()
        .map_err(|_| ClientError::Config(format!("{key} must be a non-negative integer, got `{value}`")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_point_at_local_service() {
        let config = ClientConfig::from_lookup(lookup(&[])).expect("config");
        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.generate_url(), "http://localhost:5001/api/generate_podcast");
        assert_eq!(config.playback.settle_delay, Duration::from_millis(500));
    }

    #[test]
    fn env_values_override_defaults() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("PODCAST_API_URL", "https://podcast.example.com/"),
            ("PODCAST_TIMEOUT_SECS", "900"),
            ("PODCAST_SETTLE_DELAY_MS", "0"),
            ("PODCAST_READY_TIMEOUT_MS", "2500"),
        ]))
        .expect("config");
        assert_eq!(config.generate_url(), "https://podcast.example.com/api/generate_podcast");
        assert_eq!(config.timeout, Some(Duration::from_secs(900)));
        assert_eq!(config.playback.settle_delay, Duration::ZERO);
        assert_eq!(config.playback.ready_timeout, Duration::from_millis(2500));
    }

    #[test]
    fn invalid_env_values_are_config_errors() {
        let err = ClientConfig::from_lookup(lookup(&[("PODCAST_TIMEOUT_SECS", "soon")]))
            .expect_err("bad timeout");
        assert!(matches!(err, ClientError::Config(msg) if msg.contains("PODCAST_TIMEOUT_SECS")));

        let err = ClientConfig::from_lookup(lookup(&[("PODCAST_API_URL", "localhost:5001")]))
            .expect_err("bad url");
        assert!(matches!(err, ClientError::Config(_)));
    }

    #[test]
    fn resolve_joins_relative_references_and_keeps_absolute_ones() {
        let config = ClientConfig::new("http://host:5001/");
        assert_eq!(config.resolve("/output/p1.mp3"), "http://host:5001/output/p1.mp3");
        assert_eq!(config.resolve("output/p1.mp3"), "http://host:5001/output/p1.mp3");
        assert_eq!(
            config.resolve("https://cdn.example.com/c.png"),
            "https://cdn.example.com/c.png"
        );
    }
}

//! Runtime configuration for the sync engine and the remote store client.
//!
//! Both structs load from environment variables through a lookup closure so
//! parsing can be exercised without touching the process environment.

use std::env;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::util::{is_http_url, normalize_text_option};

const ENV_MAX_ATTEMPTS: &str = "SELAH_SYNC_MAX_ATTEMPTS";
const ENV_BASE_DELAY_MS: &str = "SELAH_SYNC_BASE_DELAY_MS";
const ENV_MAX_DELAY_MS: &str = "SELAH_SYNC_MAX_DELAY_MS";
const ENV_MAX_IN_FLIGHT: &str = "SELAH_SYNC_MAX_IN_FLIGHT";
const ENV_BATCH_SIZE: &str = "SELAH_SYNC_BATCH_SIZE";
const ENV_TIMEOUT_MS: &str = "SELAH_SYNC_TIMEOUT_MS";
const ENV_PROBE_INTERVAL_MS: &str = "SELAH_SYNC_PROBE_INTERVAL_MS";

const ENV_API_URL: &str = "SELAH_API_URL";
const ENV_API_TOKEN: &str = "SELAH_API_TOKEN";

/// Retry, backoff and concurrency knobs for the sync engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    /// Dispatches before a retryable failure becomes permanent
    pub max_attempts: u32,
    /// First retry delay; doubled per further attempt
    pub base_delay: Duration,
    /// Upper bound for a single backoff delay
    pub max_delay: Duration,
    /// Operations for distinct entities dispatched at once
    pub max_in_flight: usize,
    /// Operations read from the queue per pass
    pub batch_size: usize,
    /// Per-request deadline; expiry counts as a retryable failure
    pub request_timeout: Duration,
    /// How often to probe the remote while offline with work queued
    pub probe_interval: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(300),
            max_in_flight: 4,
            batch_size: 32,
            request_timeout: Duration::from_secs(15),
            probe_interval: Duration::from_secs(30),
        }
    }
}

impl SyncSettings {
    /// Load settings from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load settings using a custom variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let read = |key: &str| normalize_text_option(lookup(key));

        let settings = Self {
            max_attempts: parse_number(read(ENV_MAX_ATTEMPTS), ENV_MAX_ATTEMPTS)?
                .unwrap_or(defaults.max_attempts),
            base_delay: parse_millis(read(ENV_BASE_DELAY_MS), ENV_BASE_DELAY_MS)?
                .unwrap_or(defaults.base_delay),
            max_delay: parse_millis(read(ENV_MAX_DELAY_MS), ENV_MAX_DELAY_MS)?
                .unwrap_or(defaults.max_delay),
            max_in_flight: parse_number(read(ENV_MAX_IN_FLIGHT), ENV_MAX_IN_FLIGHT)?
                .unwrap_or(defaults.max_in_flight),
            batch_size: parse_number(read(ENV_BATCH_SIZE), ENV_BATCH_SIZE)?
                .unwrap_or(defaults.batch_size),
            request_timeout: parse_millis(read(ENV_TIMEOUT_MS), ENV_TIMEOUT_MS)?
                .unwrap_or(defaults.request_timeout),
            probe_interval: parse_millis(read(ENV_PROBE_INTERVAL_MS), ENV_PROBE_INTERVAL_MS)?
                .unwrap_or(defaults.probe_interval),
        };
        settings.validate()?;
        Ok(settings)
    }

    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    #[must_use]
    pub const fn with_backoff(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self.max_delay = max_delay;
        self
    }

    #[must_use]
    pub const fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight;
        self
    }

    #[must_use]
    pub const fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    #[must_use]
    pub const fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    /// Reject settings that would stall or spin the engine
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::Config("max_attempts must be at least 1".into()));
        }
        if self.base_delay.is_zero() {
            return Err(Error::Config("base backoff delay must be positive".into()));
        }
        if self.max_delay < self.base_delay {
            return Err(Error::Config(
                "max backoff delay must not be shorter than the base delay".into(),
            ));
        }
        if self.max_in_flight == 0 || self.batch_size == 0 {
            return Err(Error::Config(
                "max_in_flight and batch_size must be at least 1".into(),
            ));
        }
        if self.request_timeout.is_zero() || self.probe_interval.is_zero() {
            return Err(Error::Config(
                "request timeout and probe interval must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Delay before the next dispatch after `attempts` failed dispatches.
    ///
    /// The first retry waits `base_delay`; each further attempt doubles it,
    /// capped at `max_delay`.
    pub fn backoff_delay(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1_u32 << exponent)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

/// Remote store endpoint configuration.
#[derive(Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    /// Base URL of the backend API, without a trailing slash
    pub api_base_url: String,
    /// Bearer token for the signed-in user
    pub auth_token: String,
}

impl std::fmt::Debug for RemoteConfig {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RemoteConfig")
            .field("api_base_url", &self.api_base_url)
            .field("auth_token", &"[REDACTED]")
            .finish()
    }
}

impl RemoteConfig {
    pub fn new(api_base_url: impl Into<String>, auth_token: impl Into<String>) -> Result<Self> {
        let api_base_url = normalize_text_option(Some(api_base_url.into()))
            .ok_or_else(|| Error::Config(format!("{ENV_API_URL} must not be empty")))?;
        if !is_http_url(&api_base_url) {
            return Err(Error::Config(format!(
                "{ENV_API_URL} must include http:// or https://"
            )));
        }
        let auth_token = normalize_text_option(Some(auth_token.into()))
            .ok_or_else(|| Error::Config(format!("{ENV_API_TOKEN} must not be empty")))?;

        Ok(Self {
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            auth_token,
        })
    }

    /// Load remote configuration from environment variables.
    ///
    /// Returns `Ok(None)` when no remote variables are set.
    /// Returns an error when only a partial configuration is provided.
    pub fn from_env() -> Result<Option<Self>> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Option<Self>>
    where
        F: Fn(&str) -> Option<String>,
    {
        let url = normalize_text_option(lookup(ENV_API_URL));
        let token = normalize_text_option(lookup(ENV_API_TOKEN));

        match (url, token) {
            (None, None) => Ok(None),
            (Some(url), Some(token)) => Self::new(url, token).map(Some),
            (Some(_), None) => Err(Error::Config(format!(
                "{ENV_API_URL} is set but {ENV_API_TOKEN} is missing"
            ))),
            (None, Some(_)) => Err(Error::Config(format!(
                "{ENV_API_TOKEN} is set but {ENV_API_URL} is missing"
            ))),
        }
    }
}

fn parse_number<T: std::str::FromStr>(raw: Option<String>, key: &str) -> Result<Option<T>> {
    raw.map(|value| {
        value
            .parse::<T>()
            .map_err(|_| Error::Config(format!("{key} must be a non-negative integer, got '{value}'")))
    })
    .transpose()
}

fn parse_millis(raw: Option<String>, key: &str) -> Result<Option<Duration>> {
    Ok(parse_number::<u64>(raw, key)?.map(Duration::from_millis))
}

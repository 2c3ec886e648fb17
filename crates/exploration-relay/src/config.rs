// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::error::{DispatchError, RelayError};
use std::env;
use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Duration;

pub const DEFAULT_MAX_BATCH_SIZE: usize = 10;
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_IDLE_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_ERROR_BACKOFF: Duration = Duration::from_secs(5);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

const EVENTS_PATH: &str = "/exploration/events";

/// Bearer token attached to every delivery. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Returns `None` for an empty token. Anything else is kept byte for byte.
    pub fn new(token: &str) -> Option<Self> {
        if token.is_empty() {
            None
        } else {
            Some(Self(token.to_string()))
        }
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential(<redacted>)")
    }
}

/// Settings for the whole exploration pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Whether the pipeline accepts and forwards events
    pub enabled: bool,
    /// Base URL of the exploration API, without trailing slashes
    pub endpoint: String,
    /// Optional bearer token
    pub credential: Option<Credential>,
    /// Maximum number of records per delivered batch
    pub max_batch_size: usize,
    /// How long a non-empty batch may wait before it is flushed
    pub flush_interval: Duration,
    /// Pause between dispatcher cycles
    pub idle_interval: Duration,
    /// Pause after a failed dispatcher cycle
    pub error_backoff: Duration,
    /// Timeout applied to each delivery request
    pub request_timeout: Duration,
    /// How long `stop` waits for the dispatcher to exit
    pub stop_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: String::new(),
            credential: None,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            idle_interval: DEFAULT_IDLE_INTERVAL,
            error_backoff: DEFAULT_ERROR_BACKOFF,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }
}

impl PipelineConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, RelayError> {
        let endpoint = env::var("EXPLORATION_API_ENDPOINT")
            .map(|val| normalize_endpoint(&val))
            .unwrap_or_default();
        let enabled = env::var("EXPLORATION_ENABLED")
            .map(|val| !matches!(val.trim().to_lowercase().as_str(), "false" | "0" | "no"))
            .unwrap_or(true);
        let credential = env::var("EXPLORATION_API_KEY")
            .ok()
            .and_then(|val| Credential::new(&val));
        let max_batch_size = env::var("EXPLORATION_BATCH_SIZE")
            .ok()
            .and_then(|val| val.trim().parse::<usize>().ok())
            .unwrap_or(DEFAULT_MAX_BATCH_SIZE);
        let flush_interval = env::var("EXPLORATION_FLUSH_INTERVAL_SECS")
            .ok()
            .and_then(|val| val.trim().parse::<u64>().ok())
            .map_or(DEFAULT_FLUSH_INTERVAL, Duration::from_secs);
        let request_timeout = env::var("EXPLORATION_REQUEST_TIMEOUT_SECS")
            .ok()
            .and_then(|val| val.trim().parse::<u64>().ok())
            .map_or(DEFAULT_REQUEST_TIMEOUT, Duration::from_secs);

        let config = Self {
            enabled,
            endpoint,
            credential,
            max_batch_size,
            flush_interval,
            request_timeout,
            ..Default::default()
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), RelayError> {
        if self.max_batch_size == 0 {
            return Err(RelayError::InvalidConfig(
                "batch size must be greater than 0".to_string(),
            ));
        }

        if self.flush_interval.is_zero() {
            return Err(RelayError::InvalidConfig(
                "flush interval must be greater than 0".to_string(),
            ));
        }

        if self.request_timeout.is_zero() {
            return Err(RelayError::InvalidConfig(
                "request timeout must be greater than 0".to_string(),
            ));
        }

        if !self.endpoint.is_empty() {
            validate_endpoint(&self.endpoint)?;
        }

        Ok(())
    }

    /// True when events should be accepted and forwarded.
    pub fn is_active(&self) -> bool {
        self.enabled && !self.endpoint.is_empty()
    }

    /// Full URL that batches are posted to.
    pub fn events_url(&self) -> String {
        format!("{}{EVENTS_PATH}", self.endpoint)
    }
}

/// Trims whitespace and every trailing slash from an endpoint.
pub fn normalize_endpoint(endpoint: &str) -> String {
    endpoint.trim().trim_end_matches('/').to_string()
}

fn validate_endpoint(endpoint: &str) -> Result<(), RelayError> {
    let url = reqwest::Url::parse(endpoint).map_err(|e| {
        RelayError::InvalidConfig(format!("endpoint '{endpoint}' is not a valid URL: {e}"))
    })?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(RelayError::InvalidConfig(format!(
            "endpoint scheme must be http or https, got '{other}'"
        ))),
    }
}

/// Settings shared between the relay and its dispatcher.
///
/// Readers always take a full copy under the read lock, so a concurrent
/// `configure` is observed either entirely or not at all.
#[derive(Debug, Clone, Default)]
pub struct SharedConfig(Arc<RwLock<PipelineConfig>>);

impl SharedConfig {
    pub fn new(config: PipelineConfig) -> Self {
        Self(Arc::new(RwLock::new(config)))
    }

    pub fn snapshot(&self) -> Result<PipelineConfig, DispatchError> {
        self.0
            .read()
            .map(|guard| guard.clone())
            .map_err(|_| DispatchError::SettingsPoisoned)
    }

    pub fn replace(&self, config: PipelineConfig) -> Result<(), RelayError> {
        let mut guard = self.0.write().map_err(|_| RelayError::SettingsPoisoned)?;
        *guard = config;
        Ok(())
    }

    /// A poisoned lock reads as inactive.
    pub fn is_active(&self) -> bool {
        self.0.read().map(|guard| guard.is_active()).unwrap_or(false)
    }

    #[cfg(test)]
    pub(crate) fn poison(&self) {
        let lock = Arc::clone(&self.0);
        let _ = std::thread::spawn(move || {
            let _guard = lock.write();
            panic!("poisoning settings lock");
        })
        .join();
    }
}

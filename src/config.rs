//! Bridge configuration types and defaults.
//!
//! This module defines the configuration options for the bridge runtime:
//! how the native loop thread is named, how teardown treats queued work,
//! and the default log filter.

use serde::{Deserialize, Serialize};

/// Default name of the native loop thread
pub const DEFAULT_NATIVE_THREAD_NAME: &str = "worldbridge-native";

/// Default interval at which teardown pumps the script queue (5 ms)
pub const DEFAULT_SHUTDOWN_POLL_MS: u64 = 5;

/// Default tracing filter
pub const DEFAULT_LOG_FILTER: &str = "worldbridge=info";

/// What happens to queued native work when the runtime is torn down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TeardownPolicy {
    /// Run every queued work item before joining the native thread
    Drain,
    /// Drop queued work items without running them
    Drop,
}

impl Default for TeardownPolicy {
    fn default() -> Self {
        TeardownPolicy::Drain
    }
}

/// Configuration for the bridge runtime
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeConfig {
    /// Name given to the native loop thread
    #[serde(default = "default_native_thread_name")]
    pub native_thread_name: String,

    /// How often teardown re-checks the native thread while pumping the
    /// script queue, in milliseconds
    #[serde(default = "default_shutdown_poll")]
    pub shutdown_poll_interval_ms: u64,

    /// Fate of queued native work at teardown (default: drain)
    #[serde(default)]
    pub teardown_policy: TeardownPolicy,

    /// Filter handed to `init_tracing` when `RUST_LOG` is unset
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            native_thread_name: DEFAULT_NATIVE_THREAD_NAME.to_string(),
            shutdown_poll_interval_ms: DEFAULT_SHUTDOWN_POLL_MS,
            teardown_policy: TeardownPolicy::Drain,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl BridgeConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration from JSON, filling in defaults
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: BridgeConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Set the native thread name
    pub fn with_native_thread_name(mut self, name: impl Into<String>) -> Self {
        self.native_thread_name = name.into();
        self
    }

    /// Set the teardown poll interval
    pub fn with_shutdown_poll_interval(mut self, millis: u64) -> Self {
        self.shutdown_poll_interval_ms = millis;
        self
    }

    /// Set the teardown policy
    pub fn with_teardown_policy(mut self, policy: TeardownPolicy) -> Self {
        self.teardown_policy = policy;
        self
    }

    /// Set the log filter
    pub fn with_log_filter(mut self, filter: impl Into<String>) -> Self {
        self.log_filter = filter.into();
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.native_thread_name.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "native_thread_name".into(),
                reason: "must not be empty".into(),
            });
        }

        if self.shutdown_poll_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "shutdown_poll_interval_ms".into(),
                reason: "must be greater than 0".into(),
            });
        }

        Ok(())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Invalid configuration value
    #[error("Invalid configuration value for {field}: {reason}")]
    InvalidValue {
        /// The field name
        field: String,
        /// The reason it's invalid
        reason: String,
    },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

// Default value functions for serde
fn default_native_thread_name() -> String {
    DEFAULT_NATIVE_THREAD_NAME.to_string()
}

fn default_shutdown_poll() -> u64 {
    DEFAULT_SHUTDOWN_POLL_MS
}

fn default_log_filter() -> String {
    DEFAULT_LOG_FILTER.to_string()
}

//! Configuration parsing and validation.
//!
//! Every field has a default, so an empty TOML document (or no file at all)
//! yields a working configuration.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// Upper bound accepted for `max_frame_bytes`: 64 MiB.
const FRAME_LIMIT_CEILING: usize = 64 * 1024 * 1024;

fn default_ipc_name() -> String {
    "flagpipe".into()
}

fn default_request_timeout_ms() -> u64 {
    5_000
}

fn default_max_frame_bytes() -> usize {
    1_048_576
}

fn default_outbound_queue_depth() -> usize {
    64
}

/// Configuration shared by the server and client binaries.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct GlobalConfig {
    /// Named pipe / Unix socket identifier.
    #[serde(default = "default_ipc_name")]
    pub ipc_name: String,
    /// How long a client waits for the response to a single request.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Largest frame payload accepted on the inbound side.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
    /// Capacity of each connection's outbound frame queue.
    #[serde(default = "default_outbound_queue_depth")]
    pub outbound_queue_depth: usize,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            ipc_name: default_ipc_name(),
            request_timeout_ms: default_request_timeout_ms(),
            max_frame_bytes: default_max_frame_bytes(),
            outbound_queue_depth: default_outbound_queue_depth(),
        }
    }
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Request timeout as a [`Duration`].
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` describing the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.ipc_name.trim().is_empty() {
            return Err(AppError::Config("ipc_name must not be empty".into()));
        }

        if self.request_timeout_ms == 0 {
            return Err(AppError::Config(
                "request_timeout_ms must be greater than zero".into(),
            ));
        }

        if self.max_frame_bytes == 0 || self.max_frame_bytes > FRAME_LIMIT_CEILING {
            return Err(AppError::Config(format!(
                "max_frame_bytes must be between 1 and {FRAME_LIMIT_CEILING}"
            )));
        }

        if self.outbound_queue_depth == 0 {
            return Err(AppError::Config(
                "outbound_queue_depth must be greater than zero".into(),
            ));
        }

        Ok(())
    }
}

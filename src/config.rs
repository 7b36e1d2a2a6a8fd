//! Layered settings: defaults, then an optional TOML file, then CLI flags.
//!
//! `RUST_LOG`, when set, wins over the resulting log filter; that last step
//! happens where tracing is initialised.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use notready_core::{Error, Result};
use notready_reconciler::controller::DEFAULT_MAX_CONCURRENT_RECONCILES;
use notready_reconciler::{
    ControllerConfig, DEFAULT_UNREACHABLE_TIMEOUT, ReconcilerConfig, RetryPolicy,
};

use crate::cli::GlobalArgs;
use crate::types::HumanDuration;

/// Effective process settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub unreachable_timeout: HumanDuration,
    pub max_concurrent_reconciles: usize,
    pub log_filter: String,
    pub retry: RetryPolicy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            unreachable_timeout: HumanDuration::from(DEFAULT_UNREACHABLE_TIMEOUT),
            max_concurrent_reconciles: DEFAULT_MAX_CONCURRENT_RECONCILES,
            log_filter: "info".to_string(),
            retry: RetryPolicy::default(),
        }
    }
}

impl Settings {
    /// Parse settings from TOML text. Missing keys keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns `Error::TomlParseFailed` on malformed TOML or unknown keys.
    pub fn from_toml(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Load settings from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns `Error::FileReadFailed` if the file cannot be read, or the
    /// parse error from [`Settings::from_toml`].
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::file_read_failed(path, e.to_string()))?;
        debug!(path = %path.display(), "Loaded settings file");
        Self::from_toml(&contents)
    }

    /// Apply CLI flags on top of these settings.
    #[must_use]
    pub fn with_overrides(mut self, args: &GlobalArgs) -> Self {
        if let Some(timeout) = args.unreachable_timeout {
            self.unreachable_timeout = timeout;
        }
        if let Some(max) = args.max_concurrent_reconciles {
            self.max_concurrent_reconciles = max;
        }
        if let Some(filter) = &args.log_filter {
            self.log_filter.clone_from(filter);
        }
        self
    }

    /// Resolve the full stack: defaults, the `--config` file if given, then flags.
    ///
    /// # Errors
    ///
    /// Returns any file, parse or validation error.
    pub fn resolve(args: &GlobalArgs) -> Result<Self> {
        let base = match &args.config {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        let settings = base.with_overrides(args);
        settings.validate()?;
        Ok(settings)
    }

    /// Check that the settings can drive a controller.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` for a zero timeout, zero concurrency or
    /// an inverted backoff range.
    pub fn validate(&self) -> Result<()> {
        if self.unreachable_timeout.is_zero() {
            return Err(Error::invalid_config("unreachable_timeout must be greater than zero"));
        }
        if self.max_concurrent_reconciles == 0 {
            return Err(Error::invalid_config("max_concurrent_reconciles must be at least 1"));
        }
        if self.retry.base_backoff_ms > self.retry.max_backoff_ms {
            return Err(Error::invalid_config(format!(
                "retry.base_backoff_ms ({}) exceeds retry.max_backoff_ms ({})",
                self.retry.base_backoff_ms, self.retry.max_backoff_ms
            )));
        }
        Ok(())
    }

    pub fn reconciler_config(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            unreachable_timeout: self.unreachable_timeout.inner(),
        }
    }

    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            max_concurrent_reconciles: self.max_concurrent_reconciles,
            retry: self.retry.clone(),
        }
    }
}

//! Aggregated, file-loadable configuration.
//!
//! Every section falls back to its defaults, so a config file only needs
//! the values it overrides:
//!
//! ```json
//! { "consensus": { "taken_cap": null, "sample_ceiling": 20 },
//!   "scan": { "target_found": 5 } }
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::check::{CheckRetry, LinkConfig};
use crate::consensus::{ConsensusConfig, Engine};
use crate::executor::{EndpointConfig, Executor, RetryConfig, UreqTransport};
use crate::pacing::{Interrupt, InterruptibleSleep};
use crate::scan::ScanSettings;

/// Errors loading a config file.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config {}: {source}", .path.display())]
    Read {
        /// Config path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The file is not valid configuration JSON.
    #[error("invalid config {}: {source}", .path.display())]
    Parse {
        /// Config path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },
}

/// Everything tunable about the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Remote endpoint and variation set.
    pub endpoint: EndpointConfig,
    /// Transport-level retries.
    pub retry: RetryConfig,
    /// Voting thresholds and sample pacing.
    pub consensus: ConsensusConfig,
    /// Scan limits and pacing.
    pub scan: ScanSettings,
    /// Reruns of single checks that end uncertain.
    pub check: CheckRetry,
    /// Follow-up link templates.
    pub links: LinkConfig,
}

/// The production engine: `ureq` transport, real-time interruptible sleeps.
pub type LiveEngine = Engine<Executor<UreqTransport, InterruptibleSleep>, InterruptibleSleep>;

impl Config {
    /// Load a JSON config file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;
        Self::from_json(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_owned(),
            source,
        })
    }

    /// Parse configuration from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns the parse error if `raw` is not valid configuration.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Build the live engine, wired to `interrupt` at every layer.
    #[must_use]
    pub fn engine(&self, interrupt: &Interrupt) -> LiveEngine {
        let sleep = InterruptibleSleep::new(interrupt.clone());
        let executor = Executor::new(
            UreqTransport,
            sleep.clone(),
            self.endpoint.clone(),
            self.retry.clone(),
        )
        .with_interrupt(interrupt.clone());
        Engine::new(
            executor,
            sleep,
            self.consensus.clone(),
            self.endpoint.variations.clone(),
        )
        .with_interrupt(interrupt.clone())
    }
}

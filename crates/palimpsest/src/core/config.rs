//! Orchestrator configuration.
//!
//! All knobs have production defaults; hosts typically load overrides from a
//! TOML file via [`OrchestratorConfig::from_file`]. Timeout-valued fields are
//! stored as milliseconds (TOML-friendly) with `Duration` accessors.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::engine::profile::{ScriptClass, script_class};
use crate::error::{PalimpsestError, Result};
use crate::text::CleaningPolicy;
use crate::validation::DEFAULT_MAX_PAYLOAD_BYTES;

/// Configuration for the recognition orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Maximum pipeline attempts per task (first try included).
    pub max_attempts: u32,
    /// Hard ceiling on a single image payload.
    pub max_payload_bytes: usize,
    /// How long callers wait for an in-flight engine construction.
    pub construction_timeout_ms: u64,
    /// Engine idle time after which the reaper tears it down.
    pub idle_timeout_ms: u64,
    /// How often the idle reaper checks.
    pub reaper_interval_ms: u64,
    /// Recognition deadline for dense-script languages.
    pub dense_timeout_ms: u64,
    /// Recognition deadline for space-delimited languages.
    pub spaced_timeout_ms: u64,
    /// Override for the batch wave width; computed from CPU count when unset.
    pub max_concurrency: Option<usize>,
    /// Scratch directory override; per-process temp dir when unset.
    pub scratch_dir: Option<PathBuf>,
    /// Language applied to tasks that do not carry one.
    pub default_language: String,
    /// Passed through to the engine factory.
    pub use_gpu: bool,
    /// Model directory passed through to the engine factory.
    pub model_dir: Option<PathBuf>,
    /// Per-language cleaning policy overrides, keyed by full selector or by
    /// a single component tag. Unlisted languages fall back to their script
    /// class default (dense -> minimal, space-delimited -> aggressive).
    pub cleaning_overrides: HashMap<String, CleaningPolicy>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            construction_timeout_ms: 30_000,
            idle_timeout_ms: 600_000,
            reaper_interval_ms: 60_000,
            dense_timeout_ms: 90_000,
            spaced_timeout_ms: 45_000,
            max_concurrency: None,
            scratch_dir: None,
            default_language: "ch_sim+en".to_string(),
            use_gpu: true,
            model_dir: None,
            cleaning_overrides: HashMap::new(),
        }
    }
}

impl OrchestratorConfig {
    /// Load configuration from a TOML file and validate it.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: Self = toml::from_str(&text).map_err(|err| {
            PalimpsestError::InvalidConfiguration(format!(
                "failed to parse '{}': {err}",
                path.as_ref().display()
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check invariants that serde defaults alone cannot guarantee.
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(PalimpsestError::InvalidConfiguration(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.max_payload_bytes == 0 {
            return Err(PalimpsestError::InvalidConfiguration(
                "max_payload_bytes must be nonzero".to_string(),
            ));
        }
        for (name, value) in [
            ("construction_timeout_ms", self.construction_timeout_ms),
            ("idle_timeout_ms", self.idle_timeout_ms),
            ("reaper_interval_ms", self.reaper_interval_ms),
            ("dense_timeout_ms", self.dense_timeout_ms),
            ("spaced_timeout_ms", self.spaced_timeout_ms),
        ] {
            if value == 0 {
                return Err(PalimpsestError::InvalidConfiguration(format!(
                    "{name} must be nonzero"
                )));
            }
        }
        if self.default_language.trim().is_empty() {
            return Err(PalimpsestError::InvalidConfiguration(
                "default_language must not be empty".to_string(),
            ));
        }
        if matches!(self.max_concurrency, Some(0)) {
            return Err(PalimpsestError::InvalidConfiguration(
                "max_concurrency must be nonzero when set".to_string(),
            ));
        }
        Ok(())
    }

    pub fn construction_timeout(&self) -> Duration {
        Duration::from_millis(self.construction_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_millis(self.reaper_interval_ms)
    }

    /// Hard recognition deadline for a script class.
    pub fn recognition_timeout(&self, script: ScriptClass) -> Duration {
        match script {
            ScriptClass::Dense => Duration::from_millis(self.dense_timeout_ms),
            ScriptClass::SpaceDelimited => Duration::from_millis(self.spaced_timeout_ms),
        }
    }

    /// Resolve the cleaning policy for a language selector.
    ///
    /// Precedence: exact selector override, then any component-tag override,
    /// then the script-class default.
    pub fn cleaning_policy(&self, language: &str) -> CleaningPolicy {
        if let Some(policy) = self.cleaning_overrides.get(language) {
            return *policy;
        }
        for tag in language.split('+') {
            if let Some(policy) = self.cleaning_overrides.get(tag.trim()) {
                return *policy;
            }
        }
        match script_class(language) {
            ScriptClass::Dense => CleaningPolicy::Minimal,
            ScriptClass::SpaceDelimited => CleaningPolicy::Aggressive,
        }
    }
}

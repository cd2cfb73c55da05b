//! Campaign configuration, read once at guidance construction.

use std::{env, time::Duration};

use serde::{Deserialize, Serialize};

use crate::Error;

/// Default cap on the number of bytes a single input may grow to.
pub const DEFAULT_MAX_INPUT_SIZE: usize = 10240;

/// All recognized options of a fuzzing campaign.
///
/// Flags default to off, mirroring a plain coverage-guided campaign over
/// linear inputs; execution indexing, subtree splicing and responsibility
/// stealing are opt-in heuristics.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GuidanceConfig {
    /// Use execution-index-keyed inputs instead of flat byte sequences
    pub enable_execution_indexing: bool,
    /// Skip the disk write for inputs that violated an assumption
    pub save_only_valid: bool,
    /// Byte cap per input
    pub max_input_size: usize,
    /// On input exhaustion, return EOF instead of drawing a random byte
    pub generate_eof_when_out: bool,
    /// Splice whole execution subtrees (requires execution indexing)
    pub splice_subtree: bool,
    /// Let stronger inputs steal responsibility from weaker saved inputs
    pub steal_responsibility: bool,
    /// Blind mode: never schedule saved inputs, always generate fresh
    pub totally_random: bool,
    /// Per-run timeout; `None` disables the check
    pub timeout: Option<Duration>,
    /// Campaign wall-clock budget; `None` runs until stopped
    pub max_duration: Option<Duration>,
    /// Fixed PRNG seed for reproducible campaigns; `None` seeds from the OS
    pub rng_seed: Option<u64>,
}

impl Default for GuidanceConfig {
    fn default() -> Self {
        Self {
            enable_execution_indexing: false,
            save_only_valid: false,
            max_input_size: DEFAULT_MAX_INPUT_SIZE,
            generate_eof_when_out: false,
            splice_subtree: false,
            steal_responsibility: false,
            totally_random: false,
            timeout: None,
            max_duration: None,
            rng_seed: None,
        }
    }
}

fn env_flag(name: &str) -> bool {
    matches!(
        env::var(name).as_deref(),
        Ok("1") | Ok("true") | Ok("TRUE") | Ok("yes")
    )
}

fn env_millis(name: &str) -> Result<Option<Duration>, Error> {
    match env::var(name) {
        Ok(raw) if !raw.is_empty() => {
            let millis: u64 = raw
                .parse()
                .map_err(|_| Error::illegal_argument(format!("invalid duration for {name}: {raw}")))?;
            Ok((millis > 0).then(|| Duration::from_millis(millis)))
        }
        _ => Ok(None),
    }
}

impl GuidanceConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads the configuration from `SEEDLING_*` environment variables.
    ///
    /// Boolean options accept `1`/`true`/`yes`; durations are given in
    /// milliseconds, with `0` meaning disabled.
    ///
    /// # Errors
    ///
    /// If a numeric option does not parse.
    pub fn from_env() -> Result<Self, Error> {
        let mut config = Self::default();
        config.enable_execution_indexing = env_flag("SEEDLING_ENABLE_EXECUTION_INDEXING");
        config.save_only_valid = env_flag("SEEDLING_SAVE_ONLY_VALID");
        config.generate_eof_when_out = env_flag("SEEDLING_GENERATE_EOF_WHEN_OUT");
        config.splice_subtree = env_flag("SEEDLING_SPLICE_SUBTREE");
        config.steal_responsibility = env_flag("SEEDLING_STEAL_RESPONSIBILITY");
        config.totally_random = env_flag("SEEDLING_TOTALLY_RANDOM");
        if let Ok(raw) = env::var("SEEDLING_MAX_INPUT_SIZE") {
            config.max_input_size = raw.parse().map_err(|_| {
                Error::illegal_argument(format!("invalid SEEDLING_MAX_INPUT_SIZE: {raw}"))
            })?;
        }
        config.timeout = env_millis("SEEDLING_TIMEOUT")?;
        config.max_duration = env_millis("SEEDLING_MAX_DURATION")?;
        if let Ok(raw) = env::var("SEEDLING_RNG_SEED") {
            config.rng_seed = Some(raw.parse().map_err(|_| {
                Error::illegal_argument(format!("invalid SEEDLING_RNG_SEED: {raw}"))
            })?);
        }
        Ok(config)
    }

    /// Enables execution-index-keyed inputs.
    #[must_use]
    pub fn with_execution_indexing(mut self) -> Self {
        self.enable_execution_indexing = true;
        self
    }

    /// Sets the per-run timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the campaign wall-clock budget.
    #[must_use]
    pub fn with_max_duration(mut self, duration: Duration) -> Self {
        self.max_duration = Some(duration);
        self
    }

    /// Sets the per-input byte cap.
    #[must_use]
    pub fn with_max_input_size(mut self, max_input_size: usize) -> Self {
        self.max_input_size = max_input_size;
        self
    }

    /// Fixes the PRNG seed for reproducible runs.
    #[must_use]
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }
}

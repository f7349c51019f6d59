use std::num::ParseIntError;

use thiserror::Error;

/// Number of innermost frames that must be processed before a campaign is observable as started:
/// the frame that is executing and the caller it will return into.
pub const SAFETY_BUFFER_FRAMES: usize = 2;

pub const ENV_INITIAL_FRAMES: &str = "STACKMARK_INITIAL_FRAMES";

pub const ENV_FRAMES_PER_YIELD: &str = "STACKMARK_FRAMES_PER_YIELD";

// === Errors === //

#[derive(Debug, Error, Clone, Eq, PartialEq)]
#[non_exhaustive]
pub enum ConfigError {
    #[error(
        "initial_frames must be at least {min} to cover the safety buffer (got {0})",
        min = SAFETY_BUFFER_FRAMES
    )]
    InitialFramesTooSmall(usize),

    #[error("frames_per_yield must be non-zero")]
    ZeroYieldInterval,

    #[error("invalid value {value:?} for {var}: {source}")]
    InvalidVar {
        var: &'static str,
        value: String,
        #[source]
        source: ParseIntError,
    },
}

// === WatermarkConfig === //

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct WatermarkConfig {
    /// Single steps taken eagerly when a campaign starts. Covers the safety buffer plus one more
    /// frame for a thread that unwinds into the runtime and polls again on the way out.
    pub initial_frames: usize,

    /// Barrier frames processed by a drain between two yields of the watermark lock.
    pub frames_per_yield: usize,
}

impl Default for WatermarkConfig {
    fn default() -> Self {
        Self {
            initial_frames: SAFETY_BUFFER_FRAMES + 1,
            frames_per_yield: 5,
        }
    }
}

impl WatermarkConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_frames < SAFETY_BUFFER_FRAMES {
            return Err(ConfigError::InitialFramesTooSmall(self.initial_frames));
        }

        if self.frames_per_yield == 0 {
            return Err(ConfigError::ZeroYieldInterval);
        }

        Ok(())
    }

    /// Reads overrides from `STACKMARK_INITIAL_FRAMES` and `STACKMARK_FRAMES_PER_YIELD`, keeping
    /// the defaults for unset variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&'static str) -> Option<String>) -> Result<Self, ConfigError> {
        let parse = |var: &'static str, default: usize| match lookup(var) {
            Some(value) => value
                .trim()
                .parse::<usize>()
                .map_err(|source| ConfigError::InvalidVar { var, value, source }),
            None => Ok(default),
        };

        let defaults = Self::default();
        let config = Self {
            initial_frames: parse(ENV_INITIAL_FRAMES, defaults.initial_frames)?,
            frames_per_yield: parse(ENV_FRAMES_PER_YIELD, defaults.frames_per_yield)?,
        };
        config.validate()?;

        Ok(config)
    }
}

// === Tests === //

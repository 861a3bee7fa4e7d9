use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::cli::Args;
use crate::state::MAX_HOPS;

/// Upper bound on concurrent target tasks
pub const MAX_WORKERS: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("max hops must be between 1 and {MAX_HOPS}, got {0}")]
    MaxHops(u8),
    #[error("timeout must be positive")]
    Timeout,
    #[error("workers must be between 1 and {MAX_WORKERS}, got {0}")]
    Workers(usize),
    #[error("deadline must be positive")]
    Deadline,
}

/// Runtime configuration derived from CLI args
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Highest hop limit probed per target
    pub max_hops: u8,
    /// How long to wait for each probe's answer
    #[serde(with = "duration_serde")]
    pub timeout: Duration,
    /// Targets probed concurrently
    pub workers: usize,
    /// Stop all outstanding probing after this long
    #[serde(default, with = "option_duration_serde")]
    pub deadline: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_hops: MAX_HOPS,
            timeout: Duration::from_secs(1),
            workers: 16,
            deadline: None,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_hops == 0 || self.max_hops > MAX_HOPS {
            return Err(ConfigError::MaxHops(self.max_hops));
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::Timeout);
        }
        if self.workers == 0 || self.workers > MAX_WORKERS {
            return Err(ConfigError::Workers(self.workers));
        }
        if self.deadline.is_some_and(|d| d.is_zero()) {
            return Err(ConfigError::Deadline);
        }
        Ok(())
    }
}

impl From<&Args> for Config {
    fn from(args: &Args) -> Self {
        Self {
            max_hops: args.max_hops,
            timeout: args.timeout_duration(),
            workers: args.workers,
            deadline: args.deadline_duration(),
        }
    }
}

/// Serde helper for Duration
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

mod option_duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.map(|d| d.as_secs_f64()).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<f64>::deserialize(deserializer)?
            .map(|secs| Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom))
            .transpose()
    }
}

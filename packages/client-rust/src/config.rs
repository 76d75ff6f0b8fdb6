use kvdriver_core::{ConfigError, FrameConfig, StreamConfig};
use serde::{Deserialize, Serialize};

/// Default cap on simultaneously in-flight operations per batch.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 10;

/// Bounded fan-out settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FanOutConfig {
    /// Maximum number of a batch's operations submitted but not yet completed.
    pub max_in_flight: usize,
}

impl Default for FanOutConfig {
    fn default() -> Self {
        Self {
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }
}

impl FanOutConfig {
    /// # Errors
    ///
    /// Returns `ConfigError::Zero` if `max_in_flight` is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_in_flight == 0 {
            return Err(ConfigError::Zero {
                field: "fan_out.max_in_flight",
            });
        }
        Ok(())
    }
}

/// Driver-level configuration, grouping every tunable the client exposes.
///
/// Embedding applications typically deserialize this from their own config
/// file; every section falls back to its defaults when omitted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DriverConfig {
    pub fan_out: FanOutConfig,
    pub stream: StreamConfig,
    pub frame: FrameConfig,
}

impl DriverConfig {
    /// # Errors
    ///
    /// Returns the first invalid setting found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.fan_out.validate()?;
        self.stream.validate()?;
        self.frame.validate()
    }
}

//! Configuration for streaming operations and message framing.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Controls how partial results of a streaming operation are queued and polled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StreamConfig {
    /// How long `has_next()` waits for the next item before reporting a
    /// poll timeout. Also bounds how long a producer waits on a full queue.
    #[serde(rename = "pollTimeoutMs", with = "duration_ms")]
    pub poll_timeout: Duration,
    /// Maximum number of converted items buffered ahead of the consumer.
    pub queue_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_secs(30),
            queue_capacity: 1024,
        }
    }
}

impl StreamConfig {
    /// # Errors
    ///
    /// Returns `ConfigError::Zero` if the poll timeout or queue capacity is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_timeout.is_zero() {
            return Err(ConfigError::Zero {
                field: "stream.poll_timeout",
            });
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::Zero {
                field: "stream.queue_capacity",
            });
        }
        Ok(())
    }
}

/// Limits applied by [`FrameCodec`](crate::FrameCodec).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FrameConfig {
    /// Largest accepted frame body (code byte plus payload) in bytes.
    pub max_frame_len: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_frame_len: 64 * 1024 * 1024, // 64 MiB
        }
    }
}

impl FrameConfig {
    /// # Errors
    ///
    /// Returns `ConfigError::Zero` if the frame limit is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_frame_len == 0 {
            return Err(ConfigError::Zero {
                field: "frame.max_frame_len",
            });
        }
        Ok(())
    }
}

/// Serde adapter storing a `Duration` as whole milliseconds.
pub mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    /// # Errors
    ///
    /// Propagates the serializer's error.
    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let millis = u64::try_from(value.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(millis)
    }

    /// # Errors
    ///
    /// Fails if the input is not an unsigned integer.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

//! Identity types addressing objects in the store.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Bucket type used when none is given.
pub const DEFAULT_BUCKET_TYPE: &str = "default";

/// A bucket within a bucket type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Namespace {
    pub bucket_type: String,
    pub bucket: String,
}

impl Namespace {
    /// Namespace in the default bucket type.
    #[must_use]
    pub fn new(bucket: impl Into<String>) -> Self {
        Self::with_type(DEFAULT_BUCKET_TYPE, bucket)
    }

    #[must_use]
    pub fn with_type(bucket_type: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            bucket_type: bucket_type.into(),
            bucket: bucket.into(),
        }
    }

    #[must_use]
    pub fn has_default_type(&self) -> bool {
        self.bucket_type == DEFAULT_BUCKET_TYPE
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket_type, self.bucket)
    }
}

/// A single key within a namespace.
///
/// Serves as the query info of single-key operations, so callers can
/// correlate completion-ordered batch results with the keys they asked for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub namespace: Namespace,
    pub key: String,
}

impl Location {
    #[must_use]
    pub fn new(namespace: Namespace, key: impl Into<String>) -> Self {
        Self {
            namespace,
            key: key.into(),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.key)
    }
}

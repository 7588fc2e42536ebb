//! Error types for the fabric state facade.

use thiserror::Error;

/// Errors in a [`FabricStateConfig`](crate::FabricStateConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration is not valid JSON for this schema.
    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// A field is out of range.
    #[error("invalid {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

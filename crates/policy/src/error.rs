//! Error taxonomy for the policy engine.

use std::path::PathBuf;

use serde_json::Value;
use thiserror::Error;

/// Errors produced while loading, parsing, or enforcing a policy.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// Reading the policy file failed (missing, permissions, etc).
    #[error("failed to read policy file {path}: {source}")]
    Io {
        /// Path that could not be read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The policy file's contents were not valid JSON.
    #[error("malformed policy JSON in {path}: {source}")]
    Json {
        /// Path of the offending policy file.
        path: PathBuf,
        /// Underlying decode error.
        #[source]
        source: serde_json::Error,
    },

    /// A rule string could not be parsed (only raised when the parser or
    /// enforcer is configured with `raise_error = true`; otherwise the
    /// offending rule compiles to the `False` check).
    #[error("invalid rule: {0:?}")]
    InvalidRule(String),

    /// `enforce` was called with `raise_error = true` and the policy denied
    /// the request.
    #[error("{rule} on {target} by {cred} disallowed by policy")]
    NotAuthorized {
        /// Name of the rule that was enforced.
        rule: String,
        /// Target the rule was evaluated against.
        target: Value,
        /// Credential the rule was evaluated against.
        cred: Value,
    },
}

impl PolicyError {
    /// Construct the default [`PolicyError::NotAuthorized`] for a denied
    /// `(rule, target, cred)` triple.
    pub fn not_authorized(rule: &str, target: &Value, cred: &Value) -> Self {
        PolicyError::NotAuthorized {
            rule: rule.to_string(),
            target: target.clone(),
            cred: cred.clone(),
        }
    }
}

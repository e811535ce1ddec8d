//! Error types shared across the crate

use thiserror::Error;

/// A builder stopped making progress on its input.
///
/// Only raised in strict mode. Lenient builders log the stall, skip one character and
/// carry on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{dialect} builder made no progress at offset {offset} (near {context:?})")]
pub struct MalformedInputError {
    pub dialect: &'static str,
    pub offset: usize,
    pub context: String,
}

/// Failures reported by an analysis engine for a single fragment.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine is not ready")]
    NotReady,
    #[error("could not reach analysis server: {0}")]
    Http(#[from] reqwest::Error),
    #[error("analysis server answered with status {0}")]
    Status(u16),
    #[error("could not decode analysis server response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid server URI {uri:?}: {reason}")]
    InvalidUri { uri: String, reason: String },
    #[error("could not load spelling dictionary for {language}: {reason}")]
    Dictionary { language: String, reason: String },
}

/// A check was superseded before it finished.
///
/// This is a control signal, not a failure: callers drop the attempt silently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("check was cancelled")]
pub struct Cancelled;

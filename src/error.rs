// src/error.rs

//! Unified error handling for the screenshot cache.

use std::fmt;

use thiserror::Error;

/// Result type alias for fallible crate operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// CSS selector parsing failed
    #[error("Invalid selector '{selector}': {message}")]
    Selector { selector: String, message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Disk cache operation failed
    #[error("Storage error for {context}: {message}")]
    Storage { context: String, message: String },
}

impl AppError {
    /// Create a selector parsing error.
    pub fn selector(selector: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Selector {
            selector: selector.into(),
            message: message.to_string(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a storage error with context.
    pub fn storage(context: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Storage {
            context: context.into(),
            message: message.to_string(),
        }
    }
}

/// Why a single acquisition attempt (or a run of attempts) produced nothing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AcquireError {
    /// Network error, bad status, extraction miss, or a rejected image.
    #[error("transient failure: {0}")]
    Transient(String),

    /// The upstream signalled that it is blocking us. The breaker has been tripped.
    #[error("upstream ban signal: {0}")]
    Banned(String),

    /// Every attempt of a `fetch_one_valid` run failed.
    #[error("no valid screenshot after {attempts} attempts")]
    Exhausted { attempts: usize },
}

impl AcquireError {
    pub fn transient(reason: impl Into<String>) -> Self {
        Self::Transient(reason.into())
    }

    pub fn banned(reason: impl Into<String>) -> Self {
        Self::Banned(reason.into())
    }

    /// Whether this failure tripped the availability breaker.
    pub fn is_ban_signal(&self) -> bool {
        matches!(self, Self::Banned(_))
    }
}

/// The only failure the serving path reports to a client.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServeError {
    #[error("{}", unavailable_message(*banned))]
    Unavailable { banned: bool },
}

fn unavailable_message(banned: bool) -> &'static str {
    if banned {
        "prnt.sc temporarily blocked our requests."
    } else {
        "Failed to find a valid screenshot. prnt.sc might be unavailable."
    }
}

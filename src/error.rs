//! Error handling module for target resolution and registry transport

use std::path::PathBuf;

use reqwest::StatusCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TargetError {
    /// Malformed user literal (resolve entry, header, platform string)
    #[error("failed to parse {input:?}: expecting {expected}")]
    Format { input: String, expected: String },

    /// Well-formed but semantically invalid input
    #[error("{0}")]
    Validation(String),

    /// Unknown or unusable configuration value
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Credential store could not be opened, read or written
    #[error("credential store {}: {message}", path.display())]
    CredentialStore { path: PathBuf, message: String },

    /// Network or TLS failure from the underlying HTTP client
    #[error(transparent)]
    Transport(#[from] reqwest::Error),

    /// A forced referrers capability the registry cannot honor
    #[error("unsupported capability: {0}")]
    CapabilityUnsupported(String),

    #[error("invalid reference {reference:?}: {reason}")]
    InvalidReference { reference: String, reason: String },

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("registry responded {status}: {message}")]
    Registry { status: StatusCode, message: String },

    #[error("layout {}: {message}", path.display())]
    Layout { path: PathBuf, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TargetError {
    pub fn format(input: impl Into<String>, expected: impl Into<String>) -> Self {
        TargetError::Format {
            input: input.into(),
            expected: expected.into(),
        }
    }

    pub fn invalid_reference(reference: impl Into<String>, reason: impl Into<String>) -> Self {
        TargetError::InvalidReference {
            reference: reference.into(),
            reason: reason.into(),
        }
    }

    pub fn credential_store(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        TargetError::CredentialStore {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn layout(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        TargetError::Layout {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Connection never produced a response (refused, unreachable, timed out)
    pub fn is_no_response(&self) -> bool {
        match self {
            TargetError::Transport(err) => err.is_connect() || err.is_timeout(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, TargetError>;

//! Error types for rolekey.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for rolekey.
#[derive(Debug, Error)]
pub enum Error {
    // ── Configuration ────────────────────────────────────────────────────────
    /// Settings file is incomplete or contradictory.
    #[error("Configuration error: {0}")]
    Config(String),

    // ── Authorization ────────────────────────────────────────────────────────
    /// No OAuth client registration yet.
    #[error("No client registration - register a client first")]
    NotRegistered,

    /// An operation that needs a bearer token was called before sign-in.
    #[error("Not authorized - complete SSO sign-in first")]
    NotAuthorized,

    /// The provider rejected the refresh token; a full re-authorization is
    /// required.
    #[error("Refresh token is invalid")]
    RefreshTokenInvalid,

    /// The callback listener hit its deadline or was cancelled before a
    /// qualifying request arrived.
    #[error("Waiting for the sign-in callback timed out or was cancelled")]
    CallbackTimeout,

    /// The user declined (or the platform could not obtain) consent for a
    /// role-credential release.
    #[error("Failed to get user consent: {0}")]
    ConsentDenied(String),

    // ── Provider ─────────────────────────────────────────────────────────────
    /// The identity provider returned an error response.
    #[error("{operation} failed ({status}): {message}")]
    Provider {
        /// Name of the API operation that failed.
        operation: &'static str,
        /// HTTP status code.
        status: u16,
        /// Error body from the provider.
        message: String,
    },

    // ── Storage ──────────────────────────────────────────────────────────────
    /// Secure store I/O error.
    #[error("Storage I/O error at {path}: {message}")]
    StorageIo {
        /// Path that caused the error.
        path: PathBuf,
        /// Error description.
        message: String,
    },

    /// A cached record could not be (de)serialized.
    #[error("Storage serialization error: {0}")]
    StorageSerialization(String),

    /// Keyring backend error.
    #[error("Keyring error: {0}")]
    Keyring(String),

    /// Generic storage error.
    #[error("Storage error: {0}")]
    Storage(String),

    // ── Infrastructure ───────────────────────────────────────────────────────
    /// Network/HTTP error.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// General I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns true for storage errors, which the broker treats as
    /// warn-and-continue wherever the cached value is optional.
    #[must_use]
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            Error::StorageIo { .. }
                | Error::StorageSerialization(_)
                | Error::Keyring(_)
                | Error::Storage(_)
        )
    }

    /// Creates a storage I/O error.
    #[must_use]
    pub fn storage_io(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::StorageIo {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a provider error with operation context.
    #[must_use]
    pub fn provider(operation: &'static str, status: u16, message: impl Into<String>) -> Self {
        Self::Provider {
            operation,
            status,
            message: message.into(),
        }
    }
}

/// Convenience type alias.
pub type Result<T> = std::result::Result<T, Error>;

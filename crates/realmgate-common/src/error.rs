//! Error types for Realmgate
//!
//! Provides a unified error type hierarchy for the security core.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using Realmgate's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Realmgate
#[derive(Error, Debug)]
pub enum Error {
    // Authentication/Authorization Errors
    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),

    // Record store Errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // Hot reload Errors
    #[error("Reload error: {0}")]
    Reload(#[from] ReloadError),

    // Malformed names, credentials or settings, rejected before any I/O
    #[error("Validation error: {0}")]
    Validation(String),

    // Configuration Errors
    #[error("Configuration error: {0}")]
    Config(String),

    // IO Errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization Errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // Internal Errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Authentication/Authorization errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Invalid auth token: {0}")]
    AuthTokenInvalid(String),

    #[error("All authentication realms are unavailable: {0}")]
    AllRealmsUnavailable(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Role not found: {0}")]
    RoleNotFound(String),
}

/// Record store errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("The specified name '{0}' already exists")]
    NameAlreadyExists(String),

    #[error("Expected record name '{expected}' but replacement is named '{actual}'")]
    NameMismatch { expected: String, actual: String },

    #[error("Concurrent modification of record '{0}'")]
    ConcurrentModification(String),

    #[error("Corrupt record at {path}:{line}: {reason}")]
    CorruptRecordLine {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("Record not found: {0}")]
    NotFound(String),
}

/// Hot reload errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReloadError {
    #[error("Unable to reload auth files after {attempts} consecutive attempts: {cause}")]
    ReloadExhausted { attempts: u32, cause: ReloadFailure },
}

/// The reason a single reload attempt was rejected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReloadFailure {
    /// The file could not be read at all
    Unreadable { path: PathBuf, reason: String },
    /// The file was read but contains a malformed line
    CorruptFile {
        path: PathBuf,
        line: usize,
        reason: String,
    },
    /// A role lists a member that is not a known user
    DanglingRoleMember { role: String, user: String },
}

impl ReloadFailure {
    /// The file this failure points at, if any
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            Self::Unreadable { path, .. } | Self::CorruptFile { path, .. } => Some(path),
            Self::DanglingRoleMember { .. } => None,
        }
    }
}

impl fmt::Display for ReloadFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unreadable { path, reason } => {
                write!(f, "could not read file {}: {}", path.display(), reason)
            }
            Self::CorruptFile { path, line, reason } => {
                write!(f, "invalid file {} (line {}): {}", path.display(), line, reason)
            }
            Self::DanglingRoleMember { role, user } => {
                write!(f, "role '{}' references unknown user '{}'", role, user)
            }
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reload_failure_messages_name_their_cause() {
        let unreadable = ReloadFailure::Unreadable {
            path: PathBuf::from("/data/auth/roles"),
            reason: "permission denied".to_string(),
        };
        assert!(unreadable.to_string().starts_with("could not read file /data/auth/roles"));

        let dangling = ReloadFailure::DanglingRoleMember {
            role: "admin".to_string(),
            user: "ghost".to_string(),
        };
        assert_eq!(dangling.to_string(), "role 'admin' references unknown user 'ghost'");
        assert!(dangling.path().is_none());
    }

    #[test]
    fn test_exhausted_wraps_last_cause() {
        let err: Error = ReloadError::ReloadExhausted {
            attempts: 3,
            cause: ReloadFailure::CorruptFile {
                path: PathBuf::from("users"),
                line: 2,
                reason: "wrong number of fields".to_string(),
            },
        }
        .into();

        let msg = err.to_string();
        assert!(msg.contains("after 3 consecutive attempts"));
        assert!(msg.contains("invalid file users (line 2)"));
    }
}

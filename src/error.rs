//! Error types and exit codes for workspace-hub

use std::path::PathBuf;
use std::process::ExitCode;
use thiserror::Error;

use crate::storage::StorageError;

/// Main error type for workspace-hub operations
#[derive(Error, Debug)]
pub enum WorkspaceError {
    #[error("Path traversal detected: {input} -> {}", .resolved.display())]
    PathTraversal { input: String, resolved: PathBuf },

    #[error("Invalid user id: {user_id:?}")]
    InvalidUserId { user_id: String },

    #[error("Not found: {path}")]
    NotFound { path: String },

    #[error("Path is not a directory: {path}")]
    NotADirectory { path: String },

    #[error("Path is not a file: {path}")]
    NotAFile { path: String },

    #[error("File too large: {size} bytes (max {limit} bytes)")]
    FileTooLarge { size: u64, limit: u64 },

    #[error("Binary file not supported, request it with raw=true")]
    BinaryFile,

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Failed to watch {}: {message}", .root.display())]
    ObserverStart { root: PathBuf, message: String },

    #[error("No async runtime available to deliver events")]
    NoRuntime,

    #[error("Object storage is not configured")]
    StorageNotConfigured,

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkspaceError {
    /// Stable error code used on the wire
    pub fn code(&self) -> &'static str {
        match self {
            Self::PathTraversal { .. } => "path_traversal",
            Self::InvalidUserId { .. } => "invalid_user_id",
            Self::NotFound { .. } => "not_found",
            Self::NotADirectory { .. } => "not_a_directory",
            Self::NotAFile { .. } => "not_a_file",
            Self::FileTooLarge { .. } => "file_too_large",
            Self::BinaryFile => "binary_file",
            Self::InvalidRequest { .. } => "invalid_request",
            Self::ObserverStart { .. } => "observer_start_failed",
            Self::NoRuntime => "no_runtime",
            Self::StorageNotConfigured => "storage_not_configured",
            Self::Storage(_) => "storage_error",
            Self::Io(_) => "io_error",
        }
    }

    /// Whether the caller sent something wrong (as opposed to a server fault)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::PathTraversal { .. }
                | Self::InvalidUserId { .. }
                | Self::NotFound { .. }
                | Self::NotADirectory { .. }
                | Self::NotAFile { .. }
                | Self::FileTooLarge { .. }
                | Self::BinaryFile
                | Self::InvalidRequest { .. }
        )
    }

    /// Convert error to a process exit code:
    /// - 0: Success
    /// - 1: IO error / not found
    /// - 2: Invalid input (user id, path shape)
    /// - 3: Path traversal
    /// - 4: Storage failure
    /// - 5: Watcher failure
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::NotFound { .. } | Self::Io(_) => ExitCode::from(1),
            Self::InvalidUserId { .. }
            | Self::NotADirectory { .. }
            | Self::NotAFile { .. }
            | Self::FileTooLarge { .. }
            | Self::BinaryFile
            | Self::InvalidRequest { .. } => ExitCode::from(2),
            Self::PathTraversal { .. } => ExitCode::from(3),
            Self::Storage(_) | Self::StorageNotConfigured => ExitCode::from(4),
            Self::ObserverStart { .. } | Self::NoRuntime => ExitCode::from(5),
        }
    }
}

/// Result type alias for workspace-hub operations
pub type Result<T> = std::result::Result<T, WorkspaceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_traversal_message_carries_both_paths() {
        let err = WorkspaceError::PathTraversal {
            input: "../etc".to_string(),
            resolved: PathBuf::from("/etc"),
        };
        let msg = err.to_string();
        assert!(msg.contains("../etc"));
        assert!(msg.contains("/etc"));
        assert_eq!(err.code(), "path_traversal");
        assert!(err.is_client_error());
    }

    #[test]
    fn test_server_faults_are_not_client_errors() {
        let err = WorkspaceError::ObserverStart {
            root: PathBuf::from("/missing"),
            message: "No such file".to_string(),
        };
        assert!(!err.is_client_error());
        assert_eq!(err.code(), "observer_start_failed");
    }
}

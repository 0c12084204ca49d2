//! Error taxonomy
//!
//! Only configuration errors cross the coordinator boundary. Environment
//! problems (a missing editor executable) are logged and absorbed, and a
//! timeout is reported as an absent result rather than an error.

use std::path::PathBuf;

use thiserror::Error;

use crate::editor::ExternalEditorId;

/// Errors returned to callers of the coordinator
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// Raw editor setting value with no matching editor kind
    #[error("Unsupported external editor value: {0}")]
    UnsupportedEditor(i64),

    /// Unknown editor name (config file or command line)
    #[error("Unknown external editor: {0}")]
    UnknownEditorName(String),

    /// The editor cannot be started by us and must be running already
    #[error("External editor {0} does not support auto-launch")]
    NotLaunchable(ExternalEditorId),

    #[error("Coordinator has been disposed")]
    Disposed,

    #[error("Operation cancelled")]
    Cancelled,
}

/// Errors from creating or executing an editor process
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("Cannot find code editor: {editor}")]
    ExecutableNotFound { editor: String, searched: Vec<PathBuf> },

    #[error("Failed to spawn {editor}: {source}")]
    Spawn {
        editor: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Process handle already disposed")]
    Disposed,
}

impl LaunchError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, LaunchError::ExecutableNotFound { .. })
    }
}

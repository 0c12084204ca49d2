//! Editor processes
//!
//! A [`ProcessHandle`] is one (possibly running) editor instance. The
//! orchestrator asks a [`ProcessLauncher`] for new handles and decides when
//! to execute, reuse or replace them.

use std::path::Path;

use chrono::{DateTime, Utc};

use crate::editor::LaunchVariant;
use crate::error::LaunchError;

pub mod editor_process;

pub trait ProcessHandle: Send {
    /// True while the launched process has not exited
    fn is_running(&mut self) -> bool;

    /// When `execute` last spawned the process
    fn launch_time(&self) -> Option<DateTime<Utc>>;

    /// Start the process; fails with `ExecutableNotFound` if it cannot be located
    fn execute(&mut self) -> Result<(), LaunchError>;

    /// Let go of the process; a disposed handle is never reused
    fn dispose(&mut self);

    fn is_disposed(&self) -> bool;
}

/// Creates process handles for a launch variant and solution path
pub trait ProcessLauncher: Send + Sync {
    fn create(&self, variant: LaunchVariant, solution_path: &Path) -> Result<Box<dyn ProcessHandle>, LaunchError>;
}

//! EditorProcess - spawns a real editor executable

use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use chrono::{DateTime, Utc};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use super::{ProcessHandle, ProcessLauncher};
use crate::editor::LaunchVariant;
use crate::error::LaunchError;

/// Absolute install locations checked before searching PATH
fn bundle_paths(variant: LaunchVariant) -> &'static [&'static str] {
    match variant {
        LaunchVariant::MonoDevelop => &["/Applications/MonoDevelop.app/Contents/MacOS/monodevelop"],
        LaunchVariant::VisualStudioForMac => &["/Applications/Visual Studio.app/Contents/MacOS/VisualStudio"],
        LaunchVariant::Rider => &["/Applications/Rider.app/Contents/MacOS/rider"],
        LaunchVariant::VsCode => &["/Applications/Visual Studio Code.app/Contents/Resources/app/bin/code"],
    }
}

/// Executable names searched on PATH
fn command_names(variant: LaunchVariant) -> &'static [&'static str] {
    match variant {
        LaunchVariant::MonoDevelop => &["monodevelop"],
        LaunchVariant::VisualStudioForMac => &[],
        LaunchVariant::Rider => &["rider", "rider.sh", "rider64.exe"],
        LaunchVariant::VsCode => &["code", "codium"],
    }
}

/// Locate the executable for a variant
///
/// An override always wins; if it points nowhere the editor counts as missing.
pub fn resolve_executable(variant: LaunchVariant, override_path: Option<&Path>) -> Result<PathBuf, LaunchError> {
    let mut searched = Vec::new();

    if let Some(path) = override_path {
        if path.is_file() {
            return Ok(path.to_path_buf());
        }
        searched.push(path.to_path_buf());
        return Err(LaunchError::ExecutableNotFound {
            editor: variant.display_name().to_string(),
            searched,
        });
    }

    for candidate in bundle_paths(variant) {
        let path = PathBuf::from(candidate);
        if path.is_file() {
            return Ok(path);
        }
        searched.push(path);
    }

    for name in command_names(variant) {
        match which::which(name) {
            Ok(path) => return Ok(path),
            Err(_) => searched.push(PathBuf::from(name)),
        }
    }

    Err(LaunchError::ExecutableNotFound {
        editor: variant.display_name().to_string(),
        searched,
    })
}

/// Arguments passed to the editor for a solution
fn launch_args(variant: LaunchVariant, solution_path: &Path) -> Vec<OsString> {
    match variant {
        // VS Code opens folders, not solutions
        LaunchVariant::VsCode => {
            let dir = solution_path.parent().unwrap_or(solution_path);
            vec![dir.as_os_str().to_owned()]
        }
        LaunchVariant::MonoDevelop | LaunchVariant::VisualStudioForMac | LaunchVariant::Rider => {
            vec![solution_path.as_os_str().to_owned()]
        }
    }
}

/// One editor instance opened on a solution
pub struct EditorProcess {
    variant: LaunchVariant,
    solution_path: PathBuf,
    override_path: Option<PathBuf>,
    child: Option<Child>,
    launch_time: Option<DateTime<Utc>>,
    disposed: bool,
}

impl EditorProcess {
    pub fn new(variant: LaunchVariant, solution_path: impl Into<PathBuf>) -> Self {
        Self {
            variant,
            solution_path: solution_path.into(),
            override_path: None,
            child: None,
            launch_time: None,
            disposed: false,
        }
    }

    /// Use a specific executable instead of searching for one
    pub fn with_executable(mut self, path: impl Into<PathBuf>) -> Self {
        self.override_path = Some(path.into());
        self
    }

    pub fn variant(&self) -> LaunchVariant {
        self.variant
    }

    pub fn solution_path(&self) -> &Path {
        &self.solution_path
    }
}

impl ProcessHandle for EditorProcess {
    fn is_running(&mut self) -> bool {
        let Some(child) = self.child.as_mut() else {
            return false;
        };
        match child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                debug!(variant = %self.variant, %status, "EditorProcess::is_running: process exited");
                self.child = None;
                false
            }
            Err(e) => {
                warn!(variant = %self.variant, error = %e, "EditorProcess::is_running: try_wait failed");
                false
            }
        }
    }

    fn launch_time(&self) -> Option<DateTime<Utc>> {
        self.launch_time
    }

    fn execute(&mut self) -> Result<(), LaunchError> {
        debug!(variant = %self.variant, solution = %self.solution_path.display(), "EditorProcess::execute: called");
        if self.disposed {
            return Err(LaunchError::Disposed);
        }
        if self.is_running() {
            debug!("EditorProcess::execute: already running");
            return Ok(());
        }

        let program = resolve_executable(self.variant, self.override_path.as_deref())?;
        let child = Command::new(&program)
            .args(launch_args(self.variant, &self.solution_path))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(false)
            .spawn()
            .map_err(|source| LaunchError::Spawn {
                editor: self.variant.display_name().to_string(),
                source,
            })?;

        info!(variant = %self.variant, program = %program.display(), pid = ?child.id(), "Launched editor");
        self.child = Some(child);
        self.launch_time = Some(Utc::now());
        Ok(())
    }

    fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        debug!(variant = %self.variant, "EditorProcess::dispose: called");
        // The editor belongs to the user now; dropping the handle leaves it running
        self.child = None;
        self.disposed = true;
    }

    fn is_disposed(&self) -> bool {
        self.disposed
    }
}

/// Creates [`EditorProcess`] handles, honouring per-variant executable overrides
#[derive(Debug, Default, Clone)]
pub struct EditorLauncher {
    overrides: HashMap<LaunchVariant, PathBuf>,
}

impl EditorLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_overrides(overrides: HashMap<LaunchVariant, PathBuf>) -> Self {
        Self { overrides }
    }
}

impl ProcessLauncher for EditorLauncher {
    fn create(&self, variant: LaunchVariant, solution_path: &Path) -> Result<Box<dyn ProcessHandle>, LaunchError> {
        let mut process = EditorProcess::new(variant, solution_path);
        if let Some(path) = self.overrides.get(&variant) {
            process = process.with_executable(path);
        }
        Ok(Box::new(process))
    }
}

//! Host application bindings
//!
//! Everything idelink needs from the embedding application: a few paths and a
//! place to report diagnostics the user should see.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

/// Diagnostics sink with the four levels the host understands
pub trait Logger: Send + Sync {
    fn debug(&self, message: &str);
    fn info(&self, message: &str);
    fn warn(&self, message: &str);
    fn error(&self, message: &str);
}

/// Logger that forwards to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn debug(&self, message: &str) {
        debug!(target: "idelink::host", "{}", message);
    }

    fn info(&self, message: &str) {
        info!(target: "idelink::host", "{}", message);
    }

    fn warn(&self, message: &str) {
        warn!(target: "idelink::host", "{}", message);
    }

    fn error(&self, message: &str) {
        error!(target: "idelink::host", "{}", message);
    }
}

/// Synchronous accessors into the host application
pub trait HostBindings: Send + Sync {
    /// Path of the running host executable, advertised to connecting editors
    fn executable_path(&self) -> PathBuf;

    /// Directory holding the endpoint's socket and metadata file
    fn metadata_dir(&self) -> PathBuf;

    /// Solution or project path the editor should open
    fn project_path(&self) -> PathBuf;

    fn logger(&self) -> Arc<dyn Logger>;
}

/// Host bindings made of fixed values
#[derive(Clone)]
pub struct StaticHost {
    executable_path: PathBuf,
    metadata_dir: PathBuf,
    project_path: PathBuf,
    logger: Arc<dyn Logger>,
}

impl StaticHost {
    pub fn new(executable_path: impl Into<PathBuf>, metadata_dir: impl Into<PathBuf>, project_path: impl Into<PathBuf>) -> Self {
        Self {
            executable_path: executable_path.into(),
            metadata_dir: metadata_dir.into(),
            project_path: project_path.into(),
            logger: Arc::new(TracingLogger),
        }
    }

    /// Replace the default tracing logger
    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn project(&self) -> &Path {
        &self.project_path
    }
}

impl HostBindings for StaticHost {
    fn executable_path(&self) -> PathBuf {
        self.executable_path.clone()
    }

    fn metadata_dir(&self) -> PathBuf {
        self.metadata_dir.clone()
    }

    fn project_path(&self) -> PathBuf {
        self.project_path.clone()
    }

    fn logger(&self) -> Arc<dyn Logger> {
        self.logger.clone()
    }
}

//! LaunchOrchestrator - decides whether to reuse, wait on or relaunch an editor
//!
//! Decision order for `ensure_launched`:
//! 1. editors we cannot start ourselves are rejected
//! 2. the handle for (variant, solution) is reused unless disposed
//! 3. not running and not launched within the grace period: execute
//! 4. running (or recently launched) and already connected: nothing to do
//! 5. running but unconnected: wait out the grace period, then relaunch
//!
//! A missing executable is reported through the host logger and otherwise
//! ignored; the caller's connect timeout runs out on its own.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::editor::{ExternalEditorId, LaunchVariant};
use crate::error::{CoordinatorError, LaunchError};
use crate::host::Logger;
use crate::process::{ProcessHandle, ProcessLauncher};

/// Answers whether a peer with an identity is connected
pub trait PeerDirectory: Send + Sync {
    fn is_any_connected(&self, identity: Option<&str>) -> bool;
}

/// What `ensure_launched` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchOutcome {
    /// Running and a peer is already connected
    AlreadyConnected,
    /// Running, unconnected, still inside the grace period
    StartingUp,
    /// A stopped or fresh handle was executed
    Launched,
    /// A stuck instance was disposed and replaced
    Relaunched,
    /// The editor executable could not be located
    NotFound,
    /// Spawning failed for another reason
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct HandleKey {
    variant: LaunchVariant,
    solution_path: PathBuf,
}

/// Owns the editor process handles, one per (variant, solution)
pub struct LaunchOrchestrator {
    launcher: Arc<dyn ProcessLauncher>,
    logger: Arc<dyn Logger>,
    grace_period: Duration,
    handles: Mutex<HashMap<HandleKey, Box<dyn ProcessHandle>>>,
}

impl LaunchOrchestrator {
    pub fn new(launcher: Arc<dyn ProcessLauncher>, logger: Arc<dyn Logger>, grace_period: Duration) -> Self {
        debug!(?grace_period, "LaunchOrchestrator::new: called");
        Self {
            launcher,
            logger,
            grace_period,
            handles: Mutex::new(HashMap::new()),
        }
    }

    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    /// Make sure an editor of `kind` is running or starting for `solution_path`
    ///
    /// Calls are serialized, so concurrent requests for the same editor see
    /// each other's launch and wait on it instead of spawning twice.
    pub async fn ensure_launched(
        &self,
        kind: ExternalEditorId,
        identity: Option<&str>,
        solution_path: &Path,
        peers: &dyn PeerDirectory,
    ) -> Result<LaunchOutcome, CoordinatorError> {
        debug!(%kind, ?identity, solution = %solution_path.display(), "LaunchOrchestrator::ensure_launched: called");
        let variant = kind.launch_variant()?;
        let key = HandleKey {
            variant,
            solution_path: solution_path.to_path_buf(),
        };

        let mut handles = self.handles.lock().await;

        let handle = match handles.entry(key.clone()) {
            Entry::Occupied(entry) if !entry.get().is_disposed() => entry.into_mut(),
            entry => {
                let fresh = match self.launcher.create(variant, solution_path) {
                    Ok(fresh) => fresh,
                    Err(e) => return Ok(self.report_failure(variant, &e)),
                };
                match entry {
                    Entry::Occupied(mut entry) => {
                        entry.insert(fresh);
                        entry.into_mut()
                    }
                    Entry::Vacant(entry) => entry.insert(fresh),
                }
            }
        };

        let since_launch = handle
            .launch_time()
            .and_then(|launched| Utc::now().signed_duration_since(launched).to_std().ok());
        // Launchers like `code` hand off to the main app and exit at once; the
        // launch still counts until the grace period runs out
        let launched_recently = since_launch.is_some_and(|elapsed| elapsed <= self.grace_period);

        if !handle.is_running() && !launched_recently {
            debug!(%variant, "LaunchOrchestrator::ensure_launched: not running, executing");
            return Ok(match handle.execute() {
                Ok(()) => LaunchOutcome::Launched,
                Err(e) => self.report_failure(variant, &e),
            });
        }

        if peers.is_any_connected(identity) {
            debug!(%variant, "LaunchOrchestrator::ensure_launched: running and connected");
            return Ok(LaunchOutcome::AlreadyConnected);
        }

        let elapsed = since_launch.unwrap_or_default();
        if elapsed <= self.grace_period {
            debug!(%variant, ?elapsed, "LaunchOrchestrator::ensure_launched: still starting up");
            return Ok(LaunchOutcome::StartingUp);
        }

        info!(%variant, ?elapsed, "Editor running without connecting, relaunching");
        handle.dispose();
        handles.remove(&key);

        let mut fresh = match self.launcher.create(variant, solution_path) {
            Ok(fresh) => fresh,
            Err(e) => return Ok(self.report_failure(variant, &e)),
        };
        let outcome = match fresh.execute() {
            Ok(()) => LaunchOutcome::Relaunched,
            Err(e) => self.report_failure(variant, &e),
        };
        handles.insert(key, fresh);
        Ok(outcome)
    }

    /// Number of handles that are not disposed
    pub async fn live_handles(&self) -> usize {
        self.handles.lock().await.values().filter(|h| !h.is_disposed()).count()
    }

    /// Dispose every handle; the editors themselves keep running
    pub async fn dispose_all(&self) {
        let mut handles = self.handles.lock().await;
        for handle in handles.values_mut() {
            handle.dispose();
        }
        handles.clear();
    }

    fn report_failure(&self, variant: LaunchVariant, error: &LaunchError) -> LaunchOutcome {
        if error.is_not_found() {
            self.logger.error(&format!("Cannot find code editor: {}", variant.display_name()));
            LaunchOutcome::NotFound
        } else {
            self.logger.error(&format!("Failed to launch {}: {}", variant.display_name(), error));
            LaunchOutcome::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counters {
        created: AtomicUsize,
        executed: AtomicUsize,
        disposed: AtomicUsize,
    }

    struct FakeHandle {
        counters: Arc<Counters>,
        running: bool,
        launch_time: Option<DateTime<Utc>>,
        disposed: bool,
        missing: bool,
    }

    impl ProcessHandle for FakeHandle {
        fn is_running(&mut self) -> bool {
            self.running
        }

        fn launch_time(&self) -> Option<DateTime<Utc>> {
            self.launch_time
        }

        fn execute(&mut self) -> Result<(), LaunchError> {
            self.counters.executed.fetch_add(1, Ordering::SeqCst);
            if self.missing {
                return Err(LaunchError::ExecutableNotFound {
                    editor: "MonoDevelop".to_string(),
                    searched: vec![],
                });
            }
            self.running = true;
            self.launch_time = Some(Utc::now());
            Ok(())
        }

        fn dispose(&mut self) {
            self.counters.disposed.fetch_add(1, Ordering::SeqCst);
            self.disposed = true;
        }

        fn is_disposed(&self) -> bool {
            self.disposed
        }
    }

    struct FakeLauncher {
        counters: Arc<Counters>,
        missing: bool,
        /// Age applied to the first handle, which starts out running
        preexisting_age: Option<chrono::Duration>,
    }

    impl FakeLauncher {
        fn new() -> Self {
            Self {
                counters: Arc::new(Counters::default()),
                missing: false,
                preexisting_age: None,
            }
        }
    }

    impl ProcessLauncher for FakeLauncher {
        fn create(&self, _variant: LaunchVariant, _solution_path: &Path) -> Result<Box<dyn ProcessHandle>, LaunchError> {
            let first = self.counters.created.fetch_add(1, Ordering::SeqCst) == 0;
            let preexisting = self.preexisting_age.filter(|_| first);
            Ok(Box::new(FakeHandle {
                counters: self.counters.clone(),
                running: preexisting.is_some(),
                launch_time: preexisting.map(|age| Utc::now() - age),
                disposed: false,
                missing: self.missing,
            }))
        }
    }

    #[derive(Default)]
    struct Peers {
        connected: AtomicBool,
    }

    impl PeerDirectory for Peers {
        fn is_any_connected(&self, identity: Option<&str>) -> bool {
            identity.is_some() && self.connected.load(Ordering::SeqCst)
        }
    }

    #[derive(Default)]
    struct RecordingLogger {
        errors: StdMutex<Vec<String>>,
    }

    impl Logger for RecordingLogger {
        fn debug(&self, _message: &str) {}
        fn info(&self, _message: &str) {}
        fn warn(&self, _message: &str) {}
        fn error(&self, message: &str) {
            self.errors.lock().unwrap().push(message.to_string());
        }
    }

    fn orchestrator(launcher: FakeLauncher) -> (LaunchOrchestrator, Arc<Counters>, Arc<RecordingLogger>) {
        let counters = launcher.counters.clone();
        let logger = Arc::new(RecordingLogger::default());
        let orchestrator = LaunchOrchestrator::new(Arc::new(launcher), logger.clone(), Duration::from_secs(30));
        (orchestrator, counters, logger)
    }

    const SLN: &str = "/work/game.sln";

    #[tokio::test]
    async fn test_not_launchable_editor_is_rejected() {
        let (orchestrator, counters, _) = orchestrator(FakeLauncher::new());
        let peers = Peers::default();

        let err = orchestrator
            .ensure_launched(ExternalEditorId::VisualStudio, Some("VisualStudio"), Path::new(SLN), &peers)
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::NotLaunchable(ExternalEditorId::VisualStudio)));

        let err = orchestrator
            .ensure_launched(ExternalEditorId::None, None, Path::new(SLN), &peers)
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::NotLaunchable(ExternalEditorId::None)));
        assert_eq!(counters.created.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_launches_when_not_running() {
        let (orchestrator, counters, _) = orchestrator(FakeLauncher::new());
        let peers = Peers::default();

        let outcome = orchestrator
            .ensure_launched(ExternalEditorId::MonoDevelop, Some("MonoDevelop"), Path::new(SLN), &peers)
            .await
            .unwrap();
        assert_eq!(outcome, LaunchOutcome::Launched);
        assert_eq!(counters.executed.load(Ordering::SeqCst), 1);
        assert_eq!(orchestrator.live_handles().await, 1);
    }

    #[tokio::test]
    async fn test_second_call_within_grace_joins_startup() {
        let (orchestrator, counters, _) = orchestrator(FakeLauncher::new());
        let peers = Peers::default();

        for _ in 0..3 {
            orchestrator
                .ensure_launched(ExternalEditorId::Rider, Some("Rider"), Path::new(SLN), &peers)
                .await
                .unwrap();
        }
        assert_eq!(counters.created.load(Ordering::SeqCst), 1);
        assert_eq!(counters.executed.load(Ordering::SeqCst), 1);
        assert_eq!(
            orchestrator
                .ensure_launched(ExternalEditorId::Rider, Some("Rider"), Path::new(SLN), &peers)
                .await
                .unwrap(),
            LaunchOutcome::StartingUp
        );
    }

    #[tokio::test]
    async fn test_running_and_connected_is_noop() {
        let mut launcher = FakeLauncher::new();
        launcher.preexisting_age = Some(chrono::Duration::seconds(120));
        let (orchestrator, counters, _) = orchestrator(launcher);
        let peers = Peers::default();
        peers.connected.store(true, Ordering::SeqCst);

        let outcome = orchestrator
            .ensure_launched(ExternalEditorId::MonoDevelop, Some("MonoDevelop"), Path::new(SLN), &peers)
            .await
            .unwrap();
        assert_eq!(outcome, LaunchOutcome::AlreadyConnected);
        assert_eq!(counters.executed.load(Ordering::SeqCst), 0);
        assert_eq!(counters.disposed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stuck_instance_past_grace_is_relaunched() {
        let mut launcher = FakeLauncher::new();
        launcher.preexisting_age = Some(chrono::Duration::seconds(31));
        let (orchestrator, counters, _) = orchestrator(launcher);
        let peers = Peers::default();

        let outcome = orchestrator
            .ensure_launched(ExternalEditorId::MonoDevelop, Some("MonoDevelop"), Path::new(SLN), &peers)
            .await
            .unwrap();
        assert_eq!(outcome, LaunchOutcome::Relaunched);
        assert_eq!(counters.disposed.load(Ordering::SeqCst), 1);
        assert_eq!(counters.created.load(Ordering::SeqCst), 2);
        assert_eq!(counters.executed.load(Ordering::SeqCst), 1);
        assert_eq!(orchestrator.live_handles().await, 1);
    }

    #[tokio::test]
    async fn test_young_instance_is_left_alone() {
        let mut launcher = FakeLauncher::new();
        launcher.preexisting_age = Some(chrono::Duration::seconds(5));
        let (orchestrator, counters, _) = orchestrator(launcher);
        let peers = Peers::default();

        let outcome = orchestrator
            .ensure_launched(ExternalEditorId::MonoDevelop, Some("MonoDevelop"), Path::new(SLN), &peers)
            .await
            .unwrap();
        assert_eq!(outcome, LaunchOutcome::StartingUp);
        assert_eq!(counters.disposed.load(Ordering::SeqCst), 0);
        assert_eq!(counters.executed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_executable_is_logged_not_raised() {
        let mut launcher = FakeLauncher::new();
        launcher.missing = true;
        let (orchestrator, counters, logger) = orchestrator(launcher);
        let peers = Peers::default();

        let outcome = orchestrator
            .ensure_launched(ExternalEditorId::MonoDevelop, Some("MonoDevelop"), Path::new(SLN), &peers)
            .await
            .unwrap();
        assert_eq!(outcome, LaunchOutcome::NotFound);
        assert_eq!(counters.executed.load(Ordering::SeqCst), 1);
        assert_eq!(
            *logger.errors.lock().unwrap(),
            vec!["Cannot find code editor: MonoDevelop".to_string()]
        );
    }

    #[tokio::test]
    async fn test_disposed_handle_is_replaced() {
        let (orchestrator, counters, _) = orchestrator(FakeLauncher::new());
        let peers = Peers::default();

        orchestrator
            .ensure_launched(ExternalEditorId::Rider, Some("Rider"), Path::new(SLN), &peers)
            .await
            .unwrap();
        orchestrator.handles.lock().await.values_mut().for_each(|h| h.dispose());
        assert_eq!(orchestrator.live_handles().await, 0);

        let outcome = orchestrator
            .ensure_launched(ExternalEditorId::Rider, Some("Rider"), Path::new(SLN), &peers)
            .await
            .unwrap();
        assert_eq!(outcome, LaunchOutcome::Launched);
        assert_eq!(counters.created.load(Ordering::SeqCst), 2);
        assert_eq!(orchestrator.live_handles().await, 1);
    }

    /// Editor launcher script that records each spawn and exits at once
    fn handoff_launcher(dir: &std::path::Path) -> (crate::process::editor_process::EditorLauncher, PathBuf) {
        use std::os::unix::fs::PermissionsExt;

        let spawns = dir.join("spawns");
        let script = dir.join("code");
        std::fs::write(&script, format!("#!/bin/sh\necho x >> '{}'\nexit 0\n", spawns.display())).unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let overrides = HashMap::from([(LaunchVariant::VsCode, script)]);
        (crate::process::editor_process::EditorLauncher::with_overrides(overrides), spawns)
    }

    async fn wait_for_exit(orchestrator: &LaunchOrchestrator) {
        for _ in 0..200 {
            if orchestrator.handles.lock().await.values_mut().all(|h| !h.is_running()) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("launcher did not exit");
    }

    fn spawn_count(spawns: &std::path::Path) -> usize {
        std::fs::read_to_string(spawns).map(|s| s.lines().count()).unwrap_or(0)
    }

    #[tokio::test]
    async fn test_exited_launcher_within_grace_is_not_relaunched() {
        let temp = tempfile::TempDir::new().unwrap();
        let (launcher, spawns) = handoff_launcher(temp.path());
        let orchestrator = LaunchOrchestrator::new(Arc::new(launcher), Arc::new(RecordingLogger::default()), Duration::from_secs(30));
        let peers = Peers::default();
        let sln = temp.path().join("game.sln");

        let first = orchestrator
            .ensure_launched(ExternalEditorId::VsCode, Some("VisualStudioCode"), &sln, &peers)
            .await
            .unwrap();
        assert_eq!(first, LaunchOutcome::Launched);
        wait_for_exit(&orchestrator).await;

        let second = orchestrator
            .ensure_launched(ExternalEditorId::VsCode, Some("VisualStudioCode"), &sln, &peers)
            .await
            .unwrap();
        assert_eq!(second, LaunchOutcome::StartingUp);
        assert_eq!(spawn_count(&spawns), 1);

        peers.connected.store(true, Ordering::SeqCst);
        let third = orchestrator
            .ensure_launched(ExternalEditorId::VsCode, Some("VisualStudioCode"), &sln, &peers)
            .await
            .unwrap();
        assert_eq!(third, LaunchOutcome::AlreadyConnected);
        assert_eq!(spawn_count(&spawns), 1);
    }

    #[tokio::test]
    async fn test_exited_launcher_past_grace_is_executed_again() {
        let temp = tempfile::TempDir::new().unwrap();
        let (launcher, spawns) = handoff_launcher(temp.path());
        let orchestrator = LaunchOrchestrator::new(Arc::new(launcher), Arc::new(RecordingLogger::default()), Duration::ZERO);
        let peers = Peers::default();
        let sln = temp.path().join("game.sln");

        orchestrator
            .ensure_launched(ExternalEditorId::VsCode, Some("VisualStudioCode"), &sln, &peers)
            .await
            .unwrap();
        wait_for_exit(&orchestrator).await;

        let outcome = orchestrator
            .ensure_launched(ExternalEditorId::VsCode, Some("VisualStudioCode"), &sln, &peers)
            .await
            .unwrap();
        assert_eq!(outcome, LaunchOutcome::Launched);

        for _ in 0..200 {
            if spawn_count(&spawns) == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(spawn_count(&spawns), 2);
    }

    #[tokio::test]
    async fn test_variants_get_separate_handles() {
        let (orchestrator, counters, _) = orchestrator(FakeLauncher::new());
        let peers = Peers::default();

        orchestrator
            .ensure_launched(ExternalEditorId::Rider, Some("Rider"), Path::new(SLN), &peers)
            .await
            .unwrap();
        orchestrator
            .ensure_launched(ExternalEditorId::VsCode, Some("VisualStudioCode"), Path::new(SLN), &peers)
            .await
            .unwrap();
        assert_eq!(counters.created.load(Ordering::SeqCst), 2);
        assert_eq!(orchestrator.live_handles().await, 2);

        orchestrator.dispose_all().await;
        assert_eq!(orchestrator.live_handles().await, 0);
        assert_eq!(counters.disposed.load(Ordering::SeqCst), 2);
    }
}

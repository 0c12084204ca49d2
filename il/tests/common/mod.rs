//! Test doubles shared by the integration tests

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::watch;

use idelink::{
    ConnectionCoordinator, ConnectionEndpoint, CoordinatorOptions, EndpointFactory, LaunchError, LaunchVariant,
    Logger, ProcessHandle, ProcessLauncher, RequestEnvelope, StaticHost,
};

// =============================================================================
// Endpoint
// =============================================================================

pub struct FakeEndpoint {
    disposed: AtomicBool,
    peers: watch::Sender<Vec<String>>,
    pub listens: AtomicUsize,
    pub broadcasts: Mutex<Vec<(String, RequestEnvelope)>>,
}

impl FakeEndpoint {
    fn new() -> Self {
        let (peers, _) = watch::channel(Vec::new());
        Self {
            disposed: AtomicBool::new(false),
            peers,
            listens: AtomicUsize::new(0),
            broadcasts: Mutex::new(Vec::new()),
        }
    }

    /// Simulate an editor completing its handshake
    pub fn connect(&self, identity: &str) {
        self.peers.send_modify(|peers| peers.push(identity.to_string()));
    }

    pub fn broadcast_count(&self) -> usize {
        self.broadcasts.lock().unwrap().len()
    }
}

#[async_trait]
impl ConnectionEndpoint for FakeEndpoint {
    async fn listen(&self) -> eyre::Result<()> {
        self.listens.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    fn is_any_connected(&self, identity: Option<&str>) -> bool {
        identity.is_some_and(|identity| self.peers.borrow().iter().any(|p| p == identity))
    }

    async fn await_peer_connected(&self, identity: &str) {
        let mut rx = self.peers.subscribe();
        if rx.wait_for(|peers| peers.iter().any(|p| p == identity)).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    fn broadcast_request(&self, identity: &str, request: RequestEnvelope) {
        self.broadcasts.lock().unwrap().push((identity.to_string(), request));
    }

    fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
        self.peers.send_modify(|peers| peers.clear());
    }
}

#[derive(Default)]
pub struct FakeFactory {
    pub created: Mutex<Vec<Arc<FakeEndpoint>>>,
}

impl FakeFactory {
    pub fn count(&self) -> usize {
        self.created.lock().unwrap().len()
    }

    pub fn last(&self) -> Arc<FakeEndpoint> {
        self.created.lock().unwrap().last().cloned().expect("no endpoint created")
    }
}

impl EndpointFactory for FakeFactory {
    fn create(&self, _executable_path: &Path, _metadata_dir: &Path, _logger: Arc<dyn Logger>) -> Arc<dyn ConnectionEndpoint> {
        let endpoint = Arc::new(FakeEndpoint::new());
        self.created.lock().unwrap().push(endpoint.clone());
        endpoint
    }
}

// =============================================================================
// Processes
// =============================================================================

#[derive(Default)]
pub struct Counters {
    pub created: AtomicUsize,
    pub executed: AtomicUsize,
    pub disposed: AtomicUsize,
}

impl Counters {
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn executed(&self) -> usize {
        self.executed.load(Ordering::SeqCst)
    }

    pub fn disposed(&self) -> usize {
        self.disposed.load(Ordering::SeqCst)
    }
}

pub type ExecuteHook = Arc<dyn Fn(LaunchVariant) + Send + Sync>;

pub struct FakeHandle {
    variant: LaunchVariant,
    counters: Arc<Counters>,
    running: bool,
    launch_time: Option<DateTime<Utc>>,
    disposed: bool,
    missing: bool,
    on_execute: Option<ExecuteHook>,
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
                editor: self.variant.display_name().to_string(),
                searched: vec![],
            });
        }
        self.running = true;
        self.launch_time = Some(Utc::now());
        if let Some(hook) = &self.on_execute {
            hook(self.variant);
        }
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

#[derive(Default)]
pub struct FakeLauncher {
    pub counters: Arc<Counters>,
    /// Every execute fails with ExecutableNotFound
    pub missing: bool,
    /// The first handle starts out running, launched this long ago
    pub preexisting_age: Option<chrono::Duration>,
    pub on_execute: Option<ExecuteHook>,
}

impl ProcessLauncher for FakeLauncher {
    fn create(&self, variant: LaunchVariant, _solution_path: &Path) -> Result<Box<dyn ProcessHandle>, LaunchError> {
        let first = self.counters.created.fetch_add(1, Ordering::SeqCst) == 0;
        let preexisting = self.preexisting_age.filter(|_| first);
        Ok(Box::new(FakeHandle {
            variant,
            counters: self.counters.clone(),
            running: preexisting.is_some(),
            launch_time: preexisting.map(|age| Utc::now() - age),
            disposed: false,
            missing: self.missing,
            on_execute: self.on_execute.clone(),
        }))
    }
}

// =============================================================================
// Logger
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Default)]
pub struct RecordingLogger {
    pub entries: Mutex<Vec<(Level, String)>>,
}

impl RecordingLogger {
    pub fn at(&self, level: Level) -> Vec<String> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, m)| m.clone())
            .collect()
    }

    fn push(&self, level: Level, message: &str) {
        self.entries.lock().unwrap().push((level, message.to_string()));
    }
}

impl Logger for RecordingLogger {
    fn debug(&self, message: &str) {
        self.push(Level::Debug, message);
    }

    fn info(&self, message: &str) {
        self.push(Level::Info, message);
    }

    fn warn(&self, message: &str) {
        self.push(Level::Warn, message);
    }

    fn error(&self, message: &str) {
        self.push(Level::Error, message);
    }
}

// =============================================================================
// Harness
// =============================================================================

pub struct Harness {
    pub coordinator: ConnectionCoordinator,
    pub factory: Arc<FakeFactory>,
    pub counters: Arc<Counters>,
    pub logger: Arc<RecordingLogger>,
}

pub fn options(connect_timeout: Duration) -> CoordinatorOptions {
    CoordinatorOptions {
        connect_timeout,
        launch_grace: Duration::from_secs(30),
    }
}

pub fn harness(launcher: FakeLauncher) -> Harness {
    harness_with(launcher, options(Duration::from_millis(100)))
}

pub fn harness_with(launcher: FakeLauncher, options: CoordinatorOptions) -> Harness {
    let counters = launcher.counters.clone();
    let logger = Arc::new(RecordingLogger::default());
    let factory = Arc::new(FakeFactory::default());
    let host = StaticHost::new("/usr/bin/host", "/tmp/idelink-test", "/work/game.sln").with_logger(logger.clone());
    let coordinator = ConnectionCoordinator::new(Arc::new(host), factory.clone(), Arc::new(launcher), options);
    Harness {
        coordinator,
        factory,
        counters,
        logger,
    }
}

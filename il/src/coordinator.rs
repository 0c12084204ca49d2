//! ConnectionCoordinator - one endpoint per host, editors launched on demand
//!
//! The coordinator is a cheap cloneable handle. Every clone, and every
//! [`EditorPick`] handed out, shares the same endpoint slot, so a pick stays
//! usable after the endpoint behind it has been replaced.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::editor::ExternalEditorId;
use crate::endpoint::messages::{OpenFileRequest, Request, RequestEnvelope};
use crate::endpoint::{ConnectionEndpoint, EndpointFactory};
use crate::error::CoordinatorError;
use crate::host::HostBindings;
use crate::launch::{LaunchOrchestrator, LaunchOutcome, PeerDirectory};
use crate::process::ProcessLauncher;
use crate::sync::AsyncMutex;

/// Timing knobs for the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorOptions {
    /// How long `request_editor_ready` waits for the editor to connect
    pub connect_timeout: Duration,

    /// How long a running editor may stay unconnected before it is relaunched
    pub launch_grace: Duration,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(crate::DEFAULT_CONNECT_TIMEOUT_MS),
            launch_grace: Duration::from_secs(crate::DEFAULT_LAUNCH_GRACE_SECS),
        }
    }
}

struct Inner {
    host: Arc<dyn HostBindings>,
    factory: Arc<dyn EndpointFactory>,
    orchestrator: LaunchOrchestrator,
    options: CoordinatorOptions,

    /// Current endpoint; readers load a snapshot without locking
    endpoint: ArcSwapOption<Arc<dyn ConnectionEndpoint>>,
    /// Serializes endpoint creation and replacement
    endpoint_lock: AsyncMutex,

    closed: AtomicBool,
    shutdown: CancellationToken,
}

/// Owns the messaging endpoint and answers "is the editor ready?"
#[derive(Clone)]
pub struct ConnectionCoordinator {
    inner: Arc<Inner>,
}

impl ConnectionCoordinator {
    pub fn new(
        host: Arc<dyn HostBindings>,
        factory: Arc<dyn EndpointFactory>,
        launcher: Arc<dyn ProcessLauncher>,
        options: CoordinatorOptions,
    ) -> Self {
        debug!(?options, "ConnectionCoordinator::new: called");
        let orchestrator = LaunchOrchestrator::new(launcher, host.logger(), options.launch_grace);
        Self {
            inner: Arc::new(Inner {
                host,
                factory,
                orchestrator,
                options,
                endpoint: ArcSwapOption::empty(),
                endpoint_lock: AsyncMutex::new(),
                closed: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn options(&self) -> CoordinatorOptions {
        self.inner.options
    }

    /// Host lifecycle hook: bring the endpoint up as soon as the host is ready
    pub async fn on_ready(&self) {
        if let Err(e) = self.get_or_create_endpoint().await {
            debug!(error = %e, "ConnectionCoordinator::on_ready: endpoint not started");
        }
    }

    /// Host lifecycle hook: after a reload the previous endpoint may be gone
    pub async fn on_after_reload(&self) {
        self.on_ready().await;
    }

    /// Snapshot of the current endpoint if it is still live
    pub fn current_endpoint(&self) -> Option<Arc<dyn ConnectionEndpoint>> {
        self.inner
            .endpoint
            .load_full()
            .map(|slot| Arc::clone(&*slot))
            .filter(|endpoint| !endpoint.is_disposed())
    }

    /// Return the live endpoint, creating and starting a new one if needed
    ///
    /// Concurrent callers all observe the same endpoint. Listening is started
    /// in the background and not awaited.
    pub async fn get_or_create_endpoint(&self) -> Result<Arc<dyn ConnectionEndpoint>, CoordinatorError> {
        if self.is_closed() {
            return Err(CoordinatorError::Disposed);
        }
        if let Some(endpoint) = self.current_endpoint() {
            return Ok(endpoint);
        }

        let _guard = self
            .inner
            .endpoint_lock
            .acquire(&self.inner.shutdown)
            .await
            .map_err(|_| CoordinatorError::Disposed)?;

        if self.is_closed() {
            return Err(CoordinatorError::Disposed);
        }
        if let Some(endpoint) = self.current_endpoint() {
            return Ok(endpoint);
        }

        if let Some(stale) = self.inner.endpoint.swap(None) {
            debug!("ConnectionCoordinator::get_or_create_endpoint: disposing stale endpoint");
            stale.dispose();
        }

        let host = &self.inner.host;
        let endpoint = self
            .inner
            .factory
            .create(&host.executable_path(), &host.metadata_dir(), host.logger());
        self.inner.endpoint.store(Some(Arc::new(endpoint.clone())));

        let listening = endpoint.clone();
        tokio::spawn(async move {
            if let Err(e) = listening.listen().await {
                warn!(error = %e, "Messaging endpoint stopped listening");
            }
        });
        info!(metadata_dir = %host.metadata_dir().display(), "Messaging endpoint created");

        // Teardown may have run while we were creating
        if self.is_closed() {
            if let Some(endpoint) = self.inner.endpoint.swap(None) {
                endpoint.dispose();
            }
            return Err(CoordinatorError::Disposed);
        }

        Ok(endpoint)
    }

    /// True iff the current endpoint has a peer with `identity`
    pub fn is_any_connected(&self, identity: Option<&str>) -> bool {
        identity.is_some()
            && self
                .current_endpoint()
                .is_some_and(|endpoint| endpoint.is_any_connected(identity))
    }

    /// [`request_editor_ready_within`](Self::request_editor_ready_within) using the configured timeout
    pub async fn request_editor_ready(&self, kind: ExternalEditorId) -> Result<Option<EditorPick>, CoordinatorError> {
        self.request_editor_ready_within(kind, self.inner.options.connect_timeout)
            .await
    }

    /// Make sure an editor of `kind` is connected, launching it if needed
    ///
    /// Returns `None` if no editor connected within `timeout`. A connection
    /// arriving later is still accepted by the endpoint and satisfies the
    /// next call.
    pub async fn request_editor_ready_within(
        &self,
        kind: ExternalEditorId,
        timeout: Duration,
    ) -> Result<Option<EditorPick>, CoordinatorError> {
        debug!(%kind, ?timeout, "ConnectionCoordinator::request_editor_ready: called");
        let identity = kind.identity();

        let endpoint = match self.get_or_create_endpoint().await {
            Ok(endpoint) => endpoint,
            Err(CoordinatorError::Disposed) => {
                debug!("ConnectionCoordinator::request_editor_ready: coordinator disposed");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        if let Some(identity) = identity {
            if endpoint.is_any_connected(Some(identity)) {
                debug!(%identity, "ConnectionCoordinator::request_editor_ready: already connected");
                return Ok(Some(EditorPick::new(identity, self.clone())));
            }
        }

        let project_path: PathBuf = self.inner.host.project_path();
        let outcome = self
            .inner
            .orchestrator
            .ensure_launched(kind, identity, &project_path, self)
            .await?;
        debug!(?outcome, "ConnectionCoordinator::request_editor_ready: launch evaluated");

        let Some(identity) = identity else {
            return Err(CoordinatorError::NotLaunchable(kind));
        };
        if outcome == LaunchOutcome::AlreadyConnected {
            return Ok(Some(EditorPick::new(identity, self.clone())));
        }

        match tokio::time::timeout(timeout, endpoint.await_peer_connected(identity)).await {
            Ok(()) => {
                info!(%identity, "Editor connected");
                Ok(Some(EditorPick::new(identity, self.clone())))
            }
            Err(_) => {
                debug!(%identity, ?timeout, "ConnectionCoordinator::request_editor_ready: timed out");
                Ok(None)
            }
        }
    }

    /// Pick an editor without checking or waiting for readiness
    pub fn pick_editor(&self, kind: ExternalEditorId) -> Option<EditorPick> {
        kind.identity().map(|identity| EditorPick::new(identity, self.clone()))
    }

    /// Send a typed request to every peer with `identity`
    ///
    /// Fire-and-forget: with no such peer a warning is logged and nothing is sent.
    pub fn broadcast_request<R: Request>(&self, identity: &str, request: &R) {
        debug!(%identity, name = R::NAME, "ConnectionCoordinator::broadcast_request: called");
        let logger = self.inner.host.logger();

        let endpoint = match self.current_endpoint() {
            Some(endpoint) if endpoint.is_any_connected(Some(identity)) => endpoint,
            _ => {
                logger.warn(&format!(
                    "Cannot send request {}: no peer connected with identity {}",
                    R::NAME,
                    identity
                ));
                return;
            }
        };

        match RequestEnvelope::new(request) {
            Ok(envelope) => endpoint.broadcast_request(identity, envelope),
            Err(e) => logger.error(&format!("Failed to serialize request {}: {}", R::NAME, e)),
        }
    }

    /// Wait until every request sent so far has been answered or its peer is gone
    ///
    /// Returns false if `timeout` ran out first.
    pub async fn flush(&self, timeout: Duration) -> bool {
        let Some(endpoint) = self.current_endpoint() else {
            return true;
        };
        tokio::time::timeout(timeout, endpoint.await_pending()).await.is_ok()
    }

    /// Tear down the endpoint; idempotent and safe during an in-flight creation
    pub fn dispose(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("ConnectionCoordinator::dispose: called");
        self.inner.shutdown.cancel();
        if let Some(endpoint) = self.inner.endpoint.swap(None) {
            endpoint.dispose();
        }
    }

    /// Dispose the endpoint and release every editor process handle
    pub async fn shutdown(&self) {
        self.dispose();
        self.inner.orchestrator.dispose_all().await;
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn orchestrator(&self) -> &LaunchOrchestrator {
        &self.inner.orchestrator
    }
}

impl PeerDirectory for ConnectionCoordinator {
    fn is_any_connected(&self, identity: Option<&str>) -> bool {
        ConnectionCoordinator::is_any_connected(self, identity)
    }
}

/// Capability to talk to one kind of editor
///
/// Holds only the identity; every call asks the coordinator afresh.
#[derive(Clone)]
pub struct EditorPick {
    identity: String,
    coordinator: ConnectionCoordinator,
}

impl std::fmt::Debug for EditorPick {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EditorPick").field("identity", &self.identity).finish()
    }
}

impl EditorPick {
    fn new(identity: &str, coordinator: ConnectionCoordinator) -> Self {
        Self {
            identity: identity.to_string(),
            coordinator,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// True while a peer with this identity is connected
    pub fn is_ready(&self) -> bool {
        self.coordinator.is_any_connected(Some(&self.identity))
    }

    pub fn send_request<R: Request>(&self, request: &R) {
        self.coordinator.broadcast_request(&self.identity, request);
    }

    pub fn send_open_file(&self, file: &str) {
        self.send_request(&OpenFileRequest::new(file));
    }

    /// Open `file` at a 1-based line
    pub fn send_open_file_at(&self, file: &str, line: u32) {
        self.send_request(&OpenFileRequest::new(file).with_line(line));
    }

    /// Open `file` at a 1-based line and column
    pub fn send_open_file_at_column(&self, file: &str, line: u32, column: u32) {
        self.send_request(&OpenFileRequest::new(file).with_line(line).with_column(column));
    }
}

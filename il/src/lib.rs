//! idelink - connection coordinator for external code editors
//!
//! A host application (a game editor, a build tool) wants to open files in an
//! external code editor. The editor runs as its own process and talks back to
//! the host over a local messaging endpoint. idelink owns that endpoint,
//! launches the editor on demand and answers the question "is the editor
//! ready?" within a bounded time.
//!
//! # Architecture
//!
//! ```text
//! caller ──► ConnectionCoordinator::request_editor_ready
//!              │  peer already connected? ──► EditorPick
//!              ├─► LaunchOrchestrator::ensure_launched (reuse / wait / relaunch)
//!              └─► race(timeout, endpoint.await_peer_connected) ──► Option<EditorPick>
//!
//! EditorPick::send_open_file ──► ConnectionCoordinator::broadcast_request ──► endpoint
//! ```
//!
//! # Example
//!
//! ```ignore
//! use idelink::{ConnectionCoordinator, ExternalEditorId};
//!
//! let coordinator = ConnectionCoordinator::new(host, endpoints, launcher, options);
//! if let Some(pick) = coordinator.request_editor_ready(ExternalEditorId::MonoDevelop).await? {
//!     pick.send_open_file_at("scripts/player.cs", 42);
//! }
//! ```

pub mod cli;
pub mod config;
pub mod coordinator;
pub mod editor;
pub mod endpoint;
pub mod error;
pub mod host;
pub mod launch;
pub mod process;
pub mod sync;

pub use config::Config;
pub use coordinator::{ConnectionCoordinator, CoordinatorOptions, EditorPick};
pub use editor::{ExternalEditorId, LaunchVariant};
pub use endpoint::messages::{OpenFileRequest, OpenFileResponse, Request, RequestEnvelope, Response};
pub use endpoint::server::{MessagingServer, MessagingServerFactory};
pub use endpoint::{ConnectionEndpoint, EndpointFactory};
pub use error::{CoordinatorError, LaunchError};
pub use host::{HostBindings, Logger, StaticHost, TracingLogger};
pub use launch::{LaunchOrchestrator, PeerDirectory};
pub use process::editor_process::{EditorLauncher, EditorProcess};
pub use process::{ProcessHandle, ProcessLauncher};
pub use sync::{AcquireError, AsyncMutex, AsyncMutexGuard};

/// Default time to wait for an editor to connect (10s)
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Default grace period before a running but unconnected editor is relaunched (30s)
pub const DEFAULT_LAUNCH_GRACE_SECS: u64 = 30;

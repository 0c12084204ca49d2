//! Messaging endpoint that connected editors talk to
//!
//! The coordinator only depends on the [`ConnectionEndpoint`] contract. The
//! shipped implementation is [`server::MessagingServer`], a Unix Domain
//! Socket speaking newline-delimited JSON.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::host::Logger;

pub mod messages;
pub mod server;

pub use messages::RequestEnvelope;

/// A listening endpoint plus the set of peers currently attached to it
#[async_trait]
pub trait ConnectionEndpoint: Send + Sync {
    /// Accept peers until disposed
    ///
    /// Callers spawn this and do not wait on it; a failure here only shows up
    /// as later operations finding no peer.
    async fn listen(&self) -> eyre::Result<()>;

    fn is_disposed(&self) -> bool;

    /// True iff at least one peer announced `identity`; `None` is never connected
    fn is_any_connected(&self, identity: Option<&str>) -> bool;

    /// Resolves once a peer with `identity` is attached, never earlier
    async fn await_peer_connected(&self, identity: &str);

    /// Send a request to every peer with `identity`, fire-and-forget
    fn broadcast_request(&self, identity: &str, request: RequestEnvelope);

    /// Resolves once every request sent so far has been answered or its peer is gone
    async fn await_pending(&self) {}

    /// Stop listening and drop all peers; idempotent
    fn dispose(&self);
}

/// Builds endpoints bound to the host's executable path, metadata dir and logger
pub trait EndpointFactory: Send + Sync {
    fn create(&self, executable_path: &Path, metadata_dir: &Path, logger: Arc<dyn Logger>) -> Arc<dyn ConnectionEndpoint>;
}

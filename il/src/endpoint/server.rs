//! MessagingServer - Unix Domain Socket endpoint for editor peers
//!
//! Editors discover the server through a metadata file written next to the
//! socket, connect, announce their identity in a handshake and then receive
//! requests as JSON lines. Responses flow back on the same connection.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use eyre::{Context, Result};
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::messages::{PROTOCOL_VERSION, PeerMessage, RequestEnvelope, ResponseStatus, ServerMessage};
use super::{ConnectionEndpoint, EndpointFactory};
use crate::host::Logger;

/// Socket file created inside the metadata directory
pub const SOCKET_FILE_NAME: &str = "ide_messaging.sock";

/// Discovery file created inside the metadata directory
pub const META_FILE_NAME: &str = "ide_messaging_meta.json";

/// Name the server announces in its handshake acknowledgement
pub const SERVER_NAME: &str = "idelink";

/// Maximum size of one JSON line (64KB)
const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Time a new connection gets to send its handshake
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Contents of the discovery file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerMeta {
    pub socket_path: PathBuf,
    pub executable_path: PathBuf,
    pub pid: u32,
}

impl ServerMeta {
    /// Read the discovery file from a metadata directory
    pub fn read(metadata_dir: &Path) -> Result<Self> {
        let path = metadata_dir.join(META_FILE_NAME);
        let content = std::fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content).context("Failed to parse server metadata")
    }
}

struct Peer {
    identity: String,
    tx: mpsc::UnboundedSender<String>,
}

/// A request still waiting for answers
#[derive(Debug)]
struct PendingRequest {
    /// Response kind the sender expects back
    expected_response: String,
    /// Connections the request was written to that have not answered
    peers: HashSet<Uuid>,
}

/// Socket endpoint tracking connected editor peers
pub struct MessagingServer {
    executable_path: PathBuf,
    metadata_dir: PathBuf,
    logger: Arc<dyn Logger>,

    disposed: AtomicBool,
    /// Set once this server owns the socket file
    bound: AtomicBool,
    shutdown: CancellationToken,

    /// Connected peers keyed by connection id
    peers: watch::Sender<HashMap<Uuid, Peer>>,

    /// Requests awaiting a response, by request id
    pending: watch::Sender<HashMap<Uuid, PendingRequest>>,
}

impl MessagingServer {
    pub fn new(executable_path: impl Into<PathBuf>, metadata_dir: impl Into<PathBuf>, logger: Arc<dyn Logger>) -> Self {
        let metadata_dir = metadata_dir.into();
        debug!(metadata_dir = %metadata_dir.display(), "MessagingServer::new: called");
        let (peers, _) = watch::channel(HashMap::new());
        let (pending, _) = watch::channel(HashMap::new());
        Self {
            executable_path: executable_path.into(),
            metadata_dir,
            logger,
            disposed: AtomicBool::new(false),
            bound: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            peers,
            pending,
        }
    }

    pub fn socket_path(&self) -> PathBuf {
        self.metadata_dir.join(SOCKET_FILE_NAME)
    }

    pub fn meta_path(&self) -> PathBuf {
        self.metadata_dir.join(META_FILE_NAME)
    }

    /// Identities of all connected peers, one entry per connection
    pub fn connected_identities(&self) -> Vec<String> {
        let mut identities: Vec<String> = self.peers.borrow().values().map(|p| p.identity.clone()).collect();
        identities.sort();
        identities
    }

    fn bind(&self) -> Result<UnixListener> {
        let socket_path = self.socket_path();
        let listener = create_listener_at(&socket_path)?;
        self.bound.store(true, Ordering::SeqCst);

        let meta = ServerMeta {
            socket_path,
            executable_path: self.executable_path.clone(),
            pid: std::process::id(),
        };
        let content = serde_json::to_string_pretty(&meta).context("Failed to serialize server metadata")?;
        std::fs::write(self.meta_path(), content).context("Failed to write server metadata")?;
        Ok(listener)
    }

    async fn serve_peer(&self, stream: UnixStream) {
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        let identity = match tokio::time::timeout(HANDSHAKE_TIMEOUT, read_peer_message(&mut reader)).await {
            Ok(Ok(Some(PeerMessage::Handshake { identity }))) if !identity.is_empty() => identity,
            Ok(Ok(Some(other))) => {
                warn!(?other, "MessagingServer::serve_peer: expected handshake");
                let reply = ServerMessage::Error {
                    message: "Expected handshake".to_string(),
                };
                let _ = write_message(&mut write_half, &reply).await;
                return;
            }
            Ok(Ok(None)) => {
                debug!("MessagingServer::serve_peer: peer closed before handshake");
                return;
            }
            Ok(Err(e)) => {
                warn!(error = %e, "MessagingServer::serve_peer: invalid handshake");
                return;
            }
            Err(_) => {
                warn!("MessagingServer::serve_peer: handshake timed out");
                return;
            }
        };

        let ack = ServerMessage::HandshakeAck {
            server: SERVER_NAME.to_string(),
            version: PROTOCOL_VERSION,
        };
        if let Err(e) = write_message(&mut write_half, &ack).await {
            warn!(%identity, error = %e, "MessagingServer::serve_peer: failed to acknowledge handshake");
            return;
        }

        let peer_id = Uuid::now_v7();
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        self.peers.send_modify(|peers| {
            peers.insert(
                peer_id,
                Peer {
                    identity: identity.clone(),
                    tx,
                },
            );
        });
        self.logger.info(&format!("Peer connected: {}", identity));

        let writer = async {
            while let Some(line) = rx.recv().await {
                if let Err(e) = write_line(&mut write_half, &line).await {
                    warn!(%identity, error = %e, "MessagingServer::serve_peer: write failed");
                    break;
                }
            }
        };

        let reader_loop = async {
            loop {
                match read_peer_message(&mut reader).await {
                    Ok(Some(PeerMessage::Response { id, name, status, body })) => {
                        self.handle_response(peer_id, &identity, id, &name, status, body);
                    }
                    Ok(Some(PeerMessage::Handshake { .. })) => {
                        warn!(%identity, "MessagingServer::serve_peer: ignoring repeated handshake");
                    }
                    Ok(None) => {
                        debug!(%identity, "MessagingServer::serve_peer: peer closed connection");
                        break;
                    }
                    Err(e) => {
                        warn!(%identity, error = %e, "MessagingServer::serve_peer: read failed");
                        break;
                    }
                }
            }
        };

        tokio::select! {
            _ = writer => {}
            _ = reader_loop => {}
        }

        self.forget_pending(peer_id);
        self.peers.send_modify(|peers| {
            peers.remove(&peer_id);
        });
        self.logger.info(&format!("Peer disconnected: {}", identity));
    }

    /// Number of requests still waiting for at least one answer
    pub fn pending_requests(&self) -> usize {
        self.pending.borrow().len()
    }

    /// Drop a closed connection from every pending request
    fn forget_pending(&self, peer_id: Uuid) {
        self.pending.send_if_modified(|pending| {
            let before = pending.len();
            pending.retain(|_, request| {
                request.peers.remove(&peer_id);
                !request.peers.is_empty()
            });
            pending.len() != before
        });
    }

    fn handle_response(
        &self,
        peer_id: Uuid,
        identity: &str,
        id: Uuid,
        name: &str,
        status: ResponseStatus,
        body: serde_json::Value,
    ) {
        let mut expected = None;
        self.pending.send_if_modified(|pending| {
            let Some(request) = pending.get_mut(&id) else {
                return false;
            };
            if !request.peers.remove(&peer_id) {
                return false;
            }
            expected = Some(request.expected_response.clone());
            if request.peers.is_empty() {
                pending.remove(&id);
            }
            true
        });

        match expected {
            Some(expected) if expected != name => {
                self.logger.warn(&format!(
                    "Peer {} answered request {} with {} but {} was expected",
                    identity, id, name, expected
                ));
            }
            Some(_) => {
                debug!(%identity, %id, %name, ?status, ?body, "MessagingServer::handle_response: received");
                if status != ResponseStatus::Ok {
                    self.logger.warn(&format!("Peer {} failed request {}: {:?}", identity, name, status));
                }
            }
            None => {
                debug!(%identity, %id, %name, "MessagingServer::handle_response: response to unknown request");
            }
        }
    }
}

#[async_trait]
impl ConnectionEndpoint for MessagingServer {
    async fn listen(&self) -> Result<()> {
        debug!(socket_path = %self.socket_path().display(), "MessagingServer::listen: called");
        if self.is_disposed() {
            return Err(eyre::eyre!("Messaging server already disposed"));
        }

        let listener = match self.bind() {
            Ok(listener) => listener,
            Err(e) => {
                self.logger.error(&format!("Failed to start messaging server: {:#}", e));
                self.dispose();
                return Err(e);
            }
        };
        info!(socket_path = %self.socket_path().display(), "Messaging server listening");

        let mut connections = FuturesUnordered::new();
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    debug!("MessagingServer::listen: shutdown requested");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, _addr)) => {
                        debug!("MessagingServer::listen: connection accepted");
                        connections.push(self.serve_peer(stream));
                    }
                    Err(e) => {
                        warn!(error = %e, "MessagingServer::listen: accept error");
                    }
                },
                Some(()) = connections.next(), if !connections.is_empty() => {}
            }
        }

        Ok(())
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    fn is_any_connected(&self, identity: Option<&str>) -> bool {
        let Some(identity) = identity else {
            return false;
        };
        self.peers.borrow().values().any(|p| p.identity == identity)
    }

    async fn await_peer_connected(&self, identity: &str) {
        let mut rx = self.peers.subscribe();
        let connected = rx
            .wait_for(|peers| peers.values().any(|p| p.identity == identity))
            .await
            .is_ok();
        if !connected {
            std::future::pending::<()>().await;
        }
    }

    async fn await_pending(&self) {
        let mut rx = self.pending.subscribe();
        let _ = rx.wait_for(|pending| pending.is_empty()).await;
    }

    fn broadcast_request(&self, identity: &str, request: RequestEnvelope) {
        debug!(%identity, name = %request.name, id = %request.id, "MessagingServer::broadcast_request: called");
        let line = match serde_json::to_string(&request.to_message()) {
            Ok(line) => line,
            Err(e) => {
                self.logger.error(&format!("Failed to serialize request {}: {}", request.name, e));
                return;
            }
        };

        let sent: HashSet<Uuid> = self
            .peers
            .borrow()
            .iter()
            .filter(|(_, p)| p.identity == identity)
            .filter(|(_, p)| p.tx.send(line.clone()).is_ok())
            .map(|(peer_id, _)| *peer_id)
            .collect();

        if sent.is_empty() {
            self.logger.warn(&format!(
                "Cannot send request {}: no peer connected with identity {}",
                request.name, identity
            ));
            return;
        }

        let count = sent.len();
        self.pending.send_modify(|pending| {
            pending.insert(
                request.id,
                PendingRequest {
                    expected_response: request.expected_response,
                    peers: sent,
                },
            );
        });
        debug!(%identity, count, "MessagingServer::broadcast_request: sent");
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("MessagingServer::dispose: called");
        self.shutdown.cancel();
        self.peers.send_modify(|peers| peers.clear());
        self.pending.send_modify(|pending| pending.clear());

        if self.bound.load(Ordering::SeqCst) {
            cleanup_socket(&self.socket_path());
            cleanup_socket(&self.meta_path());
        }
    }
}

impl Drop for MessagingServer {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Builds [`MessagingServer`] endpoints
#[derive(Debug, Default, Clone, Copy)]
pub struct MessagingServerFactory;

impl EndpointFactory for MessagingServerFactory {
    fn create(&self, executable_path: &Path, metadata_dir: &Path, logger: Arc<dyn Logger>) -> Arc<dyn ConnectionEndpoint> {
        Arc::new(MessagingServer::new(executable_path, metadata_dir, logger))
    }
}

/// Create and bind a listener, replacing a stale socket from a previous run
pub fn create_listener_at(socket_path: &Path) -> Result<UnixListener> {
    debug!(?socket_path, "create_listener_at: creating socket");

    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create socket directory")?;
    }

    if socket_path.exists() {
        debug!(?socket_path, "create_listener_at: removing stale socket");
        std::fs::remove_file(socket_path).context("Failed to remove stale socket")?;
    }

    let listener = UnixListener::bind(socket_path).context("Failed to bind messaging socket")?;
    debug!(?socket_path, "create_listener_at: socket bound");
    Ok(listener)
}

/// Remove a file created by the server, logging failures
pub fn cleanup_socket(path: &Path) {
    if path.exists() {
        debug!(?path, "cleanup_socket: removing file");
        if let Err(e) = std::fs::remove_file(path) {
            warn!(?path, error = %e, "Failed to remove messaging file");
        }
    }
}

async fn read_peer_message<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Option<PeerMessage>> {
    let mut line = String::new();
    let bytes_read = reader.read_line(&mut line).await.context("Failed to read peer message")?;

    if bytes_read == 0 {
        return Ok(None);
    }
    if bytes_read > MAX_MESSAGE_SIZE {
        return Err(eyre::eyre!("Message too large: {} bytes", bytes_read));
    }

    let msg: PeerMessage = serde_json::from_str(line.trim()).context("Failed to parse peer message")?;
    Ok(Some(msg))
}

async fn write_message<W: AsyncWrite + Unpin>(writer: &mut W, msg: &ServerMessage) -> Result<()> {
    let line = serde_json::to_string(msg).context("Failed to serialize message")?;
    write_line(writer, &line).await
}

async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> Result<()> {
    writer.write_all(line.as_bytes()).await.context("Failed to write message")?;
    writer.write_all(b"\n").await.context("Failed to write newline")?;
    writer.flush().await.context("Failed to flush message")?;
    Ok(())
}

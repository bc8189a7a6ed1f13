//! Owns the TLS listener, dials configured peers, dispatches accepted
//! connections, and drives the handshake-then-sync-then-connected lifecycle
//! (spec §4.6).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tokio_util::codec::Framed;

use crate::config_distributor;
use crate::dispatch::{HandlerContext, MessageHandlerTable};
use crate::endpoint::{ConnectionState, Endpoint};
use crate::error::ClusterError;
use crate::registry::TypeRegistry;
use crate::replay_log::ReplayLog;
use crate::wire::{RpcMessage, WireCodec};

pub struct PeerTarget {
    pub name: String,
    pub address: SocketAddr,
}

/// Shared, cloneable handle each connection task uses to update the
/// endpoint table and hand inbound frames to the router.
pub struct ClusterListener {
    self_identity: String,
    bind_address: SocketAddr,
    tls_acceptor: TlsAcceptor,
    tls_connector: TlsConnector,
    endpoints: Arc<DashMap<String, Arc<Endpoint>>>,
    accept_config: Vec<String>,
    handlers: Arc<MessageHandlerTable>,
    registry: Arc<TypeRegistry>,
    replay_log: Arc<ReplayLog>,
    /// Root directory config-sync globs are resolved against (spec §4.9);
    /// this node's own `state_dir`.
    config_sync_root: PathBuf,
    config_sync_globs: Vec<String>,
    /// How far an inbound message's `ts` may lead `remote_log_position`
    /// before we ack it with `cluster::SetLogPosition` (spec §4.6).
    log_position_ack_threshold: Duration,
}

impl ClusterListener {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        self_identity: String,
        bind_address: SocketAddr,
        server_config: rustls::ServerConfig,
        client_config: rustls::ClientConfig,
        endpoints: Arc<DashMap<String, Arc<Endpoint>>>,
        accept_config: Vec<String>,
        handlers: Arc<MessageHandlerTable>,
        registry: Arc<TypeRegistry>,
        replay_log: Arc<ReplayLog>,
        config_sync_root: PathBuf,
        config_sync_globs: Vec<String>,
        log_position_ack_threshold: Duration,
    ) -> Self {
        Self {
            self_identity,
            bind_address,
            tls_acceptor: TlsAcceptor::from(Arc::new(server_config)),
            tls_connector: TlsConnector::from(Arc::new(client_config)),
            endpoints,
            accept_config,
            handlers,
            registry,
            replay_log,
            config_sync_root,
            config_sync_globs,
            log_position_ack_threshold,
        }
    }

    /// Binds the configured port and accepts inbound peer connections until
    /// cancelled.
    pub async fn listen(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.bind_address).await?;
        tracing::info!(address = %self.bind_address, "cluster listener bound");
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer_addr) = accepted?;
                    let acceptor = self.tls_acceptor.clone();
                    let endpoints = self.endpoints.clone();
                    let accept_config = self.accept_config.clone();
                    let self_identity = self.self_identity.clone();
                    let handlers = self.handlers.clone();
                    let registry = self.registry.clone();
                    let replay_log = self.replay_log.clone();
                    let config_sync_root = self.config_sync_root.clone();
                    let config_sync_globs = self.config_sync_globs.clone();
                    let log_position_ack_threshold = self.log_position_ack_threshold;
                    tokio::spawn(async move {
                        if let Err(e) = Self::accept_one(
                            stream, peer_addr, acceptor, endpoints, accept_config, self_identity,
                            handlers, registry, replay_log, config_sync_root, config_sync_globs,
                            log_position_ack_threshold,
                        ).await {
                            tracing::warn!(peer = %peer_addr, error = %e, "inbound handshake failed");
                        }
                    });
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return Ok(());
                    }
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn accept_one(
        stream: TcpStream,
        peer_addr: SocketAddr,
        acceptor: TlsAcceptor,
        endpoints: Arc<DashMap<String, Arc<Endpoint>>>,
        accept_config: Vec<String>,
        self_identity: String,
        handlers: Arc<MessageHandlerTable>,
        registry: Arc<TypeRegistry>,
        replay_log: Arc<ReplayLog>,
        config_sync_root: PathBuf,
        config_sync_globs: Vec<String>,
        log_position_ack_threshold: Duration,
    ) -> Result<(), ClusterError> {
        let tls_stream = acceptor.accept(stream).await.map_err(|e| ClusterError::Tls {
            peer: peer_addr.to_string(),
            source: watchmesh_tls::TlsError::Io {
                path: peer_addr.to_string(),
                source: e,
            },
        })?;

        let (_, session) = tls_stream.get_ref();
        let peer_certs = session.peer_certificates().unwrap_or_default();
        let cn = watchmesh_tls::peer_common_name(peer_certs).map_err(|e| ClusterError::Tls {
            peer: peer_addr.to_string(),
            source: e,
        })?;

        if !accept_config.iter().any(|allowed| allowed == &cn) {
            return Err(ClusterError::UnknownPeerIdentity { cn });
        }

        tracing::info!(peer = %cn, "accepted inbound cluster connection");
        let (endpoint, outbound_rx) = Endpoint::new(&cn);
        let endpoint = Arc::new(endpoint);
        endpoints.insert(cn.clone(), endpoint.clone());
        endpoint.transition(ConnectionState::Syncing);

        // Server side of Syncing (spec §4.6/§4.9): push our config bundle,
        // then replay the durable log from this peer's last-known position,
        // before the connection is marked Connected.
        Self::sync_new_peer(&endpoint, &replay_log, &config_sync_root, &config_sync_globs);

        let framed = Framed::new(tokio_rustls::TlsStream::Server(tls_stream), WireCodec::default());
        Self::drive_connection(framed, endpoint, outbound_rx, registry, handlers, self_identity, log_position_ack_threshold).await;
        Ok(())
    }

    /// Queues this node's config-sync bundle and its durable-log backlog
    /// onto `endpoint`'s outbound channel; `drive_connection`'s select loop
    /// drains both once it starts. Server role only (spec §4.6: "the server
    /// side sends the cluster::Config file bundle, then replays the durable
    /// log from the peer's local_log_position").
    fn sync_new_peer(endpoint: &Endpoint, replay_log: &ReplayLog, config_sync_root: &PathBuf, config_sync_globs: &[String]) {
        let bundle = config_distributor::build_bundle(config_sync_root, config_sync_globs);
        let config_message = RpcMessage::new(
            "cluster::Config",
            serde_json::json!({ "identity": endpoint.name, "files": bundle }),
        );
        if endpoint.send(config_message).is_err() {
            tracing::debug!(peer = %endpoint.name, "dropped config bundle: writer gone");
        }

        let from_ts = *endpoint.local_log_position.lock();
        let mut replayed = 0usize;
        let result = replay_log.replay(from_ts, Some(endpoint.name.as_str()), |_sec| true, |record| {
            let message = RpcMessage::new(record.method.clone(), record.payload.clone());
            if endpoint.send(message).is_err() {
                tracing::debug!(peer = %endpoint.name, "dropped replayed record: writer gone");
            } else {
                replayed += 1;
            }
        });
        if let Err(e) = result {
            tracing::warn!(peer = %endpoint.name, error = %e, "replay log read failed during sync");
        } else {
            tracing::info!(peer = %endpoint.name, replayed, "replayed durable log to peer");
        }
    }

    /// Dials every configured peer that isn't already `Connected`, once,
    /// under the 5s dial-interval tick owned by the caller.
    pub async fn dial_all(&self, targets: &[PeerTarget]) {
        for target in targets {
            let already_connected = self
                .endpoints
                .get(&target.name)
                .map(|e| e.is_connected() || e.state() == ConnectionState::Handshaking)
                .unwrap_or(false);
            if already_connected {
                continue;
            }
            let connector = self.tls_connector.clone();
            let endpoints = self.endpoints.clone();
            let name = target.name.clone();
            let address = target.address;
            let self_identity = self.self_identity.clone();
            let handlers = self.handlers.clone();
            let registry = self.registry.clone();
            let log_position_ack_threshold = self.log_position_ack_threshold;
            tokio::spawn(async move {
                if let Err(e) = Self::dial_one(name.clone(), address, connector, endpoints, self_identity, handlers, registry, log_position_ack_threshold).await {
                    tracing::debug!(peer = %name, error = %e, "dial failed, will retry next tick");
                }
            });
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn dial_one(
        name: String,
        address: SocketAddr,
        connector: TlsConnector,
        endpoints: Arc<DashMap<String, Arc<Endpoint>>>,
        self_identity: String,
        handlers: Arc<MessageHandlerTable>,
        registry: Arc<TypeRegistry>,
        log_position_ack_threshold: Duration,
    ) -> Result<(), ClusterError> {
        let (endpoint, outbound_rx) = Endpoint::new(&name);
        let endpoint = Arc::new(endpoint);
        endpoints.insert(name.clone(), endpoint.clone());
        endpoint.transition(ConnectionState::Handshaking);

        let stream = TcpStream::connect(address).await.map_err(|e| ClusterError::Tls {
            peer: name.clone(),
            source: watchmesh_tls::TlsError::Io {
                path: address.to_string(),
                source: e,
            },
        })?;
        let server_name = rustls::pki_types::ServerName::IpAddress(address.ip().into());
        let tls_stream = connector.connect(server_name, stream).await.map_err(|e| ClusterError::Tls {
            peer: name.clone(),
            source: watchmesh_tls::TlsError::Io {
                path: address.to_string(),
                source: e,
            },
        })?;

        endpoint.transition(ConnectionState::Syncing);
        let framed = Framed::new(tokio_rustls::TlsStream::Client(tls_stream), WireCodec::default());
        Self::drive_connection(framed, endpoint, outbound_rx, registry, handlers, self_identity, log_position_ack_threshold).await;
        Ok(())
    }

    /// Runs the full-duplex read/write loop for a connected peer until the
    /// stream closes or idles out: inbound frames go through the handler
    /// table (spec §9 "Message dispatch dynamism"), outbound frames come
    /// from whatever `MessageRouter::relay` queued onto this endpoint.
    async fn drive_connection<T>(
        mut framed: Framed<T, WireCodec>,
        endpoint: Arc<Endpoint>,
        mut outbound_rx: mpsc::UnboundedReceiver<RpcMessage>,
        registry: Arc<TypeRegistry>,
        handlers: Arc<MessageHandlerTable>,
        _self_identity: String,
        log_position_ack_threshold: Duration,
    ) where
        T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
    {
        endpoint.transition(ConnectionState::Connected);
        let ack_threshold_secs = log_position_ack_threshold.as_secs_f64();
        loop {
            tokio::select! {
                frame = framed.next() => {
                    match frame {
                        Some(Ok(message)) => {
                            endpoint.touch(chrono::Utc::now());
                            if let Some(ts) = message.timestamp() {
                                let lead = ts - *endpoint.remote_log_position.lock();
                                if lead > ack_threshold_secs {
                                    *endpoint.remote_log_position.lock() = ts;
                                    let ack = RpcMessage::new("cluster::SetLogPosition", serde_json::json!({ "log_position": ts }));
                                    if endpoint.send(ack).is_err() {
                                        tracing::debug!(peer = %endpoint.name, "dropped log position ack: writer gone");
                                    }
                                }
                            }
                            let ctx = HandlerContext { sender: &endpoint, registry: &registry };
                            if let Err(e) = handlers.dispatch(&ctx, &message.method, &message.params) {
                                tracing::warn!(peer = %endpoint.name, error = %e, "message dispatch failed");
                            }
                        }
                        Some(Err(e)) => {
                            tracing::warn!(peer = %endpoint.name, error = %e, "protocol violation, dropping frame");
                        }
                        None => break,
                    }
                }
                outgoing = outbound_rx.recv() => {
                    match outgoing {
                        Some(message) => {
                            if let Err(e) = framed.send(message).await {
                                tracing::warn!(peer = %endpoint.name, error = %e, "failed to write outbound frame");
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = tokio::time::sleep(Duration::from_secs(1)) => {
                    if endpoint.is_idle(chrono::Utc::now()) {
                        tracing::info!(peer = %endpoint.name, "idle timeout, closing connection");
                        break;
                    }
                }
            }
        }
        let _ = framed.close().await;
        endpoint.transition(ConnectionState::Disconnected);
    }
}

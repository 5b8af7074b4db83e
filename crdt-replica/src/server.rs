//! WebSocket front end for the authoritative remote store.
//!
//! Architecture:
//! ```text
//! Replica A (RPC) ──┐                       ┌── Replica A (feed)
//! Replica B (RPC) ──┼── Authority ── Hub ───┼── Replica B (feed)
//! Replica C (RPC) ──┘   (documents)         └── Replica C (feed)
//! ```
//!
//! A connection serves pipelined requests until it sends `Subscribe`; from
//! then on it also receives every notification published by the hub. A feed
//! that falls behind by more than the hub capacity loses the oldest
//! notifications and the loss is counted in the hub stats.

use std::net::SocketAddr;
use std::sync::Arc;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{RwLock, broadcast};
use tokio_tungstenite::tungstenite::Message;

use crate::authority::Authority;
use crate::broadcast::HubStats;
use crate::config::Granularity;
use crate::protocol::{Frame, Request, RequestBody, ResponseBody};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Per-subscriber notification buffer
    pub notification_capacity: usize,
    /// Payload carried by update notifications
    pub granularity: Granularity,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            notification_capacity: 4096,
            granularity: Granularity::Operation,
        }
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub active_subscribers: u64,
    pub total_requests: u64,
    pub total_bytes: u64,
    pub rejected_upserts: u64,
}

/// The remote store server.
pub struct AuthorityServer {
    config: ServerConfig,
    authority: Arc<Authority>,
    stats: Arc<RwLock<ServerStats>>,
}

impl AuthorityServer {
    pub fn new(config: ServerConfig) -> Self {
        let authority = Arc::new(Authority::new(config.granularity, config.notification_capacity));
        Self::with_authority(config, authority)
    }

    /// Serve an existing authority (shared with in-process gateways).
    pub fn with_authority(config: ServerConfig, authority: Arc<Authority>) -> Self {
        Self {
            config,
            authority,
            stats: Arc::new(RwLock::new(ServerStats::default())),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default())
    }

    /// Start listening for WebSocket connections.
    ///
    /// This runs the server event loop. Call from an async runtime.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!(
            "Remote store listening on {} (granularity: {})",
            self.config.bind_addr,
            self.config.granularity
        );

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let authority = self.authority.clone();
            let stats = self.stats.clone();

            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, authority, stats).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Handle a single WebSocket connection.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        authority: Arc<Authority>,
        stats: Arc<RwLock<ServerStats>>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        log::debug!("WebSocket connection established from {addr}");

        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        let mut feed: Option<broadcast::Receiver<Arc<Vec<u8>>>> = None;

        let result: Result<(), Box<dyn std::error::Error + Send + Sync>> = async {
            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Binary(data))) => {
                                let bytes: Vec<u8> = data.into();
                                {
                                    let mut s = stats.write().await;
                                    s.total_requests += 1;
                                    s.total_bytes += bytes.len() as u64;
                                }

                                let request = match Frame::decode(&bytes) {
                                    Ok(Frame::Request(request)) => request,
                                    Ok(other) => {
                                        log::warn!("Unexpected frame from {addr}: {other:?}");
                                        continue;
                                    }
                                    Err(e) => {
                                        log::warn!("Failed to decode message from {addr}: {e}");
                                        continue;
                                    }
                                };

                                let Request { request_id, body } = request;
                                let response = match body {
                                    RequestBody::Subscribe => {
                                        if feed.is_none() {
                                            feed = Some(authority.subscribe());
                                            stats.write().await.active_subscribers += 1;
                                            log::info!("Replica at {addr} subscribed to notifications");
                                        }
                                        ResponseBody::Ack
                                    }
                                    other => Self::dispatch(&authority, &stats, other).await,
                                };

                                let encoded = Frame::response(request_id, response).encode()?;
                                ws_sender.send(Message::Binary(encoded.into())).await?;
                            }

                            Some(Ok(Message::Close(_))) | None => {
                                log::debug!("Connection closed from {addr}");
                                break;
                            }

                            Some(Ok(Message::Ping(data))) => {
                                ws_sender.send(Message::Pong(data)).await?;
                            }

                            Some(Err(e)) => {
                                log::error!("WebSocket error from {addr}: {e}");
                                break;
                            }

                            _ => {}
                        }
                    }

                    // Outgoing notification
                    msg = async {
                        if let Some(ref mut rx) = feed {
                            rx.recv().await
                        } else {
                            // Not subscribed: wait forever
                            std::future::pending().await
                        }
                    } => {
                        match msg {
                            Ok(data) => {
                                ws_sender.send(Message::Binary(data.to_vec().into())).await?;
                            }
                            Err(broadcast::error::RecvError::Lagged(n)) => {
                                log::warn!("Subscriber {addr} lagged by {n} notifications");
                                authority.hub().record_dropped(n);
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                }
            }
            Ok(())
        }
        .await;

        {
            let mut s = stats.write().await;
            s.active_connections -= 1;
            if feed.is_some() {
                s.active_subscribers -= 1;
            }
        }

        result
    }

    /// Execute a non-subscribe request against the authority.
    async fn dispatch(
        authority: &Authority,
        stats: &RwLock<ServerStats>,
        body: RequestBody,
    ) -> ResponseBody {
        match body {
            RequestBody::Get { id } => match authority.get(&id).await {
                Some(snapshot) => ResponseBody::Document(snapshot),
                None => ResponseBody::NotFound,
            },
            RequestBody::Upsert { id, change, origin } => {
                match authority.upsert(&id, &change, &origin).await {
                    Ok(_) => ResponseBody::Ack,
                    Err(e) => {
                        log::warn!("Rejected upsert for {id} from {origin}: {e}");
                        stats.write().await.rejected_upserts += 1;
                        ResponseBody::Error(e.to_string())
                    }
                }
            }
            RequestBody::GetByPrefix { prefix } => {
                ResponseBody::Documents(authority.get_by_prefix(&prefix).await)
            }
            RequestBody::GetMany { ids } => ResponseBody::Documents(authority.get_many(&ids).await),
            RequestBody::GetAll => ResponseBody::Documents(authority.get_all().await),
            RequestBody::Subscribe => ResponseBody::Ack,
        }
    }

    /// Get server statistics.
    pub async fn stats(&self) -> ServerStats {
        self.stats.read().await.clone()
    }

    pub fn hub_stats(&self) -> HubStats {
        self.authority.hub().stats()
    }

    /// Get the configured bind address.
    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub fn authority(&self) -> &Arc<Authority> {
        &self.authority
    }
}

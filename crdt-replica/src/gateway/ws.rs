//! WebSocket gateway to an [`AuthorityServer`](crate::server::AuthorityServer).
//!
//! One RPC connection is shared by all callers:
//!
//! ```text
//! caller ──► request(body) ──► out_tx ──► writer task ──► WebSocket
//!    ▲                                                        │
//!    └── oneshot ◄── pending[request_id] ◄── reader task ◄────┘
//! ```
//!
//! The reader marks the routing table closed in the same critical section
//! that fails the outstanding waiters, so a request either gets routed or
//! sees `Closed`. A cancelled request removes its own waiter.
//!
//! Each `subscribe` opens a dedicated connection to the listen endpoint,
//! sends `Subscribe`, waits for the `Ack`, and then forwards decoded
//! notifications into a bounded channel.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use super::{GatewayError, RemoteGateway, Subscription};
use crate::protocol::{Frame, RequestBody, Response, ResponseBody};

/// Waiters for in-flight requests on the RPC connection.
#[derive(Default)]
struct Routes {
    /// Set once the reader has stopped; no waiter is accepted afterwards
    closed: bool,
    waiters: HashMap<u64, oneshot::Sender<ResponseBody>>,
}

type SharedRoutes = Arc<Mutex<Routes>>;

fn lock_routes(routes: &Mutex<Routes>) -> MutexGuard<'_, Routes> {
    routes.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Removes a request's waiter when the request finishes or is dropped.
struct PendingRequest<'a> {
    routes: &'a Mutex<Routes>,
    request_id: u64,
}

impl Drop for PendingRequest<'_> {
    fn drop(&mut self) {
        lock_routes(self.routes).waiters.remove(&self.request_id);
    }
}

/// Outgoing channel depth for the shared RPC connection.
const OUTGOING_CAPACITY: usize = 256;

pub struct WsGateway {
    listen_url: String,
    next_request_id: AtomicU64,
    outgoing_tx: mpsc::Sender<Vec<u8>>,
    routes: SharedRoutes,
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
}

impl WsGateway {
    /// Connect the RPC channel to `remote_url`. Subscriptions connect to
    /// `listen_url` on demand.
    pub async fn connect(
        remote_url: impl Into<String>,
        listen_url: impl Into<String>,
    ) -> Result<Self, GatewayError> {
        let remote_url = remote_url.into();
        let (ws_stream, _) = tokio_tungstenite::connect_async(&remote_url)
            .await
            .map_err(|e| GatewayError::Connection(format!("{remote_url}: {e}")))?;
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        // Writer task: forward outgoing channel to WebSocket
        let (outgoing_tx, mut out_rx) = mpsc::channel::<Vec<u8>>(OUTGOING_CAPACITY);
        let writer = tokio::spawn(async move {
            while let Some(data) = out_rx.recv().await {
                if ws_writer.send(Message::Binary(data.into())).await.is_err() {
                    break;
                }
            }
            let _ = ws_writer.close().await;
        });

        // Reader task: route responses to their waiting callers
        let routes: SharedRoutes = Arc::new(Mutex::new(Routes::default()));
        let reader_routes = routes.clone();
        let reader = tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Binary(data)) => {
                        let bytes: Vec<u8> = data.into();
                        match Frame::decode(&bytes) {
                            Ok(Frame::Response(Response { request_id, body })) => {
                                let waiter = lock_routes(&reader_routes).waiters.remove(&request_id);
                                if let Some(waiter) = waiter {
                                    let _ = waiter.send(body);
                                }
                            }
                            Ok(other) => log::debug!("Ignoring unexpected frame on RPC channel: {other:?}"),
                            Err(e) => log::warn!("Failed to decode response: {e}"),
                        }
                    }
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }

            // Connection lost: fail every outstanding request and refuse new ones
            {
                let mut routes = lock_routes(&reader_routes);
                routes.closed = true;
                routes.waiters.clear();
            }
            log::warn!("Remote store connection closed");
        });

        log::info!("Connected to remote store at {remote_url}");

        Ok(Self {
            listen_url: listen_url.into(),
            next_request_id: AtomicU64::new(1),
            outgoing_tx,
            routes,
            writer,
            reader,
        })
    }

    async fn request(&self, body: RequestBody) -> Result<ResponseBody, GatewayError> {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let encoded = Frame::request(request_id, body).encode()?;

        let (tx, rx) = oneshot::channel();
        {
            let mut routes = lock_routes(&self.routes);
            if routes.closed {
                return Err(GatewayError::Closed);
            }
            routes.waiters.insert(request_id, tx);
        }
        let _pending = PendingRequest {
            routes: &self.routes,
            request_id,
        };

        if self.outgoing_tx.send(encoded).await.is_err() {
            return Err(GatewayError::Closed);
        }

        match rx.await {
            Ok(ResponseBody::Error(reason)) => Err(GatewayError::Rejected(reason)),
            Ok(body) => Ok(body),
            Err(_) => Err(GatewayError::Closed),
        }
    }

    async fn documents(&self, body: RequestBody) -> Result<Vec<(String, Vec<u8>)>, GatewayError> {
        match self.request(body).await? {
            ResponseBody::Documents(docs) => Ok(docs),
            _ => Err(GatewayError::UnexpectedResponse("documents")),
        }
    }

    pub fn listen_url(&self) -> &str {
        &self.listen_url
    }
}

impl Drop for WsGateway {
    fn drop(&mut self) {
        self.writer.abort();
        self.reader.abort();
    }
}

#[async_trait]
impl RemoteGateway for WsGateway {
    async fn get(&self, id: &str) -> Result<Option<Vec<u8>>, GatewayError> {
        match self.request(RequestBody::Get { id: id.to_string() }).await? {
            ResponseBody::Document(snapshot) => Ok(Some(snapshot)),
            ResponseBody::NotFound => Ok(None),
            _ => Err(GatewayError::UnexpectedResponse("document")),
        }
    }

    async fn upsert(&self, id: &str, change: &[u8], origin: &str) -> Result<(), GatewayError> {
        let body = RequestBody::Upsert {
            id: id.to_string(),
            change: change.to_vec(),
            origin: origin.to_string(),
        };
        match self.request(body).await? {
            ResponseBody::Ack => Ok(()),
            _ => Err(GatewayError::UnexpectedResponse("ack")),
        }
    }

    async fn get_by_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, GatewayError> {
        self.documents(RequestBody::GetByPrefix {
            prefix: prefix.to_string(),
        })
        .await
    }

    async fn get_many(&self, ids: &[String]) -> Result<Vec<(String, Vec<u8>)>, GatewayError> {
        self.documents(RequestBody::GetMany { ids: ids.to_vec() }).await
    }

    async fn get_all(&self) -> Result<Vec<(String, Vec<u8>)>, GatewayError> {
        self.documents(RequestBody::GetAll).await
    }

    async fn subscribe(&self, capacity: usize) -> Result<Subscription, GatewayError> {
        if capacity == 0 {
            return Err(GatewayError::InvalidCapacity);
        }
        let (ws_stream, _) = tokio_tungstenite::connect_async(&self.listen_url)
            .await
            .map_err(|e| GatewayError::Connection(format!("{}: {e}", self.listen_url)))?;
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let encoded = Frame::request(request_id, RequestBody::Subscribe).encode()?;
        ws_writer
            .send(Message::Binary(encoded.into()))
            .await
            .map_err(|e| GatewayError::Connection(e.to_string()))?;

        // The server acks once the feed is registered
        loop {
            match ws_reader.next().await {
                Some(Ok(Message::Binary(data))) => {
                    let bytes: Vec<u8> = data.into();
                    match Frame::decode(&bytes)? {
                        Frame::Response(Response { body: ResponseBody::Ack, .. }) => break,
                        Frame::Response(Response { body: ResponseBody::Error(reason), .. }) => {
                            return Err(GatewayError::Rejected(reason));
                        }
                        _ => return Err(GatewayError::UnexpectedResponse("subscribe ack")),
                    }
                }
                Some(Ok(Message::Close(_))) | None => return Err(GatewayError::Closed),
                Some(Err(e)) => return Err(GatewayError::Connection(e.to_string())),
                Some(Ok(_)) => {}
            }
        }

        let (tx, rx) = mpsc::channel(capacity);
        let listen_url = self.listen_url.clone();
        let task = tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Binary(data)) => {
                        let bytes: Vec<u8> = data.into();
                        match Frame::decode(&bytes) {
                            Ok(Frame::Notification(n)) => {
                                if tx.send(n).await.is_err() {
                                    break;
                                }
                            }
                            Ok(_) => {}
                            Err(e) => log::warn!("Dropping undecodable notification: {e}"),
                        }
                    }
                    Ok(Message::Ping(data)) => {
                        if ws_writer.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }
            log::debug!("Notification feed from {listen_url} ended");
        });

        Ok(Subscription::new(rx, Some(task)))
    }
}

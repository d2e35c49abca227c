//! WebSocket listener feeding the [`BroadcastHub`].
//!
//! Every connection runs in its own task. Lifecycle changes go through
//! [`HubServer::handle_connection_event`], which is the only place that
//! subscribes or unsubscribes.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{Duration, timeout};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;

use super::{BroadcastHub, Outbound, SubscriberHandle};
use crate::error::{RelayError, Result};

/// default WebSocket port of the display clients
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8004";

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// What happened on one connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// handshake completed
    Connected,
    /// text frame sent by the client
    Frame(String),
    /// closed by either side, or failed
    Disconnected,
}

/// Per-connection bookkeeping.
#[derive(Debug)]
pub struct Connection {
    peer: SocketAddr,
    handle: Option<SubscriberHandle>,
}

impl Connection {
    pub fn new(peer: SocketAddr) -> Self {
        Connection { peer, handle: None }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn handle(&self) -> Option<SubscriberHandle> {
        self.handle
    }
}

/// Accepts display clients and pushes hub output to them.
pub struct HubServer {
    hub: Arc<BroadcastHub>,
    send_timeout: Duration,
}

impl HubServer {
    pub fn new(hub: Arc<BroadcastHub>, send_timeout: Duration) -> Self {
        HubServer { hub, send_timeout }
    }

    pub fn hub(&self) -> &Arc<BroadcastHub> {
        &self.hub
    }

    /// bind the listening socket
    pub async fn bind(addr: &str) -> Result<TcpListener> {
        let listener = TcpListener::bind(addr).await.map_err(|e| RelayError::Bind {
            addr: addr.to_string(),
            reason: e.to_string(),
        })?;
        info!("Listening for display clients on {}", listener.local_addr()?);
        Ok(listener)
    }

    /// Single entry point for connection lifecycle.
    ///
    /// `Connected` subscribes and returns the outbound queue. `Disconnected`
    /// unsubscribes and may be delivered more than once.
    pub fn handle_connection_event(
        &self,
        conn: &mut Connection,
        event: ConnectionEvent,
    ) -> Option<Outbound> {
        match event {
            ConnectionEvent::Connected => {
                if let Some(old) = conn.handle.take() {
                    self.hub.unsubscribe(old);
                }
                let (handle, outbound) = self.hub.subscribe();
                info!("Display client {} connected as {handle:?}", conn.peer);
                conn.handle = Some(handle);
                Some(outbound)
            }
            ConnectionEvent::Frame(text) => {
                debug!("Ignoring frame from {}: {text}", conn.peer);
                None
            }
            ConnectionEvent::Disconnected => {
                if let Some(handle) = conn.handle.take() {
                    self.hub.unsubscribe(handle);
                    info!("Display client {} disconnected", conn.peer);
                }
                None
            }
        }
    }

    /// Accept loop. Accept errors are logged and the loop keeps going.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let server = Arc::clone(&self);
                    tokio::spawn(async move {
                        server.run_connection(stream, peer).await;
                    });
                }
                Err(e) => {
                    error!("Accept failed: {e}");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }
    }

    async fn run_connection(&self, stream: TcpStream, peer: SocketAddr) {
        let ws = match handshake(stream).await {
            Ok(ws) => ws,
            Err(e) => {
                warn!("WebSocket handshake with {peer} failed: {e}");
                return;
            }
        };
        let (mut sink, mut source) = ws.split();

        let mut conn = Connection::new(peer);
        let Some(mut outbound) = self.handle_connection_event(&mut conn, ConnectionEvent::Connected)
        else {
            return;
        };

        loop {
            tokio::select! {
                queued = outbound.recv() => {
                    let Some(text) = queued else {
                        debug!("Hub dropped {peer}");
                        break;
                    };
                    match timeout(self.send_timeout, sink.send(Message::Text(text))).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            warn!("Send to {peer} failed: {e}");
                            break;
                        }
                        Err(_) => {
                            warn!("Send to {peer} timed out after {:?}", self.send_timeout);
                            break;
                        }
                    }
                }
                frame = source.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        self.handle_connection_event(&mut conn, ConnectionEvent::Frame(text));
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("Read from {peer} failed: {e}");
                        break;
                    }
                },
            }
        }

        self.handle_connection_event(&mut conn, ConnectionEvent::Disconnected);
        match timeout(self.send_timeout, sink.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("Close for {peer} failed: {e}"),
            Err(_) => debug!("Close for {peer} timed out"),
        }
    }
}

async fn handshake(stream: TcpStream) -> Result<WebSocketStream<TcpStream>> {
    Ok(tokio_tungstenite::accept_async(stream).await?)
}

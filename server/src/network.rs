//! Server network layer: WebSocket accept loop and per-connection tasks.
//!
//! Each accepted socket gets its own task. The task owns both halves of the
//! WebSocket and a bounded outbound queue; everything the hub wants to send
//! to that connection goes through the queue, so the socket is only ever
//! written from one place.

use crate::config::ServerConfig;
use crate::hub::Hub;
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

/// Listening presence server.
pub struct Server {
    listener: TcpListener,
    hub: Arc<Hub>,
    queue_capacity: usize,
}

impl Server {
    /// Binds the listening socket. The configuration is expected to have
    /// been validated already.
    pub async fn bind(config: ServerConfig) -> io::Result<Self> {
        let listener = TcpListener::bind(&config.bind_addr).await?;
        info!("Server listening on {}", listener.local_addr()?);

        Ok(Server {
            listener,
            hub: Arc::new(Hub::new(&config)),
            queue_capacity: config.queue_capacity.max(1),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn hub(&self) -> Arc<Hub> {
        Arc::clone(&self.hub)
    }

    /// Accepts connections until the listener fails or the future is dropped.
    pub async fn run(self) -> io::Result<()> {
        loop {
            let (stream, addr) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Failed to accept connection: {}", e);
                    continue;
                }
            };

            let hub = Arc::clone(&self.hub);
            let queue_capacity = self.queue_capacity;
            tokio::spawn(async move {
                match tokio_tungstenite::accept_async(stream).await {
                    Ok(ws) => handle_connection(ws, addr, hub, queue_capacity).await,
                    Err(e) => warn!("WebSocket handshake with {} failed: {}", addr, e),
                }
            });
        }
    }
}

/// Drives one connection from registration to cleanup.
async fn handle_connection(
    ws: WebSocketStream<TcpStream>,
    addr: SocketAddr,
    hub: Arc<Hub>,
    queue_capacity: usize,
) {
    let (mut sink, mut stream) = ws.split();
    let (tx, mut rx) = mpsc::channel::<String>(queue_capacity);

    let Some(conn_id) = hub.connect(Some(addr), tx).await else {
        let _ = sink.send(Message::Close(None)).await;
        return;
    };

    loop {
        tokio::select! {
            Some(payload) = rx.recv() => {
                if let Err(e) = sink.send(Message::Text(payload.into())).await {
                    debug!("Write to connection {} failed: {}", conn_id, e);
                    break;
                }
            }

            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        hub.handle_text(conn_id, text.as_str()).await;
                    }
                    Some(Ok(Message::Binary(_))) => {
                        debug!("Ignoring binary frame from connection {}", conn_id);
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    // tungstenite answers pings itself.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error!("WebSocket error on connection {}: {}", conn_id, e);
                        break;
                    }
                }
            }
        }
    }

    hub.disconnect(conn_id).await;
    info!("Connection {} from {} closed", conn_id, addr);
}

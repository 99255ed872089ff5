//! Network Server
//!
//! TCP server accepting cluster frames from other nodes.

use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use super::read_frame;
use crate::replication::WireMessage;
use crate::error::{Error, Result};

/// Network server for cluster communication
pub struct NetworkServer {
    /// Bound listener
    listener: TcpListener,
    /// Channel for incoming messages
    incoming_tx: mpsc::Sender<(String, WireMessage)>,
    /// Shutdown signal
    shutdown: tokio::sync::watch::Sender<bool>,
}

impl NetworkServer {
    /// Bind a new network server
    pub async fn bind(
        bind_address: &str,
        incoming_tx: mpsc::Sender<(String, WireMessage)>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(bind_address).await?;
        let (shutdown_tx, _) = tokio::sync::watch::channel(false);

        Ok(Self {
            listener,
            incoming_tx,
            shutdown: shutdown_tx,
        })
    }

    /// Address the server is listening on
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until stopped
    pub async fn start(&self) -> Result<()> {
        tracing::info!("Network server listening on {}", self.local_addr()?);

        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((socket, addr)) => {
                            let peer_addr = addr.to_string();
                            let incoming_tx = self.incoming_tx.clone();

                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(socket, peer_addr.clone(), incoming_tx).await {
                                    tracing::warn!("Connection error from {}: {}", peer_addr, e);
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Network server stopped");
        Ok(())
    }

    /// Stop the server
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }
}

/// Handle a single connection
async fn handle_connection(
    socket: TcpStream,
    peer_addr: String,
    incoming_tx: mpsc::Sender<(String, WireMessage)>,
) -> Result<()> {
    let (mut reader, _writer) = socket.into_split();

    loop {
        let decoded = match read_frame(&mut reader).await {
            Ok(body) => WireMessage::decode(&body),
            Err(e) => Err(e),
        };

        match decoded {
            Ok(message) => {
                tracing::trace!("Received {} from {}", message.type_name(), peer_addr);

                // Forward to channel for async processing
                if incoming_tx.send((peer_addr.clone(), message)).await.is_err() {
                    break;
                }
            }
            Err(e) if e.is_frame_local() => {
                tracing::warn!("Discarding frame from {}: {}", peer_addr, e);
            }
            Err(Error::Io(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                // Connection closed
                break;
            }
            Err(e) => {
                tracing::warn!("Error reading message: {}", e);
                break;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::MessageId;
    use crate::network::write_message;
    use crate::replication::FrameHeader;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_malformed_frame_keeps_connection_open() {
        let (tx, mut rx) = mpsc::channel(16);
        let server = std::sync::Arc::new(NetworkServer::bind("127.0.0.1:0", tx).await.unwrap());
        let addr = server.local_addr().unwrap();
        let running = {
            let server = std::sync::Arc::clone(&server);
            tokio::spawn(async move { server.start().await })
        };

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let garbage = b"REGISTER 127.0.0.1:9000";
        stream.write_all(&FrameHeader::new(garbage).to_bytes()).await.unwrap();
        stream.write_all(garbage).await.unwrap();

        let ack = WireMessage::Ack {
            message_id: MessageId(1),
            endpoint: "s:1".into(),
        };
        write_message(&mut stream, &ack).await.unwrap();

        let (_peer, received) = rx.recv().await.unwrap();
        assert_eq!(received, ack);

        server.stop();
        running.await.unwrap().unwrap();
    }
}

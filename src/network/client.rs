//! Network Client
//!
//! One-shot TCP client: connect, send a single frame, close.

use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;

use super::write_message;
use crate::replication::{Delivery, WireMessage};
use crate::error::{Error, Result};

/// Network client for sending frames to peer nodes
#[derive(Debug, Clone)]
pub struct NetworkClient {
    /// Connect and send timeout
    connect_timeout: Duration,
}

impl NetworkClient {
    /// Create a new network client
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    /// Send one message and close the connection
    pub async fn send(&self, address: &str, message: &WireMessage) -> Result<()> {
        let mut stream = self.connect(address).await?;

        match timeout(self.connect_timeout, write_message(&mut stream, message)).await {
            Ok(result) => result,
            Err(_) => Err(Error::ConnectionTimeout(address.to_string())),
        }
    }

    /// Connect to an address
    async fn connect(&self, address: &str) -> Result<TcpStream> {
        let result = timeout(self.connect_timeout, TcpStream::connect(address)).await;

        match result {
            Ok(Ok(stream)) => {
                stream.set_nodelay(true)?;
                Ok(stream)
            }
            Ok(Err(e)) => Err(Error::ConnectionFailed {
                address: address.to_string(),
                reason: e.to_string(),
            }),
            Err(_) => Err(Error::ConnectionTimeout(address.to_string())),
        }
    }
}

#[async_trait::async_trait]
impl Delivery for NetworkClient {
    async fn deliver(&self, endpoint: &str, message: &WireMessage) -> Result<()> {
        self.send(endpoint, message).await
    }
}

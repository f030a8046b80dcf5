//! Relays queries to the one configured upstream resolver.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use anyhow::{Context as _, Result};
use dns_wire::{Query, Response};
use tokio::net::UdpSocket;

// On the public Internet, any MTU > 1500 is very unlikely so 2000 is a safe read size.
const BUF_SIZE: usize = 2000;

/// A thin client for the upstream resolver.
///
/// Each forwarded query uses its own ephemeral socket; the eventloop bounds
/// how long we wait for the reply.
#[derive(Debug, Clone)]
pub struct Upstream {
    server: SocketAddr,
}

impl Upstream {
    pub fn new(server: SocketAddr) -> Self {
        Self { server }
    }

    pub fn server(&self) -> SocketAddr {
        self.server
    }

    /// Sends `query` to the upstream resolver and returns its response.
    ///
    /// The query bytes are relayed verbatim, so the upstream's answer already
    /// carries the client's message id.
    pub async fn forward(&self, query: Query) -> Result<Response> {
        let bind_addr: SocketAddr = match self.server {
            SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };

        let socket = UdpSocket::bind(bind_addr)
            .await
            .context("Failed to bind UDP socket")?;

        socket
            .send_to(query.as_slice(), self.server)
            .await
            .context("Failed to send query upstream")?;

        let mut buffer = vec![0u8; BUF_SIZE];

        loop {
            let (len, from) = socket
                .recv_from(&mut buffer)
                .await
                .context("Failed to receive upstream response")?;

            if from != self.server {
                continue;
            }

            let response = match Response::parse(&buffer[..len]) {
                Ok(response) => response,
                Err(e) => {
                    tracing::debug!(server = %self.server, "Discarding malformed upstream datagram: {e}");
                    continue;
                }
            };

            // Stale or spoofed reply for a different transaction.
            if response.id() != query.id() {
                continue;
            }

            return Ok(response);
        }
    }
}

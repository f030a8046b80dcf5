//! The UDP listener: client queries in, finished responses out.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::task::{Context, Poll};

use anyhow::{Context as _, Result};
use dns_wire::{Query, Response};
use futures::{
    FutureExt as _, StreamExt as _,
    future::BoxFuture,
    stream::{self, BoxStream, FuturesUnordered},
};
use tokio::net::UdpSocket;

/// A DNS query received from a client, together with its return address.
pub struct Inbound {
    pub source: SocketAddr,
    pub message: Query,
}

pub struct Listener {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,

    /// Stream of datagrams read from the socket.
    inbound: BoxStream<'static, io::Result<(SocketAddr, Vec<u8>)>>,

    /// Futures that write responses back to clients.
    outbound: FuturesUnordered<BoxFuture<'static, io::Result<()>>>,
}

impl Listener {
    /// Binds `addr`; must be called within a tokio runtime.
    pub fn bind(addr: SocketAddr) -> Result<Self> {
        let socket = std::net::UdpSocket::bind(addr)
            .with_context(|| format!("Failed to bind UDP socket on {addr}"))?;
        socket
            .set_nonblocking(true)
            .context("Failed to set socket as non-blocking")?;

        let socket =
            UdpSocket::from_std(socket).context("Failed to convert std to tokio socket")?;
        let local_addr = socket
            .local_addr()
            .context("Failed to read local socket address")?;
        let socket = Arc::new(socket);

        Ok(Self {
            socket: socket.clone(),
            local_addr,
            inbound: inbound_datagrams(socket),
            outbound: FuturesUnordered::new(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Enqueues `response` for delivery to `to`.
    pub fn send_response(&mut self, to: SocketAddr, response: Response) {
        let socket = self.socket.clone();

        self.outbound.push(
            async move {
                let payload = response.into_bytes();

                socket.send_to(&payload, to).await?;

                Ok(())
            }
            .boxed(),
        );
    }

    pub fn poll(&mut self, cx: &mut Context<'_>) -> Poll<Result<Inbound>> {
        loop {
            if let Poll::Ready(Some(result)) = self.outbound.poll_next_unpin(cx) {
                // A failed send is confined to its query; the listener stays up.
                if let Err(e) = result {
                    tracing::warn!("Failed to send DNS response: {e}");
                }

                continue;
            }

            if let Poll::Ready(Some(result)) = self.inbound.poll_next_unpin(cx) {
                let (source, payload) = match result {
                    Ok(datagram) => datagram,
                    // On Linux, an ICMP port-unreachable for a previously sent
                    // datagram surfaces as ConnectionRefused on the next receive.
                    Err(e) if is_client_gone(&e) => continue,
                    Err(e) => {
                        return Poll::Ready(
                            Err(e).context("Failed to receive UDP packet"),
                        );
                    }
                };

                // A datagram that isn't a DNS query never tears down the listener.
                let message = match Query::parse(&payload) {
                    Ok(query) => query,
                    Err(e) => {
                        tracing::debug!(%source, "Ignoring datagram that is not a DNS query: {e}");
                        continue;
                    }
                };

                return Poll::Ready(Ok(Inbound { source, message }));
            }

            return Poll::Pending;
        }
    }
}

fn is_client_gone(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused | io::ErrorKind::ConnectionReset
    )
}

fn inbound_datagrams(
    socket: Arc<UdpSocket>,
) -> BoxStream<'static, io::Result<(SocketAddr, Vec<u8>)>> {
    stream::unfold(socket, |socket| async move {
        let mut buffer = vec![0u8; 2000];

        let result = socket.recv_from(&mut buffer).await.map(|(len, from)| {
            buffer.truncate(len);

            (from, buffer)
        });

        Some((result, socket))
    })
    .boxed()
}

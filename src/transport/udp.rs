//! Owned UDP transport: one socket per target.
//!
//! Simplest transport for small numbers of targets. For polling thousands of
//! targets concurrently, prefer [`SharedUdpTransport`](super::SharedUdpTransport),
//! which multiplexes many clients over a single socket.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::net::UdpSocket;

use super::{Transport, extract_request_id};
use crate::error::{Error, Result};
use crate::util::bind_ephemeral_udp_socket;

/// UDP transport connected to a single target.
///
/// Binds an ephemeral local port and `connect()`s the socket to `target`, so
/// the kernel filters out datagrams from other sources. Cheap to clone: the
/// socket is shared via `Arc`.
#[derive(Clone)]
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    target: SocketAddr,
    local_addr: SocketAddr,
}

impl UdpTransport {
    /// Bind an ephemeral socket and connect it to `target`.
    pub async fn connect(target: SocketAddr) -> Result<Self> {
        let socket = bind_ephemeral_udp_socket(target)
            .await
            .map_err(|e| Error::Io {
                target: Some(target),
                source: e,
            })?;

        socket.connect(target).await.map_err(|e| Error::Io {
            target: Some(target),
            source: e,
        })?;

        let local_addr = socket.local_addr().map_err(|e| Error::Io {
            target: Some(target),
            source: e,
        })?;

        tracing::debug!(
            snmp.target = %target,
            snmp.local_addr = %local_addr,
            "UDP transport connected"
        );

        Ok(Self {
            socket: Arc::new(socket),
            target,
            local_addr,
        })
    }
}

impl Transport for UdpTransport {
    async fn send(&self, data: &[u8]) -> Result<()> {
        tracing::trace!(
            snmp.target = %self.target,
            snmp.bytes = data.len(),
            "UDP send"
        );
        self.socket.send(data).await.map_err(|e| Error::Io {
            target: Some(self.target),
            source: e,
        })?;
        Ok(())
    }

    async fn recv(&self, request_id: i32, timeout: Duration) -> Result<(Bytes, SocketAddr)> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut buf = vec![0u8; 65535];

        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(Error::Timeout {
                    target: Some(self.target),
                    elapsed: timeout,
                    request_id,
                    retries: 0,
                });
            }

            let len = match tokio::time::timeout(remaining, self.socket.recv(&mut buf)).await {
                Ok(Ok(len)) => len,
                Ok(Err(e)) => {
                    return Err(Error::Io {
                        target: Some(self.target),
                        source: e,
                    });
                }
                Err(_) => {
                    return Err(Error::Timeout {
                        target: Some(self.target),
                        elapsed: timeout,
                        request_id,
                        retries: 0,
                    });
                }
            };

            let data = Bytes::copy_from_slice(&buf[..len]);
            match extract_request_id(&data) {
                Some(id) if id == request_id => {
                    tracing::trace!(
                        snmp.target = %self.target,
                        snmp.request_id = request_id,
                        snmp.bytes = len,
                        "UDP recv complete"
                    );
                    return Ok((data, self.target));
                }
                Some(id) => {
                    tracing::debug!(
                        snmp.target = %self.target,
                        snmp.expected_request_id = request_id,
                        snmp.actual_request_id = id,
                        "discarding stale UDP response"
                    );
                }
                None => {
                    tracing::debug!(
                        snmp.target = %self.target,
                        len,
                        "discarding malformed UDP response"
                    );
                }
            }
        }
    }

    fn peer_addr(&self) -> SocketAddr {
        self.target
    }

    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    fn is_stream(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_sets_target_and_local_addr() {
        let target: SocketAddr = "127.0.0.1:16100".parse().unwrap();
        let transport = UdpTransport::connect(target).await.unwrap();
        assert_eq!(transport.peer_addr(), target);
        assert!(transport.local_addr().port() != 0);
    }

    #[tokio::test]
    async fn test_send_recv_roundtrip() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server.local_addr().unwrap();

        let transport = UdpTransport::connect(server_addr).await.unwrap();

        let request = crate::message::Message::V2c {
            community: Bytes::from_static(b"public"),
            pdu: crate::pdu::Pdu::new(crate::pdu::PduType::GetRequest, 42, vec![]),
        };
        transport.send(&request.encode()).await.unwrap();

        let mut buf = vec![0u8; 1024];
        let (len, client_addr) = server.recv_from(&mut buf).await.unwrap();
        server.send_to(&buf[..len], client_addr).await.unwrap();

        let (data, from) = transport
            .recv(42, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(from, server_addr);
        assert_eq!(&data[..], &buf[..len]);
    }

    #[tokio::test]
    async fn test_recv_times_out() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server.local_addr().unwrap();
        let transport = UdpTransport::connect(server_addr).await.unwrap();

        let result = transport.recv(1, Duration::from_millis(50)).await;
        assert!(matches!(result, Err(Error::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_recv_discards_mismatched_request_id() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server.local_addr().unwrap();
        let transport = UdpTransport::connect(server_addr).await.unwrap();

        transport.send(b"ping").await.unwrap();
        let mut buf = vec![0u8; 1024];
        let (len, client_addr) = server.recv_from(&mut buf).await.unwrap();
        let _ = len;

        // Respond with a message carrying the wrong request_id, then the right one.
        let wrong = crate::message::Message::V2c {
            community: Bytes::from_static(b"public"),
            pdu: crate::pdu::Pdu::new(crate::pdu::PduType::Response, 99, vec![]),
        };
        server.send_to(&wrong.encode(), client_addr).await.unwrap();

        let right = crate::message::Message::V2c {
            community: Bytes::from_static(b"public"),
            pdu: crate::pdu::Pdu::new(crate::pdu::PduType::Response, 7, vec![]),
        };
        server.send_to(&right.encode(), client_addr).await.unwrap();

        let (data, _) = transport.recv(7, Duration::from_secs(1)).await.unwrap();
        let decoded = crate::message::Message::decode(data).unwrap();
        assert_eq!(decoded.pdu().unwrap().request_id, 7);
    }
}

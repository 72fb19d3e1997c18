//! UDP transport for the agent's listener side.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;

use super::AgentTransport;
use crate::error::{Error, Result};
use crate::util::bind_udp_socket;

/// UDP socket bound to a fixed local address, answering requests from any
/// peer.
///
/// Unlike [`UdpTransport`](super::UdpTransport), this never calls `connect()`:
/// an agent must accept datagrams from whichever manager happens to poll it.
#[derive(Clone)]
pub struct UdpAgentTransport {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
}

impl UdpAgentTransport {
    /// Bind a UDP socket at `addr`.
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let socket = bind_udp_socket(addr).await.map_err(|e| Error::Io {
            target: Some(addr),
            source: e,
        })?;
        let local_addr = socket.local_addr().map_err(|e| Error::Io {
            target: Some(addr),
            source: e,
        })?;

        tracing::debug!(snmp.local_addr = %local_addr, "agent UDP transport bound");

        Ok(Self {
            socket: Arc::new(socket),
            local_addr,
        })
    }
}

impl AgentTransport for UdpAgentTransport {
    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
        self.socket.recv_from(buf).await.map_err(|e| Error::Io {
            target: None,
            source: e,
        })
    }

    async fn send_to(&self, data: &[u8], target: SocketAddr) -> Result<()> {
        tracing::trace!(snmp.target = %target, snmp.bytes = data.len(), "agent UDP send");
        self.socket
            .send_to(data, target)
            .await
            .map_err(|e| Error::Io {
                target: Some(target),
                source: e,
            })?;
        Ok(())
    }

    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

//! TCP transport (RFC 3430): BER messages are self-delimiting, so framing
//! is just "read a tag, read a length, read that many body bytes".

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use super::extract_request_id;
use crate::ber::decode_length;
use crate::error::{DecodeErrorKind, Error, Result};

/// Maximum number of additional length octets we'll read before giving up
/// on a malformed header (BER caps this at `size_of::<usize>()`).
const MAX_LENGTH_OCTETS: usize = 8;

/// TCP transport connected to a single target.
///
/// A single stream is shared between `send` and `recv`; both lock it for the
/// duration of their I/O. Since TCP delivers in order, the client does not
/// retry on timeout (a timeout on a TCP transport usually means the peer is
/// unresponsive, not that the datagram was lost).
#[derive(Clone)]
pub struct TcpTransport {
    stream: Arc<Mutex<TcpStream>>,
    target: SocketAddr,
    local_addr: SocketAddr,
}

impl TcpTransport {
    /// Connect to `target`.
    pub async fn connect(target: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(target).await.map_err(|e| Error::Io {
            target: Some(target),
            source: e,
        })?;

        let local_addr = stream.local_addr().map_err(|e| Error::Io {
            target: Some(target),
            source: e,
        })?;

        tracing::debug!(
            snmp.target = %target,
            snmp.local_addr = %local_addr,
            "TCP transport connected"
        );

        Ok(Self {
            stream: Arc::new(Mutex::new(stream)),
            target,
            local_addr,
        })
    }

    /// Read one complete BER TLV from the stream.
    async fn read_message(stream: &mut TcpStream, target: SocketAddr) -> Result<Bytes> {
        let io_err = |e: std::io::Error| Error::Io {
            target: Some(target),
            source: e,
        };

        let mut header = [0u8; 2];
        stream.read_exact(&mut header).await.map_err(io_err)?;

        let mut frame = BytesMut::from(&header[..]);

        let body_len = if header[1] & 0x80 == 0 {
            header[1] as usize
        } else {
            let num_octets = (header[1] & 0x7F) as usize;
            if num_octets == 0 || num_octets > MAX_LENGTH_OCTETS {
                return Err(Error::decode(0, DecodeErrorKind::IndefiniteLength));
            }
            let mut rest = vec![0u8; num_octets];
            stream.read_exact(&mut rest).await.map_err(io_err)?;
            frame.extend_from_slice(&rest);
            let (len, _consumed) = decode_length(&frame[1..], 0)?;
            len
        };

        let mut body = vec![0u8; body_len];
        stream.read_exact(&mut body).await.map_err(io_err)?;
        frame.extend_from_slice(&body);

        Ok(frame.freeze())
    }
}

impl super::Transport for TcpTransport {
    async fn send(&self, data: &[u8]) -> Result<()> {
        tracing::trace!(
            snmp.target = %self.target,
            snmp.bytes = data.len(),
            "TCP send"
        );
        let mut stream = self.stream.lock().await;
        stream.write_all(data).await.map_err(|e| Error::Io {
            target: Some(self.target),
            source: e,
        })?;
        Ok(())
    }

    async fn recv(&self, request_id: i32, timeout: Duration) -> Result<(Bytes, SocketAddr)> {
        let mut stream = self.stream.lock().await;
        let deadline = tokio::time::Instant::now() + timeout;

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

            let data = match tokio::time::timeout(
                remaining,
                Self::read_message(&mut stream, self.target),
            )
            .await
            {
                Ok(Ok(data)) => data,
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    return Err(Error::Timeout {
                        target: Some(self.target),
                        elapsed: timeout,
                        request_id,
                        retries: 0,
                    });
                }
            };

            match extract_request_id(&data) {
                Some(id) if id == request_id => {
                    tracing::trace!(
                        snmp.target = %self.target,
                        snmp.request_id = request_id,
                        snmp.bytes = data.len(),
                        "TCP recv complete"
                    );
                    return Ok((data, self.target));
                }
                Some(id) => {
                    tracing::debug!(
                        snmp.target = %self.target,
                        snmp.expected_request_id = request_id,
                        snmp.actual_request_id = id,
                        "discarding stale TCP response"
                    );
                }
                None => {
                    tracing::debug!(snmp.target = %self.target, "discarding malformed TCP response");
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
        true
    }
}

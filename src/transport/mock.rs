//! In-memory transport for unit tests.
//!
//! [`MockTransport`] queues canned responses (or timeouts) instead of talking
//! to a socket, and [`ResponseBuilder`] assembles the BER-encoded response
//! bytes those queues hold.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;

use super::Transport;
use crate::error::{Error, Result};
use crate::message::Message;
use crate::oid::Oid;
use crate::pdu::{Pdu, PduType};
use crate::value::Value;
use crate::varbind::VarBind;

enum Queued {
    Response(Bytes),
    Timeout,
}

/// A transport that returns pre-queued responses instead of performing I/O.
///
/// Requests sent via [`Transport::send`] are recorded but otherwise ignored;
/// [`Transport::recv`] pops the next queued item in FIFO order.
#[derive(Clone)]
pub struct MockTransport {
    target: SocketAddr,
    local_addr: SocketAddr,
    queue: Arc<Mutex<VecDeque<Queued>>>,
    sent: Arc<Mutex<Vec<Bytes>>>,
}

impl MockTransport {
    /// Create a mock transport reporting `target` as its peer address.
    pub fn new(target: SocketAddr) -> Self {
        Self {
            target,
            local_addr: "127.0.0.1:0".parse().unwrap(),
            queue: Arc::new(Mutex::new(VecDeque::new())),
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Queue a response to be returned by the next `recv` call.
    pub fn queue_response(&mut self, data: Bytes) {
        self.queue.lock().unwrap().push_back(Queued::Response(data));
    }

    /// Queue a timeout to be returned by the next `recv` call.
    pub fn queue_timeout(&mut self) {
        self.queue.lock().unwrap().push_back(Queued::Timeout);
    }

    /// Requests recorded so far, in send order.
    pub fn sent_requests(&self) -> Vec<Bytes> {
        self.sent.lock().unwrap().clone()
    }
}

impl Transport for MockTransport {
    async fn send(&self, data: &[u8]) -> Result<()> {
        self.sent.lock().unwrap().push(Bytes::copy_from_slice(data));
        Ok(())
    }

    async fn recv(&self, request_id: i32, timeout: Duration) -> Result<(Bytes, SocketAddr)> {
        match self.queue.lock().unwrap().pop_front() {
            Some(Queued::Response(data)) => Ok((data, self.target)),
            Some(Queued::Timeout) | None => Err(Error::Timeout {
                target: Some(self.target),
                elapsed: timeout,
                request_id,
                retries: 0,
            }),
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

/// Assembles a GetResponse PDU and wraps it in an encoded message.
///
/// ```
/// # use rsnmp::transport::ResponseBuilder;
/// # use rsnmp::{Oid, Value};
/// let response = ResponseBuilder::new(1)
///     .varbind(Oid::from_slice(&[1, 3, 6, 1, 2, 1, 1, 1, 0]), Value::OctetString("test".into()))
///     .build_v2c(b"public");
/// ```
pub struct ResponseBuilder {
    request_id: i32,
    pdu_type: PduType,
    varbinds: Vec<VarBind>,
    error_status: i32,
    error_index: i32,
}

impl ResponseBuilder {
    /// Start building a GetResponse for `request_id`.
    pub fn new(request_id: i32) -> Self {
        Self {
            request_id,
            pdu_type: PduType::Response,
            varbinds: Vec::new(),
            error_status: 0,
            error_index: 0,
        }
    }

    /// Append a varbind.
    pub fn varbind(mut self, oid: Oid, value: Value) -> Self {
        self.varbinds.push(VarBind::new(oid, value));
        self
    }

    /// Set `error-status`/`error-index` (RFC 1157 §4.1.1).
    pub fn error(mut self, status: i32, index: i32) -> Self {
        self.error_status = status;
        self.error_index = index;
        self
    }

    /// Override the PDU type (default is `GetResponse`); useful for building
    /// Report PDUs in USM error-path tests.
    pub fn pdu_type(mut self, pdu_type: PduType) -> Self {
        self.pdu_type = pdu_type;
        self
    }

    fn build_pdu(self) -> Pdu {
        let mut pdu = Pdu::new(self.pdu_type, self.request_id, self.varbinds);
        pdu.error_status = self.error_status;
        pdu.error_index = self.error_index;
        pdu
    }

    /// Encode as an SNMPv1 message.
    pub fn build_v1(self, community: &[u8]) -> Bytes {
        let pdu = self.build_pdu();
        Message::V1 {
            community: Bytes::copy_from_slice(community),
            pdu,
        }
        .encode()
    }

    /// Encode as an SNMPv2c message.
    pub fn build_v2c(self, community: &[u8]) -> Bytes {
        let pdu = self.build_pdu();
        Message::V2c {
            community: Bytes::copy_from_slice(community),
            pdu,
        }
        .encode()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_transport_returns_queued_response() {
        let mut mock = MockTransport::new("127.0.0.1:161".parse().unwrap());
        mock.queue_response(
            ResponseBuilder::new(1)
                .varbind(Oid::from_slice(&[1, 3, 6, 1, 2, 1, 1, 1, 0]), Value::Integer(7))
                .build_v2c(b"public"),
        );

        let (data, _) = mock.recv(1, Duration::from_secs(1)).await.unwrap();
        let message = Message::decode(data).unwrap();
        assert_eq!(message.pdu().unwrap().request_id, 1);
    }

    #[tokio::test]
    async fn test_mock_transport_returns_queued_timeout() {
        let mut mock = MockTransport::new("127.0.0.1:161".parse().unwrap());
        mock.queue_timeout();
        let result = mock.recv(1, Duration::from_millis(10)).await;
        assert!(matches!(result, Err(Error::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_mock_transport_empty_queue_times_out() {
        let mock = MockTransport::new("127.0.0.1:161".parse().unwrap());
        let result = mock.recv(1, Duration::from_millis(10)).await;
        assert!(matches!(result, Err(Error::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_mock_transport_records_sent_requests() {
        let mock = MockTransport::new("127.0.0.1:161".parse().unwrap());
        mock.send(b"hello").await.unwrap();
        assert_eq!(mock.sent_requests(), vec![Bytes::from_static(b"hello")]);
    }
}

//! End-to-end tests driving a real [`rsnmp::agent::Agent`] over loopback UDP
//! with a real [`rsnmp::Client`], covering the GET/GETNEXT/WALK/SET scenarios.

mod common;

use std::pin::Pin;
use std::sync::Mutex;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use rsnmp::agent::{Agent, CommunityAccess};
use rsnmp::handler::{BoxFuture, GetNextResult, GetResult, MibHandler, OidTable, RequestContext, SetResult};
use rsnmp::transport::UdpAgentTransport;
use rsnmp::value::Value;
use rsnmp::{Client, Oid};

use common::{collect_stream, nonexistent_oid, sys_contact, sys_descr, sys_name, system_subtree, COMMUNITY_RO, COMMUNITY_RW};

/// A writable system-group handler backed by an `OidTable`, mirroring the
/// `StaticHandler` fixtures used throughout the unit tests but with
/// `test_set`/`commit_set` wired up so SET has something real to exercise.
struct SystemHandler {
    table: Mutex<OidTable<Value>>,
}

impl SystemHandler {
    fn new() -> Self {
        let mut table = OidTable::new();
        table.insert(sys_descr(), Value::OctetString("rsnmp test agent".into()));
        table.insert(sys_name(), Value::OctetString("agent1".into()));
        table.insert(sys_contact(), Value::OctetString("ops@example.com".into()));
        Self {
            table: Mutex::new(table),
        }
    }
}

impl MibHandler for SystemHandler {
    fn get<'a>(&'a self, _ctx: &'a RequestContext, oid: &'a Oid) -> BoxFuture<'a, GetResult> {
        Box::pin(async move {
            self.table
                .lock()
                .unwrap()
                .get(oid)
                .cloned()
                .map(GetResult::Value)
                .unwrap_or(GetResult::NoSuchObject)
        })
    }

    fn get_next<'a>(&'a self, _ctx: &'a RequestContext, oid: &'a Oid) -> BoxFuture<'a, GetNextResult> {
        Box::pin(async move {
            self.table
                .lock()
                .unwrap()
                .get_next(oid)
                .map(|(o, v)| rsnmp::VarBind::new(o.clone(), v.clone()))
                .map(GetNextResult::Value)
                .unwrap_or(GetNextResult::EndOfMibView)
        })
    }

    fn test_set<'a>(
        &'a self,
        _ctx: &'a RequestContext,
        oid: &'a Oid,
        value: &'a Value,
    ) -> BoxFuture<'a, SetResult> {
        Box::pin(async move {
            if !matches!(value, Value::OctetString(_)) {
                return SetResult::WrongType;
            }
            if self.table.lock().unwrap().get(oid).is_some() {
                SetResult::Ok
            } else {
                SetResult::NotWritable
            }
        })
    }

    fn commit_set<'a>(
        &'a self,
        _ctx: &'a RequestContext,
        oid: &'a Oid,
        value: &'a Value,
    ) -> BoxFuture<'a, SetResult> {
        Box::pin(async move {
            let mut table = self.table.lock().unwrap();
            if table.get(oid).is_some() {
                table.insert(oid.clone(), value.clone());
                SetResult::Ok
            } else {
                SetResult::NotWritable
            }
        })
    }
}

async fn spawn_test_agent() -> (std::net::SocketAddr, CancellationToken, tokio::task::JoinHandle<rsnmp::Result<()>>) {
    let agent = Agent::builder()
        .community(CommunityAccess::Read, COMMUNITY_RO)
        .community(CommunityAccess::Write, COMMUNITY_RW)
        .handler(system_subtree(), SystemHandler::new())
        .build()
        .unwrap();

    let transport = UdpAgentTransport::bind("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let addr = transport.local_addr();
    let shutdown = CancellationToken::new();
    let shutdown_clone = shutdown.clone();
    let handle = tokio::spawn(async move { agent.serve(transport, shutdown_clone).await });
    (addr, shutdown, handle)
}

#[tokio::test]
async fn get_returns_value_from_live_agent() {
    let (addr, shutdown, handle) = spawn_test_agent().await;

    let client = Client::v2c(addr.to_string())
        .community(COMMUNITY_RO)
        .timeout(Duration::from_millis(500))
        .connect()
        .await
        .unwrap();

    let result = client.get(&[sys_descr()]).await.unwrap();
    assert_eq!(
        result[0].value,
        Value::OctetString("rsnmp test agent".into())
    );

    shutdown.cancel();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn get_missing_oid_is_no_such_object() {
    let (addr, shutdown, handle) = spawn_test_agent().await;

    let client = Client::v2c(addr.to_string())
        .community(COMMUNITY_RO)
        .timeout(Duration::from_millis(500))
        .connect()
        .await
        .unwrap();

    let result = client.get(&[nonexistent_oid()]).await.unwrap();
    assert_eq!(result[0].value, Value::NoSuchObject);

    shutdown.cancel();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn walk_streams_the_whole_system_subtree() {
    let (addr, shutdown, handle) = spawn_test_agent().await;

    let client = Client::v2c(addr.to_string())
        .community(COMMUNITY_RO)
        .timeout(Duration::from_millis(500))
        .connect()
        .await
        .unwrap();

    let mut walk = client.walk(system_subtree());
    let results = collect_stream(Pin::new(&mut walk), 10).await;
    let varbinds: Vec<_> = results.into_iter().collect::<Result<Vec<_>, _>>().unwrap();

    assert_eq!(varbinds.len(), 3);
    assert!(varbinds.iter().any(|vb| vb.oid == sys_descr()));
    assert!(varbinds.iter().any(|vb| vb.oid == sys_name()));
    assert!(varbinds.iter().any(|vb| vb.oid == sys_contact()));

    shutdown.cancel();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn set_with_read_only_community_is_rejected() {
    let (addr, shutdown, handle) = spawn_test_agent().await;

    let client = Client::v2c(addr.to_string())
        .community(COMMUNITY_RO)
        .timeout(Duration::from_millis(500))
        .connect()
        .await
        .unwrap();

    let err = client
        .set(vec![rsnmp::VarBind::new(
            sys_name(),
            Value::OctetString("new-name".into()),
        )])
        .await
        .unwrap_err();
    assert!(matches!(err, rsnmp::Error::Snmp { .. }));

    shutdown.cancel();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn set_with_write_community_persists_and_is_visible_to_get() {
    let (addr, shutdown, handle) = spawn_test_agent().await;

    let client = Client::v2c(addr.to_string())
        .community(COMMUNITY_RW)
        .timeout(Duration::from_millis(500))
        .connect()
        .await
        .unwrap();

    client
        .set(vec![rsnmp::VarBind::new(
            sys_name(),
            Value::OctetString("renamed-agent".into()),
        )])
        .await
        .unwrap();

    let result = client.get(&[sys_name()]).await.unwrap();
    assert_eq!(
        result[0].value,
        Value::OctetString("renamed-agent".into())
    );

    shutdown.cancel();
    handle.await.unwrap().unwrap();
}

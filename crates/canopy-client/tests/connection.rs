//! Connection state machine tests against an in-memory server.
//!
//! Each connect hands the far end of a `tokio::io::duplex` pipe to the test,
//! which plays the server by reading and writing protocol lines.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use canopy_archive::{SharedArchive, shared_archive};
use canopy_client::{
    BoxedStream, ClientConfig, ClientError, ConnectionStatus, Connector, NetClient, quit,
    spawn_supervisor,
};
use canopy_types::{Message, MetaKey, PresenceHere, ProtocolMessage, Welcome};
use futures::future::BoxFuture;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};

// ============================================================================
// Harness
// ============================================================================

struct Server {
    lines: FramedRead<ReadHalf<DuplexStream>, LinesCodec>,
    sink: FramedWrite<WriteHalf<DuplexStream>, LinesCodec>,
}

impl Server {
    fn new(stream: DuplexStream) -> Self {
        let (read, write) = tokio::io::split(stream);
        Self {
            lines: FramedRead::new(read, LinesCodec::new()),
            sink: FramedWrite::new(write, LinesCodec::new()),
        }
    }

    async fn recv(&mut self) -> ProtocolMessage {
        let line = timeout(Duration::from_secs(120), self.lines.next())
            .await
            .expect("timed out waiting for client")
            .expect("client closed the stream")
            .expect("bad frame");
        ProtocolMessage::from_line(&line).unwrap()
    }

    async fn send(&mut self, message: ProtocolMessage) {
        self.sink.send(message.to_line().unwrap()).await.unwrap();
    }

    async fn send_raw(&mut self, line: &str) {
        self.sink.send(line.to_string()).await.unwrap();
    }
}

/// A connector that always succeeds and forwards server ends to the test.
fn duplex_connector() -> (Connector, mpsc::UnboundedReceiver<DuplexStream>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let connector: Connector = Arc::new(move |_address: String| -> BoxFuture<'static, io::Result<BoxedStream>> {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let _ = tx.send(server);
        Box::pin(async move { Ok::<BoxedStream, io::Error>(Box::new(client)) })
    });
    (connector, rx)
}

fn config() -> ClientConfig {
    ClientConfig::new("test-server:7777", "tester").unwrap()
}

fn msg(id: &str, parent: &str, timestamp: i64) -> Message {
    Message {
        id: id.into(),
        parent: parent.into(),
        content: format!("content of {id}"),
        author: "someone".into(),
        timestamp,
    }
}

fn archive_with_root() -> SharedArchive {
    let archive = shared_archive();
    archive.write().add(msg("r", "", 1)).unwrap();
    archive
}

async fn connected(archive: SharedArchive) -> (NetClient, Server, mpsc::UnboundedReceiver<DuplexStream>) {
    let _ = env_logger::builder().is_test(true).try_init();
    let client = NetClient::new(config(), archive);
    let (connector, mut servers) = duplex_connector();
    client.set_connector(connector);
    client.connect().await.unwrap();
    let server = Server::new(servers.recv().await.unwrap());
    (client, server, servers)
}

async fn wait_for_status(client: &NetClient, wanted: ConnectionStatus) {
    let mut status = client.status();
    timeout(Duration::from_secs(120), status.wait_for(|s| *s == wanted))
        .await
        .expect("timed out waiting for status")
        .unwrap();
}

// ============================================================================
// Connect / Disconnect
// ============================================================================

#[tokio::test]
async fn test_disconnect_handler_fires_once() {
    let client = NetClient::new(config(), shared_archive());
    let (connector, _servers) = duplex_connector();
    client.set_connector(connector);

    let (tx, mut fired) = mpsc::unbounded_channel();
    client.on_disconnect(move || {
        let _ = tx.send(());
    });

    client.connect().await.unwrap();
    client.disconnect().unwrap();
    client.connect().await.unwrap();

    timeout(Duration::from_secs(5), fired.recv())
        .await
        .expect("disconnect handler never ran")
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(fired.try_recv().is_err(), "disconnect handler ran twice");
    assert_eq!(*client.status().borrow(), ConnectionStatus::Connected);
}

#[tokio::test]
async fn test_connect_state_errors() {
    let (client, _server, _servers) = connected(shared_archive()).await;
    assert!(matches!(
        client.connect().await,
        Err(ClientError::AlreadyConnected)
    ));

    client.disconnect().unwrap();
    assert!(matches!(client.disconnect(), Err(ClientError::NotConnected)));
}

#[tokio::test]
async fn test_connect_failure_leaves_disconnected() {
    let client = NetClient::new(config(), shared_archive());
    client.set_connector(Arc::new(|_: String| -> BoxFuture<'static, io::Result<BoxedStream>> {
        Box::pin(async {
            Err::<BoxedStream, io::Error>(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"))
        })
    }));

    assert!(matches!(client.connect().await, Err(ClientError::Connect(_))));
    assert_eq!(*client.status().borrow(), ConnectionStatus::Disconnected);
}

#[tokio::test]
async fn test_server_close_disconnects() {
    let (client, server, _servers) = connected(shared_archive()).await;
    drop(server);
    wait_for_status(&client, ConnectionStatus::Disconnected).await;
}

#[tokio::test]
async fn test_decode_error_disconnects() {
    let (client, mut server, _servers) = connected(shared_archive()).await;
    server.send_raw(r#"{"Type":42}"#).await;
    wait_for_status(&client, ConnectionStatus::Disconnected).await;
}

// ============================================================================
// Dispatch
// ============================================================================

#[tokio::test]
async fn test_welcome_queries_root_and_missing_recent() {
    let archive = shared_archive();
    archive.write().add(msg("a", "", 1)).unwrap();
    let (_client, mut server, _servers) = connected(archive).await;

    server
        .send(ProtocolMessage::Welcome(Welcome {
            root: "r".into(),
            recent: vec!["a".into(), "b".into()],
            major: 0,
            minor: 1,
        }))
        .await;

    assert_eq!(server.recv().await, ProtocolMessage::query("r"));
    assert_eq!(server.recv().await, ProtocolMessage::query("b"));
}

#[tokio::test]
async fn test_new_message_stored_forwarded_and_parent_queried() {
    let archive = shared_archive();
    let (client, mut server, _servers) = connected(archive.clone()).await;
    let (tx, mut received) = mpsc::unbounded_channel();
    client.on_receive(move |m| {
        let _ = tx.send(m);
    });

    let orphan = msg("m", "p", 10);
    server.send(ProtocolMessage::NewMessage(orphan.clone())).await;

    assert_eq!(received.recv().await.unwrap(), orphan);
    assert!(archive.read().has("m"));
    assert_eq!(server.recv().await, ProtocolMessage::query("p"));

    // A re-delivery is not forwarded again; the next new message is.
    server.send(ProtocolMessage::NewMessage(orphan)).await;
    let child = msg("n", "m", 11);
    server.send(ProtocolMessage::NewMessage(child.clone())).await;
    assert_eq!(received.recv().await.unwrap(), child);
}

#[tokio::test]
async fn test_presence_tracking_and_who() {
    let (client, mut server, _servers) = connected(shared_archive()).await;

    server
        .send(ProtocolMessage::meta(MetaKey::PresenceHere, "alice;s1;100"))
        .await;
    server.send(ProtocolMessage::meta(MetaKey::PresenceWho, "")).await;

    let ProtocolMessage::Meta(reply) = server.recv().await else {
        panic!("expected META reply to presence/who");
    };
    let here = PresenceHere::parse(&reply[MetaKey::PresenceHere.as_ref()]).unwrap();
    assert_eq!(here.username, "tester");
    assert_eq!(here.session_id, client.session_id());

    let active = client.active_sessions();
    assert_eq!(active["alice"].id, "s1");
    assert_eq!(active["alice"].last_seen, 100);

    server
        .send(ProtocolMessage::meta(MetaKey::PresenceLeave, "alice;s1"))
        .await;
    server.send(ProtocolMessage::meta(MetaKey::PresenceWho, "")).await;
    server.recv().await;
    assert!(client.active_sessions().is_empty());
}

#[tokio::test]
async fn test_unknown_meta_is_ignored() {
    let (client, mut server, _servers) = connected(shared_archive()).await;
    server.send_raw(r#"{"Type":3,"Meta":{"weather/today":"rain"}}"#).await;
    server.send(ProtocolMessage::meta(MetaKey::PresenceWho, "")).await;
    assert!(matches!(server.recv().await, ProtocolMessage::Meta(_)));
    assert_eq!(*client.status().borrow(), ConnectionStatus::Connected);
}

#[tokio::test]
async fn test_queue_survives_reconnect() {
    let client = NetClient::new(config(), shared_archive());
    let (connector, mut servers) = duplex_connector();
    client.set_connector(connector);

    let sent = client.composer().reply("parent", "written offline").unwrap();

    client.connect().await.unwrap();
    let mut server = Server::new(servers.recv().await.unwrap());
    assert_eq!(server.recv().await, ProtocolMessage::NewMessage(sent));
}

#[tokio::test]
async fn test_records_composed_after_disconnect_go_to_next_connection() {
    let client = NetClient::new(config(), shared_archive());
    let (connector, mut servers) = duplex_connector();
    client.set_connector(connector);

    client.connect().await.unwrap();
    let mut server = Server::new(servers.recv().await.unwrap());
    for round in 0..20 {
        client.disconnect().unwrap();
        let composer = client.composer();
        for i in 0..20 {
            composer.query(&format!("q{round}-{i}")).unwrap();
        }
        tokio::task::yield_now().await;

        client.connect().await.unwrap();
        let stale = server;
        server = Server::new(servers.recv().await.unwrap());
        for i in 0..20 {
            assert_eq!(
                server.recv().await,
                ProtocolMessage::query(format!("q{round}-{i}")),
                "round {round}"
            );
        }
        drop(stale);
    }
}

#[tokio::test]
async fn test_quit_sends_goodbye() {
    let (client, mut server, _servers) = connected(archive_with_root()).await;
    quit(&client).await;

    let ProtocolMessage::NewMessage(goodbye) = server.recv().await else {
        panic!("expected quit message");
    };
    assert_eq!(goodbye.parent, "r");
    assert_eq!(goodbye.content, "[quit]");

    let ProtocolMessage::Meta(leave) = server.recv().await else {
        panic!("expected presence/leave");
    };
    assert_eq!(
        leave[MetaKey::PresenceLeave.as_ref()],
        format!("tester;{}", client.session_id())
    );
}

// ============================================================================
// Write Errors
// ============================================================================

/// Never yields a byte; fails every write and counts the attempts.
struct FailWrites {
    writes: Arc<AtomicUsize>,
}

impl AsyncRead for FailWrites {
    fn poll_read(self: Pin<&mut Self>, _: &mut Context<'_>, _: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        Poll::Pending
    }
}

impl AsyncWrite for FailWrites {
    fn poll_write(self: Pin<&mut Self>, _: &mut Context<'_>, _: &[u8]) -> Poll<io::Result<usize>> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "broken pipe")))
    }

    fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[tokio::test]
async fn test_write_error_disconnects_once_without_retry() {
    let writes = Arc::new(AtomicUsize::new(0));
    let client = NetClient::new(config(), shared_archive());
    client.set_connector({
        let writes = Arc::clone(&writes);
        Arc::new(move |_: String| -> BoxFuture<'static, io::Result<BoxedStream>> {
            let stream = FailWrites {
                writes: Arc::clone(&writes),
            };
            Box::pin(async move { Ok::<BoxedStream, io::Error>(Box::new(stream)) })
        })
    });
    let fired = Arc::new(AtomicUsize::new(0));
    client.on_disconnect({
        let fired = Arc::clone(&fired);
        move || {
            fired.fetch_add(1, Ordering::SeqCst);
        }
    });

    client.connect().await.unwrap();
    let composer = client.composer();
    composer.query("first").unwrap();
    composer.query("second").unwrap();
    wait_for_status(&client, ConnectionStatus::Disconnected).await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert_eq!(writes.load(Ordering::SeqCst), 1);
    assert!(matches!(client.disconnect(), Err(ClientError::NotConnected)));
}

#[test]
fn test_disconnect_outside_runtime_runs_handler_inline() {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let client = NetClient::new(config(), shared_archive());
    let (connector, mut servers) = duplex_connector();
    client.set_connector(connector);
    let fired = Arc::new(AtomicUsize::new(0));
    client.on_disconnect({
        let fired = Arc::clone(&fired);
        move || {
            fired.fetch_add(1, Ordering::SeqCst);
        }
    });

    runtime.block_on(client.connect()).unwrap();
    let _server = runtime.block_on(servers.recv()).unwrap();

    client.disconnect().unwrap();
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert_eq!(*client.status().borrow(), ConnectionStatus::Disconnected);
}

// ============================================================================
// Liveness Watchdog
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_watchdog_pings_then_disconnects() {
    let (client, mut server, _servers) = connected(archive_with_root()).await;
    let start = tokio::time::Instant::now();

    assert_eq!(server.recv().await, ProtocolMessage::query("r"));
    assert!(start.elapsed() >= Duration::from_secs(30));

    wait_for_status(&client, ConnectionStatus::Disconnected).await;
    assert!(start.elapsed() >= Duration::from_secs(60));
}

#[tokio::test(start_paused = true)]
async fn test_traffic_resets_watchdog() {
    let (client, mut server, _servers) = connected(archive_with_root()).await;
    let start = tokio::time::Instant::now();

    tokio::time::sleep(Duration::from_secs(20)).await;
    server
        .send(ProtocolMessage::NewMessage(msg("fresh", "r", 2)))
        .await;

    tokio::time::sleep(Duration::from_secs(25)).await;
    assert_eq!(*client.status().borrow(), ConnectionStatus::Connected);

    assert_eq!(server.recv().await, ProtocolMessage::query("r"));
    assert!(start.elapsed() >= Duration::from_secs(50));

    wait_for_status(&client, ConnectionStatus::Disconnected).await;
    assert!(start.elapsed() >= Duration::from_secs(80));
}

#[tokio::test(start_paused = true)]
async fn test_shortened_liveness_interval() {
    let client = NetClient::new(
        config().with_liveness_interval(Duration::from_secs(1)),
        archive_with_root(),
    );
    let (connector, mut servers) = duplex_connector();
    client.set_connector(connector);
    client.connect().await.unwrap();
    let _server = Server::new(servers.recv().await.unwrap());

    let start = tokio::time::Instant::now();
    wait_for_status(&client, ConnectionStatus::Disconnected).await;
    assert!(start.elapsed() < Duration::from_secs(30));
}

// ============================================================================
// Supervisor
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_supervisor_retries_and_reconnects() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let (tx, mut servers) = mpsc::unbounded_channel();
    let connector: Connector = {
        let attempts = Arc::clone(&attempts);
        Arc::new(move |_: String| -> BoxFuture<'static, io::Result<BoxedStream>> {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            let result = if n == 0 {
                Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"))
            } else {
                let (client, server) = tokio::io::duplex(64 * 1024);
                let _ = tx.send(server);
                Ok(Box::new(client) as BoxedStream)
            };
            Box::pin(async move { result })
        })
    };

    let client = NetClient::new(config(), archive_with_root());
    client.set_connector(connector);
    let start = tokio::time::Instant::now();
    let supervisor = spawn_supervisor(client.clone(), true);

    let mut server = Server::new(servers.recv().await.unwrap());
    assert!(start.elapsed() >= Duration::from_secs(5));

    let ProtocolMessage::Meta(here) = server.recv().await else {
        panic!("expected presence/here");
    };
    assert!(here.contains_key(MetaKey::PresenceHere.as_ref()));
    assert_eq!(server.recv().await, ProtocolMessage::meta(MetaKey::PresenceWho, ""));
    let ProtocolMessage::NewMessage(join) = server.recv().await else {
        panic!("expected join greeting");
    };
    assert_eq!(join.content, "[join]");
    assert_eq!(join.parent, "r");

    drop(server);
    let _second = Server::new(servers.recv().await.unwrap());
    assert_eq!(attempts.load(Ordering::SeqCst), 3);

    supervisor.stop();
}

//! The connection state machine.
//!
//! A [`NetClient`] owns one server connection at a time. Each connection
//! runs two tasks over the split stream:
//!
//! ```text
//!              Composer ──▶ outbound queue (survives reconnects)
//!                                │
//!   ┌────────────────────────────▼──────────┐   ping   ┌─────────────────────────┐
//!   │ send loop                             │ ◀─────── │ receive loop            │
//!   │  writes queued records                │          │  reads + dispatches     │
//!   │  answers ping with QUERY(root)        │          │  liveness watchdog      │
//!   └───────────────────────────────────────┘          └─────────────────────────┘
//!                 │ write error                                │ read/decode error,
//!                 └─────────────▶ teardown(generation) ◀───────┘ EOF, 2nd watchdog miss
//! ```
//!
//! Teardown happens at most once per connection: the first caller takes the
//! live state, stops both loops and fires the disconnect handler. Each
//! connection carries a generation number so a failing loop from an old
//! connection cannot tear down a newer one.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use canopy_archive::SharedArchive;
use canopy_types::{Message, MetaKey, PresenceHere, PresenceLeave, ProtocolMessage, Welcome};
use futures::SinkExt;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot, watch};

use crate::composer::Composer;
use crate::config::ClientConfig;
use crate::constants::LIVENESS_MAX_MISSES;
use crate::presence::{Session, SessionList};
use crate::transport::{Connector, tcp_connector};
use crate::wire::{self, WireReader, WireWriter};
use crate::ClientError;

// ============================================================================
// Public Types
// ============================================================================

/// Connection lifecycle status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
}

/// Called with every newly stored message received from the server.
pub type ReceiveHandler = Arc<dyn Fn(Message) + Send + Sync>;

/// Called once per connection after it is torn down.
pub type DisconnectHandler = Arc<dyn Fn() + Send + Sync>;

// ============================================================================
// Shared State
// ============================================================================

/// Held while a connection is up. Taking it is what makes teardown unique.
struct Live {
    generation: u64,
    stop_send: oneshot::Sender<()>,
    stop_recv: oneshot::Sender<()>,
}

/// The outbound queue plus a record a stopped send loop dequeued but never
/// wrote. The next send loop writes the carried record first.
struct Outbound {
    rx: mpsc::UnboundedReceiver<ProtocolMessage>,
    carried: Option<ProtocolMessage>,
}

struct Inner {
    config: ClientConfig,
    archive: SharedArchive,
    session_id: String,
    connector: RwLock<Connector>,
    on_receive: RwLock<Option<ReceiveHandler>>,
    on_disconnect: RwLock<Option<DisconnectHandler>>,
    composer: Composer,
    /// Drained by whichever send loop is current.
    outbound: tokio::sync::Mutex<Outbound>,
    live: Mutex<Option<Live>>,
    generation: AtomicU64,
    status: watch::Sender<ConnectionStatus>,
    sessions: Mutex<SessionList>,
}

// ============================================================================
// NetClient
// ============================================================================

/// A reconnectable client session bound to one archive.
///
/// Cloning is cheap; clones share the same connection.
#[derive(Clone)]
pub struct NetClient {
    inner: Arc<Inner>,
}

impl NetClient {
    pub fn new(config: ClientConfig, archive: SharedArchive) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (status, _) = watch::channel(ConnectionStatus::Disconnected);
        let composer = Composer::new(config.username.clone(), tx);
        Self {
            inner: Arc::new(Inner {
                config,
                archive,
                session_id: uuid::Uuid::new_v4().to_string(),
                connector: RwLock::new(tcp_connector()),
                on_receive: RwLock::new(None),
                on_disconnect: RwLock::new(None),
                composer,
                outbound: tokio::sync::Mutex::new(Outbound { rx, carried: None }),
                live: Mutex::new(None),
                generation: AtomicU64::new(0),
                status,
                sessions: Mutex::new(SessionList::new()),
            }),
        }
    }

    /// Replace the function used to open connections.
    pub fn set_connector(&self, connector: Connector) {
        *self.inner.connector.write() = connector;
    }

    /// Register the handler for newly received messages. Replaces any
    /// earlier handler.
    pub fn on_receive(&self, handler: impl Fn(Message) + Send + Sync + 'static) {
        *self.inner.on_receive.write() = Some(Arc::new(handler));
    }

    /// Register the handler run after each disconnect. Replaces any earlier
    /// handler.
    pub fn on_disconnect(&self, handler: impl Fn() + Send + Sync + 'static) {
        *self.inner.on_disconnect.write() = Some(Arc::new(handler));
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn archive(&self) -> SharedArchive {
        Arc::clone(&self.inner.archive)
    }

    pub fn composer(&self) -> Composer {
        self.inner.composer.clone()
    }

    /// This client's presence session id.
    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    /// Watch connection status changes.
    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status.subscribe()
    }

    /// Each known user's most recently seen session.
    pub fn active_sessions(&self) -> HashMap<String, Session> {
        self.inner.sessions.lock().active_sessions()
    }

    /// Open a connection and start its send and receive loops.
    pub async fn connect(&self) -> Result<(), ClientError> {
        let claimed = self.inner.status.send_if_modified(|status| {
            if *status == ConnectionStatus::Disconnected {
                *status = ConnectionStatus::Connecting;
                true
            } else {
                false
            }
        });
        if !claimed {
            return Err(ClientError::AlreadyConnected);
        }

        let address = self.inner.config.address.clone();
        log::info!("connecting to {address}");
        let connector = self.inner.connector.read().clone();
        let stream = match connector(address.clone()).await {
            Ok(stream) => stream,
            Err(e) => {
                self.inner.status.send_replace(ConnectionStatus::Disconnected);
                return Err(ClientError::Connect(e));
            }
        };

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (reader, writer) = wire::framed(stream);
        let (stop_send, stop_send_rx) = oneshot::channel();
        let (stop_recv, stop_recv_rx) = oneshot::channel();
        let (ping_tx, ping_rx) = mpsc::channel(1);

        *self.inner.live.lock() = Some(Live {
            generation,
            stop_send,
            stop_recv,
        });
        self.inner.status.send_replace(ConnectionStatus::Connected);
        log::info!("connected to {address} (generation {generation})");

        tokio::spawn(send_loop(Arc::clone(&self.inner), generation, writer, stop_send_rx, ping_rx));
        tokio::spawn(recv_loop(Arc::clone(&self.inner), generation, reader, stop_recv_rx, ping_tx));
        Ok(())
    }

    /// Close the current connection.
    ///
    /// The disconnect handler runs on a spawned task when called inside a
    /// Tokio runtime, and inline on the calling thread otherwise.
    pub fn disconnect(&self) -> Result<(), ClientError> {
        if self.inner.teardown(None) {
            Ok(())
        } else {
            Err(ClientError::NotConnected)
        }
    }
}

// ============================================================================
// Teardown and Dispatch
// ============================================================================

impl Inner {
    /// Tear down the live connection. With `Some(generation)`, only if that
    /// generation is still the live one. Returns whether anything was torn
    /// down.
    fn teardown(&self, generation: Option<u64>) -> bool {
        let live = {
            let mut guard = self.live.lock();
            match (guard.as_ref(), generation) {
                (None, _) => return false,
                (Some(live), Some(g)) if live.generation != g => return false,
                _ => guard.take(),
            }
        };
        let Some(live) = live else {
            return false;
        };

        let _ = live.stop_send.send(());
        let _ = live.stop_recv.send(());
        self.status.send_replace(ConnectionStatus::Disconnected);
        log::info!("disconnected (generation {})", live.generation);

        if let Some(handler) = self.on_disconnect.read().clone() {
            match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    runtime.spawn(async move { handler() });
                }
                // Outside a runtime there is nothing to spawn onto.
                Err(_) => handler(),
            }
        }
        true
    }

    fn dispatch(&self, message: ProtocolMessage) {
        match message {
            ProtocolMessage::Welcome(welcome) => self.handle_welcome(welcome),
            ProtocolMessage::NewMessage(m) => self.handle_new_message(m),
            ProtocolMessage::Meta(entries) => {
                for (key, value) in entries {
                    self.handle_meta(&key, &value);
                }
            }
            ProtocolMessage::Query { id } => {
                log::debug!("ignoring QUERY for {id} from server");
            }
        }
    }

    /// Seed the archive: always ask for the root, and for any recent message
    /// not yet stored.
    fn handle_welcome(&self, welcome: Welcome) {
        log::info!(
            "server welcome: protocol {}.{}, root {}",
            welcome.major, welcome.minor, welcome.root
        );
        if !welcome.root.is_empty() {
            self.query(&welcome.root);
        }
        let missing: Vec<String> = {
            let archive = self.archive.read();
            welcome
                .recent
                .into_iter()
                .filter(|id| !archive.has(id))
                .collect()
        };
        for id in missing {
            self.query(&id);
        }
    }

    fn handle_new_message(&self, message: Message) {
        if message.id.is_empty() {
            log::warn!("dropping NEW_MESSAGE without an id");
            return;
        }
        if self.archive.read().has(&message.id) {
            return;
        }
        if let Err(e) = self.archive.write().add(message.clone()) {
            log::warn!("failed to store message {}: {e}", message.id);
            return;
        }

        let parent = message.parent.clone();
        if let Some(handler) = self.on_receive.read().clone() {
            handler(message);
        }
        if !parent.is_empty() && !self.archive.read().has(&parent) {
            self.query(&parent);
        }
    }

    fn handle_meta(&self, key: &str, value: &str) {
        match MetaKey::from_str(key) {
            Ok(MetaKey::PresenceWho) => {
                if let Err(e) = self.composer.announce_here(&self.session_id) {
                    log::warn!("failed to announce presence: {e}");
                }
            }
            Ok(MetaKey::PresenceHere) => match PresenceHere::parse(value) {
                Ok(here) => {
                    let session = Session {
                        id: here.session_id,
                        last_seen: here.timestamp,
                    };
                    if let Err(e) = self.sessions.lock().track(&here.username, session) {
                        log::warn!("ignoring presence announcement: {e}");
                    }
                }
                Err(e) => log::warn!("{e}"),
            },
            Ok(MetaKey::PresenceLeave) => match PresenceLeave::parse(value) {
                Ok(leave) => {
                    if let Err(e) = self.sessions.lock().remove(&leave.username, &leave.session_id) {
                        log::debug!("ignoring leave announcement: {e}");
                    }
                }
                Err(e) => log::warn!("{e}"),
            },
            Err(_) => log::warn!("ignoring unknown meta key {key:?}"),
        }
    }

    fn query(&self, id: &str) {
        if let Err(e) = self.composer.query(id) {
            log::warn!("failed to queue query for {id}: {e}");
        }
    }
}

// ============================================================================
// Loops
// ============================================================================

/// Write queued records until stopped.
///
/// The stop signal wins over pending work, and is checked again before each
/// write: a record dequeued after teardown is carried over to the next
/// connection instead of going out on this one. A write error tears the
/// connection down; the failed record is dropped, not retried.
async fn send_loop(
    inner: Arc<Inner>,
    generation: u64,
    mut writer: WireWriter,
    mut stop: oneshot::Receiver<()>,
    mut ping: mpsc::Receiver<()>,
) {
    let mut outbound = inner.outbound.lock().await;
    let mut errored = false;

    loop {
        let carried = outbound.carried.take();
        let (message, queued) = match carried {
            Some(message) => (message, true),
            None => tokio::select! {
                biased;
                _ = &mut stop => break,
                Some(()) = ping.recv() => {
                    let root = inner.archive.read().root();
                    match root {
                        Ok(root) => (ProtocolMessage::query(root), false),
                        Err(_) => {
                            log::debug!("no root known yet, skipping ping");
                            continue;
                        }
                    }
                }
                next = outbound.rx.recv() => match next {
                    Some(message) => (message, true),
                    None => break,
                },
            },
        };

        if stopped(&mut stop) {
            if queued {
                outbound.carried = Some(message);
            }
            break;
        }
        if errored {
            log::debug!("dropping {} on errored connection", message.kind());
            continue;
        }
        if let Err(e) = wire::write_message(&mut writer, &message).await {
            log::warn!("write failed: {e}");
            errored = true;
            inner.teardown(Some(generation));
        }
    }

    // Closing flushes, and a flush would retry the failed bytes.
    if !errored {
        let _ = <WireWriter as SinkExt<String>>::close(&mut writer).await;
    }
    log::debug!("send loop exiting (generation {generation})");
}

/// Whether the stop signal has fired (or its sender is gone).
fn stopped(stop: &mut oneshot::Receiver<()>) -> bool {
    !matches!(stop.try_recv(), Err(oneshot::error::TryRecvError::Empty))
}

/// Read and dispatch records until stopped, the stream fails, or the
/// watchdog gives up.
async fn recv_loop(
    inner: Arc<Inner>,
    generation: u64,
    mut reader: WireReader,
    mut stop: oneshot::Receiver<()>,
    ping: mpsc::Sender<()>,
) {
    let interval = inner.config.liveness_interval;
    let watchdog = tokio::time::sleep(interval);
    tokio::pin!(watchdog);
    let mut misses = 0u32;

    loop {
        tokio::select! {
            _ = &mut stop => {
                log::debug!("receive loop stopped (generation {generation})");
                return;
            }
            _ = &mut watchdog => {
                misses += 1;
                if misses >= LIVENESS_MAX_MISSES {
                    log::warn!("no traffic for {:?}, disconnecting", interval * misses);
                    break;
                }
                log::warn!("no traffic for {interval:?}, pinging server");
                let _ = ping.try_send(());
                watchdog.as_mut().reset(tokio::time::Instant::now() + interval);
            }
            frame = wire::read_message(&mut reader) => match frame {
                Some(Ok(message)) => {
                    misses = 0;
                    watchdog.as_mut().reset(tokio::time::Instant::now() + interval);
                    log::trace!("received {}", message.kind());
                    inner.dispatch(message);
                }
                Some(Err(e)) => {
                    log::warn!("read failed: {e}");
                    break;
                }
                None => {
                    log::info!("server closed the connection");
                    break;
                }
            },
        }
    }

    inner.teardown(Some(generation));
}

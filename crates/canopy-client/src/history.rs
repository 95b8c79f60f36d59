//! Cursor over the chronological message window.
//!
//! All cursor state lives in a single actor task. Network delivery and user
//! input both talk to it through a [`HistoryHandle`], so updates to the
//! selection are applied one at a time in the order they were sent.
//!
//! ```text
//!   HistoryHandle (Clone)       mpsc       HistoryActor (tokio task)
//!   ┌─────────────────────┐  ────────▶  ┌──────────────────────────────┐
//!   │ .observe(msg)       │             │ window = archive.last(cap)   │
//!   │ .cursor_up()        │  ◀────────  │ current + current_index      │
//!   │ .view()             │   oneshot   │ viewport dimensions          │
//!   └─────────────────────┘             └──────────────────────────────┘
//! ```

use canopy_archive::SharedArchive;
use canopy_types::Message;
use tokio::sync::{mpsc, oneshot};

use crate::constants::{DEFAULT_HISTORY_CAPACITY, NEEDED_HEALTH_PROBE};
use crate::ClientError;

// ============================================================================
// View
// ============================================================================

/// Everything a renderer needs for one frame.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HistoryView {
    /// Most recent messages, oldest first.
    pub window: Vec<Message>,
    /// Selected message id; empty when nothing is loaded.
    pub current: String,
    /// Ancestors of the selection found within the window, nearest first.
    pub ancestors: Vec<String>,
    /// Missing parents, capped at [`NEEDED_HEALTH_PROBE`].
    pub needed: usize,
    pub height: u16,
    pub width: u16,
}

// ============================================================================
// Commands (internal)
// ============================================================================

enum HistoryCommand {
    Observe {
        message: Message,
        reply: oneshot::Sender<()>,
    },
    SetDimensions {
        height: u16,
        width: u16,
        reply: oneshot::Sender<()>,
    },
    Cursor {
        movement: Movement,
        reply: oneshot::Sender<()>,
    },
    Current {
        reply: oneshot::Sender<String>,
    },
    Ancestors {
        reply: oneshot::Sender<Vec<String>>,
    },
    View {
        reply: oneshot::Sender<HistoryView>,
    },
}

#[derive(Clone, Copy, Debug)]
enum Movement {
    Up,
    Down,
    Beginning,
    End,
}

// ============================================================================
// HistoryHandle
// ============================================================================

/// Handle to a running cursor actor.
#[derive(Clone)]
pub struct HistoryHandle {
    tx: mpsc::UnboundedSender<HistoryCommand>,
}

impl HistoryHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> HistoryCommand,
    ) -> Result<T, ClientError> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(make(reply)).map_err(|_| ClientError::Shutdown)?;
        rx.await.map_err(|_| ClientError::Shutdown)
    }

    /// Refresh the window after `message` was stored. Selects it if nothing
    /// is selected yet.
    pub async fn observe(&self, message: Message) -> Result<(), ClientError> {
        self.request(|reply| HistoryCommand::Observe { message, reply }).await
    }

    pub async fn set_dimensions(&self, height: u16, width: u16) -> Result<(), ClientError> {
        self.request(|reply| HistoryCommand::SetDimensions { height, width, reply })
            .await
    }

    /// Select the previous (older) message.
    pub async fn cursor_up(&self) -> Result<(), ClientError> {
        self.cursor(Movement::Up).await
    }

    /// Select the next (newer) message.
    pub async fn cursor_down(&self) -> Result<(), ClientError> {
        self.cursor(Movement::Down).await
    }

    pub async fn cursor_beginning(&self) -> Result<(), ClientError> {
        self.cursor(Movement::Beginning).await
    }

    pub async fn cursor_end(&self) -> Result<(), ClientError> {
        self.cursor(Movement::End).await
    }

    async fn cursor(&self, movement: Movement) -> Result<(), ClientError> {
        self.request(|reply| HistoryCommand::Cursor { movement, reply })
            .await
    }

    pub async fn current(&self) -> Result<String, ClientError> {
        self.request(|reply| HistoryCommand::Current { reply }).await
    }

    pub async fn ancestors(&self) -> Result<Vec<String>, ClientError> {
        self.request(|reply| HistoryCommand::Ancestors { reply }).await
    }

    pub async fn view(&self) -> Result<HistoryView, ClientError> {
        self.request(|reply| HistoryCommand::View { reply }).await
    }
}

// ============================================================================
// HistoryActor (internal)
// ============================================================================

struct HistoryActor {
    archive: SharedArchive,
    capacity: usize,
    window: Vec<Message>,
    current: String,
    current_index: usize,
    height: u16,
    width: u16,
}

impl HistoryActor {
    fn new(archive: SharedArchive, capacity: usize) -> Self {
        let window = archive.read().last(capacity);
        let current = window.first().map(|m| m.id.clone()).unwrap_or_default();
        Self {
            archive,
            capacity,
            window,
            current,
            current_index: 0,
            height: 0,
            width: 0,
        }
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<HistoryCommand>) {
        while let Some(cmd) = rx.recv().await {
            self.handle_command(cmd);
        }
        log::debug!("history actor shutting down: channel closed");
    }

    fn handle_command(&mut self, cmd: HistoryCommand) {
        match cmd {
            HistoryCommand::Observe { message, reply } => {
                self.observe(&message);
                let _ = reply.send(());
            }
            HistoryCommand::SetDimensions { height, width, reply } => {
                self.height = height;
                self.width = width;
                let _ = reply.send(());
            }
            HistoryCommand::Cursor { movement, reply } => {
                self.move_cursor(movement);
                let _ = reply.send(());
            }
            HistoryCommand::Current { reply } => {
                let _ = reply.send(self.current.clone());
            }
            HistoryCommand::Ancestors { reply } => {
                let _ = reply.send(self.ancestors());
            }
            HistoryCommand::View { reply } => {
                let _ = reply.send(self.view());
            }
        }
    }

    fn observe(&mut self, message: &Message) {
        self.window = self.archive.read().last(self.capacity);
        if self.current.is_empty() {
            self.current = message.id.clone();
        }
        match self.window.iter().position(|m| m.id == self.current) {
            Some(index) => self.current_index = index,
            // Selection scrolled out of the window, or was never stored.
            None => {
                self.current_index = 0;
                self.current = self.window.first().map(|m| m.id.clone()).unwrap_or_default();
            }
        }
    }

    /// No-op with fewer than two messages or at a boundary.
    fn move_cursor(&mut self, movement: Movement) {
        let len = self.window.len();
        if len < 2 {
            return;
        }
        let index = match movement {
            Movement::Up => self.current_index.saturating_sub(1),
            Movement::Down => (self.current_index + 1).min(len - 1),
            Movement::Beginning => 0,
            Movement::End => len - 1,
        };
        self.current_index = index;
        self.current = self.window[index].id.clone();
    }

    /// Walk backwards from the selection, following parent links through
    /// the older part of the window. A parent that is not found simply
    /// ends the chain.
    fn ancestors(&self) -> Vec<String> {
        let mut ancestors = Vec::new();
        if self.window.len() < 2 {
            return ancestors;
        }
        let Some(selected) = self.window.get(self.current_index) else {
            return ancestors;
        };
        let mut parent = selected.parent.as_str();
        for m in self.window[..self.current_index].iter().rev() {
            if !parent.is_empty() && m.id == parent {
                ancestors.push(m.id.clone());
                parent = m.parent.as_str();
            }
        }
        ancestors
    }

    fn view(&self) -> HistoryView {
        HistoryView {
            window: self.window.clone(),
            current: self.current.clone(),
            ancestors: self.ancestors(),
            needed: self.archive.read().needed(NEEDED_HEALTH_PROBE).len(),
            height: self.height,
            width: self.width,
        }
    }
}

// ============================================================================
// Public spawn function
// ============================================================================

/// Spawn a cursor actor over `archive` with the default window size.
pub fn spawn_history(archive: SharedArchive) -> HistoryHandle {
    spawn_history_with_capacity(archive, DEFAULT_HISTORY_CAPACITY)
}

/// Spawn a cursor actor whose window holds the `capacity` newest messages.
pub fn spawn_history_with_capacity(archive: SharedArchive, capacity: usize) -> HistoryHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(HistoryActor::new(archive, capacity).run(rx));
    HistoryHandle { tx }
}

//! Line-oriented terminal frontend.
//!
//! Reads commands from stdin and prints incoming messages as they arrive.
//!
//! | Input          | Action                                   |
//! |----------------|------------------------------------------|
//! | `/up` `/down`  | move the selection one message           |
//! | `/top` `/bottom` | jump to the oldest / newest message    |
//! | `/query`       | ask the server for missing parents       |
//! | `/who`         | ask who is online, list known sessions   |
//! | `/root <text>` | reply to the root                        |
//! | `/quit`        | leave                                    |
//! | anything else  | reply to the selected message            |

use anyhow::Result;
use canopy_client::constants::DEFAULT_NEEDED_QUERY_BATCH;
use canopy_client::{
    ConnectionStatus, HistoryHandle, HistoryView, NetClient, Notifier, should_notify,
};
use canopy_types::Message;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, LinesCodec};

#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    Up,
    Down,
    Top,
    Bottom,
    Query,
    Who,
    Root(String),
    Quit,
    Reply(String),
    Unknown(String),
    Empty,
}

impl Command {
    pub fn parse(line: &str) -> Self {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return Command::Empty;
        }
        let Some(rest) = line.strip_prefix('/') else {
            return Command::Reply(line.to_string());
        };
        let (name, arg) = rest.split_once(' ').unwrap_or((rest, ""));
        match name {
            "up" => Command::Up,
            "down" => Command::Down,
            "top" => Command::Top,
            "bottom" => Command::Bottom,
            "query" => Command::Query,
            "who" => Command::Who,
            "quit" => Command::Quit,
            "root" if !arg.trim().is_empty() => Command::Root(arg.to_string()),
            _ => Command::Unknown(name.to_string()),
        }
    }
}

/// Rings the terminal bell and prints a one-line summary.
pub struct BellNotifier;

impl Notifier for BellNotifier {
    fn notify(&self, message: &Message) {
        println!("\x07[!] {}: {}", message.author, message.content);
    }
}

pub fn status_line(status: ConnectionStatus, needed: usize) -> String {
    let state = match status {
        ConnectionStatus::Connected => "connected",
        ConnectionStatus::Connecting | ConnectionStatus::Disconnected => "connecting...",
    };
    if needed == 0 {
        format!("[{state}]")
    } else {
        format!("[{state}, {needed}+ broken threads]")
    }
}

/// Terminal size from `LINES`/`COLUMNS`, falling back to 24x80.
fn terminal_size() -> (u16, u16) {
    let var = |name: &str, default: u16| {
        std::env::var(name)
            .ok()
            .and_then(|v| v.trim().parse().ok())
            .filter(|&n: &u16| n > 0)
            .unwrap_or(default)
    };
    (var("LINES", 24), var("COLUMNS", 80))
}

fn render(message: &Message, marker: &str) -> String {
    format!("{marker}{}: {}", message.author, message.content)
}

/// Cut `line` to at most `width` characters. Zero means unlimited.
fn clip(line: String, width: u16) -> String {
    let width = usize::from(width);
    if width == 0 || line.chars().count() <= width {
        return line;
    }
    line.chars().take(width).collect()
}

pub struct Frontend<N: Notifier> {
    client: NetClient,
    history: HistoryHandle,
    notifier: N,
}

impl<N: Notifier> Frontend<N> {
    pub fn new(client: NetClient, history: HistoryHandle, notifier: N) -> Self {
        Self {
            client,
            history,
            notifier,
        }
    }

    /// Run until `/quit`, end of input or Ctrl-C.
    pub async fn run(self, mut incoming: mpsc::UnboundedReceiver<Message>) -> Result<()> {
        let mut input = FramedRead::new(tokio::io::stdin(), LinesCodec::new());
        let (height, width) = terminal_size();
        self.history.set_dimensions(height, width).await?;
        self.print_view().await?;

        loop {
            tokio::select! {
                Some(message) = incoming.recv() => self.on_message(message).await?,
                line = input.next() => {
                    let Some(line) = line else { break };
                    if !self.on_command(Command::parse(&line?)).await? {
                        break;
                    }
                }
                _ = tokio::signal::ctrl_c() => break,
            }
        }
        Ok(())
    }

    async fn on_message(&self, message: Message) -> Result<()> {
        self.history.observe(message.clone()).await?;
        let config = self.client.config();
        let notify = should_notify(
            config.notification_policy,
            &config.username,
            &message,
            &self.client.archive().read(),
            canopy_types::now_secs(),
        );
        if notify {
            self.notifier.notify(&message);
        }
        println!("{}", render(&message, "  "));
        Ok(())
    }

    /// Returns false when the frontend should exit.
    async fn on_command(&self, command: Command) -> Result<bool> {
        let composer = self.client.composer();
        match command {
            Command::Up => self.history.cursor_up().await?,
            Command::Down => self.history.cursor_down().await?,
            Command::Top => self.history.cursor_beginning().await?,
            Command::Bottom => self.history.cursor_end().await?,
            Command::Query => {
                let sent = composer.query_needed(&self.client.archive().read(), DEFAULT_NEEDED_QUERY_BATCH)?;
                println!("queried {sent} missing messages");
                return Ok(true);
            }
            Command::Who => {
                composer.ask_who()?;
                for (user, session) in self.client.active_sessions() {
                    println!("  {user} (last seen {})", session.last_seen);
                }
                return Ok(true);
            }
            Command::Root(text) => {
                let root = self.client.archive().read().root();
                match root {
                    Ok(root) => {
                        composer.reply(&root, &text)?;
                    }
                    Err(e) => println!("cannot reply to root: {e}"),
                }
                return Ok(true);
            }
            Command::Reply(text) => {
                let parent = self.history.current().await?;
                if parent.is_empty() {
                    println!("nothing selected, use /root to start a thread");
                } else {
                    composer.reply(&parent, &text)?;
                }
                return Ok(true);
            }
            Command::Quit => return Ok(false),
            Command::Unknown(name) => {
                println!("unknown command /{name}");
                return Ok(true);
            }
            Command::Empty => {}
        }
        self.print_view().await?;
        Ok(true)
    }

    async fn print_view(&self) -> Result<()> {
        let view = self.history.view().await?;
        let status = *self.client.status().borrow();
        let replies = self.client.archive().read().children_of(&view.current).len();
        print_selection(&view, replies);
        println!("{}", status_line(status, view.needed));
        Ok(())
    }
}

/// Print the selected message under its known ancestors, oldest first.
///
/// Only as many ancestors as fit above the selection and status line are
/// shown; the nearest ones win.
fn print_selection(view: &HistoryView, replies: usize) {
    for line in selection_lines(view, replies) {
        println!("{line}");
    }
}

fn selection_lines(view: &HistoryView, replies: usize) -> Vec<String> {
    let find = |id: &str| view.window.iter().find(|m| m.id == id);
    let Some(current) = find(&view.current) else {
        return Vec::new();
    };

    let room = usize::from(view.height).saturating_sub(2);
    let mut lines: Vec<String> = view
        .ancestors
        .iter()
        .filter_map(|id| find(id))
        .take(room)
        .map(|m| clip(render(m, "  ^ "), view.width))
        .collect();
    lines.reverse();

    let selected = match replies {
        0 => render(current, "  > "),
        1 => format!("{} (1 reply)", render(current, "  > ")),
        n => format!("{} ({n} replies)", render(current, "  > ")),
    };
    lines.push(clip(selected, view.width));
    lines
}

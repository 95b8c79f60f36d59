//! Keeps a [`NetClient`] connected.

use tokio::task::JoinHandle;

use crate::connection::{ConnectionStatus, NetClient};
use crate::constants::{
    JOIN_GREETING, JOIN_GREETING_ATTEMPTS, JOIN_GREETING_DELAY, QUIT_GRACE, QUIT_MESSAGE,
};

/// A running reconnect loop. Dropping it leaves the loop running; call
/// [`Supervisor::stop`] to end it.
pub struct Supervisor {
    task: JoinHandle<()>,
}

impl Supervisor {
    /// End the reconnect loop. The current connection, if any, stays up.
    pub fn stop(self) {
        self.task.abort();
    }
}

/// Connect `client`, and reconnect it whenever it drops.
///
/// Failed attempts are retried after the configured reconnect delay, for
/// as long as the supervisor runs. After each successful connect the client
/// announces its session and asks who else is online; with `greet` it also
/// posts a join greeting under the root.
pub fn spawn_supervisor(client: NetClient, greet: bool) -> Supervisor {
    Supervisor {
        task: tokio::spawn(run(client, greet)),
    }
}

async fn run(client: NetClient, greet: bool) {
    let delay = client.config().reconnect_delay;
    let mut status = client.status();
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        if let Err(e) = client.connect().await {
            log::warn!("connection attempt {attempt} failed: {e}, retrying in {delay:?}");
            tokio::time::sleep(delay).await;
            continue;
        }
        attempt = 0;

        announce(&client);
        let greeter = greet.then(|| tokio::spawn(send_join_greeting(client.clone())));

        if status
            .wait_for(|s| *s == ConnectionStatus::Disconnected)
            .await
            .is_err()
        {
            return;
        }
        if let Some(greeter) = greeter {
            greeter.abort();
        }
        log::info!("connection lost, reconnecting");
    }
}

fn announce(client: &NetClient) {
    let composer = client.composer();
    if let Err(e) = composer
        .announce_here(client.session_id())
        .and_then(|_| composer.ask_who())
    {
        log::warn!("failed to announce presence: {e}");
    }
}

/// Reply to the root once it is known, giving up after a few tries.
async fn send_join_greeting(client: NetClient) {
    for attempt in 1..=JOIN_GREETING_ATTEMPTS {
        let root = client.archive().read().root();
        match root {
            Ok(root) => {
                if let Err(e) = client.composer().reply(&root, JOIN_GREETING) {
                    log::warn!("failed to send join greeting: {e}");
                }
                return;
            }
            Err(_) => {
                log::debug!("root unknown, join greeting attempt {attempt} deferred");
                tokio::time::sleep(JOIN_GREETING_DELAY).await;
            }
        }
    }
    log::info!("gave up on join greeting: no root after {JOIN_GREETING_ATTEMPTS} attempts");
}

/// Best-effort goodbye: post the quit message under the root and announce
/// the session is leaving, then give the send loop a moment to flush.
pub async fn quit(client: &NetClient) {
    let composer = client.composer();
    let root = client.archive().read().root();
    match root {
        Ok(root) => {
            if let Err(e) = composer.reply(&root, QUIT_MESSAGE) {
                log::warn!("failed to send quit message: {e}");
            }
        }
        Err(e) => log::debug!("skipping quit message: {e}"),
    }
    if let Err(e) = composer.announce_leaving(client.session_id()) {
        log::debug!("failed to announce leaving: {e}");
    }
    tokio::time::sleep(QUIT_GRACE).await;
}

//! Client configuration constants.
//!
//! Centralizes hardcoded values for easier configuration and documentation.

use std::time::Duration;

/// Pause between failed connection attempts.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Silence on the wire before the liveness watchdog fires.
pub const LIVENESS_INTERVAL: Duration = Duration::from_secs(30);

/// Consecutive watchdog firings tolerated before the connection is dropped.
/// The first firing pings the server; reaching this count disconnects.
pub const LIVENESS_MAX_MISSES: u32 = 2;

/// How many times to retry the join greeting while the root is unknown.
pub const JOIN_GREETING_ATTEMPTS: u32 = 5;

/// Pause between join greeting attempts.
pub const JOIN_GREETING_DELAY: Duration = Duration::from_secs(5);

/// Time given to the send loop to flush the quit message before exit.
pub const QUIT_GRACE: Duration = Duration::from_millis(250);

/// Messages older than this are never notified about.
pub const NOTIFY_FRESHNESS: Duration = Duration::from_secs(5);

/// Number of most recent messages the cursor window holds.
pub const DEFAULT_HISTORY_CAPACITY: usize = 1000;

/// Missing parents queried per backfill request.
pub const DEFAULT_NEEDED_QUERY_BATCH: usize = 10;

/// Upper bound on the broken-thread count shown in the status line.
pub const NEEDED_HEALTH_PROBE: usize = 100;

/// Longest protocol line accepted from a server.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Greeting sent as a reply to the root after connecting.
pub const JOIN_GREETING: &str = "[join]";

/// Courtesy message sent as a reply to the root before exiting.
pub const QUIT_MESSAGE: &str = "[quit]";

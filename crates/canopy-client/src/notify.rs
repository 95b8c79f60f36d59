//! When to tell the user about a message.

use canopy_archive::Archive;
use canopy_types::Message;
use strum::{AsRefStr, Display, EnumString};

use crate::constants::NOTIFY_FRESHNESS;

/// Which incoming messages deserve a notification.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, AsRefStr, Display, EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum NotificationPolicy {
    Never,
    Always,
    /// Messages containing `@username`.
    Mention,
    /// Replies to the user's own messages.
    Reply,
    #[default]
    MentionReply,
}

/// Delivers a notification for one message.
pub trait Notifier: Send + Sync {
    fn notify(&self, message: &Message);
}

/// Decide whether `message` should produce a notification for `username`.
///
/// Own messages and messages older than [`NOTIFY_FRESHNESS`] relative to
/// `now` (unix seconds) never notify.
pub fn should_notify(
    policy: NotificationPolicy,
    username: &str,
    message: &Message,
    archive: &Archive,
    now: i64,
) -> bool {
    if message.author == username {
        return false;
    }
    if now.saturating_sub(message.timestamp) > NOTIFY_FRESHNESS.as_secs() as i64 {
        return false;
    }

    let mentioned = || message.content.contains(&format!("@{username}"));
    let replied = || {
        archive
            .get(&message.parent)
            .is_some_and(|parent| parent.author == username)
    };

    match policy {
        NotificationPolicy::Never => false,
        NotificationPolicy::Always => true,
        NotificationPolicy::Mention => mentioned(),
        NotificationPolicy::Reply => replied(),
        NotificationPolicy::MentionReply => mentioned() || replied(),
    }
}

use std::{sync::Arc, time::Duration};

use rand::seq::IndexedRandom;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{backend::Backend, db::NewMessage};

pub const DEFAULT_REPLY_DELAY: Duration = Duration::from_secs(2);

const CANNED_REPLIES: [&str; 6] = [
    "Meet me after class tomorrow.",
    "Sure, I will help you with that.",
    "Please check the notice board for details.",
    "Submit your assignment by Friday.",
    "Come to my office during office hours.",
    "I will discuss this in the next class.",
];

/// Stands in for the other side of a conversation after a student writes.
pub trait AutoResponder: Send + Sync {
    /// Schedules a reply from `from` to `to`. Must not block.
    fn respond(&self, backend: Arc<dyn Backend>, from: Uuid, to: Uuid);
}

/// Real counterparts answer for themselves.
pub struct NoReplies;

impl AutoResponder for NoReplies {
    fn respond(&self, _backend: Arc<dyn Backend>, _from: Uuid, _to: Uuid) {}
}

/// Writes a random canned reply after a fixed delay, through the same insert
/// path as a real message.
pub struct CannedReplies {
    delay: Duration,
    replies: Vec<String>,
}

impl CannedReplies {
    pub fn new(delay: Duration) -> Self {
        Self::with_replies(delay, CANNED_REPLIES.iter().map(|reply| reply.to_string()).collect())
    }

    pub fn with_replies(delay: Duration, replies: Vec<String>) -> Self {
        CannedReplies { delay, replies }
    }
}

impl Default for CannedReplies {
    fn default() -> Self {
        Self::new(DEFAULT_REPLY_DELAY)
    }
}

impl AutoResponder for CannedReplies {
    fn respond(&self, backend: Arc<dyn Backend>, from: Uuid, to: Uuid) {
        let Some(reply) = self.replies.choose(&mut rand::rng()).cloned() else {
            return;
        };
        let delay = self.delay;

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            debug!("canned reply from {from} to {to}");

            let message = NewMessage { sender_id: from, receiver_id: to, content: reply };
            if let Err(e) = backend.insert_message(message).await {
                warn!("canned reply from {from} not written: {e}");
            }
        });
    }
}

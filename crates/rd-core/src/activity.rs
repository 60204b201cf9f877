//! Domain events emitted after posts, comments and votes, plus `@handle`
//! detection.

use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::{CommentId, PostId, UserId, VoteTarget};
use crate::traits::ActivitySink;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActivityEvent {
    /// A root comment landed on the recipient's post.
    Commented {
        recipient: UserId,
        actor: UserId,
        post: PostId,
        comment: CommentId,
    },
    /// Someone answered the recipient's comment.
    Replied {
        recipient: UserId,
        actor: UserId,
        parent: CommentId,
        comment: CommentId,
    },
    /// `@handle` of the recipient in a text post or a comment.
    Mentioned {
        recipient: UserId,
        actor: UserId,
        target: VoteTarget,
    },
    /// An upvote landed on the recipient's content, either new or flipped
    /// from a downvote.
    Upvoted {
        recipient: UserId,
        actor: UserId,
        target: VoteTarget,
    },
}

impl ActivityEvent {
    pub fn recipient(&self) -> UserId {
        match self {
            ActivityEvent::Commented { recipient, .. }
            | ActivityEvent::Replied { recipient, .. }
            | ActivityEvent::Mentioned { recipient, .. }
            | ActivityEvent::Upvoted { recipient, .. } => *recipient,
        }
    }

    pub fn actor(&self) -> UserId {
        match self {
            ActivityEvent::Commented { actor, .. }
            | ActivityEvent::Replied { actor, .. }
            | ActivityEvent::Mentioned { actor, .. }
            | ActivityEvent::Upvoted { actor, .. } => *actor,
        }
    }

    /// Nobody is notified about their own actions.
    pub fn is_self_directed(&self) -> bool {
        self.recipient() == self.actor()
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

#[async_trait]
impl ActivitySink for NoopSink {
    async fn publish(&self, _event: ActivityEvent) {}
}

/// Keeps events in memory, in publish order.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ActivityEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ActivityEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn take(&self) -> Vec<ActivityEvent> {
        std::mem::take(&mut *self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner()))
    }
}

#[async_trait]
impl ActivitySink for RecordingSink {
    async fn publish(&self, event: ActivityEvent) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event);
    }
}

fn is_handle_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '.')
}

/// Handles are what `@mentions` can resolve: handle characters only, no
/// trailing dot.
pub fn is_valid_handle(handle: &str) -> bool {
    !handle.is_empty() && !handle.ends_with('.') && handle.chars().all(is_handle_char)
}

/// Distinct `@handle` tokens in order of first appearance.
///
/// An `@` only starts a mention at the beginning of the text or after a
/// character that cannot be part of a handle, so `mail@example.com` is not a
/// mention. Trailing dots are punctuation, not part of the handle.
pub fn mentioned_handles(content: &str) -> Vec<&str> {
    let mut handles: Vec<&str> = Vec::new();
    let mut prev: Option<char> = None;

    for (idx, c) in content.char_indices() {
        let starts_mention = c == '@' && !prev.is_some_and(is_handle_char);
        prev = Some(c);
        if !starts_mention {
            continue;
        }

        let rest = &content[idx + 1..];
        let end = rest.find(|ch: char| !is_handle_char(ch)).unwrap_or(rest.len());
        let handle = rest[..end].trim_end_matches('.');
        if !handle.is_empty() && !handles.contains(&handle) {
            handles.push(handle);
        }
    }
    handles
}

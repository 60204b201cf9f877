//! Tunables for the discussion core. Loaded by `rd-config`, defaulted here.

use serde::{Deserialize, Serialize};

/// Whether a user may vote on content they authored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelfVotePolicy {
    #[default]
    Reject,
    Allow,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscussionPolicy {
    /// Depth bound for the inline tree on a post page.
    pub inline_depth: usize,
    /// Depth bound for the "continue thread" view rooted at one comment.
    pub thread_depth: usize,
    pub self_vote: SelfVotePolicy,
    /// Accounts younger than this never go below zero karma.
    pub new_account_days: i64,
    /// Attempts at a vote before a uniqueness race is surfaced.
    pub vote_retry_limit: u32,
}

impl Default for DiscussionPolicy {
    fn default() -> Self {
        Self {
            inline_depth: 3,
            thread_depth: 10,
            self_vote: SelfVotePolicy::Reject,
            new_account_days: 30,
            vote_retry_limit: 3,
        }
    }
}

impl DiscussionPolicy {
    pub fn with_self_vote(mut self, policy: SelfVotePolicy) -> Self {
        self.self_vote = policy;
        self
    }
}

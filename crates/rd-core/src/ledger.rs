//! # Vote Ledger
//!
//! One signed vote per (user, target). Casting the same direction twice
//! toggles the vote off; casting the opposite direction flips it.
//!
//! The storage uniqueness constraint is the backstop against two identical
//! concurrent requests. A lost race comes back as `DuplicateVoteRace` and the
//! whole lookup/decide step is replayed against the new state.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::error::{DiscussError, Result};
use crate::models::{UserId, Vote, VoteDirection, VoteId, VoteOutcome, VoteTarget};
use crate::policy::SelfVotePolicy;
use crate::traits::DiscussionRepo;

/// Result of a vote as seen by the orchestration layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerEntry {
    pub outcome: VoteOutcome,
    /// Author of the voted content, whose karma is now stale.
    pub author: UserId,
}

pub struct VoteLedger<R: ?Sized> {
    repo: Arc<R>,
    self_vote: SelfVotePolicy,
    retry_limit: u32,
}

impl<R: DiscussionRepo + ?Sized> VoteLedger<R> {
    pub fn new(repo: Arc<R>, self_vote: SelfVotePolicy, retry_limit: u32) -> Self {
        Self {
            repo,
            self_vote,
            retry_limit: retry_limit.max(1),
        }
    }

    pub async fn cast_vote(&self, user: UserId, target: VoteTarget, direction: VoteDirection) -> Result<VoteOutcome> {
        self.record(user, target, direction).await.map(|entry| entry.outcome)
    }

    /// Applies the vote and reports whose content it touched.
    pub async fn record(&self, user: UserId, target: VoteTarget, direction: VoteDirection) -> Result<LedgerEntry> {
        let author = self.target_author(target).await?;
        if self.self_vote == SelfVotePolicy::Reject && author == user {
            return Err(DiscussError::SelfVote);
        }

        let mut attempt = 1;
        loop {
            match self.apply(user, target, direction).await {
                Err(err) if err.is_retryable() && attempt < self.retry_limit => {
                    warn!(%user, %target, attempt, "vote raced with a concurrent write, retrying");
                    attempt += 1;
                }
                Err(err) => return Err(err),
                Ok(outcome) => {
                    info!(%user, %target, vote = direction.value(), outcome = outcome.as_str(), "vote recorded");
                    return Ok(LedgerEntry { outcome, author });
                }
            }
        }
    }

    pub async fn viewer_vote(&self, user: UserId, target: VoteTarget) -> Result<Option<VoteDirection>> {
        Ok(self.repo.find_vote(user, target).await?.map(|vote| vote.value))
    }

    pub async fn target_author(&self, target: VoteTarget) -> Result<UserId> {
        match target {
            VoteTarget::Post(id) => self
                .repo
                .get_post(id)
                .await?
                .map(|post| post.author)
                .ok_or_else(|| DiscussError::not_found("post", id)),
            VoteTarget::Comment(id) => self
                .repo
                .get_comment(id)
                .await?
                .map(|comment| comment.author)
                .ok_or_else(|| DiscussError::not_found("comment", id)),
        }
    }

    async fn apply(&self, user: UserId, target: VoteTarget, direction: VoteDirection) -> Result<VoteOutcome> {
        match self.repo.find_vote(user, target).await? {
            None => {
                let vote = Vote {
                    id: VoteId::generate(),
                    user,
                    target,
                    value: direction,
                    created_at: Utc::now(),
                };
                self.repo.insert_vote(vote).await?;
                Ok(VoteOutcome::Added)
            }
            Some(existing) if existing.value == direction => {
                if !self.repo.delete_vote(existing.id).await? {
                    return Err(vanished(existing.id));
                }
                Ok(VoteOutcome::Removed)
            }
            Some(existing) => {
                if !self.repo.update_vote(existing.id, direction).await? {
                    return Err(vanished(existing.id));
                }
                Ok(VoteOutcome::Changed)
            }
        }
    }
}

fn vanished(id: VoteId) -> DiscussError {
    DiscussError::DuplicateVoteRace(format!("vote {id} was removed concurrently"))
}

//! # Karma Engine
//!
//! Folds the votes a user received and the content they authored into one
//! integer, always from the full ledger. Recomputing is idempotent, so it is
//! safe to run redundantly or out of order with the votes that triggered it.
//!
//! Recomputes for the same user are serialized: each one reads the ledger only
//! after the previous one stored its result, so the last store always reflects
//! every vote committed before it started.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{DiscussError, Result};
use crate::models::{UserId, VoteTally};
use crate::traits::DiscussionRepo;

pub const POST_CREATION_BONUS: i64 = 2;
pub const COMMENT_CREATION_BONUS: i64 = 1;

/// Inputs of the karma formula for one user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KarmaBreakdown {
    /// Votes received on posts the user authored.
    pub post_votes: VoteTally,
    /// Votes received on comments the user authored.
    pub comment_votes: VoteTally,
    pub posts_authored: u64,
    pub comments_authored: u64,
}

impl KarmaBreakdown {
    pub fn post_karma(&self) -> i64 {
        self.post_votes.score()
    }

    pub fn comment_karma(&self) -> i64 {
        self.comment_votes.score()
    }

    pub fn creation_bonus(&self) -> i64 {
        self.posts_authored as i64 * POST_CREATION_BONUS
            + self.comments_authored as i64 * COMMENT_CREATION_BONUS
    }

    /// Karma before the new-account floor.
    pub fn raw_karma(&self) -> i64 {
        self.post_karma() + self.comment_karma() + self.creation_bonus()
    }

    /// Negative karma is floored to zero only while the account is younger
    /// than `new_account_days`.
    pub fn karma(&self, account_age_days: i64, new_account_days: i64) -> i64 {
        let raw = self.raw_karma();
        if raw < 0 && account_age_days < new_account_days {
            0
        } else {
            raw
        }
    }
}

pub struct KarmaEngine<R: ?Sized> {
    repo: Arc<R>,
    new_account_days: i64,
    /// One lock per user whose karma has been recomputed by this process.
    in_flight: DashMap<UserId, Arc<Mutex<()>>>,
}

impl<R: DiscussionRepo + ?Sized> KarmaEngine<R> {
    pub fn new(repo: Arc<R>, new_account_days: i64) -> Self {
        Self {
            repo,
            new_account_days,
            in_flight: DashMap::new(),
        }
    }

    pub async fn breakdown(&self, user: UserId) -> Result<KarmaBreakdown> {
        self.repo.karma_breakdown(user).await
    }

    /// Recomputes and stores the user's karma.
    pub async fn recompute(&self, user: UserId) -> Result<i64> {
        // the map guard is dropped before awaiting the user lock
        let lock = self.in_flight.entry(user).or_default().clone();
        let _serialized = lock.lock().await;

        let account = self
            .repo
            .get_user(user)
            .await?
            .ok_or_else(|| DiscussError::not_found("user", user))?;

        let breakdown = self.repo.karma_breakdown(user).await?;
        let age_days = account.account_age_days(Utc::now());
        let karma = breakdown.karma(age_days, self.new_account_days);
        debug!(%user, raw = breakdown.raw_karma(), age_days, karma, "karma recomputed");

        self.repo.store_karma(user, karma).await?;
        Ok(karma)
    }

    /// Recomputes every user; returns how many profiles were refreshed.
    pub async fn recompute_all(&self) -> Result<usize> {
        let users = self.repo.list_user_ids().await?;
        for user in &users {
            self.recompute(*user).await?;
        }
        info!(users = users.len(), "karma sweep finished");
        Ok(users.len())
    }
}

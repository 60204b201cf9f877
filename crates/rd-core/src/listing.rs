//! # Post listings
//!
//! A community page lists its posts with their live tallies and comment
//! counts. The store returns them newest first; sorting and the minimum-score
//! filter happen here, so every store orders the same way.

use std::collections::HashMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{DiscussError, Result};
use crate::models::{Post, PostId, VoteDirection, VoteTally};

/// One post with everything a list row shows, as read from the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostStats {
    pub post: Post,
    pub tally: VoteTally,
    pub comment_count: u64,
    pub root_comment_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostSort {
    /// Newest first.
    #[default]
    Recent,
    Oldest,
    /// Highest vote count first.
    Popular,
    /// Most comments (all depths) first.
    Comments,
}

impl FromStr for PostSort {
    type Err = DiscussError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "recent" => Ok(PostSort::Recent),
            "oldest" => Ok(PostSort::Oldest),
            "popular" => Ok(PostSort::Popular),
            "comments" => Ok(PostSort::Comments),
            other => Err(DiscussError::Validation(format!("unknown sort {other:?}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PostQuery {
    pub sort: PostSort,
    /// Drops posts whose vote count is below this.
    pub min_votes: Option<i64>,
}

impl PostQuery {
    pub fn sorted(sort: PostSort) -> Self {
        Self { sort, min_votes: None }
    }

    pub fn with_min_votes(mut self, min_votes: i64) -> Self {
        self.min_votes = Some(min_votes);
        self
    }

    /// Filters and orders `posts`, which must arrive newest first. Ties under
    /// `Popular` and `Comments` keep that order.
    pub fn arrange(
        &self,
        posts: Vec<PostStats>,
        viewer_votes: &HashMap<PostId, VoteDirection>,
    ) -> Vec<PostListing> {
        let mut rows: Vec<PostListing> = posts
            .into_iter()
            .filter(|stats| self.min_votes.map_or(true, |min| stats.tally.score() >= min))
            .map(|stats| PostListing::new(stats, viewer_votes))
            .collect();

        match self.sort {
            PostSort::Recent => {}
            PostSort::Oldest => rows.reverse(),
            PostSort::Popular => rows.sort_by(|a, b| b.vote_count.cmp(&a.vote_count)),
            PostSort::Comments => rows.sort_by(|a, b| b.comment_count.cmp(&a.comment_count)),
        }
        rows
    }
}

/// A list row, annotated for one viewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostListing {
    #[serde(flatten)]
    pub post: Post,
    pub vote_count: i64,
    pub upvotes: u64,
    pub downvotes: u64,
    pub comment_count: u64,
    pub root_comment_count: u64,
    pub viewer_vote: Option<VoteDirection>,
}

impl PostListing {
    fn new(stats: PostStats, viewer_votes: &HashMap<PostId, VoteDirection>) -> Self {
        Self {
            viewer_vote: viewer_votes.get(&stats.post.id).copied(),
            vote_count: stats.tally.score(),
            upvotes: stats.tally.upvotes,
            downvotes: stats.tally.downvotes,
            comment_count: stats.comment_count,
            root_comment_count: stats.root_comment_count,
            post: stats.post,
        }
    }

    pub fn id(&self) -> PostId {
        self.post.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CommunityId, PostBody, UserId};
    use chrono::{Duration, Utc};

    fn stats(minutes_ago: i64, up: u64, down: u64, comments: u64) -> PostStats {
        PostStats {
            post: Post {
                id: PostId::generate(),
                author: UserId::generate(),
                community: CommunityId::generate(),
                title: format!("{minutes_ago} minutes ago"),
                body: PostBody::text("x"),
                created_at: Utc::now() - Duration::minutes(minutes_ago),
            },
            tally: VoteTally::new(up, down),
            comment_count: comments,
            root_comment_count: comments.min(1),
        }
    }

    fn ids(rows: &[PostListing]) -> Vec<PostId> {
        rows.iter().map(PostListing::id).collect()
    }

    #[test]
    fn popular_breaks_ties_newest_first() {
        let newest = stats(1, 2, 0, 0);
        let middle = stats(2, 5, 1, 0);
        let oldest = stats(3, 2, 0, 9);
        let order = [newest.post.id, middle.post.id, oldest.post.id];

        let rows = PostQuery::sorted(PostSort::Popular).arrange(vec![newest, middle, oldest], &HashMap::new());
        assert_eq!(ids(&rows), vec![order[1], order[0], order[2]]);
    }

    #[test]
    fn comments_and_oldest_orders() {
        let newest = stats(1, 0, 0, 1);
        let oldest = stats(5, 0, 0, 4);
        let order = [newest.post.id, oldest.post.id];
        let posts = vec![newest, oldest];

        let by_comments = PostQuery::sorted(PostSort::Comments).arrange(posts.clone(), &HashMap::new());
        assert_eq!(ids(&by_comments), vec![order[1], order[0]]);
        let by_age = PostQuery::sorted(PostSort::Oldest).arrange(posts, &HashMap::new());
        assert_eq!(ids(&by_age), vec![order[1], order[0]]);
    }

    #[test]
    fn min_votes_filters_on_net_score() {
        let liked = stats(1, 3, 1, 0);
        let disliked = stats(2, 1, 2, 0);
        let liked_id = liked.post.id;

        let rows = PostQuery::default()
            .with_min_votes(1)
            .arrange(vec![liked, disliked], &HashMap::from([(liked_id, VoteDirection::Up)]));
        assert_eq!(ids(&rows), vec![liked_id]);
        assert_eq!(rows[0].vote_count, 2);
        assert_eq!(rows[0].viewer_vote, Some(VoteDirection::Up));
    }

    #[test]
    fn sort_names_parse() {
        assert_eq!("popular".parse::<PostSort>().unwrap(), PostSort::Popular);
        assert!("hot".parse::<PostSort>().is_err());
    }
}

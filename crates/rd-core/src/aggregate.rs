//! # Aggregation Engine
//!
//! Vote counts and comment counts are always computed live from the ledger,
//! one target at a time or a whole community listing at once. Nothing here
//! is cached, so a count can never disagree with the votes behind it.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::error::Result;
use crate::listing::{PostListing, PostQuery};
use crate::models::{CommunityId, PostId, Viewer, VoteTally, VoteTarget};
use crate::traits::DiscussionRepo;

pub struct Aggregator<R: ?Sized> {
    repo: Arc<R>,
}

impl<R: DiscussionRepo + ?Sized> Aggregator<R> {
    pub fn new(repo: Arc<R>) -> Self {
        Self { repo }
    }

    /// Up and down counts for one target; zeros when nobody voted.
    pub async fn tally(&self, target: VoteTarget) -> Result<VoteTally> {
        self.repo.tally(target).await
    }

    /// `upvotes - downvotes`, live.
    pub async fn vote_count(&self, target: VoteTarget) -> Result<i64> {
        Ok(self.tally(target).await?.score())
    }

    /// All comments of the post, at every depth.
    pub async fn comment_count(&self, post: PostId) -> Result<u64> {
        self.repo.comment_count(post).await
    }

    /// Comments attached directly to the post.
    pub async fn root_comment_count(&self, post: PostId) -> Result<u64> {
        self.repo.root_comment_count(post).await
    }

    /// The community's posts with counts and the viewer's vote, filtered and
    /// sorted by `query`.
    pub async fn post_listing(&self, community: CommunityId, viewer: Viewer, query: &PostQuery) -> Result<Vec<PostListing>> {
        let posts = self.repo.community_posts(community).await?;
        let viewer_votes = match viewer.user_id() {
            Some(user) => self.repo.post_votes_by(user, community).await?,
            None => HashMap::new(),
        };
        let rows = query.arrange(posts, &viewer_votes);
        debug!(%community, sort = ?query.sort, rows = rows.len(), "post listing built");
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listing::{PostSort, PostStats};
    use crate::models::{Post, PostBody, UserId, VoteDirection};
    use crate::traits::MockDiscussionRepo;
    use chrono::Utc;

    #[tokio::test]
    async fn vote_count_is_the_net_live_tally() {
        let target = VoteTarget::Post(PostId::generate());
        let mut repo = MockDiscussionRepo::new();
        repo.expect_tally().times(2).returning(|_| Ok(VoteTally::new(3, 1)));

        let aggregator = Aggregator::new(Arc::new(repo));
        assert_eq!(aggregator.vote_count(target).await.unwrap(), 2);
        assert_eq!(aggregator.tally(target).await.unwrap(), VoteTally::new(3, 1));
    }

    #[tokio::test]
    async fn unvoted_target_counts_zero() {
        let target = VoteTarget::Post(PostId::generate());
        let mut repo = MockDiscussionRepo::new();
        repo.expect_tally().returning(|_| Ok(VoteTally::default()));

        let aggregator = Aggregator::new(Arc::new(repo));
        assert_eq!(aggregator.vote_count(target).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn anonymous_listing_skips_viewer_votes() {
        let community = CommunityId::generate();
        let post = Post {
            id: PostId::generate(),
            author: UserId::generate(),
            community,
            title: "t".into(),
            body: PostBody::text("b"),
            created_at: Utc::now(),
        };
        let stats = PostStats {
            post: post.clone(),
            tally: VoteTally::new(1, 0),
            comment_count: 4,
            root_comment_count: 2,
        };

        let mut repo = MockDiscussionRepo::new();
        repo.expect_community_posts()
            .returning(move |_| Ok(vec![stats.clone()]));
        repo.expect_post_votes_by().times(0);
        let aggregator = Aggregator::new(Arc::new(repo));

        let rows = aggregator
            .post_listing(community, Viewer::Anonymous, &PostQuery::sorted(PostSort::Comments))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!((rows[0].comment_count, rows[0].root_comment_count), (4, 2));
        assert_eq!(rows[0].viewer_vote, None::<VoteDirection>);
    }
}

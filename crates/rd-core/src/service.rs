//! # Discussion service
//!
//! The surface the (external) view layer talks to. It runs the data flow
//! between engines: a vote goes through the ledger and recomputes the
//! author's karma; a comment goes into the tree and fans out activity events.
//!
//! Once a write has committed the call succeeds. Karma refreshes and event
//! fan-out after the commit only log their failures.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::activity::{is_valid_handle, mentioned_handles, ActivityEvent, NoopSink};
use crate::aggregate::Aggregator;
use crate::error::{DiscussError, Result};
use crate::karma::{KarmaBreakdown, KarmaEngine};
use crate::ledger::VoteLedger;
use crate::listing::{PostListing, PostQuery};
use crate::materialize::{AnnotatedComment, CommentThread, TreeMaterializer, TreeRoot};
use crate::models::{
    Actor, Comment, CommentId, Community, CommunityId, Post, PostBody, PostId, Profile, User,
    UserId, Viewer, VoteDirection, VoteOutcome, VoteTarget, MAX_BIO_LEN, MAX_COMMUNITY_NAME_LEN,
    MAX_DESCRIPTION_LEN, MAX_TITLE_LEN,
};
use crate::policy::DiscussionPolicy;
use crate::reputation::Reputation;
use crate::traits::{ActivitySink, DiscussionRepo};
use crate::tree::CommentTree;

/// What the voter sees right after voting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteReceipt {
    pub target: VoteTarget,
    pub outcome: VoteOutcome,
    pub vote_count: i64,
    pub upvotes: u64,
    pub downvotes: u64,
    /// The voter's vote after this call; `None` after a toggle-off.
    pub viewer_vote: Option<VoteDirection>,
}

pub struct Discussion<R: ?Sized> {
    repo: Arc<R>,
    policy: DiscussionPolicy,
    ledger: VoteLedger<R>,
    aggregator: Aggregator<R>,
    tree: CommentTree<R>,
    materializer: TreeMaterializer<R>,
    karma: KarmaEngine<R>,
    sink: Arc<dyn ActivitySink>,
}

impl<R: DiscussionRepo + ?Sized> Discussion<R> {
    pub fn new(repo: Arc<R>, policy: DiscussionPolicy) -> Self {
        Self {
            ledger: VoteLedger::new(repo.clone(), policy.self_vote, policy.vote_retry_limit),
            aggregator: Aggregator::new(repo.clone()),
            tree: CommentTree::new(repo.clone()),
            materializer: TreeMaterializer::new(repo.clone()),
            karma: KarmaEngine::new(repo.clone(), policy.new_account_days),
            repo,
            policy,
            sink: Arc::new(NoopSink),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn ActivitySink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn policy(&self) -> &DiscussionPolicy {
        &self.policy
    }

    pub fn repo(&self) -> &Arc<R> {
        &self.repo
    }

    pub fn aggregator(&self) -> &Aggregator<R> {
        &self.aggregator
    }

    pub fn tree(&self) -> &CommentTree<R> {
        &self.tree
    }

    // ── Users ───────────────────────────────────────────────────────────────

    /// Creates the user and its profile in one store operation.
    #[instrument(skip(self), err)]
    pub async fn register_user(&self, handle: &str, joined_at: DateTime<Utc>) -> Result<User> {
        if !is_valid_handle(handle) {
            return Err(DiscussError::Validation(format!("invalid handle {handle:?}")));
        }
        let user = User {
            id: UserId::generate(),
            handle: handle.to_string(),
            joined_at,
        };
        self.repo.create_user(user.clone(), Profile::new(user.id)).await?;
        info!(user = %user.id, handle, "user registered");
        Ok(user)
    }

    pub async fn profile(&self, user: UserId) -> Result<Profile> {
        self.repo
            .get_profile(user)
            .await?
            .ok_or_else(|| DiscussError::not_found("profile", user))
    }

    #[instrument(skip(self, bio), err)]
    pub async fn update_bio(&self, user: UserId, bio: &str) -> Result<Profile> {
        if bio.chars().count() > MAX_BIO_LEN {
            return Err(DiscussError::Validation(format!(
                "bio must be at most {MAX_BIO_LEN} characters"
            )));
        }
        if self.repo.get_user(user).await?.is_none() {
            return Err(DiscussError::not_found("user", user));
        }
        self.repo.store_bio(user, bio.to_string()).await?;
        self.profile(user).await
    }

    // ── Communities ─────────────────────────────────────────────────────────

    /// Creates the community; the creator becomes its first member.
    #[instrument(skip(self, description), err)]
    pub async fn create_community(&self, creator: UserId, name: &str, description: &str) -> Result<Community> {
        let name = name.trim();
        if name.is_empty() || name.chars().count() > MAX_COMMUNITY_NAME_LEN {
            return Err(DiscussError::Validation(format!(
                "community name must be 1 to {MAX_COMMUNITY_NAME_LEN} characters"
            )));
        }
        if description.chars().count() > MAX_DESCRIPTION_LEN {
            return Err(DiscussError::Validation(format!(
                "description must be at most {MAX_DESCRIPTION_LEN} characters"
            )));
        }
        if self.repo.get_user(creator).await?.is_none() {
            return Err(DiscussError::not_found("user", creator));
        }

        let community = Community {
            id: CommunityId::generate(),
            name: name.to_string(),
            description: description.to_string(),
            created_at: Utc::now(),
        };
        self.repo.create_community(community.clone(), creator).await?;
        info!(community = %community.id, name, "community created");
        Ok(community)
    }

    pub async fn get_community(&self, id: CommunityId) -> Result<Community> {
        self.repo
            .get_community(id)
            .await?
            .ok_or_else(|| DiscussError::not_found("community", id))
    }

    /// Returns false if the user already was a member.
    pub async fn join_community(&self, user: UserId, community: CommunityId) -> Result<bool> {
        self.get_community(community).await?;
        if self.repo.get_user(user).await?.is_none() {
            return Err(DiscussError::not_found("user", user));
        }
        self.repo.add_member(community, user).await
    }

    /// Returns false if the user was not a member.
    pub async fn leave_community(&self, user: UserId, community: CommunityId) -> Result<bool> {
        self.get_community(community).await?;
        self.repo.remove_member(community, user).await
    }

    pub async fn is_member(&self, user: UserId, community: CommunityId) -> Result<bool> {
        self.repo.is_member(community, user).await
    }

    pub async fn member_count(&self, community: CommunityId) -> Result<u64> {
        self.repo.member_count(community).await
    }

    /// The community's posts as list rows for `viewer`.
    pub async fn community_posts(
        &self,
        community: CommunityId,
        viewer: Viewer,
        query: PostQuery,
    ) -> Result<Vec<PostListing>> {
        self.get_community(community).await?;
        self.aggregator.post_listing(community, viewer, &query).await
    }

    // ── Posts ───────────────────────────────────────────────────────────────

    /// Only members of the community may post into it.
    #[instrument(skip(self, body), err)]
    pub async fn create_post(&self, author: UserId, community: CommunityId, title: &str, body: PostBody) -> Result<Post> {
        let title = title.trim();
        if title.is_empty() || title.chars().count() > MAX_TITLE_LEN {
            return Err(DiscussError::Validation(format!(
                "title must be 1 to {MAX_TITLE_LEN} characters"
            )));
        }
        self.get_community(community).await?;
        if self.repo.get_user(author).await?.is_none() {
            return Err(DiscussError::not_found("user", author));
        }
        if !self.repo.is_member(community, author).await? {
            return Err(DiscussError::Forbidden(format!(
                "user {author} is not a member of community {community}"
            )));
        }

        let post = Post {
            id: PostId::generate(),
            author,
            community,
            title: title.to_string(),
            body,
            created_at: Utc::now(),
        };
        self.repo.create_post(post.clone()).await?;
        info!(post = %post.id, kind = post.post_type().as_str(), "post created");

        // the creation bonus moves the author's karma
        self.refresh_karma(author).await;
        if let Some(content) = post.body.content() {
            if let Err(err) = self.announce_mentions(author, content, VoteTarget::Post(post.id)).await {
                warn!(post = %post.id, error = %err, "post mentions not announced");
            }
        }
        Ok(post)
    }

    pub async fn get_post(&self, id: PostId) -> Result<Post> {
        self.repo
            .get_post(id)
            .await?
            .ok_or_else(|| DiscussError::not_found("post", id))
    }

    /// Removes the post with its comments and votes, then refreshes the karma
    /// of everyone whose content disappeared.
    #[instrument(skip(self), err)]
    pub async fn delete_post(&self, actor: &Actor, id: PostId) -> Result<()> {
        let post = self.get_post(id).await?;
        if !actor.may_delete(post.author) {
            return Err(DiscussError::Forbidden(format!("user {} may not delete post {id}", actor.user)));
        }

        let forest = self.tree.forest(id).await?;
        if !self.repo.delete_post(id).await? {
            return Err(DiscussError::not_found("post", id));
        }

        let mut authors = HashSet::from([post.author]);
        authors.extend(forest.iter().map(|comment| comment.author));
        for author in authors {
            self.refresh_karma(author).await;
        }
        info!(post = %id, comments = forest.len(), "post deleted");
        Ok(())
    }

    // ── Votes ───────────────────────────────────────────────────────────────

    pub async fn cast_vote(&self, user: UserId, target: VoteTarget, direction: VoteDirection) -> Result<VoteOutcome> {
        Ok(self.vote(user, target, direction).await?.outcome)
    }

    /// Casts the vote and refreshes the author's karma. The receipt carries
    /// the live tally after the vote.
    #[instrument(skip(self), err)]
    pub async fn vote(&self, user: UserId, target: VoteTarget, direction: VoteDirection) -> Result<VoteReceipt> {
        let entry = self.ledger.record(user, target, direction).await?;
        let tally = self.aggregator.tally(target).await?;
        self.refresh_karma(entry.author).await;

        let upvote_landed = matches!(entry.outcome, VoteOutcome::Added | VoteOutcome::Changed);
        if direction == VoteDirection::Up && upvote_landed {
            self.publish(ActivityEvent::Upvoted {
                recipient: entry.author,
                actor: user,
                target,
            })
            .await;
        }

        Ok(VoteReceipt {
            target,
            outcome: entry.outcome,
            vote_count: tally.score(),
            upvotes: tally.upvotes,
            downvotes: tally.downvotes,
            viewer_vote: match entry.outcome {
                VoteOutcome::Removed => None,
                VoteOutcome::Added | VoteOutcome::Changed => Some(direction),
            },
        })
    }

    pub async fn vote_count(&self, target: VoteTarget) -> Result<i64> {
        self.aggregator.vote_count(target).await
    }

    pub async fn viewer_vote(&self, user: UserId, target: VoteTarget) -> Result<Option<VoteDirection>> {
        self.ledger.viewer_vote(user, target).await
    }

    // ── Comments ────────────────────────────────────────────────────────────

    #[instrument(skip(self, content), err)]
    pub async fn add_comment(
        &self,
        post: PostId,
        author: UserId,
        content: &str,
        parent: Option<CommentId>,
    ) -> Result<Comment> {
        let comment = self.tree.add_comment(post, author, content, parent).await?;
        self.refresh_karma(author).await;
        if let Err(err) = self.announce(&comment).await {
            warn!(comment = %comment.id, error = %err, "comment activity not announced");
        }
        Ok(comment)
    }

    /// Removes the comment and all replies below it; returns the removed ids.
    #[instrument(skip(self), err)]
    pub async fn delete_comment(&self, actor: &Actor, id: CommentId) -> Result<Vec<CommentId>> {
        let comment = self.tree.get(id).await?;
        let forest = self.tree.forest(comment.post).await?;
        let removed = self.tree.delete_comment(actor, id).await?;

        let mut authors = HashSet::from([comment.author]);
        authors.extend(removed.iter().filter_map(|gone| forest.get(*gone)).map(|c| c.author));
        for author in authors {
            self.refresh_karma(author).await;
        }
        Ok(removed)
    }

    pub async fn children_of(&self, comment: CommentId) -> Result<Vec<Comment>> {
        self.tree.children_of(comment).await
    }

    pub async fn root_comments(&self, post: PostId) -> Result<Vec<Comment>> {
        self.tree.root_comments(post).await
    }

    pub async fn comment_count(&self, post: PostId) -> Result<u64> {
        self.aggregator.comment_count(post).await
    }

    pub async fn root_comment_count(&self, post: PostId) -> Result<u64> {
        self.aggregator.root_comment_count(post).await
    }

    // ── Trees ───────────────────────────────────────────────────────────────

    pub async fn materialize(&self, root: TreeRoot, viewer: Viewer, max_depth: usize) -> Result<Vec<AnnotatedComment>> {
        self.materializer.materialize(root, viewer, max_depth).await
    }

    /// Inline tree for a post page.
    pub async fn post_tree(&self, post: PostId, viewer: Viewer) -> Result<Vec<AnnotatedComment>> {
        self.materialize(TreeRoot::Post(post), viewer, self.policy.inline_depth)
            .await
    }

    /// "Continue thread" view: the comment at depth 0 and its replies down to
    /// `thread_depth`.
    pub async fn thread(&self, comment: CommentId, viewer: Viewer) -> Result<CommentThread> {
        self.materializer
            .thread(comment, viewer, self.policy.thread_depth)
            .await
    }

    // ── Karma ───────────────────────────────────────────────────────────────

    pub async fn recompute_karma(&self, user: UserId) -> Result<i64> {
        self.karma.recompute(user).await
    }

    pub async fn recompute_all_karma(&self) -> Result<usize> {
        self.karma.recompute_all().await
    }

    pub async fn karma_breakdown(&self, user: UserId) -> Result<KarmaBreakdown> {
        self.karma.breakdown(user).await
    }

    /// Badge data for a viewer. Karma is recomputed first so a profile page
    /// never shows a stale level.
    pub async fn reputation(&self, viewer: Viewer) -> Result<Reputation> {
        match viewer.user_id() {
            None => Ok(Reputation::guest()),
            Some(user) => Ok(Reputation::for_karma(self.karma.recompute(user).await?)),
        }
    }

    /// Post-commit karma refresh; the next recompute repairs a failed one.
    async fn refresh_karma(&self, user: UserId) {
        match self.karma.recompute(user).await {
            Ok(_) => {}
            // an author removed by the account system has no karma to keep
            Err(DiscussError::TargetNotFound("user", _)) => {}
            Err(err) => warn!(%user, error = %err, "karma refresh failed"),
        }
    }

    async fn announce(&self, comment: &Comment) -> Result<()> {
        match comment.parent {
            Some(parent_id) => {
                let parent = self.tree.get(parent_id).await?;
                self.publish(ActivityEvent::Replied {
                    recipient: parent.author,
                    actor: comment.author,
                    parent: parent_id,
                    comment: comment.id,
                })
                .await;
            }
            None => {
                let post = self.get_post(comment.post).await?;
                self.publish(ActivityEvent::Commented {
                    recipient: post.author,
                    actor: comment.author,
                    post: post.id,
                    comment: comment.id,
                })
                .await;
            }
        }
        self.announce_mentions(comment.author, &comment.content, VoteTarget::Comment(comment.id))
            .await
    }

    async fn announce_mentions(&self, actor: UserId, content: &str, target: VoteTarget) -> Result<()> {
        for handle in mentioned_handles(content) {
            if let Some(user) = self.repo.find_user_by_handle(handle).await? {
                self.publish(ActivityEvent::Mentioned {
                    recipient: user.id,
                    actor,
                    target,
                })
                .await;
            }
        }
        Ok(())
    }

    async fn publish(&self, event: ActivityEvent) {
        if !event.is_self_directed() {
            self.sink.publish(event).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::RecordingSink;
    use crate::traits::MockDiscussionRepo;

    fn user(handle: &str) -> User {
        User {
            id: UserId::generate(),
            handle: handle.into(),
            joined_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn reply_notifies_parent_author_and_mentions() {
        let op = user("op");
        let replier = user("replier");
        let mentioned = user("grace");
        let post = Post {
            id: PostId::generate(),
            author: op.id,
            community: CommunityId::generate(),
            title: "t".into(),
            body: PostBody::text("b"),
            created_at: Utc::now(),
        };
        let parent = Comment {
            id: CommentId::generate(),
            post: post.id,
            author: op.id,
            content: "root".into(),
            parent: None,
            created_at: Utc::now(),
        };

        let mut repo = MockDiscussionRepo::new();
        let p = post.clone();
        repo.expect_get_post().returning(move |_| Ok(Some(p.clone())));
        let c = parent.clone();
        repo.expect_get_comment().returning(move |_| Ok(Some(c.clone())));
        repo.expect_insert_comment().times(1).returning(|_| Ok(()));
        let r = replier.clone();
        repo.expect_get_user().returning(move |_| Ok(Some(r.clone())));
        repo.expect_karma_breakdown().returning(|_| Ok(KarmaBreakdown::default()));
        repo.expect_store_karma().returning(|_, _| Ok(()));
        let m = mentioned.clone();
        repo.expect_find_user_by_handle()
            .returning(move |handle| Ok((handle == "grace").then(|| m.clone())));

        let sink = Arc::new(RecordingSink::new());
        let service = Discussion::new(Arc::new(repo), DiscussionPolicy::default()).with_sink(sink.clone());

        let reply = service
            .add_comment(post.id, replier.id, "agreed, @grace and @nobody", Some(parent.id))
            .await
            .unwrap();

        assert_eq!(
            sink.events(),
            vec![
                ActivityEvent::Replied {
                    recipient: op.id,
                    actor: replier.id,
                    parent: parent.id,
                    comment: reply.id,
                },
                ActivityEvent::Mentioned {
                    recipient: mentioned.id,
                    actor: replier.id,
                    target: VoteTarget::Comment(reply.id),
                },
            ]
        );
    }

    #[tokio::test]
    async fn anonymous_viewer_is_a_guest() {
        let service = Discussion::new(Arc::new(MockDiscussionRepo::new()), DiscussionPolicy::default());
        let reputation = service.reputation(Viewer::Anonymous).await.unwrap();
        assert_eq!(reputation, Reputation::guest());
    }

    #[tokio::test]
    async fn invalid_handles_never_reach_the_store() {
        let mut repo = MockDiscussionRepo::new();
        repo.expect_create_user().times(0);
        let service = Discussion::new(Arc::new(repo), DiscussionPolicy::default());
        let err = service.register_user("two words", Utc::now()).await.unwrap_err();
        assert!(matches!(err, DiscussError::Validation(_)));
    }

    #[tokio::test]
    async fn mention_lookup_failure_does_not_fail_a_committed_comment() {
        let op = user("op");
        let commenter = user("commenter");
        let post = Post {
            id: PostId::generate(),
            author: op.id,
            community: CommunityId::generate(),
            title: "t".into(),
            body: PostBody::text("b"),
            created_at: Utc::now(),
        };

        let mut repo = MockDiscussionRepo::new();
        let p = post.clone();
        repo.expect_get_post().returning(move |_| Ok(Some(p.clone())));
        repo.expect_insert_comment().times(1).returning(|_| Ok(()));
        let c = commenter.clone();
        repo.expect_get_user().returning(move |_| Ok(Some(c.clone())));
        repo.expect_karma_breakdown().returning(|_| Ok(KarmaBreakdown::default()));
        repo.expect_store_karma().returning(|_, _| Ok(()));
        repo.expect_find_user_by_handle()
            .returning(|_| Err(DiscussError::Internal("handle index offline".into())));

        let sink = Arc::new(RecordingSink::new());
        let service = Discussion::new(Arc::new(repo), DiscussionPolicy::default()).with_sink(sink.clone());

        let comment = service
            .add_comment(post.id, commenter.id, "cc @grace", None)
            .await
            .unwrap();

        assert_eq!(
            sink.events(),
            vec![ActivityEvent::Commented {
                recipient: op.id,
                actor: commenter.id,
                post: post.id,
                comment: comment.id,
            }]
        );
    }

    #[tokio::test]
    async fn karma_failure_after_insert_still_returns_the_comment() {
        let op = user("op");
        let post = Post {
            id: PostId::generate(),
            author: op.id,
            community: CommunityId::generate(),
            title: "t".into(),
            body: PostBody::text("b"),
            created_at: Utc::now(),
        };

        let mut repo = MockDiscussionRepo::new();
        let p = post.clone();
        repo.expect_get_post().returning(move |_| Ok(Some(p.clone())));
        repo.expect_insert_comment().times(1).returning(|_| Ok(()));
        repo.expect_get_user()
            .returning(|_| Err(DiscussError::Internal("pool exhausted".into())));

        let service = Discussion::new(Arc::new(repo), DiscussionPolicy::default());
        assert!(service.add_comment(post.id, op.id, "first", None).await.is_ok());
    }

    #[tokio::test]
    async fn outsiders_cannot_post_into_a_community() {
        let author = user("outsider");
        let community = Community {
            id: CommunityId::generate(),
            name: "rust".into(),
            description: String::new(),
            created_at: Utc::now(),
        };
        let community_id = community.id;

        let mut repo = MockDiscussionRepo::new();
        repo.expect_get_community().returning(move |_| Ok(Some(community.clone())));
        let a = author.clone();
        repo.expect_get_user().returning(move |_| Ok(Some(a.clone())));
        repo.expect_is_member().returning(|_, _| Ok(false));
        repo.expect_create_post().times(0);

        let service = Discussion::new(Arc::new(repo), DiscussionPolicy::default());
        let err = service
            .create_post(author.id, community_id, "hello", PostBody::text("hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, DiscussError::Forbidden(_)));
    }

    #[tokio::test]
    async fn overlong_bio_never_reaches_the_store() {
        let mut repo = MockDiscussionRepo::new();
        repo.expect_store_bio().times(0);
        let service = Discussion::new(Arc::new(repo), DiscussionPolicy::default());

        let bio = "x".repeat(MAX_BIO_LEN + 1);
        let err = service.update_bio(UserId::generate(), &bio).await.unwrap_err();
        assert!(matches!(err, DiscussError::Validation(_)));
    }
}

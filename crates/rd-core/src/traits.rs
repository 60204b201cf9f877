//! # Core Traits (Ports)
//!
//! Any storage plugin must implement [`DiscussionRepo`] to back the engines.
//! Implementations own atomicity: the vote uniqueness constraint and the
//! parent/post check on comment insert must hold under concurrent callers.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::activity::ActivityEvent;
use crate::error::Result;
use crate::karma::KarmaBreakdown;
use crate::listing::PostStats;
use crate::models::{
    Comment, CommentId, Community, CommunityId, Post, PostId, Profile, User, UserId, Vote,
    VoteDirection, VoteId, VoteTally, VoteTarget,
};

/// Persistence contract for users, communities, posts, comments and votes.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait DiscussionRepo: Send + Sync {
    // User Operations

    /// Stores the user and its profile together; fails with `Validation` on a
    /// duplicate handle.
    async fn create_user(&self, user: User, profile: Profile) -> Result<()>;
    async fn get_user(&self, id: UserId) -> Result<Option<User>>;
    async fn find_user_by_handle(&self, handle: &str) -> Result<Option<User>>;
    async fn list_user_ids(&self) -> Result<Vec<UserId>>;
    async fn get_profile(&self, user: UserId) -> Result<Option<Profile>>;
    async fn store_karma(&self, user: UserId, karma: i64) -> Result<()>;
    async fn store_bio(&self, user: UserId, bio: String) -> Result<()>;

    // Community Operations

    /// Stores the community with `creator` as its first member; fails with
    /// `Validation` on a duplicate name.
    async fn create_community(&self, community: Community, creator: UserId) -> Result<()>;
    async fn get_community(&self, id: CommunityId) -> Result<Option<Community>>;
    /// Returns false if the user already was a member.
    async fn add_member(&self, community: CommunityId, user: UserId) -> Result<bool>;
    /// Returns false if the user was not a member.
    async fn remove_member(&self, community: CommunityId, user: UserId) -> Result<bool>;
    async fn is_member(&self, community: CommunityId, user: UserId) -> Result<bool>;
    async fn member_count(&self, community: CommunityId) -> Result<u64>;

    // Post Operations

    /// Fails with `TargetNotFound` when the author or the community is gone.
    async fn create_post(&self, post: Post) -> Result<()>;
    async fn get_post(&self, id: PostId) -> Result<Option<Post>>;
    /// Removes the post with its comments and every vote on either.
    async fn delete_post(&self, id: PostId) -> Result<bool>;
    /// Posts of the community, newest first, with live tallies and comment
    /// counts.
    async fn community_posts(&self, community: CommunityId) -> Result<Vec<PostStats>>;

    // Comment Operations

    /// Inserts atomically with the check that the post exists and that the
    /// parent (if any) exists under the same post.
    async fn insert_comment(&self, comment: Comment) -> Result<()>;
    async fn get_comment(&self, id: CommentId) -> Result<Option<Comment>>;
    /// Every comment of the post, ordered by `(created_at, id)`.
    async fn comments_for_post(&self, post: PostId) -> Result<Vec<Comment>>;
    async fn children_of(&self, comment: CommentId) -> Result<Vec<Comment>>;
    async fn root_comments(&self, post: PostId) -> Result<Vec<Comment>>;
    /// Hard-deletes the comment, its descendants and their votes. Returns the
    /// removed ids in depth-first order, empty if the comment was already gone.
    async fn delete_comment_subtree(&self, id: CommentId) -> Result<Vec<CommentId>>;
    async fn comment_count(&self, post: PostId) -> Result<u64>;
    async fn root_comment_count(&self, post: PostId) -> Result<u64>;

    // Vote Operations
    async fn find_vote(&self, user: UserId, target: VoteTarget) -> Result<Option<Vote>>;
    /// Fails with `DuplicateVoteRace` when another vote for the same
    /// (user, target) already exists, `TargetNotFound` naming whichever of
    /// the voter or the target is gone.
    async fn insert_vote(&self, vote: Vote) -> Result<()>;
    /// Returns false if the vote no longer exists.
    async fn update_vote(&self, id: VoteId, value: VoteDirection) -> Result<bool>;
    async fn delete_vote(&self, id: VoteId) -> Result<bool>;
    async fn tally(&self, target: VoteTarget) -> Result<VoteTally>;
    /// Tallies for every comment of the post that has at least one vote.
    async fn comment_tallies(&self, post: PostId) -> Result<HashMap<CommentId, VoteTally>>;
    /// The user's votes on comments of the post.
    async fn comment_votes_by(&self, user: UserId, post: PostId) -> Result<HashMap<CommentId, VoteDirection>>;
    /// The user's votes on posts of the community.
    async fn post_votes_by(&self, user: UserId, community: CommunityId) -> Result<HashMap<PostId, VoteDirection>>;

    // Karma

    /// Votes received and content authored by the user; zeros when absent.
    async fn karma_breakdown(&self, user: UserId) -> Result<KarmaBreakdown>;
}

/// Receives domain events. Delivery (mail, websockets, inbox) lives outside
/// the core.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait ActivitySink: Send + Sync {
    async fn publish(&self, event: ActivityEvent);
}

//! # rd-store-memory
//!
//! In-process implementation of `DiscussionRepo`.
//! A single `RwLock` over every table gives each trait call the atomicity a
//! database transaction would: the vote uniqueness check and the comment
//! parent check happen under the same write guard as the insert.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use rd_core::error::{DiscussError, Result};
use rd_core::karma::KarmaBreakdown;
use rd_core::listing::PostStats;
use rd_core::models::{
    Comment, CommentId, Community, CommunityId, Post, PostId, Profile, User, UserId, Vote,
    VoteDirection, VoteId, VoteTally, VoteTarget,
};
use rd_core::traits::DiscussionRepo;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Default)]
struct Tables {
    users: HashMap<UserId, User>,
    handles: HashMap<String, UserId>,
    profiles: HashMap<UserId, Profile>,
    communities: HashMap<CommunityId, Community>,
    community_names: HashMap<String, CommunityId>,
    members: HashSet<(CommunityId, UserId)>,
    posts: HashMap<PostId, Post>,
    comments: HashMap<CommentId, Comment>,
    votes: HashMap<VoteId, Vote>,
    /// Uniqueness index over (user, target).
    vote_keys: HashMap<(UserId, VoteTarget), VoteId>,
}

impl Tables {
    fn comments_of(&self, post: PostId) -> Vec<Comment> {
        let mut out: Vec<Comment> = self
            .comments
            .values()
            .filter(|c| c.post == post)
            .cloned()
            .collect();
        out.sort_by_key(Comment::sort_key);
        out
    }

    fn target_exists(&self, target: VoteTarget) -> bool {
        match target {
            VoteTarget::Post(id) => self.posts.contains_key(&id),
            VoteTarget::Comment(id) => self.comments.contains_key(&id),
        }
    }

    fn target_author(&self, target: VoteTarget) -> Option<UserId> {
        match target {
            VoteTarget::Post(id) => self.posts.get(&id).map(|p| p.author),
            VoteTarget::Comment(id) => self.comments.get(&id).map(|c| c.author),
        }
    }

    fn remove_vote(&mut self, id: VoteId) -> bool {
        match self.votes.remove(&id) {
            Some(vote) => {
                self.vote_keys.remove(&(vote.user, vote.target));
                true
            }
            None => false,
        }
    }

    fn remove_votes_on(&mut self, target: VoteTarget) {
        let doomed: Vec<VoteId> = self
            .votes
            .values()
            .filter(|v| v.target == target)
            .map(|v| v.id)
            .collect();
        for id in doomed {
            self.remove_vote(id);
        }
    }

    /// `id` followed by its descendants, depth-first, oldest sibling first.
    fn subtree(&self, id: CommentId) -> Vec<CommentId> {
        let Some(root) = self.comments.get(&id) else {
            return Vec::new();
        };

        let mut children: HashMap<CommentId, Vec<CommentId>> = HashMap::new();
        for comment in self.comments_of(root.post) {
            if let Some(parent) = comment.parent {
                children.entry(parent).or_default().push(comment.id);
            }
        }

        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            out.push(next);
            if let Some(kids) = children.get(&next) {
                stack.extend(kids.iter().rev().copied());
            }
        }
        out
    }

    fn post_stats(&self, post: &Post) -> PostStats {
        let comments = self.comments.values().filter(|c| c.post == post.id);
        let (mut all, mut roots) = (0, 0);
        for comment in comments {
            all += 1;
            if comment.is_root() {
                roots += 1;
            }
        }
        PostStats {
            post: post.clone(),
            tally: self.tally(VoteTarget::Post(post.id)),
            comment_count: all,
            root_comment_count: roots,
        }
    }

    fn tally(&self, target: VoteTarget) -> VoteTally {
        let mut tally = VoteTally::default();
        for vote in self.votes.values().filter(|v| v.target == target) {
            tally.record(vote.value);
        }
        tally
    }
}

#[derive(Default)]
pub struct MemoryDiscussionRepo {
    tables: RwLock<Tables>,
}

impl MemoryDiscussionRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DiscussionRepo for MemoryDiscussionRepo {
    async fn create_user(&self, user: User, profile: Profile) -> Result<()> {
        let mut t = self.tables.write().await;
        if t.handles.contains_key(&user.handle) {
            return Err(DiscussError::Validation(format!("handle {:?} is taken", user.handle)));
        }
        if t.users.contains_key(&user.id) || profile.user_id != user.id {
            return Err(DiscussError::Validation(format!("user {} already exists", user.id)));
        }
        t.handles.insert(user.handle.clone(), user.id);
        t.profiles.insert(user.id, profile);
        t.users.insert(user.id, user);
        Ok(())
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>> {
        Ok(self.tables.read().await.users.get(&id).cloned())
    }

    async fn find_user_by_handle(&self, handle: &str) -> Result<Option<User>> {
        let t = self.tables.read().await;
        Ok(t.handles.get(handle).and_then(|id| t.users.get(id)).cloned())
    }

    async fn list_user_ids(&self) -> Result<Vec<UserId>> {
        let mut ids: Vec<UserId> = self.tables.read().await.users.keys().copied().collect();
        ids.sort();
        Ok(ids)
    }

    async fn get_profile(&self, user: UserId) -> Result<Option<Profile>> {
        Ok(self.tables.read().await.profiles.get(&user).cloned())
    }

    async fn store_karma(&self, user: UserId, karma: i64) -> Result<()> {
        let mut t = self.tables.write().await;
        let profile = t
            .profiles
            .get_mut(&user)
            .ok_or_else(|| DiscussError::not_found("profile", user))?;
        profile.karma = karma;
        Ok(())
    }

    async fn store_bio(&self, user: UserId, bio: String) -> Result<()> {
        let mut t = self.tables.write().await;
        let profile = t
            .profiles
            .get_mut(&user)
            .ok_or_else(|| DiscussError::not_found("profile", user))?;
        profile.bio = bio;
        Ok(())
    }

    async fn create_community(&self, community: Community, creator: UserId) -> Result<()> {
        let mut t = self.tables.write().await;
        if !t.users.contains_key(&creator) {
            return Err(DiscussError::not_found("user", creator));
        }
        if t.community_names.contains_key(&community.name) {
            return Err(DiscussError::Validation(format!(
                "community {:?} already exists",
                community.name
            )));
        }
        t.community_names.insert(community.name.clone(), community.id);
        t.members.insert((community.id, creator));
        t.communities.insert(community.id, community);
        Ok(())
    }

    async fn get_community(&self, id: CommunityId) -> Result<Option<Community>> {
        Ok(self.tables.read().await.communities.get(&id).cloned())
    }

    async fn add_member(&self, community: CommunityId, user: UserId) -> Result<bool> {
        let mut t = self.tables.write().await;
        if !t.users.contains_key(&user) {
            return Err(DiscussError::not_found("user", user));
        }
        if !t.communities.contains_key(&community) {
            return Err(DiscussError::not_found("community", community));
        }
        Ok(t.members.insert((community, user)))
    }

    async fn remove_member(&self, community: CommunityId, user: UserId) -> Result<bool> {
        Ok(self.tables.write().await.members.remove(&(community, user)))
    }

    async fn is_member(&self, community: CommunityId, user: UserId) -> Result<bool> {
        Ok(self.tables.read().await.members.contains(&(community, user)))
    }

    async fn member_count(&self, community: CommunityId) -> Result<u64> {
        let t = self.tables.read().await;
        Ok(t.members.iter().filter(|(c, _)| *c == community).count() as u64)
    }

    async fn create_post(&self, post: Post) -> Result<()> {
        let mut t = self.tables.write().await;
        if !t.users.contains_key(&post.author) {
            return Err(DiscussError::not_found("user", post.author));
        }
        if !t.communities.contains_key(&post.community) {
            return Err(DiscussError::not_found("community", post.community));
        }
        t.posts.insert(post.id, post);
        Ok(())
    }

    async fn get_post(&self, id: PostId) -> Result<Option<Post>> {
        Ok(self.tables.read().await.posts.get(&id).cloned())
    }

    async fn delete_post(&self, id: PostId) -> Result<bool> {
        let mut t = self.tables.write().await;
        if t.posts.remove(&id).is_none() {
            return Ok(false);
        }
        let comment_ids: Vec<CommentId> = t.comments_of(id).iter().map(|c| c.id).collect();
        for comment in &comment_ids {
            t.comments.remove(comment);
            t.remove_votes_on(VoteTarget::Comment(*comment));
        }
        t.remove_votes_on(VoteTarget::Post(id));
        debug!(post = %id, comments = comment_ids.len(), "post removed from memory store");
        Ok(true)
    }

    async fn community_posts(&self, community: CommunityId) -> Result<Vec<PostStats>> {
        let t = self.tables.read().await;
        let mut posts: Vec<&Post> = t.posts.values().filter(|p| p.community == community).collect();
        posts.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(posts.into_iter().map(|post| t.post_stats(post)).collect())
    }

    async fn insert_comment(&self, comment: Comment) -> Result<()> {
        let mut t = self.tables.write().await;
        if !t.posts.contains_key(&comment.post) {
            return Err(DiscussError::not_found("post", comment.post));
        }
        if !t.users.contains_key(&comment.author) {
            return Err(DiscussError::not_found("user", comment.author));
        }
        if let Some(parent_id) = comment.parent {
            let parent = t
                .comments
                .get(&parent_id)
                .ok_or_else(|| DiscussError::not_found("comment", parent_id))?;
            if parent.post != comment.post {
                return Err(DiscussError::CrossPostParent {
                    parent: parent_id.to_string(),
                    parent_post: parent.post.to_string(),
                    post: comment.post.to_string(),
                });
            }
        }
        t.comments.insert(comment.id, comment);
        Ok(())
    }

    async fn get_comment(&self, id: CommentId) -> Result<Option<Comment>> {
        Ok(self.tables.read().await.comments.get(&id).cloned())
    }

    async fn comments_for_post(&self, post: PostId) -> Result<Vec<Comment>> {
        Ok(self.tables.read().await.comments_of(post))
    }

    async fn children_of(&self, comment: CommentId) -> Result<Vec<Comment>> {
        let t = self.tables.read().await;
        let mut out: Vec<Comment> = t
            .comments
            .values()
            .filter(|c| c.parent == Some(comment))
            .cloned()
            .collect();
        out.sort_by_key(Comment::sort_key);
        Ok(out)
    }

    async fn root_comments(&self, post: PostId) -> Result<Vec<Comment>> {
        let t = self.tables.read().await;
        Ok(t.comments_of(post).into_iter().filter(Comment::is_root).collect())
    }

    async fn delete_comment_subtree(&self, id: CommentId) -> Result<Vec<CommentId>> {
        let mut t = self.tables.write().await;
        let removed = t.subtree(id);
        for comment in &removed {
            t.comments.remove(comment);
            t.remove_votes_on(VoteTarget::Comment(*comment));
        }
        Ok(removed)
    }

    async fn comment_count(&self, post: PostId) -> Result<u64> {
        let t = self.tables.read().await;
        Ok(t.comments.values().filter(|c| c.post == post).count() as u64)
    }

    async fn root_comment_count(&self, post: PostId) -> Result<u64> {
        let t = self.tables.read().await;
        Ok(t.comments
            .values()
            .filter(|c| c.post == post && c.is_root())
            .count() as u64)
    }

    async fn find_vote(&self, user: UserId, target: VoteTarget) -> Result<Option<Vote>> {
        let t = self.tables.read().await;
        Ok(t.vote_keys
            .get(&(user, target))
            .and_then(|id| t.votes.get(id))
            .cloned())
    }

    async fn insert_vote(&self, vote: Vote) -> Result<()> {
        let mut t = self.tables.write().await;
        if !t.users.contains_key(&vote.user) {
            return Err(DiscussError::not_found("user", vote.user));
        }
        if !t.target_exists(vote.target) {
            return Err(DiscussError::not_found(vote.target.kind(), vote.target));
        }
        let key = (vote.user, vote.target);
        if t.vote_keys.contains_key(&key) {
            return Err(DiscussError::DuplicateVoteRace(format!(
                "user {} already voted on {}",
                vote.user, vote.target
            )));
        }
        t.vote_keys.insert(key, vote.id);
        t.votes.insert(vote.id, vote);
        Ok(())
    }

    async fn update_vote(&self, id: VoteId, value: VoteDirection) -> Result<bool> {
        let mut t = self.tables.write().await;
        Ok(match t.votes.get_mut(&id) {
            Some(vote) => {
                vote.value = value;
                true
            }
            None => false,
        })
    }

    async fn delete_vote(&self, id: VoteId) -> Result<bool> {
        Ok(self.tables.write().await.remove_vote(id))
    }

    async fn tally(&self, target: VoteTarget) -> Result<VoteTally> {
        Ok(self.tables.read().await.tally(target))
    }

    async fn comment_tallies(&self, post: PostId) -> Result<HashMap<CommentId, VoteTally>> {
        let t = self.tables.read().await;
        let mut out: HashMap<CommentId, VoteTally> = HashMap::new();
        for vote in t.votes.values() {
            if let VoteTarget::Comment(id) = vote.target {
                if t.comments.get(&id).is_some_and(|c| c.post == post) {
                    out.entry(id).or_default().record(vote.value);
                }
            }
        }
        Ok(out)
    }

    async fn comment_votes_by(&self, user: UserId, post: PostId) -> Result<HashMap<CommentId, VoteDirection>> {
        let t = self.tables.read().await;
        Ok(t.votes
            .values()
            .filter(|v| v.user == user)
            .filter_map(|v| match v.target {
                VoteTarget::Comment(id) if t.comments.get(&id).is_some_and(|c| c.post == post) => {
                    Some((id, v.value))
                }
                _ => None,
            })
            .collect())
    }

    async fn post_votes_by(&self, user: UserId, community: CommunityId) -> Result<HashMap<PostId, VoteDirection>> {
        let t = self.tables.read().await;
        Ok(t.votes
            .values()
            .filter(|v| v.user == user)
            .filter_map(|v| match v.target {
                VoteTarget::Post(id) if t.posts.get(&id).is_some_and(|p| p.community == community) => {
                    Some((id, v.value))
                }
                _ => None,
            })
            .collect())
    }

    async fn karma_breakdown(&self, user: UserId) -> Result<KarmaBreakdown> {
        let t = self.tables.read().await;
        let mut breakdown = KarmaBreakdown {
            posts_authored: t.posts.values().filter(|p| p.author == user).count() as u64,
            comments_authored: t.comments.values().filter(|c| c.author == user).count() as u64,
            ..KarmaBreakdown::default()
        };
        for vote in t.votes.values() {
            if t.target_author(vote.target) != Some(user) {
                continue;
            }
            match vote.target {
                VoteTarget::Post(_) => breakdown.post_votes.record(vote.value),
                VoteTarget::Comment(_) => breakdown.comment_votes.record(vote.value),
            }
        }
        Ok(breakdown)
    }
}

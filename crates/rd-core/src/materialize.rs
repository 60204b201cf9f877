//! # Tree Materializer
//!
//! Turns a post's comment forest into a display-ready, depth-bounded tree.
//! Comments at the depth bound carry `has_more_replies` instead of children so
//! the caller can offer a "continue thread" link.
//!
//! A call loads the post's comments, tallies and the viewer's votes in three
//! queries and then walks the in-memory arena. Trees are not cached between calls,
//! so a new comment is visible to the next call.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{DiscussError, Result};
use crate::models::{Comment, CommentId, PostId, Viewer, VoteDirection, VoteTally};
use crate::traits::DiscussionRepo;
use crate::tree::CommentForest;

/// Where materialization starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeRoot {
    /// Root comments of the post.
    Post(PostId),
    /// Replies to one comment (thread view).
    Comment(CommentId),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotatedComment {
    #[serde(flatten)]
    pub comment: Comment,
    pub depth: usize,
    pub vote_count: i64,
    pub upvotes: u64,
    pub downvotes: u64,
    pub viewer_vote: Option<VoteDirection>,
    /// Set only at the depth bound, when replies exist but were not expanded.
    pub has_more_replies: bool,
    pub child_comments: Vec<AnnotatedComment>,
}

impl AnnotatedComment {
    pub fn id(&self) -> CommentId {
        self.comment.id
    }

    /// This node plus everything expanded below it.
    pub fn node_count(&self) -> usize {
        1 + self.child_comments.iter().map(AnnotatedComment::node_count).sum::<usize>()
    }

    pub fn find(&self, id: CommentId) -> Option<&AnnotatedComment> {
        if self.comment.id == id {
            return Some(self);
        }
        self.child_comments.iter().find_map(|child| child.find(id))
    }
}

/// Thread view: one comment with its replies expanded below it. Depths are
/// relative to the anchor, which sits at depth 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentThread {
    pub post: PostId,
    /// For the "parent" link; `None` when the anchor is a root comment.
    pub parent: Option<CommentId>,
    pub anchor: AnnotatedComment,
}

/// Everything needed to annotate one post's tree for one viewer.
#[derive(Debug, Clone, Default)]
pub struct TreeSnapshot {
    forest: CommentForest,
    tallies: HashMap<CommentId, VoteTally>,
    viewer_votes: HashMap<CommentId, VoteDirection>,
}

impl TreeSnapshot {
    pub fn new(
        forest: CommentForest,
        tallies: HashMap<CommentId, VoteTally>,
        viewer_votes: HashMap<CommentId, VoteDirection>,
    ) -> Self {
        Self {
            forest,
            tallies,
            viewer_votes,
        }
    }

    pub fn forest(&self) -> &CommentForest {
        &self.forest
    }

    pub fn tally(&self, id: CommentId) -> VoteTally {
        self.tallies.get(&id).copied().unwrap_or_default()
    }

    /// Depth 0 is the root set: the post's roots, or the children of `anchor`.
    pub fn materialize(&self, anchor: Option<CommentId>, max_depth: usize) -> Vec<AnnotatedComment> {
        match anchor {
            None => self
                .forest
                .roots()
                .map(|c| self.annotate(c, 0, max_depth))
                .collect(),
            Some(id) => self
                .forest
                .children(id)
                .map(|c| self.annotate(c, 0, max_depth))
                .collect(),
        }
    }

    /// `anchor` at depth 0 with its replies from depth 1 down to `max_depth`.
    pub fn thread(&self, anchor: &Comment, max_depth: usize) -> AnnotatedComment {
        self.annotate(anchor, 0, max_depth)
    }

    fn annotate(&self, comment: &Comment, depth: usize, max_depth: usize) -> AnnotatedComment {
        let (child_comments, has_more_replies) = if depth + 1 > max_depth {
            (Vec::new(), self.forest.has_children(comment.id))
        } else {
            let children = self
                .forest
                .children(comment.id)
                .map(|child| self.annotate(child, depth + 1, max_depth))
                .collect();
            (children, false)
        };

        self.node(comment, depth, child_comments, has_more_replies)
    }

    fn node(
        &self,
        comment: &Comment,
        depth: usize,
        child_comments: Vec<AnnotatedComment>,
        has_more_replies: bool,
    ) -> AnnotatedComment {
        let tally = self.tally(comment.id);
        AnnotatedComment {
            comment: comment.clone(),
            depth,
            vote_count: tally.score(),
            upvotes: tally.upvotes,
            downvotes: tally.downvotes,
            viewer_vote: self.viewer_votes.get(&comment.id).copied(),
            has_more_replies,
            child_comments,
        }
    }
}

pub struct TreeMaterializer<R: ?Sized> {
    repo: Arc<R>,
}

impl<R: DiscussionRepo + ?Sized> TreeMaterializer<R> {
    pub fn new(repo: Arc<R>) -> Self {
        Self { repo }
    }

    pub async fn materialize(&self, root: TreeRoot, viewer: Viewer, max_depth: usize) -> Result<Vec<AnnotatedComment>> {
        let (post, anchor) = match root {
            TreeRoot::Post(id) => {
                if self.repo.get_post(id).await?.is_none() {
                    return Err(DiscussError::not_found("post", id));
                }
                (id, None)
            }
            TreeRoot::Comment(id) => (self.comment(id).await?.post, Some(id)),
        };

        let snapshot = self.snapshot(post, viewer).await?;
        let tree = snapshot.materialize(anchor, max_depth);
        debug!(%post, max_depth, roots = tree.len(), "materialized comment tree");
        Ok(tree)
    }

    /// The anchor comment at depth 0, with replies expanded down to depth
    /// `max_depth`.
    pub async fn thread(&self, id: CommentId, viewer: Viewer, max_depth: usize) -> Result<CommentThread> {
        let anchor = self.comment(id).await?;
        let snapshot = self.snapshot(anchor.post, viewer).await?;
        let node = snapshot.thread(&anchor, max_depth);
        Ok(CommentThread {
            post: anchor.post,
            parent: anchor.parent,
            anchor: node,
        })
    }

    pub async fn snapshot(&self, post: PostId, viewer: Viewer) -> Result<TreeSnapshot> {
        let forest = CommentForest::new(self.repo.comments_for_post(post).await?);
        let tallies = self.repo.comment_tallies(post).await?;
        let viewer_votes = match viewer.user_id() {
            Some(user) => self.repo.comment_votes_by(user, post).await?,
            None => HashMap::new(),
        };
        Ok(TreeSnapshot::new(forest, tallies, viewer_votes))
    }

    async fn comment(&self, id: CommentId) -> Result<Comment> {
        self.repo
            .get_comment(id)
            .await?
            .ok_or_else(|| DiscussError::not_found("comment", id))
    }
}

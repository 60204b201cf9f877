//! # Comment Tree
//!
//! Comments form one forest per post. Parent links are ids into an arena, never
//! owning pointers, and a parent is fixed at insert time before any reply to the
//! new comment can exist, so the forest cannot contain a cycle.
//!
//! Siblings are ordered oldest first at every depth.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use crate::error::{DiscussError, Result};
use crate::models::{Actor, Comment, CommentId, PostId, UserId};
use crate::traits::DiscussionRepo;

/// Read-only arena over all comments of a single post.
#[derive(Debug, Clone, Default)]
pub struct CommentForest {
    nodes: Vec<Comment>,
    index: HashMap<CommentId, usize>,
    roots: Vec<usize>,
    children: HashMap<CommentId, Vec<usize>>,
}

impl CommentForest {
    /// Builds the arena. Input order does not matter; comments whose parent
    /// is missing from the input are unreachable from the roots.
    pub fn new(mut comments: Vec<Comment>) -> Self {
        comments.sort_by_key(Comment::sort_key);

        let index = comments
            .iter()
            .enumerate()
            .map(|(slot, comment)| (comment.id, slot))
            .collect();

        let mut roots = Vec::new();
        let mut children: HashMap<CommentId, Vec<usize>> = HashMap::new();
        for (slot, comment) in comments.iter().enumerate() {
            match comment.parent {
                None => roots.push(slot),
                Some(parent) => children.entry(parent).or_default().push(slot),
            }
        }

        Self {
            nodes: comments,
            index,
            roots,
            children,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All comments, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Comment> + '_ {
        self.nodes.iter()
    }

    pub fn get(&self, id: CommentId) -> Option<&Comment> {
        self.index.get(&id).map(|slot| &self.nodes[*slot])
    }

    pub fn roots(&self) -> impl Iterator<Item = &Comment> + '_ {
        self.roots.iter().map(|slot| &self.nodes[*slot])
    }

    pub fn children(&self, id: CommentId) -> impl Iterator<Item = &Comment> + '_ {
        self.children
            .get(&id)
            .into_iter()
            .flatten()
            .map(|slot| &self.nodes[*slot])
    }

    pub fn has_children(&self, id: CommentId) -> bool {
        self.children.get(&id).is_some_and(|slots| !slots.is_empty())
    }

    /// Parent, grandparent, ... up to the root. Stops after `len()` steps so a
    /// corrupt store cannot make it spin.
    pub fn ancestors(&self, id: CommentId) -> impl Iterator<Item = CommentId> + '_ {
        std::iter::successors(self.get(id).and_then(|c| c.parent), |current| {
            self.get(*current).and_then(|c| c.parent)
        })
        .take(self.nodes.len())
    }

    /// Depth-first, pre-order, excluding `id` itself.
    pub fn descendants(&self, id: CommentId) -> Vec<CommentId> {
        let mut out = Vec::new();
        let mut stack: Vec<CommentId> = self.children(id).map(|c| c.id).collect();
        stack.reverse();
        while let Some(next) = stack.pop() {
            out.push(next);
            let mut kids: Vec<CommentId> = self.children(next).map(|c| c.id).collect();
            kids.reverse();
            stack.extend(kids);
        }
        out
    }

    pub fn depth_of(&self, id: CommentId) -> Option<usize> {
        self.get(id).map(|_| self.ancestors(id).count())
    }
}

pub struct CommentTree<R: ?Sized> {
    repo: Arc<R>,
}

impl<R: DiscussionRepo + ?Sized> CommentTree<R> {
    pub fn new(repo: Arc<R>) -> Self {
        Self { repo }
    }

    /// Adds a root comment or a reply. The parent must live under `post`.
    pub async fn add_comment(
        &self,
        post: PostId,
        author: UserId,
        content: &str,
        parent: Option<CommentId>,
    ) -> Result<Comment> {
        let content = content.trim();
        if content.is_empty() {
            return Err(DiscussError::Validation("comment content must not be blank".into()));
        }

        if self.repo.get_post(post).await?.is_none() {
            return Err(DiscussError::not_found("post", post));
        }
        if let Some(parent_id) = parent {
            let parent_comment = self
                .repo
                .get_comment(parent_id)
                .await?
                .ok_or_else(|| DiscussError::not_found("comment", parent_id))?;
            if parent_comment.post != post {
                return Err(DiscussError::CrossPostParent {
                    parent: parent_id.to_string(),
                    parent_post: parent_comment.post.to_string(),
                    post: post.to_string(),
                });
            }
        }

        let comment = Comment {
            id: CommentId::generate(),
            post,
            author,
            content: content.to_string(),
            parent,
            created_at: Utc::now(),
        };
        // The store re-checks post and parent inside its own transaction.
        self.repo.insert_comment(comment.clone()).await?;
        info!(comment = %comment.id, %post, parent = ?parent, "comment added");
        Ok(comment)
    }

    pub async fn get(&self, id: CommentId) -> Result<Comment> {
        self.repo
            .get_comment(id)
            .await?
            .ok_or_else(|| DiscussError::not_found("comment", id))
    }

    pub async fn children_of(&self, comment: CommentId) -> Result<Vec<Comment>> {
        self.repo.children_of(comment).await
    }

    pub async fn root_comments(&self, post: PostId) -> Result<Vec<Comment>> {
        self.repo.root_comments(post).await
    }

    pub async fn forest(&self, post: PostId) -> Result<CommentForest> {
        let comments = self.repo.comments_for_post(post).await?;
        debug!(%post, comments = comments.len(), "loaded comment forest");
        Ok(CommentForest::new(comments))
    }

    /// Hard-deletes the comment and every descendant. Returns the removed ids,
    /// the comment itself first.
    pub async fn delete_comment(&self, actor: &Actor, id: CommentId) -> Result<Vec<CommentId>> {
        let comment = self.get(id).await?;
        if !actor.may_delete(comment.author) {
            return Err(DiscussError::Forbidden(format!(
                "user {} may not delete comment {id}",
                actor.user
            )));
        }

        let removed = self.repo.delete_comment_subtree(id).await?;
        if removed.is_empty() {
            return Err(DiscussError::not_found("comment", id));
        }
        info!(comment = %id, removed = removed.len(), "comment subtree deleted");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn comment(post: PostId, parent: Option<CommentId>, minutes: i64) -> Comment {
        Comment {
            id: CommentId::generate(),
            post,
            author: UserId::generate(),
            content: format!("at {minutes}"),
            parent,
            created_at: Utc::now() + Duration::minutes(minutes),
        }
    }

    #[test]
    fn siblings_are_ordered_oldest_first() {
        let post = PostId::generate();
        let late = comment(post, None, 10);
        let early = comment(post, None, 1);
        let reply_late = comment(post, Some(early.id), 8);
        let reply_early = comment(post, Some(early.id), 2);

        let forest = CommentForest::new(vec![
            late.clone(),
            reply_late.clone(),
            early.clone(),
            reply_early.clone(),
        ]);

        let roots: Vec<_> = forest.roots().map(|c| c.id).collect();
        assert_eq!(roots, vec![early.id, late.id]);
        let kids: Vec<_> = forest.children(early.id).map(|c| c.id).collect();
        assert_eq!(kids, vec![reply_early.id, reply_late.id]);
        assert!(!forest.has_children(late.id));
    }

    #[test]
    fn descendants_are_depth_first() {
        let post = PostId::generate();
        let root = comment(post, None, 0);
        let a = comment(post, Some(root.id), 1);
        let a1 = comment(post, Some(a.id), 2);
        let b = comment(post, Some(root.id), 3);

        let forest = CommentForest::new(vec![root.clone(), a.clone(), a1.clone(), b.clone()]);
        assert_eq!(forest.descendants(root.id), vec![a.id, a1.id, b.id]);
        assert_eq!(forest.depth_of(a1.id), Some(2));
        assert_eq!(forest.ancestors(a1.id).collect::<Vec<_>>(), vec![a.id, root.id]);
    }

    #[test]
    fn no_comment_is_its_own_ancestor() {
        let post = PostId::generate();
        let mut all = vec![comment(post, None, 0)];
        for i in 1..20 {
            let parent = all[(i * 7) % all.len()].id;
            all.push(comment(post, Some(parent), i as i64));
        }
        let forest = CommentForest::new(all.clone());
        for c in &all {
            assert!(forest.ancestors(c.id).all(|a| a != c.id));
        }
    }

    #[test]
    fn orphans_are_unreachable() {
        let post = PostId::generate();
        let orphan = comment(post, Some(CommentId::generate()), 0);
        let forest = CommentForest::new(vec![orphan]);
        assert_eq!(forest.roots().count(), 0);
        assert_eq!(forest.len(), 1);
    }
}

//! # Domain Models
//!
//! These structs represent the core entities of rusty-discuss.
//! We use UUID v7 for time-ordered, globally unique identification, so ids
//! double as a stable tie-breaker when two rows share a `created_at`.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{DiscussError, Result};

pub const MAX_TITLE_LEN: usize = 200;
pub const MAX_BIO_LEN: usize = 500;
pub const MAX_COMMUNITY_NAME_LEN: usize = 50;
pub const MAX_DESCRIPTION_LEN: usize = 500;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Fresh time-ordered id.
            pub fn generate() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

id_type!(UserId);
id_type!(CommunityId);
id_type!(PostId);
id_type!(CommentId);
id_type!(VoteId);

/// Identity supplied by the (external) account system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    /// Unique, case-sensitive handle used for `@mentions`.
    pub handle: String,
    pub joined_at: DateTime<Utc>,
}

impl User {
    /// Whole days since the account was created, never negative.
    pub fn account_age_days(&self, now: DateTime<Utc>) -> i64 {
        (now - self.joined_at).num_days().max(0)
    }
}

/// 1:1 with [`User`]. `karma` is written only by the karma engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub user_id: UserId,
    pub karma: i64,
    pub bio: String,
}

impl Profile {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            karma: 0,
            bio: String::new(),
        }
    }
}

/// Who is looking at a materialized tree or a reputation badge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Viewer {
    #[default]
    Anonymous,
    User(UserId),
}

impl Viewer {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Viewer::User(_))
    }

    pub fn user_id(&self) -> Option<UserId> {
        match self {
            Viewer::User(id) => Some(*id),
            Viewer::Anonymous => None,
        }
    }
}

impl From<Option<UserId>> for Viewer {
    fn from(id: Option<UserId>) -> Self {
        id.map_or(Viewer::Anonymous, Viewer::User)
    }
}

/// The user performing a destructive action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub user: UserId,
    pub is_staff: bool,
}

impl Actor {
    pub fn member(user: UserId) -> Self {
        Self { user, is_staff: false }
    }

    pub fn staff(user: UserId) -> Self {
        Self { user, is_staff: true }
    }

    /// Content may be removed by its author or by staff.
    pub fn may_delete(&self, author: UserId) -> bool {
        self.is_staff || self.user == author
    }
}

/// A named group of members. Only members may post into it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Community {
    pub id: CommunityId,
    /// Unique across the board.
    pub name: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostKind {
    Text,
    Link,
}

impl PostKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostKind::Text => "text",
            PostKind::Link => "link",
        }
    }
}

impl FromStr for PostKind {
    type Err = DiscussError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "text" => Ok(PostKind::Text),
            "link" => Ok(PostKind::Link),
            other => Err(DiscussError::Validation(format!("unknown post type {other:?}"))),
        }
    }
}

/// Exactly one of text content or a link URL, selected by the post type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "post_type", rename_all = "lowercase")]
pub enum PostBody {
    Text { content: String },
    Link { url: String },
}

impl PostBody {
    pub fn text(content: impl Into<String>) -> Self {
        PostBody::Text {
            content: content.into(),
        }
    }

    /// Accepts only absolute http(s) URLs.
    pub fn link(raw: &str) -> Result<Self> {
        let parsed = url::Url::parse(raw.trim())
            .map_err(|e| DiscussError::Validation(format!("invalid link url: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(DiscussError::Validation(format!(
                "unsupported link scheme {:?}",
                parsed.scheme()
            )));
        }
        Ok(PostBody::Link {
            url: parsed.to_string(),
        })
    }

    /// Rebuilds a body from its storage columns, rejecting rows where the
    /// populated column does not match the post type.
    pub fn from_columns(kind: PostKind, content: Option<String>, url: Option<String>) -> Result<Self> {
        match (kind, content, url) {
            (PostKind::Text, Some(content), None) => Ok(PostBody::Text { content }),
            (PostKind::Link, None, Some(url)) => Ok(PostBody::Link { url }),
            (kind, _, _) => Err(DiscussError::Internal(format!(
                "{} post row must populate exactly its own body column",
                kind.as_str()
            ))),
        }
    }

    pub fn kind(&self) -> PostKind {
        match self {
            PostBody::Text { .. } => PostKind::Text,
            PostBody::Link { .. } => PostKind::Link,
        }
    }

    pub fn content(&self) -> Option<&str> {
        match self {
            PostBody::Text { content } => Some(content),
            PostBody::Link { .. } => None,
        }
    }

    pub fn url(&self) -> Option<&str> {
        match self {
            PostBody::Link { url } => Some(url),
            PostBody::Text { .. } => None,
        }
    }
}

/// A submission inside a community. Listing order is newest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: PostId,
    pub author: UserId,
    pub community: CommunityId,
    pub title: String,
    #[serde(flatten)]
    pub body: PostBody,
    pub created_at: DateTime<Utc>,
}

impl Post {
    pub fn post_type(&self) -> PostKind {
        self.body.kind()
    }
}

/// A node of the comment forest. `post`, `author` and `parent` never change
/// after creation, which is what keeps the forest acyclic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: CommentId,
    pub post: PostId,
    pub author: UserId,
    pub content: String,
    pub parent: Option<CommentId>,
    pub created_at: DateTime<Utc>,
}

impl Comment {
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Sibling order: oldest first, id as tie-breaker.
    pub fn sort_key(&self) -> (DateTime<Utc>, CommentId) {
        (self.created_at, self.id)
    }
}

/// What a vote points at. Exactly one of post or comment by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "lowercase")]
pub enum VoteTarget {
    Post(PostId),
    Comment(CommentId),
}

impl VoteTarget {
    /// Builds a target from the nullable post/comment column pair.
    pub fn from_columns(post: Option<Uuid>, comment: Option<Uuid>) -> Result<Self> {
        match (post, comment) {
            (Some(post), None) => Ok(VoteTarget::Post(PostId(post))),
            (None, Some(comment)) => Ok(VoteTarget::Comment(CommentId(comment))),
            (Some(_), Some(_)) => Err(DiscussError::InvalidTarget(
                "both post and comment are set".into(),
            )),
            (None, None) => Err(DiscussError::InvalidTarget(
                "neither post nor comment is set".into(),
            )),
        }
    }

    pub fn post_id(&self) -> Option<PostId> {
        match self {
            VoteTarget::Post(id) => Some(*id),
            VoteTarget::Comment(_) => None,
        }
    }

    pub fn comment_id(&self) -> Option<CommentId> {
        match self {
            VoteTarget::Comment(id) => Some(*id),
            VoteTarget::Post(_) => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            VoteTarget::Post(_) => "post",
            VoteTarget::Comment(_) => "comment",
        }
    }
}

impl fmt::Display for VoteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VoteTarget::Post(id) => write!(f, "post:{id}"),
            VoteTarget::Comment(id) => write!(f, "comment:{id}"),
        }
    }
}

/// Up (+1) or down (-1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i8", try_from = "i8")]
pub enum VoteDirection {
    Up,
    Down,
}

impl VoteDirection {
    pub fn value(&self) -> i8 {
        match self {
            VoteDirection::Up => 1,
            VoteDirection::Down => -1,
        }
    }
}

impl From<VoteDirection> for i8 {
    fn from(direction: VoteDirection) -> Self {
        direction.value()
    }
}

impl TryFrom<i8> for VoteDirection {
    type Error = DiscussError;

    fn try_from(value: i8) -> Result<Self> {
        match value {
            1 => Ok(VoteDirection::Up),
            -1 => Ok(VoteDirection::Down),
            other => Err(DiscussError::Validation(format!("vote value must be +1 or -1, got {other}"))),
        }
    }
}

impl TryFrom<i64> for VoteDirection {
    type Error = DiscussError;

    fn try_from(value: i64) -> Result<Self> {
        i8::try_from(value)
            .map_err(|_| DiscussError::Validation(format!("vote value must be +1 or -1, got {value}")))
            .and_then(VoteDirection::try_from)
    }
}

impl FromStr for VoteDirection {
    type Err = DiscussError;

    /// Accepts the route spellings `upvote`/`downvote` as well as `up`/`down`.
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "up" | "upvote" => Ok(VoteDirection::Up),
            "down" | "downvote" => Ok(VoteDirection::Down),
            other => Err(DiscussError::Validation(format!("unknown vote direction {other:?}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub id: VoteId,
    pub user: UserId,
    pub target: VoteTarget,
    pub value: VoteDirection,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteOutcome {
    Added,
    Changed,
    Removed,
}

impl VoteOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoteOutcome::Added => "added",
            VoteOutcome::Changed => "changed",
            VoteOutcome::Removed => "removed",
        }
    }
}

/// Up and down vote counts for one target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteTally {
    pub upvotes: u64,
    pub downvotes: u64,
}

impl VoteTally {
    pub fn new(upvotes: u64, downvotes: u64) -> Self {
        Self { upvotes, downvotes }
    }

    pub fn record(&mut self, direction: VoteDirection) {
        match direction {
            VoteDirection::Up => self.upvotes += 1,
            VoteDirection::Down => self.downvotes += 1,
        }
    }

    /// Net score, `upvotes - downvotes`.
    pub fn score(&self) -> i64 {
        self.upvotes as i64 - self.downvotes as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vote_target_requires_exactly_one_column() {
        let id = Uuid::now_v7();
        assert_eq!(
            VoteTarget::from_columns(Some(id), None).unwrap(),
            VoteTarget::Post(PostId(id))
        );
        assert_eq!(
            VoteTarget::from_columns(None, Some(id)).unwrap(),
            VoteTarget::Comment(CommentId(id))
        );
        assert!(matches!(
            VoteTarget::from_columns(Some(id), Some(id)),
            Err(DiscussError::InvalidTarget(_))
        ));
        assert!(matches!(
            VoteTarget::from_columns(None, None),
            Err(DiscussError::InvalidTarget(_))
        ));
    }

    #[test]
    fn direction_parses_route_spellings() {
        assert_eq!("upvote".parse::<VoteDirection>().unwrap(), VoteDirection::Up);
        assert_eq!("down".parse::<VoteDirection>().unwrap(), VoteDirection::Down);
        assert!("sideways".parse::<VoteDirection>().is_err());
        assert!(VoteDirection::try_from(0i8).is_err());
        assert_eq!(VoteDirection::try_from(-1i64).unwrap(), VoteDirection::Down);
    }

    #[test]
    fn link_body_rejects_non_http_urls() {
        assert!(PostBody::link("https://example.com/a").is_ok());
        assert!(PostBody::link("ftp://example.com").is_err());
        assert!(PostBody::link("not a url").is_err());
    }

    #[test]
    fn post_body_columns_must_match_kind() {
        assert!(PostBody::from_columns(PostKind::Text, Some("hi".into()), None).is_ok());
        assert!(PostBody::from_columns(PostKind::Text, None, Some("https://x.y".into())).is_err());
        assert!(PostBody::from_columns(PostKind::Link, Some("a".into()), Some("b".into())).is_err());
    }

    #[test]
    fn account_age_counts_whole_days() {
        let now = Utc::now();
        let user = User {
            id: UserId::generate(),
            handle: "ada".into(),
            joined_at: now - chrono::Duration::hours(49),
        };
        assert_eq!(user.account_age_days(now), 2);
    }

    #[test]
    fn tally_score_is_net() {
        let mut tally = VoteTally::default();
        tally.record(VoteDirection::Up);
        tally.record(VoteDirection::Up);
        tally.record(VoteDirection::Down);
        assert_eq!(tally.score(), 1);
    }
}

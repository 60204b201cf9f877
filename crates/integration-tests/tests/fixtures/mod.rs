#![allow(dead_code)]

use std::sync::Arc;

use chrono::{Duration, Utc};
use rd_core::{
    Comment, CommentId, Community, CommunityId, Discussion, DiscussionPolicy, DiscussionRepo, Post,
    PostBody, PostId, RecordingSink, User, UserId,
};
use rd_store_memory::MemoryDiscussionRepo;

pub fn memory() -> Discussion<MemoryDiscussionRepo> {
    memory_with(DiscussionPolicy::default())
}

pub fn memory_with(policy: DiscussionPolicy) -> Discussion<MemoryDiscussionRepo> {
    Discussion::new(Arc::new(MemoryDiscussionRepo::new()), policy)
}

pub fn recording() -> (Discussion<MemoryDiscussionRepo>, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::new());
    let discussion = memory().with_sink(sink.clone());
    (discussion, sink)
}

/// Registers a user whose account is `age_days` old.
pub async fn user<R: DiscussionRepo + ?Sized>(d: &Discussion<R>, handle: &str, age_days: i64) -> User {
    d.register_user(handle, Utc::now() - Duration::days(age_days))
        .await
        .expect("register user")
}

/// `count` fresh, established voters.
pub async fn crowd<R: DiscussionRepo + ?Sized>(d: &Discussion<R>, prefix: &str, count: usize) -> Vec<UserId> {
    let mut ids = Vec::with_capacity(count);
    for i in 0..count {
        ids.push(user(d, &format!("{prefix}{i}"), 365).await.id);
    }
    ids
}

/// A community with a unique name; `creator` is its first member.
pub async fn community<R: DiscussionRepo + ?Sized>(d: &Discussion<R>, creator: UserId) -> Community {
    d.create_community(creator, &format!("c-{}", CommunityId::generate()), "")
        .await
        .expect("create community")
}

/// A text post in a fresh community created by `author`.
pub async fn text_post<R: DiscussionRepo + ?Sized>(d: &Discussion<R>, author: UserId) -> Post {
    let home = community(d, author).await;
    d.create_post(author, home.id, "Borrow checker questions", PostBody::text("ask away"))
        .await
        .expect("create post")
}

pub async fn reply<R: DiscussionRepo + ?Sized>(
    d: &Discussion<R>,
    post: PostId,
    author: UserId,
    parent: Option<CommentId>,
) -> Comment {
    d.add_comment(post, author, "a comment", parent)
        .await
        .expect("add comment")
}

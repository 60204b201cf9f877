//! The service-level contracts again, this time over SQLite.

mod fixtures;

use std::sync::Arc;

use fixtures::{reply, text_post, user};
use rd_core::{
    Actor, DiscussError, Discussion, DiscussionPolicy, PostBody, PostQuery, PostSort, TreeRoot,
    Viewer, VoteDirection, VoteOutcome, VoteTarget,
};
use rd_db_sqlite::SqliteDiscussionRepo;
use tokio_test::assert_err;

async fn sqlite() -> Discussion<SqliteDiscussionRepo> {
    let repo = SqliteDiscussionRepo::new("sqlite::memory:")
        .await
        .expect("in-memory sqlite");
    Discussion::new(Arc::new(repo), DiscussionPolicy::default())
}

#[tokio::test]
async fn test_toggle_and_karma_over_sqlite() {
    let d = sqlite().await;
    let a = user(&d, "a", 100).await;
    let b = user(&d, "b", 100).await;
    let post = text_post(&d, a.id).await;
    let comment = reply(&d, post.id, a.id, None).await;
    let target = VoteTarget::Post(post.id);

    let outcomes = [
        d.cast_vote(b.id, target, VoteDirection::Up).await.unwrap(),
        d.cast_vote(b.id, target, VoteDirection::Up).await.unwrap(),
        d.cast_vote(b.id, target, VoteDirection::Up).await.unwrap(),
    ];
    assert_eq!(outcomes, [VoteOutcome::Added, VoteOutcome::Removed, VoteOutcome::Added]);

    d.cast_vote(b.id, VoteTarget::Comment(comment.id), VoteDirection::Down)
        .await
        .unwrap();
    assert_eq!(d.profile(a.id).await.unwrap().karma, 3);
    assert_eq!(d.vote_count(target).await.unwrap(), 1);
}

#[tokio::test]
async fn test_karma_floor_over_sqlite() {
    let d = sqlite().await;
    let fresh = user(&d, "fresh", 5).await;
    let veteran = user(&d, "veteran", 40).await;
    let post = text_post(&d, fresh.id).await;
    let old_post = text_post(&d, veteran.id).await;

    for i in 0..12 {
        let critic = user(&d, &format!("critic{i}"), 365).await;
        d.cast_vote(critic.id, VoteTarget::Post(post.id), VoteDirection::Down)
            .await
            .unwrap();
        d.cast_vote(critic.id, VoteTarget::Post(old_post.id), VoteDirection::Down)
            .await
            .unwrap();
    }

    assert_eq!(d.profile(fresh.id).await.unwrap().karma, 0);
    assert_eq!(d.profile(veteran.id).await.unwrap().karma, -10);
}

#[tokio::test]
async fn test_tree_shape_over_sqlite() {
    let d = sqlite().await;
    let a = user(&d, "a", 100).await;
    let post = text_post(&d, a.id).await;
    let r = reply(&d, post.id, a.id, None).await;
    let c1 = reply(&d, post.id, a.id, Some(r.id)).await;
    let c2 = reply(&d, post.id, a.id, Some(c1.id)).await;

    let tree = d
        .materialize(TreeRoot::Post(post.id), Viewer::Anonymous, 1)
        .await
        .unwrap();
    assert_eq!(tree[0].id(), r.id);
    assert_eq!(tree[0].child_comments[0].id(), c1.id);
    assert!(tree[0].child_comments[0].has_more_replies);

    let thread = d.thread(c1.id, Viewer::User(a.id)).await.unwrap();
    assert_eq!(thread.parent, Some(r.id));
    assert_eq!(thread.anchor.depth, 0);
    assert_eq!(thread.anchor.child_comments[0].id(), c2.id);
    assert_eq!(thread.anchor.child_comments[0].depth, 1);

    let removed = d.delete_comment(&Actor::member(a.id), r.id).await.unwrap();
    assert_eq!(removed, vec![r.id, c1.id, c2.id]);
    assert_eq!(d.comment_count(post.id).await.unwrap(), 0);
}

#[tokio::test]
async fn test_cross_post_reply_over_sqlite() {
    let d = sqlite().await;
    let a = user(&d, "a", 100).await;
    let first = text_post(&d, a.id).await;
    let second = text_post(&d, a.id).await;
    let parent = reply(&d, first.id, a.id, None).await;

    let err = assert_err!(d.add_comment(second.id, a.id, "misplaced", Some(parent.id)).await);
    assert!(matches!(err, DiscussError::CrossPostParent { .. }));
}

#[tokio::test]
async fn test_reply_to_deleted_parent_over_sqlite() {
    let d = sqlite().await;
    let a = user(&d, "a", 100).await;
    let post = text_post(&d, a.id).await;
    let parent = reply(&d, post.id, a.id, None).await;
    d.delete_comment(&Actor::member(a.id), parent.id).await.unwrap();

    let err = assert_err!(d.add_comment(post.id, a.id, "orphan", Some(parent.id)).await);
    assert!(matches!(err, DiscussError::TargetNotFound("comment", _)));
    assert_eq!(d.comment_count(post.id).await.unwrap(), 0);
}

#[tokio::test]
async fn test_community_listing_over_sqlite() {
    let d = sqlite().await;
    let a = user(&d, "a", 100).await;
    let b = user(&d, "b", 100).await;
    let home = d.create_community(a.id, "sqlite", "storage talk").await.unwrap();
    assert!(d.join_community(b.id, home.id).await.unwrap());

    let quiet = d
        .create_post(a.id, home.id, "Quiet", PostBody::text("nobody cares"))
        .await
        .unwrap();
    let busy = d
        .create_post(b.id, home.id, "Busy", PostBody::text("everybody cares"))
        .await
        .unwrap();
    let root = reply(&d, quiet.id, b.id, None).await;
    reply(&d, quiet.id, a.id, Some(root.id)).await;
    d.cast_vote(a.id, VoteTarget::Post(busy.id), VoteDirection::Up).await.unwrap();

    let recent = d
        .community_posts(home.id, Viewer::User(a.id), PostQuery::default())
        .await
        .unwrap();
    let ids: Vec<_> = recent.iter().map(|row| row.id()).collect();
    assert_eq!(ids, vec![busy.id, quiet.id]);
    assert_eq!(recent[0].viewer_vote, Some(VoteDirection::Up));
    assert_eq!((recent[1].comment_count, recent[1].root_comment_count), (2, 1));

    let by_comments = d
        .community_posts(home.id, Viewer::Anonymous, PostQuery::sorted(PostSort::Comments))
        .await
        .unwrap();
    assert_eq!(by_comments[0].id(), quiet.id);
    assert_eq!(by_comments[1].viewer_vote, None);
}

//! # rd-db-sqlite Implementation
//!
//! This module implements the data mapping between the SQLite relational model
//! and the `rd-core` domain models.
//!
//! The schema carries the invariants the engines rely on: the partial unique
//! indexes allow one vote per (user, post) and per (user, comment), and the
//! `CHECK` on `votes` enforces exactly one target column.

use std::collections::HashMap;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rd_core::error::{DiscussError, Result};
use rd_core::karma::KarmaBreakdown;
use rd_core::listing::PostStats;
use rd_core::models::{
    Comment, CommentId, Community, CommunityId, Post, PostBody, PostId, PostKind, Profile, User,
    UserId, Vote, VoteDirection, VoteId, VoteTally, VoteTarget,
};
use rd_core::traits::DiscussionRepo;
use rd_core::tree::CommentForest;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tracing::{debug, info};
use uuid::Uuid;

const SCHEMA: &str = include_str!("schema.sql");

const POST_COLUMNS: &str = "id, author_id, community_id, title, post_type, content, url, created_at";
const COMMENT_COLUMNS: &str = "id, post_id, author_id, parent_id, content, created_at";
const VOTE_COLUMNS: &str = "id, user_id, post_id, comment_id, value, created_at";

pub struct SqliteDiscussionRepo {
    pool: SqlitePool,
}

// Helpers for UUID conversion
fn uuid_to_blob(id: Uuid) -> Vec<u8> {
    id.as_bytes().to_vec()
}

fn blob_to_uuid(blob: &[u8]) -> Result<Uuid> {
    Uuid::from_slice(blob).map_err(|e| DiscussError::Internal(format!("malformed id column: {e}")))
}

fn to_micros(at: DateTime<Utc>) -> i64 {
    at.timestamp_micros()
}

fn from_micros(micros: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| DiscussError::Internal(format!("timestamp out of range: {micros}")))
}

fn count(value: i64) -> u64 {
    u64::try_from(value).unwrap_or_default()
}

fn db_err(e: sqlx::Error) -> DiscussError {
    DiscussError::Internal(e.to_string())
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn is_foreign_key_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_foreign_key_violation())
}

/// Column and key for a vote target; the column name is always one of two
/// literals.
fn target_column(target: VoteTarget) -> (&'static str, Vec<u8>) {
    match target {
        VoteTarget::Post(id) => ("post_id", uuid_to_blob(id.as_uuid())),
        VoteTarget::Comment(id) => ("comment_id", uuid_to_blob(id.as_uuid())),
    }
}

fn get_uuid(row: &SqliteRow, column: &str) -> Result<Uuid> {
    let blob: Vec<u8> = row.try_get(column).map_err(db_err)?;
    blob_to_uuid(&blob)
}

fn get_opt_uuid(row: &SqliteRow, column: &str) -> Result<Option<Uuid>> {
    let blob: Option<Vec<u8>> = row.try_get(column).map_err(db_err)?;
    blob.as_deref().map(blob_to_uuid).transpose()
}

fn get_time(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>> {
    from_micros(row.try_get(column).map_err(db_err)?)
}

fn user_from_row(row: &SqliteRow) -> Result<User> {
    Ok(User {
        id: get_uuid(row, "id")?.into(),
        handle: row.try_get("handle").map_err(db_err)?,
        joined_at: get_time(row, "joined_at")?,
    })
}

fn post_from_row(row: &SqliteRow) -> Result<Post> {
    let kind = PostKind::from_str(&row.try_get::<String, _>("post_type").map_err(db_err)?)?;
    Ok(Post {
        id: get_uuid(row, "id")?.into(),
        author: get_uuid(row, "author_id")?.into(),
        community: get_uuid(row, "community_id")?.into(),
        title: row.try_get("title").map_err(db_err)?,
        body: PostBody::from_columns(
            kind,
            row.try_get("content").map_err(db_err)?,
            row.try_get("url").map_err(db_err)?,
        )?,
        created_at: get_time(row, "created_at")?,
    })
}

fn community_from_row(row: &SqliteRow) -> Result<Community> {
    Ok(Community {
        id: get_uuid(row, "id")?.into(),
        name: row.try_get("name").map_err(db_err)?,
        description: row.try_get("description").map_err(db_err)?,
        created_at: get_time(row, "created_at")?,
    })
}

fn comment_from_row(row: &SqliteRow) -> Result<Comment> {
    Ok(Comment {
        id: get_uuid(row, "id")?.into(),
        post: get_uuid(row, "post_id")?.into(),
        author: get_uuid(row, "author_id")?.into(),
        content: row.try_get("content").map_err(db_err)?,
        parent: get_opt_uuid(row, "parent_id")?.map(CommentId::from),
        created_at: get_time(row, "created_at")?,
    })
}

fn vote_from_row(row: &SqliteRow) -> Result<Vote> {
    Ok(Vote {
        id: get_uuid(row, "id")?.into(),
        user: get_uuid(row, "user_id")?.into(),
        target: VoteTarget::from_columns(get_opt_uuid(row, "post_id")?, get_opt_uuid(row, "comment_id")?)?,
        value: VoteDirection::try_from(row.try_get::<i64, _>("value").map_err(db_err)?)?,
        created_at: get_time(row, "created_at")?,
    })
}

fn tally_from_row(row: &SqliteRow) -> Result<VoteTally> {
    Ok(VoteTally::new(
        count(row.try_get("up").map_err(db_err)?),
        count(row.try_get("down").map_err(db_err)?),
    ))
}

impl SqliteDiscussionRepo {
    /// Connects and brings the schema up to date.
    pub async fn new(url: &str) -> Result<Self> {
        let repo = Self::connect(url, 5).await?;
        repo.migrate().await?;
        Ok(repo)
    }

    /// An in-memory database lives and dies with its connection, so it gets
    /// exactly one that is never recycled.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(db_err)?
            .create_if_missing(true)
            .foreign_keys(true);

        let in_memory = url.contains(":memory:") || url.contains("mode=memory");
        let pool = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(max_connections.max(1))
        };

        let pool = pool.connect_with(options).await.map_err(db_err)?;
        debug!(url, in_memory, "connected to sqlite");
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await.map_err(db_err)?;
        info!("sqlite schema is up to date");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Turns a foreign key violation into `TargetNotFound` for the first of
    /// `refs` that has no row; any other error stays internal.
    async fn missing_reference(&self, refs: &[(&'static str, &'static str, Uuid)], cause: sqlx::Error) -> DiscussError {
        if !is_foreign_key_violation(&cause) {
            return db_err(cause);
        }
        for &(kind, table, id) in refs {
            let sql = format!("SELECT 1 FROM {table} WHERE id = ?");
            match sqlx::query(&sql).bind(uuid_to_blob(id)).fetch_optional(&self.pool).await {
                Ok(Some(_)) => {}
                Ok(None) => return DiscussError::not_found(kind, id),
                Err(e) => return db_err(e),
            }
        }
        db_err(cause)
    }

    async fn comments_where(&self, clause: &str, key: Vec<u8>) -> Result<Vec<Comment>> {
        let sql = format!("SELECT {COMMENT_COLUMNS} FROM comments WHERE {clause} ORDER BY created_at ASC, id ASC");
        sqlx::query(&sql)
            .bind(key)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?
            .iter()
            .map(comment_from_row)
            .collect()
    }
}

#[async_trait]
impl DiscussionRepo for SqliteDiscussionRepo {
    /// User and profile go in together or not at all.
    async fn create_user(&self, user: User, profile: Profile) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query("INSERT INTO users (id, handle, joined_at) VALUES (?, ?, ?)")
            .bind(uuid_to_blob(user.id.as_uuid()))
            .bind(&user.handle)
            .bind(to_micros(user.joined_at))
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    DiscussError::Validation(format!("handle {:?} is taken", user.handle))
                } else {
                    db_err(e)
                }
            })?;

        sqlx::query("INSERT INTO profiles (user_id, karma, bio) VALUES (?, ?, ?)")
            .bind(uuid_to_blob(user.id.as_uuid()))
            .bind(profile.karma)
            .bind(&profile.bio)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>> {
        sqlx::query("SELECT id, handle, joined_at FROM users WHERE id = ?")
            .bind(uuid_to_blob(id.as_uuid()))
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .as_ref()
            .map(user_from_row)
            .transpose()
    }

    async fn find_user_by_handle(&self, handle: &str) -> Result<Option<User>> {
        sqlx::query("SELECT id, handle, joined_at FROM users WHERE handle = ?")
            .bind(handle)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .as_ref()
            .map(user_from_row)
            .transpose()
    }

    async fn list_user_ids(&self) -> Result<Vec<UserId>> {
        sqlx::query("SELECT id FROM users ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?
            .iter()
            .map(|row| get_uuid(row, "id").map(UserId::from))
            .collect()
    }

    async fn get_profile(&self, user: UserId) -> Result<Option<Profile>> {
        let row = sqlx::query("SELECT user_id, karma, bio FROM profiles WHERE user_id = ?")
            .bind(uuid_to_blob(user.as_uuid()))
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        match row {
            Some(row) => Ok(Some(Profile {
                user_id: get_uuid(&row, "user_id")?.into(),
                karma: row.try_get("karma").map_err(db_err)?,
                bio: row.try_get("bio").map_err(db_err)?,
            })),
            None => Ok(None),
        }
    }

    async fn store_karma(&self, user: UserId, karma: i64) -> Result<()> {
        let result = sqlx::query("UPDATE profiles SET karma = ? WHERE user_id = ?")
            .bind(karma)
            .bind(uuid_to_blob(user.as_uuid()))
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(DiscussError::not_found("profile", user));
        }
        Ok(())
    }

    async fn store_bio(&self, user: UserId, bio: String) -> Result<()> {
        let result = sqlx::query("UPDATE profiles SET bio = ? WHERE user_id = ?")
            .bind(bio)
            .bind(uuid_to_blob(user.as_uuid()))
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(DiscussError::not_found("profile", user));
        }
        Ok(())
    }

    /// Community row and the creator's membership go in together.
    async fn create_community(&self, community: Community, creator: UserId) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query("INSERT INTO communities (id, name, description, created_at) VALUES (?, ?, ?, ?)")
            .bind(uuid_to_blob(community.id.as_uuid()))
            .bind(&community.name)
            .bind(&community.description)
            .bind(to_micros(community.created_at))
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    DiscussError::Validation(format!("community {:?} already exists", community.name))
                } else {
                    db_err(e)
                }
            })?;

        sqlx::query("INSERT INTO memberships (community_id, user_id) VALUES (?, ?)")
            .bind(uuid_to_blob(community.id.as_uuid()))
            .bind(uuid_to_blob(creator.as_uuid()))
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                // the community row was inserted just above
                if is_foreign_key_violation(&e) {
                    DiscussError::not_found("user", creator)
                } else {
                    db_err(e)
                }
            })?;

        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn get_community(&self, id: CommunityId) -> Result<Option<Community>> {
        sqlx::query("SELECT id, name, description, created_at FROM communities WHERE id = ?")
            .bind(uuid_to_blob(id.as_uuid()))
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .as_ref()
            .map(community_from_row)
            .transpose()
    }

    async fn add_member(&self, community: CommunityId, user: UserId) -> Result<bool> {
        let inserted = sqlx::query("INSERT OR IGNORE INTO memberships (community_id, user_id) VALUES (?, ?)")
            .bind(uuid_to_blob(community.as_uuid()))
            .bind(uuid_to_blob(user.as_uuid()))
            .execute(&self.pool)
            .await;
        match inserted {
            Ok(result) => Ok(result.rows_affected() > 0),
            Err(e) => {
                let refs = [
                    ("user", "users", user.as_uuid()),
                    ("community", "communities", community.as_uuid()),
                ];
                Err(self.missing_reference(&refs, e).await)
            }
        }
    }

    async fn remove_member(&self, community: CommunityId, user: UserId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM memberships WHERE community_id = ? AND user_id = ?")
            .bind(uuid_to_blob(community.as_uuid()))
            .bind(uuid_to_blob(user.as_uuid()))
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn is_member(&self, community: CommunityId, user: UserId) -> Result<bool> {
        Ok(sqlx::query("SELECT 1 FROM memberships WHERE community_id = ? AND user_id = ?")
            .bind(uuid_to_blob(community.as_uuid()))
            .bind(uuid_to_blob(user.as_uuid()))
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .is_some())
    }

    async fn member_count(&self, community: CommunityId) -> Result<u64> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM memberships WHERE community_id = ?")
            .bind(uuid_to_blob(community.as_uuid()))
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(count(total))
    }

    async fn create_post(&self, post: Post) -> Result<()> {
        let inserted = sqlx::query(
            "INSERT INTO posts (id, author_id, community_id, title, post_type, content, url, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(uuid_to_blob(post.id.as_uuid()))
        .bind(uuid_to_blob(post.author.as_uuid()))
        .bind(uuid_to_blob(post.community.as_uuid()))
        .bind(&post.title)
        .bind(post.post_type().as_str())
        .bind(post.body.content())
        .bind(post.body.url())
        .bind(to_micros(post.created_at))
        .execute(&self.pool)
        .await;

        if let Err(e) = inserted {
            let refs = [
                ("user", "users", post.author.as_uuid()),
                ("community", "communities", post.community.as_uuid()),
            ];
            return Err(self.missing_reference(&refs, e).await);
        }
        Ok(())
    }

    async fn get_post(&self, id: PostId) -> Result<Option<Post>> {
        let sql = format!("SELECT {POST_COLUMNS} FROM posts WHERE id = ?");
        sqlx::query(&sql)
            .bind(uuid_to_blob(id.as_uuid()))
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .as_ref()
            .map(post_from_row)
            .transpose()
    }

    /// Detaches replies from their parents first so the comment delete does
    /// not recurse through `parent_id` cascades on deep threads.
    async fn delete_post(&self, id: PostId) -> Result<bool> {
        let key = uuid_to_blob(id.as_uuid());
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query("UPDATE comments SET parent_id = NULL WHERE post_id = ?")
            .bind(&key)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        let comments = sqlx::query("DELETE FROM comments WHERE post_id = ?")
            .bind(&key)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?
            .rows_affected();
        let deleted = sqlx::query("DELETE FROM posts WHERE id = ?")
            .bind(&key)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?
            .rows_affected();

        tx.commit().await.map_err(db_err)?;
        debug!(post = %id, comments, "post deleted");
        Ok(deleted > 0)
    }

    async fn community_posts(&self, community: CommunityId) -> Result<Vec<PostStats>> {
        let rows = sqlx::query(
            "SELECT p.id, p.author_id, p.community_id, p.title, p.post_type, p.content, p.url, p.created_at, \
               (SELECT COALESCE(SUM(v.value > 0), 0) FROM votes v WHERE v.post_id = p.id) AS up, \
               (SELECT COALESCE(SUM(v.value < 0), 0) FROM votes v WHERE v.post_id = p.id) AS down, \
               (SELECT COUNT(*) FROM comments c WHERE c.post_id = p.id) AS comment_count, \
               (SELECT COUNT(*) FROM comments c WHERE c.post_id = p.id AND c.parent_id IS NULL) \
                 AS root_comment_count \
             FROM posts p WHERE p.community_id = ? \
             ORDER BY p.created_at DESC, p.id DESC",
        )
        .bind(uuid_to_blob(community.as_uuid()))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter()
            .map(|row| {
                Ok(PostStats {
                    post: post_from_row(row)?,
                    tally: tally_from_row(row)?,
                    comment_count: count(row.try_get("comment_count").map_err(db_err)?),
                    root_comment_count: count(row.try_get("root_comment_count").map_err(db_err)?),
                })
            })
            .collect()
    }

    /// The post and parent checks run in the same transaction as the insert.
    async fn insert_comment(&self, comment: Comment) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let post_exists = sqlx::query("SELECT 1 FROM posts WHERE id = ?")
            .bind(uuid_to_blob(comment.post.as_uuid()))
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?
            .is_some();
        if !post_exists {
            return Err(DiscussError::not_found("post", comment.post));
        }

        if let Some(parent) = comment.parent {
            let row = sqlx::query("SELECT post_id FROM comments WHERE id = ?")
                .bind(uuid_to_blob(parent.as_uuid()))
                .fetch_optional(&mut *tx)
                .await
                .map_err(db_err)?
                .ok_or_else(|| DiscussError::not_found("comment", parent))?;
            let parent_post = PostId::from(get_uuid(&row, "post_id")?);
            if parent_post != comment.post {
                return Err(DiscussError::CrossPostParent {
                    parent: parent.to_string(),
                    parent_post: parent_post.to_string(),
                    post: comment.post.to_string(),
                });
            }
        }

        sqlx::query(
            "INSERT INTO comments (id, post_id, author_id, parent_id, content, created_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(uuid_to_blob(comment.id.as_uuid()))
        .bind(uuid_to_blob(comment.post.as_uuid()))
        .bind(uuid_to_blob(comment.author.as_uuid()))
        .bind(comment.parent.map(|p| uuid_to_blob(p.as_uuid())))
        .bind(&comment.content)
        .bind(to_micros(comment.created_at))
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if is_foreign_key_violation(&e) {
                DiscussError::not_found("user", comment.author)
            } else {
                db_err(e)
            }
        })?;

        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn get_comment(&self, id: CommentId) -> Result<Option<Comment>> {
        let sql = format!("SELECT {COMMENT_COLUMNS} FROM comments WHERE id = ?");
        sqlx::query(&sql)
            .bind(uuid_to_blob(id.as_uuid()))
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .as_ref()
            .map(comment_from_row)
            .transpose()
    }

    async fn comments_for_post(&self, post: PostId) -> Result<Vec<Comment>> {
        self.comments_where("post_id = ?", uuid_to_blob(post.as_uuid())).await
    }

    async fn children_of(&self, comment: CommentId) -> Result<Vec<Comment>> {
        self.comments_where("parent_id = ?", uuid_to_blob(comment.as_uuid())).await
    }

    async fn root_comments(&self, post: PostId) -> Result<Vec<Comment>> {
        self.comments_where("post_id = ? AND parent_id IS NULL", uuid_to_blob(post.as_uuid()))
            .await
    }

    /// Collects the subtree from the post's forest, then deletes leaves first
    /// so each delete cascades only to that comment's votes.
    async fn delete_comment_subtree(&self, id: CommentId) -> Result<Vec<CommentId>> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let Some(row) = sqlx::query("SELECT post_id FROM comments WHERE id = ?")
            .bind(uuid_to_blob(id.as_uuid()))
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?
        else {
            return Ok(Vec::new());
        };

        let sql = format!("SELECT {COMMENT_COLUMNS} FROM comments WHERE post_id = ?");
        let comments = sqlx::query(&sql)
            .bind(uuid_to_blob(get_uuid(&row, "post_id")?))
            .fetch_all(&mut *tx)
            .await
            .map_err(db_err)?
            .iter()
            .map(comment_from_row)
            .collect::<Result<Vec<_>>>()?;

        let forest = CommentForest::new(comments);
        let mut removed = vec![id];
        removed.extend(forest.descendants(id));

        for comment in removed.iter().rev() {
            sqlx::query("DELETE FROM comments WHERE id = ?")
                .bind(uuid_to_blob(comment.as_uuid()))
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
        }

        tx.commit().await.map_err(db_err)?;
        Ok(removed)
    }

    async fn comment_count(&self, post: PostId) -> Result<u64> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM comments WHERE post_id = ?")
            .bind(uuid_to_blob(post.as_uuid()))
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(count(total))
    }

    async fn root_comment_count(&self, post: PostId) -> Result<u64> {
        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM comments WHERE post_id = ? AND parent_id IS NULL")
                .bind(uuid_to_blob(post.as_uuid()))
                .fetch_one(&self.pool)
                .await
                .map_err(db_err)?;
        Ok(count(total))
    }

    async fn find_vote(&self, user: UserId, target: VoteTarget) -> Result<Option<Vote>> {
        let (column, key) = target_column(target);
        let sql = format!("SELECT {VOTE_COLUMNS} FROM votes WHERE user_id = ? AND {column} = ?");
        sqlx::query(&sql)
            .bind(uuid_to_blob(user.as_uuid()))
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .as_ref()
            .map(vote_from_row)
            .transpose()
    }

    /// The partial unique indexes turn a lost race into `DuplicateVoteRace`;
    /// a vanished voter or target surfaces as a foreign key violation.
    async fn insert_vote(&self, vote: Vote) -> Result<()> {
        let inserted = sqlx::query(
            "INSERT INTO votes (id, user_id, post_id, comment_id, value, created_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(uuid_to_blob(vote.id.as_uuid()))
        .bind(uuid_to_blob(vote.user.as_uuid()))
        .bind(vote.target.post_id().map(|id| uuid_to_blob(id.as_uuid())))
        .bind(vote.target.comment_id().map(|id| uuid_to_blob(id.as_uuid())))
        .bind(i64::from(vote.value.value()))
        .bind(to_micros(vote.created_at))
        .execute(&self.pool)
        .await;

        match inserted {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(DiscussError::DuplicateVoteRace(format!(
                "user {} already voted on {}",
                vote.user, vote.target
            ))),
            Err(e) => {
                let target = match vote.target {
                    VoteTarget::Post(id) => ("post", "posts", id.as_uuid()),
                    VoteTarget::Comment(id) => ("comment", "comments", id.as_uuid()),
                };
                Err(self.missing_reference(&[("user", "users", vote.user.as_uuid()), target], e).await)
            }
        }
    }

    async fn update_vote(&self, id: VoteId, value: VoteDirection) -> Result<bool> {
        let result = sqlx::query("UPDATE votes SET value = ? WHERE id = ?")
            .bind(i64::from(value.value()))
            .bind(uuid_to_blob(id.as_uuid()))
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_vote(&self, id: VoteId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM votes WHERE id = ?")
            .bind(uuid_to_blob(id.as_uuid()))
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn tally(&self, target: VoteTarget) -> Result<VoteTally> {
        let (column, key) = target_column(target);
        let sql = format!(
            "SELECT COALESCE(SUM(value > 0), 0) AS up, COALESCE(SUM(value < 0), 0) AS down \
             FROM votes WHERE {column} = ?"
        );
        let row = sqlx::query(&sql)
            .bind(key)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        tally_from_row(&row)
    }

    async fn comment_tallies(&self, post: PostId) -> Result<HashMap<CommentId, VoteTally>> {
        let rows = sqlx::query(
            "SELECT v.comment_id AS id, SUM(v.value > 0) AS up, SUM(v.value < 0) AS down \
             FROM votes v JOIN comments c ON c.id = v.comment_id \
             WHERE c.post_id = ? GROUP BY v.comment_id",
        )
        .bind(uuid_to_blob(post.as_uuid()))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter()
            .map(|row| Ok((CommentId::from(get_uuid(row, "id")?), tally_from_row(row)?)))
            .collect()
    }

    async fn comment_votes_by(&self, user: UserId, post: PostId) -> Result<HashMap<CommentId, VoteDirection>> {
        let rows = sqlx::query(
            "SELECT v.comment_id AS id, v.value AS value \
             FROM votes v JOIN comments c ON c.id = v.comment_id \
             WHERE v.user_id = ? AND c.post_id = ?",
        )
        .bind(uuid_to_blob(user.as_uuid()))
        .bind(uuid_to_blob(post.as_uuid()))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter()
            .map(|row| {
                let value = VoteDirection::try_from(row.try_get::<i64, _>("value").map_err(db_err)?)?;
                Ok((CommentId::from(get_uuid(row, "id")?), value))
            })
            .collect()
    }

    async fn post_votes_by(&self, user: UserId, community: CommunityId) -> Result<HashMap<PostId, VoteDirection>> {
        let rows = sqlx::query(
            "SELECT v.post_id AS id, v.value AS value \
             FROM votes v JOIN posts p ON p.id = v.post_id \
             WHERE v.user_id = ? AND p.community_id = ?",
        )
        .bind(uuid_to_blob(user.as_uuid()))
        .bind(uuid_to_blob(community.as_uuid()))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter()
            .map(|row| {
                let value = VoteDirection::try_from(row.try_get::<i64, _>("value").map_err(db_err)?)?;
                Ok((PostId::from(get_uuid(row, "id")?), value))
            })
            .collect()
    }

    async fn karma_breakdown(&self, user: UserId) -> Result<KarmaBreakdown> {
        let key = uuid_to_blob(user.as_uuid());
        let row = sqlx::query(
            "SELECT \
               (SELECT COUNT(*) FROM posts WHERE author_id = ?) AS posts_authored, \
               (SELECT COUNT(*) FROM comments WHERE author_id = ?) AS comments_authored, \
               (SELECT COALESCE(SUM(v.value > 0), 0) FROM votes v JOIN posts p ON p.id = v.post_id \
                  WHERE p.author_id = ?) AS post_up, \
               (SELECT COALESCE(SUM(v.value < 0), 0) FROM votes v JOIN posts p ON p.id = v.post_id \
                  WHERE p.author_id = ?) AS post_down, \
               (SELECT COALESCE(SUM(v.value > 0), 0) FROM votes v JOIN comments c ON c.id = v.comment_id \
                  WHERE c.author_id = ?) AS comment_up, \
               (SELECT COALESCE(SUM(v.value < 0), 0) FROM votes v JOIN comments c ON c.id = v.comment_id \
                  WHERE c.author_id = ?) AS comment_down",
        )
        .bind(&key)
        .bind(&key)
        .bind(&key)
        .bind(&key)
        .bind(&key)
        .bind(&key)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        let column = |name: &str| row.try_get::<i64, _>(name).map(count).map_err(db_err);
        Ok(KarmaBreakdown {
            post_votes: VoteTally::new(column("post_up")?, column("post_down")?),
            comment_votes: VoteTally::new(column("comment_up")?, column("comment_down")?),
            posts_authored: column("posts_authored")?,
            comments_authored: column("comments_authored")?,
        })
    }
}

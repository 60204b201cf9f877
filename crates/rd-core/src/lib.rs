//! rusty-discuss/crates/rd-core/src/lib.rs
//!
//! The central domain logic and interface definitions for rusty-discuss:
//! nested comment trees, the vote ledger, vote aggregation and karma.

pub mod activity;
pub mod aggregate;
pub mod error;
pub mod karma;
pub mod ledger;
pub mod listing;
pub mod materialize;
pub mod models;
pub mod policy;
pub mod reputation;
pub mod service;
pub mod traits;
pub mod tree;

// Re-exporting for easier access in other crates
pub use activity::{ActivityEvent, NoopSink, RecordingSink};
pub use aggregate::Aggregator;
pub use error::*;
pub use karma::{KarmaBreakdown, KarmaEngine};
pub use ledger::VoteLedger;
pub use listing::{PostListing, PostQuery, PostSort, PostStats};
pub use materialize::{AnnotatedComment, CommentThread, TreeMaterializer, TreeRoot};
pub use models::*;
pub use policy::{DiscussionPolicy, SelfVotePolicy};
pub use reputation::{reputation_level, reputation_progress, Reputation, ReputationLevel};
pub use service::{Discussion, VoteReceipt};
pub use traits::*;
pub use tree::{CommentForest, CommentTree};

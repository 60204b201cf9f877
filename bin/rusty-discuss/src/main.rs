//! # Rusty-Discuss Binary
//!
//! The entry point that assembles the discussion core based on compile-time
//! features: load settings, install logging, open the store, bring the schema
//! up to date and run the karma sweep.

use std::sync::Arc;

use anyhow::Context;
use rd_config::{LogSettings, Settings};
use rd_core::Discussion;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

// Feature-gated imports
#[cfg(feature = "db-sqlite")]
use rd_db_sqlite::SqliteDiscussionRepo;

#[cfg(all(feature = "store-memory", not(feature = "db-sqlite")))]
use rd_store_memory::MemoryDiscussionRepo;

#[cfg(not(any(feature = "db-sqlite", feature = "store-memory")))]
compile_error!("enable a storage feature: `db-sqlite` or `store-memory`");

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load().context("failed to load settings")?;
    init_tracing(&settings.log)?;
    let policy = settings.policy().context("invalid discussion settings")?;

    // 1. Initialize storage
    #[cfg(feature = "db-sqlite")]
    let repo = {
        use secrecy::ExposeSecret;

        let repo = SqliteDiscussionRepo::connect(
            settings.database.url.expose_secret(),
            settings.database.max_connections,
        )
        .await
        .context("failed to open SQLite store")?;
        repo.migrate().await.context("failed to apply schema")?;
        repo
    };

    #[cfg(all(feature = "store-memory", not(feature = "db-sqlite")))]
    let repo = MemoryDiscussionRepo::new();

    // 2. Assemble the core
    let discussion = Discussion::new(Arc::new(repo), policy);
    info!(
        inline_depth = discussion.policy().inline_depth,
        thread_depth = discussion.policy().thread_depth,
        self_vote = ?discussion.policy().self_vote,
        "rusty-discuss core ready"
    );

    // 3. Bring every stored karma in line with the ledger
    let users = discussion
        .recompute_all_karma()
        .await
        .context("karma sweep failed")?;
    info!(users, "karma sweep complete");

    Ok(())
}

fn init_tracing(log: &LogSettings) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&log.filter))
        .with_context(|| format!("invalid log filter {:?}", log.filter))?;

    let registry = tracing_subscriber::registry().with(filter);
    if log.json {
        registry.with(fmt::layer().json()).try_init()?;
    } else {
        registry.with(fmt::layer()).try_init()?;
    }
    Ok(())
}

//! Database Migrations
//!
//! Embedded SQL migrations under `migrations/`, applied with refinery.

use anyhow::{Context, Result};

use crate::database::connection::Database;

mod embedded {
    refinery::embed_migrations!("migrations");
}

/// Run all pending migrations
pub async fn run_migrations(db: &Database) -> Result<()> {
    tracing::info!("🔄 Running database migrations...");

    let mut client = db
        .acquire()
        .await
        .context("Failed to get connection for migrations")?;

    let report = embedded::migrations::runner()
        .run_async(&mut **client)
        .await
        .context("Failed to apply migrations")?;

    for migration in report.applied_migrations() {
        tracing::info!("Applied migration {}", migration);
    }
    tracing::info!("✅ Database migrations completed successfully");
    Ok(())
}

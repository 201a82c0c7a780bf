// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embedded database migrations.
//!
//! ```ignore
//! let pool = SqlitePool::connect("sqlite:.data/provisioner.db?mode=rwc").await?;
//! provisioner_core::migrations::run(&pool).await?;
//! ```

use sqlx::migrate::MigrateError;

/// SQLite migrator with the provisioner schema embedded.
pub static SQLITE: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/sqlite");

/// Apply pending migrations. Already applied ones are skipped.
pub async fn run(pool: &sqlx::SqlitePool) -> Result<(), MigrateError> {
    SQLITE.run(pool).await
}

// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Errors raised while assembling and starting the provisioner.

use provisioner_core::{PersistenceError, ProvisioningError};

use crate::config::ConfigError;
use crate::kubeclient::ClientError;

/// Result type using [`Error`]
pub type Result<T> = std::result::Result<T, Error>;

/// Startup and wiring errors.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A required builder part was not provided.
    #[error("{0} is required")]
    Missing(&'static str),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error(transparent)]
    Kubernetes(#[from] ClientError),

    #[error(transparent)]
    Provisioning(#[from] ProvisioningError),
}

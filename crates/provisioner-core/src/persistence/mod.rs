// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persistence interfaces and the SQLite backend.
//!
//! Single-statement reads and writes go straight through [`Persistence`].
//! Multi-step mutations run in a [`WriteSession`], which is rolled back
//! unless explicitly committed.

pub mod sqlite;

pub use self::sqlite::SqlitePersistence;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::model::{
    Cluster, KymaConfig, Operation, OperationState, RuntimeUpgrade, Stage, UpgradeState,
};

/// Persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    /// Requested row does not exist.
    #[error("{entity} {id} not found")]
    NotFound {
        /// Kind of the missing entity.
        entity: &'static str,
        /// Identifier that was looked up.
        id: String,
    },
    /// Write rejected by a uniqueness constraint.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Database failure.
    #[error("database error during {operation}: {details}")]
    Database {
        /// Name of the failing call.
        operation: String,
        /// Driver message.
        details: String,
    },
    /// Stored value could not be decoded.
    #[error("invalid stored data: {0}")]
    Serialization(String),
}

impl PersistenceError {
    pub(crate) fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Whether the error is a missing row.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Read and write access to provisioner state.
#[async_trait]
pub trait Persistence: Send + Sync {
    // ========================================================================
    // Reads
    // ========================================================================

    /// Cluster with its provider config and active Kyma config.
    async fn get_cluster(&self, runtime_id: &str) -> Result<Cluster, PersistenceError>;

    async fn get_operation(&self, operation_id: &str) -> Result<Operation, PersistenceError>;

    /// Most recently started operation of the runtime.
    async fn get_last_operation(&self, runtime_id: &str) -> Result<Operation, PersistenceError>;

    /// Operations that still need to be driven, oldest first.
    async fn list_in_progress_operations(&self) -> Result<Vec<Operation>, PersistenceError>;

    async fn get_runtime_upgrade(
        &self,
        operation_id: &str,
    ) -> Result<RuntimeUpgrade, PersistenceError>;

    /// Kyma config by ID, active or historical.
    async fn get_kyma_config(&self, kyma_config_id: &str) -> Result<KymaConfig, PersistenceError>;

    async fn get_tenant(&self, runtime_id: &str) -> Result<String, PersistenceError>;

    async fn get_tenant_for_operation(&self, operation_id: &str)
    -> Result<String, PersistenceError>;

    // ========================================================================
    // Single-statement writes
    // ========================================================================

    async fn insert_operation(&self, operation: &Operation) -> Result<(), PersistenceError>;

    /// Set the state and message. Terminal states also move the stage to
    /// [`Stage::Finished`] and record `end_timestamp`.
    async fn update_operation_state(
        &self,
        operation_id: &str,
        state: OperationState,
        message: &str,
        at: DateTime<Utc>,
    ) -> Result<(), PersistenceError>;

    /// Move an in-progress operation to `stage`.
    async fn transition_operation(
        &self,
        operation_id: &str,
        stage: Stage,
        message: &str,
        at: DateTime<Utc>,
    ) -> Result<(), PersistenceError>;

    async fn update_cluster_kubeconfig(
        &self,
        runtime_id: &str,
        kubeconfig: &str,
        internal_state: Option<&[u8]>,
    ) -> Result<(), PersistenceError>;

    async fn update_upgrade_state(
        &self,
        operation_id: &str,
        state: UpgradeState,
    ) -> Result<(), PersistenceError>;

    /// Soft-delete the cluster.
    async fn mark_cluster_deleted(&self, runtime_id: &str) -> Result<(), PersistenceError>;

    /// Remove the cluster and everything it owns.
    async fn cleanup_cluster_data(&self, runtime_id: &str) -> Result<(), PersistenceError>;

    // ========================================================================
    // Transactions
    // ========================================================================

    /// Open a write session.
    async fn begin(&self) -> Result<Box<dyn WriteSession>, PersistenceError>;
}

/// Transactional write session.
///
/// Dropping the session without calling [`WriteSession::commit`] rolls back
/// every write made through it.
#[async_trait]
pub trait WriteSession: Send {
    /// Insert the cluster row, its provider config and its Kyma config, and
    /// mark that Kyma config active.
    async fn insert_cluster(&mut self, cluster: &Cluster) -> Result<(), PersistenceError>;

    /// Insert a Kyma config with its components.
    async fn insert_kyma_config(&mut self, kyma_config: &KymaConfig)
    -> Result<(), PersistenceError>;

    async fn insert_operation(&mut self, operation: &Operation) -> Result<(), PersistenceError>;

    async fn insert_runtime_upgrade(
        &mut self,
        upgrade: &RuntimeUpgrade,
    ) -> Result<(), PersistenceError>;

    async fn set_active_kyma_config(
        &mut self,
        runtime_id: &str,
        kyma_config_id: &str,
    ) -> Result<(), PersistenceError>;

    async fn update_upgrade_state(
        &mut self,
        operation_id: &str,
        state: UpgradeState,
    ) -> Result<(), PersistenceError>;

    /// Last operation as seen inside the transaction, if any.
    async fn get_last_operation(
        &mut self,
        runtime_id: &str,
    ) -> Result<Option<Operation>, PersistenceError>;

    /// Make every write visible.
    async fn commit(self: Box<Self>) -> Result<(), PersistenceError>;
}

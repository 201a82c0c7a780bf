// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cluster drivers.
//!
//! A [`Provisioner`] starts cluster creation and teardown without blocking
//! and answers status polls from the operation queue. Gardener shoots and
//! plain GCP clusters (through Hydroform) are supported; [`ProvisionerRouter`]
//! picks the backend from the cluster's config.

pub mod gardener;
pub mod hydroform;
pub mod mock;

pub use gardener::{GardenerProvisioner, KubeShootClient, ShootClient};
pub use hydroform::{ClusterPhase, HydroformClient, HydroformConfig, HydroformProvisioner};

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use provisioner_core::model::{Cluster, ClusterConfig, Operation, OperationType, Stage};
use provisioner_core::persistence::PersistenceError;

use crate::installation::InstallationError;

/// Message of a freshly started deprovisioning operation.
pub const DEPROVISIONING_STARTED: &str = "Deprovisioning started.";

/// Creation progress of a cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterStatus {
    Pending,
    Ready {
        kubeconfig: String,
        internal_state: Option<Vec<u8>>,
    },
    Failed(String),
}

/// Teardown progress of a cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeletionStatus {
    Pending,
    Deleted,
    Failed(String),
}

/// Cluster driver errors.
#[derive(Debug, thiserror::Error)]
pub enum ProvisionerError {
    /// The backend rejected or failed a request.
    #[error("{0}")]
    Backend(String),
    #[error(transparent)]
    Installation(#[from] InstallationError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    /// No backend is configured for the cluster's config kind.
    #[error("no provisioner configured for {0} clusters")]
    Unsupported(&'static str),
}

/// Starts and tracks cluster creation and teardown.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Kick off creation of `cluster`. Completion is observed through
    /// [`Provisioner::cluster_status`].
    async fn provision_cluster(
        &self,
        cluster: &Cluster,
        operation_id: &str,
    ) -> Result<(), ProvisionerError>;

    /// Kick off teardown of `cluster` and return the operation tracking it.
    async fn deprovision_cluster(
        &self,
        cluster: &Cluster,
        operation_id: &str,
    ) -> Result<Operation, ProvisionerError>;

    async fn cluster_status(
        &self,
        cluster: &Cluster,
        operation_id: &str,
    ) -> Result<ClusterStatus, ProvisionerError>;

    async fn deletion_status(
        &self,
        cluster: &Cluster,
        operation_id: &str,
    ) -> Result<DeletionStatus, ProvisionerError>;
}

/// The operation every backend returns from `deprovision_cluster`.
pub fn deprovisioning_operation(cluster: &Cluster, operation_id: &str) -> Operation {
    Operation::started(
        operation_id,
        &cluster.id,
        OperationType::Deprovision,
        Stage::WaitForClusterDeletion,
        DEPROVISIONING_STARTED,
        Utc::now(),
    )
}

/// Dispatches to the backend matching the cluster's config.
#[derive(Clone, Default)]
pub struct ProvisionerRouter {
    gardener: Option<Arc<dyn Provisioner>>,
    gcp: Option<Arc<dyn Provisioner>>,
}

impl ProvisionerRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_gardener(mut self, provisioner: Arc<dyn Provisioner>) -> Self {
        self.gardener = Some(provisioner);
        self
    }

    pub fn with_gcp(mut self, provisioner: Arc<dyn Provisioner>) -> Self {
        self.gcp = Some(provisioner);
        self
    }

    fn backend(&self, cluster: &Cluster) -> Result<&dyn Provisioner, ProvisionerError> {
        let (backend, kind) = match &cluster.cluster_config {
            ClusterConfig::Gardener(_) => (&self.gardener, "Gardener"),
            ClusterConfig::Gcp(_) => (&self.gcp, "GCP"),
        };
        backend
            .as_deref()
            .ok_or(ProvisionerError::Unsupported(kind))
    }
}

#[async_trait]
impl Provisioner for ProvisionerRouter {
    async fn provision_cluster(
        &self,
        cluster: &Cluster,
        operation_id: &str,
    ) -> Result<(), ProvisionerError> {
        self.backend(cluster)?
            .provision_cluster(cluster, operation_id)
            .await
    }

    async fn deprovision_cluster(
        &self,
        cluster: &Cluster,
        operation_id: &str,
    ) -> Result<Operation, ProvisionerError> {
        self.backend(cluster)?
            .deprovision_cluster(cluster, operation_id)
            .await
    }

    async fn cluster_status(
        &self,
        cluster: &Cluster,
        operation_id: &str,
    ) -> Result<ClusterStatus, ProvisionerError> {
        self.backend(cluster)?
            .cluster_status(cluster, operation_id)
            .await
    }

    async fn deletion_status(
        &self,
        cluster: &Cluster,
        operation_id: &str,
    ) -> Result<DeletionStatus, ProvisionerError> {
        self.backend(cluster)?
            .deletion_status(cluster, operation_id)
            .await
    }
}

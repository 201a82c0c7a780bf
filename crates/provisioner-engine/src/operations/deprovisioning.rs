// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cluster teardown pipeline.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use provisioner_core::model::{Cluster, Operation, Stage};
use provisioner_core::persistence::Persistence;
use tracing::{debug, info};

use super::{
    PollIntervals, Pipeline, StageOutcome, StageTimeouts, Step, StepDependencies, StepError,
};
use crate::director::DirectorClient;
use crate::provisioner::{DeletionStatus, Provisioner};

pub struct WaitForClusterDeletion {
    provisioner: Arc<dyn Provisioner>,
    timeout: Duration,
    poll_interval: Duration,
}

#[async_trait]
impl Step for WaitForClusterDeletion {
    fn stage(&self) -> Stage {
        Stage::WaitForClusterDeletion
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn run(
        &self,
        cluster: &Cluster,
        operation: &Operation,
    ) -> Result<StageOutcome, StepError> {
        let status = self
            .provisioner
            .deletion_status(cluster, &operation.id)
            .await
            .map_err(|e| StepError::recoverable(format!("failed to get deletion status: {}", e)))?;

        match status {
            DeletionStatus::Pending => {
                debug!(runtime_id = %cluster.id, "Cluster still being deleted");
                Ok(StageOutcome::Retry {
                    delay: self.poll_interval,
                })
            }
            DeletionStatus::Deleted => {
                info!(runtime_id = %cluster.id, "Cluster deleted");
                Ok(StageOutcome::next(Stage::CleanupCluster))
            }
            DeletionStatus::Failed(message) => Ok(StageOutcome::Failed(message)),
        }
    }
}

/// Unregisters the runtime from the directory and soft-deletes the cluster.
pub struct CleanupCluster {
    persistence: Arc<dyn Persistence>,
    director: Arc<dyn DirectorClient>,
    timeout: Duration,
}

#[async_trait]
impl Step for CleanupCluster {
    fn stage(&self) -> Stage {
        Stage::CleanupCluster
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn run(
        &self,
        cluster: &Cluster,
        _operation: &Operation,
    ) -> Result<StageOutcome, StepError> {
        self.director
            .delete_runtime(&cluster.id, &cluster.tenant)
            .await
            .map_err(|e| {
                StepError::recoverable(format!("failed to unregister runtime: {}", e))
            })?;

        self.persistence
            .mark_cluster_deleted(&cluster.id)
            .await
            .map_err(|e| StepError::recoverable(format!("failed to mark cluster deleted: {}", e)))?;

        info!(runtime_id = %cluster.id, "Runtime unregistered");
        Ok(StageOutcome::Succeeded)
    }
}

pub struct DeprovisioningPipeline {
    wait_for_deletion: WaitForClusterDeletion,
    cleanup: CleanupCluster,
}

impl DeprovisioningPipeline {
    pub fn new(
        deps: &StepDependencies,
        timeouts: &StageTimeouts,
        intervals: &PollIntervals,
    ) -> Self {
        Self {
            wait_for_deletion: WaitForClusterDeletion {
                provisioner: deps.provisioner.clone(),
                timeout: timeouts.cluster_deletion,
                poll_interval: intervals.cluster,
            },
            cleanup: CleanupCluster {
                persistence: deps.persistence.clone(),
                director: deps.director.clone(),
                timeout: timeouts.short_stage,
            },
        }
    }
}

impl Pipeline for DeprovisioningPipeline {
    fn step(&self, stage: Stage) -> Option<&dyn Step> {
        match stage {
            Stage::WaitForClusterDeletion => Some(&self.wait_for_deletion),
            Stage::CleanupCluster => Some(&self.cleanup),
            Stage::WaitingForClusterCreation
            | Stage::StartingInstallation
            | Stage::WaitingForInstallation
            | Stage::ConnectRuntimeAgent
            | Stage::StartingUpgrade
            | Stage::UpdatingUpgradeState
            | Stage::Finished => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::director::mock::MockDirector;
    use crate::operations::tests::Fixture;
    use crate::provisioner::mock::MockProvisioner;
    use crate::testing::gardener_cluster;
    use provisioner_core::model::OperationType;

    fn deprovisioning(cluster: &Cluster) -> Operation {
        crate::provisioner::deprovisioning_operation(cluster, "op-deprovision")
    }

    #[tokio::test]
    async fn test_wait_for_deletion() {
        let mut fixture = Fixture::new().await;
        fixture.provisioner = MockProvisioner::ready_after(1);
        let pipelines = fixture.pipelines();
        let step = pipelines
            .for_type(OperationType::Deprovision)
            .step(Stage::WaitForClusterDeletion)
            .unwrap();
        let cluster = gardener_cluster("runtime-1");
        let operation = deprovisioning(&cluster);

        assert_eq!(
            step.run(&cluster, &operation).await.unwrap(),
            StageOutcome::Retry {
                delay: Duration::from_secs(20)
            }
        );
        assert_eq!(
            step.run(&cluster, &operation).await.unwrap(),
            StageOutcome::next(Stage::CleanupCluster)
        );
    }

    #[tokio::test]
    async fn test_cleanup_unregisters_and_soft_deletes() {
        let fixture = Fixture::new().await;
        let cluster = gardener_cluster("runtime-1");
        let operation = deprovisioning(&cluster);
        fixture.persist(&cluster, &operation).await;
        fixture
            .director
            .insert_runtime("runtime-1", "test runtime 1", "tenant")
            .await;

        let outcome = fixture
            .pipelines()
            .for_type(OperationType::Deprovision)
            .step(Stage::CleanupCluster)
            .unwrap()
            .run(&cluster, &operation)
            .await
            .unwrap();

        assert_eq!(outcome, StageOutcome::Succeeded);
        assert!(!fixture.director.is_registered("runtime-1").await);
        let stored = fixture.persistence.get_cluster("runtime-1").await.unwrap();
        assert!(stored.deleted);
    }

    #[tokio::test]
    async fn test_cleanup_retries_when_directory_fails() {
        let mut fixture = Fixture::new().await;
        fixture.director = MockDirector::failing();
        let cluster = gardener_cluster("runtime-1");
        let operation = deprovisioning(&cluster);
        fixture.persist(&cluster, &operation).await;

        let err = fixture
            .pipelines()
            .for_type(OperationType::Deprovision)
            .step(Stage::CleanupCluster)
            .unwrap()
            .run(&cluster, &operation)
            .await
            .unwrap_err();

        assert!(err.recoverable);
        let stored = fixture.persistence.get_cluster("runtime-1").await.unwrap();
        assert!(!stored.deleted);
    }
}

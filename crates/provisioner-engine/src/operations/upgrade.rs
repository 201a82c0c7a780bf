// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Kyma upgrade pipeline.
//!
//! The service activates the target Kyma config before enqueuing the
//! operation, so the cluster loaded by the executor already carries the
//! release and components to upgrade to.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use provisioner_core::model::{Cluster, Operation, Stage, UpgradeState};
use provisioner_core::persistence::Persistence;
use tracing::info;

use super::provisioning::WaitForInstallation;
use super::{
    PollIntervals, Pipeline, StageOutcome, StageTimeouts, Step, StepDependencies, StepError,
    require_kubeconfig,
};
use crate::installation::InstallationService;

pub struct StartUpgrade {
    installation: Arc<dyn InstallationService>,
    timeout: Duration,
    poll_interval: Duration,
}

#[async_trait]
impl Step for StartUpgrade {
    fn stage(&self) -> Stage {
        Stage::StartingUpgrade
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn run(
        &self,
        cluster: &Cluster,
        _operation: &Operation,
    ) -> Result<StageOutcome, StepError> {
        let kubeconfig = require_kubeconfig(cluster)?;
        let kyma = &cluster.kyma_config;

        self.installation
            .trigger_upgrade(
                kubeconfig,
                &kyma.release,
                &kyma.global_configuration,
                &kyma.components,
            )
            .await
            .map_err(|e| StepError::recoverable(format!("failed to start upgrade: {}", e)))?;

        info!(runtime_id = %cluster.id, version = %kyma.release.version, "Kyma upgrade started");
        Ok(StageOutcome::Next {
            stage: Stage::WaitingForInstallation,
            delay: self.poll_interval,
        })
    }
}

/// Records the finished upgrade.
pub struct UpdateUpgradeState {
    persistence: Arc<dyn Persistence>,
    timeout: Duration,
}

#[async_trait]
impl Step for UpdateUpgradeState {
    fn stage(&self) -> Stage {
        Stage::UpdatingUpgradeState
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn run(
        &self,
        _cluster: &Cluster,
        operation: &Operation,
    ) -> Result<StageOutcome, StepError> {
        self.persistence
            .update_upgrade_state(&operation.id, UpgradeState::Succeeded)
            .await
            .map_err(|e| {
                StepError::recoverable(format!("failed to update upgrade state: {}", e))
            })?;

        Ok(StageOutcome::Succeeded)
    }
}

pub struct UpgradePipeline {
    start_upgrade: StartUpgrade,
    wait_for_installation: WaitForInstallation,
    update_state: UpdateUpgradeState,
}

impl UpgradePipeline {
    pub fn new(
        deps: &StepDependencies,
        timeouts: &StageTimeouts,
        intervals: &PollIntervals,
    ) -> Self {
        Self {
            start_upgrade: StartUpgrade {
                installation: deps.installation.clone(),
                timeout: timeouts.short_stage,
                poll_interval: intervals.installation,
            },
            wait_for_installation: WaitForInstallation::new(
                deps.installation.clone(),
                Stage::UpdatingUpgradeState,
                timeouts.installation,
                intervals.installation,
            ),
            update_state: UpdateUpgradeState {
                persistence: deps.persistence.clone(),
                timeout: timeouts.short_stage,
            },
        }
    }
}

impl Pipeline for UpgradePipeline {
    fn step(&self, stage: Stage) -> Option<&dyn Step> {
        match stage {
            Stage::StartingUpgrade => Some(&self.start_upgrade),
            Stage::WaitingForInstallation => Some(&self.wait_for_installation),
            Stage::UpdatingUpgradeState => Some(&self.update_state),
            Stage::WaitingForClusterCreation
            | Stage::StartingInstallation
            | Stage::ConnectRuntimeAgent
            | Stage::WaitForClusterDeletion
            | Stage::CleanupCluster
            | Stage::Finished => None,
        }
    }
}

// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Provisioning and runtime agent reconnection pipelines.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use provisioner_core::RUNTIME_AGENT_COMPONENT;
use provisioner_core::model::{Cluster, Operation, Stage};
use provisioner_core::persistence::Persistence;
use tracing::{debug, info, warn};

use super::{
    PollIntervals, Pipeline, StageOutcome, StageTimeouts, Step, StepDependencies, StepError,
    require_kubeconfig,
};
use crate::configurator::RuntimeConfigurator;
use crate::director::{DirectorClient, RuntimeStatusCondition};
use crate::installation::{InstallationService, InstallationStateKind};
use crate::provisioner::{ClusterStatus, Provisioner};

/// Waits for the backend to report the cluster ready and stores its kubeconfig.
pub struct WaitForClusterCreation {
    persistence: Arc<dyn Persistence>,
    provisioner: Arc<dyn Provisioner>,
    timeout: Duration,
    poll_interval: Duration,
}

#[async_trait]
impl Step for WaitForClusterCreation {
    fn stage(&self) -> Stage {
        Stage::WaitingForClusterCreation
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
            .cluster_status(cluster, &operation.id)
            .await
            .map_err(|e| StepError::recoverable(format!("failed to get cluster status: {}", e)))?;

        match status {
            ClusterStatus::Pending => {
                debug!(runtime_id = %cluster.id, "Cluster not ready yet");
                Ok(StageOutcome::Retry {
                    delay: self.poll_interval,
                })
            }
            ClusterStatus::Ready {
                kubeconfig,
                internal_state,
            } => {
                self.persistence
                    .update_cluster_kubeconfig(&cluster.id, &kubeconfig, internal_state.as_deref())
                    .await
                    .map_err(|e| {
                        StepError::recoverable(format!("failed to save kubeconfig: {}", e))
                    })?;
                info!(runtime_id = %cluster.id, "Cluster created");
                Ok(StageOutcome::next(Stage::StartingInstallation))
            }
            ClusterStatus::Failed(message) => Ok(StageOutcome::Failed(message)),
        }
    }
}

/// Deploys the Kyma installer with the active Kyma config.
pub struct StartInstallation {
    installation: Arc<dyn InstallationService>,
    timeout: Duration,
    poll_interval: Duration,
}

#[async_trait]
impl Step for StartInstallation {
    fn stage(&self) -> Stage {
        Stage::StartingInstallation
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
            .trigger_installation(
                kubeconfig,
                &kyma.release,
                &kyma.global_configuration,
                &kyma.components,
            )
            .await
            .map_err(|e| StepError::recoverable(format!("failed to start installation: {}", e)))?;

        info!(
            runtime_id = %cluster.id,
            version = %kyma.release.version,
            "Kyma installation started"
        );
        Ok(StageOutcome::Next {
            stage: Stage::WaitingForInstallation,
            delay: self.poll_interval,
        })
    }
}

/// Polls the installer until Kyma is installed, then moves to `next`.
pub struct WaitForInstallation {
    installation: Arc<dyn InstallationService>,
    next: Stage,
    timeout: Duration,
    poll_interval: Duration,
}

impl WaitForInstallation {
    pub(crate) fn new(
        installation: Arc<dyn InstallationService>,
        next: Stage,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            installation,
            next,
            timeout,
            poll_interval,
        }
    }
}

#[async_trait]
impl Step for WaitForInstallation {
    fn stage(&self) -> Stage {
        Stage::WaitingForInstallation
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

        let state = self
            .installation
            .check_installation_state(kubeconfig)
            .await
            .map_err(|e| {
                StepError::recoverable(format!("failed to check installation state: {}", e))
            })?;

        match state.state {
            InstallationStateKind::Installed => {
                info!(runtime_id = %cluster.id, "Kyma installed");
                Ok(StageOutcome::next(self.next))
            }
            InstallationStateKind::Error => {
                // The installer retries failed components on its own.
                warn!(
                    runtime_id = %cluster.id,
                    description = %state.description,
                    "Installation reported an error"
                );
                Ok(StageOutcome::Retry {
                    delay: self.poll_interval,
                })
            }
            InstallationStateKind::Uninstalling => Ok(StageOutcome::Failed(format!(
                "Kyma is being uninstalled: {}",
                state.description
            ))),
            InstallationStateKind::InProgress | InstallationStateKind::Other(_) => {
                debug!(runtime_id = %cluster.id, state = %state.state, "Installation in progress");
                Ok(StageOutcome::Retry {
                    delay: self.poll_interval,
                })
            }
        }
    }
}

/// Hands the runtime agent its connection credentials and marks the runtime
/// `CONNECTED` in the directory.
pub struct ConnectRuntimeAgent {
    configurator: RuntimeConfigurator,
    director: Arc<dyn DirectorClient>,
    timeout: Duration,
}

#[async_trait]
impl Step for ConnectRuntimeAgent {
    fn stage(&self) -> Stage {
        Stage::ConnectRuntimeAgent
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

        self.configurator
            .configure_runtime(cluster, kubeconfig)
            .await
            .map_err(|e| {
                StepError::recoverable(format!("failed to configure runtime agent: {}", e))
            })?;

        // Runtimes without the agent never connect.
        if cluster.component(RUNTIME_AGENT_COMPONENT).is_some() {
            self.director
                .set_runtime_status_condition(
                    &cluster.id,
                    RuntimeStatusCondition::Connected,
                    &cluster.tenant,
                )
                .await
                .map_err(|e| {
                    StepError::recoverable(format!("failed to set runtime status condition: {}", e))
                })?;
        }

        Ok(StageOutcome::Succeeded)
    }
}

impl ConnectRuntimeAgent {
    fn new(deps: &StepDependencies, timeouts: &StageTimeouts) -> Self {
        Self {
            configurator: deps.configurator.clone(),
            director: deps.director.clone(),
            timeout: timeouts.runtime_agent,
        }
    }
}

/// Cluster creation, Kyma installation and agent configuration.
pub struct ProvisioningPipeline {
    wait_for_cluster: WaitForClusterCreation,
    start_installation: StartInstallation,
    wait_for_installation: WaitForInstallation,
    connect_agent: ConnectRuntimeAgent,
}

impl ProvisioningPipeline {
    pub fn new(
        deps: &StepDependencies,
        timeouts: &StageTimeouts,
        intervals: &PollIntervals,
    ) -> Self {
        Self {
            wait_for_cluster: WaitForClusterCreation {
                persistence: deps.persistence.clone(),
                provisioner: deps.provisioner.clone(),
                timeout: timeouts.cluster_creation,
                poll_interval: intervals.cluster,
            },
            start_installation: StartInstallation {
                installation: deps.installation.clone(),
                timeout: timeouts.short_stage,
                poll_interval: intervals.installation,
            },
            wait_for_installation: WaitForInstallation::new(
                deps.installation.clone(),
                Stage::ConnectRuntimeAgent,
                timeouts.installation,
                intervals.installation,
            ),
            connect_agent: ConnectRuntimeAgent::new(deps, timeouts),
        }
    }
}

impl Pipeline for ProvisioningPipeline {
    fn step(&self, stage: Stage) -> Option<&dyn Step> {
        match stage {
            Stage::WaitingForClusterCreation => Some(&self.wait_for_cluster),
            Stage::StartingInstallation => Some(&self.start_installation),
            Stage::WaitingForInstallation => Some(&self.wait_for_installation),
            Stage::ConnectRuntimeAgent => Some(&self.connect_agent),
            Stage::StartingUpgrade
            | Stage::UpdatingUpgradeState
            | Stage::WaitForClusterDeletion
            | Stage::CleanupCluster
            | Stage::Finished => None,
        }
    }
}

/// Re-issues the runtime agent's credentials.
pub struct ReconnectPipeline {
    connect_agent: ConnectRuntimeAgent,
}

impl ReconnectPipeline {
    pub fn new(deps: &StepDependencies, timeouts: &StageTimeouts) -> Self {
        Self {
            connect_agent: ConnectRuntimeAgent::new(deps, timeouts),
        }
    }
}

impl Pipeline for ReconnectPipeline {
    fn step(&self, stage: Stage) -> Option<&dyn Step> {
        match stage {
            Stage::ConnectRuntimeAgent => Some(&self.connect_agent),
            Stage::WaitingForClusterCreation
            | Stage::StartingInstallation
            | Stage::WaitingForInstallation
            | Stage::StartingUpgrade
            | Stage::UpdatingUpgradeState
            | Stage::WaitForClusterDeletion
            | Stage::CleanupCluster
            | Stage::Finished => None,
        }
    }
}

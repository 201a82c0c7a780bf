// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Staged operation pipelines.
//!
//! Every operation type has a pipeline: a fixed table from [`Stage`] to the
//! [`Step`] that runs in it. The executor loads the operation, runs the step
//! for its persisted stage and records the outcome before anything else
//! happens, so a restarted process continues from the last recorded stage.
//!
//! ```text
//! Provision:  WaitingForClusterCreation -> StartingInstallation
//!             -> WaitingForInstallation -> ConnectRuntimeAgent -> Finished
//! Upgrade:    StartingUpgrade -> WaitingForInstallation
//!             -> UpdatingUpgradeState -> Finished
//! Deprovision: WaitForClusterDeletion -> CleanupCluster -> Finished
//! Reconnect:  ConnectRuntimeAgent -> Finished
//! ```
//!
//! Waiting steps never block a worker. They return [`StageOutcome::Retry`]
//! and the [`OperationQueue`] runs them again after the requested delay.

pub mod deprovisioning;
pub mod executor;
pub mod provisioning;
pub mod queue;
pub mod upgrade;

pub use deprovisioning::DeprovisioningPipeline;
pub use executor::{OPERATION_SUCCEEDED, OperationExecutor, ProcessingResult, StagedExecutor};
pub use provisioning::{ProvisioningPipeline, ReconnectPipeline};
pub use queue::{OperationQueue, QueueConfig};
pub use upgrade::UpgradePipeline;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use provisioner_core::model::{Cluster, Operation, OperationType, Stage};
use provisioner_core::persistence::Persistence;

use crate::configurator::RuntimeConfigurator;
use crate::director::DirectorClient;
use crate::installation::InstallationService;
use crate::provisioner::Provisioner;

/// What the executor does after a step ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    /// Move to `stage`, running it after `delay`.
    Next { stage: Stage, delay: Duration },
    /// Stay in the current stage and run it again after `delay`.
    Retry { delay: Duration },
    Succeeded,
    /// Stop the operation with this message.
    Failed(String),
}

impl StageOutcome {
    /// Move to `stage` right away.
    pub fn next(stage: Stage) -> Self {
        Self::Next {
            stage,
            delay: Duration::ZERO,
        }
    }
}

/// Step failure. Recoverable errors retry the stage, others fail the operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct StepError {
    pub recoverable: bool,
    pub message: String,
}

impl StepError {
    pub fn recoverable(message: impl Into<String>) -> Self {
        Self {
            recoverable: true,
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            recoverable: false,
            message: message.into(),
        }
    }
}

/// Work done in one stage.
#[async_trait]
pub trait Step: Send + Sync {
    fn stage(&self) -> Stage;

    /// Longest time the operation may stay in this stage.
    fn timeout(&self) -> Duration;

    async fn run(&self, cluster: &Cluster, operation: &Operation)
    -> Result<StageOutcome, StepError>;
}

/// Transition table of one operation type.
pub trait Pipeline: Send + Sync {
    /// Step for `stage`, or `None` when the stage is not part of the pipeline.
    fn step(&self, stage: Stage) -> Option<&dyn Step>;
}

/// Stage timeouts.
#[derive(Debug, Clone)]
pub struct StageTimeouts {
    pub cluster_creation: Duration,
    pub installation: Duration,
    pub runtime_agent: Duration,
    pub cluster_deletion: Duration,
    /// Stages that only trigger an action or clean up.
    pub short_stage: Duration,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            cluster_creation: Duration::from_secs(60 * 60),
            installation: Duration::from_secs(50 * 60),
            runtime_agent: Duration::from_secs(10 * 60),
            cluster_deletion: Duration::from_secs(60 * 60),
            short_stage: Duration::from_secs(10 * 60),
        }
    }
}

/// How often waiting stages poll.
#[derive(Debug, Clone)]
pub struct PollIntervals {
    pub cluster: Duration,
    pub installation: Duration,
}

impl Default for PollIntervals {
    fn default() -> Self {
        Self {
            cluster: Duration::from_secs(20),
            installation: Duration::from_secs(30),
        }
    }
}

/// Collaborators the steps act through.
#[derive(Clone)]
pub struct StepDependencies {
    pub persistence: Arc<dyn Persistence>,
    pub provisioner: Arc<dyn Provisioner>,
    pub installation: Arc<dyn InstallationService>,
    pub configurator: RuntimeConfigurator,
    pub director: Arc<dyn DirectorClient>,
}

/// One pipeline per operation type.
#[derive(Clone)]
pub struct Pipelines {
    provisioning: Arc<ProvisioningPipeline>,
    upgrade: Arc<UpgradePipeline>,
    deprovisioning: Arc<DeprovisioningPipeline>,
    reconnect: Arc<ReconnectPipeline>,
}

impl Pipelines {
    pub fn new(
        deps: &StepDependencies,
        timeouts: &StageTimeouts,
        intervals: &PollIntervals,
    ) -> Self {
        Self {
            provisioning: Arc::new(ProvisioningPipeline::new(deps, timeouts, intervals)),
            upgrade: Arc::new(UpgradePipeline::new(deps, timeouts, intervals)),
            deprovisioning: Arc::new(DeprovisioningPipeline::new(deps, timeouts, intervals)),
            reconnect: Arc::new(ReconnectPipeline::new(deps, timeouts)),
        }
    }

    pub fn for_type(&self, operation_type: OperationType) -> &dyn Pipeline {
        match operation_type {
            OperationType::Provision => self.provisioning.as_ref(),
            OperationType::Upgrade => self.upgrade.as_ref(),
            OperationType::Deprovision => self.deprovisioning.as_ref(),
            OperationType::ReconnectRuntime => self.reconnect.as_ref(),
        }
    }
}

/// Kubeconfig of a cluster whose creation finished.
pub(crate) fn require_kubeconfig(cluster: &Cluster) -> Result<&str, StepError> {
    cluster
        .kubeconfig
        .as_deref()
        .ok_or_else(|| StepError::fatal(format!("cluster {} has no kubeconfig", cluster.id)))
}

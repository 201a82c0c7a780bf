// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Hydroform backend for plain GCP clusters.
//!
//! Creation runs as a tracked background task: provision, poll the phase
//! until `Provisioned`, fetch credentials and persist the kubeconfig with
//! the opaque Hydroform state. The queue observes the task through
//! [`Provisioner::cluster_status`]; tests can await it with
//! [`HydroformProvisioner::wait_for`].

pub mod configuration;

pub use configuration::{HydroformConfiguration, build_configuration};

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use provisioner_core::model::{Cluster, Operation, OperationState};
use provisioner_core::persistence::Persistence;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info};

use super::{ClusterStatus, DeletionStatus, Provisioner, ProvisionerError, deprovisioning_operation};

/// Cluster phase reported by Hydroform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterPhase {
    Pending,
    Provisioning,
    Provisioned,
    Errored,
    Unknown,
}

/// Terraform-based cluster lifecycle.
#[async_trait]
pub trait HydroformClient: Send + Sync {
    /// Start creating the cluster; returns the state needed for later calls.
    async fn provision(
        &self,
        configuration: &HydroformConfiguration,
    ) -> Result<Vec<u8>, ProvisionerError>;

    async fn status(&self, internal_state: &[u8]) -> Result<ClusterPhase, ProvisionerError>;

    /// Kubeconfig of a provisioned cluster.
    async fn credentials(&self, internal_state: &[u8]) -> Result<String, ProvisionerError>;

    async fn deprovision(&self, internal_state: &[u8]) -> Result<(), ProvisionerError>;
}

/// Polling of cluster creation.
#[derive(Debug, Clone)]
pub struct HydroformConfig {
    pub poll_interval: Duration,
    /// Longest time to wait for the `Provisioned` phase.
    pub timeout: Duration,
}

impl Default for HydroformConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            timeout: Duration::from_secs(20 * 60),
        }
    }
}

type TaskResult = Result<(), String>;

#[derive(Default)]
struct Tasks {
    running: HashMap<String, JoinHandle<TaskResult>>,
    finished: HashMap<String, TaskResult>,
}

fn join_result(result: Result<TaskResult, tokio::task::JoinError>) -> TaskResult {
    result.unwrap_or_else(|e| Err(format!("Hydroform task aborted: {}", e)))
}

/// [`Provisioner`] driving Hydroform in background tasks.
pub struct HydroformProvisioner {
    client: Arc<dyn HydroformClient>,
    persistence: Arc<dyn Persistence>,
    config: HydroformConfig,
    tasks: Mutex<Tasks>,
}

impl HydroformProvisioner {
    pub fn new(
        client: Arc<dyn HydroformClient>,
        persistence: Arc<dyn Persistence>,
        config: HydroformConfig,
    ) -> Self {
        Self {
            client,
            persistence,
            config,
            tasks: Mutex::new(Tasks::default()),
        }
    }

    /// Wait for the task of `operation_id` and return its outcome. The outcome
    /// stays available to the next status read, which consumes it.
    ///
    /// Returns `None` when no task was started for the operation.
    pub async fn wait_for(&self, operation_id: &str) -> Option<TaskResult> {
        let handle = self.tasks.lock().await.running.remove(operation_id);

        let Some(handle) = handle else {
            return self.tasks.lock().await.finished.get(operation_id).cloned();
        };

        let result = join_result(handle.await);
        self.tasks
            .lock()
            .await
            .finished
            .insert(operation_id.to_string(), result.clone());
        Some(result)
    }

    async fn spawn_tracked<F>(&self, operation_id: &str, task: F)
    where
        F: Future<Output = TaskResult> + Send + 'static,
    {
        let mut tasks = self.tasks.lock().await;
        tasks.finished.remove(operation_id);
        tasks
            .running
            .insert(operation_id.to_string(), tokio::spawn(task));
    }

    /// Outcome of the operation's task. `Some(None)` means still running.
    /// A terminal outcome is handed out once and then forgotten.
    async fn task_outcome(&self, operation_id: &str) -> Option<Option<TaskResult>> {
        let mut tasks = self.tasks.lock().await;

        match tasks.running.remove(operation_id) {
            Some(handle) if !handle.is_finished() => {
                tasks.running.insert(operation_id.to_string(), handle);
                Some(None)
            }
            Some(handle) => Some(Some(join_result(handle.await))),
            None => tasks.finished.remove(operation_id).map(Some),
        }
    }
}

async fn provision_and_wait(
    client: &dyn HydroformClient,
    persistence: &dyn Persistence,
    config: &HydroformConfig,
    cluster: &Cluster,
) -> TaskResult {
    let configuration =
        build_configuration(&cluster.cluster_config, &cluster.credentials_secret_name);
    let state = client
        .provision(&configuration)
        .await
        .map_err(|e| format!("failed to provision cluster: {}", e))?;

    let deadline = Instant::now() + config.timeout;
    loop {
        let phase = client
            .status(&state)
            .await
            .map_err(|e| format!("failed to get cluster status: {}", e))?;
        match phase {
            ClusterPhase::Provisioned => break,
            ClusterPhase::Errored => {
                return Err("cluster provisioning failed: cluster is in error state".to_string());
            }
            _ => debug!(runtime_id = %cluster.id, phase = ?phase, "Cluster not provisioned yet"),
        }

        if Instant::now() >= deadline {
            return Err(format!(
                "timeout while waiting for cluster {} to be provisioned",
                cluster.id
            ));
        }
        tokio::time::sleep(config.poll_interval).await;
    }

    let kubeconfig = client
        .credentials(&state)
        .await
        .map_err(|e| format!("failed to get cluster credentials: {}", e))?;

    persistence
        .update_cluster_kubeconfig(&cluster.id, &kubeconfig, Some(&state))
        .await
        .map_err(|e| format!("failed to save cluster kubeconfig: {}", e))
}

#[async_trait]
impl Provisioner for HydroformProvisioner {
    async fn provision_cluster(
        &self,
        cluster: &Cluster,
        operation_id: &str,
    ) -> Result<(), ProvisionerError> {
        let client = self.client.clone();
        let persistence = self.persistence.clone();
        let config = self.config.clone();
        let cluster = cluster.clone();
        let op_id = operation_id.to_string();

        self.spawn_tracked(operation_id, async move {
            let result =
                provision_and_wait(client.as_ref(), persistence.as_ref(), &config, &cluster).await;

            match &result {
                Ok(()) => {
                    info!(runtime_id = %cluster.id, operation_id = %op_id, "Cluster provisioned")
                }
                Err(message) => {
                    error!(
                        runtime_id = %cluster.id,
                        operation_id = %op_id,
                        error = %message,
                        "Cluster provisioning failed"
                    );
                    if let Err(e) = persistence
                        .update_operation_state(&op_id, OperationState::Failed, message, Utc::now())
                        .await
                    {
                        error!(
                            operation_id = %op_id,
                            error = %e,
                            "Failed to mark operation failed"
                        );
                    }
                }
            }
            result
        })
        .await;

        Ok(())
    }

    async fn deprovision_cluster(
        &self,
        cluster: &Cluster,
        operation_id: &str,
    ) -> Result<Operation, ProvisionerError> {
        let Some(state) = cluster.internal_state.clone() else {
            return Err(ProvisionerError::Backend(format!(
                "cluster {} has no Hydroform state",
                cluster.id
            )));
        };

        let client = self.client.clone();
        self.spawn_tracked(operation_id, async move {
            client
                .deprovision(&state)
                .await
                .map_err(|e| format!("failed to deprovision cluster: {}", e))
        })
        .await;

        info!(runtime_id = %cluster.id, "Hydroform deprovisioning started");
        Ok(deprovisioning_operation(cluster, operation_id))
    }

    async fn cluster_status(
        &self,
        cluster: &Cluster,
        operation_id: &str,
    ) -> Result<ClusterStatus, ProvisionerError> {
        match self.task_outcome(operation_id).await {
            Some(None) => return Ok(ClusterStatus::Pending),
            Some(Some(Err(message))) => return Ok(ClusterStatus::Failed(message)),
            Some(Some(Ok(()))) | None => {}
        }

        let stored = self.persistence.get_cluster(&cluster.id).await?;
        Ok(match stored.kubeconfig {
            Some(kubeconfig) => ClusterStatus::Ready {
                kubeconfig,
                internal_state: stored.internal_state,
            },
            None => ClusterStatus::Failed("Hydroform provisioning was interrupted".to_string()),
        })
    }

    async fn deletion_status(
        &self,
        cluster: &Cluster,
        operation_id: &str,
    ) -> Result<DeletionStatus, ProvisionerError> {
        match self.task_outcome(operation_id).await {
            Some(None) => Ok(DeletionStatus::Pending),
            Some(Some(Ok(()))) => Ok(DeletionStatus::Deleted),
            Some(Some(Err(message))) => Ok(DeletionStatus::Failed(message)),
            None => {
                // Task lost with a previous process; teardown is idempotent.
                self.deprovision_cluster(cluster, operation_id).await?;
                Ok(DeletionStatus::Pending)
            }
        }
    }
}

// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory cluster backends for tests.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use provisioner_core::model::{Cluster, Operation};
use serde_json::Value;
use tokio::sync::Mutex;

use super::gardener::{LastOperation, ShootClient, ShootState};
use super::hydroform::{ClusterPhase, HydroformClient, HydroformConfiguration};
use super::{ClusterStatus, DeletionStatus, Provisioner, ProvisionerError, deprovisioning_operation};

#[derive(Default)]
struct ProvisionerState {
    provisioned: Vec<String>,
    deprovisioned: Vec<String>,
    status_polls: HashMap<String, u32>,
    deletion_polls: HashMap<String, u32>,
}

/// Provisioner whose clusters become ready after a number of polls.
#[derive(Clone, Default)]
pub struct MockProvisioner {
    state: Arc<Mutex<ProvisionerState>>,
    /// Polls answered with `Pending` before a cluster is ready or deleted.
    pub pending_polls: u32,
    /// Fail every `provision_cluster` call.
    pub fail_provision: bool,
    /// Fail every `deprovision_cluster` call.
    pub fail_deprovision: bool,
    /// Report clusters as failed with this message.
    pub cluster_failure: Option<String>,
}

impl MockProvisioner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ready_after(polls: u32) -> Self {
        Self {
            pending_polls: polls,
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail_provision: true,
            fail_deprovision: true,
            ..Self::default()
        }
    }

    /// Kubeconfig handed out for `runtime_id`.
    pub fn kubeconfig(runtime_id: &str) -> String {
        format!("kubeconfig-{}", runtime_id)
    }

    /// Runtime IDs passed to `provision_cluster`, in call order.
    pub async fn provisioned(&self) -> Vec<String> {
        self.state.lock().await.provisioned.clone()
    }

    pub async fn deprovisioned(&self) -> Vec<String> {
        self.state.lock().await.deprovisioned.clone()
    }

    /// Number of `cluster_status` calls for `operation_id`.
    pub async fn status_polls(&self, operation_id: &str) -> u32 {
        self.state
            .lock()
            .await
            .status_polls
            .get(operation_id)
            .copied()
            .unwrap_or_default()
    }
}

#[async_trait]
impl Provisioner for MockProvisioner {
    async fn provision_cluster(
        &self,
        cluster: &Cluster,
        _operation_id: &str,
    ) -> Result<(), ProvisionerError> {
        if self.fail_provision {
            return Err(ProvisionerError::Backend("cluster creation refused".to_string()));
        }
        self.state.lock().await.provisioned.push(cluster.id.clone());
        Ok(())
    }

    async fn deprovision_cluster(
        &self,
        cluster: &Cluster,
        operation_id: &str,
    ) -> Result<Operation, ProvisionerError> {
        if self.fail_deprovision {
            return Err(ProvisionerError::Backend("cluster deletion refused".to_string()));
        }
        self.state.lock().await.deprovisioned.push(cluster.id.clone());
        Ok(deprovisioning_operation(cluster, operation_id))
    }

    async fn cluster_status(
        &self,
        cluster: &Cluster,
        operation_id: &str,
    ) -> Result<ClusterStatus, ProvisionerError> {
        let mut state = self.state.lock().await;
        let polls = state
            .status_polls
            .entry(operation_id.to_string())
            .or_default();
        *polls += 1;

        if let Some(message) = &self.cluster_failure {
            return Ok(ClusterStatus::Failed(message.clone()));
        }
        if *polls <= self.pending_polls {
            return Ok(ClusterStatus::Pending);
        }
        Ok(ClusterStatus::Ready {
            kubeconfig: Self::kubeconfig(&cluster.id),
            internal_state: None,
        })
    }

    async fn deletion_status(
        &self,
        _cluster: &Cluster,
        operation_id: &str,
    ) -> Result<DeletionStatus, ProvisionerError> {
        let mut state = self.state.lock().await;
        let polls = state
            .deletion_polls
            .entry(operation_id.to_string())
            .or_default();
        *polls += 1;

        if *polls <= self.pending_polls {
            Ok(DeletionStatus::Pending)
        } else {
            Ok(DeletionStatus::Deleted)
        }
    }
}

struct MockShoot {
    manifest: Value,
    state: ShootState,
}

/// Gardener project kept in memory.
#[derive(Clone, Default)]
pub struct MockShootClient {
    shoots: Arc<Mutex<BTreeMap<String, MockShoot>>>,
    kubeconfigs: Arc<Mutex<BTreeMap<String, String>>>,
    deleted: Arc<Mutex<Vec<String>>>,
    /// Created shoots are reconciled and get a kubeconfig immediately.
    pub auto_ready: bool,
    /// Deleted shoots disappear immediately.
    pub auto_delete: bool,
}

impl MockShootClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Project where shoots come and go without manual steps.
    pub fn auto() -> Self {
        Self {
            auto_ready: true,
            auto_delete: true,
            ..Self::default()
        }
    }

    /// Manifest the shoot was created from.
    pub async fn manifest(&self, name: &str) -> Option<Value> {
        self.shoots
            .lock()
            .await
            .get(name)
            .map(|shoot| shoot.manifest.clone())
    }

    pub async fn set_last_operation(
        &self,
        name: &str,
        operation_type: &str,
        state: &str,
        description: &str,
    ) {
        if let Some(shoot) = self.shoots.lock().await.get_mut(name) {
            shoot.state.last_operation = Some(LastOperation {
                operation_type: operation_type.to_string(),
                state: state.to_string(),
                description: description.to_string(),
            });
        }
    }

    pub async fn set_kubeconfig(&self, name: &str, kubeconfig: &str) {
        self.kubeconfigs
            .lock()
            .await
            .insert(name.to_string(), kubeconfig.to_string());
    }

    /// Drop the shoot, as Gardener does once deletion finished.
    pub async fn remove(&self, name: &str) {
        self.shoots.lock().await.remove(name);
        self.kubeconfigs.lock().await.remove(name);
    }

    /// Names passed to `delete_shoot`, in call order.
    pub async fn deleted(&self) -> Vec<String> {
        self.deleted.lock().await.clone()
    }
}

fn string_map(value: &Value) -> BTreeMap<String, String> {
    value
        .as_object()
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl ShootClient for MockShootClient {
    async fn create_shoot(&self, shoot: &Value) -> Result<(), ProvisionerError> {
        let Some(name) = shoot["metadata"]["name"].as_str() else {
            return Err(ProvisionerError::Backend("shoot has no name".to_string()));
        };

        let last_operation = self.auto_ready.then(|| LastOperation {
            operation_type: "Create".to_string(),
            state: "Succeeded".to_string(),
            description: "Shoot cluster state synchronized".to_string(),
        });
        let state = ShootState {
            name: name.to_string(),
            annotations: string_map(&shoot["metadata"]["annotations"]),
            last_operation,
        };

        self.shoots.lock().await.insert(
            name.to_string(),
            MockShoot {
                manifest: shoot.clone(),
                state,
            },
        );
        if self.auto_ready {
            self.set_kubeconfig(name, &format!("kubeconfig-{}", name))
                .await;
        }
        Ok(())
    }

    async fn get_shoot(&self, name: &str) -> Result<Option<ShootState>, ProvisionerError> {
        Ok(self
            .shoots
            .lock()
            .await
            .get(name)
            .map(|shoot| shoot.state.clone()))
    }

    async fn annotate_shoot(
        &self,
        name: &str,
        annotations: &BTreeMap<String, String>,
    ) -> Result<(), ProvisionerError> {
        if let Some(shoot) = self.shoots.lock().await.get_mut(name) {
            shoot
                .state
                .annotations
                .extend(annotations.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        Ok(())
    }

    async fn delete_shoot(&self, name: &str) -> Result<(), ProvisionerError> {
        self.deleted.lock().await.push(name.to_string());

        if self.auto_delete {
            self.remove(name).await;
        } else {
            self.set_last_operation(name, "Delete", "Processing", "Deleting shoot")
                .await;
        }
        Ok(())
    }

    async fn get_kubeconfig(&self, name: &str) -> Result<Option<String>, ProvisionerError> {
        Ok(self.kubeconfigs.lock().await.get(name).cloned())
    }
}

/// Hydroform answering phases from a script.
#[derive(Clone, Default)]
pub struct MockHydroformClient {
    phases: Arc<Mutex<VecDeque<ClusterPhase>>>,
    status_calls: Arc<Mutex<u32>>,
    deprovisioned: Arc<Mutex<Vec<Vec<u8>>>>,
    provisioned: Arc<Mutex<Vec<HydroformConfiguration>>>,
    /// Fail every `provision` call.
    pub fail_provision: bool,
}

impl MockHydroformClient {
    pub const KUBECONFIG: &'static str = "hydroform-kubeconfig";
    pub const STATE: &'static [u8] = b"hydroform-state";

    /// Answer status calls with `phases` in order, repeating the last one.
    /// An empty script reports `Provisioned`.
    pub fn with_phases(phases: impl IntoIterator<Item = ClusterPhase>) -> Self {
        Self {
            phases: Arc::new(Mutex::new(phases.into_iter().collect())),
            ..Self::default()
        }
    }

    pub async fn status_calls(&self) -> u32 {
        *self.status_calls.lock().await
    }

    /// Configurations passed to `provision`, in call order.
    pub async fn provisioned(&self) -> Vec<HydroformConfiguration> {
        self.provisioned.lock().await.clone()
    }

    /// States passed to `deprovision`, in call order.
    pub async fn deprovisioned(&self) -> Vec<Vec<u8>> {
        self.deprovisioned.lock().await.clone()
    }
}

#[async_trait]
impl HydroformClient for MockHydroformClient {
    async fn provision(
        &self,
        configuration: &HydroformConfiguration,
    ) -> Result<Vec<u8>, ProvisionerError> {
        if self.fail_provision {
            return Err(ProvisionerError::Backend("terraform apply failed".to_string()));
        }
        self.provisioned.lock().await.push(configuration.clone());
        Ok(Self::STATE.to_vec())
    }

    async fn status(&self, _internal_state: &[u8]) -> Result<ClusterPhase, ProvisionerError> {
        *self.status_calls.lock().await += 1;

        let mut phases = self.phases.lock().await;
        let phase = if phases.len() > 1 {
            phases.pop_front()
        } else {
            phases.front().copied()
        };
        Ok(phase.unwrap_or(ClusterPhase::Provisioned))
    }

    async fn credentials(&self, _internal_state: &[u8]) -> Result<String, ProvisionerError> {
        Ok(Self::KUBECONFIG.to_string())
    }

    async fn deprovision(&self, internal_state: &[u8]) -> Result<(), ProvisionerError> {
        self.deprovisioned.lock().await.push(internal_state.to_vec());
        Ok(())
    }
}

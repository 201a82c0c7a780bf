// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Gardener backend.
//!
//! Clusters are `Shoot` resources in the `garden-<project>` namespace of the
//! Gardener project. Progress is read from `status.lastOperation`, and the
//! kubeconfig from the `<shoot>.kubeconfig` secret Gardener publishes once
//! the shoot is reconciled.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, DeleteParams, DynamicObject, Patch, PatchParams, PostParams};
use kube::core::ApiResource;
use kube::{Client, ResourceExt};
use provisioner_core::model::{Cluster, ClusterConfig, GardenerConfig, Operation};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use super::{ClusterStatus, DeletionStatus, Provisioner, ProvisionerError, deprovisioning_operation};
use crate::installation::InstallationService;

pub const RUNTIME_ID_ANNOTATION: &str = "compass.provisioner.kyma-project.io/runtime-id";
pub const OPERATION_ID_ANNOTATION: &str = "compass.provisioner.kyma-project.io/operation-id";
pub const PROVISIONING_ANNOTATION: &str = "compass.provisioner.kyma-project.io/provisioning";
const DELETION_CONFIRMATION_ANNOTATION: &str = "confirmation.gardener.cloud/deletion";

/// Values of [`PROVISIONING_ANNOTATION`].
pub const PROVISIONING: &str = "provisioning";
pub const PROVISIONED: &str = "provisioned";
pub const DEPROVISIONING: &str = "deprovisioning";

const KUBECONFIG_KEY: &str = "kubeconfig";

/// `status.lastOperation` of a shoot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastOperation {
    /// `Create`, `Reconcile` or `Delete`.
    pub operation_type: String,
    /// `Processing`, `Succeeded`, `Error`, `Failed`, ...
    pub state: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShootState {
    pub name: String,
    pub annotations: BTreeMap<String, String>,
    pub last_operation: Option<LastOperation>,
}

/// Access to shoots of one Gardener project.
#[async_trait]
pub trait ShootClient: Send + Sync {
    async fn create_shoot(&self, shoot: &Value) -> Result<(), ProvisionerError>;

    async fn get_shoot(&self, name: &str) -> Result<Option<ShootState>, ProvisionerError>;

    /// Merge `annotations` into the shoot's annotations. A shoot that is
    /// already gone is not an error.
    async fn annotate_shoot(
        &self,
        name: &str,
        annotations: &BTreeMap<String, String>,
    ) -> Result<(), ProvisionerError>;

    /// Request deletion. A shoot that is already gone is not an error.
    async fn delete_shoot(&self, name: &str) -> Result<(), ProvisionerError>;

    /// Kubeconfig of the shoot, once Gardener has published it.
    async fn get_kubeconfig(&self, name: &str) -> Result<Option<String>, ProvisionerError>;
}

fn shoot_resource() -> ApiResource {
    ApiResource {
        group: "core.gardener.cloud".to_string(),
        version: "v1beta1".to_string(),
        api_version: "core.gardener.cloud/v1beta1".to_string(),
        kind: "Shoot".to_string(),
        plural: "shoots".to_string(),
    }
}

fn api_error(e: kube::Error) -> ProvisionerError {
    ProvisionerError::Backend(format!("Gardener request failed: {}", e))
}

pub(crate) fn shoot_state(object: &DynamicObject) -> ShootState {
    let last_operation = object.data["status"]["lastOperation"]
        .as_object()
        .map(|op| LastOperation {
            operation_type: op.get("type").and_then(Value::as_str).unwrap_or_default().to_string(),
            state: op.get("state").and_then(Value::as_str).unwrap_or_default().to_string(),
            description: op
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        });

    ShootState {
        name: object.name_any(),
        annotations: object.annotations().clone(),
        last_operation,
    }
}

/// [`ShootClient`] backed by the Gardener project's API server.
#[derive(Clone)]
pub struct KubeShootClient {
    client: Client,
    namespace: String,
}

impl KubeShootClient {
    pub fn new(client: Client, project: &str) -> Self {
        Self {
            client,
            namespace: project_namespace(project),
        }
    }

    fn shoots(&self) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), &self.namespace, &shoot_resource())
    }
}

/// Namespace of a Gardener project.
pub fn project_namespace(project: &str) -> String {
    format!("garden-{}", project)
}

#[async_trait]
impl ShootClient for KubeShootClient {
    async fn create_shoot(&self, shoot: &Value) -> Result<(), ProvisionerError> {
        let object: DynamicObject = serde_json::from_value(shoot.clone())
            .map_err(|e| ProvisionerError::Backend(format!("invalid shoot manifest: {}", e)))?;

        match self.shoots().create(&PostParams::default(), &object).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 409 => {
                debug!(shoot = %object.name_any(), "Shoot already exists");
                Ok(())
            }
            Err(e) => Err(api_error(e)),
        }
    }

    async fn get_shoot(&self, name: &str) -> Result<Option<ShootState>, ProvisionerError> {
        let shoot = self.shoots().get_opt(name).await.map_err(api_error)?;
        Ok(shoot.as_ref().map(shoot_state))
    }

    async fn annotate_shoot(
        &self,
        name: &str,
        annotations: &BTreeMap<String, String>,
    ) -> Result<(), ProvisionerError> {
        let patch = json!({ "metadata": { "annotations": annotations } });
        match self
            .shoots()
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                debug!(shoot = %name, "Shoot to annotate does not exist");
                Ok(())
            }
            Err(e) => Err(api_error(e)),
        }
    }

    async fn delete_shoot(&self, name: &str) -> Result<(), ProvisionerError> {
        match self.shoots().delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(api_error(e)),
        }
    }

    async fn get_kubeconfig(&self, name: &str) -> Result<Option<String>, ProvisionerError> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), &self.namespace);
        let secret = secrets
            .get_opt(&format!("{}.kubeconfig", name))
            .await
            .map_err(api_error)?;

        let Some(raw) = secret
            .and_then(|s| s.data)
            .and_then(|mut data| data.remove(KUBECONFIG_KEY))
        else {
            return Ok(None);
        };

        String::from_utf8(raw.0)
            .map(Some)
            .map_err(|e| {
                ProvisionerError::Backend(format!("kubeconfig of {} is not UTF-8: {}", name, e))
            })
    }
}

/// [`Provisioner`] creating Gardener shoots.
pub struct GardenerProvisioner {
    shoots: Arc<dyn ShootClient>,
    installation: Arc<dyn InstallationService>,
    namespace: String,
}

impl GardenerProvisioner {
    pub fn new(
        shoots: Arc<dyn ShootClient>,
        installation: Arc<dyn InstallationService>,
        project: &str,
    ) -> Self {
        Self {
            shoots,
            installation,
            namespace: project_namespace(project),
        }
    }

    fn config(cluster: &Cluster) -> Result<&GardenerConfig, ProvisionerError> {
        match &cluster.cluster_config {
            ClusterConfig::Gardener(config) => Ok(config),
            ClusterConfig::Gcp(_) => Err(ProvisionerError::Backend(format!(
                "cluster {} is not a Gardener cluster",
                cluster.id
            ))),
        }
    }
}

fn annotations<const N: usize>(pairs: [(&str, &str); N]) -> BTreeMap<String, String> {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[async_trait]
impl Provisioner for GardenerProvisioner {
    async fn provision_cluster(
        &self,
        cluster: &Cluster,
        operation_id: &str,
    ) -> Result<(), ProvisionerError> {
        let config = Self::config(cluster)?;

        let mut shoot = config.to_shoot(&self.namespace);
        shoot["metadata"]["annotations"] = json!(annotations([
            (RUNTIME_ID_ANNOTATION, cluster.id.as_str()),
            (OPERATION_ID_ANNOTATION, operation_id),
            (PROVISIONING_ANNOTATION, PROVISIONING),
        ]));

        self.shoots.create_shoot(&shoot).await?;
        info!(runtime_id = %cluster.id, shoot = %config.name, "Shoot creation requested");
        Ok(())
    }

    async fn deprovision_cluster(
        &self,
        cluster: &Cluster,
        operation_id: &str,
    ) -> Result<Operation, ProvisionerError> {
        let config = Self::config(cluster)?;

        if let Some(kubeconfig) = &cluster.kubeconfig {
            if let Err(e) = self.installation.perform_cleanup(kubeconfig).await {
                warn!(runtime_id = %cluster.id, error = %e, "Service catalog cleanup failed");
            }
            if let Err(e) = self.installation.trigger_uninstall(kubeconfig).await {
                warn!(
                    runtime_id = %cluster.id,
                    error = %e,
                    "Failed to trigger Kyma uninstallation"
                );
            }
        }

        self.shoots
            .annotate_shoot(
                &config.name,
                &annotations([
                    (OPERATION_ID_ANNOTATION, operation_id),
                    (PROVISIONING_ANNOTATION, DEPROVISIONING),
                    (DELETION_CONFIRMATION_ANNOTATION, "true"),
                ]),
            )
            .await?;
        self.shoots.delete_shoot(&config.name).await?;

        info!(runtime_id = %cluster.id, shoot = %config.name, "Shoot deletion requested");
        Ok(deprovisioning_operation(cluster, operation_id))
    }

    async fn cluster_status(
        &self,
        cluster: &Cluster,
        operation_id: &str,
    ) -> Result<ClusterStatus, ProvisionerError> {
        let config = Self::config(cluster)?;

        let Some(shoot) = self.shoots.get_shoot(&config.name).await? else {
            return Ok(ClusterStatus::Failed(format!(
                "shoot {} does not exist",
                config.name
            )));
        };
        let Some(last_operation) = shoot.last_operation else {
            return Ok(ClusterStatus::Pending);
        };

        match last_operation.state.as_str() {
            "Succeeded" => {
                let Some(kubeconfig) = self.shoots.get_kubeconfig(&config.name).await? else {
                    debug!(shoot = %config.name, "Shoot ready, waiting for kubeconfig");
                    return Ok(ClusterStatus::Pending);
                };

                self.shoots
                    .annotate_shoot(
                        &config.name,
                        &annotations([
                            (OPERATION_ID_ANNOTATION, operation_id),
                            (PROVISIONING_ANNOTATION, PROVISIONED),
                        ]),
                    )
                    .await?;

                Ok(ClusterStatus::Ready {
                    kubeconfig,
                    internal_state: None,
                })
            }
            "Failed" | "Error" => Ok(ClusterStatus::Failed(format!(
                "shoot {} {} failed: {}",
                config.name, last_operation.operation_type, last_operation.description
            ))),
            _ => Ok(ClusterStatus::Pending),
        }
    }

    async fn deletion_status(
        &self,
        cluster: &Cluster,
        _operation_id: &str,
    ) -> Result<DeletionStatus, ProvisionerError> {
        let config = Self::config(cluster)?;

        let Some(shoot) = self.shoots.get_shoot(&config.name).await? else {
            return Ok(DeletionStatus::Deleted);
        };

        match shoot.last_operation {
            Some(op) if op.operation_type == "Delete" && op.state == "Failed" => {
                Ok(DeletionStatus::Failed(format!(
                    "shoot {} deletion failed: {}",
                    config.name, op.description
                )))
            }
            _ => Ok(DeletionStatus::Pending),
        }
    }
}

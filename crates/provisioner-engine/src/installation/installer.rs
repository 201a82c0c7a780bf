// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Kyma installer driven through the Kubernetes API.
//!
//! Installation deploys the release's Tiller and installer manifests, writes
//! configuration overrides into the `kyma-installer` namespace and then
//! labels the `kyma-installation` resource with the requested action. The
//! installer operator reports progress in the resource status.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DynamicObject, Patch, PatchParams};
use kube::core::{ApiResource, GroupVersionKind};
use kube::discovery::{self, Scope};
use kube::{Client, ResourceExt};
use provisioner_core::model::{ConfigEntry, KymaComponentConfig, Release};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info};

use super::{
    InstallationError, InstallationService, InstallationState, InstallationStateKind, cleanup,
};
use crate::kubeclient::client_from_kubeconfig;

const FIELD_MANAGER: &str = "kyma-provisioner";
const INSTALLER_NAMESPACE: &str = "kyma-installer";
const INSTALLATION_NAME: &str = "kyma-installation";
const INSTALLATION_NAMESPACE: &str = "default";
const GLOBAL_OVERRIDES: &str = "global-overrides";

fn api_error(e: kube::Error) -> InstallationError {
    InstallationError::Api(e.to_string())
}

fn installation_resource() -> ApiResource {
    ApiResource {
        group: "installer.kyma-project.io".to_string(),
        version: "v1alpha1".to_string(),
        api_version: "installer.kyma-project.io/v1alpha1".to_string(),
        kind: "Installation".to_string(),
        plural: "installations".to_string(),
    }
}

/// Split a multi-document YAML manifest into objects, skipping empty documents.
pub(crate) fn parse_manifests(yaml: &str) -> Result<Vec<DynamicObject>, InstallationError> {
    let mut objects = Vec::new();

    for document in serde_yaml::Deserializer::from_str(yaml) {
        let value = serde_yaml::Value::deserialize(document)
            .map_err(|e| InstallationError::Manifest(e.to_string()))?;
        if value.is_null() {
            continue;
        }
        let object: DynamicObject = serde_yaml::from_value(value)
            .map_err(|e| InstallationError::Manifest(e.to_string()))?;
        objects.push(object);
    }

    Ok(objects)
}

fn gvk_of(object: &DynamicObject) -> Result<GroupVersionKind, InstallationError> {
    let types = object.types.as_ref().ok_or_else(|| {
        InstallationError::Manifest(format!("{} has no apiVersion or kind", object.name_any()))
    })?;

    let (group, version) = types
        .api_version
        .split_once('/')
        .unwrap_or(("", types.api_version.as_str()));
    Ok(GroupVersionKind::gvk(group, version, &types.kind))
}

fn override_labels(component: Option<&str>) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::from([
        ("installer".to_string(), "overrides".to_string()),
        ("kyma-project.io/installation".to_string(), String::new()),
    ]);
    if let Some(component) = component {
        labels.insert("component".to_string(), component.to_string());
    }
    labels
}

/// ConfigMaps holding plain overrides and Secrets holding secret ones.
pub(crate) fn override_objects(
    global: &[ConfigEntry],
    components: &[KymaComponentConfig],
) -> (Vec<ConfigMap>, Vec<Secret>) {
    let mut config_maps = Vec::new();
    let mut secrets = Vec::new();

    let sets = std::iter::once((GLOBAL_OVERRIDES.to_string(), None, global)).chain(
        components.iter().map(|component| {
            (
                format!("{}-overrides", component.component),
                Some(component.component.as_str()),
                component.configuration.as_slice(),
            )
        }),
    );

    for (name, component, entries) in sets {
        let metadata = ObjectMeta {
            name: Some(name),
            namespace: Some(INSTALLER_NAMESPACE.to_string()),
            labels: Some(override_labels(component)),
            ..Default::default()
        };

        let plain: BTreeMap<String, String> = entries
            .iter()
            .filter(|entry| !entry.secret)
            .map(|entry| (entry.key.clone(), entry.value.clone()))
            .collect();
        let secret: BTreeMap<String, ByteString> = entries
            .iter()
            .filter(|entry| entry.secret)
            .map(|entry| (entry.key.clone(), ByteString(entry.value.clone().into_bytes())))
            .collect();

        if !plain.is_empty() {
            config_maps.push(ConfigMap {
                metadata: metadata.clone(),
                data: Some(plain),
                ..Default::default()
            });
        }
        if !secret.is_empty() {
            secrets.push(Secret {
                metadata,
                data: Some(secret),
                ..Default::default()
            });
        }
    }

    (config_maps, secrets)
}

/// The installation resource requesting `action` for `release`.
pub(crate) fn installation_object(
    release: &Release,
    components: &[KymaComponentConfig],
    action: &str,
) -> DynamicObject {
    let mut object = DynamicObject::new(INSTALLATION_NAME, &installation_resource())
        .within(INSTALLATION_NAMESPACE);
    object.metadata.labels = Some(BTreeMap::from([(
        "action".to_string(),
        action.to_string(),
    )]));

    let components: Vec<Value> = components
        .iter()
        .map(|component| {
            let mut spec = json!({
                "name": component.component,
                "namespace": component.namespace,
            });
            if let Some(url) = &component.source_url {
                spec["source"] = json!({ "url": url });
            }
            spec
        })
        .collect();

    object.data = json!({
        "spec": {
            "kymaVersion": release.version,
            "components": components,
        }
    });
    object
}

/// Installer state from the installation resource status.
pub(crate) fn installation_state(object: &DynamicObject) -> InstallationState {
    let status = &object.data["status"];
    match status["state"].as_str() {
        Some(state) => InstallationState::new(
            InstallationStateKind::parse(state),
            status["description"].as_str().unwrap_or_default(),
        ),
        None => InstallationState::new(
            InstallationStateKind::InProgress,
            "installation not yet picked up by the installer",
        ),
    }
}

/// [`InstallationService`] talking to the target cluster directly.
#[derive(Debug, Clone, Default)]
pub struct KubeInstallationService;

impl KubeInstallationService {
    pub fn new() -> Self {
        Self
    }

    fn apply_params() -> PatchParams {
        PatchParams::apply(FIELD_MANAGER).force()
    }

    async fn apply_manifest(&self, client: &Client, yaml: &str) -> Result<(), InstallationError> {
        for object in parse_manifests(yaml)? {
            let gvk = gvk_of(&object)?;
            let name = object.name_any();
            let (resource, capabilities) = discovery::pinned_kind(client, &gvk)
                .await
                .map_err(api_error)?;

            let api: Api<DynamicObject> = match capabilities.scope {
                Scope::Namespaced => Api::namespaced_with(
                    client.clone(),
                    object.metadata.namespace.as_deref().unwrap_or("default"),
                    &resource,
                ),
                Scope::Cluster => Api::all_with(client.clone(), &resource),
            };

            api.patch(&name, &Self::apply_params(), &Patch::Apply(&object))
                .await
                .map_err(api_error)?;
            debug!(kind = %gvk.kind, name = %name, "Manifest object applied");
        }
        Ok(())
    }

    async fn apply_overrides(
        &self,
        client: &Client,
        global: &[ConfigEntry],
        components: &[KymaComponentConfig],
    ) -> Result<(), InstallationError> {
        let (config_maps, secrets) = override_objects(global, components);

        let config_map_api: Api<ConfigMap> = Api::namespaced(client.clone(), INSTALLER_NAMESPACE);
        for config_map in &config_maps {
            config_map_api
                .patch(&config_map.name_any(), &Self::apply_params(), &Patch::Apply(config_map))
                .await
                .map_err(api_error)?;
        }

        let secret_api: Api<Secret> = Api::namespaced(client.clone(), INSTALLER_NAMESPACE);
        for secret in &secrets {
            secret_api
                .patch(&secret.name_any(), &Self::apply_params(), &Patch::Apply(secret))
                .await
                .map_err(api_error)?;
        }

        debug!(
            config_maps = config_maps.len(),
            secrets = secrets.len(),
            "Installation overrides applied"
        );
        Ok(())
    }

    async fn request_action(
        &self,
        client: &Client,
        release: &Release,
        components: &[KymaComponentConfig],
        action: &str,
    ) -> Result<(), InstallationError> {
        let object = installation_object(release, components, action);
        self.installation_api(client)
            .patch(INSTALLATION_NAME, &Self::apply_params(), &Patch::Apply(&object))
            .await
            .map_err(api_error)?;
        Ok(())
    }

    fn installation_api(&self, client: &Client) -> Api<DynamicObject> {
        Api::namespaced_with(client.clone(), INSTALLATION_NAMESPACE, &installation_resource())
    }
}

#[async_trait]
impl InstallationService for KubeInstallationService {
    async fn trigger_installation(
        &self,
        kubeconfig: &str,
        release: &Release,
        global_config: &[ConfigEntry],
        components: &[KymaComponentConfig],
    ) -> Result<(), InstallationError> {
        let client = client_from_kubeconfig(kubeconfig).await?;

        self.apply_manifest(&client, &release.tiller_yaml).await?;
        self.apply_manifest(&client, &release.installer_yaml).await?;
        self.apply_overrides(&client, global_config, components)
            .await?;
        self.request_action(&client, release, components, "install")
            .await?;

        info!(version = %release.version, "Kyma installation triggered");
        Ok(())
    }

    async fn check_installation_state(
        &self,
        kubeconfig: &str,
    ) -> Result<InstallationState, InstallationError> {
        let client = client_from_kubeconfig(kubeconfig).await?;

        let installation = self
            .installation_api(&client)
            .get_opt(INSTALLATION_NAME)
            .await
            .map_err(api_error)?;

        Ok(match installation {
            Some(object) => installation_state(&object),
            None => InstallationState::new(
                InstallationStateKind::Other("NotFound".to_string()),
                "installation resource does not exist",
            ),
        })
    }

    async fn trigger_upgrade(
        &self,
        kubeconfig: &str,
        release: &Release,
        global_config: &[ConfigEntry],
        components: &[KymaComponentConfig],
    ) -> Result<(), InstallationError> {
        let client = client_from_kubeconfig(kubeconfig).await?;

        self.apply_manifest(&client, &release.installer_yaml).await?;
        self.apply_overrides(&client, global_config, components)
            .await?;
        self.request_action(&client, release, components, "install")
            .await?;

        info!(version = %release.version, "Kyma upgrade triggered");
        Ok(())
    }

    async fn trigger_uninstall(&self, kubeconfig: &str) -> Result<(), InstallationError> {
        let client = client_from_kubeconfig(kubeconfig).await?;

        let patch = json!({ "metadata": { "labels": { "action": "uninstall" } } });
        self.installation_api(&client)
            .patch(INSTALLATION_NAME, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(api_error)?;

        info!("Kyma uninstallation triggered");
        Ok(())
    }

    async fn perform_cleanup(&self, kubeconfig: &str) -> Result<(), InstallationError> {
        let client = client_from_kubeconfig(kubeconfig).await?;
        cleanup::delete_service_instances(&client, cleanup::SERVICE_MANAGER_BROKER_PREFIX).await?;
        Ok(())
    }
}

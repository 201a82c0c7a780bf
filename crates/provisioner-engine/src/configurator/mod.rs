// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Runtime agent connection setup.
//!
//! The Compass runtime agent reads its connector URL and one-time token from
//! a ConfigMap and a Secret of the same name in its namespace. Both are
//! written; older agents only read the ConfigMap.

pub mod mock;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use provisioner_core::RUNTIME_AGENT_COMPONENT;
use provisioner_core::model::Cluster;
use tracing::{debug, info};

use crate::director::{DirectorClient, DirectorError, OneTimeToken};
use crate::kubeclient::{ClientError, client_from_kubeconfig};

/// Name of the agent ConfigMap and Secret.
pub const AGENT_CONFIGURATION_NAME: &str = "compass-agent-configuration";

const FIELD_MANAGER: &str = "kyma-provisioner";

#[derive(Debug, thiserror::Error)]
pub enum ConfiguratorError {
    #[error("failed to fetch connection token: {0}")]
    Token(#[from] DirectorError),
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error("failed to apply {kind} {namespace}/{name}: {details}")]
    Apply {
        kind: &'static str,
        namespace: String,
        name: String,
        details: String,
    },
}

/// Writes agent configuration objects into a cluster.
#[async_trait]
pub trait AgentConfigClient: Send + Sync {
    async fn apply_config_map(
        &self,
        namespace: &str,
        name: &str,
        data: &BTreeMap<String, String>,
    ) -> Result<(), ConfiguratorError>;

    async fn apply_secret(
        &self,
        namespace: &str,
        name: &str,
        data: &BTreeMap<String, String>,
    ) -> Result<(), ConfiguratorError>;
}

/// Builds [`AgentConfigClient`]s from raw kubeconfigs.
#[async_trait]
pub trait AgentConfigClientFactory: Send + Sync {
    async fn client(
        &self,
        kubeconfig: &str,
    ) -> Result<Box<dyn AgentConfigClient>, ConfiguratorError>;
}

/// Agent configuration for `cluster`.
pub fn agent_configuration(cluster: &Cluster, token: &OneTimeToken) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("CONNECTOR_URL".to_string(), token.connector_url.clone()),
        ("RUNTIME_ID".to_string(), cluster.id.clone()),
        ("TENANT".to_string(), cluster.tenant.clone()),
        ("TOKEN".to_string(), token.token.clone()),
    ])
}

/// Connects a provisioned runtime to the directory.
#[derive(Clone)]
pub struct RuntimeConfigurator {
    clients: Arc<dyn AgentConfigClientFactory>,
    director: Arc<dyn DirectorClient>,
}

impl RuntimeConfigurator {
    pub fn new(
        clients: Arc<dyn AgentConfigClientFactory>,
        director: Arc<dyn DirectorClient>,
    ) -> Self {
        Self { clients, director }
    }

    /// Push a fresh one-time token to the runtime agent.
    ///
    /// Clusters without the agent component are left untouched.
    pub async fn configure_runtime(
        &self,
        cluster: &Cluster,
        kubeconfig: &str,
    ) -> Result<(), ConfiguratorError> {
        let Some(agent) = cluster.component(RUNTIME_AGENT_COMPONENT) else {
            info!(runtime_id = %cluster.id, "Runtime agent not installed, skipping configuration");
            return Ok(());
        };

        let token = self
            .director
            .get_connection_token(&cluster.id, &cluster.tenant)
            .await?;
        let client = self.clients.client(kubeconfig).await?;

        let data = agent_configuration(cluster, &token);
        client
            .apply_config_map(&agent.namespace, AGENT_CONFIGURATION_NAME, &data)
            .await?;
        client
            .apply_secret(&agent.namespace, AGENT_CONFIGURATION_NAME, &data)
            .await?;

        info!(
            runtime_id = %cluster.id,
            namespace = %agent.namespace,
            "Runtime agent configured"
        );
        Ok(())
    }
}

/// [`AgentConfigClientFactory`] talking to the runtime's API server.
#[derive(Debug, Clone, Default)]
pub struct KubeAgentConfigClientFactory;

#[async_trait]
impl AgentConfigClientFactory for KubeAgentConfigClientFactory {
    async fn client(
        &self,
        kubeconfig: &str,
    ) -> Result<Box<dyn AgentConfigClient>, ConfiguratorError> {
        let client = client_from_kubeconfig(kubeconfig).await?;
        Ok(Box::new(KubeAgentConfigClient { client }))
    }
}

struct KubeAgentConfigClient {
    client: Client,
}

fn metadata(namespace: &str, name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        ..Default::default()
    }
}

fn apply_error(
    kind: &'static str,
    namespace: &str,
    name: &str,
) -> impl FnOnce(kube::Error) -> ConfiguratorError {
    let namespace = namespace.to_string();
    let name = name.to_string();
    move |e| ConfiguratorError::Apply {
        kind,
        namespace,
        name,
        details: e.to_string(),
    }
}

#[async_trait]
impl AgentConfigClient for KubeAgentConfigClient {
    async fn apply_config_map(
        &self,
        namespace: &str,
        name: &str,
        data: &BTreeMap<String, String>,
    ) -> Result<(), ConfiguratorError> {
        let config_map = ConfigMap {
            metadata: metadata(namespace, name),
            data: Some(data.clone()),
            ..Default::default()
        };

        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        api.patch(
            name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(&config_map),
        )
        .await
        .map_err(apply_error("ConfigMap", namespace, name))?;

        debug!(namespace = %namespace, name = %name, "ConfigMap applied");
        Ok(())
    }

    async fn apply_secret(
        &self,
        namespace: &str,
        name: &str,
        data: &BTreeMap<String, String>,
    ) -> Result<(), ConfiguratorError> {
        let secret = Secret {
            metadata: metadata(namespace, name),
            data: Some(
                data.iter()
                    .map(|(k, v)| (k.clone(), ByteString(v.clone().into_bytes())))
                    .collect(),
            ),
            ..Default::default()
        };

        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        api.patch(
            name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(&secret),
        )
        .await
        .map_err(apply_error("Secret", namespace, name))?;

        debug!(namespace = %namespace, name = %name, "Secret applied");
        Ok(())
    }
}

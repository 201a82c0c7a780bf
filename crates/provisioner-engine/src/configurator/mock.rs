// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Recording agent config clients for tests.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{AgentConfigClient, AgentConfigClientFactory, ConfiguratorError};
use crate::kubeclient::ClientError;

type Objects = Arc<Mutex<BTreeMap<(&'static str, String, String), BTreeMap<String, String>>>>;

/// Factory whose clients store applied objects in memory.
#[derive(Clone, Default)]
pub struct MockAgentConfigClientFactory {
    objects: Objects,
    kubeconfigs: Arc<Mutex<Vec<String>>>,
    /// Fail client construction.
    pub fail_client: bool,
    /// Fail every apply.
    pub fail_apply: bool,
}

impl MockAgentConfigClientFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> Option<BTreeMap<String, String>> {
        self.object("ConfigMap", namespace, name).await
    }

    pub async fn secret(&self, namespace: &str, name: &str) -> Option<BTreeMap<String, String>> {
        self.object("Secret", namespace, name).await
    }

    /// Kubeconfigs clients were built from, in call order.
    pub async fn kubeconfigs(&self) -> Vec<String> {
        self.kubeconfigs.lock().await.clone()
    }

    async fn object(
        &self,
        kind: &'static str,
        namespace: &str,
        name: &str,
    ) -> Option<BTreeMap<String, String>> {
        self.objects
            .lock()
            .await
            .get(&(kind, namespace.to_string(), name.to_string()))
            .cloned()
    }
}

#[async_trait]
impl AgentConfigClientFactory for MockAgentConfigClientFactory {
    async fn client(
        &self,
        kubeconfig: &str,
    ) -> Result<Box<dyn AgentConfigClient>, ConfiguratorError> {
        if self.fail_client {
            return Err(ClientError("invalid kubeconfig".to_string()).into());
        }
        self.kubeconfigs.lock().await.push(kubeconfig.to_string());

        Ok(Box::new(MockAgentConfigClient {
            objects: self.objects.clone(),
            fail_apply: self.fail_apply,
        }))
    }
}

struct MockAgentConfigClient {
    objects: Objects,
    fail_apply: bool,
}

impl MockAgentConfigClient {
    async fn store(
        &self,
        kind: &'static str,
        namespace: &str,
        name: &str,
        data: &BTreeMap<String, String>,
    ) -> Result<(), ConfiguratorError> {
        if self.fail_apply {
            return Err(ConfiguratorError::Apply {
                kind,
                namespace: namespace.to_string(),
                name: name.to_string(),
                details: "rejected".to_string(),
            });
        }
        self.objects
            .lock()
            .await
            .insert((kind, namespace.to_string(), name.to_string()), data.clone());
        Ok(())
    }
}

#[async_trait]
impl AgentConfigClient for MockAgentConfigClient {
    async fn apply_config_map(
        &self,
        namespace: &str,
        name: &str,
        data: &BTreeMap<String, String>,
    ) -> Result<(), ConfiguratorError> {
        self.store("ConfigMap", namespace, name, data).await
    }

    async fn apply_secret(
        &self,
        namespace: &str,
        name: &str,
        data: &BTreeMap<String, String>,
    ) -> Result<(), ConfiguratorError> {
        self.store("Secret", namespace, name, data).await
    }
}

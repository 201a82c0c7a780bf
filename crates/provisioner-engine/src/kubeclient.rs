// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Kubernetes clients built from raw kubeconfigs.

use std::path::Path;
use std::time::Duration;

use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const READ_TIMEOUT: Duration = Duration::from_secs(60);

/// Client construction failure.
#[derive(Debug, thiserror::Error)]
#[error("failed to create Kubernetes client: {0}")]
pub struct ClientError(pub String);

/// Client for the cluster described by `raw` kubeconfig YAML.
pub async fn client_from_kubeconfig(raw: &str) -> Result<Client, ClientError> {
    let kubeconfig =
        Kubeconfig::from_yaml(raw).map_err(|e| ClientError(format!("invalid kubeconfig: {}", e)))?;
    client_from(kubeconfig).await
}

/// Client for the kubeconfig file at `path`.
pub async fn client_from_path(path: &Path) -> Result<Client, ClientError> {
    let kubeconfig = Kubeconfig::read_from(path)
        .map_err(|e| ClientError(format!("failed to read kubeconfig {:?}: {}", path, e)))?;
    client_from(kubeconfig).await
}

async fn client_from(kubeconfig: Kubeconfig) -> Result<Client, ClientError> {
    let mut config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .map_err(|e| ClientError(format!("failed to load kubeconfig: {}", e)))?;
    config.connect_timeout = Some(CONNECT_TIMEOUT);
    config.read_timeout = Some(READ_TIMEOUT);

    Client::try_from(config).map_err(|e| ClientError(e.to_string()))
}

// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Kyma installation on provisioned clusters.

pub mod cleanup;
pub mod installer;
pub mod mock;

pub use installer::KubeInstallationService;

use std::fmt;

use async_trait::async_trait;
use provisioner_core::model::{ConfigEntry, KymaComponentConfig, Release};

use crate::kubeclient::ClientError;

/// Installer state as reported by the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallationStateKind {
    Installed,
    InProgress,
    Error,
    Uninstalling,
    Other(String),
}

impl InstallationStateKind {
    pub fn parse(s: &str) -> Self {
        match s {
            "Installed" => Self::Installed,
            "InProgress" => Self::InProgress,
            "Error" => Self::Error,
            "Uninstalling" => Self::Uninstalling,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for InstallationStateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Installed => f.write_str("Installed"),
            Self::InProgress => f.write_str("InProgress"),
            Self::Error => f.write_str("Error"),
            Self::Uninstalling => f.write_str("Uninstalling"),
            Self::Other(state) => f.write_str(state),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallationState {
    pub state: InstallationStateKind,
    pub description: String,
}

impl InstallationState {
    pub fn new(state: InstallationStateKind, description: impl Into<String>) -> Self {
        Self {
            state,
            description: description.into(),
        }
    }
}

/// Installation errors.
#[derive(Debug, thiserror::Error)]
pub enum InstallationError {
    #[error(transparent)]
    Client(#[from] ClientError),
    /// A release manifest could not be parsed.
    #[error("invalid manifest: {0}")]
    Manifest(String),
    /// The Kubernetes API rejected a request.
    #[error("kubernetes request failed: {0}")]
    Api(String),
}

/// Drives the Kyma installer on a cluster.
#[async_trait]
pub trait InstallationService: Send + Sync {
    /// Deploy the installer and request installation of `components`.
    async fn trigger_installation(
        &self,
        kubeconfig: &str,
        release: &Release,
        global_config: &[ConfigEntry],
        components: &[KymaComponentConfig],
    ) -> Result<(), InstallationError>;

    async fn check_installation_state(
        &self,
        kubeconfig: &str,
    ) -> Result<InstallationState, InstallationError>;

    /// Switch an installed cluster to `release`.
    async fn trigger_upgrade(
        &self,
        kubeconfig: &str,
        release: &Release,
        global_config: &[ConfigEntry],
        components: &[KymaComponentConfig],
    ) -> Result<(), InstallationError>;

    async fn trigger_uninstall(&self, kubeconfig: &str) -> Result<(), InstallationError>;

    /// Delete service catalog instances backed by the Service Manager.
    async fn perform_cleanup(&self, kubeconfig: &str) -> Result<(), InstallationError>;
}

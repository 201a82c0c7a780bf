// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Provisioner domain model.
//!
//! A [`Cluster`] owns its [`ClusterConfig`] and its active [`KymaConfig`].
//! An [`Operation`] references the cluster it acts on, and a
//! [`RuntimeUpgrade`] links an upgrade operation to the Kyma configuration
//! snapshots before and after the upgrade.

mod gardener;
mod kyma;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use gardener::{GardenerConfig, ProviderSpecificConfig, gardener_cluster_name};
pub use kyma::{ConfigEntry, KymaComponentConfig, KymaConfig, Release};

/// Kind of lifecycle action tracked by an [`Operation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationType {
    /// Cluster creation followed by Kyma installation.
    Provision,
    /// Kyma release upgrade on an existing cluster.
    Upgrade,
    /// Cluster teardown.
    Deprovision,
    /// Re-issue of runtime agent credentials.
    ReconnectRuntime,
}

impl OperationType {
    /// Returns the stored representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Provision => "PROVISION",
            Self::Upgrade => "UPGRADE",
            Self::Deprovision => "DEPROVISION",
            Self::ReconnectRuntime => "RECONNECT_RUNTIME",
        }
    }

    /// Parse the stored representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PROVISION" => Some(Self::Provision),
            "UPGRADE" => Some(Self::Upgrade),
            "DEPROVISION" => Some(Self::Deprovision),
            "RECONNECT_RUNTIME" => Some(Self::ReconnectRuntime),
            _ => None,
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of an [`Operation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationState {
    /// Still being driven by the queue.
    InProgress,
    /// Terminal success.
    Succeeded,
    /// Terminal failure; the message explains why.
    Failed,
}

impl OperationState {
    /// Returns the stored representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "IN_PROGRESS",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
        }
    }

    /// Parse the stored representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "IN_PROGRESS" => Some(Self::InProgress),
            "SUCCEEDED" => Some(Self::Succeeded),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Whether no further transitions can happen.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::InProgress)
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named step of an operation pipeline.
///
/// The current stage is persisted on every transition so that a restarted
/// process resumes where the previous one stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    /// Waiting for the cloud backend to report the cluster ready.
    WaitingForClusterCreation,
    /// Kyma installation is being triggered.
    StartingInstallation,
    /// Waiting for the Kyma installer to report a final state.
    WaitingForInstallation,
    /// Pushing connection credentials for the runtime agent.
    ConnectRuntimeAgent,
    /// Kyma upgrade is being triggered.
    StartingUpgrade,
    /// Recording the outcome of an upgrade.
    UpdatingUpgradeState,
    /// Waiting for the cloud backend to remove the cluster.
    WaitForClusterDeletion,
    /// Unregistering the runtime and removing its data.
    CleanupCluster,
    /// Terminal stage.
    Finished,
}

impl Stage {
    /// Every stage, in declaration order.
    pub const ALL: [Stage; 9] = [
        Stage::WaitingForClusterCreation,
        Stage::StartingInstallation,
        Stage::WaitingForInstallation,
        Stage::ConnectRuntimeAgent,
        Stage::StartingUpgrade,
        Stage::UpdatingUpgradeState,
        Stage::WaitForClusterDeletion,
        Stage::CleanupCluster,
        Stage::Finished,
    ];

    /// Returns the stored representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WaitingForClusterCreation => "WaitingForClusterCreation",
            Self::StartingInstallation => "StartingInstallation",
            Self::WaitingForInstallation => "WaitingForInstallation",
            Self::ConnectRuntimeAgent => "ConnectRuntimeAgent",
            Self::StartingUpgrade => "StartingUpgrade",
            Self::UpdatingUpgradeState => "UpdatingUpgradeState",
            Self::WaitForClusterDeletion => "WaitForClusterDeletion",
            Self::CleanupCluster => "CleanupCluster",
            Self::Finished => "Finished",
        }
    }

    /// Parse the stored representation.
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|stage| stage.as_str() == s)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tracked lifecycle action on a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub id: String,
    pub operation_type: OperationType,
    pub state: OperationState,
    pub stage: Stage,
    pub message: String,
    pub start_timestamp: DateTime<Utc>,
    pub end_timestamp: Option<DateTime<Utc>>,
    /// When the current stage was entered.
    pub last_transition: Option<DateTime<Utc>>,
    pub cluster_id: String,
}

impl Operation {
    /// New in-progress operation starting at `stage`.
    pub fn started(
        id: impl Into<String>,
        cluster_id: impl Into<String>,
        operation_type: OperationType,
        stage: Stage,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            operation_type,
            state: OperationState::InProgress,
            stage,
            message: message.into(),
            start_timestamp: now,
            end_timestamp: None,
            last_transition: Some(now),
            cluster_id: cluster_id.into(),
        }
    }

    /// Whether the operation reached a terminal state.
    pub fn is_finished(&self) -> bool {
        self.state.is_terminal()
    }
}

/// Plain GCP cluster specification, provisioned through Hydroform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GcpConfig {
    pub id: String,
    pub cluster_id: String,
    pub name: String,
    pub project_name: String,
    pub kubernetes_version: String,
    pub number_of_nodes: i64,
    pub boot_disk_size_gb: i64,
    pub machine_type: String,
    pub region: String,
    pub zone: Option<String>,
}

/// Provider specification of a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ClusterConfig {
    /// Shoot cluster managed by Gardener.
    Gardener(GardenerConfig),
    /// Plain GCP cluster managed by Hydroform.
    Gcp(GcpConfig),
}

impl ClusterConfig {
    /// Identifier of the config row.
    pub fn id(&self) -> &str {
        match self {
            ClusterConfig::Gardener(config) => &config.id,
            ClusterConfig::Gcp(config) => &config.id,
        }
    }

    /// Name of the cluster at the provider.
    pub fn cluster_name(&self) -> &str {
        match self {
            ClusterConfig::Gardener(config) => &config.name,
            ClusterConfig::Gcp(config) => &config.name,
        }
    }
}

/// Persisted record of a provisioned runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    /// Runtime identifier assigned by the directory.
    pub id: String,
    pub runtime_name: String,
    pub tenant: String,
    pub sub_account_id: Option<String>,
    pub credentials_secret_name: String,
    pub cluster_config: ClusterConfig,
    /// Currently active Kyma configuration.
    pub kyma_config: KymaConfig,
    pub kubeconfig: Option<String>,
    /// Opaque backend state needed for deprovisioning.
    pub internal_state: Option<Vec<u8>>,
    pub creation_timestamp: Option<DateTime<Utc>>,
    pub deleted: bool,
}

impl Cluster {
    /// Component config of `name`, if the active Kyma config installs it.
    pub fn component(&self, name: &str) -> Option<&KymaComponentConfig> {
        self.kyma_config
            .components
            .iter()
            .find(|component| component.component == name)
    }
}

/// State of a [`RuntimeUpgrade`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UpgradeState {
    InProgress,
    Succeeded,
    Failed,
    RolledBack,
}

impl UpgradeState {
    /// Returns the stored representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "IN_PROGRESS",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
            Self::RolledBack => "ROLLED_BACK",
        }
    }

    /// Parse the stored representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "IN_PROGRESS" => Some(Self::InProgress),
            "SUCCEEDED" => Some(Self::Succeeded),
            "FAILED" => Some(Self::Failed),
            "ROLLED_BACK" => Some(Self::RolledBack),
            _ => None,
        }
    }
}

/// Upgrade attempt linking an operation to Kyma config snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeUpgrade {
    pub id: String,
    pub state: UpgradeState,
    pub operation_id: String,
    pub pre_upgrade_kyma_config_id: String,
    pub post_upgrade_kyma_config_id: String,
}

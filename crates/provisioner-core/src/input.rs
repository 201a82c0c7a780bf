// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Request payloads accepted by the provisioning API.
//!
//! These mirror the external schema: optional sections are `Option`s so the
//! converter and validator can report which part is missing.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Request to provision a new runtime.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionRuntimeInput {
    pub runtime_input: Option<RuntimeInput>,
    pub cluster_config: Option<ClusterConfigInput>,
    pub credentials: Option<CredentialsInput>,
    pub kyma_config: Option<KymaConfigInput>,
}

/// Runtime registration data sent to the directory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeInput {
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, serde_json::Value>,
}

/// Cluster specification; exactly one provider section must be set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterConfigInput {
    pub gardener_config: Option<GardenerConfigInput>,
    pub gcp_config: Option<GcpConfigInput>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GardenerConfigInput {
    pub kubernetes_version: String,
    #[serde(rename = "volumeSizeGB")]
    pub volume_size_gb: i64,
    pub machine_type: String,
    pub region: String,
    pub provider: String,
    #[serde(default)]
    pub seed: String,
    pub target_secret: String,
    pub disk_type: String,
    pub worker_cidr: String,
    pub autoscaler_min: i64,
    pub autoscaler_max: i64,
    pub max_surge: i64,
    pub max_unavailable: i64,
    pub provider_specific_config: Option<ProviderSpecificInput>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSpecificInput {
    pub gcp_config: Option<GcpProviderConfigInput>,
    pub azure_config: Option<AzureProviderConfigInput>,
    pub aws_config: Option<AwsProviderConfigInput>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GcpProviderConfigInput {
    pub zone: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AzureProviderConfigInput {
    pub vnet_cidr: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AwsProviderConfigInput {
    pub zone: String,
    pub vpc_cidr: String,
    pub public_cidr: String,
    pub internal_cidr: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GcpConfigInput {
    pub name: String,
    pub project_name: String,
    pub kubernetes_version: String,
    pub number_of_nodes: i64,
    #[serde(rename = "bootDiskSizeGB")]
    pub boot_disk_size_gb: i64,
    pub machine_type: String,
    pub region: String,
    pub zone: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialsInput {
    pub secret_name: String,
}

/// Kyma release and component selection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KymaConfigInput {
    pub version: String,
    #[serde(default)]
    pub components: Vec<ComponentConfigurationInput>,
    #[serde(default)]
    pub configuration: Vec<ConfigEntryInput>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentConfigurationInput {
    pub component: String,
    pub namespace: String,
    pub source_url: Option<String>,
    #[serde(default)]
    pub configuration: Vec<ConfigEntryInput>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigEntryInput {
    pub key: String,
    pub value: String,
    pub secret: Option<bool>,
}

/// Request to upgrade Kyma on an existing runtime.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeRuntimeInput {
    pub kyma_config: Option<KymaConfigInput>,
}

// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Hydroform input built from a stored cluster config.

use std::collections::BTreeMap;

use provisioner_core::model::{ClusterConfig, GardenerConfig, ProviderSpecificConfig};
use serde::Serialize;
use serde_json::{Value, json};

/// Target platform of a Hydroform run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    Gcp,
    Gardener,
}

/// Cluster shape handed to Hydroform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HydroformCluster {
    pub name: String,
    pub kubernetes_version: String,
    pub node_count: i64,
    pub disk_size_gb: i64,
    pub machine_type: String,
    pub location: String,
}

/// Where and with which credentials Hydroform creates the cluster.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HydroformProvider {
    #[serde(rename = "type")]
    pub provider_type: ProviderType,
    pub project_name: String,
    /// Secret holding the cloud credentials.
    pub credentials_secret_name: String,
    /// Gardener only.
    pub custom_configurations: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HydroformConfiguration {
    pub cluster: HydroformCluster,
    pub provider: HydroformProvider,
}

/// Translate `config` into a Hydroform configuration.
pub fn build_configuration(
    config: &ClusterConfig,
    credentials_secret_name: &str,
) -> HydroformConfiguration {
    match config {
        ClusterConfig::Gcp(gcp) => HydroformConfiguration {
            cluster: HydroformCluster {
                name: gcp.name.clone(),
                kubernetes_version: gcp.kubernetes_version.clone(),
                node_count: gcp.number_of_nodes,
                disk_size_gb: gcp.boot_disk_size_gb,
                machine_type: gcp.machine_type.clone(),
                location: gcp.region.clone(),
            },
            provider: HydroformProvider {
                provider_type: ProviderType::Gcp,
                project_name: gcp.project_name.clone(),
                credentials_secret_name: credentials_secret_name.to_string(),
                custom_configurations: BTreeMap::new(),
            },
        },
        ClusterConfig::Gardener(gardener) => HydroformConfiguration {
            cluster: HydroformCluster {
                name: gardener.name.clone(),
                kubernetes_version: gardener.kubernetes_version.clone(),
                node_count: gardener.autoscaler_min,
                disk_size_gb: gardener.volume_size_gb,
                machine_type: gardener.machine_type.clone(),
                location: gardener.region.clone(),
            },
            provider: HydroformProvider {
                provider_type: ProviderType::Gardener,
                project_name: gardener.project_name.clone(),
                credentials_secret_name: credentials_secret_name.to_string(),
                custom_configurations: gardener_configurations(gardener),
            },
        },
    }
}

fn gardener_configurations(config: &GardenerConfig) -> BTreeMap<String, Value> {
    let mut custom: BTreeMap<String, Value> = [
        ("target_provider", json!(config.provider)),
        ("target_seed", json!(config.seed)),
        ("target_secret", json!(config.target_secret)),
        ("disk_type", json!(config.disk_type)),
        ("workercidr", json!(config.worker_cidr)),
        ("autoscaler_min", json!(config.autoscaler_min)),
        ("autoscaler_max", json!(config.autoscaler_max)),
        ("max_surge", json!(config.max_surge)),
        ("max_unavailable", json!(config.max_unavailable)),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect();

    match &config.provider_config {
        ProviderSpecificConfig::Gcp { zone } => {
            custom.insert("zone".to_string(), json!(zone));
        }
        ProviderSpecificConfig::Azure { vnet_cidr } => {
            custom.insert("vnetcidr".to_string(), json!(vnet_cidr));
        }
        ProviderSpecificConfig::Aws {
            zone,
            vpc_cidr,
            public_cidr,
            internal_cidr,
        } => {
            custom.insert("zone".to_string(), json!(zone));
            custom.insert("vpccidr".to_string(), json!(vpc_cidr));
            custom.insert("publicscidr".to_string(), json!(public_cidr));
            custom.insert("internalscidr".to_string(), json!(internal_cidr));
        }
    }
    custom
}

// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Gardener shoot specification and manifest rendering.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

const SHOOT_NODES_CIDR: &str = "10.250.0.0/19";
const WORKER_NAME: &str = "cpu-worker-0";

/// Shoot cluster specification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GardenerConfig {
    pub id: String,
    pub cluster_id: String,
    /// Shoot name, derived from provider and runtime ID.
    pub name: String,
    pub project_name: String,
    pub kubernetes_version: String,
    pub volume_size_gb: i64,
    pub machine_type: String,
    pub region: String,
    pub provider: String,
    pub seed: String,
    pub target_secret: String,
    pub disk_type: String,
    pub worker_cidr: String,
    pub autoscaler_min: i64,
    pub autoscaler_max: i64,
    pub max_surge: i64,
    pub max_unavailable: i64,
    pub provider_config: ProviderSpecificConfig,
}

/// Cloud specific part of a [`GardenerConfig`].
///
/// Stored as raw JSON. Variants are listed from the most to the least
/// specific so untagged decoding never picks a variant with fewer fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged, rename_all_fields = "camelCase")]
pub enum ProviderSpecificConfig {
    Aws {
        zone: String,
        vpc_cidr: String,
        public_cidr: String,
        internal_cidr: String,
    },
    Azure {
        vnet_cidr: String,
    },
    Gcp {
        zone: String,
    },
}

impl ProviderSpecificConfig {
    /// Raw JSON stored alongside the Gardener config.
    pub fn to_json(&self) -> String {
        // Plain string fields only; serialization cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Decode stored JSON, checking it against the provider discriminator.
    pub fn decode(provider: &str, raw: &str) -> Result<Self, String> {
        let config: ProviderSpecificConfig = serde_json::from_str(raw)
            .map_err(|e| format!("invalid provider config for {}: {}", provider, e))?;

        let expected = match provider.to_lowercase().as_str() {
            "gcp" => Some("gcp"),
            "azure" | "az" => Some("azure"),
            "aws" => Some("aws"),
            _ => None,
        };
        match expected {
            Some(kind) if kind != config.provider_type() => Err(format!(
                "provider config {} does not match provider {}",
                raw, provider
            )),
            _ => Ok(config),
        }
    }

    /// Gardener provider type.
    pub fn provider_type(&self) -> &'static str {
        match self {
            Self::Gcp { .. } => "gcp",
            Self::Azure { .. } => "azure",
            Self::Aws { .. } => "aws",
        }
    }

    /// Name of the Gardener cloud profile for the provider.
    pub fn cloud_profile(&self) -> &'static str {
        match self {
            Self::Gcp { .. } => "gcp",
            Self::Azure { .. } => "az",
            Self::Aws { .. } => "aws",
        }
    }

    fn zones(&self) -> Vec<String> {
        match self {
            Self::Gcp { zone } | Self::Aws { zone, .. } => vec![zone.clone()],
            Self::Azure { .. } => Vec::new(),
        }
    }

    fn infrastructure_config(&self, worker_cidr: &str) -> Value {
        match self {
            Self::Gcp { .. } => json!({
                "apiVersion": "gcp.provider.extensions.gardener.cloud/v1alpha1",
                "kind": "InfrastructureConfig",
                "networks": { "worker": worker_cidr },
            }),
            Self::Azure { vnet_cidr } => json!({
                "apiVersion": "azure.provider.extensions.gardener.cloud/v1alpha1",
                "kind": "InfrastructureConfig",
                "networks": {
                    "vnet": { "cidr": vnet_cidr },
                    "workers": worker_cidr,
                },
                "zoned": false,
            }),
            Self::Aws {
                zone,
                vpc_cidr,
                public_cidr,
                internal_cidr,
            } => json!({
                "apiVersion": "aws.provider.extensions.gardener.cloud/v1alpha1",
                "kind": "InfrastructureConfig",
                "networks": {
                    "vpc": { "cidr": vpc_cidr },
                    "zones": [{
                        "name": zone,
                        "internal": internal_cidr,
                        "public": public_cidr,
                        "workers": worker_cidr,
                    }],
                },
            }),
        }
    }

    fn control_plane_config(&self) -> Value {
        match self {
            Self::Gcp { zone } => json!({
                "apiVersion": "gcp.provider.extensions.gardener.cloud/v1alpha1",
                "kind": "ControlPlaneConfig",
                "zone": zone,
            }),
            Self::Azure { .. } => json!({
                "apiVersion": "azure.provider.extensions.gardener.cloud/v1alpha1",
                "kind": "ControlPlaneConfig",
            }),
            Self::Aws { .. } => json!({
                "apiVersion": "aws.provider.extensions.gardener.cloud/v1alpha1",
                "kind": "ControlPlaneConfig",
            }),
        }
    }
}

impl GardenerConfig {
    /// Render the `Shoot` manifest for the Gardener project namespace.
    pub fn to_shoot(&self, namespace: &str) -> Value {
        let provider = &self.provider_config;

        json!({
            "apiVersion": "core.gardener.cloud/v1beta1",
            "kind": "Shoot",
            "metadata": {
                "name": self.name,
                "namespace": namespace,
            },
            "spec": {
                "cloudProfileName": provider.cloud_profile(),
                "networking": {
                    "type": "calico",
                    "nodes": SHOOT_NODES_CIDR,
                },
                "seedName": self.seed,
                "secretBindingName": self.target_secret,
                "region": self.region,
                "provider": {
                    "type": provider.provider_type(),
                    "controlPlaneConfig": provider.control_plane_config(),
                    "infrastructureConfig": provider.infrastructure_config(&self.worker_cidr),
                    "workers": [{
                        "name": WORKER_NAME,
                        "machine": { "type": self.machine_type },
                        "volume": {
                            "type": self.disk_type,
                            "size": format!("{}Gi", self.volume_size_gb),
                        },
                        "minimum": self.autoscaler_min,
                        "maximum": self.autoscaler_max,
                        "maxSurge": self.max_surge,
                        "maxUnavailable": self.max_unavailable,
                        "zones": provider.zones(),
                    }],
                },
                "kubernetes": {
                    "allowPrivilegedContainers": true,
                    "version": self.kubernetes_version,
                    "kubeAPIServer": { "enableBasicAuthentication": false },
                },
                "maintenance": {},
            },
        })
    }
}

/// Shoot name for a runtime.
///
/// Gardener limits shoot names, so the name is built from the first three
/// letters of the provider and the first seven alphanumerics of the runtime
/// ID. A provider not starting with a letter is prefixed with `c`.
pub fn gardener_cluster_name(provider: &str, id: &str) -> String {
    let letters: String = provider
        .chars()
        .filter(|c| c.is_ascii_alphabetic() || *c == '-')
        .collect();
    let letters = if letters.starts_with(|c: char| c.is_ascii_alphabetic()) {
        letters
    } else {
        format!("c{}", letters)
    };
    let prefix: String = letters.chars().take(3).collect();
    let suffix: String = id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(7)
        .collect();

    format!("{}-{}", prefix, suffix).to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gardener_config(provider_config: ProviderSpecificConfig) -> GardenerConfig {
        GardenerConfig {
            id: "config-id".to_string(),
            cluster_id: "runtime-id".to_string(),
            name: "gcp-runtime".to_string(),
            project_name: "project".to_string(),
            kubernetes_version: "1.15".to_string(),
            volume_size_gb: 30,
            machine_type: "n1-standard-4".to_string(),
            region: "europe-west1".to_string(),
            provider: "gcp".to_string(),
            seed: "gcp-eu1".to_string(),
            target_secret: "gardener-secret".to_string(),
            disk_type: "pd-ssd".to_string(),
            worker_cidr: "10.250.0.0/19".to_string(),
            autoscaler_min: 1,
            autoscaler_max: 4,
            max_surge: 4,
            max_unavailable: 1,
            provider_config,
        }
    }

    #[test]
    fn test_cluster_name() {
        let cases = [
            ("gcp", "id", "gcp-id"),
            ("AZURE", "id", "azu-id"),
            ("-", "id", "c--id"),
            ("912740131aws---", "id", "aws-id"),
            ("gcp", "veryveryveryverylongid", "gcp-veryver"),
            ("aws", "a1b2-c3d4-e5f6", "aws-a1b2c3d"),
        ];

        for (provider, id, expected) in cases {
            assert_eq!(
                gardener_cluster_name(provider, id),
                expected,
                "provider {:?}, id {:?}",
                provider,
                id
            );
        }
    }

    #[test]
    fn test_provider_config_json() {
        let gcp = ProviderSpecificConfig::Gcp {
            zone: "zone".to_string(),
        };
        assert_eq!(gcp.to_json(), r#"{"zone":"zone"}"#);

        let azure = ProviderSpecificConfig::Azure {
            vnet_cidr: "10.10.11.11/255".to_string(),
        };
        assert_eq!(azure.to_json(), r#"{"vnetCidr":"10.10.11.11/255"}"#);

        let aws = ProviderSpecificConfig::Aws {
            zone: "zone".to_string(),
            vpc_cidr: "10.10.11.11/255".to_string(),
            public_cidr: "10.10.11.12/255".to_string(),
            internal_cidr: "10.10.11.13/255".to_string(),
        };
        assert_eq!(
            aws.to_json(),
            r#"{"zone":"zone","vpcCidr":"10.10.11.11/255","publicCidr":"10.10.11.12/255","internalCidr":"10.10.11.13/255"}"#
        );
        assert_eq!(ProviderSpecificConfig::decode("aws", &aws.to_json()), Ok(aws));
    }

    #[test]
    fn test_decode_rejects_mismatched_provider() {
        let result = ProviderSpecificConfig::decode("azure", r#"{"zone":"zone"}"#);
        assert!(result.is_err());

        let gcp = ProviderSpecificConfig::decode("GCP", r#"{"zone":"zone"}"#);
        assert_eq!(
            gcp,
            Ok(ProviderSpecificConfig::Gcp {
                zone: "zone".to_string()
            })
        );
    }

    #[test]
    fn test_gcp_shoot_manifest() {
        let config = gardener_config(ProviderSpecificConfig::Gcp {
            zone: "europe-west1-b".to_string(),
        });

        let shoot = config.to_shoot("garden-project");

        assert_eq!(shoot["metadata"]["name"], "gcp-runtime");
        assert_eq!(shoot["metadata"]["namespace"], "garden-project");
        assert_eq!(shoot["spec"]["cloudProfileName"], "gcp");
        assert_eq!(shoot["spec"]["networking"]["type"], "calico");
        assert_eq!(shoot["spec"]["networking"]["nodes"], "10.250.0.0/19");
        assert_eq!(shoot["spec"]["secretBindingName"], "gardener-secret");
        assert_eq!(shoot["spec"]["provider"]["type"], "gcp");
        assert_eq!(
            shoot["spec"]["provider"]["controlPlaneConfig"]["zone"],
            "europe-west1-b"
        );

        let worker = &shoot["spec"]["provider"]["workers"][0];
        assert_eq!(worker["name"], "cpu-worker-0");
        assert_eq!(worker["volume"]["size"], "30Gi");
        assert_eq!(worker["minimum"], 1);
        assert_eq!(worker["maximum"], 4);
        assert_eq!(worker["zones"][0], "europe-west1-b");
    }

    #[test]
    fn test_azure_shoot_uses_az_profile() {
        let mut config = gardener_config(ProviderSpecificConfig::Azure {
            vnet_cidr: "10.250.0.0/19".to_string(),
        });
        config.provider = "azure".to_string();

        let shoot = config.to_shoot("garden-project");

        assert_eq!(shoot["spec"]["cloudProfileName"], "az");
        assert_eq!(shoot["spec"]["provider"]["type"], "azure");
        assert_eq!(
            shoot["spec"]["provider"]["infrastructureConfig"]["networks"]["vnet"]["cidr"],
            "10.250.0.0/19"
        );
        assert!(
            shoot["spec"]["provider"]["workers"][0]["zones"]
                .as_array()
                .is_some_and(|zones| zones.is_empty())
        );
    }
}

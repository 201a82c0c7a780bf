// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Conversion between API payloads and the domain model.
//!
//! Conversion is deterministic given the ID generator and the release
//! providers: IDs are drawn in a fixed order (Kyma config, its components in
//! input order, then the cluster config).

use std::sync::Arc;

use crate::error::{ProvisioningError, Result};
use crate::id::IdGenerator;
use crate::input::{
    ClusterConfigInput, ConfigEntryInput, GardenerConfigInput, GcpConfigInput, KymaConfigInput,
    ProvisionRuntimeInput, ProviderSpecificInput,
};
use crate::model::{
    Cluster, ClusterConfig, ConfigEntry, GardenerConfig, GcpConfig, KymaComponentConfig,
    KymaConfig, Operation, ProviderSpecificConfig, gardener_cluster_name,
};
use crate::release::{ReleaseError, ReleaseProvider};
use crate::status::{OperationStatus, RuntimeConfiguration, RuntimeStatus};

/// Builds domain values from request payloads.
#[derive(Clone)]
pub struct InputConverter {
    id_generator: Arc<dyn IdGenerator>,
    releases: Arc<dyn ReleaseProvider>,
    gardener_project: String,
}

impl InputConverter {
    /// Create a converter. `gardener_project` is stored in every Gardener config.
    pub fn new(
        id_generator: Arc<dyn IdGenerator>,
        releases: Arc<dyn ReleaseProvider>,
        gardener_project: impl Into<String>,
    ) -> Self {
        Self {
            id_generator,
            releases,
            gardener_project: gardener_project.into(),
        }
    }

    /// Build the cluster record for a new runtime.
    pub async fn provisioning_input_to_cluster(
        &self,
        runtime_id: &str,
        input: &ProvisionRuntimeInput,
        tenant: &str,
        sub_account_id: Option<&str>,
    ) -> Result<Cluster> {
        let kyma_input = input
            .kyma_config
            .as_ref()
            .ok_or_else(|| ProvisioningError::bad_request("no Kyma config provided"))?;
        let kyma_config = self.kyma_config_from_input(runtime_id, kyma_input).await?;
        let cluster_config =
            self.provider_config_from_input(runtime_id, input.cluster_config.as_ref())?;

        Ok(Cluster {
            id: runtime_id.to_string(),
            runtime_name: input
                .runtime_input
                .as_ref()
                .map(|runtime| runtime.name.clone())
                .unwrap_or_default(),
            tenant: tenant.to_string(),
            sub_account_id: sub_account_id.map(str::to_string),
            credentials_secret_name: input
                .credentials
                .as_ref()
                .map(|credentials| credentials.secret_name.clone())
                .unwrap_or_default(),
            cluster_config,
            kyma_config,
            kubeconfig: None,
            internal_state: None,
            creation_timestamp: None,
            deleted: false,
        })
    }

    /// Resolve the release and build the Kyma config with fresh IDs.
    pub async fn kyma_config_from_input(
        &self,
        runtime_id: &str,
        input: &KymaConfigInput,
    ) -> Result<KymaConfig> {
        let release = self
            .releases
            .get_release_by_version(&input.version)
            .await?
            .ok_or_else(|| ReleaseError::NotFound(input.version.clone()))?;

        let kyma_config_id = self.id_generator.new_id();
        let components = input
            .components
            .iter()
            .zip(1i64..)
            .map(|(component, order)| KymaComponentConfig {
                id: self.id_generator.new_id(),
                component: component.component.clone(),
                namespace: component.namespace.clone(),
                source_url: component.source_url.clone(),
                configuration: config_entries(&component.configuration),
                component_order: order,
                kyma_config_id: kyma_config_id.clone(),
            })
            .collect();

        Ok(KymaConfig {
            id: kyma_config_id,
            release,
            components,
            global_configuration: config_entries(&input.configuration),
            cluster_id: runtime_id.to_string(),
        })
    }

    /// Build the provider config from whichever provider section is set.
    pub fn provider_config_from_input(
        &self,
        runtime_id: &str,
        input: Option<&ClusterConfigInput>,
    ) -> Result<ClusterConfig> {
        let input = input.ok_or_else(|| {
            ProvisioningError::bad_request("cluster config does not match any provider")
        })?;

        if let Some(gardener) = &input.gardener_config {
            return self.gardener_config(runtime_id, gardener);
        }
        if let Some(gcp) = &input.gcp_config {
            return Ok(self.gcp_config(runtime_id, gcp));
        }
        Err(ProvisioningError::bad_request(
            "cluster config does not match any provider",
        ))
    }

    fn gardener_config(
        &self,
        runtime_id: &str,
        input: &GardenerConfigInput,
    ) -> Result<ClusterConfig> {
        let provider_config = input
            .provider_specific_config
            .as_ref()
            .and_then(provider_specific_config)
            .ok_or_else(|| ProvisioningError::bad_request("provider config not specified"))?;

        let id = self.id_generator.new_id();
        let name = gardener_cluster_name(&input.provider, runtime_id);

        Ok(ClusterConfig::Gardener(GardenerConfig {
            id,
            cluster_id: runtime_id.to_string(),
            name,
            project_name: self.gardener_project.clone(),
            kubernetes_version: input.kubernetes_version.clone(),
            volume_size_gb: input.volume_size_gb,
            machine_type: input.machine_type.clone(),
            region: input.region.clone(),
            provider: input.provider.clone(),
            seed: input.seed.clone(),
            target_secret: input.target_secret.clone(),
            disk_type: input.disk_type.clone(),
            worker_cidr: input.worker_cidr.clone(),
            autoscaler_min: input.autoscaler_min,
            autoscaler_max: input.autoscaler_max,
            max_surge: input.max_surge,
            max_unavailable: input.max_unavailable,
            provider_config,
        }))
    }

    fn gcp_config(&self, runtime_id: &str, input: &GcpConfigInput) -> ClusterConfig {
        ClusterConfig::Gcp(GcpConfig {
            id: self.id_generator.new_id(),
            cluster_id: runtime_id.to_string(),
            name: input.name.clone(),
            project_name: input.project_name.clone(),
            kubernetes_version: input.kubernetes_version.clone(),
            number_of_nodes: input.number_of_nodes,
            boot_disk_size_gb: input.boot_disk_size_gb,
            machine_type: input.machine_type.clone(),
            region: input.region.clone(),
            zone: input.zone.clone(),
        })
    }

    /// Status payload of a single operation.
    pub fn operation_status(&self, operation: &Operation) -> OperationStatus {
        OperationStatus {
            id: operation.id.clone(),
            operation: operation.operation_type,
            state: operation.state,
            message: operation.message.clone(),
            runtime_id: operation.cluster_id.clone(),
        }
    }

    /// Status payload combining the last operation and the cluster snapshot.
    pub fn runtime_status(&self, last_operation: &Operation, cluster: &Cluster) -> RuntimeStatus {
        RuntimeStatus {
            last_operation_status: self.operation_status(last_operation),
            runtime_configuration: RuntimeConfiguration {
                cluster_config: cluster.cluster_config.clone(),
                kubeconfig: cluster.kubeconfig.clone(),
                kyma_config: cluster.kyma_config.clone(),
            },
        }
    }
}

fn provider_specific_config(input: &ProviderSpecificInput) -> Option<ProviderSpecificConfig> {
    if let Some(gcp) = &input.gcp_config {
        return Some(ProviderSpecificConfig::Gcp {
            zone: gcp.zone.clone(),
        });
    }
    if let Some(azure) = &input.azure_config {
        return Some(ProviderSpecificConfig::Azure {
            vnet_cidr: azure.vnet_cidr.clone(),
        });
    }
    input
        .aws_config
        .as_ref()
        .map(|aws| ProviderSpecificConfig::Aws {
            zone: aws.zone.clone(),
            vpc_cidr: aws.vpc_cidr.clone(),
            public_cidr: aws.public_cidr.clone(),
            internal_cidr: aws.internal_cidr.clone(),
        })
}

fn config_entries(input: &[ConfigEntryInput]) -> Vec<ConfigEntry> {
    input
        .iter()
        .map(|entry| ConfigEntry {
            key: entry.key.clone(),
            value: entry.value.clone(),
            secret: entry.secret.unwrap_or(false),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::id::SequenceIdGenerator;
    use crate::input::{
        AzureProviderConfigInput, ComponentConfigurationInput, CredentialsInput,
        GcpProviderConfigInput, RuntimeInput,
    };
    use crate::model::{OperationState, OperationType, Release, Stage};
    use crate::release::ReleaseResolver;
    use crate::testing::{release, timestamp};
    use async_trait::async_trait;

    struct KnownReleases(Vec<Release>);

    #[async_trait]
    impl ReleaseProvider for KnownReleases {
        async fn get_release_by_version(
            &self,
            version: &str,
        ) -> std::result::Result<Option<Release>, ReleaseError> {
            Ok(self.0.iter().find(|r| r.version == version).cloned())
        }
    }

    fn converter(ids: &[&str]) -> InputConverter {
        let releases = ReleaseResolver::new(vec![Arc::new(KnownReleases(vec![release()]))]);
        InputConverter::new(
            Arc::new(SequenceIdGenerator::new(ids.iter().copied())),
            Arc::new(releases),
            "gardener-project",
        )
    }

    fn gardener_input(provider_specific: Option<ProviderSpecificInput>) -> GardenerConfigInput {
        GardenerConfigInput {
            kubernetes_version: "1.15".to_string(),
            volume_size_gb: 30,
            machine_type: "n1-standard-4".to_string(),
            region: "europe-west1".to_string(),
            provider: "gcp".to_string(),
            seed: "gcp-eu1".to_string(),
            target_secret: "secret".to_string(),
            disk_type: "pd-ssd".to_string(),
            worker_cidr: "10.250.0.0/19".to_string(),
            autoscaler_min: 1,
            autoscaler_max: 4,
            max_surge: 4,
            max_unavailable: 1,
            provider_specific_config: provider_specific,
        }
    }

    fn provision_input() -> ProvisionRuntimeInput {
        ProvisionRuntimeInput {
            runtime_input: Some(RuntimeInput {
                name: "test runtime 1".to_string(),
                ..Default::default()
            }),
            cluster_config: Some(ClusterConfigInput {
                gardener_config: Some(gardener_input(Some(ProviderSpecificInput {
                    gcp_config: Some(GcpProviderConfigInput {
                        zone: "europe-west1-b".to_string(),
                    }),
                    ..Default::default()
                }))),
                gcp_config: None,
            }),
            credentials: Some(CredentialsInput {
                secret_name: "credentials".to_string(),
            }),
            kyma_config: Some(KymaConfigInput {
                version: "1.8".to_string(),
                components: vec![
                    ComponentConfigurationInput {
                        component: "core".to_string(),
                        namespace: "kyma-system".to_string(),
                        source_url: None,
                        configuration: vec![ConfigEntryInput {
                            key: "a".to_string(),
                            value: "b".to_string(),
                            secret: None,
                        }],
                    },
                    ComponentConfigurationInput {
                        component: "compass-runtime-agent".to_string(),
                        namespace: "compass-system".to_string(),
                        source_url: None,
                        configuration: vec![ConfigEntryInput {
                            key: "token".to_string(),
                            value: "x".to_string(),
                            secret: Some(true),
                        }],
                    },
                ],
                configuration: vec![],
            }),
        }
    }

    #[tokio::test]
    async fn test_provisioning_input_to_cluster() {
        let converter = converter(&["kyma-config", "component-1", "component-2", "gardener"]);

        let cluster = converter
            .provisioning_input_to_cluster("runtime-1", &provision_input(), "tenant", Some("sa"))
            .await
            .unwrap();

        assert_eq!(cluster.runtime_name, "test runtime 1");
        assert_eq!(cluster.credentials_secret_name, "credentials");
        assert_eq!(cluster.sub_account_id.as_deref(), Some("sa"));
        assert_eq!(cluster.kyma_config.id, "kyma-config");
        assert_eq!(cluster.kyma_config.release.id, "release-1");

        let ids: Vec<_> = cluster.kyma_config.components.iter().map(|c| &c.id).collect();
        assert_eq!(ids, ["component-1", "component-2"]);
        assert_eq!(cluster.kyma_config.components[1].component_order, 2);
        assert!(!cluster.kyma_config.components[0].configuration[0].secret);
        assert!(cluster.kyma_config.components[1].configuration[0].secret);

        match &cluster.cluster_config {
            ClusterConfig::Gardener(config) => {
                assert_eq!(config.id, "gardener");
                assert_eq!(config.name, "gcp-runtime");
                assert_eq!(config.project_name, "gardener-project");
                assert_eq!(
                    config.provider_config,
                    ProviderSpecificConfig::Gcp {
                        zone: "europe-west1-b".to_string()
                    }
                );
            }
            other => panic!("unexpected config {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_conversion_is_deterministic() {
        let ids = ["kyma-config", "component-1", "component-2", "gardener"];
        let input = provision_input();

        let first = converter(&ids)
            .provisioning_input_to_cluster("runtime-1", &input, "tenant", None)
            .await
            .unwrap();
        let second = converter(&ids)
            .provisioning_input_to_cluster("runtime-1", &input, "tenant", None)
            .await
            .unwrap();

        assert_eq!(
            serde_json::to_vec(&first).unwrap(),
            serde_json::to_vec(&second).unwrap()
        );
    }

    #[tokio::test]
    async fn test_unknown_release_is_not_found() {
        let converter = converter(&[]);
        let input = KymaConfigInput {
            version: "0.1".to_string(),
            ..Default::default()
        };

        let err = converter
            .kyma_config_from_input("runtime-1", &input)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let on_demand = KymaConfigInput {
            version: "PR-42".to_string(),
            ..Default::default()
        };
        let err = converter
            .kyma_config_from_input("runtime-1", &on_demand)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_provider_dispatch_errors() {
        let converter = converter(&[]);

        let err = converter
            .provider_config_from_input("runtime-1", Some(&ClusterConfigInput::default()))
            .unwrap_err();
        assert!(err.message().contains("does not match any provider"));
        assert_eq!(err.kind(), ErrorKind::BadRequest);

        let no_specific = ClusterConfigInput {
            gardener_config: Some(gardener_input(None)),
            gcp_config: None,
        };
        let err = converter
            .provider_config_from_input("runtime-1", Some(&no_specific))
            .unwrap_err();
        assert!(err.message().contains("provider config not specified"));

        let empty_specific = ClusterConfigInput {
            gardener_config: Some(gardener_input(Some(ProviderSpecificInput::default()))),
            gcp_config: None,
        };
        let err = converter
            .provider_config_from_input("runtime-1", Some(&empty_specific))
            .unwrap_err();
        assert!(err.message().contains("provider config not specified"));
    }

    #[test]
    fn test_azure_and_plain_gcp_configs() {
        let converter = converter(&["azure-config", "gcp-config"]);

        let mut azure = gardener_input(Some(ProviderSpecificInput {
            azure_config: Some(AzureProviderConfigInput {
                vnet_cidr: "10.250.0.0/16".to_string(),
            }),
            ..Default::default()
        }));
        azure.provider = "azure".to_string();
        let config = converter
            .provider_config_from_input(
                "abcdefghij",
                Some(&ClusterConfigInput {
                    gardener_config: Some(azure),
                    gcp_config: None,
                }),
            )
            .unwrap();
        assert_eq!(config.id(), "azure-config");
        assert_eq!(config.cluster_name(), "azu-abcdefg");

        let config = converter
            .provider_config_from_input(
                "runtime-1",
                Some(&ClusterConfigInput {
                    gardener_config: None,
                    gcp_config: Some(GcpConfigInput {
                        name: "plain".to_string(),
                        number_of_nodes: 3,
                        ..Default::default()
                    }),
                }),
            )
            .unwrap();
        assert!(matches!(
            config,
            ClusterConfig::Gcp(ref gcp) if gcp.id == "gcp-config" && gcp.number_of_nodes == 3
        ));
    }

    #[test]
    fn test_operation_status() {
        let converter = converter(&[]);
        let op = Operation::started(
            "op-1",
            "runtime-1",
            OperationType::Provision,
            Stage::WaitingForClusterCreation,
            "Provisioning started",
            timestamp(0),
        );

        let status = converter.operation_status(&op);

        assert_eq!(status.id, "op-1");
        assert_eq!(status.operation, OperationType::Provision);
        assert_eq!(status.state, OperationState::InProgress);
        assert_eq!(status.runtime_id, "runtime-1");
    }
}

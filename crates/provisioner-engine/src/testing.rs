// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Fixtures shared by unit tests.

use provisioner_core::input::{
    ClusterConfigInput, ComponentConfigurationInput, ConfigEntryInput, CredentialsInput,
    GardenerConfigInput, GcpProviderConfigInput, KymaConfigInput, ProviderSpecificInput,
    ProvisionRuntimeInput, RuntimeInput,
};
use provisioner_core::model::{
    Cluster, ClusterConfig, ConfigEntry, GardenerConfig, GcpConfig, KymaComponentConfig,
    KymaConfig, ProviderSpecificConfig, Release,
};
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;

/// In-memory database with migrations and release `1.8` registered.
pub(crate) async fn test_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    provisioner_core::migrations::run(&pool).await.unwrap();

    sqlx::query(
        "INSERT INTO kyma_release (id, version, tiller_yaml, installer_yaml) \
         VALUES ('release-1', '1.8', 'tiller', 'installer')",
    )
    .execute(&pool)
    .await
    .unwrap();

    pool
}

pub(crate) fn release() -> Release {
    Release {
        id: "release-1".to_string(),
        version: "1.8".to_string(),
        tiller_yaml: "tiller".to_string(),
        installer_yaml: "installer".to_string(),
    }
}

pub(crate) fn kyma_config(id: &str, runtime_id: &str, with_agent: bool) -> KymaConfig {
    let mut components = vec![KymaComponentConfig {
        id: format!("{}-core", id),
        component: "core".to_string(),
        namespace: "kyma-system".to_string(),
        source_url: None,
        configuration: vec![],
        component_order: 1,
        kyma_config_id: id.to_string(),
    }];
    if with_agent {
        components.push(KymaComponentConfig {
            id: format!("{}-agent", id),
            component: "compass-runtime-agent".to_string(),
            namespace: "compass-system".to_string(),
            source_url: None,
            configuration: vec![],
            component_order: 2,
            kyma_config_id: id.to_string(),
        });
    }

    KymaConfig {
        id: id.to_string(),
        release: release(),
        components,
        global_configuration: vec![ConfigEntry::new("global.domain", "kyma.local")],
        cluster_id: runtime_id.to_string(),
    }
}

pub(crate) fn gardener_cluster(runtime_id: &str) -> Cluster {
    Cluster {
        id: runtime_id.to_string(),
        runtime_name: "test runtime 1".to_string(),
        tenant: "tenant".to_string(),
        sub_account_id: None,
        credentials_secret_name: "credentials".to_string(),
        cluster_config: ClusterConfig::Gardener(GardenerConfig {
            id: format!("{}-gardener", runtime_id),
            cluster_id: runtime_id.to_string(),
            name: "gcp-runtime".to_string(),
            project_name: "frog".to_string(),
            kubernetes_version: "1.15".to_string(),
            volume_size_gb: 30,
            machine_type: "n1-standard-4".to_string(),
            region: "europe-west4".to_string(),
            provider: "gcp".to_string(),
            seed: "gcp-eu1".to_string(),
            target_secret: "secret".to_string(),
            disk_type: "pd-standard".to_string(),
            worker_cidr: "10.250.0.0/19".to_string(),
            autoscaler_min: 1,
            autoscaler_max: 3,
            max_surge: 1,
            max_unavailable: 1,
            provider_config: ProviderSpecificConfig::Gcp {
                zone: "europe-west4-a".to_string(),
            },
        }),
        kyma_config: kyma_config(&format!("{}-kyma", runtime_id), runtime_id, true),
        kubeconfig: None,
        internal_state: None,
        creation_timestamp: None,
        deleted: false,
    }
}

pub(crate) fn gcp_cluster(runtime_id: &str) -> Cluster {
    Cluster {
        cluster_config: ClusterConfig::Gcp(GcpConfig {
            id: format!("{}-gcp", runtime_id),
            cluster_id: runtime_id.to_string(),
            name: "gcp-cluster".to_string(),
            project_name: "project".to_string(),
            kubernetes_version: "1.15".to_string(),
            number_of_nodes: 3,
            boot_disk_size_gb: 30,
            machine_type: "n1-standard-4".to_string(),
            region: "europe-west4".to_string(),
            zone: Some("europe-west4-a".to_string()),
        }),
        ..gardener_cluster(runtime_id)
    }
}

pub(crate) fn kyma_input(version: &str) -> KymaConfigInput {
    KymaConfigInput {
        version: version.to_string(),
        components: vec![
            ComponentConfigurationInput {
                component: "core".to_string(),
                namespace: "kyma-system".to_string(),
                ..Default::default()
            },
            ComponentConfigurationInput {
                component: "compass-runtime-agent".to_string(),
                namespace: "compass-system".to_string(),
                ..Default::default()
            },
        ],
        configuration: vec![ConfigEntryInput {
            key: "global.domain".to_string(),
            value: "kyma.local".to_string(),
            secret: None,
        }],
    }
}

/// Gardener runtime on GCP with the runtime agent installed.
pub(crate) fn provision_input() -> ProvisionRuntimeInput {
    ProvisionRuntimeInput {
        runtime_input: Some(RuntimeInput {
            name: "test runtime 1".to_string(),
            ..Default::default()
        }),
        cluster_config: Some(ClusterConfigInput {
            gardener_config: Some(GardenerConfigInput {
                kubernetes_version: "1.15".to_string(),
                volume_size_gb: 30,
                machine_type: "n1-standard-4".to_string(),
                region: "europe-west4".to_string(),
                provider: "gcp".to_string(),
                seed: "gcp-eu1".to_string(),
                target_secret: "secret".to_string(),
                disk_type: "pd-standard".to_string(),
                worker_cidr: "10.250.0.0/19".to_string(),
                autoscaler_min: 1,
                autoscaler_max: 3,
                max_surge: 1,
                max_unavailable: 1,
                provider_specific_config: Some(ProviderSpecificInput {
                    gcp_config: Some(GcpProviderConfigInput {
                        zone: "europe-west4-a".to_string(),
                    }),
                    ..Default::default()
                }),
            }),
            gcp_config: None,
        }),
        credentials: Some(CredentialsInput {
            secret_name: "credentials".to_string(),
        }),
        kyma_config: Some(kyma_input("1.8")),
    }
}

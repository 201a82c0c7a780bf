// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared fixtures for unit tests.

use chrono::{DateTime, TimeZone, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;

use crate::migrations;
use crate::model::{
    Cluster, ClusterConfig, ConfigEntry, GardenerConfig, KymaComponentConfig, KymaConfig,
    ProviderSpecificConfig, Release,
};

/// Migrated in-memory database with release `1.8` registered as `release-1`.
pub(crate) async fn test_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    migrations::run(&pool).await.unwrap();

    sqlx::query(
        "INSERT INTO kyma_release (id, version, tiller_yaml, installer_yaml) VALUES ('release-1', '1.8', 'tiller', 'installer')",
    )
    .execute(&pool)
    .await
    .unwrap();

    pool
}

pub(crate) fn timestamp(minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 12, minute, 0).unwrap()
}

pub(crate) fn release() -> Release {
    Release {
        id: "release-1".to_string(),
        version: "1.8".to_string(),
        tiller_yaml: "tiller".to_string(),
        installer_yaml: "installer".to_string(),
    }
}

pub(crate) fn kyma_config(id: &str, runtime_id: &str) -> KymaConfig {
    KymaConfig {
        id: id.to_string(),
        release: release(),
        components: vec![
            KymaComponentConfig {
                id: format!("{}-core", id),
                component: "core".to_string(),
                namespace: "kyma-system".to_string(),
                source_url: None,
                configuration: vec![ConfigEntry::new("a", "b")],
                component_order: 1,
                kyma_config_id: id.to_string(),
            },
            KymaComponentConfig {
                id: format!("{}-agent", id),
                component: "compass-runtime-agent".to_string(),
                namespace: "compass-system".to_string(),
                source_url: Some("https://example.com/agent".to_string()),
                configuration: vec![ConfigEntry {
                    key: "token".to_string(),
                    value: "secret".to_string(),
                    secret: true,
                }],
                component_order: 2,
                kyma_config_id: id.to_string(),
            },
        ],
        global_configuration: vec![ConfigEntry::new("global.domain", "kyma.local")],
        cluster_id: runtime_id.to_string(),
    }
}

pub(crate) fn gardener_cluster(runtime_id: &str) -> Cluster {
    Cluster {
        id: runtime_id.to_string(),
        runtime_name: "test runtime 1".to_string(),
        tenant: "tenant".to_string(),
        sub_account_id: Some("sub-account".to_string()),
        credentials_secret_name: "credentials".to_string(),
        cluster_config: ClusterConfig::Gardener(GardenerConfig {
            id: "gardener-config".to_string(),
            cluster_id: runtime_id.to_string(),
            name: "gcp-runtime".to_string(),
            project_name: "project".to_string(),
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
            provider_config: ProviderSpecificConfig::Gcp {
                zone: "europe-west1-b".to_string(),
            },
        }),
        kyma_config: kyma_config("kyma-config-1", runtime_id),
        kubeconfig: None,
        internal_state: None,
        creation_timestamp: Some(timestamp(0)),
        deleted: false,
    }
}

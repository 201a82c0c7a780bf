// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for provisioner scenario tests.
//!
//! Provides TestContext: an in-memory database and a started runtime whose
//! collaborators are mocks. The queue has no workers; tests advance it with
//! `drive_until_idle`.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use provisioner_core::input::{
    ClusterConfigInput, ComponentConfigurationInput, ConfigEntryInput, CredentialsInput,
    GardenerConfigInput, GcpProviderConfigInput, KymaConfigInput, ProviderSpecificInput,
    ProvisionRuntimeInput, RuntimeInput, UpgradeRuntimeInput,
};
use provisioner_core::model::Release;
use provisioner_core::{
    Persistence, ReleaseRepository, SqlitePersistence, SqliteReleaseRepository,
};
use provisioner_engine::configurator::mock::MockAgentConfigClientFactory;
use provisioner_engine::director::mock::MockDirector;
use provisioner_engine::installation::mock::MockInstallationService;
use provisioner_engine::provisioner::mock::{MockProvisioner, MockShootClient};
use provisioner_engine::provisioner::{GardenerProvisioner, Provisioner};
use provisioner_engine::{
    ProvisionerRuntime, ProvisioningService, QueueConfig, RetryPolicy,
};
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;

pub const TENANT: &str = "tenant";

/// Collaborator mocks. Flags must be set before the context is created.
#[derive(Clone, Default)]
pub struct Mocks {
    pub director: MockDirector,
    pub provisioner: MockProvisioner,
    pub installation: MockInstallationService,
    pub agent_configs: MockAgentConfigClientFactory,
    /// When set, clusters are Gardener shoots in this project instead of
    /// `provisioner` clusters.
    pub shoots: Option<MockShootClient>,
}

/// Runtime over an in-memory database.
pub struct TestContext {
    pub pool: SqlitePool,
    pub persistence: Arc<SqlitePersistence>,
    pub mocks: Mocks,
    pub runtime: ProvisionerRuntime,
}

impl TestContext {
    pub async fn new() -> Self {
        Self::with_mocks(Mocks::default()).await
    }

    pub async fn with_mocks(mocks: Mocks) -> Self {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to open in-memory database");
        provisioner_core::migrations::run(&pool)
            .await
            .expect("Failed to run migrations");

        SqliteReleaseRepository::new(pool.clone())
            .save_release(&Release {
                id: "release-1".to_string(),
                version: "1.8".to_string(),
                tiller_yaml: "tiller".to_string(),
                installer_yaml: "installer".to_string(),
            })
            .await
            .expect("Failed to register release");

        let persistence = Arc::new(SqlitePersistence::new(pool.clone()));
        let runtime = start_runtime(&pool, persistence.clone(), &mocks).await;

        Self {
            pool,
            persistence,
            mocks,
            runtime,
        }
    }

    pub fn service(&self) -> &ProvisioningService {
        self.runtime.service()
    }

    /// Process queued operations until nothing is pending.
    pub async fn drive(&self) -> usize {
        self.runtime.queue().drive_until_idle().await
    }

    /// Replace the runtime with a fresh one over the same database, as after
    /// a process restart.
    pub async fn restart(self) -> Self {
        let Self {
            pool,
            persistence,
            mocks,
            runtime,
        } = self;
        runtime.shutdown().await;

        let runtime = start_runtime(&pool, persistence.clone(), &mocks).await;
        Self {
            pool,
            persistence,
            mocks,
            runtime,
        }
    }

    /// Provision a runtime and run the operation to completion.
    pub async fn provisioned_runtime(&self) -> String {
        let status = self
            .service()
            .provision_runtime(&provision_input(), TENANT, None)
            .await
            .expect("Failed to start provisioning");
        self.drive().await;

        let last = self
            .persistence
            .get_last_operation(&status.runtime_id)
            .await
            .expect("Failed to load last operation");
        assert!(last.is_finished(), "provisioning did not finish: {:?}", last);
        status.runtime_id
    }
}

async fn start_runtime(
    pool: &SqlitePool,
    persistence: Arc<SqlitePersistence>,
    mocks: &Mocks,
) -> ProvisionerRuntime {
    ProvisionerRuntime::builder()
        .persistence(persistence)
        .releases(Arc::new(SqliteReleaseRepository::new(pool.clone())))
        .director(Arc::new(mocks.director.clone()))
        .provisioner(provisioner(mocks))
        .installation(Arc::new(mocks.installation.clone()))
        .agent_configs(Arc::new(mocks.agent_configs.clone()))
        .gardener_project("frog")
        .queue_config(QueueConfig {
            workers: 0,
            retry_delay: Duration::from_secs(5),
        })
        .status_retry(RetryPolicy {
            attempts: 1,
            interval: Duration::ZERO,
        })
        .build()
        .expect("Failed to build runtime")
        .start()
        .await
        .expect("Failed to start runtime")
}

fn provisioner(mocks: &Mocks) -> Arc<dyn Provisioner> {
    match &mocks.shoots {
        Some(shoots) => Arc::new(GardenerProvisioner::new(
            Arc::new(shoots.clone()),
            Arc::new(mocks.installation.clone()),
            "frog",
        )),
        None => Arc::new(mocks.provisioner.clone()),
    }
}

pub fn kyma_input(version: &str) -> KymaConfigInput {
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
                configuration: vec![ConfigEntryInput {
                    key: "agent.log.level".to_string(),
                    value: "debug".to_string(),
                    secret: None,
                }],
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

pub fn upgrade_input(version: &str) -> UpgradeRuntimeInput {
    UpgradeRuntimeInput {
        kyma_config: Some(kyma_input(version)),
    }
}

pub fn provision_input() -> ProvisionRuntimeInput {
    ProvisionRuntimeInput {
        runtime_input: Some(RuntimeInput {
            name: "test runtime".to_string(),
            description: Some("scenario runtime".to_string()),
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

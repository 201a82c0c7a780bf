// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Provisioner worker process.
//!
//! Resumes operations left in progress, then keeps processing the operation
//! queue until Ctrl-C. Requests reach the [`ProvisioningService`] of an
//! embedding application; this process only carries persisted work forward.
//!
//! [`ProvisioningService`]: provisioner_engine::ProvisioningService

use std::str::FromStr;
use std::sync::Arc;

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tracing::{error, info};

use provisioner_core::release::ReleaseProvider;
use provisioner_core::{
    IdGenerator, ReleaseResolver, SqlitePersistence, SqliteReleaseRepository, UuidGenerator,
};
use provisioner_engine::configurator::KubeAgentConfigClientFactory;
use provisioner_engine::director::{GraphQlDirectorClient, OAuthClient, StaticToken, TokenSource};
use provisioner_engine::installation::KubeInstallationService;
use provisioner_engine::kubeclient::client_from_path;
use provisioner_engine::provisioner::{GardenerProvisioner, KubeShootClient, ProvisionerRouter};
use provisioner_engine::{Config, DirectorAuth, OnDemandReleases, ProvisionerRuntime};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (from crate directory or parent directories)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("provisioner_engine=info".parse()?),
        )
        .init();

    info!("Starting Provisioner");

    let config = Config::from_env().map_err(|e| {
        error!("Configuration error: {}", e);
        e
    })?;

    info!(
        director_url = %config.director_url,
        gardener_project = %config.gardener_project,
        workers = config.queue.workers,
        "Configuration loaded"
    );

    info!("Connecting to database...");
    let options = SqliteConnectOptions::from_str(&config.database_url)?.create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    info!("Running database migrations...");
    provisioner_core::migrations::run(&pool).await?;
    info!("Migrations completed");

    let ids: Arc<dyn IdGenerator> = Arc::new(UuidGenerator);
    let repository = Arc::new(SqliteReleaseRepository::new(pool.clone()));
    let on_demand = OnDemandReleases::new(
        config.on_demand_artifacts_url.clone(),
        repository.clone(),
        ids.clone(),
    );
    let providers: Vec<Arc<dyn ReleaseProvider>> = vec![repository, Arc::new(on_demand)];

    let tokens: Arc<dyn TokenSource> = match &config.director_auth {
        DirectorAuth::Static(token) => Arc::new(StaticToken::new(token.clone())),
        DirectorAuth::OAuth {
            token_url,
            client_id,
            client_secret,
            scope,
        } => Arc::new(OAuthClient::new(
            token_url.clone(),
            client_id.clone(),
            client_secret.clone(),
            scope.clone(),
        )),
    };
    let director = Arc::new(GraphQlDirectorClient::new(config.director_url.clone(), tokens));

    let gardener = client_from_path(&config.gardener_kubeconfig_path).await?;
    let installation = Arc::new(KubeInstallationService::new());
    // GCP clusters need a HydroformClient, which this binary does not ship.
    let provisioner = ProvisionerRouter::new().with_gardener(Arc::new(GardenerProvisioner::new(
        Arc::new(KubeShootClient::new(gardener, &config.gardener_project)),
        installation.clone(),
        &config.gardener_project,
    )));

    let runtime = ProvisionerRuntime::builder()
        .persistence(Arc::new(SqlitePersistence::new(pool.clone())))
        .releases(Arc::new(ReleaseResolver::new(providers)))
        .director(director)
        .provisioner(Arc::new(provisioner))
        .installation(installation)
        .agent_configs(Arc::new(KubeAgentConfigClientFactory))
        .ids(ids)
        .gardener_project(config.gardener_project.clone())
        .queue_config(config.queue.clone())
        .timeouts(config.timeouts.clone())
        .status_retry(config.status_retry)
        .build()?
        .start()
        .await?;

    info!("Provisioner initialized successfully");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    runtime.shutdown().await;
    pool.close().await;
    info!("Shutdown complete");

    Ok(())
}

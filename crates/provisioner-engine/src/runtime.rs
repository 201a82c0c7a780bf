// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable provisioner runtime.
//!
//! [`ProvisionerRuntime`] wires the collaborators into pipelines, an executor
//! and the operation queue, resumes operations left in progress by a previous
//! process and runs the queue workers in the background.
//!
//! # Example
//!
//! ```rust,ignore
//! let runtime = ProvisionerRuntime::builder()
//!     .persistence(persistence)
//!     .releases(releases)
//!     .director(director)
//!     .provisioner(provisioner)
//!     .installation(Arc::new(KubeInstallationService::new()))
//!     .agent_configs(Arc::new(KubeAgentConfigClientFactory))
//!     .gardener_project("frog")
//!     .build()?
//!     .start()
//!     .await?;
//!
//! let status = runtime.service().provision_runtime(&input, "tenant", None).await?;
//!
//! runtime.shutdown().await;
//! ```

use std::sync::Arc;

use provisioner_core::release::ReleaseProvider;
use provisioner_core::{IdGenerator, InputConverter, Persistence, UuidGenerator};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::configurator::{AgentConfigClientFactory, RuntimeConfigurator};
use crate::director::DirectorClient;
use crate::error::{Error, Result};
use crate::installation::InstallationService;
use crate::operations::{
    OperationQueue, Pipelines, PollIntervals, QueueConfig, StageTimeouts, StagedExecutor,
    StepDependencies,
};
use crate::provisioner::Provisioner;
use crate::retry::RetryPolicy;
use crate::service::ProvisioningService;

/// Builder for creating a [`ProvisionerRuntime`].
#[derive(Default)]
pub struct ProvisionerRuntimeBuilder {
    persistence: Option<Arc<dyn Persistence>>,
    releases: Option<Arc<dyn ReleaseProvider>>,
    director: Option<Arc<dyn DirectorClient>>,
    provisioner: Option<Arc<dyn Provisioner>>,
    installation: Option<Arc<dyn InstallationService>>,
    agent_configs: Option<Arc<dyn AgentConfigClientFactory>>,
    ids: Option<Arc<dyn IdGenerator>>,
    gardener_project: String,
    queue: QueueConfig,
    timeouts: StageTimeouts,
    intervals: PollIntervals,
    status_retry: RetryPolicy,
}

impl std::fmt::Debug for ProvisionerRuntimeBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvisionerRuntimeBuilder")
            .field("persistence", &self.persistence.as_ref().map(|_| "..."))
            .field("releases", &self.releases.as_ref().map(|_| "..."))
            .field("director", &self.director.as_ref().map(|_| "..."))
            .field("provisioner", &self.provisioner.as_ref().map(|_| "..."))
            .field("installation", &self.installation.as_ref().map(|_| "..."))
            .field("agent_configs", &self.agent_configs.as_ref().map(|_| "..."))
            .field("gardener_project", &self.gardener_project)
            .field("queue", &self.queue)
            .field("timeouts", &self.timeouts)
            .field("intervals", &self.intervals)
            .field("status_retry", &self.status_retry)
            .finish()
    }
}

impl ProvisionerRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the persistence layer (required).
    pub fn persistence(mut self, persistence: Arc<dyn Persistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Set the release provider (required).
    pub fn releases(mut self, releases: Arc<dyn ReleaseProvider>) -> Self {
        self.releases = Some(releases);
        self
    }

    /// Set the directory client (required).
    pub fn director(mut self, director: Arc<dyn DirectorClient>) -> Self {
        self.director = Some(director);
        self
    }

    /// Set the cluster provisioner (required).
    pub fn provisioner(mut self, provisioner: Arc<dyn Provisioner>) -> Self {
        self.provisioner = Some(provisioner);
        self
    }

    /// Set the Kyma installation service (required).
    pub fn installation(mut self, installation: Arc<dyn InstallationService>) -> Self {
        self.installation = Some(installation);
        self
    }

    /// Set the factory of runtime agent config clients (required).
    pub fn agent_configs(mut self, agent_configs: Arc<dyn AgentConfigClientFactory>) -> Self {
        self.agent_configs = Some(agent_configs);
        self
    }

    /// Set the ID generator.
    ///
    /// Default: random UUIDs
    pub fn ids(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// Gardener project stored in every Gardener config.
    pub fn gardener_project(mut self, project: impl Into<String>) -> Self {
        self.gardener_project = project.into();
        self
    }

    pub fn queue_config(mut self, queue: QueueConfig) -> Self {
        self.queue = queue;
        self
    }

    pub fn timeouts(mut self, timeouts: StageTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn poll_intervals(mut self, intervals: PollIntervals) -> Self {
        self.intervals = intervals;
        self
    }

    /// Retry policy of final operation status writes.
    pub fn status_retry(mut self, policy: RetryPolicy) -> Self {
        self.status_retry = policy;
        self
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> Result<ProvisionerRuntimeConfig> {
        let persistence = self.persistence.ok_or(Error::Missing("persistence"))?;
        let director = self.director.ok_or(Error::Missing("director client"))?;

        let deps = StepDependencies {
            persistence,
            provisioner: self.provisioner.ok_or(Error::Missing("provisioner"))?,
            installation: self
                .installation
                .ok_or(Error::Missing("installation service"))?,
            configurator: RuntimeConfigurator::new(
                self.agent_configs
                    .ok_or(Error::Missing("agent config client factory"))?,
                director.clone(),
            ),
            director,
        };

        Ok(ProvisionerRuntimeConfig {
            deps,
            releases: self.releases.ok_or(Error::Missing("release provider"))?,
            ids: self.ids.unwrap_or_else(|| Arc::new(UuidGenerator)),
            gardener_project: self.gardener_project,
            queue: self.queue,
            timeouts: self.timeouts,
            intervals: self.intervals,
            status_retry: self.status_retry,
        })
    }
}

/// Configuration for a [`ProvisionerRuntime`].
pub struct ProvisionerRuntimeConfig {
    deps: StepDependencies,
    releases: Arc<dyn ReleaseProvider>,
    ids: Arc<dyn IdGenerator>,
    gardener_project: String,
    queue: QueueConfig,
    timeouts: StageTimeouts,
    intervals: PollIntervals,
    status_retry: RetryPolicy,
}

impl std::fmt::Debug for ProvisionerRuntimeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvisionerRuntimeConfig")
            .field("deps", &"...")
            .field("gardener_project", &self.gardener_project)
            .field("queue", &self.queue)
            .field("timeouts", &self.timeouts)
            .finish()
    }
}

impl ProvisionerRuntimeConfig {
    /// Start the runtime.
    ///
    /// Operations still in progress are enqueued before the workers start.
    pub async fn start(self) -> Result<ProvisionerRuntime> {
        let persistence = self.deps.persistence.clone();
        let pipelines = Pipelines::new(&self.deps, &self.timeouts, &self.intervals);
        let executor = StagedExecutor::new(
            persistence.clone(),
            self.deps.director.clone(),
            pipelines,
            self.status_retry,
            self.queue.retry_delay,
        );
        let workers = self.queue.workers;
        let queue = Arc::new(OperationQueue::new(Arc::new(executor), self.queue));

        let resumed = queue.resume_in_progress(persistence.as_ref()).await?;

        let converter = InputConverter::new(self.ids.clone(), self.releases, self.gardener_project);
        let service = ProvisioningService::new(
            persistence,
            converter,
            self.deps.director,
            self.deps.provisioner,
            queue.clone(),
            self.ids,
        );

        let queue_handle = tokio::spawn(queue.clone().run());

        info!(resumed = resumed, workers = workers, "ProvisionerRuntime started");

        Ok(ProvisionerRuntime {
            queue_handle,
            queue,
            service,
        })
    }
}

/// A running provisioner that can be embedded in an application.
///
/// Call [`shutdown`](Self::shutdown) for graceful termination.
pub struct ProvisionerRuntime {
    queue_handle: JoinHandle<()>,
    queue: Arc<OperationQueue>,
    service: ProvisioningService,
}

impl ProvisionerRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> ProvisionerRuntimeBuilder {
        ProvisionerRuntimeBuilder::new()
    }

    /// Entry point for runtime lifecycle requests.
    pub fn service(&self) -> &ProvisioningService {
        &self.service
    }

    pub fn queue(&self) -> &Arc<OperationQueue> {
        &self.queue
    }

    /// Gracefully shut down the runtime.
    ///
    /// Workers finish the operation they are processing; queued operations
    /// stay in progress and are resumed by the next start.
    pub async fn shutdown(self) {
        info!("ProvisionerRuntime shutting down...");

        self.queue.shutdown_handle().notify_one();

        match self.queue_handle.await {
            Ok(()) => info!("ProvisionerRuntime shutdown complete"),
            Err(e) => error!("ProvisionerRuntime queue task panicked: {}", e),
        }
    }

    /// Check if the runtime is still running.
    pub fn is_running(&self) -> bool {
        !self.queue_handle.is_finished()
    }
}

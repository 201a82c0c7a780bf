// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Provisioner Engine - Runtime Lifecycle Orchestration
//!
//! This crate drives Kyma runtimes through their lifecycle: it registers them
//! in the directory, creates and deletes their clusters, installs and
//! upgrades Kyma and connects the runtime agent. State lives in
//! `provisioner-core`; everything that talks to the outside world lives here.
//!
//! # Architecture
//!
//! ```text
//!                 ┌──────────────────────────────┐
//!   requests ───▶ │     ProvisioningService      │
//!                 │ (validate, persist, enqueue) │
//!                 └──────────────┬───────────────┘
//!                                │ operation id
//!                                ▼
//!                 ┌──────────────────────────────┐
//!                 │        OperationQueue        │
//!                 │  (workers, delayed re-runs)  │
//!                 └──────────────┬───────────────┘
//!                                ▼
//!                 ┌──────────────────────────────┐
//!                 │        StagedExecutor        │
//!                 │  Pipeline per operation type │
//!                 └──────────────┬───────────────┘
//!        ┌──────────────┬────────┴───────┬──────────────────┐
//!        ▼              ▼                ▼                  ▼
//!  ┌───────────┐ ┌─────────────┐ ┌──────────────┐ ┌──────────────────┐
//!  │Provisioner│ │Installation │ │ Configurator │ │  DirectorClient  │
//!  │ Gardener /│ │  Service    │ │ (agent cfg)  │ │    (GraphQL)     │
//!  │ Hydroform │ └─────────────┘ └──────────────┘ └──────────────────┘
//!  └───────────┘
//! ```
//!
//! # Operations
//!
//! | Operation | Started by | Stages |
//! |-----------|------------|--------|
//! | `PROVISION` | `provision_runtime` | WaitingForClusterCreation, StartingInstallation, WaitingForInstallation, ConnectRuntimeAgent |
//! | `UPGRADE` | `upgrade_runtime` | StartingUpgrade, WaitingForInstallation, UpdatingUpgradeState |
//! | `DEPROVISION` | `deprovision_runtime` | WaitForClusterDeletion, CleanupCluster |
//! | `RECONNECT_RUNTIME` | `reconnect_runtime_agent` | ConnectRuntimeAgent |
//!
//! Every collaborator is a trait with a `mock` module next to it, so the
//! whole lifecycle can be exercised in-process with
//! [`OperationQueue::drive_until_idle`].

/// Configuration loaded from environment variables.
pub mod config;

/// Agent configuration written into provisioned runtimes.
pub mod configurator;

/// Client of the directory that registers runtimes.
pub mod director;

/// Startup and wiring errors.
pub mod error;

/// Kyma installation on a runtime's cluster.
pub mod installation;

/// Kubernetes clients built from kubeconfigs.
pub mod kubeclient;

/// Operation pipelines, executor and queue.
pub mod operations;

/// Cluster backends.
pub mod provisioner;

/// On-demand Kyma releases.
pub mod release;

/// Retry of status writes.
pub mod retry;

/// Embeddable runtime.
pub mod runtime;

/// Service facade for lifecycle requests.
pub mod service;

#[cfg(test)]
mod testing;

pub use config::{Config, ConfigError, DirectorAuth};
pub use error::{Error, Result};
pub use operations::{OperationQueue, QueueConfig, StageTimeouts};
pub use release::OnDemandReleases;
pub use retry::RetryPolicy;
pub use runtime::{ProvisionerRuntime, ProvisionerRuntimeBuilder};
pub use service::ProvisioningService;

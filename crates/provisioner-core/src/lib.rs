// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Provisioner Core - Domain Model and Durable State
//!
//! This crate holds everything the provisioner knows about runtimes without
//! talking to the outside world: the data model, request payloads and their
//! conversion, validation, Kyma release lookup and the SQLite persistence
//! layer. The operation queue, cluster drivers and service facade live in
//! `provisioner-engine`.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      provisioner-engine                                  │
//! │      (ProvisioningService, OperationQueue, Gardener / Hydroform)         │
//! └─────────────────────────────────────────────────────────────────────────┘
//!        │ requests          │ releases              │ state
//!        ▼                   ▼                       ▼
//! ┌───────────────┐  ┌──────────────────┐  ┌───────────────────────────────┐
//! │ InputConverter│─▶│ ReleaseResolver  │  │  Persistence / WriteSession   │
//! │ Validator     │  │ (fixed provider  │  │  (SqlitePersistence)          │
//! └───────────────┘  │  list)           │  └───────────────────────────────┘
//!                    └──────────────────┘                 │
//!                             │                           ▼
//!                             └──────────────────▶┌───────────────┐
//!                                                 │    SQLite     │
//!                                                 └───────────────┘
//! ```
//!
//! # Entities
//!
//! | Entity | Table | Owned by |
//! |--------|-------|----------|
//! | [`model::Cluster`] | `cluster` | - |
//! | [`model::GardenerConfig`] / [`model::GcpConfig`] | `gardener_config` / `gcp_config` | cluster |
//! | [`model::KymaConfig`] | `kyma_config`, `kyma_config_module` | cluster |
//! | [`model::Operation`] | `operation` | references cluster |
//! | [`model::RuntimeUpgrade`] | `runtime_upgrade` | references operation and two Kyma configs |
//! | [`model::Release`] | `kyma_release` | - |
//!
//! # Operation State Machine
//!
//! ```text
//!               start
//!                 │
//!                 ▼
//!          ┌─────────────┐  stage ──▶ stage ──▶ ...
//!          │ IN_PROGRESS │◀─────────────┘
//!          └──────┬──────┘
//!                 │
//!        ┌────────┴────────┐
//!        ▼                 ▼
//!  ┌───────────┐     ┌──────────┐
//!  │ SUCCEEDED │     │  FAILED  │     stage = Finished
//!  └───────────┘     └──────────┘
//! ```
//!
//! At most one operation per cluster is `IN_PROGRESS`. The service checks the
//! last operation inside the write session that inserts the new one, and the
//! schema backs this with a partial unique index.
//!
//! # Errors
//!
//! Caller-facing failures are [`ProvisioningError`]s classified by
//! [`ErrorKind`]:
//!
//! | Kind | Examples |
//! |------|----------|
//! | `BadRequest` | operation already in progress, missing Kyma config, invalid rollback |
//! | `NotFound` | unknown release version, missing cluster or operation |
//! | `Internal` | database or backend failures |
//! | `Forbidden` | authorization failures reported by outer layers |

pub mod convert;
pub mod error;
pub mod id;
pub mod input;
pub mod migrations;
pub mod model;
pub mod persistence;
pub mod release;
pub mod status;
pub mod validation;

#[cfg(test)]
mod testing;

pub use convert::InputConverter;
pub use error::{ErrorKind, ProvisioningError, Result};
pub use id::{IdGenerator, SequenceIdGenerator, UuidGenerator};
pub use persistence::{Persistence, PersistenceError, SqlitePersistence, WriteSession};
pub use release::{
    ReleaseError, ReleaseProvider, ReleaseRepository, ReleaseResolver, SqliteReleaseRepository,
};
pub use status::{OperationStatus, RuntimeConfiguration, RuntimeStatus};
pub use validation::{RUNTIME_AGENT_COMPONENT, RUNTIME_AGENT_NAMESPACE, Validator};

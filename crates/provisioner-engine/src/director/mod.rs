// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Directory service client.
//!
//! Runtimes are registered in the directory before provisioning starts and
//! unregistered when they are removed. The runtime agent connects back using
//! a one-time token issued by the directory. The runtime's status condition
//! in the directory follows provisioning: `CONNECTED` once the agent is
//! configured, `FAILED` when provisioning fails.

pub mod graphql;
pub mod mock;

pub use graphql::{GraphQlDirectorClient, OAuthClient, StaticToken, Token, TokenSource};

use std::collections::BTreeMap;

use async_trait::async_trait;
use provisioner_core::input::RuntimeInput;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One-time token the runtime agent exchanges for a certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OneTimeToken {
    pub token: String,
    pub connector_url: String,
}

/// Status of a runtime as shown by the directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuntimeStatusCondition {
    Initial,
    Provisioning,
    Connected,
    Failed,
}

/// A runtime registered in the directory.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DirectorRuntime {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, Value>,
}

/// Directory client errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DirectorError {
    /// No usable access token.
    #[error("invalid director token: {0}")]
    Token(String),
    /// Transport or HTTP-level failure.
    #[error("director request failed: {0}")]
    Request(String),
    /// The API answered with GraphQL errors.
    #[error("director returned errors: {0}")]
    GraphQl(String),
    /// The mutation returned no result.
    #[error("director returned empty result for {0}")]
    EmptyResult(&'static str),
}

/// Operations the provisioner needs from the directory.
#[async_trait]
pub trait DirectorClient: Send + Sync {
    /// Register a runtime, returning its ID.
    async fn create_runtime(&self, input: &RuntimeInput, tenant: &str)
    -> Result<String, DirectorError>;

    /// Unregister a runtime.
    async fn delete_runtime(&self, runtime_id: &str, tenant: &str) -> Result<(), DirectorError>;

    /// Issue a one-time connection token for the runtime.
    async fn get_connection_token(
        &self,
        runtime_id: &str,
        tenant: &str,
    ) -> Result<OneTimeToken, DirectorError>;

    async fn get_runtime(
        &self,
        runtime_id: &str,
        tenant: &str,
    ) -> Result<DirectorRuntime, DirectorError>;

    /// Replace the runtime's registration data and status condition.
    async fn update_runtime(
        &self,
        runtime_id: &str,
        input: &RuntimeInput,
        condition: RuntimeStatusCondition,
        tenant: &str,
    ) -> Result<(), DirectorError>;

    /// Set the status condition, keeping name, description and labels.
    async fn set_runtime_status_condition(
        &self,
        runtime_id: &str,
        condition: RuntimeStatusCondition,
        tenant: &str,
    ) -> Result<(), DirectorError> {
        let runtime = self.get_runtime(runtime_id, tenant).await?;
        let input = RuntimeInput {
            name: runtime.name,
            description: runtime.description,
            labels: runtime.labels,
        };
        self.update_runtime(runtime_id, &input, condition, tenant)
            .await
    }
}

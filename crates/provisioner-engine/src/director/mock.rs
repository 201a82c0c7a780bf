// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory directory for tests.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use provisioner_core::input::RuntimeInput;
use tokio::sync::Mutex;

use super::{
    DirectorClient, DirectorError, DirectorRuntime, OneTimeToken, RuntimeStatusCondition,
};

/// Directory mock recording registrations per tenant.
#[derive(Clone, Default)]
pub struct MockDirector {
    runtimes: Arc<Mutex<BTreeMap<String, (String, String)>>>,
    deleted: Arc<Mutex<Vec<String>>>,
    conditions: Arc<Mutex<BTreeMap<String, RuntimeStatusCondition>>>,
    next_id: Arc<AtomicU64>,
    /// Fail every `create_runtime` call.
    pub fail_create: bool,
    /// Fail every `delete_runtime` call.
    pub fail_delete: bool,
    /// Fail every `get_connection_token` call.
    pub fail_token: bool,
    /// Fail every `update_runtime` call.
    pub fail_update: bool,
    /// Return this ID from `create_runtime` instead of generating one.
    pub runtime_id: Option<String>,
}

impl MockDirector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mock where every call fails.
    pub fn failing() -> Self {
        Self {
            fail_create: true,
            fail_delete: true,
            fail_token: true,
            fail_update: true,
            ..Self::default()
        }
    }

    /// Register a runtime directly, as if created earlier.
    pub async fn insert_runtime(&self, runtime_id: &str, name: &str, tenant: &str) {
        self.runtimes.lock().await.insert(
            runtime_id.to_string(),
            (name.to_string(), tenant.to_string()),
        );
    }

    /// Whether `runtime_id` is currently registered.
    pub async fn is_registered(&self, runtime_id: &str) -> bool {
        self.runtimes.lock().await.contains_key(runtime_id)
    }

    /// Runtime IDs passed to `delete_runtime`, in call order.
    pub async fn deleted(&self) -> Vec<String> {
        self.deleted.lock().await.clone()
    }

    /// Last status condition set for `runtime_id`.
    pub async fn status_condition(&self, runtime_id: &str) -> Option<RuntimeStatusCondition> {
        self.conditions.lock().await.get(runtime_id).copied()
    }
}

#[async_trait]
impl DirectorClient for MockDirector {
    async fn create_runtime(
        &self,
        input: &RuntimeInput,
        tenant: &str,
    ) -> Result<String, DirectorError> {
        if self.fail_create {
            return Err(DirectorError::Request("registration refused".to_string()));
        }
        let id = match &self.runtime_id {
            Some(id) => id.clone(),
            None => format!("runtime-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1),
        };
        self.insert_runtime(&id, &input.name, tenant).await;
        Ok(id)
    }

    async fn delete_runtime(&self, runtime_id: &str, _tenant: &str) -> Result<(), DirectorError> {
        self.deleted.lock().await.push(runtime_id.to_string());
        if self.fail_delete {
            return Err(DirectorError::Request("unregistration refused".to_string()));
        }
        self.runtimes.lock().await.remove(runtime_id);
        Ok(())
    }

    async fn get_connection_token(
        &self,
        runtime_id: &str,
        _tenant: &str,
    ) -> Result<OneTimeToken, DirectorError> {
        if self.fail_token {
            return Err(DirectorError::Request("token refused".to_string()));
        }
        Ok(OneTimeToken {
            token: format!("token-{}", runtime_id),
            connector_url: "https://connector.kyma.local".to_string(),
        })
    }

    async fn get_runtime(
        &self,
        runtime_id: &str,
        _tenant: &str,
    ) -> Result<DirectorRuntime, DirectorError> {
        let runtimes = self.runtimes.lock().await;
        let (name, _) = runtimes
            .get(runtime_id)
            .ok_or_else(|| DirectorError::GraphQl(format!("runtime {} not found", runtime_id)))?;
        Ok(DirectorRuntime {
            id: runtime_id.to_string(),
            name: name.clone(),
            description: None,
            labels: BTreeMap::new(),
        })
    }

    async fn update_runtime(
        &self,
        runtime_id: &str,
        input: &RuntimeInput,
        condition: RuntimeStatusCondition,
        _tenant: &str,
    ) -> Result<(), DirectorError> {
        if self.fail_update {
            return Err(DirectorError::Request("update refused".to_string()));
        }
        match self.runtimes.lock().await.get_mut(runtime_id) {
            Some((name, _)) => *name = input.name.clone(),
            None => {
                return Err(DirectorError::GraphQl(format!(
                    "runtime {} not found",
                    runtime_id
                )));
            }
        }
        self.conditions
            .lock()
            .await
            .insert(runtime_id.to_string(), condition);
        Ok(())
    }
}

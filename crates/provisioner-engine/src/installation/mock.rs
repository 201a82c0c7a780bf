// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Scripted installer for tests.

use std::sync::Arc;

use async_trait::async_trait;
use provisioner_core::model::{ConfigEntry, KymaComponentConfig, Release};
use tokio::sync::Mutex;

use super::{InstallationError, InstallationService, InstallationState, InstallationStateKind};

/// Call recorded by [`MockInstallationService`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallationCall {
    Install { version: String, components: Vec<String> },
    Upgrade { version: String, components: Vec<String> },
    Uninstall,
    Cleanup,
}

#[derive(Default)]
struct State {
    calls: Vec<InstallationCall>,
    checks: u32,
}

/// Installer reporting `Installed` after a configurable number of checks.
#[derive(Clone, Default)]
pub struct MockInstallationService {
    state: Arc<Mutex<State>>,
    /// Checks answered with `InProgress` before reporting `final_state`.
    pub pending_checks: u32,
    /// State reported once `pending_checks` are used up. Defaults to `Installed`.
    pub final_state: Option<InstallationStateKind>,
    /// Fail every trigger call.
    pub fail_triggers: bool,
    /// Fail every state check.
    pub fail_checks: bool,
    /// Fail service catalog cleanup.
    pub fail_cleanup: bool,
}

impl MockInstallationService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports `Installed` after `checks` in-progress answers.
    pub fn installed_after(checks: u32) -> Self {
        Self {
            pending_checks: checks,
            ..Self::default()
        }
    }

    /// Mock where every call fails.
    pub fn failing() -> Self {
        Self {
            fail_triggers: true,
            fail_checks: true,
            ..Self::default()
        }
    }

    pub async fn calls(&self) -> Vec<InstallationCall> {
        self.state.lock().await.calls.clone()
    }

    /// Number of state checks answered so far.
    pub async fn checks(&self) -> u32 {
        self.state.lock().await.checks
    }

    async fn record(&self, call: InstallationCall) -> Result<(), InstallationError> {
        if self.fail_triggers {
            return Err(InstallationError::Api("installer unavailable".to_string()));
        }
        self.state.lock().await.calls.push(call);
        Ok(())
    }
}

fn names(components: &[KymaComponentConfig]) -> Vec<String> {
    components.iter().map(|c| c.component.clone()).collect()
}

#[async_trait]
impl InstallationService for MockInstallationService {
    async fn trigger_installation(
        &self,
        _kubeconfig: &str,
        release: &Release,
        _global_config: &[ConfigEntry],
        components: &[KymaComponentConfig],
    ) -> Result<(), InstallationError> {
        self.record(InstallationCall::Install {
            version: release.version.clone(),
            components: names(components),
        })
        .await
    }

    async fn check_installation_state(
        &self,
        _kubeconfig: &str,
    ) -> Result<InstallationState, InstallationError> {
        if self.fail_checks {
            return Err(InstallationError::Api("installer unavailable".to_string()));
        }

        let mut state = self.state.lock().await;
        state.checks += 1;
        if state.checks <= self.pending_checks {
            return Ok(InstallationState::new(
                InstallationStateKind::InProgress,
                "Installing components",
            ));
        }

        let kind = self
            .final_state
            .clone()
            .unwrap_or(InstallationStateKind::Installed);
        Ok(InstallationState::new(kind, "Kyma installed"))
    }

    async fn trigger_upgrade(
        &self,
        _kubeconfig: &str,
        release: &Release,
        _global_config: &[ConfigEntry],
        components: &[KymaComponentConfig],
    ) -> Result<(), InstallationError> {
        self.record(InstallationCall::Upgrade {
            version: release.version.clone(),
            components: names(components),
        })
        .await
    }

    async fn trigger_uninstall(&self, _kubeconfig: &str) -> Result<(), InstallationError> {
        self.record(InstallationCall::Uninstall).await
    }

    async fn perform_cleanup(&self, _kubeconfig: &str) -> Result<(), InstallationError> {
        if self.fail_cleanup {
            return Err(InstallationError::Api("service catalog unavailable".to_string()));
        }
        self.state.lock().await.calls.push(InstallationCall::Cleanup);
        Ok(())
    }
}

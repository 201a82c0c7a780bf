// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Request validation.

use std::sync::Arc;

use crate::error::{ProvisioningError, Result};
use crate::input::{KymaConfigInput, ProvisionRuntimeInput, UpgradeRuntimeInput};
use crate::persistence::Persistence;

/// Component that connects the runtime back to the directory.
pub const RUNTIME_AGENT_COMPONENT: &str = "compass-runtime-agent";

/// Namespace the runtime agent is installed into.
pub const RUNTIME_AGENT_NAMESPACE: &str = "compass-system";

/// Checks requests before anything is persisted.
#[derive(Clone)]
pub struct Validator {
    persistence: Arc<dyn Persistence>,
}

impl Validator {
    pub fn new(persistence: Arc<dyn Persistence>) -> Self {
        Self { persistence }
    }

    pub fn validate_provisioning_input(&self, input: &ProvisionRuntimeInput) -> Result<()> {
        validate_kyma_config(input.kyma_config.as_ref())?;

        if input.cluster_config.is_none() {
            return Err(ProvisioningError::bad_request("no cluster config provided"));
        }
        if input.runtime_input.is_none() {
            return Err(ProvisioningError::bad_request("no runtime input provided"));
        }
        Ok(())
    }

    pub fn validate_upgrade_input(&self, input: &UpgradeRuntimeInput) -> Result<()> {
        validate_kyma_config(input.kyma_config.as_ref())
    }

    /// Reject callers acting on a runtime owned by another tenant.
    pub async fn validate_tenant(&self, runtime_id: &str, tenant: &str) -> Result<()> {
        let owner = self
            .persistence
            .get_tenant(runtime_id)
            .await
            .map_err(|e| ProvisioningError::from(e).context("Failed to get tenant from database"))?;

        check_tenant(&owner, tenant)
    }

    /// Same as [`Validator::validate_tenant`], keyed by operation.
    pub async fn validate_tenant_for_operation(
        &self,
        operation_id: &str,
        tenant: &str,
    ) -> Result<()> {
        let owner = self
            .persistence
            .get_tenant_for_operation(operation_id)
            .await
            .map_err(|e| ProvisioningError::from(e).context("Failed to get tenant from database"))?;

        check_tenant(&owner, tenant)
    }
}

fn validate_kyma_config(kyma_config: Option<&KymaConfigInput>) -> Result<()> {
    let kyma_config =
        kyma_config.ok_or_else(|| ProvisioningError::bad_request("no Kyma config provided"))?;

    let has_agent = kyma_config
        .components
        .iter()
        .any(|component| component.component == RUNTIME_AGENT_COMPONENT);
    if !has_agent {
        return Err(ProvisioningError::bad_request(
            "Kyma components list does not contain Compass Runtime Agent",
        ));
    }
    Ok(())
}

fn check_tenant(owner: &str, tenant: &str) -> Result<()> {
    if owner != tenant {
        return Err(ProvisioningError::bad_request(
            "provided tenant does not match tenant used to provision cluster",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::input::{ClusterConfigInput, ComponentConfigurationInput, RuntimeInput};
    use crate::model::{Operation, OperationType, Stage};
    use crate::persistence::SqlitePersistence;
    use crate::testing::{gardener_cluster, test_pool, timestamp};

    async fn validator() -> Validator {
        let persistence = SqlitePersistence::new(test_pool().await);
        let mut session = persistence.begin().await.unwrap();
        session
            .insert_cluster(&gardener_cluster("runtime-1"))
            .await
            .unwrap();
        session
            .insert_operation(&Operation::started(
                "op-1",
                "runtime-1",
                OperationType::Provision,
                Stage::WaitingForClusterCreation,
                "Provisioning started",
                timestamp(1),
            ))
            .await
            .unwrap();
        session.commit().await.unwrap();
        Validator::new(Arc::new(persistence))
    }

    fn kyma_input(components: &[&str]) -> KymaConfigInput {
        KymaConfigInput {
            version: "1.8".to_string(),
            components: components
                .iter()
                .map(|name| ComponentConfigurationInput {
                    component: name.to_string(),
                    namespace: "kyma-system".to_string(),
                    ..Default::default()
                })
                .collect(),
            configuration: vec![],
        }
    }

    #[tokio::test]
    async fn test_upgrade_input() {
        let validator = validator().await;

        let err = validator
            .validate_upgrade_input(&UpgradeRuntimeInput { kyma_config: None })
            .unwrap_err();
        assert_eq!(err.message(), "no Kyma config provided");

        let err = validator
            .validate_upgrade_input(&UpgradeRuntimeInput {
                kyma_config: Some(kyma_input(&["core"])),
            })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
        assert_eq!(
            err.message(),
            "Kyma components list does not contain Compass Runtime Agent"
        );

        validator
            .validate_upgrade_input(&UpgradeRuntimeInput {
                kyma_config: Some(kyma_input(&["core", RUNTIME_AGENT_COMPONENT])),
            })
            .unwrap();
    }

    #[tokio::test]
    async fn test_provisioning_input() {
        let validator = validator().await;
        let mut input = ProvisionRuntimeInput {
            runtime_input: Some(RuntimeInput::default()),
            cluster_config: None,
            credentials: None,
            kyma_config: Some(kyma_input(&[RUNTIME_AGENT_COMPONENT])),
        };

        let err = validator.validate_provisioning_input(&input).unwrap_err();
        assert_eq!(err.message(), "no cluster config provided");

        input.cluster_config = Some(ClusterConfigInput::default());
        validator.validate_provisioning_input(&input).unwrap();
    }

    #[tokio::test]
    async fn test_tenant_validation() {
        let validator = validator().await;

        validator.validate_tenant("runtime-1", "tenant").await.unwrap();
        validator
            .validate_tenant_for_operation("op-1", "tenant")
            .await
            .unwrap();

        let err = validator
            .validate_tenant("runtime-1", "other")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
        assert_eq!(
            err.message(),
            "provided tenant does not match tenant used to provision cluster"
        );

        let err = validator.validate_tenant("missing", "tenant").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}

// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Provisioning service.
//!
//! Entry point for every runtime lifecycle request. Requests are checked and
//! persisted synchronously; the actual work happens later on the
//! [`OperationQueue`], and its outcome is observed by polling
//! [`ProvisioningService::runtime_operation_status`].
//!
//! No two operations of a runtime are ever in progress at the same time. Every
//! start path checks the last operation inside the write session that inserts
//! the new one, before any cluster driver is called.

use std::sync::Arc;

use chrono::Utc;
use provisioner_core::input::{ProvisionRuntimeInput, UpgradeRuntimeInput};
use provisioner_core::model::{
    Cluster, Operation, OperationType, RuntimeUpgrade, Stage, UpgradeState,
};
use provisioner_core::persistence::{Persistence, WriteSession};
use provisioner_core::{
    IdGenerator, InputConverter, OperationStatus, ProvisioningError, Result, RuntimeStatus,
    Validator,
};
use tracing::{error, info, instrument, warn};

use crate::director::DirectorClient;
use crate::operations::OperationQueue;
use crate::provisioner::{Provisioner, ProvisionerError};

pub const PROVISIONING_STARTED: &str = "Provisioning started";
pub const UPGRADE_STARTED: &str = "Upgrade started";
pub const RECONNECTING_RUNTIME_AGENT: &str = "Reconnecting Runtime Agent";

fn in_progress_error(runtime_id: &str) -> ProvisioningError {
    ProvisioningError::bad_request(format!(
        "cannot start new operation for {} Runtime while previous one is in progress",
        runtime_id
    ))
}

fn with_context<E>(prefix: &'static str) -> impl FnOnce(E) -> ProvisioningError
where
    E: Into<ProvisioningError>,
{
    move |e| e.into().context(prefix)
}

fn internal<E: std::fmt::Display>(prefix: &'static str) -> impl FnOnce(E) -> ProvisioningError {
    move |e| ProvisioningError::internal(e.to_string()).context(prefix)
}

/// Driver errors. A cluster kind without a configured backend is the
/// caller's fault.
fn driver_error(prefix: &'static str) -> impl FnOnce(ProvisionerError) -> ProvisioningError {
    move |e| match e {
        ProvisionerError::Unsupported(_) => {
            ProvisioningError::bad_request(e.to_string()).context(prefix)
        }
        e => ProvisioningError::internal(e.to_string()).context(prefix),
    }
}

/// The finished upgrade `last` can be rolled back.
fn check_rollback_target(runtime_id: &str, last: &Operation) -> Result<()> {
    if last.operation_type != OperationType::Upgrade {
        return Err(ProvisioningError::bad_request(format!(
            "cannot roll back {} Runtime: last operation is not an upgrade",
            runtime_id
        )));
    }
    if !last.is_finished() {
        return Err(ProvisioningError::bad_request(format!(
            "cannot roll back {} Runtime while upgrade is in progress",
            runtime_id
        )));
    }
    Ok(())
}

/// Fail unless the last operation seen by `session` is finished.
async fn recheck_last_operation(
    session: &mut Box<dyn WriteSession>,
    runtime_id: &str,
) -> Result<()> {
    let last = session
        .get_last_operation(runtime_id)
        .await
        .map_err(with_context("Failed to get last operation"))?;
    match last {
        Some(operation) if !operation.is_finished() => Err(in_progress_error(runtime_id)),
        _ => Ok(()),
    }
}

/// Facade over conversion, persistence, the directory and the queue.
#[derive(Clone)]
pub struct ProvisioningService {
    persistence: Arc<dyn Persistence>,
    converter: InputConverter,
    validator: Validator,
    director: Arc<dyn DirectorClient>,
    provisioner: Arc<dyn Provisioner>,
    queue: Arc<OperationQueue>,
    ids: Arc<dyn IdGenerator>,
}

impl ProvisioningService {
    pub fn new(
        persistence: Arc<dyn Persistence>,
        converter: InputConverter,
        director: Arc<dyn DirectorClient>,
        provisioner: Arc<dyn Provisioner>,
        queue: Arc<OperationQueue>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self {
            validator: Validator::new(persistence.clone()),
            persistence,
            converter,
            director,
            provisioner,
            queue,
            ids,
        }
    }

    /// Register a runtime and start creating its cluster.
    ///
    /// The directory registration is undone when anything fails before the
    /// operation is committed.
    #[instrument(skip(self, input), fields(tenant = %tenant))]
    pub async fn provision_runtime(
        &self,
        input: &ProvisionRuntimeInput,
        tenant: &str,
        sub_account_id: Option<&str>,
    ) -> Result<OperationStatus> {
        self.validator.validate_provisioning_input(input)?;
        let runtime_input = input
            .runtime_input
            .as_ref()
            .ok_or_else(|| ProvisioningError::bad_request("no runtime input provided"))?;

        let runtime_id = self
            .director
            .create_runtime(runtime_input, tenant)
            .await
            .map_err(internal("Failed to register Runtime"))?;

        match self
            .start_provisioning(&runtime_id, input, tenant, sub_account_id)
            .await
        {
            Ok(operation) => {
                self.queue.add(&operation.id);
                info!(
                    runtime_id = %runtime_id,
                    operation_id = %operation.id,
                    "Provisioning started"
                );
                Ok(self.converter.operation_status(&operation))
            }
            Err(e) => {
                self.unregister_failed_runtime(&runtime_id, tenant).await;
                Err(e)
            }
        }
    }

    async fn start_provisioning(
        &self,
        runtime_id: &str,
        input: &ProvisionRuntimeInput,
        tenant: &str,
        sub_account_id: Option<&str>,
    ) -> Result<Operation> {
        let cluster = self
            .converter
            .provisioning_input_to_cluster(runtime_id, input, tenant, sub_account_id)
            .await
            .map_err(|e| e.context("Failed to convert provisioning input"))?;

        let operation = Operation::started(
            self.ids.new_id(),
            runtime_id,
            OperationType::Provision,
            Stage::WaitingForClusterCreation,
            PROVISIONING_STARTED,
            Utc::now(),
        );

        let mut session = self
            .persistence
            .begin()
            .await
            .map_err(with_context("Failed to start database transaction"))?;
        recheck_last_operation(&mut session, runtime_id).await?;
        session
            .insert_cluster(&cluster)
            .await
            .map_err(with_context("Failed to insert cluster"))?;
        session
            .insert_operation(&operation)
            .await
            .map_err(with_context("Failed to insert operation"))?;

        self.provisioner
            .provision_cluster(&cluster, &operation.id)
            .await
            .map_err(driver_error("Failed to start provisioning"))?;

        session
            .commit()
            .await
            .map_err(with_context("Failed to commit transaction"))?;
        Ok(operation)
    }

    async fn unregister_failed_runtime(&self, runtime_id: &str, tenant: &str) {
        info!(runtime_id = %runtime_id, "Unregistering failed Runtime");
        if let Err(e) = self.director.delete_runtime(runtime_id, tenant).await {
            // The directory still lists a runtime that was never provisioned.
            error!(
                runtime_id = %runtime_id,
                tenant = %tenant,
                error = %e,
                "Failed to unregister failed Runtime, registration is orphaned"
            );
        }
    }

    async fn verify_last_operation_finished(&self, runtime_id: &str) -> Result<()> {
        let last = self
            .persistence
            .get_last_operation(runtime_id)
            .await
            .map_err(with_context("Failed to get last operation"))?;
        if !last.is_finished() {
            return Err(in_progress_error(runtime_id));
        }
        Ok(())
    }

    async fn get_cluster(&self, runtime_id: &str) -> Result<Cluster> {
        self.persistence
            .get_cluster(runtime_id)
            .await
            .map_err(with_context("Failed to get cluster"))
    }

    /// Store `operation` after re-checking the last one, then enqueue it.
    async fn insert_and_enqueue(
        &self,
        operation: &Operation,
        error_prefix: &'static str,
    ) -> Result<()> {
        let mut session = self
            .persistence
            .begin()
            .await
            .map_err(with_context("Failed to start database transaction"))?;
        recheck_last_operation(&mut session, &operation.cluster_id).await?;
        session
            .insert_operation(operation)
            .await
            .map_err(with_context(error_prefix))?;
        session
            .commit()
            .await
            .map_err(with_context("Failed to commit transaction"))?;

        self.queue.add(&operation.id);
        Ok(())
    }

    /// Start tearing down the runtime's cluster. Returns the operation ID.
    #[instrument(skip(self), fields(tenant = %tenant))]
    pub async fn deprovision_runtime(&self, runtime_id: &str, tenant: &str) -> Result<String> {
        self.validator.validate_tenant(runtime_id, tenant).await?;
        let cluster = self.get_cluster(runtime_id).await?;

        let mut session = self
            .persistence
            .begin()
            .await
            .map_err(with_context("Failed to start database transaction"))?;
        recheck_last_operation(&mut session, runtime_id).await?;

        let operation = self
            .provisioner
            .deprovision_cluster(&cluster, &self.ids.new_id())
            .await
            .map_err(driver_error("Failed to start deprovisioning"))?;

        session
            .insert_operation(&operation)
            .await
            .map_err(with_context("Failed to start deprovisioning"))?;
        session
            .commit()
            .await
            .map_err(with_context("Failed to commit transaction"))?;
        self.queue.add(&operation.id);

        info!(
            runtime_id = %runtime_id,
            operation_id = %operation.id,
            "Deprovisioning started"
        );
        Ok(operation.id)
    }

    /// Switch the runtime to a new Kyma config and start the upgrade.
    #[instrument(skip(self, input))]
    pub async fn upgrade_runtime(
        &self,
        runtime_id: &str,
        input: &UpgradeRuntimeInput,
    ) -> Result<OperationStatus> {
        self.validator.validate_upgrade_input(input)?;
        let kyma_input = input
            .kyma_config
            .as_ref()
            .ok_or_else(|| ProvisioningError::bad_request("no Kyma config provided"))?;

        self.verify_last_operation_finished(runtime_id).await?;
        let cluster = self.get_cluster(runtime_id).await?;

        let kyma_config = self
            .converter
            .kyma_config_from_input(runtime_id, kyma_input)
            .await
            .map_err(|e| e.context("Failed to convert Kyma config"))?;

        let operation = Operation::started(
            self.ids.new_id(),
            runtime_id,
            OperationType::Upgrade,
            Stage::StartingUpgrade,
            UPGRADE_STARTED,
            Utc::now(),
        );
        let upgrade = RuntimeUpgrade {
            id: self.ids.new_id(),
            state: UpgradeState::InProgress,
            operation_id: operation.id.clone(),
            pre_upgrade_kyma_config_id: cluster.kyma_config.id.clone(),
            post_upgrade_kyma_config_id: kyma_config.id.clone(),
        };

        let mut session = self
            .persistence
            .begin()
            .await
            .map_err(with_context("Failed to start database transaction"))?;
        recheck_last_operation(&mut session, runtime_id).await?;
        session
            .insert_kyma_config(&kyma_config)
            .await
            .map_err(with_context("Failed to start upgrade"))?;
        session
            .insert_operation(&operation)
            .await
            .map_err(with_context("Failed to start upgrade"))?;
        session
            .insert_runtime_upgrade(&upgrade)
            .await
            .map_err(with_context("Failed to start upgrade"))?;
        session
            .set_active_kyma_config(runtime_id, &kyma_config.id)
            .await
            .map_err(with_context("Failed to start upgrade"))?;
        session
            .commit()
            .await
            .map_err(with_context("Failed to commit transaction"))?;

        self.queue.add(&operation.id);
        info!(
            runtime_id = %runtime_id,
            operation_id = %operation.id,
            version = %kyma_config.release.version,
            "Upgrade started"
        );
        Ok(self.converter.operation_status(&operation))
    }

    /// Restore the Kyma config active before the last upgrade.
    #[instrument(skip(self))]
    pub async fn roll_back_last_upgrade(&self, runtime_id: &str) -> Result<RuntimeStatus> {
        let last = self
            .persistence
            .get_last_operation(runtime_id)
            .await
            .map_err(with_context("Failed to get last operation"))?;
        check_rollback_target(runtime_id, &last)?;

        let upgrade = self
            .persistence
            .get_runtime_upgrade(&last.id)
            .await
            .map_err(with_context("Failed to get runtime upgrade"))?;

        let mut session = self
            .persistence
            .begin()
            .await
            .map_err(with_context("Failed to start database transaction"))?;
        let current = session
            .get_last_operation(runtime_id)
            .await
            .map_err(with_context("Failed to get last operation"))?;
        match current {
            Some(current) if current.id == last.id => check_rollback_target(runtime_id, &current)?,
            Some(current) if !current.is_finished() => return Err(in_progress_error(runtime_id)),
            _ => {
                return Err(ProvisioningError::bad_request(format!(
                    "cannot roll back {} Runtime: last operation changed",
                    runtime_id
                )));
            }
        }
        session
            .set_active_kyma_config(runtime_id, &upgrade.pre_upgrade_kyma_config_id)
            .await
            .map_err(with_context("Failed to roll back upgrade"))?;
        session
            .update_upgrade_state(&last.id, UpgradeState::RolledBack)
            .await
            .map_err(with_context("Failed to roll back upgrade"))?;
        session
            .commit()
            .await
            .map_err(with_context("Failed to commit transaction"))?;

        warn!(
            runtime_id = %runtime_id,
            kyma_config_id = %upgrade.pre_upgrade_kyma_config_id,
            "Upgrade rolled back"
        );

        let cluster = self.get_cluster(runtime_id).await?;
        Ok(self.converter.runtime_status(&last, &cluster))
    }

    /// Push fresh connection credentials to the runtime agent.
    /// Returns the operation ID.
    #[instrument(skip(self))]
    pub async fn reconnect_runtime_agent(&self, runtime_id: &str) -> Result<String> {
        self.verify_last_operation_finished(runtime_id).await?;
        let cluster = self.get_cluster(runtime_id).await?;
        if cluster.kubeconfig.is_none() {
            return Err(ProvisioningError::bad_request(format!(
                "Runtime {} has no kubeconfig",
                runtime_id
            )));
        }

        let operation = Operation::started(
            self.ids.new_id(),
            runtime_id,
            OperationType::ReconnectRuntime,
            Stage::ConnectRuntimeAgent,
            RECONNECTING_RUNTIME_AGENT,
            Utc::now(),
        );
        self.insert_and_enqueue(&operation, "Failed to start Runtime Agent reconnection")
            .await?;

        info!(runtime_id = %runtime_id, operation_id = %operation.id, "Reconnecting Runtime Agent");
        Ok(operation.id)
    }

    /// Last operation and current configuration of the runtime.
    pub async fn runtime_status(&self, runtime_id: &str) -> Result<RuntimeStatus> {
        let last = self
            .persistence
            .get_last_operation(runtime_id)
            .await
            .map_err(with_context("Failed to get last operation"))?;
        let cluster = self.get_cluster(runtime_id).await?;
        Ok(self.converter.runtime_status(&last, &cluster))
    }

    pub async fn runtime_operation_status(&self, operation_id: &str) -> Result<OperationStatus> {
        let operation = self
            .persistence
            .get_operation(operation_id)
            .await
            .map_err(with_context("Failed to get operation"))?;
        Ok(self.converter.operation_status(&operation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::director::mock::MockDirector;
    use crate::operations::tests::Fixture;
    use crate::operations::{QueueConfig, StagedExecutor};
    use crate::provisioner::ProvisionerRouter;
    use crate::provisioner::mock::MockProvisioner;
    use crate::retry::RetryPolicy;
    use crate::testing::{kyma_input, provision_input};
    use provisioner_core::input::GcpConfigInput;
    use provisioner_core::model::OperationState;
    use provisioner_core::{ErrorKind, SqliteReleaseRepository, UuidGenerator};
    use std::time::Duration;

    struct Harness {
        fixture: Fixture,
        queue: Arc<OperationQueue>,
        service: ProvisioningService,
    }

    async fn harness(fixture: Fixture) -> Harness {
        let provisioner = Arc::new(fixture.provisioner.clone());
        harness_with(fixture, provisioner).await
    }

    async fn harness_with(fixture: Fixture, provisioner: Arc<dyn Provisioner>) -> Harness {
        let executor = StagedExecutor::new(
            fixture.persistence.clone(),
            Arc::new(fixture.director.clone()),
            fixture.pipelines(),
            RetryPolicy {
                attempts: 1,
                interval: Duration::ZERO,
            },
            Duration::from_secs(5),
        );
        let queue = Arc::new(OperationQueue::new(
            Arc::new(executor),
            QueueConfig::default(),
        ));
        let releases = SqliteReleaseRepository::new(fixture.persistence.pool().clone());
        let converter = InputConverter::new(
            Arc::new(UuidGenerator),
            Arc::new(releases),
            "frog",
        );
        let service = ProvisioningService::new(
            fixture.persistence.clone(),
            converter,
            Arc::new(fixture.director.clone()),
            provisioner,
            queue.clone(),
            Arc::new(UuidGenerator),
        );
        Harness {
            fixture,
            queue,
            service,
        }
    }

    async fn provisioned(h: &Harness) -> String {
        let status = h
            .service
            .provision_runtime(&provision_input(), "tenant", None)
            .await
            .unwrap();
        h.queue.drive_until_idle().await;
        status.runtime_id
    }

    #[tokio::test]
    async fn test_provision_runtime_returns_in_progress_operation() {
        let h = harness(Fixture::new().await).await;

        let status = h
            .service
            .provision_runtime(&provision_input(), "tenant", Some("sub-account"))
            .await
            .unwrap();

        assert_eq!(status.operation, OperationType::Provision);
        assert_eq!(status.state, OperationState::InProgress);
        assert_eq!(status.message, PROVISIONING_STARTED);
        assert_eq!(h.fixture.provisioner.provisioned().await, [status.runtime_id.clone()]);
        assert_eq!(h.queue.len(), 1);

        let cluster = h.fixture.persistence.get_cluster(&status.runtime_id).await.unwrap();
        assert_eq!(cluster.tenant, "tenant");
        assert_eq!(cluster.sub_account_id.as_deref(), Some("sub-account"));
    }

    #[tokio::test]
    async fn test_failed_registration_persists_nothing() {
        let mut fixture = Fixture::new().await;
        fixture.director = MockDirector::failing();
        let h = harness(fixture).await;

        let err = h
            .service
            .provision_runtime(&provision_input(), "tenant", None)
            .await
            .unwrap_err();

        assert!(err.message().starts_with("Failed to register Runtime"));
        assert!(h.fixture.provisioner.provisioned().await.is_empty());
        assert!(h.queue.is_empty());
    }

    #[tokio::test]
    async fn test_failed_provisioning_unregisters_runtime() {
        let mut fixture = Fixture::new().await;
        fixture.provisioner = MockProvisioner::failing();
        let h = harness(fixture).await;

        let err = h
            .service
            .provision_runtime(&provision_input(), "tenant", None)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(err.message().starts_with("Failed to start provisioning"));
        assert_eq!(h.fixture.director.deleted().await, ["runtime-1"]);
        assert!(!h.fixture.director.is_registered("runtime-1").await);

        // The transaction was rolled back.
        let err = h.fixture.persistence.get_cluster("runtime-1").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_failed_compensation_keeps_original_error() {
        let mut fixture = Fixture::new().await;
        fixture.provisioner = MockProvisioner::failing();
        fixture.director.fail_delete = true;
        let h = harness(fixture).await;

        let err = h
            .service
            .provision_runtime(&provision_input(), "tenant", None)
            .await
            .unwrap_err();

        assert!(err.message().starts_with("Failed to start provisioning"));
        assert!(h.fixture.director.is_registered("runtime-1").await);
    }

    #[tokio::test]
    async fn test_second_provisioning_of_same_runtime_is_rejected() {
        let mut fixture = Fixture::new().await;
        fixture.director.runtime_id = Some("runtime-fixed".to_string());
        fixture.provisioner = MockProvisioner::ready_after(100);
        let h = harness(fixture).await;

        h.service
            .provision_runtime(&provision_input(), "tenant", None)
            .await
            .unwrap();
        let err = h
            .service
            .provision_runtime(&provision_input(), "tenant", None)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::BadRequest);
        assert_eq!(
            err.message(),
            "cannot start new operation for runtime-fixed Runtime while previous one is in progress"
        );
        assert_eq!(h.fixture.provisioner.provisioned().await.len(), 1);
    }

    #[tokio::test]
    async fn test_deprovision_while_in_progress_is_rejected() {
        let mut fixture = Fixture::new().await;
        fixture.provisioner = MockProvisioner::ready_after(100);
        let h = harness(fixture).await;
        let status = h
            .service
            .provision_runtime(&provision_input(), "tenant", None)
            .await
            .unwrap();

        let err = h
            .service
            .deprovision_runtime(&status.runtime_id, "tenant")
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::BadRequest);
        assert!(err.message().contains("previous one is in progress"));
        assert!(h.fixture.provisioner.deprovisioned().await.is_empty());
        let last = h
            .fixture
            .persistence
            .get_last_operation(&status.runtime_id)
            .await
            .unwrap();
        assert_eq!(last.id, status.id);
    }

    #[tokio::test]
    async fn test_deprovision_runtime() {
        let h = harness(Fixture::new().await).await;
        let runtime_id = provisioned(&h).await;

        let operation_id = h
            .service
            .deprovision_runtime(&runtime_id, "tenant")
            .await
            .unwrap();

        let status = h.service.runtime_operation_status(&operation_id).await.unwrap();
        assert_eq!(status.operation, OperationType::Deprovision);
        assert_eq!(status.message, "Deprovisioning started.");

        h.queue.drive_until_idle().await;
        let status = h.service.runtime_operation_status(&operation_id).await.unwrap();
        assert_eq!(status.state, OperationState::Succeeded);
        assert!(!h.fixture.director.is_registered(&runtime_id).await);
        assert!(h.fixture.persistence.get_cluster(&runtime_id).await.unwrap().deleted);
    }

    #[tokio::test]
    async fn test_deprovision_with_wrong_tenant() {
        let h = harness(Fixture::new().await).await;
        let runtime_id = provisioned(&h).await;

        let err = h
            .service
            .deprovision_runtime(&runtime_id, "other-tenant")
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::BadRequest);
    }

    #[tokio::test]
    async fn test_upgrade_without_agent_is_rejected() {
        let h = harness(Fixture::new().await).await;
        let runtime_id = provisioned(&h).await;

        let mut input = kyma_input("1.8");
        input.components.retain(|c| c.component != "compass-runtime-agent");
        let err = h
            .service
            .upgrade_runtime(
                &runtime_id,
                &UpgradeRuntimeInput {
                    kyma_config: Some(input),
                },
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::BadRequest);
        assert_eq!(
            err.message(),
            "Kyma components list does not contain Compass Runtime Agent"
        );
        let last = h.fixture.persistence.get_last_operation(&runtime_id).await.unwrap();
        assert_eq!(last.operation_type, OperationType::Provision);
    }

    #[tokio::test]
    async fn test_upgrade_and_roll_back() {
        let h = harness(Fixture::new().await).await;
        let runtime_id = provisioned(&h).await;
        let original = h.fixture.persistence.get_cluster(&runtime_id).await.unwrap();

        let status = h
            .service
            .upgrade_runtime(
                &runtime_id,
                &UpgradeRuntimeInput {
                    kyma_config: Some(kyma_input("1.8")),
                },
            )
            .await
            .unwrap();
        assert_eq!(status.message, UPGRADE_STARTED);

        // Rolling back a running upgrade is rejected.
        let err = h.service.roll_back_last_upgrade(&runtime_id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);

        h.queue.drive_until_idle().await;
        let upgraded = h.fixture.persistence.get_cluster(&runtime_id).await.unwrap();
        assert_ne!(upgraded.kyma_config.id, original.kyma_config.id);

        let runtime = h.service.roll_back_last_upgrade(&runtime_id).await.unwrap();
        assert_eq!(
            runtime.runtime_configuration.kyma_config.id,
            original.kyma_config.id
        );
        let upgrade = h
            .fixture
            .persistence
            .get_runtime_upgrade(&status.id)
            .await
            .unwrap();
        assert_eq!(upgrade.state, UpgradeState::RolledBack);
    }

    #[tokio::test]
    async fn test_roll_back_requires_upgrade() {
        let h = harness(Fixture::new().await).await;
        let runtime_id = provisioned(&h).await;

        let err = h.service.roll_back_last_upgrade(&runtime_id).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::BadRequest);
        assert!(err.message().contains("not an upgrade"));
    }

    #[test]
    fn test_check_rollback_target() {
        let mut operation = Operation::started(
            "op-1",
            "runtime-1",
            OperationType::Upgrade,
            Stage::StartingUpgrade,
            UPGRADE_STARTED,
            Utc::now(),
        );

        let err = check_rollback_target("runtime-1", &operation).unwrap_err();
        assert_eq!(
            err.message(),
            "cannot roll back runtime-1 Runtime while upgrade is in progress"
        );

        operation.state = OperationState::Succeeded;
        assert!(check_rollback_target("runtime-1", &operation).is_ok());
        operation.state = OperationState::Failed;
        assert!(check_rollback_target("runtime-1", &operation).is_ok());

        operation.operation_type = OperationType::ReconnectRuntime;
        let err = check_rollback_target("runtime-1", &operation).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
        assert!(err.message().contains("not an upgrade"));
    }

    #[tokio::test]
    async fn test_roll_back_after_newer_operation_is_rejected() {
        let h = harness(Fixture::new().await).await;
        let runtime_id = provisioned(&h).await;
        h.service
            .upgrade_runtime(
                &runtime_id,
                &UpgradeRuntimeInput {
                    kyma_config: Some(kyma_input("1.8")),
                },
            )
            .await
            .unwrap();
        h.queue.drive_until_idle().await;
        h.service.reconnect_runtime_agent(&runtime_id).await.unwrap();

        let err = h.service.roll_back_last_upgrade(&runtime_id).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::BadRequest);
        assert!(err.message().contains("not an upgrade"));
        let cluster = h.fixture.persistence.get_cluster(&runtime_id).await.unwrap();
        assert_eq!(cluster.kyma_config.release.version, "1.8");
    }

    #[tokio::test]
    async fn test_cluster_kind_without_backend_is_bad_request() {
        let fixture = Fixture::new().await;
        let router = ProvisionerRouter::new().with_gardener(Arc::new(fixture.provisioner.clone()));
        let h = harness_with(fixture, Arc::new(router)).await;

        let mut input = provision_input();
        input.cluster_config = Some(provisioner_core::input::ClusterConfigInput {
            gardener_config: None,
            gcp_config: Some(GcpConfigInput {
                name: "gcp-cluster".to_string(),
                project_name: "project".to_string(),
                kubernetes_version: "1.15".to_string(),
                number_of_nodes: 3,
                boot_disk_size_gb: 30,
                machine_type: "n1-standard-4".to_string(),
                region: "europe-west4".to_string(),
                zone: None,
            }),
        });
        let err = h
            .service
            .provision_runtime(&input, "tenant", None)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::BadRequest);
        assert_eq!(
            err.message(),
            "Failed to start provisioning: no provisioner configured for GCP clusters"
        );
        assert!(!h.fixture.director.is_registered("runtime-1").await);
        assert!(h.queue.is_empty());
    }

    #[tokio::test]
    async fn test_reconnect_runtime_agent() {
        let h = harness(Fixture::new().await).await;
        let runtime_id = provisioned(&h).await;

        let operation_id = h.service.reconnect_runtime_agent(&runtime_id).await.unwrap();
        h.queue.drive_until_idle().await;

        let status = h.service.runtime_operation_status(&operation_id).await.unwrap();
        assert_eq!(status.operation, OperationType::ReconnectRuntime);
        assert_eq!(status.state, OperationState::Succeeded);
        // Provisioning and reconnection each built one client.
        assert_eq!(h.fixture.agent_configs.kubeconfigs().await.len(), 2);
    }

    #[tokio::test]
    async fn test_status_queries_do_not_mutate() {
        let mut fixture = Fixture::new().await;
        fixture.provisioner = MockProvisioner::ready_after(100);
        let h = harness(fixture).await;
        let status = h
            .service
            .provision_runtime(&provision_input(), "tenant", None)
            .await
            .unwrap();

        for _ in 0..3 {
            let polled = h.service.runtime_operation_status(&status.id).await.unwrap();
            assert_eq!(polled.state, OperationState::InProgress);
        }
        let runtime = h.service.runtime_status(&status.runtime_id).await.unwrap();
        assert_eq!(runtime.last_operation_status.id, status.id);
        assert!(runtime.runtime_configuration.kubeconfig.is_none());
    }

    #[tokio::test]
    async fn test_unknown_operation_status() {
        let h = harness(Fixture::new().await).await;

        let err = h.service.runtime_operation_status("missing").await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(err.message().starts_with("Failed to get operation"));
    }
}

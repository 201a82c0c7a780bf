// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Staged operation executor.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use provisioner_core::model::{Operation, OperationState, OperationType, UpgradeState};
use provisioner_core::persistence::Persistence;
use tracing::{debug, error, info, warn};

use super::{Pipelines, StageOutcome};
use crate::director::{DirectorClient, RuntimeStatusCondition};
use crate::retry::{RetryPolicy, retry_on_error};

/// Message of an operation that finished successfully.
pub const OPERATION_SUCCEEDED: &str = "Operation succeeded.";

/// Whether and when the queue should run an operation again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessingResult {
    pub requeue: bool,
    pub delay: Duration,
}

impl ProcessingResult {
    pub fn done() -> Self {
        Self {
            requeue: false,
            delay: Duration::ZERO,
        }
    }

    pub fn after(delay: Duration) -> Self {
        Self {
            requeue: true,
            delay,
        }
    }
}

/// Advances one operation as far as it can go without waiting.
#[async_trait]
pub trait OperationExecutor: Send + Sync {
    async fn execute(&self, operation_id: &str) -> ProcessingResult;
}

/// Runs pipeline steps and records every outcome before moving on.
pub struct StagedExecutor {
    persistence: Arc<dyn Persistence>,
    director: Arc<dyn DirectorClient>,
    pipelines: Pipelines,
    retry: RetryPolicy,
    retry_delay: Duration,
}

impl StagedExecutor {
    /// `retry_delay` is how long a stage waits after a recoverable error.
    pub fn new(
        persistence: Arc<dyn Persistence>,
        director: Arc<dyn DirectorClient>,
        pipelines: Pipelines,
        retry: RetryPolicy,
        retry_delay: Duration,
    ) -> Self {
        Self {
            persistence,
            director,
            pipelines,
            retry,
            retry_delay,
        }
    }

    fn timed_out(operation: &Operation, timeout: Duration) -> bool {
        let since = operation
            .last_transition
            .unwrap_or(operation.start_timestamp);
        (Utc::now() - since).to_std().unwrap_or_default() > timeout
    }

    /// Persist a terminal state, retrying per policy.
    async fn finish(
        &self,
        operation: &Operation,
        state: OperationState,
        message: &str,
    ) -> ProcessingResult {
        let now = Utc::now();
        let result = retry_on_error(&self.retry, "update_operation_state", || {
            self.persistence
                .update_operation_state(&operation.id, state, message, now)
        })
        .await;

        match result {
            Ok(()) if state == OperationState::Succeeded => {
                info!(
                    operation_id = %operation.id,
                    runtime_id = %operation.cluster_id,
                    operation_type = %operation.operation_type,
                    "Operation succeeded"
                );
            }
            Ok(()) => {
                warn!(
                    operation_id = %operation.id,
                    runtime_id = %operation.cluster_id,
                    operation_type = %operation.operation_type,
                    message = %message,
                    "Operation failed"
                );
            }
            Err(e) => {
                // Left IN_PROGRESS; picked up again on the next resume.
                error!(
                    operation_id = %operation.id,
                    runtime_id = %operation.cluster_id,
                    state = %state,
                    error = %e,
                    "Failed to persist final operation state"
                );
                return ProcessingResult::done();
            }
        }

        if operation.operation_type == OperationType::Provision && state == OperationState::Failed {
            self.mark_runtime_failed(operation).await;
        }

        if operation.operation_type == OperationType::Upgrade && state == OperationState::Failed {
            let result = retry_on_error(&self.retry, "update_upgrade_state", || {
                self.persistence
                    .update_upgrade_state(&operation.id, UpgradeState::Failed)
            })
            .await;
            if let Err(e) = result {
                error!(
                    operation_id = %operation.id,
                    runtime_id = %operation.cluster_id,
                    error = %e,
                    "Failed to mark upgrade as failed"
                );
            }
        }

        ProcessingResult::done()
    }

    /// Show a failed provisioning in the directory. Best effort.
    async fn mark_runtime_failed(&self, operation: &Operation) {
        let result = match self.persistence.get_cluster(&operation.cluster_id).await {
            Ok(cluster) => self
                .director
                .set_runtime_status_condition(
                    &cluster.id,
                    RuntimeStatusCondition::Failed,
                    &cluster.tenant,
                )
                .await
                .map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        if let Err(e) = result {
            warn!(
                operation_id = %operation.id,
                runtime_id = %operation.cluster_id,
                error = %e,
                "Failed to set runtime status condition to FAILED"
            );
        }
    }
}

#[async_trait]
impl OperationExecutor for StagedExecutor {
    async fn execute(&self, operation_id: &str) -> ProcessingResult {
        loop {
            let operation = match self.persistence.get_operation(operation_id).await {
                Ok(operation) => operation,
                Err(e) if e.is_not_found() => {
                    warn!(operation_id = %operation_id, "Operation not found, dropping");
                    return ProcessingResult::done();
                }
                Err(e) => {
                    warn!(operation_id = %operation_id, error = %e, "Failed to load operation");
                    return ProcessingResult::after(self.retry_delay);
                }
            };

            if operation.is_finished() {
                debug!(
                    operation_id = %operation_id,
                    state = %operation.state,
                    "Operation already finished"
                );
                return ProcessingResult::done();
            }

            let pipeline = self.pipelines.for_type(operation.operation_type);
            let Some(step) = pipeline.step(operation.stage) else {
                let message = format!(
                    "stage {} is not part of {} operations",
                    operation.stage, operation.operation_type
                );
                return self.finish(&operation, OperationState::Failed, &message).await;
            };

            if Self::timed_out(&operation, step.timeout()) {
                let message = format!(
                    "timeout while processing operation at stage {}",
                    operation.stage
                );
                return self.finish(&operation, OperationState::Failed, &message).await;
            }

            let cluster = match self.persistence.get_cluster(&operation.cluster_id).await {
                Ok(cluster) => cluster,
                Err(e) if e.is_not_found() => {
                    let message = format!("cluster {} not found", operation.cluster_id);
                    return self.finish(&operation, OperationState::Failed, &message).await;
                }
                Err(e) => {
                    warn!(operation_id = %operation_id, error = %e, "Failed to load cluster");
                    return ProcessingResult::after(self.retry_delay);
                }
            };

            debug!(operation_id = %operation_id, stage = %operation.stage, "Running stage");
            let outcome = match step.run(&cluster, &operation).await {
                Ok(outcome) => outcome,
                Err(e) if e.recoverable => {
                    warn!(
                        operation_id = %operation_id,
                        stage = %operation.stage,
                        error = %e,
                        "Stage failed, will retry"
                    );
                    StageOutcome::Retry {
                        delay: self.retry_delay,
                    }
                }
                Err(e) => StageOutcome::Failed(e.message),
            };

            match outcome {
                StageOutcome::Retry { delay } => return ProcessingResult::after(delay),
                StageOutcome::Next { stage, delay } => {
                    let message = format!("Operation in progress. Stage {}", stage);
                    if let Err(e) = self
                        .persistence
                        .transition_operation(&operation.id, stage, &message, Utc::now())
                        .await
                    {
                        warn!(
                            operation_id = %operation_id,
                            stage = %stage,
                            error = %e,
                            "Failed to record stage transition"
                        );
                        return ProcessingResult::after(self.retry_delay);
                    }
                    info!(
                        operation_id = %operation_id,
                        from = %operation.stage,
                        to = %stage,
                        "Stage transition"
                    );
                    if !delay.is_zero() {
                        return ProcessingResult::after(delay);
                    }
                }
                StageOutcome::Succeeded => {
                    return self
                        .finish(&operation, OperationState::Succeeded, OPERATION_SUCCEEDED)
                        .await;
                }
                StageOutcome::Failed(message) => {
                    return self.finish(&operation, OperationState::Failed, &message).await;
                }
            }
        }
    }
}

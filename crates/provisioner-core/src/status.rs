// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Status payloads returned to API callers.

use serde::{Deserialize, Serialize};

use crate::model::{ClusterConfig, KymaConfig, OperationState, OperationType};

/// Snapshot of a single operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationStatus {
    pub id: String,
    pub operation: OperationType,
    pub state: OperationState,
    pub message: String,
    pub runtime_id: String,
}

/// Current configuration of a runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeConfiguration {
    pub cluster_config: ClusterConfig,
    pub kubeconfig: Option<String>,
    pub kyma_config: KymaConfig,
}

/// Last operation together with the runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeStatus {
    pub last_operation_status: OperationStatus,
    pub runtime_configuration: RuntimeConfiguration,
}

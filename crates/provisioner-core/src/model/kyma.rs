// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Kyma release and installation configuration.

use serde::{Deserialize, Serialize};

/// Installable Kyma release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Release {
    pub id: String,
    pub version: String,
    pub tiller_yaml: String,
    pub installer_yaml: String,
}

/// Single configuration override.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub key: String,
    pub value: String,
    /// Secret entries are delivered as Kubernetes Secrets, not ConfigMaps.
    #[serde(default)]
    pub secret: bool,
}

impl ConfigEntry {
    /// Plain, non-secret entry.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            secret: false,
        }
    }
}

/// Configuration of one Kyma component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KymaComponentConfig {
    pub id: String,
    pub component: String,
    pub namespace: String,
    pub source_url: Option<String>,
    pub configuration: Vec<ConfigEntry>,
    /// 1-based installation order.
    pub component_order: i64,
    pub kyma_config_id: String,
}

/// Versioned Kyma configuration applied to a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KymaConfig {
    pub id: String,
    pub release: Release,
    /// Components in installation order.
    pub components: Vec<KymaComponentConfig>,
    pub global_configuration: Vec<ConfigEntry>,
    pub cluster_id: String,
}

// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! On-demand Kyma releases.
//!
//! Development builds are not registered up front. Their artifacts are
//! published under `{base}/{version}/` and fetched the first time a runtime
//! asks for the version; the release is then stored like any other.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use provisioner_core::model::Release;
use provisioner_core::IdGenerator;
use provisioner_core::release::{
    ReleaseError, ReleaseProvider, ReleaseRepository, is_on_demand_version,
};
use tracing::info;

pub const DEFAULT_ARTIFACTS_URL: &str = "https://storage.googleapis.com/kyma-development-artifacts";

const TILLER_FILE: &str = "tiller.yaml";
const INSTALLER_FILE: &str = "kyma-installer-cluster.yaml";

/// [`ReleaseProvider`] downloading development builds.
pub struct OnDemandReleases {
    http: reqwest::Client,
    base_url: String,
    repository: Arc<dyn ReleaseRepository>,
    ids: Arc<dyn IdGenerator>,
}

impl OnDemandReleases {
    pub fn new(
        base_url: impl Into<String>,
        repository: Arc<dyn ReleaseRepository>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            repository,
            ids,
        }
    }

    async fn download(&self, version: &str, file: &str) -> Result<String, ReleaseError> {
        let url = format!("{}/{}/{}", self.base_url, version, file);
        let download_error = |details: String| ReleaseError::Download {
            version: version.to_string(),
            details,
        };

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| download_error(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(download_error(format!("{} returned HTTP {}", url, status)));
        }

        response.text().await.map_err(|e| download_error(e.to_string()))
    }
}

#[async_trait]
impl ReleaseProvider for OnDemandReleases {
    async fn get_release_by_version(
        &self,
        version: &str,
    ) -> Result<Option<Release>, ReleaseError> {
        if !is_on_demand_version(version) {
            return Ok(None);
        }

        let tiller_yaml = self.download(version, TILLER_FILE).await?;
        let installer_yaml = self.download(version, INSTALLER_FILE).await?;

        let release = self
            .repository
            .save_release(&Release {
                id: self.ids.new_id(),
                version: version.to_string(),
                tiller_yaml,
                installer_yaml,
            })
            .await?;

        info!(version = %version, release_id = %release.id, "On-demand Kyma release stored");
        Ok(Some(release))
    }
}

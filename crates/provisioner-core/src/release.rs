// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Kyma release resolution.
//!
//! Releases are looked up by version across an ordered, fixed list of
//! [`ReleaseProvider`]s. Registered releases live in the `kyma_release`
//! table; development builds (`PR-<n>`, `master-<sha>`, `master`) can be
//! produced on demand by a provider that downloads their artifacts.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::SqlitePool;
use tracing::debug;

use crate::model::Release;

/// Release lookup errors.
#[derive(Debug, thiserror::Error)]
pub enum ReleaseError {
    /// No release with this version and it cannot be built on demand.
    #[error("Kyma release version {0} not found")]
    NotFound(String),
    /// On-demand version that no provider could produce.
    #[error("on-demand Kyma release {0} is not available")]
    OnDemandUnavailable(String),
    /// Artifact download failed.
    #[error("failed to download Kyma release {version} artifacts: {details}")]
    Download { version: String, details: String },
    /// Release storage failed.
    #[error("release repository error: {0}")]
    Repository(String),
}

/// A source of Kyma releases.
#[async_trait]
pub trait ReleaseProvider: Send + Sync {
    /// Release for `version`, or `None` if this provider does not know it.
    async fn get_release_by_version(&self, version: &str)
    -> Result<Option<Release>, ReleaseError>;
}

/// Persistent store of registered releases.
#[async_trait]
pub trait ReleaseRepository: ReleaseProvider {
    /// Store a release; an existing release with the same version is kept.
    async fn save_release(&self, release: &Release) -> Result<Release, ReleaseError>;
}

/// Whether `version` names a development build rather than a registered release.
pub fn is_on_demand_version(version: &str) -> bool {
    if version == "master" {
        return true;
    }
    if let Some(number) = version.strip_prefix("PR-") {
        return !number.is_empty() && number.chars().all(|c| c.is_ascii_digit());
    }
    if let Some(sha) = version.strip_prefix("master-") {
        return !sha.is_empty() && sha.chars().all(|c| c.is_ascii_hexdigit());
    }
    false
}

/// Resolves releases across a fixed list of providers.
#[derive(Clone)]
pub struct ReleaseResolver {
    providers: Arc<[Arc<dyn ReleaseProvider>]>,
}

impl ReleaseResolver {
    /// Resolver asking `providers` in order.
    pub fn new(providers: Vec<Arc<dyn ReleaseProvider>>) -> Self {
        Self {
            providers: providers.into(),
        }
    }

    /// First release any provider returns for `version`.
    pub async fn resolve(&self, version: &str) -> Result<Release, ReleaseError> {
        for provider in self.providers.iter() {
            if let Some(release) = provider.get_release_by_version(version).await? {
                return Ok(release);
            }
        }

        if is_on_demand_version(version) {
            Err(ReleaseError::OnDemandUnavailable(version.to_string()))
        } else {
            Err(ReleaseError::NotFound(version.to_string()))
        }
    }
}

#[async_trait]
impl ReleaseProvider for ReleaseResolver {
    async fn get_release_by_version(
        &self,
        version: &str,
    ) -> Result<Option<Release>, ReleaseError> {
        match self.resolve(version).await {
            Ok(release) => Ok(Some(release)),
            Err(ReleaseError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[derive(sqlx::FromRow)]
struct ReleaseRow {
    id: String,
    version: String,
    tiller_yaml: String,
    installer_yaml: String,
}

impl From<ReleaseRow> for Release {
    fn from(row: ReleaseRow) -> Self {
        Release {
            id: row.id,
            version: row.version,
            tiller_yaml: row.tiller_yaml,
            installer_yaml: row.installer_yaml,
        }
    }
}

/// Release repository backed by the `kyma_release` table.
#[derive(Clone)]
pub struct SqliteReleaseRepository {
    pool: SqlitePool,
}

impl SqliteReleaseRepository {
    /// Repository over an already migrated pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReleaseProvider for SqliteReleaseRepository {
    async fn get_release_by_version(
        &self,
        version: &str,
    ) -> Result<Option<Release>, ReleaseError> {
        let row = sqlx::query_as::<_, ReleaseRow>(
            r#"
            SELECT id, version, tiller_yaml, installer_yaml
            FROM kyma_release
            WHERE version = ?1
            "#,
        )
        .bind(version)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ReleaseError::Repository(e.to_string()))?;

        Ok(row.map(Release::from))
    }
}

#[async_trait]
impl ReleaseRepository for SqliteReleaseRepository {
    async fn save_release(&self, release: &Release) -> Result<Release, ReleaseError> {
        sqlx::query(
            r#"
            INSERT INTO kyma_release (id, version, tiller_yaml, installer_yaml)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (version) DO NOTHING
            "#,
        )
        .bind(&release.id)
        .bind(&release.version)
        .bind(&release.tiller_yaml)
        .bind(&release.installer_yaml)
        .execute(&self.pool)
        .await
        .map_err(|e| ReleaseError::Repository(e.to_string()))?;

        debug!(version = %release.version, "Kyma release saved");

        self.get_release_by_version(&release.version)
            .await?
            .ok_or_else(|| ReleaseError::NotFound(release.version.clone()))
    }
}

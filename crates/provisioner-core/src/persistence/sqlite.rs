// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed persistence implementation.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Sqlite, SqliteConnection, SqlitePool, Transaction};
use tracing::debug;

use crate::migrations;
use crate::model::{
    Cluster, ClusterConfig, ConfigEntry, GardenerConfig, GcpConfig, KymaComponentConfig,
    KymaConfig, Operation, OperationState, OperationType, ProviderSpecificConfig, Release,
    RuntimeUpgrade, Stage, UpgradeState,
};

use super::{Persistence, PersistenceError, WriteSession};

fn db_error(operation: &'static str) -> impl FnOnce(sqlx::Error) -> PersistenceError {
    move |e| match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            PersistenceError::Conflict(format!("{}: {}", operation, db.message()))
        }
        _ => PersistenceError::Database {
            operation: operation.to_string(),
            details: e.to_string(),
        },
    }
}

fn to_json(entries: &[ConfigEntry]) -> Result<String, PersistenceError> {
    serde_json::to_string(entries).map_err(|e| PersistenceError::Serialization(e.to_string()))
}

fn from_json(raw: &str) -> Result<Vec<ConfigEntry>, PersistenceError> {
    serde_json::from_str(raw).map_err(|e| PersistenceError::Serialization(e.to_string()))
}

// ============================================================================
// Rows
// ============================================================================

#[derive(sqlx::FromRow)]
struct OperationRow {
    id: String,
    #[sqlx(rename = "type")]
    operation_type: String,
    state: String,
    stage: String,
    message: String,
    start_timestamp: DateTime<Utc>,
    end_timestamp: Option<DateTime<Utc>>,
    last_transition: Option<DateTime<Utc>>,
    cluster_id: String,
}

impl TryFrom<OperationRow> for Operation {
    type Error = PersistenceError;

    fn try_from(row: OperationRow) -> Result<Self, Self::Error> {
        let invalid = |what: &str, value: &str| {
            PersistenceError::Serialization(format!(
                "operation {} has unknown {} {}",
                row.id, what, value
            ))
        };

        Ok(Operation {
            operation_type: OperationType::parse(&row.operation_type)
                .ok_or_else(|| invalid("type", &row.operation_type))?,
            state: OperationState::parse(&row.state).ok_or_else(|| invalid("state", &row.state))?,
            stage: Stage::parse(&row.stage).ok_or_else(|| invalid("stage", &row.stage))?,
            message: row.message,
            start_timestamp: row.start_timestamp,
            end_timestamp: row.end_timestamp,
            last_transition: row.last_transition,
            cluster_id: row.cluster_id,
            id: row.id,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ClusterRow {
    id: String,
    runtime_name: String,
    tenant: String,
    sub_account_id: Option<String>,
    credentials_secret_name: String,
    kubeconfig: Option<String>,
    internal_state: Option<Vec<u8>>,
    creation_timestamp: DateTime<Utc>,
    deleted: bool,
    active_kyma_config_id: Option<String>,
}

#[derive(sqlx::FromRow)]
struct GardenerConfigRow {
    id: String,
    cluster_id: String,
    name: String,
    project_name: String,
    kubernetes_version: String,
    volume_size_gb: i64,
    machine_type: String,
    region: String,
    provider: String,
    seed: String,
    target_secret: String,
    disk_type: String,
    worker_cidr: String,
    autoscaler_min: i64,
    autoscaler_max: i64,
    max_surge: i64,
    max_unavailable: i64,
    provider_specific_config: String,
}

impl TryFrom<GardenerConfigRow> for GardenerConfig {
    type Error = PersistenceError;

    fn try_from(row: GardenerConfigRow) -> Result<Self, Self::Error> {
        let provider_config =
            ProviderSpecificConfig::decode(&row.provider, &row.provider_specific_config)
                .map_err(PersistenceError::Serialization)?;

        Ok(GardenerConfig {
            id: row.id,
            cluster_id: row.cluster_id,
            name: row.name,
            project_name: row.project_name,
            kubernetes_version: row.kubernetes_version,
            volume_size_gb: row.volume_size_gb,
            machine_type: row.machine_type,
            region: row.region,
            provider: row.provider,
            seed: row.seed,
            target_secret: row.target_secret,
            disk_type: row.disk_type,
            worker_cidr: row.worker_cidr,
            autoscaler_min: row.autoscaler_min,
            autoscaler_max: row.autoscaler_max,
            max_surge: row.max_surge,
            max_unavailable: row.max_unavailable,
            provider_config,
        })
    }
}

#[derive(sqlx::FromRow)]
struct GcpConfigRow {
    id: String,
    cluster_id: String,
    name: String,
    project_name: String,
    kubernetes_version: String,
    number_of_nodes: i64,
    boot_disk_size_gb: i64,
    machine_type: String,
    region: String,
    zone: Option<String>,
}

impl From<GcpConfigRow> for GcpConfig {
    fn from(row: GcpConfigRow) -> Self {
        GcpConfig {
            id: row.id,
            cluster_id: row.cluster_id,
            name: row.name,
            project_name: row.project_name,
            kubernetes_version: row.kubernetes_version,
            number_of_nodes: row.number_of_nodes,
            boot_disk_size_gb: row.boot_disk_size_gb,
            machine_type: row.machine_type,
            region: row.region,
            zone: row.zone,
        }
    }
}

#[derive(sqlx::FromRow)]
struct KymaConfigRow {
    id: String,
    cluster_id: String,
    global_configuration: String,
    release_id: String,
    version: String,
    tiller_yaml: String,
    installer_yaml: String,
}

#[derive(sqlx::FromRow)]
struct ModuleRow {
    id: String,
    module: String,
    namespace: String,
    source_url: Option<String>,
    configuration: String,
    component_order: i64,
    kyma_config_id: String,
}

impl TryFrom<ModuleRow> for KymaComponentConfig {
    type Error = PersistenceError;

    fn try_from(row: ModuleRow) -> Result<Self, Self::Error> {
        Ok(KymaComponentConfig {
            configuration: from_json(&row.configuration)?,
            id: row.id,
            component: row.module,
            namespace: row.namespace,
            source_url: row.source_url,
            component_order: row.component_order,
            kyma_config_id: row.kyma_config_id,
        })
    }
}

#[derive(sqlx::FromRow)]
struct RuntimeUpgradeRow {
    id: String,
    state: String,
    operation_id: String,
    pre_upgrade_kyma_config_id: String,
    post_upgrade_kyma_config_id: String,
}

impl TryFrom<RuntimeUpgradeRow> for RuntimeUpgrade {
    type Error = PersistenceError;

    fn try_from(row: RuntimeUpgradeRow) -> Result<Self, Self::Error> {
        let state = UpgradeState::parse(&row.state).ok_or_else(|| {
            PersistenceError::Serialization(format!(
                "runtime upgrade {} has unknown state {}",
                row.id, row.state
            ))
        })?;

        Ok(RuntimeUpgrade {
            id: row.id,
            state,
            operation_id: row.operation_id,
            pre_upgrade_kyma_config_id: row.pre_upgrade_kyma_config_id,
            post_upgrade_kyma_config_id: row.post_upgrade_kyma_config_id,
        })
    }
}

const OPERATION_COLUMNS: &str = "id, type, state, stage, message, start_timestamp, end_timestamp, last_transition, cluster_id";

// ============================================================================
// Shared statements
// ============================================================================

async fn insert_operation_row(
    conn: &mut SqliteConnection,
    operation: &Operation,
) -> Result<(), PersistenceError> {
    sqlx::query(
        r#"
        INSERT INTO operation (
            id, type, state, stage, message, start_timestamp, end_timestamp, last_transition,
            cluster_id
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        "#,
    )
    .bind(&operation.id)
    .bind(operation.operation_type.as_str())
    .bind(operation.state.as_str())
    .bind(operation.stage.as_str())
    .bind(&operation.message)
    .bind(operation.start_timestamp)
    .bind(operation.end_timestamp)
    .bind(operation.last_transition)
    .bind(&operation.cluster_id)
    .execute(conn)
    .await
    .map_err(db_error("insert_operation"))?;

    Ok(())
}

async fn insert_kyma_config_rows(
    conn: &mut SqliteConnection,
    kyma_config: &KymaConfig,
) -> Result<(), PersistenceError> {
    sqlx::query(
        r#"
        INSERT INTO kyma_config (id, release_id, cluster_id, global_configuration)
        VALUES (?1, ?2, ?3, ?4)
        "#,
    )
    .bind(&kyma_config.id)
    .bind(&kyma_config.release.id)
    .bind(&kyma_config.cluster_id)
    .bind(to_json(&kyma_config.global_configuration)?)
    .execute(&mut *conn)
    .await
    .map_err(db_error("insert_kyma_config"))?;

    for component in &kyma_config.components {
        sqlx::query(
            r#"
            INSERT INTO kyma_config_module (
                id, module, namespace, source_url, configuration, component_order, kyma_config_id
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&component.id)
        .bind(&component.component)
        .bind(&component.namespace)
        .bind(&component.source_url)
        .bind(to_json(&component.configuration)?)
        .bind(component.component_order)
        .bind(&kyma_config.id)
        .execute(&mut *conn)
        .await
        .map_err(db_error("insert_kyma_config_module"))?;
    }

    Ok(())
}

async fn insert_cluster_config_row(
    conn: &mut SqliteConnection,
    runtime_id: &str,
    config: &ClusterConfig,
) -> Result<(), PersistenceError> {
    match config {
        ClusterConfig::Gardener(gardener) => {
            sqlx::query(
                r#"
                INSERT INTO gardener_config (
                    id, cluster_id, name, project_name, kubernetes_version, volume_size_gb,
                    machine_type, region, provider, seed, target_secret, disk_type, worker_cidr,
                    autoscaler_min, autoscaler_max, max_surge, max_unavailable,
                    provider_specific_config
                )
                VALUES (
                    ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18
                )
                "#,
            )
            .bind(&gardener.id)
            .bind(runtime_id)
            .bind(&gardener.name)
            .bind(&gardener.project_name)
            .bind(&gardener.kubernetes_version)
            .bind(gardener.volume_size_gb)
            .bind(&gardener.machine_type)
            .bind(&gardener.region)
            .bind(&gardener.provider)
            .bind(&gardener.seed)
            .bind(&gardener.target_secret)
            .bind(&gardener.disk_type)
            .bind(&gardener.worker_cidr)
            .bind(gardener.autoscaler_min)
            .bind(gardener.autoscaler_max)
            .bind(gardener.max_surge)
            .bind(gardener.max_unavailable)
            .bind(gardener.provider_config.to_json())
            .execute(conn)
            .await
            .map_err(db_error("insert_gardener_config"))?;
        }
        ClusterConfig::Gcp(gcp) => {
            sqlx::query(
                r#"
                INSERT INTO gcp_config (
                    id, cluster_id, name, project_name, kubernetes_version, number_of_nodes,
                    boot_disk_size_gb, machine_type, region, zone
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                "#,
            )
            .bind(&gcp.id)
            .bind(runtime_id)
            .bind(&gcp.name)
            .bind(&gcp.project_name)
            .bind(&gcp.kubernetes_version)
            .bind(gcp.number_of_nodes)
            .bind(gcp.boot_disk_size_gb)
            .bind(&gcp.machine_type)
            .bind(&gcp.region)
            .bind(&gcp.zone)
            .execute(conn)
            .await
            .map_err(db_error("insert_gcp_config"))?;
        }
    }

    Ok(())
}

async fn set_active_kyma_config_row(
    conn: &mut SqliteConnection,
    runtime_id: &str,
    kyma_config_id: &str,
) -> Result<(), PersistenceError> {
    let result = sqlx::query("UPDATE cluster SET active_kyma_config_id = ?1 WHERE id = ?2")
        .bind(kyma_config_id)
        .bind(runtime_id)
        .execute(conn)
        .await
        .map_err(db_error("set_active_kyma_config"))?;

    if result.rows_affected() == 0 {
        return Err(PersistenceError::not_found("cluster", runtime_id));
    }
    Ok(())
}

async fn update_upgrade_state_row(
    conn: &mut SqliteConnection,
    operation_id: &str,
    state: UpgradeState,
) -> Result<(), PersistenceError> {
    let result = sqlx::query("UPDATE runtime_upgrade SET state = ?1 WHERE operation_id = ?2")
        .bind(state.as_str())
        .bind(operation_id)
        .execute(conn)
        .await
        .map_err(db_error("update_upgrade_state"))?;

    if result.rows_affected() == 0 {
        return Err(PersistenceError::not_found("runtime upgrade", operation_id));
    }
    Ok(())
}

async fn last_operation_row(
    conn: &mut SqliteConnection,
    runtime_id: &str,
) -> Result<Option<Operation>, PersistenceError> {
    let row = sqlx::query_as::<_, OperationRow>(&format!(
        "SELECT {} FROM operation WHERE cluster_id = ?1 ORDER BY start_timestamp DESC, rowid DESC LIMIT 1",
        OPERATION_COLUMNS
    ))
    .bind(runtime_id)
    .fetch_optional(conn)
    .await
    .map_err(db_error("get_last_operation"))?;

    row.map(Operation::try_from).transpose()
}

// ============================================================================
// SqlitePersistence
// ============================================================================

/// SQLite-backed persistence provider.
#[derive(Clone)]
pub struct SqlitePersistence {
    pool: SqlitePool,
}

impl SqlitePersistence {
    /// Create a new SQLite persistence provider from an already migrated pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) the database file at `path` and migrate it.
    ///
    /// Parent directories are created when missing.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| PersistenceError::Database {
                operation: "create_dir".to_string(),
                details: format!("Failed to create directory {:?}: {}", parent, e),
            })?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.to_string_lossy());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .map_err(|e| PersistenceError::Database {
                operation: "connect".to_string(),
                details: format!("Failed to connect to SQLite at {:?}: {}", path, e),
            })?;

        migrations::run(&pool)
            .await
            .map_err(|e| PersistenceError::Database {
                operation: "migrate".to_string(),
                details: e.to_string(),
            })?;

        Ok(Self { pool })
    }

    /// Underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn load_cluster_config(
        &self,
        runtime_id: &str,
    ) -> Result<ClusterConfig, PersistenceError> {
        let gardener = sqlx::query_as::<_, GardenerConfigRow>(
            r#"
            SELECT id, cluster_id, name, project_name, kubernetes_version, volume_size_gb,
                   machine_type, region, provider, seed, target_secret, disk_type, worker_cidr,
                   autoscaler_min, autoscaler_max, max_surge, max_unavailable,
                   provider_specific_config
            FROM gardener_config
            WHERE cluster_id = ?1
            "#,
        )
        .bind(runtime_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("get_gardener_config"))?;

        if let Some(row) = gardener {
            return Ok(ClusterConfig::Gardener(row.try_into()?));
        }

        let gcp = sqlx::query_as::<_, GcpConfigRow>(
            r#"
            SELECT id, cluster_id, name, project_name, kubernetes_version, number_of_nodes,
                   boot_disk_size_gb, machine_type, region, zone
            FROM gcp_config
            WHERE cluster_id = ?1
            "#,
        )
        .bind(runtime_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("get_gcp_config"))?;

        match gcp {
            Some(row) => Ok(ClusterConfig::Gcp(row.into())),
            None => Err(PersistenceError::Serialization(format!(
                "cluster {} has no provider config",
                runtime_id
            ))),
        }
    }
}

#[async_trait]
impl Persistence for SqlitePersistence {
    async fn get_cluster(&self, runtime_id: &str) -> Result<Cluster, PersistenceError> {
        let row = sqlx::query_as::<_, ClusterRow>(
            r#"
            SELECT id, runtime_name, tenant, sub_account_id, credentials_secret_name, kubeconfig,
                   internal_state, creation_timestamp, deleted, active_kyma_config_id
            FROM cluster
            WHERE id = ?1
            "#,
        )
        .bind(runtime_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("get_cluster"))?
        .ok_or_else(|| PersistenceError::not_found("cluster", runtime_id))?;

        let kyma_config_id = row.active_kyma_config_id.as_deref().ok_or_else(|| {
            PersistenceError::Serialization(format!("cluster {} has no active Kyma config", row.id))
        })?;
        let kyma_config = self.get_kyma_config(kyma_config_id).await?;
        let cluster_config = self.load_cluster_config(&row.id).await?;

        Ok(Cluster {
            id: row.id,
            runtime_name: row.runtime_name,
            tenant: row.tenant,
            sub_account_id: row.sub_account_id,
            credentials_secret_name: row.credentials_secret_name,
            cluster_config,
            kyma_config,
            kubeconfig: row.kubeconfig,
            internal_state: row.internal_state,
            creation_timestamp: Some(row.creation_timestamp),
            deleted: row.deleted,
        })
    }

    async fn get_operation(&self, operation_id: &str) -> Result<Operation, PersistenceError> {
        let row = sqlx::query_as::<_, OperationRow>(&format!(
            "SELECT {} FROM operation WHERE id = ?1",
            OPERATION_COLUMNS
        ))
        .bind(operation_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("get_operation"))?
        .ok_or_else(|| PersistenceError::not_found("operation", operation_id))?;

        row.try_into()
    }

    async fn get_last_operation(&self, runtime_id: &str) -> Result<Operation, PersistenceError> {
        let mut conn = self.pool.acquire().await.map_err(db_error("acquire"))?;
        last_operation_row(&mut conn, runtime_id)
            .await?
            .ok_or_else(|| PersistenceError::not_found("last operation of runtime", runtime_id))
    }

    async fn list_in_progress_operations(&self) -> Result<Vec<Operation>, PersistenceError> {
        let rows = sqlx::query_as::<_, OperationRow>(&format!(
            "SELECT {} FROM operation WHERE state = ?1 ORDER BY start_timestamp ASC, rowid ASC",
            OPERATION_COLUMNS
        ))
        .bind(OperationState::InProgress.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("list_in_progress_operations"))?;

        rows.into_iter().map(Operation::try_from).collect()
    }

    async fn get_runtime_upgrade(
        &self,
        operation_id: &str,
    ) -> Result<RuntimeUpgrade, PersistenceError> {
        sqlx::query_as::<_, RuntimeUpgradeRow>(
            r#"
            SELECT id, state, operation_id, pre_upgrade_kyma_config_id, post_upgrade_kyma_config_id
            FROM runtime_upgrade
            WHERE operation_id = ?1
            "#,
        )
        .bind(operation_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("get_runtime_upgrade"))?
        .ok_or_else(|| PersistenceError::not_found("runtime upgrade", operation_id))?
        .try_into()
    }

    async fn get_kyma_config(&self, kyma_config_id: &str) -> Result<KymaConfig, PersistenceError> {
        let row = sqlx::query_as::<_, KymaConfigRow>(
            r#"
            SELECT kc.id, kc.cluster_id, kc.global_configuration, kc.release_id,
                   kr.version, kr.tiller_yaml, kr.installer_yaml
            FROM kyma_config kc
            JOIN kyma_release kr ON kr.id = kc.release_id
            WHERE kc.id = ?1
            "#,
        )
        .bind(kyma_config_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("get_kyma_config"))?
        .ok_or_else(|| PersistenceError::not_found("kyma config", kyma_config_id))?;

        let components = sqlx::query_as::<_, ModuleRow>(
            r#"
            SELECT id, module, namespace, source_url, configuration, component_order, kyma_config_id
            FROM kyma_config_module
            WHERE kyma_config_id = ?1
            ORDER BY component_order ASC
            "#,
        )
        .bind(kyma_config_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("get_kyma_config_modules"))?
        .into_iter()
        .map(KymaComponentConfig::try_from)
        .collect::<Result<Vec<_>, _>>()?;

        Ok(KymaConfig {
            global_configuration: from_json(&row.global_configuration)?,
            release: Release {
                id: row.release_id,
                version: row.version,
                tiller_yaml: row.tiller_yaml,
                installer_yaml: row.installer_yaml,
            },
            id: row.id,
            components,
            cluster_id: row.cluster_id,
        })
    }

    async fn get_tenant(&self, runtime_id: &str) -> Result<String, PersistenceError> {
        sqlx::query_scalar::<_, String>("SELECT tenant FROM cluster WHERE id = ?1")
            .bind(runtime_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("get_tenant"))?
            .ok_or_else(|| PersistenceError::not_found("cluster", runtime_id))
    }

    async fn get_tenant_for_operation(
        &self,
        operation_id: &str,
    ) -> Result<String, PersistenceError> {
        sqlx::query_scalar::<_, String>(
            r#"
            SELECT c.tenant
            FROM operation o
            JOIN cluster c ON c.id = o.cluster_id
            WHERE o.id = ?1
            "#,
        )
        .bind(operation_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("get_tenant_for_operation"))?
        .ok_or_else(|| PersistenceError::not_found("operation", operation_id))
    }

    async fn insert_operation(&self, operation: &Operation) -> Result<(), PersistenceError> {
        let mut conn = self.pool.acquire().await.map_err(db_error("acquire"))?;
        insert_operation_row(&mut conn, operation).await
    }

    async fn update_operation_state(
        &self,
        operation_id: &str,
        state: OperationState,
        message: &str,
        at: DateTime<Utc>,
    ) -> Result<(), PersistenceError> {
        let result = if state.is_terminal() {
            sqlx::query(
                r#"
                UPDATE operation
                SET state = ?1, message = ?2, stage = ?3, end_timestamp = ?4, last_transition = ?4
                WHERE id = ?5
                "#,
            )
            .bind(state.as_str())
            .bind(message)
            .bind(Stage::Finished.as_str())
            .bind(at)
            .bind(operation_id)
            .execute(&self.pool)
            .await
        } else {
            sqlx::query(
                "UPDATE operation SET state = ?1, message = ?2, last_transition = ?3 WHERE id = ?4",
            )
            .bind(state.as_str())
            .bind(message)
            .bind(at)
            .bind(operation_id)
            .execute(&self.pool)
            .await
        }
        .map_err(db_error("update_operation_state"))?;

        if result.rows_affected() == 0 {
            return Err(PersistenceError::not_found("operation", operation_id));
        }
        debug!(operation_id = %operation_id, state = %state, "Operation state updated");
        Ok(())
    }

    async fn transition_operation(
        &self,
        operation_id: &str,
        stage: Stage,
        message: &str,
        at: DateTime<Utc>,
    ) -> Result<(), PersistenceError> {
        let result = sqlx::query(
            r#"
            UPDATE operation
            SET stage = ?1, message = ?2, last_transition = ?3
            WHERE id = ?4 AND state = ?5
            "#,
        )
        .bind(stage.as_str())
        .bind(message)
        .bind(at)
        .bind(operation_id)
        .bind(OperationState::InProgress.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_error("transition_operation"))?;

        if result.rows_affected() == 0 {
            return Err(PersistenceError::Conflict(format!(
                "operation {} is not in progress",
                operation_id
            )));
        }
        Ok(())
    }

    async fn update_cluster_kubeconfig(
        &self,
        runtime_id: &str,
        kubeconfig: &str,
        internal_state: Option<&[u8]>,
    ) -> Result<(), PersistenceError> {
        let result = sqlx::query(
            r#"
            UPDATE cluster
            SET kubeconfig = ?1, internal_state = COALESCE(?2, internal_state)
            WHERE id = ?3
            "#,
        )
        .bind(kubeconfig)
        .bind(internal_state)
        .bind(runtime_id)
        .execute(&self.pool)
        .await
        .map_err(db_error("update_cluster_kubeconfig"))?;

        if result.rows_affected() == 0 {
            return Err(PersistenceError::not_found("cluster", runtime_id));
        }
        Ok(())
    }

    async fn update_upgrade_state(
        &self,
        operation_id: &str,
        state: UpgradeState,
    ) -> Result<(), PersistenceError> {
        let mut conn = self.pool.acquire().await.map_err(db_error("acquire"))?;
        update_upgrade_state_row(&mut conn, operation_id, state).await
    }

    async fn mark_cluster_deleted(&self, runtime_id: &str) -> Result<(), PersistenceError> {
        let result = sqlx::query("UPDATE cluster SET deleted = 1 WHERE id = ?1")
            .bind(runtime_id)
            .execute(&self.pool)
            .await
            .map_err(db_error("mark_cluster_deleted"))?;

        if result.rows_affected() == 0 {
            return Err(PersistenceError::not_found("cluster", runtime_id));
        }
        Ok(())
    }

    async fn cleanup_cluster_data(&self, runtime_id: &str) -> Result<(), PersistenceError> {
        let mut tx = self.pool.begin().await.map_err(db_error("begin"))?;

        let statements = [
            "DELETE FROM runtime_upgrade WHERE operation_id IN (SELECT id FROM operation WHERE cluster_id = ?1)",
            "DELETE FROM operation WHERE cluster_id = ?1",
            "DELETE FROM kyma_config_module WHERE kyma_config_id IN (SELECT id FROM kyma_config WHERE cluster_id = ?1)",
            "DELETE FROM kyma_config WHERE cluster_id = ?1",
            "DELETE FROM gardener_config WHERE cluster_id = ?1",
            "DELETE FROM gcp_config WHERE cluster_id = ?1",
            "DELETE FROM cluster WHERE id = ?1",
        ];
        for statement in statements {
            sqlx::query(statement)
                .bind(runtime_id)
                .execute(&mut *tx)
                .await
                .map_err(db_error("cleanup_cluster_data"))?;
        }

        tx.commit().await.map_err(db_error("commit"))?;
        debug!(runtime_id = %runtime_id, "Cluster data removed");
        Ok(())
    }

    async fn begin(&self) -> Result<Box<dyn WriteSession>, PersistenceError> {
        let tx = self.pool.begin().await.map_err(db_error("begin"))?;
        Ok(Box::new(SqliteWriteSession { tx }))
    }
}

/// Write session over a SQLite transaction.
pub struct SqliteWriteSession {
    tx: Transaction<'static, Sqlite>,
}

#[async_trait]
impl WriteSession for SqliteWriteSession {
    async fn insert_cluster(&mut self, cluster: &Cluster) -> Result<(), PersistenceError> {
        sqlx::query(
            r#"
            INSERT INTO cluster (
                id, runtime_name, tenant, sub_account_id, credentials_secret_name, kubeconfig,
                internal_state, creation_timestamp, deleted
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&cluster.id)
        .bind(&cluster.runtime_name)
        .bind(&cluster.tenant)
        .bind(&cluster.sub_account_id)
        .bind(&cluster.credentials_secret_name)
        .bind(&cluster.kubeconfig)
        .bind(&cluster.internal_state)
        .bind(cluster.creation_timestamp.unwrap_or_else(Utc::now))
        .bind(cluster.deleted)
        .execute(&mut *self.tx)
        .await
        .map_err(db_error("insert_cluster"))?;

        insert_cluster_config_row(&mut self.tx, &cluster.id, &cluster.cluster_config).await?;
        insert_kyma_config_rows(&mut self.tx, &cluster.kyma_config).await?;
        set_active_kyma_config_row(&mut self.tx, &cluster.id, &cluster.kyma_config.id).await
    }

    async fn insert_kyma_config(
        &mut self,
        kyma_config: &KymaConfig,
    ) -> Result<(), PersistenceError> {
        insert_kyma_config_rows(&mut self.tx, kyma_config).await
    }

    async fn insert_operation(&mut self, operation: &Operation) -> Result<(), PersistenceError> {
        insert_operation_row(&mut self.tx, operation).await
    }

    async fn insert_runtime_upgrade(
        &mut self,
        upgrade: &RuntimeUpgrade,
    ) -> Result<(), PersistenceError> {
        sqlx::query(
            r#"
            INSERT INTO runtime_upgrade (
                id, state, operation_id, pre_upgrade_kyma_config_id, post_upgrade_kyma_config_id
            )
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(&upgrade.id)
        .bind(upgrade.state.as_str())
        .bind(&upgrade.operation_id)
        .bind(&upgrade.pre_upgrade_kyma_config_id)
        .bind(&upgrade.post_upgrade_kyma_config_id)
        .execute(&mut *self.tx)
        .await
        .map_err(db_error("insert_runtime_upgrade"))?;

        Ok(())
    }

    async fn set_active_kyma_config(
        &mut self,
        runtime_id: &str,
        kyma_config_id: &str,
    ) -> Result<(), PersistenceError> {
        set_active_kyma_config_row(&mut self.tx, runtime_id, kyma_config_id).await
    }

    async fn update_upgrade_state(
        &mut self,
        operation_id: &str,
        state: UpgradeState,
    ) -> Result<(), PersistenceError> {
        update_upgrade_state_row(&mut self.tx, operation_id, state).await
    }

    async fn get_last_operation(
        &mut self,
        runtime_id: &str,
    ) -> Result<Option<Operation>, PersistenceError> {
        last_operation_row(&mut self.tx, runtime_id).await
    }

    async fn commit(self: Box<Self>) -> Result<(), PersistenceError> {
        self.tx.commit().await.map_err(db_error("commit"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{gardener_cluster, kyma_config, test_pool, timestamp};
    use chrono::Duration;

    fn operation(id: &str, runtime_id: &str, minute: u32) -> Operation {
        Operation::started(
            id,
            runtime_id,
            OperationType::Provision,
            Stage::WaitingForClusterCreation,
            "Provisioning started",
            timestamp(minute),
        )
    }

    async fn persisted(runtime_id: &str) -> SqlitePersistence {
        let persistence = SqlitePersistence::new(test_pool().await);
        let mut session = persistence.begin().await.unwrap();
        session
            .insert_cluster(&gardener_cluster(runtime_id))
            .await
            .unwrap();
        session.commit().await.unwrap();
        persistence
    }

    #[tokio::test]
    async fn test_insert_and_get_cluster() {
        let persistence = persisted("runtime-1").await;

        let cluster = persistence.get_cluster("runtime-1").await.unwrap();

        assert_eq!(cluster, gardener_cluster("runtime-1"));
        assert_eq!(cluster.kyma_config.components[0].component, "core");
        assert!(cluster.kyma_config.components[1].configuration[0].secret);
    }

    #[tokio::test]
    async fn test_get_cluster_not_found() {
        let persistence = SqlitePersistence::new(test_pool().await);

        let err = persistence.get_cluster("missing").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_gcp_cluster_roundtrip() {
        let persistence = SqlitePersistence::new(test_pool().await);
        let mut cluster = gardener_cluster("runtime-gcp");
        cluster.cluster_config = ClusterConfig::Gcp(GcpConfig {
            id: "gcp-config".to_string(),
            cluster_id: "runtime-gcp".to_string(),
            name: "gcp-cluster".to_string(),
            project_name: "project".to_string(),
            kubernetes_version: "1.15".to_string(),
            number_of_nodes: 3,
            boot_disk_size_gb: 256,
            machine_type: "n1-standard-1".to_string(),
            region: "region".to_string(),
            zone: None,
        });

        let mut session = persistence.begin().await.unwrap();
        session.insert_cluster(&cluster).await.unwrap();
        session.commit().await.unwrap();

        assert_eq!(persistence.get_cluster("runtime-gcp").await.unwrap(), cluster);
    }

    #[tokio::test]
    async fn test_uncommitted_session_rolls_back() {
        let persistence = SqlitePersistence::new(test_pool().await);

        {
            let mut session = persistence.begin().await.unwrap();
            session
                .insert_cluster(&gardener_cluster("runtime-1"))
                .await
                .unwrap();
            session
                .insert_operation(&operation("op-1", "runtime-1", 1))
                .await
                .unwrap();
        }

        assert!(
            persistence
                .get_cluster("runtime-1")
                .await
                .unwrap_err()
                .is_not_found()
        );
        assert!(
            persistence
                .get_operation("op-1")
                .await
                .unwrap_err()
                .is_not_found()
        );
    }

    #[tokio::test]
    async fn test_last_operation_is_latest_started() {
        let persistence = persisted("runtime-1").await;

        let mut first = operation("op-1", "runtime-1", 1);
        first.state = OperationState::Succeeded;
        persistence.insert_operation(&first).await.unwrap();
        persistence
            .insert_operation(&operation("op-2", "runtime-1", 5))
            .await
            .unwrap();

        let last = persistence.get_last_operation("runtime-1").await.unwrap();
        assert_eq!(last.id, "op-2");
        assert_eq!(last.stage, Stage::WaitingForClusterCreation);

        let err = persistence.get_last_operation("other").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_second_in_progress_operation_conflicts() {
        let persistence = persisted("runtime-1").await;
        persistence
            .insert_operation(&operation("op-1", "runtime-1", 1))
            .await
            .unwrap();

        let err = persistence
            .insert_operation(&operation("op-2", "runtime-1", 2))
            .await
            .unwrap_err();

        assert!(matches!(err, PersistenceError::Conflict(_)), "{:?}", err);
    }

    #[tokio::test]
    async fn test_terminal_state_finishes_operation() {
        let persistence = persisted("runtime-1").await;
        persistence
            .insert_operation(&operation("op-1", "runtime-1", 1))
            .await
            .unwrap();

        persistence
            .update_operation_state("op-1", OperationState::Failed, "boom", timestamp(3))
            .await
            .unwrap();

        let op = persistence.get_operation("op-1").await.unwrap();
        assert_eq!(op.state, OperationState::Failed);
        assert_eq!(op.stage, Stage::Finished);
        assert_eq!(op.message, "boom");
        assert_eq!(op.end_timestamp, Some(timestamp(3)));

        // Finished operations no longer take stage transitions.
        let err = persistence
            .transition_operation("op-1", Stage::StartingInstallation, "x", timestamp(4))
            .await
            .unwrap_err();
        assert!(matches!(err, PersistenceError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_transition_operation() {
        let persistence = persisted("runtime-1").await;
        persistence
            .insert_operation(&operation("op-1", "runtime-1", 1))
            .await
            .unwrap();

        persistence
            .transition_operation(
                "op-1",
                Stage::WaitingForInstallation,
                "Waiting for installation",
                timestamp(7),
            )
            .await
            .unwrap();

        let op = persistence.get_operation("op-1").await.unwrap();
        assert_eq!(op.stage, Stage::WaitingForInstallation);
        assert_eq!(op.last_transition, Some(timestamp(7)));
        assert_eq!(op.state, OperationState::InProgress);
    }

    #[tokio::test]
    async fn test_list_in_progress_operations() {
        let persistence = persisted("runtime-1").await;
        let mut session = persistence.begin().await.unwrap();
        session
            .insert_cluster(&gardener_cluster("runtime-2"))
            .await
            .unwrap();
        session.commit().await.unwrap();

        let mut done = operation("op-1", "runtime-1", 1);
        done.state = OperationState::Succeeded;
        persistence.insert_operation(&done).await.unwrap();
        persistence
            .insert_operation(&operation("op-3", "runtime-2", 9))
            .await
            .unwrap();
        persistence
            .insert_operation(&operation("op-2", "runtime-1", 2))
            .await
            .unwrap();

        let ids: Vec<String> = persistence
            .list_in_progress_operations()
            .await
            .unwrap()
            .into_iter()
            .map(|op| op.id)
            .collect();
        assert_eq!(ids, vec!["op-2".to_string(), "op-3".to_string()]);
    }

    #[tokio::test]
    async fn test_upgrade_switches_active_kyma_config() {
        let persistence = persisted("runtime-1").await;

        let mut session = persistence.begin().await.unwrap();
        let upgraded = kyma_config("kyma-config-2", "runtime-1");
        session.insert_kyma_config(&upgraded).await.unwrap();
        let mut upgrade_op = operation("op-upgrade", "runtime-1", 10);
        upgrade_op.operation_type = OperationType::Upgrade;
        upgrade_op.stage = Stage::StartingUpgrade;
        session.insert_operation(&upgrade_op).await.unwrap();
        session
            .insert_runtime_upgrade(&RuntimeUpgrade {
                id: "upgrade-1".to_string(),
                state: UpgradeState::InProgress,
                operation_id: "op-upgrade".to_string(),
                pre_upgrade_kyma_config_id: "kyma-config-1".to_string(),
                post_upgrade_kyma_config_id: "kyma-config-2".to_string(),
            })
            .await
            .unwrap();
        session
            .set_active_kyma_config("runtime-1", "kyma-config-2")
            .await
            .unwrap();
        let seen = session.get_last_operation("runtime-1").await.unwrap();
        assert_eq!(seen.map(|op| op.id), Some("op-upgrade".to_string()));
        session.commit().await.unwrap();

        let cluster = persistence.get_cluster("runtime-1").await.unwrap();
        assert_eq!(cluster.kyma_config.id, "kyma-config-2");

        persistence
            .update_upgrade_state("op-upgrade", UpgradeState::Succeeded)
            .await
            .unwrap();
        let upgrade = persistence.get_runtime_upgrade("op-upgrade").await.unwrap();
        assert_eq!(upgrade.state, UpgradeState::Succeeded);
        assert_eq!(upgrade.pre_upgrade_kyma_config_id, "kyma-config-1");

        let historical = persistence.get_kyma_config("kyma-config-1").await.unwrap();
        assert_eq!(historical.components.len(), 2);
    }

    #[tokio::test]
    async fn test_tenant_lookups() {
        let persistence = persisted("runtime-1").await;
        persistence
            .insert_operation(&operation("op-1", "runtime-1", 1))
            .await
            .unwrap();

        assert_eq!(persistence.get_tenant("runtime-1").await.unwrap(), "tenant");
        assert_eq!(
            persistence.get_tenant_for_operation("op-1").await.unwrap(),
            "tenant"
        );
        assert!(
            persistence
                .get_tenant_for_operation("missing")
                .await
                .unwrap_err()
                .is_not_found()
        );
    }

    #[tokio::test]
    async fn test_kubeconfig_and_deletion() {
        let persistence = persisted("runtime-1").await;

        persistence
            .update_cluster_kubeconfig("runtime-1", "kubeconfig: yes", Some(b"state"))
            .await
            .unwrap();
        persistence
            .update_cluster_kubeconfig("runtime-1", "kubeconfig: updated", None)
            .await
            .unwrap();
        persistence.mark_cluster_deleted("runtime-1").await.unwrap();

        let cluster = persistence.get_cluster("runtime-1").await.unwrap();
        assert_eq!(cluster.kubeconfig.as_deref(), Some("kubeconfig: updated"));
        assert_eq!(cluster.internal_state.as_deref(), Some(&b"state"[..]));
        assert!(cluster.deleted);
    }

    #[tokio::test]
    async fn test_cleanup_cluster_data() {
        let persistence = persisted("runtime-1").await;
        let mut op = operation("op-1", "runtime-1", 1);
        op.start_timestamp = op.start_timestamp - Duration::minutes(1);
        persistence.insert_operation(&op).await.unwrap();

        persistence.cleanup_cluster_data("runtime-1").await.unwrap();

        assert!(
            persistence
                .get_cluster("runtime-1")
                .await
                .unwrap_err()
                .is_not_found()
        );
        let modules: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM kyma_config_module")
            .fetch_one(persistence.pool())
            .await
            .unwrap();
        assert_eq!(modules, 0);
    }

    #[tokio::test]
    async fn test_from_path_creates_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("provisioner.db");

        let persistence = SqlitePersistence::from_path(&path).await.unwrap();

        assert!(path.exists());
        assert!(
            persistence
                .list_in_progress_operations()
                .await
                .unwrap()
                .is_empty()
        );
    }
}

//! # Postgres Store
//!
//! [`ResourceStore`] and [`CheckpointStore`] over a `sqlx` Postgres pool.
//! State changes run inside a transaction that locks the row first, which
//! gives the same compare-and-set guarantee as the in-memory store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use super::{ResourceStore, StoreError, StoreResult};
use crate::config::DatabaseConfig;
use crate::engine::checkpoint::{CheckpointStore, TaskCheckpoint};
use crate::engine::params::SharedParams;
use crate::engine::step::StepDescriptor;
use crate::models::{
    objid, Link, LinkType, NewLink, NewResource, Resource, ResourceFilter, ResourceKind,
    ResourceTransition, ResourceUpdate,
};
use crate::state_machine::ResourceState;

const UNIQUE_VIOLATION: &str = "23505";

const RESOURCE_COLUMNS: &str = r#"id, uuid, objid, name, "desc", kind, container_id, ext_id,
    state, active, attrib, parent_id, tags, created_at, updated_at"#;

impl From<sqlx::Error> for StoreError {
    fn from(error: sqlx::Error) -> Self {
        match &error {
            sqlx::Error::RowNotFound => StoreError::NotFound {
                entity: "row".to_string(),
                id: "?".to_string(),
            },
            sqlx::Error::Database(db) if db.code().as_deref() == Some(UNIQUE_VIOLATION) => {
                StoreError::Duplicate {
                    field: db.constraint().unwrap_or("unique").to_string(),
                    value: db.message().to_string(),
                }
            }
            _ => StoreError::Database(error.to_string()),
        }
    }
}

#[derive(Debug, FromRow)]
struct ResourceRow {
    id: i64,
    uuid: Uuid,
    objid: String,
    name: String,
    desc: Option<String>,
    kind: String,
    container_id: i64,
    ext_id: Option<String>,
    state: String,
    active: bool,
    attrib: Value,
    parent_id: Option<i64>,
    tags: Vec<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ResourceRow> for Resource {
    type Error = StoreError;

    fn try_from(row: ResourceRow) -> Result<Self, Self::Error> {
        Ok(Resource {
            id: row.id,
            uuid: row.uuid,
            objid: row.objid,
            name: row.name,
            desc: row.desc,
            kind: row.kind.parse().map_err(StoreError::Serialization)?,
            container_id: row.container_id,
            ext_id: row.ext_id,
            state: row.state.parse().map_err(StoreError::Serialization)?,
            active: row.active,
            attrib: row.attrib,
            parent_id: row.parent_id,
            tags: row.tags,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct LinkRow {
    id: i64,
    link_type: String,
    start_resource_id: i64,
    end_resource_id: i64,
    attrib: Value,
    created_at: DateTime<Utc>,
}

impl TryFrom<LinkRow> for Link {
    type Error = StoreError;

    fn try_from(row: LinkRow) -> Result<Self, Self::Error> {
        Ok(Link {
            id: row.id,
            link_type: row.link_type.parse().map_err(StoreError::Serialization)?,
            start_resource_id: row.start_resource_id,
            end_resource_id: row.end_resource_id,
            attrib: row.attrib,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct TransitionRow {
    id: i64,
    resource_id: i64,
    from_state: String,
    to_state: String,
    reason: Option<String>,
    sort_key: i32,
    created_at: DateTime<Utc>,
}

impl TryFrom<TransitionRow> for ResourceTransition {
    type Error = StoreError;

    fn try_from(row: TransitionRow) -> Result<Self, Self::Error> {
        Ok(ResourceTransition {
            id: row.id,
            resource_id: row.resource_id,
            from_state: row.from_state.parse().map_err(StoreError::Serialization)?,
            to_state: row.to_state.parse().map_err(StoreError::Serialization)?,
            reason: row.reason,
            sort_key: row.sort_key,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct CheckpointRow {
    task_id: Uuid,
    resource_id: Option<i64>,
    steps: Json<Vec<StepDescriptor>>,
    next_step: i32,
    params: Value,
    status: String,
    last_result: Value,
    error: Option<String>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<CheckpointRow> for TaskCheckpoint {
    type Error = StoreError;

    fn try_from(row: CheckpointRow) -> Result<Self, Self::Error> {
        Ok(TaskCheckpoint {
            task_id: row.task_id,
            resource_id: row.resource_id,
            steps: row.steps.0,
            next_step: usize::try_from(row.next_step)
                .map_err(|e| StoreError::Serialization(e.to_string()))?,
            params: SharedParams::from_value(row.params),
            status: row.status.parse().map_err(StoreError::Serialization)?,
            last_result: row.last_result,
            error: row.error,
            updated_at: row.updated_at,
        })
    }
}

fn collect<R, T>(rows: Vec<R>) -> StoreResult<Vec<T>>
where
    T: TryFrom<R, Error = StoreError>,
{
    rows.into_iter().map(T::try_from).collect()
}

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect using the `database` config section
    pub async fn connect(config: &DatabaseConfig) -> StoreResult<Self> {
        let url = config
            .require_url()
            .map_err(|e| StoreError::Database(e.to_string()))?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_seconds))
            .connect(url)
            .await?;

        info!(
            max_connections = config.max_connections,
            "Resource store connected to Postgres"
        );
        Ok(Self::new(pool))
    }

    /// Apply the bundled schema migrations
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn lock_resource(
        tx: &mut Transaction<'_, Postgres>,
        id: i64,
    ) -> StoreResult<Resource> {
        let query = format!("SELECT {RESOURCE_COLUMNS} FROM resources WHERE id = $1 FOR UPDATE");
        let row = sqlx::query_as::<_, ResourceRow>(&query)
            .bind(id)
            .fetch_optional(&mut **tx)
            .await?
            .ok_or_else(|| StoreError::not_found("Resource", id))?;
        Resource::try_from(row)
    }
}

#[async_trait]
impl ResourceStore for PgStore {
    async fn insert_resource(&self, container_id: i64, new: &NewResource) -> StoreResult<Resource> {
        let objid = new.objid.clone().unwrap_or_else(objid::new_segment);
        let query = format!(
            r#"INSERT INTO resources
                (uuid, objid, name, "desc", kind, container_id, ext_id, state, active, attrib, parent_id, tags)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
               RETURNING {RESOURCE_COLUMNS}"#
        );
        let row = sqlx::query_as::<_, ResourceRow>(&query)
            .bind(Uuid::new_v4())
            .bind(&objid)
            .bind(&new.name)
            .bind(&new.desc)
            .bind(new.kind.as_str())
            .bind(container_id)
            .bind(&new.ext_id)
            .bind(ResourceState::Pending.as_str())
            .bind(new.active)
            .bind(&new.attrib)
            .bind(new.parent_id)
            .bind(&new.tags)
            .fetch_one(&self.pool)
            .await?;
        Resource::try_from(row)
    }

    async fn find_resource(&self, id: i64) -> StoreResult<Option<Resource>> {
        let query = format!("SELECT {RESOURCE_COLUMNS} FROM resources WHERE id = $1");
        let row = sqlx::query_as::<_, ResourceRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Resource::try_from).transpose()
    }

    async fn find_by_uuid(&self, uuid: Uuid) -> StoreResult<Option<Resource>> {
        let query = format!("SELECT {RESOURCE_COLUMNS} FROM resources WHERE uuid = $1");
        let row = sqlx::query_as::<_, ResourceRow>(&query)
            .bind(uuid)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Resource::try_from).transpose()
    }

    async fn find_by_objid(&self, objid: &str) -> StoreResult<Option<Resource>> {
        let query = format!("SELECT {RESOURCE_COLUMNS} FROM resources WHERE objid = $1");
        let row = sqlx::query_as::<_, ResourceRow>(&query)
            .bind(objid)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Resource::try_from).transpose()
    }

    async fn find_by_ext_id(&self, container_id: i64, ext_id: &str) -> StoreResult<Option<Resource>> {
        let query = format!(
            "SELECT {RESOURCE_COLUMNS} FROM resources
             WHERE container_id = $1 AND ext_id = $2 AND state <> 'EXPUNGED'
             ORDER BY id LIMIT 1"
        );
        let row = sqlx::query_as::<_, ResourceRow>(&query)
            .bind(container_id)
            .bind(ext_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Resource::try_from).transpose()
    }

    async fn find_by_name(
        &self,
        container_id: i64,
        kind: ResourceKind,
        name: &str,
        parent_id: Option<i64>,
    ) -> StoreResult<Option<Resource>> {
        let query = format!(
            "SELECT {RESOURCE_COLUMNS} FROM resources
             WHERE container_id = $1 AND kind = $2 AND name = $3
               AND parent_id IS NOT DISTINCT FROM $4 AND state <> 'EXPUNGED'
             ORDER BY id LIMIT 1"
        );
        let row = sqlx::query_as::<_, ResourceRow>(&query)
            .bind(container_id)
            .bind(kind.as_str())
            .bind(name)
            .bind(parent_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Resource::try_from).transpose()
    }

    async fn list_resources(&self, filter: &ResourceFilter) -> StoreResult<Vec<Resource>> {
        let query = format!(
            "SELECT {RESOURCE_COLUMNS} FROM resources
             WHERE ($1::BIGINT IS NULL OR container_id = $1)
               AND ($2::TEXT IS NULL OR kind = $2)
               AND ($3::BIGINT IS NULL OR parent_id = $3)
               AND ($4 OR state <> 'EXPUNGED')
             ORDER BY id"
        );
        let rows = sqlx::query_as::<_, ResourceRow>(&query)
            .bind(filter.container_id)
            .bind(filter.kind.map(|k| k.as_str()))
            .bind(filter.parent_id)
            .bind(filter.include_expunged)
            .fetch_all(&self.pool)
            .await?;
        collect(rows)
    }

    async fn update_resource(
        &self,
        id: i64,
        update: &ResourceUpdate,
        expected_state: Option<ResourceState>,
        reason: Option<&str>,
    ) -> StoreResult<Resource> {
        let mut tx = self.pool.begin().await?;
        let current = Self::lock_resource(&mut tx, id).await?;

        if let (Some(to), Some(expected)) = (update.state, expected_state) {
            if current.state != expected {
                return Err(StoreError::Conflict(format!(
                    "resource {id} is {} not {expected} (wanted {to})",
                    current.state
                )));
            }
        }

        let mut updated = current.clone();
        update.apply_to(&mut updated);

        let query = format!(
            r#"UPDATE resources
               SET name = $2, "desc" = $3, ext_id = $4, state = $5, active = $6,
                   attrib = $7, tags = $8, updated_at = $9
               WHERE id = $1
               RETURNING {RESOURCE_COLUMNS}"#
        );
        let row = sqlx::query_as::<_, ResourceRow>(&query)
            .bind(id)
            .bind(&updated.name)
            .bind(&updated.desc)
            .bind(&updated.ext_id)
            .bind(updated.state.as_str())
            .bind(updated.active)
            .bind(&updated.attrib)
            .bind(&updated.tags)
            .bind(updated.updated_at)
            .fetch_one(&mut *tx)
            .await?;

        if updated.state != current.state {
            sqlx::query(
                "INSERT INTO resource_transitions (resource_id, from_state, to_state, reason, sort_key)
                 SELECT $1, $2, $3, $4, COALESCE(MAX(sort_key), 0) + 1
                 FROM resource_transitions WHERE resource_id = $1",
            )
            .bind(id)
            .bind(current.state.as_str())
            .bind(updated.state.as_str())
            .bind(reason)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Resource::try_from(row)
    }

    async fn transitions(&self, resource_id: i64) -> StoreResult<Vec<ResourceTransition>> {
        let rows = sqlx::query_as::<_, TransitionRow>(
            "SELECT id, resource_id, from_state, to_state, reason, sort_key, created_at
             FROM resource_transitions WHERE resource_id = $1 ORDER BY sort_key",
        )
        .bind(resource_id)
        .fetch_all(&self.pool)
        .await?;
        collect(rows)
    }

    async fn insert_link(&self, new: &NewLink) -> StoreResult<Link> {
        let row = sqlx::query_as::<_, LinkRow>(
            "INSERT INTO resource_links (link_type, start_resource_id, end_resource_id, attrib)
             SELECT $1, $2, $3, $4
             WHERE NOT EXISTS (
                 SELECT 1 FROM resources
                 WHERE id IN ($2, $3) AND state = 'EXPUNGED'
             )
             RETURNING id, link_type, start_resource_id, end_resource_id, attrib, created_at",
        )
        .bind(new.link_type.as_str())
        .bind(new.start_resource_id)
        .bind(new.end_resource_id)
        .bind(&new.attrib)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| {
            StoreError::Conflict(format!(
                "link {} {} -> {} touches an expunged resource",
                new.link_type, new.start_resource_id, new.end_resource_id
            ))
        })?;
        Link::try_from(row)
    }

    async fn find_link(
        &self,
        link_type: LinkType,
        start_resource_id: i64,
        end_resource_id: i64,
    ) -> StoreResult<Option<Link>> {
        let row = sqlx::query_as::<_, LinkRow>(
            "SELECT id, link_type, start_resource_id, end_resource_id, attrib, created_at
             FROM resource_links
             WHERE link_type = $1 AND start_resource_id = $2 AND end_resource_id = $3",
        )
        .bind(link_type.as_str())
        .bind(start_resource_id)
        .bind(end_resource_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Link::try_from).transpose()
    }

    async fn links_for(&self, resource_id: i64) -> StoreResult<Vec<Link>> {
        let rows = sqlx::query_as::<_, LinkRow>(
            "SELECT id, link_type, start_resource_id, end_resource_id, attrib, created_at
             FROM resource_links
             WHERE start_resource_id = $1 OR end_resource_id = $1
             ORDER BY id",
        )
        .bind(resource_id)
        .fetch_all(&self.pool)
        .await?;
        collect(rows)
    }

    async fn delete_link(&self, link_id: i64) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM resource_links WHERE id = $1")
            .bind(link_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl CheckpointStore for PgStore {
    async fn save_checkpoint(&self, checkpoint: &TaskCheckpoint) -> StoreResult<()> {
        let next_step = i32::try_from(checkpoint.next_step)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        sqlx::query(
            "INSERT INTO task_checkpoints
                (task_id, resource_id, steps, next_step, params, status, last_result, error, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW())
             ON CONFLICT (task_id) DO UPDATE SET
                resource_id = EXCLUDED.resource_id,
                steps = EXCLUDED.steps,
                next_step = EXCLUDED.next_step,
                params = EXCLUDED.params,
                status = EXCLUDED.status,
                last_result = EXCLUDED.last_result,
                error = EXCLUDED.error,
                updated_at = NOW()",
        )
        .bind(checkpoint.task_id)
        .bind(checkpoint.resource_id)
        .bind(Json(&checkpoint.steps))
        .bind(next_step)
        .bind(checkpoint.params.clone().into_value())
        .bind(checkpoint.status.as_str())
        .bind(&checkpoint.last_result)
        .bind(&checkpoint.error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_checkpoint(&self, task_id: Uuid) -> StoreResult<Option<TaskCheckpoint>> {
        let row = sqlx::query_as::<_, CheckpointRow>(
            "SELECT task_id, resource_id, steps, next_step, params, status, last_result, error, updated_at
             FROM task_checkpoints WHERE task_id = $1",
        )
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TaskCheckpoint::try_from).transpose()
    }

    async fn delete_checkpoint(&self, task_id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM task_checkpoints WHERE task_id = $1")
            .bind(task_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn running_checkpoints(&self) -> StoreResult<Vec<TaskCheckpoint>> {
        let rows = sqlx::query_as::<_, CheckpointRow>(
            "SELECT task_id, resource_id, steps, next_step, params, status, last_result, error, updated_at
             FROM task_checkpoints WHERE status = 'running' ORDER BY updated_at",
        )
        .fetch_all(&self.pool)
        .await?;
        collect(rows)
    }
}

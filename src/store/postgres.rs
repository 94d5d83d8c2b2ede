//! PostgreSQL task store

use crate::error::{Error, Result};
use crate::models::{Params, Task, TaskFilter, TaskId, TaskStatus};
use crate::store::TaskStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_postgres::error::SqlState;
use tokio_postgres::{Client, NoTls, Row};
use tracing::{debug, error};

const TASK_COLUMNS: &str = "id, handler, params, start_at, status, priority, topic, collision_sign, \
     attempt, info, error, execution_time_ms, updated_at, created_at";

pub struct PostgresTaskStore {
    client: Client,
}

impl PostgresTaskStore {
    /// Connect and make sure the `tasks` table and its indexes exist.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let (client, connection) = tokio_postgres::connect(database_url, NoTls).await?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(error = %e, "Postgres connection error");
            }
        });

        let store = Self { client };
        store.init_schema().await?;
        Ok(store)
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    async fn init_schema(&self) -> Result<()> {
        self.client
            .batch_execute(
                "CREATE TABLE IF NOT EXISTS tasks (
                    id TEXT PRIMARY KEY,
                    handler TEXT NOT NULL,
                    params TEXT NOT NULL DEFAULT '{}',
                    start_at TIMESTAMPTZ NOT NULL,
                    status TEXT NOT NULL,
                    priority INTEGER NOT NULL,
                    topic TEXT NOT NULL,
                    collision_sign TEXT,
                    attempt INTEGER NOT NULL DEFAULT 0,
                    info TEXT NOT NULL DEFAULT '',
                    error TEXT,
                    execution_time_ms BIGINT,
                    updated_at TIMESTAMPTZ NOT NULL,
                    created_at TIMESTAMPTZ NOT NULL
                );
                CREATE UNIQUE INDEX IF NOT EXISTS tasks_live_collision_sign
                    ON tasks (collision_sign)
                    WHERE collision_sign IS NOT NULL AND status IN ('pending', 'process');
                CREATE INDEX IF NOT EXISTS tasks_eligible
                    ON tasks (start_at, priority)
                    WHERE status = 'pending';",
            )
            .await?;
        debug!("Postgres task schema ready");
        Ok(())
    }
}

/// A unique violation can only come from the live collision-sign index.
fn map_write_error(e: tokio_postgres::Error, sign: Option<&str>) -> Error {
    if e.code() == Some(&SqlState::UNIQUE_VIOLATION) {
        if let Some(sign) = sign {
            return Error::Conflict(sign.to_string());
        }
    }
    Error::Postgres(e)
}

fn task_from_row(row: &Row) -> Result<Task> {
    let id: String = row.try_get(0)?;
    let params_json: String = row.try_get(2)?;
    let params: Params = serde_json::from_str(&params_json)?;
    let status_str: String = row.try_get(4)?;
    let status = status_str.parse::<TaskStatus>().map_err(Error::Storage)?;

    Ok(Task {
        id: TaskId::from(id),
        handler: row.try_get(1)?,
        params,
        start_at: row.try_get(3)?,
        status,
        priority: row.try_get(5)?,
        topic: row.try_get(6)?,
        collision_sign: row.try_get(7)?,
        attempt: row.try_get(8)?,
        info: row.try_get(9)?,
        error: row.try_get(10)?,
        execution_time_ms: row.try_get(11)?,
        updated_at: row.try_get(12)?,
        created_at: row.try_get(13)?,
    })
}

fn tasks_from_rows(rows: Vec<Row>) -> Result<Vec<Task>> {
    rows.iter().map(task_from_row).collect()
}

#[async_trait]
impl TaskStore for PostgresTaskStore {
    async fn insert(&self, task: &Task) -> Result<()> {
        let params_json = serde_json::to_string(&task.params)?;
        self.client
            .execute(
                "INSERT INTO tasks (id, handler, params, start_at, status, priority, topic, collision_sign,
                                    attempt, info, error, execution_time_ms, updated_at, created_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
                &[
                    &task.id.as_str(),
                    &task.handler,
                    &params_json,
                    &task.start_at,
                    &task.status.as_str(),
                    &task.priority,
                    &task.topic,
                    &task.collision_sign,
                    &task.attempt,
                    &task.info,
                    &task.error,
                    &task.execution_time_ms,
                    &task.updated_at,
                    &task.created_at,
                ],
            )
            .await
            .map_err(|e| map_write_error(e, task.collision_sign.as_deref()))?;
        Ok(())
    }

    async fn get(&self, id: &TaskId) -> Result<Option<Task>> {
        let query = format!("SELECT {} FROM tasks WHERE id = $1", TASK_COLUMNS);
        let row = self.client.query_opt(&query, &[&id.as_str()]).await?;
        row.as_ref().map(task_from_row).transpose()
    }

    async fn find_live_by_sign(&self, sign: &str) -> Result<Option<Task>> {
        let query = format!(
            "SELECT {} FROM tasks
             WHERE collision_sign = $1 AND status IN ('pending', 'process')
             LIMIT 1",
            TASK_COLUMNS
        );
        let row = self.client.query_opt(&query, &[&sign]).await?;
        row.as_ref().map(task_from_row).transpose()
    }

    async fn compare_and_swap_status(
        &self,
        id: &TaskId,
        expected: TaskStatus,
        new: TaskStatus,
    ) -> Result<bool> {
        let affected = self
            .client
            .execute(
                "UPDATE tasks
                 SET status = $3,
                     attempt = CASE WHEN $3 = 'process' THEN attempt + 1 ELSE attempt END,
                     updated_at = $4
                 WHERE id = $1 AND status = $2",
                &[&id.as_str(), &expected.as_str(), &new.as_str(), &Utc::now()],
            )
            .await
            .map_err(|e| {
                if e.code() == Some(&SqlState::UNIQUE_VIOLATION) {
                    Error::Conflict(format!("sign of task {}", id))
                } else {
                    Error::Postgres(e)
                }
            })?;
        Ok(affected == 1)
    }

    async fn restart(
        &self,
        id: &TaskId,
        expected: TaskStatus,
        start_at: DateTime<Utc>,
    ) -> Result<bool> {
        let affected = self
            .client
            .execute(
                "UPDATE tasks
                 SET status = 'pending',
                     attempt = CASE WHEN $2 = 'pending' THEN attempt ELSE 0 END,
                     error = CASE WHEN $2 = 'pending' THEN error ELSE NULL END,
                     start_at = $3,
                     updated_at = $3
                 WHERE id = $1 AND status = $2",
                &[&id.as_str(), &expected.as_str(), &start_at],
            )
            .await
            .map_err(|e| {
                if e.code() == Some(&SqlState::UNIQUE_VIOLATION) {
                    Error::Conflict(format!("sign of task {}", id))
                } else {
                    Error::Postgres(e)
                }
            })?;
        Ok(affected == 1)
    }

    async fn update(&self, task: &Task) -> Result<()> {
        let params_json = serde_json::to_string(&task.params)?;
        let affected = self
            .client
            .execute(
                "UPDATE tasks
                 SET params = $2, start_at = $3, status = $4, priority = $5, topic = $6,
                     collision_sign = $7, attempt = $8, info = $9, error = $10,
                     execution_time_ms = $11, updated_at = $12
                 WHERE id = $1",
                &[
                    &task.id.as_str(),
                    &params_json,
                    &task.start_at,
                    &task.status.as_str(),
                    &task.priority,
                    &task.topic,
                    &task.collision_sign,
                    &task.attempt,
                    &task.info,
                    &task.error,
                    &task.execution_time_ms,
                    &task.updated_at,
                ],
            )
            .await
            .map_err(|e| map_write_error(e, task.collision_sign.as_deref()))?;
        if affected == 0 {
            return Err(Error::TaskNotFound(task.id.clone()));
        }
        Ok(())
    }

    async fn select_candidate(
        &self,
        filter: &TaskFilter,
        now: DateTime<Utc>,
        skip: &[TaskId],
    ) -> Result<Option<Task>> {
        let skip: Vec<&str> = skip.iter().map(TaskId::as_str).collect();
        let query = format!(
            "SELECT {} FROM tasks
             WHERE status = 'pending' AND start_at <= $1
               AND ($2::text[] IS NULL OR handler = ANY($2))
               AND ($3::text[] IS NULL OR NOT (handler = ANY($3)))
               AND NOT (id = ANY($4))
             ORDER BY start_at ASC, priority ASC
             LIMIT 1",
            TASK_COLUMNS
        );
        let row = self
            .client
            .query_opt(
                &query,
                &[
                    &now,
                    &filter.include_handlers,
                    &filter.exclude_handlers,
                    &skip,
                ],
            )
            .await?;
        row.as_ref().map(task_from_row).transpose()
    }

    async fn select_eligible(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Task>> {
        let query = format!(
            "SELECT {} FROM tasks
             WHERE status = 'pending' AND start_at <= $1
             ORDER BY start_at ASC, priority ASC
             LIMIT $2",
            TASK_COLUMNS
        );
        let rows = self.client.query(&query, &[&now, &(limit as i64)]).await?;
        tasks_from_rows(rows)
    }

    async fn select_stale(
        &self,
        status: TaskStatus,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Task>> {
        let query = format!(
            "SELECT {} FROM tasks
             WHERE status = $1 AND updated_at < $2
             ORDER BY updated_at ASC
             LIMIT $3",
            TASK_COLUMNS
        );
        let rows = self
            .client
            .query(&query, &[&status.as_str(), &older_than, &(limit as i64)])
            .await?;
        tasks_from_rows(rows)
    }
}

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::debug;

use shared::{
    domain::{SortDirection, TaskId},
    protocol::{NewTask, Task, TaskPatch},
};

/// SQLite-backed document collections. Cheap to clone; clones share the pool.
#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    pub async fn insert_task(&self, collection: &str, task: &NewTask) -> Result<TaskId> {
        let id = TaskId::generate();
        sqlx::query(
            "INSERT INTO documents (id, collection, title, completed, created_at_us)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(id.as_str())
        .bind(collection)
        .bind(&task.title)
        .bind(task.completed)
        .bind(task.created_at.timestamp_micros())
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to insert document into '{collection}'"))?;
        debug!(collection, id = %id, "document inserted");
        Ok(id)
    }

    /// Applies `patch` to one document. Returns `false` when the id is unknown.
    pub async fn update_task(
        &self,
        collection: &str,
        id: &TaskId,
        patch: &TaskPatch,
    ) -> Result<bool> {
        let Some(completed) = patch.completed else {
            return self.task_exists(collection, id).await;
        };
        let result =
            sqlx::query("UPDATE documents SET completed = ? WHERE collection = ? AND id = ?")
                .bind(completed)
                .bind(collection)
                .bind(id.as_str())
                .execute(&self.pool)
                .await
                .with_context(|| format!("failed to update document '{id}' in '{collection}'"))?;
        Ok(result.rows_affected() > 0)
    }

    /// Removes one document. Returns `false` when nothing was deleted.
    pub async fn delete_task(&self, collection: &str, id: &TaskId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM documents WHERE collection = ? AND id = ?")
            .bind(collection)
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .with_context(|| format!("failed to delete document '{id}' from '{collection}'"))?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn task_exists(&self, collection: &str, id: &TaskId) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM documents WHERE collection = ? AND id = ?")
            .bind(collection)
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    pub async fn get_task(&self, collection: &str, id: &TaskId) -> Result<Option<Task>> {
        let row = sqlx::query(
            "SELECT id, title, completed, created_at_us FROM documents
             WHERE collection = ? AND id = ?",
        )
        .bind(collection)
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| task_from_row(&r)).transpose()
    }

    /// Full snapshot of a collection ordered by creation time.
    pub async fn list_tasks(&self, collection: &str, direction: SortDirection) -> Result<Vec<Task>> {
        let sql = match direction {
            SortDirection::Asc => {
                "SELECT id, title, completed, created_at_us FROM documents
                 WHERE collection = ? ORDER BY created_at_us ASC, seq ASC"
            }
            SortDirection::Desc => {
                "SELECT id, title, completed, created_at_us FROM documents
                 WHERE collection = ? ORDER BY created_at_us DESC, seq DESC"
            }
        };
        let rows = sqlx::query(sql)
            .bind(collection)
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("failed to list documents in '{collection}'"))?;
        rows.iter().map(task_from_row).collect()
    }

    pub async fn clear_collection(&self, collection: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM documents WHERE collection = ?")
            .bind(collection)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

fn task_from_row(row: &SqliteRow) -> Result<Task> {
    let created_at_us: i64 = row.try_get("created_at_us")?;
    let created_at: DateTime<Utc> = DateTime::from_timestamp_micros(created_at_us)
        .ok_or_else(|| anyhow!("stored timestamp out of range: {created_at_us}"))?;
    Ok(Task {
        id: TaskId(row.try_get("id")?),
        title: row.try_get("title")?,
        completed: row.try_get("completed")?,
        created_at,
    })
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;

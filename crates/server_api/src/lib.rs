use chrono::Utc;
use serde::{Deserialize, Serialize};
use shared::{
    domain::{is_valid_collection_name, SortDirection, TaskId},
    error::ApiError,
    protocol::{CreatedTask, NewTask, ServerEvent, Task, TaskPatch, MAX_TITLE_CHARS},
};
use storage::Storage;
use tracing::warn;

#[derive(Clone)]
pub struct ApiContext {
    pub storage: Storage,
}

/// Fan-out notice that a collection's contents changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionChanged {
    pub collection: String,
}

pub async fn list_tasks(
    ctx: &ApiContext,
    collection: &str,
    direction: SortDirection,
) -> Result<Vec<Task>, ApiError> {
    ensure_collection_name(collection)?;
    ctx.storage
        .list_tasks(collection, direction)
        .await
        .map_err(internal)
}

pub async fn create_task(
    ctx: &ApiContext,
    collection: &str,
    task: NewTask,
) -> Result<CreatedTask, ApiError> {
    ensure_collection_name(collection)?;
    let title = validate_title(&task.title)?;
    let task = NewTask {
        title,
        completed: task.completed,
        created_at: task.created_at,
    };
    if task.created_at > Utc::now() + chrono::Duration::minutes(5) {
        warn!(
            collection,
            created_at = %task.created_at,
            "accepting task with created_at far in the future"
        );
    }
    let id = ctx
        .storage
        .insert_task(collection, &task)
        .await
        .map_err(internal)?;
    Ok(CreatedTask { id })
}

pub async fn update_task(
    ctx: &ApiContext,
    collection: &str,
    id: &TaskId,
    patch: TaskPatch,
) -> Result<(), ApiError> {
    ensure_collection_name(collection)?;
    let found = ctx
        .storage
        .update_task(collection, id, &patch)
        .await
        .map_err(internal)?;
    if !found {
        return Err(ApiError::not_found(format!(
            "no document '{id}' in collection '{collection}'"
        )));
    }
    Ok(())
}

/// Deleting an id that does not exist is not an error.
pub async fn delete_task(ctx: &ApiContext, collection: &str, id: &TaskId) -> Result<(), ApiError> {
    ensure_collection_name(collection)?;
    ctx.storage
        .delete_task(collection, id)
        .await
        .map_err(internal)?;
    Ok(())
}

/// Builds the event a subscriber receives for the current collection contents.
pub async fn snapshot_event(
    ctx: &ApiContext,
    collection: &str,
    direction: SortDirection,
) -> ServerEvent {
    match list_tasks(ctx, collection, direction).await {
        Ok(tasks) => ServerEvent::Snapshot {
            collection: collection.to_string(),
            tasks,
        },
        Err(err) => ServerEvent::Error(err),
    }
}

pub fn ensure_collection_name(collection: &str) -> Result<(), ApiError> {
    if is_valid_collection_name(collection) {
        Ok(())
    } else {
        Err(ApiError::validation(format!(
            "invalid collection name '{collection}'"
        )))
    }
}

pub fn validate_title(raw: &str) -> Result<String, ApiError> {
    let title = raw.trim();
    if title.is_empty() {
        return Err(ApiError::validation("title must not be empty"));
    }
    if title.chars().count() > MAX_TITLE_CHARS {
        return Err(ApiError::validation(format!(
            "title exceeds {MAX_TITLE_CHARS} characters"
        )));
    }
    Ok(title.to_string())
}

fn internal(err: anyhow::Error) -> ApiError {
    ApiError::internal(err.to_string())
}

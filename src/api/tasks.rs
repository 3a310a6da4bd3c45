use crate::artifact::mirror_artifact;
use crate::error::{CoreError, Result};
use crate::models::{Priority, Task, TaskComment, TaskDraft, TaskFilter, TaskPatch, TaskStatus};
use crate::services::Services;
use crate::store::task_store::TaskStore;
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Debug, Deserialize, Default)]
pub struct ListTasksQuery {
    status: Option<TaskStatus>,
    assignee: Option<String>,
    created_by: Option<String>,
    priority: Option<Priority>,
    #[serde(default)]
    tags: Vec<String>,
    updated_since: Option<i64>,
    limit: Option<usize>,
}

impl From<ListTasksQuery> for TaskFilter {
    fn from(q: ListTasksQuery) -> Self {
        TaskFilter {
            status: q.status,
            assignee: q.assignee,
            created_by: q.created_by,
            priority: q.priority,
            tags: q.tags.into_iter().collect(),
            updated_since: q.updated_since,
            limit: q.limit,
        }
    }
}

pub async fn list_tasks(State(services): State<Arc<Services>>, Query(query): Query<ListTasksQuery>) -> Json<Value> {
    let tasks = services.tasks.list_tasks(query.into()).await;
    Json(json!({ "success": true, "tasks": tasks }))
}

pub async fn create_task(State(services): State<Arc<Services>>, Json(draft): Json<TaskDraft>) -> Result<Json<Value>> {
    let task = services.tasks.create_task(draft).await?;
    Ok(Json(json!({ "success": true, "task": task })))
}

async fn resolve_id(services: &Services, input: &str) -> Result<String> {
    let resolved = services.tasks.resolve_task_id(input).await;
    match resolved.match_type {
        crate::models::MatchType::Exact | crate::models::MatchType::Prefix => Ok(resolved.resolved_id.unwrap()),
        crate::models::MatchType::Ambiguous => Err(CoreError::Ambiguous { input: input.to_string(), suggestions: resolved.suggestions }),
        crate::models::MatchType::None => Err(CoreError::NotFound(format!("task {input}"))),
    }
}

pub async fn get_task(State(services): State<Arc<Services>>, Path(id): Path<String>) -> Result<Json<Value>> {
    let id = resolve_id(&services, &id).await?;
    let task = services.tasks.get_task(&id).await.ok_or_else(|| CoreError::NotFound(format!("task {id}")))?;
    Ok(Json(json!({ "success": true, "task": task })))
}

pub async fn update_task(State(services): State<Arc<Services>>, Path(id): Path<String>, Json(patch): Json<TaskPatch>) -> Result<Json<Value>> {
    let id = resolve_id(&services, &id).await?;
    let task = services.tasks.update_task(&id, patch).await?;

    if let Some(artifacts) = task.metadata.get("artifacts").and_then(Value::as_array) {
        for path in artifacts.iter().filter_map(Value::as_str) {
            let _ = mirror_artifact(&services.config.workspace, task.assignee.as_deref(), path);
        }
    }

    Ok(Json(json!({ "success": true, "task": task })))
}

pub async fn delete_task(State(services): State<Arc<Services>>, Path(id): Path<String>) -> Result<Json<Value>> {
    let id = resolve_id(&services, &id).await?;
    let deleted = services.tasks.delete_task(&id).await;
    if !deleted {
        return Err(CoreError::NotFound(format!("task {id}")));
    }
    Ok(Json(json!({ "success": true })))
}

#[derive(Debug, Deserialize)]
pub struct NextTaskQuery {
    agent: Option<String>,
}

pub async fn next_task(State(services): State<Arc<Services>>, Query(query): Query<NextTaskQuery>) -> Json<Value> {
    let task: Option<Task> = services.tasks.get_next_task(query.agent.as_deref()).await;
    Json(json!({ "success": true, "task": task }))
}

pub async fn list_comments(State(services): State<Arc<Services>>, Path(id): Path<String>) -> Result<Json<Value>> {
    let id = resolve_id(&services, &id).await?;
    let comments: Vec<TaskComment> = services.tasks.list_comments(&id).await;
    Ok(Json(json!({ "success": true, "comments": comments })))
}

#[derive(Debug, Deserialize)]
pub struct AddCommentBody {
    author: String,
    content: String,
}

pub async fn add_comment(State(services): State<Arc<Services>>, Path(id): Path<String>, Json(body): Json<AddCommentBody>) -> Result<Json<Value>> {
    let id = resolve_id(&services, &id).await?;
    let comment = services.tasks.add_comment(&id, &body.author, &body.content).await?;
    Ok(Json(json!({ "success": true, "comment": comment })))
}

pub async fn review_bundle(State(services): State<Arc<Services>>, Path(id): Path<String>) -> Result<Json<Value>> {
    let id = resolve_id(&services, &id).await?;
    let bundle = services.review_bundles.build(&id).await.ok_or_else(|| CoreError::NotFound(format!("task {id}")))?;
    Ok(Json(json!({ "success": true, "bundle": bundle })))
}

use crate::clock::Clock;
use crate::models::{Focus, PresenceStatus, TaskStatus};
use crate::services::Services;
use crate::store::presence_store::PresenceStore;
use crate::store::task_store::TaskStore;
use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

pub async fn list(State(services): State<Arc<Services>>) -> Json<Value> {
    let presence = services.presence.list().await;
    Json(json!({ "success": true, "presence": presence }))
}

pub async fn get(State(services): State<Arc<Services>>, Path(agent): Path<String>) -> Json<Value> {
    let presence = services.presence.get(&agent).await;
    Json(json!({ "success": true, "presence": presence }))
}

#[derive(Debug, Deserialize)]
pub struct UpdatePresenceBody {
    status: PresenceStatus,
    current_task: Option<String>,
    since: Option<i64>,
}

pub async fn update(State(services): State<Arc<Services>>, Path(agent): Path<String>, Json(body): Json<UpdatePresenceBody>) -> Json<Value> {
    let presence = services.presence.update_presence(&agent, body.status, body.current_task, body.since).await;
    Json(json!({ "success": true, "presence": presence }))
}

pub async fn set_focus(State(services): State<Arc<Services>>, Path(agent): Path<String>, Json(focus): Json<Focus>) -> Json<Value> {
    let presence = services.presence.set_focus(&agent, focus).await;
    Json(json!({ "success": true, "presence": presence }))
}

/// One combined view per agent: ready work plus anything still waiting on
/// their attention (spec §4.7 groups presence and mention-ack under one
/// "what does this agent need to look at" surface).
pub async fn inbox(State(services): State<Arc<Services>>, Path(agent): Path<String>) -> Json<Value> {
    let tasks = services.tasks.list_tasks(Default::default()).await;
    let actionable: Vec<_> = tasks
        .into_iter()
        .filter(|t| t.assignee.as_deref().map(|a| a.eq_ignore_ascii_case(&agent)).unwrap_or(false))
        .filter(|t| matches!(t.status, TaskStatus::Todo | TaskStatus::Doing | TaskStatus::Validating))
        .collect();

    let mentions: Vec<_> = services.presence.mentions_for(&agent).await.into_iter().filter(|m| m.acked_at.is_none()).collect();

    Json(json!({ "success": true, "tasks": actionable, "unacked_mentions": mentions }))
}

#[derive(Debug, Deserialize, Default)]
pub struct AckBody {
    channel: Option<String>,
}

pub async fn ack(State(services): State<Arc<Services>>, Path(agent): Path<String>, body: Option<Json<AckBody>>) -> Json<Value> {
    let now = services.clock.now_ms();
    let body = body.map(|Json(b)| b).unwrap_or_default();

    match body.channel {
        Some(channel) => services.presence.ack_mentions(&agent, &channel, now).await,
        None => {
            let channels: std::collections::BTreeSet<String> = services
                .presence
                .mentions_for(&agent)
                .await
                .into_iter()
                .filter(|m| m.acked_at.is_none())
                .map(|m| m.channel)
                .collect();
            for channel in channels {
                services.presence.ack_mentions(&agent, &channel, now).await;
            }
        }
    }

    Json(json!({ "success": true }))
}

pub async fn mentions(State(services): State<Arc<Services>>, Path(agent): Path<String>) -> Json<Value> {
    let mentions = services.presence.mentions_for(&agent).await;
    Json(json!({ "success": true, "mentions": mentions }))
}

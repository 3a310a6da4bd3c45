use crate::events::SseFilter;
use crate::services::Services;
use crate::store::presence_store::PresenceStore;
use crate::store::task_store::TaskStore;
use axum::extract::{Query, State};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::{wrappers::UnboundedReceiverStream, Stream, StreamExt};

pub async fn health(State(services): State<Arc<Services>>) -> Json<Value> {
    Json(json!({
        "success": true,
        "status": "ok",
        "last_watchdog_tick": services.scheduler.last_tick_ms().await,
    }))
}

pub async fn team(State(services): State<Arc<Services>>) -> Json<Value> {
    let tasks = services.tasks.list_tasks(Default::default()).await;
    let mut counts = std::collections::BTreeMap::new();
    for task in &tasks {
        *counts.entry(task.status.as_str()).or_insert(0usize) += 1;
    }
    Json(json!({ "success": true, "task_counts": counts, "total": tasks.len() }))
}

pub async fn agents(State(services): State<Arc<Services>>) -> Json<Value> {
    let presence = services.presence.list().await;
    Json(json!({ "success": true, "agents": presence }))
}

pub async fn workflow(State(services): State<Arc<Services>>) -> Json<Value> {
    let bridge_stats = services.bridge.stats().await;
    Json(json!({ "success": true, "bridge": bridge_stats }))
}

pub async fn compliance(State(services): State<Arc<Services>>) -> Json<Value> {
    let actions = services.compliance.list().await;
    Json(json!({ "success": true, "actions": actions }))
}

pub async fn system(State(services): State<Arc<Services>>) -> Json<Value> {
    Json(json!({
        "success": true,
        "production": services.config.production,
        "subscribers": services.events.subscriber_count().await,
    }))
}

pub async fn build(State(_services): State<Arc<Services>>) -> Json<Value> {
    Json(json!({
        "success": true,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[derive(Debug, Deserialize, Default)]
pub struct ForceQuery {
    #[serde(default)]
    force: bool,
}

pub async fn tick_idle_nudge(State(services): State<Arc<Services>>, Query(q): Query<ForceQuery>) -> Json<Value> {
    services.scheduler.tick_all(q.force).await;
    Json(json!({ "success": true, "summaries": services.scheduler.all_summaries().await }))
}

pub async fn tick_cadence(State(services): State<Arc<Services>>, Query(q): Query<ForceQuery>) -> Json<Value> {
    services.scheduler.tick_all(q.force).await;
    Json(json!({ "success": true, "summaries": services.scheduler.all_summaries().await }))
}

pub async fn tick_mention_rescue(State(services): State<Arc<Services>>, Query(q): Query<ForceQuery>) -> Json<Value> {
    services.scheduler.tick_all(q.force).await;
    Json(json!({ "success": true, "summaries": services.scheduler.all_summaries().await }))
}

#[derive(Debug, Deserialize, Default)]
pub struct ActivityQuery {
    since: Option<i64>,
    limit: Option<usize>,
    agent: Option<String>,
}

pub async fn activity(State(services): State<Arc<Services>>, Query(q): Query<ActivityQuery>) -> Json<Value> {
    let events = services.events.activity_since(q.since, q.limit, q.agent.as_deref()).await;
    Json(json!({ "success": true, "events": events }))
}

#[derive(Debug, Deserialize, Default)]
pub struct SseQuery {
    agent: Option<String>,
    #[serde(default)]
    types: Vec<String>,
}

fn parse_event_type(s: &str) -> Option<crate::models::EventType> {
    use crate::models::EventType::*;
    Some(match s {
        "task_created" => TaskCreated,
        "task_updated" => TaskUpdated,
        "task_assigned" => TaskAssigned,
        "task_status_changed" => TaskStatusChanged,
        "task_deleted" => TaskDeleted,
        "message_posted" => MessagePosted,
        "presence_updated" => PresenceUpdated,
        "memory_written" => MemoryWritten,
        "insight:promoted" => InsightPromoted,
        "insight:triaged" => InsightTriaged,
        _ => return None,
    })
}

/// `GET /events`: batched SSE fan-out from the event bus (spec §4.5).
pub async fn events_sse(State(services): State<Arc<Services>>, Query(q): Query<SseQuery>) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let types = if q.types.is_empty() { None } else { Some(q.types.iter().filter_map(|t| parse_event_type(t)).collect()) };
    let (_id, rx) = services.events.subscribe(SseFilter { topics: None, types, agent: q.agent }).await;

    let stream = UnboundedReceiverStream::new(rx).map(|frame| {
        let (event_name, payload) = match frame {
            crate::events::SseFrame::Single(event) => (event.event_type.as_str(), json!(event)),
            crate::events::SseFrame::Batch(events) => ("batch", json!(events)),
        };
        Ok(SseEvent::default().event(event_name).data(payload.to_string()))
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

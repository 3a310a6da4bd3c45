use crate::error::{CoreError, Result};
use crate::services::Services;
use crate::store::chat_store::ChatStore;
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct PostMessageBody {
    from: String,
    content: String,
    channel: Option<String>,
    thread_id: Option<String>,
    reply_to: Option<String>,
}

pub async fn post_message(State(services): State<Arc<Services>>, Json(body): Json<PostMessageBody>) -> Json<Value> {
    let message = services
        .chat
        .post(&body.from, &body.content, body.channel.as_deref(), body.thread_id.as_deref(), body.reply_to.as_deref())
        .await;
    Json(json!({ "success": true, "message": message }))
}

#[derive(Debug, Deserialize)]
pub struct ListChannelQuery {
    channel: String,
    limit: Option<usize>,
}

pub async fn list_channel(State(services): State<Arc<Services>>, Query(query): Query<ListChannelQuery>) -> Json<Value> {
    let messages = services.chat.list_channel(&query.channel, query.limit).await;
    Json(json!({ "success": true, "messages": messages }))
}

pub async fn get_message(State(services): State<Arc<Services>>, Path(id): Path<String>) -> Result<Json<Value>> {
    let message = services.chat.get(&id).await.ok_or_else(|| CoreError::NotFound(format!("message {id}")))?;
    Ok(Json(json!({ "success": true, "message": message })))
}

#[derive(Debug, Deserialize)]
pub struct EditMessageBody {
    by: String,
    content: String,
}

pub async fn edit_message(State(services): State<Arc<Services>>, Path(id): Path<String>, Json(body): Json<EditMessageBody>) -> Result<Json<Value>> {
    let message = services.chat.edit(&id, &body.by, &body.content).await?;
    Ok(Json(json!({ "success": true, "message": message })))
}

#[derive(Debug, Deserialize)]
pub struct DeleteMessageBody {
    by: String,
}

pub async fn delete_message(State(services): State<Arc<Services>>, Path(id): Path<String>, Json(body): Json<DeleteMessageBody>) -> Result<Json<Value>> {
    services.chat.delete(&id, &body.by).await?;
    Ok(Json(json!({ "success": true })))
}

#[derive(Debug, Deserialize)]
pub struct ReactBody {
    by: String,
    emoji: String,
}

pub async fn react(State(services): State<Arc<Services>>, Path(id): Path<String>, Json(body): Json<ReactBody>) -> Result<Json<Value>> {
    services.chat.react(&id, &body.by, &body.emoji).await?;
    let message = services.chat.get(&id).await;
    Ok(Json(json!({ "success": true, "message": message })))
}

pub async fn thread(State(services): State<Arc<Services>>, Path(id): Path<String>) -> Json<Value> {
    let messages = services.chat.thread(&id).await;
    Json(json!({ "success": true, "messages": messages }))
}

pub async fn channels(State(services): State<Arc<Services>>) -> Json<Value> {
    let channels = services.chat.channels().await;
    Json(json!({ "success": true, "channels": channels }))
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    q: String,
}

pub async fn search(State(services): State<Arc<Services>>, Query(query): Query<SearchQuery>) -> Json<Value> {
    let messages = services.chat.search(&query.q).await;
    Json(json!({ "success": true, "messages": messages }))
}

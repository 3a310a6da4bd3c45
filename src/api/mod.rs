//! HTTP surface (spec §6.1): task board, chat, presence/inbox, and health
//! endpoints over a single axum [`Router`], mirroring the teacher's
//! `ApiServer` shape — one `Arc<Services>` as shared state, routes grouped
//! by resource, `tower_http` for tracing/CORS.

mod chat;
mod health;
mod presence;
mod tasks;

use crate::services::Services;
use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub fn router(services: Arc<Services>) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/health/team", get(health::team))
        .route("/health/agents", get(health::agents))
        .route("/health/workflow", get(health::workflow))
        .route("/health/compliance", get(health::compliance))
        .route("/health/system", get(health::system))
        .route("/health/build", get(health::build))
        .route("/health/idle-nudge/tick", axum::routing::post(health::tick_idle_nudge))
        .route("/health/cadence-watchdog/tick", axum::routing::post(health::tick_cadence))
        .route("/health/mention-rescue/tick", axum::routing::post(health::tick_mention_rescue))
        .route("/tasks", get(tasks::list_tasks).post(tasks::create_task))
        .route("/tasks/next", get(tasks::next_task))
        .route("/tasks/{id}", get(tasks::get_task).patch(tasks::update_task).delete(tasks::delete_task))
        .route("/tasks/{id}/comments", get(tasks::list_comments).post(tasks::add_comment))
        .route("/tasks/{id}/review-bundle", get(tasks::review_bundle))
        .route("/chat/messages", get(chat::list_channel).post(chat::post_message))
        .route("/chat/messages/{id}", get(chat::get_message).patch(chat::edit_message).delete(chat::delete_message))
        .route("/chat/messages/{id}/react", axum::routing::post(chat::react))
        .route("/chat/messages/{id}/thread", get(chat::thread))
        .route("/chat/channels", get(chat::channels))
        .route("/chat/search", get(chat::search))
        .route("/presence", get(presence::list))
        .route("/presence/{agent}", get(presence::get).post(presence::update))
        .route("/presence/{agent}/focus", axum::routing::post(presence::set_focus))
        .route("/inbox/{agent}", get(presence::inbox))
        .route("/inbox/{agent}/ack", axum::routing::post(presence::ack))
        .route("/inbox/{agent}/mentions", get(presence::mentions))
        .route("/events", get(health::events_sse))
        .route("/activity", get(health::activity))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(services)
}

//! # Reflectt Core
//!
//! A multi-agent work coordination server: a gated task board, a set of
//! watchdog loops that keep the board honest, a chat layer with an
//! approval-detecting bot, presence/mention tracking, and an insight→task
//! bridge, all fanning through one event bus.
//!
//! ## Architecture
//!
//! - **Task store**: the gated task state machine (spec §4.1) — create,
//!   patch, comment, and resolve tasks against QA/artifact/reviewer gates.
//! - **Watchdogs**: a closed set of periodic loops (spec §4.2) that nudge,
//!   escalate, or auto-transition stalled work, each driven by a single
//!   [`watchdog::Scheduler`].
//! - **Bridge**: promotes insights into tasks under a feature/severity gate
//!   and an author-exclusion assignment guardrail (spec §4.3, §4.4).
//! - **Chat**: an append-only message store plus a regex-based approval
//!   detector and category-based message router (spec §4.6).
//! - **Presence**: explicit and inferred agent status, heartbeats, and
//!   mention-ack tracking (spec §4.7).
//! - **Artifacts**: workspace mirroring and PR review-bundle assembly
//!   (spec §4.8).
//! - **Events**: a bounded, totally-ordered bus with inline listeners and
//!   batched SSE fan-out (spec §4.5).

/// HTTP API server and endpoints
pub mod api;
/// Workspace mirroring and PR review-bundle assembly
pub mod artifact;
/// Deterministic assignment and reviewer scoring
pub mod assignment;
/// Insight-to-task bridge
pub mod bridge;
/// Chat store, approval detection, and message routing
pub mod chat;
/// Wall-clock abstraction for deterministic tests
pub mod clock;
/// Watchdog action audit log and rollback
pub mod compliance;
/// System configuration
pub mod config;
/// System-wide constants
pub mod constants;
/// Error types and handling
pub mod error;
/// In-process event bus and SSE fan-out
pub mod events;
/// @mention extraction and ack wiring
pub mod mention;
/// Core data models
pub mod models;
/// Composition root wiring stores, ports, and watchdog loops together
pub mod services;
/// Task, chat, and presence stores
pub mod store;
/// Watchdog scheduler and the closed set of periodic loops
pub mod watchdog;

pub use error::{CoreError, Result};

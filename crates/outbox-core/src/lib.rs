//! outbox-core - Core library for Outbox
//!
//! This crate contains the offline sync machinery shared by every Outbox
//! front end: the durable action queue, the sync engine that drains it against
//! a remote API, conflict resolution, the offline cache and the aggregated
//! status stream consumed by UIs.

pub mod cache;
pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod models;
pub mod network;
pub mod queue;
pub mod remote;
pub mod resolver;
pub mod status;
pub mod storage;
pub mod subscription;
pub mod util;

pub use client::{BackgroundTasks, SyncClient};
pub use config::SyncConfig;
pub use engine::DrainResult;
pub use error::{Error, Result};
pub use models::{EntityId, NewAction, Operation, QueuedAction, Resolution, VersionMarker};
pub use queue::EnqueueOutcome;
pub use status::OutboxStatus;
pub use subscription::Subscription;

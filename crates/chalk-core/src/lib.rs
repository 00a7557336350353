//! chalk-core - Core library for Chalk
//!
//! This crate holds the offline-first sync pipeline (durable queue, upsert
//! client, drain worker) and the live collaboration protocol (pairing,
//! sessions, presence, live strokes) shared by every Chalk front end.

pub mod auth;
pub mod codec;
pub mod collab;
pub mod config;
pub mod db;
pub mod error;
pub mod ids;
pub mod models;
pub mod queue;
pub mod remote;
pub mod storage;
pub mod sync;
pub mod telemetry;
pub mod util;

pub use error::{Error, Result};
pub use queue::{DurableQueue, QueueItem, QueueStats, QueueStatus, RecordKind, SyncPayload};
pub use sync::{SyncClient, SyncReport};

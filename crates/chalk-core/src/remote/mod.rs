//! Remote relational store.
//!
//! Every domain record is written by upsert keyed on its client-generated
//! `id`, so replays and duplicates converge on a single row. Invite-code
//! acceptance goes through the atomic `claim_invite_code` procedure.

mod memory;
mod postgrest;

use async_trait::async_trait;
use serde_json::Value;

use crate::auth::Identity;
use crate::error::Result;

pub use memory::MemoryRemote;
pub use postgrest::PostgrestRemote;

/// Server-side procedure that atomically claims a pending invite code
pub const CLAIM_INVITE_CODE_RPC: &str = "claim_invite_code";

/// Generic query/upsert interface to the backing store
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Insert or merge `rows` into `table`, keyed by `id`
    async fn upsert(&self, identity: &Identity, table: &str, rows: Vec<Value>) -> Result<()>;

    /// Plain insert; fails on duplicate ids
    async fn insert(&self, identity: &Identity, table: &str, row: Value) -> Result<()>;

    /// Rows of `table` matching every `(column, value)` equality filter
    async fn select(
        &self,
        identity: Option<&Identity>,
        table: &str,
        filters: &[(&str, &str)],
    ) -> Result<Vec<Value>>;

    /// Call a stored procedure
    async fn rpc(&self, identity: &Identity, function: &str, params: Value) -> Result<Value>;
}

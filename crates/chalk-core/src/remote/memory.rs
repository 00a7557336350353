use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};

use super::{RemoteStore, CLAIM_INVITE_CODE_RPC};
use crate::auth::Identity;
use crate::collab::{channel_topic, LocalRealtimeHub, LIVE_STROKES_TABLE};
use crate::error::{Error, Result};
use crate::models::{LinkStatus, TeacherStudentLink};

type Table = BTreeMap<String, Map<String, Value>>;

/// In-process remote store with upsert-by-id semantics.
///
/// Supports forced outages (`set_offline`), per-table failures and the
/// atomic invite claim. Inserts into `live_strokes` are forwarded to an
/// attached [`LocalRealtimeHub`] the way database change feeds would be.
#[derive(Debug, Default)]
pub struct MemoryRemote {
    tables: Mutex<HashMap<String, Table>>,
    failing_tables: Mutex<HashSet<String>>,
    offline: AtomicBool,
    write_counts: Mutex<HashMap<String, usize>>,
    realtime: Option<LocalRealtimeHub>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_realtime(mut self, hub: LocalRealtimeHub) -> Self {
        self.realtime = Some(hub);
        self
    }

    /// Fail every request until switched back
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Fail requests touching `table`
    pub fn fail_table(&self, table: &str, failing: bool) {
        let mut failing_tables = lock(&self.failing_tables);
        if failing {
            failing_tables.insert(table.to_string());
        } else {
            failing_tables.remove(table);
        }
    }

    /// Current rows of `table`, ordered by id
    pub fn rows(&self, table: &str) -> Vec<Value> {
        lock(&self.tables)
            .get(table)
            .map(|rows| rows.values().cloned().map(Value::Object).collect())
            .unwrap_or_default()
    }

    pub fn row(&self, table: &str, id: &str) -> Option<Value> {
        lock(&self.tables)
            .get(table)
            .and_then(|rows| rows.get(id))
            .cloned()
            .map(Value::Object)
    }

    /// Successful upserts and inserts applied to `table`
    pub fn write_count(&self, table: &str) -> usize {
        lock(&self.write_counts).get(table).copied().unwrap_or(0)
    }

    fn check(&self, table: &str) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::Remote("network unreachable".to_string()));
        }
        if lock(&self.failing_tables).contains(table) {
            return Err(Error::Remote(format!("{table} is unavailable (503)")));
        }
        Ok(())
    }

    fn count_write(&self, table: &str) {
        *lock(&self.write_counts).entry(table.to_string()).or_default() += 1;
    }

    fn claim_invite_code(&self, identity: &Identity, params: &Value) -> Result<Value> {
        let code = params
            .get("invite_code")
            .and_then(Value::as_str)
            .map(|code| code.trim().to_ascii_uppercase())
            .ok_or_else(|| Error::InvalidInput("invite_code is required".to_string()))?;

        let mut tables = lock(&self.tables);
        let Some(links) = tables.get_mut("teacher_student_links") else {
            return Ok(Value::Null);
        };

        let now = Utc::now();
        for row in links.values_mut() {
            let Ok(mut link) = serde_json::from_value::<TeacherStudentLink>(Value::Object(row.clone()))
            else {
                continue;
            };
            if link.invite_code != code {
                continue;
            }
            if link.status != LinkStatus::Pending
                || link.is_expired(now)
                || link.teacher_id == identity.user_id
            {
                return Ok(Value::Null);
            }

            link.status = LinkStatus::Active;
            link.student_id = Some(identity.user_id.clone());
            link.accepted_at = Some(now);
            let claimed = serde_json::to_value(&link)?;
            if let Value::Object(fields) = &claimed {
                row.clone_from(fields);
            }
            return Ok(claimed);
        }
        Ok(Value::Null)
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn upsert(&self, _identity: &Identity, table: &str, rows: Vec<Value>) -> Result<()> {
        self.check(table)?;
        let rows = rows
            .into_iter()
            .map(into_keyed_row)
            .collect::<Result<Vec<_>>>()?;

        let mut tables = lock(&self.tables);
        let stored = tables.entry(table.to_string()).or_default();
        for (id, fields) in rows {
            stored.entry(id).or_default().extend(fields);
        }
        drop(tables);

        self.count_write(table);
        Ok(())
    }

    async fn insert(&self, _identity: &Identity, table: &str, row: Value) -> Result<()> {
        self.check(table)?;
        let (id, fields) = into_keyed_row(row)?;

        {
            let mut tables = lock(&self.tables);
            let stored = tables.entry(table.to_string()).or_default();
            if stored.contains_key(&id) {
                return Err(Error::Remote(format!(
                    "duplicate key value violates unique constraint \"{table}_pkey\" (409)"
                )));
            }
            stored.insert(id, fields.clone());
        }
        self.count_write(table);

        if table == LIVE_STROKES_TABLE {
            if let (Some(hub), Some(session_id)) = (
                &self.realtime,
                fields.get("session_id").and_then(Value::as_str),
            ) {
                hub.publish_row(&channel_topic(session_id), table, Value::Object(fields.clone()));
            }
        }
        Ok(())
    }

    async fn select(
        &self,
        _identity: Option<&Identity>,
        table: &str,
        filters: &[(&str, &str)],
    ) -> Result<Vec<Value>> {
        self.check(table)?;
        Ok(lock(&self.tables)
            .get(table)
            .map(|rows| {
                rows.values()
                    .filter(|row| {
                        filters.iter().all(|(column, expected)| {
                            row.get(*column).is_some_and(|value| match value {
                                Value::String(value) => value == expected,
                                other => other.to_string() == *expected,
                            })
                        })
                    })
                    .cloned()
                    .map(Value::Object)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn rpc(&self, identity: &Identity, function: &str, params: Value) -> Result<Value> {
        self.check(function)?;
        match function {
            CLAIM_INVITE_CODE_RPC => self.claim_invite_code(identity, &params),
            other => Err(Error::Remote(format!(
                "Could not find the function public.{other} (404)"
            ))),
        }
    }
}

fn into_keyed_row(row: Value) -> Result<(String, Map<String, Value>)> {
    let Value::Object(fields) = row else {
        return Err(Error::InvalidInput("rows must be JSON objects".to_string()));
    };
    let id = fields
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::InvalidInput("rows must carry a string id".to_string()))?
        .to_string();
    Ok((id, fields))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

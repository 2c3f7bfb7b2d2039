//! The cron scheduler (§4.D): parses a cron configuration, binds each entry
//! to a handler method, and fires it on schedule.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use cron::Schedule;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::DispatchError;

/// One cron entry as it appears in the cron configuration file (§6).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CronEntry {
    pub id: String,
    pub time: String,
    pub action: String,
    #[serde(default)]
    pub server_id: Option<String>,
}

/// The cron configuration file's shape: `server_type -> [CronEntry]`.
pub type CronConfigFile = HashMap<String, Vec<CronEntry>>;

/// A parameterless, time-triggered invocation. Cron actions receive no
/// message and no session (§4.D "Firing").
#[async_trait]
pub trait CronHandler: Send + Sync {
    async fn fire(&self) -> Result<(), DispatchError>;
}

/// Assembles the `handler_name -> method_name -> CronHandler` registry ahead
/// of [`crate::server::DispatchServer::start`].
#[derive(Default)]
pub struct CronHandlerRegistryBuilder {
    handlers: HashMap<String, HashMap<String, Arc<dyn CronHandler>>>,
}

impl CronHandlerRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        mut self,
        handler: impl Into<String>,
        method: impl Into<String>,
        callable: Arc<dyn CronHandler>,
    ) -> Self {
        self.handlers
            .entry(handler.into())
            .or_default()
            .insert(method.into(), callable);
        self
    }

    fn build(self) -> HashMap<String, HashMap<String, Arc<dyn CronHandler>>> {
        self.handlers
    }
}

/// Owns the admitted cron list and the [`CronScheduler::jobs`] table
/// (`JobTable`). `JobTable` is keyed by `String` on both insertion and
/// removal (§9 open question 1, resolved).
pub struct CronScheduler {
    cron_handlers: HashMap<String, HashMap<String, Arc<dyn CronHandler>>>,
    /// The admitted cron list (`CronList`), keyed by id for dedup.
    admitted: DashMap<String, CronEntry>,
    /// `JobTable`: populated only once a cron has actually been scheduled.
    jobs: DashMap<String, CancellationToken>,
}

impl CronScheduler {
    pub fn new(cron_handlers: CronHandlerRegistryBuilder) -> Self {
        Self {
            cron_handlers: cron_handlers.build(),
            admitted: DashMap::new(),
            jobs: DashMap::new(),
        }
    }

    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_scheduled(&self, id: &str) -> bool {
        self.jobs.contains_key(id)
    }

    /// Cancel every scheduled job. Used by `shutdown()`'s hard-cancellation
    /// convenience wrapper, not by `stop()` itself (§4.F).
    pub fn cancel_all(&self) {
        for entry in self.jobs.iter() {
            entry.value().cancel();
        }
        self.jobs.clear();
    }

    /// Admit and schedule every entry in `entries` addressed to `server_id`
    /// (or unaddressed). Returns the number of crons that ended up
    /// scheduled. Mirrors `addCrons` (§4.D "Runtime mutation"), and is also
    /// used by `start()` for the initially loaded cron list.
    pub async fn add_crons(&self, entries: Vec<CronEntry>, server_id: &str) -> usize {
        let mut scheduled = 0;
        for entry in entries {
            if let Some(wanted) = &entry.server_id {
                if wanted != server_id {
                    continue;
                }
            }
            if self.admitted.contains_key(&entry.id) {
                tracing::warn!(cron_id = %entry.id, "duplicate cron id rejected");
                continue;
            }
            self.admitted.insert(entry.id.clone(), entry.clone());
            if self.schedule(&entry).await {
                scheduled += 1;
            }
        }
        scheduled
    }

    /// Cancel and forget every entry in `entries` by id. Logs a warning for
    /// any id with no corresponding `JobTable` entry, matching the
    /// original's behavior rather than erroring.
    pub fn remove_crons(&self, entries: &[CronEntry]) {
        for entry in entries {
            self.admitted.remove(&entry.id);
            match self.jobs.remove(&entry.id) {
                Some((_, token)) => token.cancel(),
                None => tracing::warn!(cron_id = %entry.id, "no scheduled job for cron id"),
            }
        }
    }

    /// Parse `entry.action` and `entry.time`, look up the cron handler, and
    /// spawn a task that fires it on schedule. Returns whether scheduling
    /// succeeded; failures are logged and the cron is simply not armed.
    async fn schedule(&self, entry: &CronEntry) -> bool {
        let Some((handler_name, method_name)) = entry.action.split_once('.') else {
            tracing::error!(cron_id = %entry.id, action = %entry.action, "malformed cron action");
            return false;
        };
        if handler_name.is_empty() || method_name.is_empty() {
            tracing::error!(cron_id = %entry.id, action = %entry.action, "malformed cron action");
            return false;
        }
        let Some(callable) = self
            .cron_handlers
            .get(handler_name)
            .and_then(|methods| methods.get(method_name))
            .cloned()
        else {
            tracing::error!(cron_id = %entry.id, handler = %handler_name, method = %method_name, "unknown cron handler");
            return false;
        };
        let schedule = match Schedule::from_str(&entry.time) {
            Ok(schedule) => schedule,
            Err(err) => {
                tracing::error!(cron_id = %entry.id, time = %entry.time, error = %err, "invalid cron expression");
                return false;
            }
        };

        let token = CancellationToken::new();
        let id = entry.id.clone();
        let run_token = token.clone();
        tokio::spawn(async move {
            loop {
                let Some(next) = schedule.upcoming(Utc).next() else {
                    break;
                };
                let now = Utc::now();
                let delay = (next - now).to_std().unwrap_or(std::time::Duration::ZERO);
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = run_token.cancelled() => break,
                }
                if let Err(err) = callable.fire().await {
                    tracing::error!(cron_id = %id, error = %err, "cron handler returned an error");
                }
            }
        });
        self.jobs.insert(entry.id.clone(), token);
        true
    }
}

/// Loads a cron configuration file, trying `base_path/crons.json` first and
/// falling back to `base_path/config/<env>/crons.json` (§4.D "Loading").
/// A missing file at both locations is not an error: it means "no crons for
/// this process".
pub fn load_cron_config(base_path: &std::path::Path, env: &str) -> Result<CronConfigFile, DispatchError> {
    let primary = base_path.join("crons.json");
    let path = if primary.exists() {
        primary
    } else {
        base_path.join("config").join(env).join("crons.json")
    };
    if !path.exists() {
        return Ok(CronConfigFile::new());
    }
    let content = std::fs::read_to_string(&path)?;
    let config: CronConfigFile = serde_json::from_str(&content)?;
    Ok(config)
}

//! `DispatchConfig` (§4.G): an explicit, enumerated configuration record —
//! one named field per concern, rather than a loosely typed key-value bag.

use std::path::PathBuf;
use std::sync::Arc;

use crate::cron::{CronEntry, CronHandlerRegistryBuilder};
use crate::error::DispatchError;
use crate::filter::{AfterFilter, BeforeFilter};
use crate::handler::HandlerRegistryBuilder;
use crate::route::Message;
use crate::session::BackendSession;
use serde_json::Value;

/// `handler.handle(err, &msg, resp, session) -> (new_err, new_resp)`, invoked
/// whenever an error escapes the before filters or the handler (§4.F step 5).
#[async_trait::async_trait]
pub trait ErrorHandler: Send + Sync {
    async fn handle(
        &self,
        err: DispatchError,
        msg: &Message,
        resp: Option<Value>,
        session: &mut BackendSession,
    ) -> (Option<DispatchError>, Option<Value>);
}

/// One named server's wiring: everything [`crate::server::DispatchServer::start`]
/// needs to assemble a running dispatch engine.
pub struct DispatchConfig {
    pub server_type: String,
    pub server_id: String,
    pub base_path: PathBuf,
    pub env: String,

    pub global_before_filters: Vec<BeforeFilter>,
    pub global_after_filters: Vec<AfterFilter>,
    pub before_filters: Vec<BeforeFilter>,
    pub after_filters: Vec<AfterFilter>,

    pub global_error_handler: Option<Arc<dyn ErrorHandler>>,
    pub error_handler: Option<Arc<dyn ErrorHandler>>,

    pub crons: Vec<CronEntry>,
    pub handlers: HandlerRegistryBuilder,
    pub cron_handlers: CronHandlerRegistryBuilder,
}

impl DispatchConfig {
    pub fn new(server_type: impl Into<String>, server_id: impl Into<String>, base_path: impl Into<PathBuf>) -> Self {
        Self {
            server_type: server_type.into(),
            server_id: server_id.into(),
            base_path: base_path.into(),
            env: "development".into(),
            global_before_filters: Vec::new(),
            global_after_filters: Vec::new(),
            before_filters: Vec::new(),
            after_filters: Vec::new(),
            global_error_handler: None,
            error_handler: None,
            crons: Vec::new(),
            handlers: HandlerRegistryBuilder::new(),
            cron_handlers: CronHandlerRegistryBuilder::new(),
        }
    }

    pub fn env(mut self, env: impl Into<String>) -> Self {
        self.env = env.into();
        self
    }

    pub fn add_global_before(mut self, filter: BeforeFilter) -> Self {
        self.global_before_filters.push(filter);
        self
    }

    pub fn add_global_after(mut self, filter: AfterFilter) -> Self {
        self.global_after_filters.push(filter);
        self
    }

    pub fn add_before(mut self, filter: BeforeFilter) -> Self {
        self.before_filters.push(filter);
        self
    }

    pub fn add_after(mut self, filter: AfterFilter) -> Self {
        self.after_filters.push(filter);
        self
    }

    pub fn global_error_handler(mut self, handler: Arc<dyn ErrorHandler>) -> Self {
        self.global_error_handler = Some(handler);
        self
    }

    pub fn error_handler(mut self, handler: Arc<dyn ErrorHandler>) -> Self {
        self.error_handler = Some(handler);
        self
    }

    pub fn add_cron(mut self, entry: CronEntry) -> Self {
        self.crons.push(entry);
        self
    }

    pub fn handlers(mut self, handlers: HandlerRegistryBuilder) -> Self {
        self.handlers = handlers;
        self
    }

    pub fn cron_handlers(mut self, cron_handlers: CronHandlerRegistryBuilder) -> Self {
        self.cron_handlers = cron_handlers;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults_to_development_env_and_empty_chains() {
        let config = DispatchConfig::new("area", "area-1", "/tmp/nonexistent");
        assert_eq!(config.env, "development");
        assert!(config.global_before_filters.is_empty());
        assert!(config.crons.is_empty());
    }

    #[test]
    fn env_builder_method_overrides_default() {
        let config = DispatchConfig::new("area", "area-1", "/tmp/nonexistent").env("production");
        assert_eq!(config.env, "production");
    }
}

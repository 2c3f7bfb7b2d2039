//! The per-server-type handler registry and invocation contract (§4.C).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::DispatchError;
use crate::route::{Message, RouteRecord};
use crate::session::BackendSession;

/// User-supplied request handler: `(msg, session) -> Result<resp, err>`.
///
/// Handlers are user code; the service does not wrap them in any exception
/// barrier beyond ordinary `Result` propagation (§4.C).
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, msg: Message, session: &mut BackendSession) -> Result<Value, DispatchError>;
}

/// Assembles the `handler_name -> method_name -> Handler` registry for one
/// server type ahead of [`crate::server::DispatchServer::start`].
///
/// The original scans a conventional directory of user modules at start;
/// Rust has no equivalent dynamic code loading, so this crate requires the
/// application to register handlers explicitly (§9 open question 5).
#[derive(Default)]
pub struct HandlerRegistryBuilder {
    handlers: HashMap<String, HashMap<String, Arc<dyn Handler>>>,
}

impl HandlerRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        mut self,
        handler: impl Into<String>,
        method: impl Into<String>,
        callable: Arc<dyn Handler>,
    ) -> Self {
        self.handlers
            .entry(handler.into())
            .or_default()
            .insert(method.into(), callable);
        self
    }

    pub fn build(self) -> HandlerService {
        HandlerService {
            handlers: self.handlers,
        }
    }
}

/// Read-only, two-level handler registry for this process's server type.
pub struct HandlerService {
    handlers: HashMap<String, HashMap<String, Arc<dyn Handler>>>,
}

impl HandlerService {
    pub fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub async fn handle(
        &self,
        route: &RouteRecord,
        msg: Message,
        session: &mut BackendSession,
    ) -> Result<Value, DispatchError> {
        let methods = self
            .handlers
            .get(&route.handler)
            .ok_or_else(|| DispatchError::UnknownHandler(route.handler.clone()))?;
        let callable = methods.get(&route.method).ok_or_else(|| DispatchError::UnknownMethod {
            handler: route.handler.clone(),
            method: route.method.clone(),
        })?;
        callable.handle(msg, session).await
    }
}

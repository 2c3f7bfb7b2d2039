use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

use crate::error::DispatchError;
use crate::rpc::SessionExport;

/// Where a [`FrontendSession`] persists pushed settings, e.g. a session
/// store shared across the connector fleet. Out of scope for this crate
/// beyond the boundary contract: the dispatch core never calls this itself.
#[async_trait]
pub trait FrontendStore: Send + Sync {
    async fn push(&self, session_id: &str, key: &str, value: Value) -> Result<(), DispatchError>;
}

/// The authoritative, mutable session for one client connection, living on
/// the connector (frontend) process. Mutations are visible to every
/// subsequent request on the same connection.
pub struct FrontendSession {
    pub id: String,
    pub frontend_id: String,
    uid: RwLock<Option<String>>,
    settings: DashMap<String, Value>,
}

impl FrontendSession {
    pub fn new(id: impl Into<String>, frontend_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            frontend_id: frontend_id.into(),
            uid: RwLock::new(None),
            settings: DashMap::new(),
        }
    }

    pub fn uid(&self) -> Option<String> {
        self.uid.read().unwrap().clone()
    }

    pub fn bind(&self, uid: impl Into<String>) {
        *self.uid.write().unwrap() = Some(uid.into());
    }

    pub fn unbind(&self) {
        *self.uid.write().unwrap() = None;
    }

    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.settings.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.settings.get(key).map(|entry| entry.value().clone())
    }

    /// Writes the current value of `key` through to the configured store.
    pub async fn push(&self, key: &str, store: &dyn FrontendStore) -> Result<(), DispatchError> {
        let value = self.get(key).unwrap_or(Value::Null);
        store.push(&self.id, key, value).await
    }

    pub fn export(&self) -> SessionExport {
        SessionExport {
            id: self.id.clone(),
            frontend_id: self.frontend_id.clone(),
            uid: self.uid(),
            settings: self
                .settings
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().clone()))
                .collect::<HashMap<_, _>>(),
        }
    }
}

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::error::DispatchError;
use crate::rpc::{FrontendRpc, SessionExport};

/// A per-request snapshot of a [`crate::session::FrontendSession`], held by
/// a backend server for the duration of one request.
///
/// Local `set` calls mutate only this snapshot. `push`/`push_all`/`bind`/
/// `unbind` are explicit RPCs to the originating frontend; unpushed local
/// changes are silently discarded when this value is dropped.
#[derive(Clone)]
pub struct BackendSession {
    pub id: String,
    pub frontend_id: String,
    uid: Option<String>,
    settings: HashMap<String, Value>,
    rpc: Arc<dyn FrontendRpc>,
}

impl BackendSession {
    pub fn new(
        id: impl Into<String>,
        frontend_id: impl Into<String>,
        uid: Option<String>,
        settings: HashMap<String, Value>,
        rpc: Arc<dyn FrontendRpc>,
    ) -> Self {
        Self {
            id: id.into(),
            frontend_id: frontend_id.into(),
            uid,
            settings,
            rpc,
        }
    }

    /// Rebuild a snapshot from an export received over the wire.
    pub fn from_export(export: SessionExport, rpc: Arc<dyn FrontendRpc>) -> Self {
        Self::new(export.id, export.frontend_id, export.uid, export.settings, rpc)
    }

    pub fn uid(&self) -> Option<&str> {
        self.uid.as_deref()
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.settings.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.settings.get(key)
    }

    /// RPCs the frontend to bind `uid` on the authoritative session, then
    /// mirrors the change onto this snapshot.
    pub async fn bind(&mut self, uid: impl Into<String>) -> Result<(), DispatchError> {
        let uid = uid.into();
        self.rpc.bind(&self.frontend_id, &self.id, &uid).await?;
        self.uid = Some(uid);
        Ok(())
    }

    pub async fn unbind(&mut self, uid: &str) -> Result<(), DispatchError> {
        self.rpc.unbind(&self.frontend_id, &self.id, uid).await?;
        self.uid = None;
        Ok(())
    }

    /// RPCs the frontend to overwrite a single setting on the authoritative
    /// session with this snapshot's current value.
    pub async fn push(&self, key: &str) -> Result<(), DispatchError> {
        let value = self.settings.get(key).cloned().unwrap_or(Value::Null);
        self.rpc.push(&self.frontend_id, &self.id, key, value).await
    }

    /// RPCs the frontend to overwrite every setting on the authoritative
    /// session with this snapshot's current values.
    pub async fn push_all(&self) -> Result<(), DispatchError> {
        self.rpc
            .push_all(&self.frontend_id, &self.id, self.settings.clone())
            .await
    }

    pub fn export(&self) -> SessionExport {
        SessionExport {
            id: self.id.clone(),
            frontend_id: self.frontend_id.clone(),
            uid: self.uid.clone(),
            settings: self.settings.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingRpc {
        pushed: Mutex<Vec<(String, Value)>>,
        bound: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl FrontendRpc for RecordingRpc {
        async fn bind(&self, _frontend_id: &str, _session_id: &str, uid: &str) -> Result<(), DispatchError> {
            self.bound.lock().unwrap().push(uid.to_string());
            Ok(())
        }

        async fn unbind(&self, _frontend_id: &str, _session_id: &str, _uid: &str) -> Result<(), DispatchError> {
            Ok(())
        }

        async fn push(
            &self,
            _frontend_id: &str,
            _session_id: &str,
            key: &str,
            value: Value,
        ) -> Result<(), DispatchError> {
            self.pushed.lock().unwrap().push((key.to_string(), value));
            Ok(())
        }

        async fn push_all(
            &self,
            _frontend_id: &str,
            _session_id: &str,
            _settings: HashMap<String, Value>,
        ) -> Result<(), DispatchError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn set_without_push_does_not_touch_frontend() {
        let rpc = Arc::new(RecordingRpc::default());
        let mut session = BackendSession::new("s1", "f1", None, HashMap::new(), rpc.clone());
        session.set("score", Value::from(42));
        assert_eq!(session.get("score"), Some(&Value::from(42)));
        assert!(rpc.pushed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn push_sends_current_value_to_frontend() {
        let rpc = Arc::new(RecordingRpc::default());
        let mut session = BackendSession::new("s1", "f1", None, HashMap::new(), rpc.clone());
        session.set("score", Value::from(42));
        session.push("score").await.unwrap();
        assert_eq!(
            rpc.pushed.lock().unwrap().as_slice(),
            &[("score".to_string(), Value::from(42))]
        );
    }

    #[tokio::test]
    async fn export_round_trips_through_from_export() {
        let rpc = Arc::new(RecordingRpc::default());
        let mut settings = HashMap::new();
        settings.insert("score".to_string(), Value::from(7));
        let session = BackendSession::new("s1", "f1", Some("u1".into()), settings, rpc.clone());
        let exported = session.export();
        let rebuilt = BackendSession::from_export(exported.clone(), rpc);
        assert_eq!(rebuilt.export(), exported);
    }

    #[tokio::test]
    async fn bind_updates_local_uid() {
        let rpc = Arc::new(RecordingRpc::default());
        let mut session = BackendSession::new("s1", "f1", None, HashMap::new(), rpc.clone());
        session.bind("user-9").await.unwrap();
        assert_eq!(session.uid(), Some("user-9"));
        assert_eq!(rpc.bound.lock().unwrap().as_slice(), &["user-9".to_string()]);
    }
}

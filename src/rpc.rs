//! External RPC boundary traits.
//!
//! The dispatch core never implements these itself — transport, serialization
//! over the wire, and peer discovery belong to the surrounding RPC mesh.
//! These traits are the contract the core requires from that collaborator.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::DispatchError;
use crate::route::Message;

/// A plain-data view of a session, suitable for forwarding across a process
/// boundary.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct SessionExport {
    pub id: String,
    pub frontend_id: String,
    pub uid: Option<String>,
    pub settings: HashMap<String, Value>,
}

/// Forwards a message to a peer server type when the route does not target
/// this process.
///
/// One instance per peer server type, indexed by the caller.
#[async_trait]
pub trait SysRpc: Send + Sync {
    async fn forward_message(
        &self,
        server_type: &str,
        msg: &Message,
        session: SessionExport,
    ) -> Result<Value, DispatchError>;
}

/// RPCs a [`crate::session::BackendSession`] issues back to its originating
/// frontend to mutate the authoritative [`crate::session::FrontendSession`].
#[async_trait]
pub trait FrontendRpc: Send + Sync {
    async fn bind(&self, frontend_id: &str, session_id: &str, uid: &str) -> Result<(), DispatchError>;

    async fn unbind(&self, frontend_id: &str, session_id: &str, uid: &str) -> Result<(), DispatchError>;

    async fn push(
        &self,
        frontend_id: &str,
        session_id: &str,
        key: &str,
        value: Value,
    ) -> Result<(), DispatchError>;

    async fn push_all(
        &self,
        frontend_id: &str,
        session_id: &str,
        settings: HashMap<String, Value>,
    ) -> Result<(), DispatchError>;
}

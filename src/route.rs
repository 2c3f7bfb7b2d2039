use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An opaque message entering the dispatch engine: a logical route plus a
/// JSON payload. The route is parsed by [`parse`] before anything else
/// happens to the message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub route: String,
    pub body: Value,
}

impl Message {
    pub fn new(route: impl Into<String>, body: Value) -> Self {
        Self {
            route: route.into(),
            body,
        }
    }
}

/// The parsed form of a [`Message::route`]: `server_type.handler.method`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteRecord {
    pub route: String,
    pub server_type: String,
    pub handler: String,
    pub method: String,
}

/// Parse a route string into a [`RouteRecord`].
///
/// A valid route consists of exactly three non-empty segments separated by
/// `.`. No trimming is performed. Anything other than exactly three
/// segments, or any segment that is empty, yields `None`.
pub fn parse(route: &str) -> Option<RouteRecord> {
    let mut parts = route.split('.');
    let server_type = parts.next()?;
    let handler = parts.next()?;
    let method = parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    if server_type.is_empty() || handler.is_empty() || method.is_empty() {
        return None;
    }
    Some(RouteRecord {
        route: route.to_string(),
        server_type: server_type.to_string(),
        handler: handler.to_string(),
        method: method.to_string(),
    })
}

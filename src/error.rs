use std::fmt;

/// The dispatch core's single error hierarchy: lifecycle, routing, filter,
/// handler, forwarding, and cron errors all funnel through this type rather
/// than ad hoc strings.
#[derive(Debug, Clone)]
pub enum DispatchError {
    /// `start()` has not yet completed, or `stop()` has already run.
    NotStarted,
    /// `route` did not parse into three non-empty dot-separated segments.
    UnknownRoute(String),
    /// No handler is registered under this name for the current server type.
    UnknownHandler(String),
    /// The handler exists but not the requested method.
    UnknownMethod { handler: String, method: String },
    /// A before filter, handler, or after filter raised an error.
    Filter(String),
    /// A user handler returned an error.
    Handler(String),
    /// The RPC forward to a peer server type failed.
    Forward(String),
    /// A cron action string, handler lookup, or schedule expression was invalid.
    Cron(String),
    /// Loading or parsing the cron configuration file failed.
    Config(String),
    /// An error surfaced by the frontend/backend session RPC boundary.
    Session(String),
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::NotStarted => write!(f, "server not started"),
            DispatchError::UnknownRoute(route) => write!(f, "unknown route: {route}"),
            DispatchError::UnknownHandler(handler) => write!(f, "unknown handler: {handler}"),
            DispatchError::UnknownMethod { handler, method } => {
                write!(f, "unknown method: {handler}.{method}")
            }
            DispatchError::Filter(msg) => write!(f, "filter error: {msg}"),
            DispatchError::Handler(msg) => write!(f, "handler error: {msg}"),
            DispatchError::Forward(msg) => write!(f, "forward error: {msg}"),
            DispatchError::Cron(msg) => write!(f, "cron error: {msg}"),
            DispatchError::Config(msg) => write!(f, "config error: {msg}"),
            DispatchError::Session(msg) => write!(f, "session error: {msg}"),
        }
    }
}

impl std::error::Error for DispatchError {}

impl From<std::io::Error> for DispatchError {
    fn from(err: std::io::Error) -> Self {
        DispatchError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for DispatchError {
    fn from(err: serde_json::Error) -> Self {
        DispatchError::Config(err.to_string())
    }
}

impl From<cron::error::Error> for DispatchError {
    fn from(err: cron::error::Error) -> Self {
        DispatchError::Cron(err.to_string())
    }
}

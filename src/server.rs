//! The dispatch server (§4.F): the top-level state machine that orchestrates
//! route parsing, the filter chains, the handler service, and forwarding.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::config::{DispatchConfig, ErrorHandler};
use crate::cron::{load_cron_config, CronEntry, CronScheduler};
use crate::error::DispatchError;
use crate::filter::{FilterOutcome, FilterService};
use crate::handler::HandlerService;
use crate::route::{Message, RouteRecord};
use crate::rpc::{SessionExport, SysRpc};
use crate::session::BackendSession;

const INITED: u8 = 0;
const STARTED: u8 = 1;
const STOPPED: u8 = 2;

struct Started {
    global_filters: Arc<FilterService>,
    server_filters: FilterService,
    handlers: HandlerService,
    cron_scheduler: CronScheduler,
    error_handler: Option<Arc<dyn ErrorHandler>>,
}

/// A [`SysRpc`] that always refuses to forward. Useful for single-server-type
/// deployments and tests where every route is known to be local.
pub struct NoForward;

#[async_trait]
impl SysRpc for NoForward {
    async fn forward_message(&self, _server_type: &str, _msg: &Message, _session: SessionExport) -> Result<Value, DispatchError> {
        Err(DispatchError::Forward("no forwarding facade configured".into()))
    }
}

/// Per-process request dispatch engine. Construct with [`DispatchServer::new`],
/// call [`DispatchServer::start`] then [`DispatchServer::after_start`], and
/// route requests through [`DispatchServer::global_handle`].
pub struct DispatchServer {
    server_type: String,
    server_id: String,
    base_path: PathBuf,
    env: String,
    state: AtomicU8,
    config: Mutex<Option<DispatchConfig>>,
    pending_crons: Mutex<Option<Vec<CronEntry>>>,
    sys_rpc: Arc<dyn SysRpc>,
    started: tokio::sync::OnceCell<Started>,
}

impl DispatchServer {
    pub fn new(config: DispatchConfig, sys_rpc: Arc<dyn SysRpc>) -> Self {
        Self {
            server_type: config.server_type.clone(),
            server_id: config.server_id.clone(),
            base_path: config.base_path.clone(),
            env: config.env.clone(),
            state: AtomicU8::new(INITED),
            config: Mutex::new(Some(config)),
            pending_crons: Mutex::new(None),
            sys_rpc,
            started: tokio::sync::OnceCell::new(),
        }
    }

    pub fn server_type(&self) -> &str {
        &self.server_type
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    fn state(&self) -> u8 {
        self.state.load(Ordering::SeqCst)
    }

    /// `Inited -> Started`; a no-op if already `Started` or `Stopped`
    /// (`Stopped` is terminal, §3 `ServerState`).
    pub async fn start(&self) -> Result<(), DispatchError> {
        if self
            .state
            .compare_exchange(INITED, STARTED, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(());
        }

        let config = self
            .config
            .lock()
            .await
            .take()
            .expect("start() only transitions from Inited once, by the compare_exchange above");

        let mut global_filters = FilterService::new();
        for filter in config.global_before_filters {
            global_filters.add_before(filter);
        }
        for filter in config.global_after_filters {
            global_filters.add_after(filter);
        }

        let mut server_filters = FilterService::new();
        for filter in config.before_filters {
            server_filters.add_before(filter);
        }
        for filter in config.after_filters {
            server_filters.add_after(filter);
        }

        let handlers = config.handlers.build();
        let cron_scheduler = CronScheduler::new(config.cron_handlers);

        let mut crons = load_cron_config(&self.base_path, &self.env)?
            .remove(&self.server_type)
            .unwrap_or_default();
        crons.extend(config.crons);
        *self.pending_crons.lock().await = Some(crons);

        let started = Started {
            global_filters: Arc::new(global_filters),
            server_filters,
            handlers,
            cron_scheduler,
            // Step 5's error hook only ever fires in the local-handle branch;
            // `error_handler` takes precedence, `global_error_handler` is the
            // fallback when no per-server hook is configured.
            error_handler: config.error_handler.or(config.global_error_handler),
        };
        self.started
            .set(started)
            .unwrap_or_else(|_| panic!("start() runs at most once"));

        Ok(())
    }

    /// Arm every cron loaded by `start()`. Kept separate so crons do not
    /// fire before the rest of the process is ready (§4.F).
    pub async fn after_start(&self) -> Result<usize, DispatchError> {
        let started = self.require_started()?;
        let crons = self.pending_crons.lock().await.take().unwrap_or_default();
        Ok(started.cron_scheduler.add_crons(crons, &self.server_id).await)
    }

    /// `Started -> Stopped`. Crons and in-flight requests are not forcibly
    /// cancelled; see [`DispatchServer::shutdown`] for hard cancellation.
    pub fn stop(&self) {
        self.state.store(STOPPED, Ordering::SeqCst);
    }

    /// Convenience wrapper, additive beyond the core lifecycle contract:
    /// stops the server and cancels every scheduled cron task.
    pub fn shutdown(&self) {
        self.stop();
        if let Some(started) = self.started.get() {
            started.cron_scheduler.cancel_all();
        }
    }

    fn require_started(&self) -> Result<&Started, DispatchError> {
        if self.state() != STARTED {
            return Err(DispatchError::NotStarted);
        }
        self.started.get().ok_or(DispatchError::NotStarted)
    }

    pub async fn add_crons(&self, entries: Vec<CronEntry>) -> Result<usize, DispatchError> {
        let started = self.require_started()?;
        Ok(started.cron_scheduler.add_crons(entries, &self.server_id).await)
    }

    pub fn remove_crons(&self, entries: &[CronEntry]) -> Result<(), DispatchError> {
        let started = self.require_started()?;
        started.cron_scheduler.remove_crons(entries);
        Ok(())
    }

    /// The non-dispatched path: the caller already knows the target is
    /// local (e.g. the RPC layer delivering an already-forwarded message).
    /// Runs no filters other than those the handler embeds.
    pub async fn handle(&self, msg: Message, session: &mut BackendSession) -> Result<Value, DispatchError> {
        let started = self.require_started()?;
        let route = crate::route::parse(&msg.route).ok_or_else(|| DispatchError::UnknownRoute(msg.route.clone()))?;
        started.handlers.handle(&route, msg, session).await
    }

    /// The full dispatch path (§4.F): global befores, then either a forward
    /// or a local handle (per-server befores, handler, error hook,
    /// per-server afters), then respond, with global afters spawned
    /// fire-and-forget.
    pub async fn global_handle(&self, mut msg: Message, session: &mut BackendSession) -> Result<Value, DispatchError> {
        let started = self.require_started()?;
        let route = crate::route::parse(&msg.route).ok_or_else(|| DispatchError::UnknownRoute(msg.route.clone()))?;

        let (err, resp) = match started.global_filters.run_before(&mut msg, session).await {
            FilterOutcome::ShortCircuit { err, resp } => (err, resp),
            FilterOutcome::Continue => {
                if route.server_type != self.server_type {
                    match self.sys_rpc.forward_message(&route.server_type, &msg, session.export()).await {
                        Ok(value) => (None, Some(value)),
                        Err(err) => (Some(err), None),
                    }
                } else {
                    self.local_handle(started, &route, &mut msg, session).await
                }
            }
        };

        self.spawn_global_afters(started, msg, &*session, err.clone(), resp.clone());

        match err {
            Some(err) => Err(err),
            None => Ok(resp.unwrap_or(Value::Null)),
        }
    }

    async fn local_handle(
        &self,
        started: &Started,
        route: &RouteRecord,
        msg: &mut Message,
        session: &mut BackendSession,
    ) -> (Option<DispatchError>, Option<Value>) {
        let (mut err, mut resp) = match started.server_filters.run_before(msg, session).await {
            FilterOutcome::ShortCircuit { err, resp } => (err, resp),
            FilterOutcome::Continue => match started.handlers.handle(route, msg.clone(), session).await {
                Ok(value) => (None, Some(value)),
                Err(err) => (Some(err), None),
            },
        };

        if let Some(raised) = err.take() {
            let (hooked_err, hooked_resp) = self
                .run_error_hook(started.error_handler.as_ref(), raised, msg, resp, session)
                .await;
            err = hooked_err;
            resp = hooked_resp;
        }

        let err = started.server_filters.run_after(err, msg, session, &resp).await;
        (err, resp)
    }

    async fn run_error_hook(
        &self,
        handler: Option<&Arc<dyn ErrorHandler>>,
        err: DispatchError,
        msg: &Message,
        resp: Option<Value>,
        session: &mut BackendSession,
    ) -> (Option<DispatchError>, Option<Value>) {
        match handler {
            Some(handler) => handler.handle(err, msg, resp, session).await,
            None => {
                tracing::error!(route = %msg.route, error = %err, "unhandled dispatch error");
                (Some(err), resp)
            }
        }
    }

    /// Global afters never feed back to the caller (§9 open question 3):
    /// run them against a private clone of the session that was live at
    /// response time and swallow whatever error they produce.
    fn spawn_global_afters(&self, started: &Started, msg: Message, session: &BackendSession, err: Option<DispatchError>, resp: Option<Value>) {
        let global_filters = started.global_filters.clone();
        let mut session = session.clone();
        tokio::spawn(async move {
            let err = global_filters.run_after(err, &msg, &mut session, &resp).await;
            if let Some(err) = err {
                tracing::error!(route = %msg.route, error = %err, "global after filter reported an error");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DispatchConfig;
    use crate::filter::{AfterFilter, BeforeFilter};
    use crate::handler::{Handler, HandlerRegistryBuilder};
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;

    struct Echo;

    #[async_trait]
    impl Handler for Echo {
        async fn handle(&self, msg: Message, _session: &mut BackendSession) -> Result<Value, DispatchError> {
            Ok(msg.body)
        }
    }

    struct Failing;

    #[async_trait]
    impl Handler for Failing {
        async fn handle(&self, _msg: Message, _session: &mut BackendSession) -> Result<Value, DispatchError> {
            Err(DispatchError::Handler("boom".into()))
        }
    }

    fn session() -> BackendSession {
        struct NoopRpc;
        #[async_trait]
        impl crate::rpc::FrontendRpc for NoopRpc {
            async fn bind(&self, _: &str, _: &str, _: &str) -> Result<(), DispatchError> {
                Ok(())
            }
            async fn unbind(&self, _: &str, _: &str, _: &str) -> Result<(), DispatchError> {
                Ok(())
            }
            async fn push(&self, _: &str, _: &str, _: &str, _: Value) -> Result<(), DispatchError> {
                Ok(())
            }
            async fn push_all(&self, _: &str, _: &str, _: HashMap<String, Value>) -> Result<(), DispatchError> {
                Ok(())
            }
        }
        BackendSession::new("s1", "f1", None, HashMap::new(), Arc::new(NoopRpc))
    }

    fn server_with(handlers: HandlerRegistryBuilder) -> DispatchServer {
        let config = DispatchConfig::new("area", "area-1", std::env::temp_dir()).handlers(handlers);
        DispatchServer::new(config, Arc::new(NoForward))
    }

    #[tokio::test]
    async fn global_handle_fails_before_start() {
        let server = server_with(HandlerRegistryBuilder::new());
        let mut s = session();
        let err = server
            .global_handle(Message::new("area.player.login", Value::Null), &mut s)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::NotStarted));
    }

    #[tokio::test]
    async fn global_handle_dispatches_local_routes() {
        let server = server_with(HandlerRegistryBuilder::new().register("player", "login", Arc::new(Echo)));
        server.start().await.unwrap();
        server.after_start().await.unwrap();
        let mut s = session();
        let resp = server
            .global_handle(Message::new("area.player.login", Value::from("hi")), &mut s)
            .await
            .unwrap();
        assert_eq!(resp, Value::from("hi"));
    }

    #[tokio::test]
    async fn global_handle_forwards_cross_server_routes() {
        struct RecordingForward(Arc<AtomicUsize>);
        #[async_trait]
        impl SysRpc for RecordingForward {
            async fn forward_message(&self, _server_type: &str, _msg: &Message, _session: SessionExport) -> Result<Value, DispatchError> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(Value::from("forwarded"))
            }
        }
        let calls = Arc::new(AtomicUsize::new(0));
        let config = DispatchConfig::new("area", "area-1", std::env::temp_dir());
        let server = DispatchServer::new(config, Arc::new(RecordingForward(calls.clone())));
        server.start().await.unwrap();
        server.after_start().await.unwrap();
        let mut s = session();
        let resp = server
            .global_handle(Message::new("chat.room.join", Value::Null), &mut s)
            .await
            .unwrap();
        assert_eq!(resp, Value::from("forwarded"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn global_before_short_circuit_skips_the_handler_entirely() {
        let handler_calls = Arc::new(AtomicUsize::new(0));
        struct Counting(Arc<AtomicUsize>);
        #[async_trait]
        impl Handler for Counting {
            async fn handle(&self, _msg: Message, _session: &mut BackendSession) -> Result<Value, DispatchError> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(Value::Null)
            }
        }

        let config = DispatchConfig::new("area", "area-1", std::env::temp_dir())
            .handlers(HandlerRegistryBuilder::new().register("player", "login", Arc::new(Counting(handler_calls.clone()))))
            .add_global_before(BeforeFilter::from_fn(|_msg, _session| {
                Box::pin(async move { FilterOutcome::halt(DispatchError::Filter("denied".into())) })
            }));
        let server = DispatchServer::new(config, Arc::new(NoForward));
        server.start().await.unwrap();
        server.after_start().await.unwrap();
        let mut s = session();
        let err = server
            .global_handle(Message::new("area.player.login", Value::Null), &mut s)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Filter(_)));
        assert_eq!(handler_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn per_server_after_error_reaches_the_caller() {
        let config = DispatchConfig::new("area", "area-1", std::env::temp_dir())
            .handlers(HandlerRegistryBuilder::new().register("player", "login", Arc::new(Echo)))
            .add_after(AfterFilter::from_fn(|_err, _msg, _session, _resp| {
                Box::pin(async move { Some(DispatchError::Filter("cleanup-failed".into())) })
            }));
        let server = DispatchServer::new(config, Arc::new(NoForward));
        server.start().await.unwrap();
        server.after_start().await.unwrap();
        let mut s = session();
        let err = server
            .global_handle(Message::new("area.player.login", Value::from("hi")), &mut s)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Filter(_)));
    }

    #[tokio::test]
    async fn handler_error_passes_through_error_handler_hook() {
        struct RewriteToOk;
        #[async_trait]
        impl ErrorHandler for RewriteToOk {
            async fn handle(
                &self,
                _err: DispatchError,
                _msg: &Message,
                _resp: Option<Value>,
                _session: &mut BackendSession,
            ) -> (Option<DispatchError>, Option<Value>) {
                (None, Some(Value::from("recovered")))
            }
        }
        let config = DispatchConfig::new("area", "area-1", std::env::temp_dir())
            .handlers(HandlerRegistryBuilder::new().register("player", "login", Arc::new(Failing)))
            .error_handler(Arc::new(RewriteToOk));
        let server = DispatchServer::new(config, Arc::new(NoForward));
        server.start().await.unwrap();
        server.after_start().await.unwrap();
        let mut s = session();
        let resp = server
            .global_handle(Message::new("area.player.login", Value::Null), &mut s)
            .await
            .unwrap();
        assert_eq!(resp, Value::from("recovered"));
    }

    #[tokio::test]
    async fn start_is_idempotent_and_stop_is_terminal() {
        let server = server_with(HandlerRegistryBuilder::new());
        server.start().await.unwrap();
        server.start().await.unwrap();
        server.stop();
        server.start().await.unwrap();
        let mut s = session();
        let err = server
            .global_handle(Message::new("area.player.login", Value::Null), &mut s)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::NotStarted));
    }

    #[tokio::test]
    async fn unknown_route_shape_is_rejected() {
        let server = server_with(HandlerRegistryBuilder::new());
        server.start().await.unwrap();
        server.after_start().await.unwrap();
        let mut s = session();
        let err = server
            .global_handle(Message::new("not-a-route", Value::Null), &mut s)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::UnknownRoute(_)));
    }
}

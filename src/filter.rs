//! The bidirectional, short-circuitable filter chain (§4.B).
//!
//! A filter is either a plain closure or a value exposing a `before`/`after`
//! method. Both forms are represented explicitly as a two-variant sum type
//! rather than relying on structural duck typing.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::DispatchError;
use crate::route::Message;
use crate::session::BackendSession;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// What a before filter decided once its future resolves.
#[derive(Debug, Clone)]
pub enum FilterOutcome {
    /// Proceed to the next filter (or, at the end of the chain, the handler).
    Continue,
    /// Stop advancing. `err` and `resp` become the pipeline's result as of
    /// this point, per §4.B's short-circuit rule.
    ShortCircuit {
        err: Option<DispatchError>,
        resp: Option<Value>,
    },
}

impl FilterOutcome {
    pub fn halt(err: DispatchError) -> Self {
        FilterOutcome::ShortCircuit {
            err: Some(err),
            resp: None,
        }
    }
}

/// The `.before`/`.after` record form of a filter.
#[async_trait]
pub trait BeforeMethod: Send + Sync {
    async fn before(&self, msg: &mut Message, session: &mut BackendSession) -> FilterOutcome;
}

#[async_trait]
pub trait AfterMethod: Send + Sync {
    async fn after(
        &self,
        err: Option<DispatchError>,
        msg: &Message,
        session: &mut BackendSession,
        resp: &Option<Value>,
    ) -> Option<DispatchError>;
}

type BeforeFn =
    Arc<dyn for<'a> Fn(&'a mut Message, &'a mut BackendSession) -> BoxFuture<'a, FilterOutcome> + Send + Sync>;

type AfterFn = Arc<
    dyn for<'a> Fn(
            Option<DispatchError>,
            &'a Message,
            &'a mut BackendSession,
            &'a Option<Value>,
        ) -> BoxFuture<'a, Option<DispatchError>>
        + Send
        + Sync,
>;

/// A before filter: either a plain callable or a `.before`-exposing record.
#[derive(Clone)]
pub enum BeforeFilter {
    Plain(BeforeFn),
    WithMethod(Arc<dyn BeforeMethod>),
}

impl BeforeFilter {
    pub fn from_fn<F>(f: F) -> Self
    where
        F: for<'a> Fn(&'a mut Message, &'a mut BackendSession) -> BoxFuture<'a, FilterOutcome>
            + Send
            + Sync
            + 'static,
    {
        BeforeFilter::Plain(Arc::new(f))
    }

    pub fn from_method(method: impl BeforeMethod + 'static) -> Self {
        BeforeFilter::WithMethod(Arc::new(method))
    }

    async fn invoke(&self, msg: &mut Message, session: &mut BackendSession) -> FilterOutcome {
        match self {
            BeforeFilter::Plain(f) => f(msg, session).await,
            BeforeFilter::WithMethod(obj) => obj.before(msg, session).await,
        }
    }
}

/// An after filter: either a plain callable or an `.after`-exposing record.
#[derive(Clone)]
pub enum AfterFilter {
    Plain(AfterFn),
    WithMethod(Arc<dyn AfterMethod>),
}

impl AfterFilter {
    pub fn from_fn<F>(f: F) -> Self
    where
        F: for<'a> Fn(
                Option<DispatchError>,
                &'a Message,
                &'a mut BackendSession,
                &'a Option<Value>,
            ) -> BoxFuture<'a, Option<DispatchError>>
            + Send
            + Sync
            + 'static,
    {
        AfterFilter::Plain(Arc::new(f))
    }

    pub fn from_method(method: impl AfterMethod + 'static) -> Self {
        AfterFilter::WithMethod(Arc::new(method))
    }

    async fn invoke(
        &self,
        err: Option<DispatchError>,
        msg: &Message,
        session: &mut BackendSession,
        resp: &Option<Value>,
    ) -> Option<DispatchError> {
        match self {
            AfterFilter::Plain(f) => f(err, msg, session, resp).await,
            AfterFilter::WithMethod(obj) => obj.after(err, msg, session, resp).await,
        }
    }
}

/// An ordered before/after chain (§3 `FilterChain`).
///
/// `add_before` appends; `add_after` prepends, so the most recently
/// registered after filter runs first (§9 open question 2, resolved as
/// intentional LIFO).
#[derive(Default, Clone)]
pub struct FilterService {
    befores: Vec<BeforeFilter>,
    afters: Vec<AfterFilter>,
}

impl FilterService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_before(&mut self, filter: BeforeFilter) {
        self.befores.push(filter);
    }

    pub fn add_after(&mut self, filter: AfterFilter) {
        self.afters.insert(0, filter);
    }

    /// Walk the before chain in registration order, stopping at the first
    /// `ShortCircuit` or once the chain is exhausted.
    pub async fn run_before(&self, msg: &mut Message, session: &mut BackendSession) -> FilterOutcome {
        for filter in &self.befores {
            match filter.invoke(msg, session).await {
                FilterOutcome::Continue => continue,
                short_circuit => return short_circuit,
            }
        }
        FilterOutcome::Continue
    }

    /// Walk the after chain to completion; a non-`None` error from any
    /// filter does not stop later filters from running (§4.B).
    pub async fn run_after(
        &self,
        mut err: Option<DispatchError>,
        msg: &Message,
        session: &mut BackendSession,
        resp: &Option<Value>,
    ) -> Option<DispatchError> {
        for filter in &self.afters {
            err = filter.invoke(err, msg, session, resp).await;
        }
        err
    }
}

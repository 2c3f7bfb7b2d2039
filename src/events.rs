//! A small in-process typed event bus, supplementing `add_crons`/
//! `remove_crons` (§9: "a host wanting an event-bus-driven trigger subscribes
//! those events to an external bus itself").
//!
//! This is optional plumbing, not part of the dispatch path itself: nothing
//! in [`crate::server`] emits on it. A host wires `AddCrons`/`RemoveCrons`
//! events to [`crate::server::DispatchServer::add_crons`]/`remove_crons`
//! where it needs a pub/sub trigger instead of a direct call.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::cron::CronEntry;

/// Fired to request a batch of crons be admitted and scheduled.
#[derive(Debug, Clone)]
pub struct AddCrons(pub Vec<CronEntry>);

/// Fired to request a batch of crons be cancelled by id.
#[derive(Debug, Clone)]
pub struct RemoveCrons(pub Vec<CronEntry>);

type Handler = Arc<dyn Fn(Arc<dyn Any + Send + Sync>) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Typed pub/sub keyed by `TypeId`, dispatching each emitted event to every
/// subscriber for its concrete type.
#[derive(Clone, Default)]
pub struct EventBus {
    handlers: Arc<RwLock<HashMap<TypeId, Vec<Handler>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscribe<E, F, Fut>(&self, handler: F)
    where
        E: Send + Sync + 'static,
        F: Fn(Arc<E>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let boxed: Handler = Arc::new(move |any| {
            let event = any.downcast::<E>().expect("event type mismatch");
            Box::pin(handler(event))
        });
        self.handlers
            .write()
            .await
            .entry(TypeId::of::<E>())
            .or_default()
            .push(boxed);
    }

    /// Dispatch to every subscriber and wait for all of them to finish.
    pub async fn emit<E>(&self, event: E)
    where
        E: Send + Sync + 'static,
    {
        let event = Arc::new(event) as Arc<dyn Any + Send + Sync>;
        let map = self.handlers.read().await;
        if let Some(subs) = map.get(&TypeId::of::<E>()) {
            let mut tasks = Vec::with_capacity(subs.len());
            for handler in subs {
                tasks.push(handler(event.clone()));
            }
            for task in tasks {
                task.await;
            }
        }
    }
}

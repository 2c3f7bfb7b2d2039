//! Per-request dispatch core for a distributed, multi-process game server
//! mesh: route parsing, the bidirectional filter chain, the handler
//! registry, the cron scheduler, and the session proxies that connect them.

pub mod config;
pub mod cron;
pub mod error;
pub mod events;
pub mod filter;
pub mod handler;
pub mod route;
pub mod rpc;
pub mod server;
pub mod session;

pub use config::{DispatchConfig, ErrorHandler};
pub use cron::{CronEntry, CronHandler, CronHandlerRegistryBuilder, CronScheduler};
pub use error::DispatchError;
pub use events::{AddCrons, EventBus, RemoveCrons};
pub use filter::{AfterFilter, BeforeFilter, FilterOutcome, FilterService};
pub use handler::{Handler, HandlerRegistryBuilder, HandlerService};
pub use route::{Message, RouteRecord};
pub use rpc::{FrontendRpc, SessionExport, SysRpc};
pub use server::{DispatchServer, NoForward};
pub use session::{BackendSession, FrontendSession, FrontendStore};

mod backend;
mod frontend;

pub use backend::BackendSession;
pub use frontend::{FrontendSession, FrontendStore};

//! Backend child-process supervision: sessions, registry, lifecycle.

pub mod lifecycle;
pub mod registry;
pub mod session;

pub use lifecycle::{SessionState, ShutdownRequest};
pub use registry::BackendRegistry;
pub use session::BackendSession;

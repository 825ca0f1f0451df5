pub mod dispatcher;
pub mod reload;
pub mod service;

pub use dispatcher::ToolDispatcher;
pub use reload::ReloadCoordinator;
pub use service::{ServiceModule, ServiceRegistry};

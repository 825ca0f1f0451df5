pub mod config_env;
pub mod events;
pub mod manifest;
pub mod order;
pub mod placeholders;
pub mod prompt;
pub mod store;
pub mod watcher;

pub use events::{EventBus, RuntimeEvent};
pub use manifest::{PluginManifest, PluginType, Protocol};
pub use placeholders::PlaceholderTable;
pub use store::PluginStore;

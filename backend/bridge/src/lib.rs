pub mod correlator;
pub mod protocol;
pub mod registry;
pub mod ws_server;

pub use correlator::Correlator;
pub use protocol::{Frame, ResponseStatus};
pub use registry::DistributedRegistry;
pub use ws_server::{ws_handler, BridgeState};

pub mod error;
pub mod message;
pub mod tail;
pub mod traits;

pub use error::VcpError;
pub use message::ChatMessage;
pub use tail::{LogTail, DEFAULT_STDERR_TAIL_BYTES};
pub use traits::{FileFetcher, RemoteInvoker};

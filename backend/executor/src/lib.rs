pub mod executor;
pub mod json_scan;

pub use executor::{StdioExecutor, WellKnownEnv, MAX_CAPTURE_BYTES, STATIC_REFRESH_TIMEOUT};
pub use json_scan::JsonScanner;

//! Logging setup for the plugin runtime.
//!
//! Operators get a compact console layer; ingestion gets a non-blocking
//! daily-rolling NDJSON file. File writes must never stall a plugin
//! invocation, so the file layer goes through a background worker — the
//! returned guard has to stay alive for it to flush.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Baseline directives when `RUST_LOG` is not set. Transport and watcher
/// internals stay quiet so plugin activity is readable.
fn default_filter(verbose: bool) -> EnvFilter {
    let directives = if verbose {
        "debug,hyper=info,tungstenite=info,notify=info"
    } else {
        "info,hyper=warn,tungstenite=warn,notify=warn"
    };
    EnvFilter::new(directives)
}

/// Initialize the global subscriber. Keep the returned guard for the
/// lifetime of the process.
pub fn init(log_dir: impl AsRef<Path>, verbose: bool) -> WorkerGuard {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(verbose));

    let (file_writer, guard) =
        tracing_appender::non_blocking(rolling::daily(log_dir, "runtime.ndjson"));

    let console_layer = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stdout);
    let file_layer = fmt::layer()
        .json()
        .with_ansi(false)
        .with_writer(file_writer);

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init();
    guard
}

//! Debounced filesystem watching.
//!
//! Bursts of add/change/unlink events on the plugin root (or the order
//! file) collapse into a single reload: every event restarts the quiescence
//! timer, and the action only fires once the window passes with no further
//! events. The action is awaited inline, so overlapping triggers coalesce
//! instead of stacking reloads.

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{error, warn};

pub const DEFAULT_DEBOUNCE_WINDOW: Duration = Duration::from_millis(500);

#[derive(Clone)]
pub struct Debouncer {
    tx: mpsc::UnboundedSender<()>,
}

impl Debouncer {
    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }
}

/// Spawn the debounce loop; returns the trigger handle.
pub fn spawn_debouncer<F, Fut>(window: Duration, action: F) -> Debouncer
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<()>();
    tokio::spawn(async move {
        while rx.recv().await.is_some() {
            // Wait for quiescence: each further event restarts the window.
            loop {
                match tokio::time::timeout(window, rx.recv()).await {
                    Ok(Some(())) => continue,
                    Ok(None) => return,
                    Err(_) => break,
                }
            }
            action().await;
        }
    });
    Debouncer { tx }
}

/// Watch the given paths and feed relevant events into the debouncer.
///
/// The returned watcher must be kept alive for as long as watching should
/// continue.
pub fn watch_paths(paths: &[&Path], debouncer: Debouncer) -> anyhow::Result<RecommendedWatcher> {
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        match res {
            Ok(event) => {
                if event.kind.is_create() || event.kind.is_modify() || event.kind.is_remove() {
                    debouncer.trigger();
                }
            }
            Err(e) => error!(error = %e, "filesystem watch error"),
        }
    })?;
    for path in paths {
        if let Err(e) = watcher.watch(path, RecursiveMode::Recursive) {
            warn!(path = %path.display(), error = %e, "could not watch path");
        }
    }
    Ok(watcher)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn burst_of_triggers_fires_once() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let debouncer = spawn_debouncer(Duration::from_millis(50), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        for _ in 0..10 {
            debouncer.trigger();
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn separated_triggers_fire_separately() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let debouncer = spawn_debouncer(Duration::from_millis(30), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        debouncer.trigger();
        tokio::time::sleep(Duration::from_millis(120)).await;
        debouncer.trigger();
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }
}

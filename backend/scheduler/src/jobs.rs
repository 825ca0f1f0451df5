//! Cron job set for static plugins.
//!
//! One job per static plugin with a `refreshIntervalCron` expression. The
//! whole set is rebuilt on every reload: the previous ticker task is
//! aborted and a new one spawned from the current store contents.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cron::Schedule;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use vcp_plugins::{PluginStore, PluginType};

use crate::refresher::StaticRefresher;

/// Parse a cron expression, accepting the common 5-field form by
/// normalizing it to the 6-field (with seconds) form the `cron` crate
/// expects.
pub fn parse_schedule(expr: &str) -> anyhow::Result<Schedule> {
    let fields = expr.split_whitespace().count();
    let normalized = if fields == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    };
    Schedule::from_str(&normalized)
        .map_err(|e| anyhow::anyhow!("invalid cron expression '{expr}': {e}"))
}

pub struct CronJobs {
    store: Arc<PluginStore>,
    refresher: StaticRefresher,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl CronJobs {
    pub fn new(store: Arc<PluginStore>, refresher: StaticRefresher) -> Self {
        Self { store, refresher, handle: Mutex::new(None) }
    }

    /// Rebuild the job set from the current store contents.
    pub async fn rebuild(&self) {
        let mut jobs: Vec<(String, Schedule)> = Vec::new();
        for manifest in self.store.list().await {
            if manifest.plugin_type != PluginType::Static {
                continue;
            }
            let Some(expr) = &manifest.refresh_interval_cron else {
                continue;
            };
            match parse_schedule(expr) {
                Ok(schedule) => {
                    info!(plugin = %manifest.name, cron = %expr, "scheduled static refresh");
                    jobs.push((manifest.name.clone(), schedule));
                }
                Err(e) => warn!(plugin = %manifest.name, error = %e, "skipping cron job"),
            }
        }

        let mut guard = self.handle.lock().await;
        if let Some(prior) = guard.take() {
            prior.abort();
        }
        if jobs.is_empty() {
            return;
        }
        let refresher = self.refresher.clone();
        *guard = Some(tokio::spawn(run_jobs(jobs, refresher)));
    }

    /// Whether a ticker task is currently scheduled.
    pub async fn is_running(&self) -> bool {
        self.handle.lock().await.is_some()
    }
}

async fn run_jobs(jobs: Vec<(String, Schedule)>, refresher: StaticRefresher) {
    let mut next_fires: HashMap<String, DateTime<Utc>> = jobs
        .iter()
        .filter_map(|(name, schedule)| {
            schedule.upcoming(Utc).next().map(|at| (name.clone(), at))
        })
        .collect();

    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        ticker.tick().await;
        let now = Utc::now();
        for (name, schedule) in &jobs {
            let Some(fire_at) = next_fires.get(name) else {
                continue;
            };
            if now < *fire_at {
                continue;
            }
            debug!(plugin = %name, "cron trigger fired");
            // The refresher's own guard makes per-plugin fires serial;
            // an overlapping fire is skipped inside `refresh`.
            let refresher = refresher.clone();
            let plugin = name.clone();
            tokio::spawn(async move {
                refresher.refresh(&plugin).await;
            });
            match schedule.upcoming(Utc).next() {
                Some(next) => {
                    next_fires.insert(name.clone(), next);
                }
                None => {
                    next_fires.remove(name);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_five_field_expressions() {
        let schedule = parse_schedule("*/10 * * * *").unwrap();
        assert!(schedule.upcoming(Utc).next().is_some());
    }

    #[test]
    fn accepts_six_field_expressions() {
        assert!(parse_schedule("0 */5 * * * *").is_ok());
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_schedule("not a cron").is_err());
    }

    #[tokio::test]
    async fn rebuild_without_cron_plugins_spawns_nothing() {
        let store = Arc::new(PluginStore::new());
        let placeholders = Arc::new(vcp_plugins::PlaceholderTable::new());
        let executor = Arc::new(vcp_executor::StdioExecutor::new(Default::default()));
        let refresher = StaticRefresher::new(store.clone(), placeholders, executor);
        let jobs = CronJobs::new(store, refresher);
        jobs.rebuild().await;
        assert!(!jobs.is_running().await);
    }
}

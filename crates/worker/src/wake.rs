// crates/worker/src/wake.rs
//! Directory-change wake-ups for idle worker loops.
//!
//! Watches the jobs root and pings a [`Notify`] whenever a `state.json` is
//! created or rewritten. Purely an optimization: the loop keeps polling on
//! its interval, so a dropped or missing event only costs latency.

use std::path::Path;
use std::sync::Arc;

use meshline_core::store::STATE_FILE;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::Notify;
use tracing::{error, warn};

/// Start watching `jobs_root`. The returned watcher must be kept alive for
/// as long as wake-ups are wanted (dropping it stops the watch).
pub fn watch_jobs(jobs_root: &Path, wake: Arc<Notify>) -> notify::Result<RecommendedWatcher> {
    let mut watcher = notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| {
        match res {
            Ok(event) => {
                if is_state_change(&event) {
                    wake.notify_one();
                }
            }
            Err(e) => {
                error!("Jobs watcher error: {}", e);
            }
        }
    })?;

    if jobs_root.exists() {
        watcher.watch(jobs_root, RecursiveMode::Recursive)?;
        tracing::info!("Watching {} for job state changes", jobs_root.display());
    } else {
        warn!(
            "Jobs root does not exist: {}; relying on polling only",
            jobs_root.display()
        );
    }

    Ok(watcher)
}

fn is_state_change(event: &notify::Event) -> bool {
    matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_))
        && event
            .paths
            .iter()
            .any(|p| p.file_name().is_some_and(|name| name == STATE_FILE))
}

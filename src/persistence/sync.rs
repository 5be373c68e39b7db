//! Periodic log sync.
//!
//! Appends to the log reach the OS immediately but the file is only pushed
//! to stable storage once per interval, by the task this module owns. The
//! task is bound to the process lifecycle: it listens on a watch channel
//! and stops when the handle is dropped or [`SyncTask::stop`] is called, so
//! shutdown can order "stop syncing" before "close the log".

use crate::persistence::aof::AofLog;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info};

/// Default interval between syncs. One second bounds crash data loss to at
/// most one second of appends.
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(1);

/// Handle to the running sync task. Dropping it stops the task.
#[derive(Debug)]
pub struct SyncTask {
    shutdown_tx: watch::Sender<bool>,
}

impl SyncTask {
    /// Spawns the periodic sync task for `log`.
    pub fn start(log: Arc<AofLog>, interval: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(sync_loop(log, interval, shutdown_rx));
        info!(interval_ms = interval.as_millis() as u64, "log sync task started");

        Self { shutdown_tx }
    }

    /// Stops the sync task. Called automatically on drop.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        info!("log sync task stopped");
    }
}

impl Drop for SyncTask {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn sync_loop(log: Arc<AofLog>, interval: Duration, mut shutdown_rx: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("sync task received shutdown signal");
                    return;
                }
            }
        }

        if let Err(e) = log.sync() {
            // keep running; the next interval retries, and shutdown still
            // performs a final sync
            error!(error = %e, "periodic log sync failed");
        }
    }
}

/// Starts the sync task with the default one-second interval.
pub fn start_sync_task(log: Arc<AofLog>) -> SyncTask {
    SyncTask::start(log, DEFAULT_SYNC_INTERVAL)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Value;

    fn temp_log() -> (tempfile::TempDir, Arc<AofLog>) {
        let dir = tempfile::tempdir().expect("create temp dir");
        let log = Arc::new(AofLog::open(dir.path().join("sync.aof")).expect("open log"));
        (dir, log)
    }

    #[tokio::test]
    async fn task_syncs_appended_data() {
        let (_dir, log) = temp_log();
        let _task = SyncTask::start(Arc::clone(&log), Duration::from_millis(10));

        let req = Value::array(vec![Value::bulk("SET"), Value::bulk("k"), Value::bulk("v")]);
        log.append(&req).unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;

        let on_disk = std::fs::read(log.path()).unwrap();
        assert_eq!(on_disk, req.encode());
    }

    #[tokio::test]
    async fn task_stops_on_drop() {
        let (_dir, log) = temp_log();

        {
            let _task = SyncTask::start(Arc::clone(&log), Duration::from_millis(10));
            tokio::time::sleep(Duration::from_millis(30)).await;
            // dropped here
        }
        tokio::time::sleep(Duration::from_millis(30)).await;

        // the log is still usable after the task is gone
        log.append(&Value::array(vec![Value::bulk("PING")])).unwrap();
        log.close().unwrap();
    }
}

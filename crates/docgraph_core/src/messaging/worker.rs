//! Background consumer thread.
//!
//! The worker owns its own SQLite connection, so it runs concurrently with
//! CRUD traffic and other consumers on other connections. Message claims keep
//! consumers apart; the cascade's `BEGIN IMMEDIATE` keeps writers apart.

use super::consumer::{sqlite_consumer, ConsumerSettings, DeliveryOutcome};
use super::MessagingError;
use crate::config::MessagingConfig;
use crate::db::open_db;
use log::{error, info};
use rusqlite::Connection;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

const WORKER_THREAD_NAME: &str = "docgraph-cascade-consumer";

/// Counters reported when the worker stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub completed: u64,
    pub already_removed: u64,
    pub retried: u64,
    pub dead_lettered: u64,
    pub transport_errors: u64,
}

impl WorkerStats {
    fn record(&mut self, outcome: &DeliveryOutcome) {
        match outcome {
            DeliveryOutcome::Completed { .. } => self.completed += 1,
            DeliveryOutcome::AlreadyRemoved { .. } => self.already_removed += 1,
            DeliveryOutcome::Retrying { .. } => self.retried += 1,
            DeliveryOutcome::DeadLettered { .. } => self.dead_lettered += 1,
        }
    }
}

/// Handle to a running consumer thread.
pub struct ConsumerWorker {
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<WorkerStats>>,
}

impl ConsumerWorker {
    /// Opens `db_path` on a dedicated connection and starts consuming.
    pub fn spawn(
        db_path: impl AsRef<Path>,
        config: &MessagingConfig,
    ) -> Result<Self, MessagingError> {
        let settings = ConsumerSettings::from_config(config)?;
        let conn = open_db(db_path)?;
        let poll_interval = config.poll_interval();
        let shutdown = Arc::new(AtomicBool::new(false));

        let worker_shutdown = Arc::clone(&shutdown);
        let handle = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || run_worker(conn, settings, poll_interval, &worker_shutdown))
            .map_err(MessagingError::Spawn)?;

        Ok(Self {
            shutdown,
            handle: Some(handle),
        })
    }

    /// Returns whether the worker thread is still running.
    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stops the worker after its current message and waits for it.
    pub fn shutdown(mut self) -> Result<WorkerStats, MessagingError> {
        self.stop()
    }

    fn stop(&mut self) -> Result<WorkerStats, MessagingError> {
        self.shutdown.store(true, Ordering::SeqCst);
        match self.handle.take() {
            Some(handle) => handle.join().map_err(|_| MessagingError::WorkerPanicked),
            None => Ok(WorkerStats::default()),
        }
    }
}

impl Drop for ConsumerWorker {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            error!("event=worker_stop module=messaging status=error error={err}");
        }
    }
}

fn run_worker(
    conn: Connection,
    settings: ConsumerSettings,
    poll_interval: Duration,
    shutdown: &AtomicBool,
) -> WorkerStats {
    let mut stats = WorkerStats::default();
    let topic = settings.topic.clone();

    let consumer = match sqlite_consumer(&conn, settings) {
        Ok(consumer) => consumer,
        Err(err) => {
            error!(
                "event=worker_start module=messaging status=error topic={} error={}",
                topic, err
            );
            stats.transport_errors += 1;
            return stats;
        }
    };
    info!("event=worker_start module=messaging status=ok topic={topic}");

    while !shutdown.load(Ordering::SeqCst) {
        match consumer.poll_once() {
            Ok(Some(outcome)) => {
                stats.record(&outcome);
                if matches!(outcome, DeliveryOutcome::Retrying { .. }) {
                    thread::sleep(poll_interval);
                }
            }
            Ok(None) => thread::sleep(poll_interval),
            Err(err) => {
                stats.transport_errors += 1;
                error!(
                    "event=worker_poll module=messaging status=error topic={} error={}",
                    topic, err
                );
                thread::sleep(poll_interval);
            }
        }
    }

    info!(
        "event=worker_stop module=messaging status=ok topic={} completed={} already_removed={} retried={} dead_lettered={} transport_errors={}",
        topic,
        stats.completed,
        stats.already_removed,
        stats.retried,
        stats.dead_lettered,
        stats.transport_errors
    );
    stats
}

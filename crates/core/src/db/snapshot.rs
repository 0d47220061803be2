//! The snapshot scheduler: a background worker that writes periodic backups
//! of one database and prunes its dump history to a bounded depth.
//!
//! The worker is an actor on its own tokio task. Timer ticks and explicit
//! triggers both produce a backup, but only one backup is ever in flight:
//! a tick or trigger that arrives while a write is still running is
//! skipped, not queued. Failures are logged and never propagate.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{info, warn};
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::config::SnapshotConfig;
use crate::db::manager::DatabaseManager;
use crate::error::Result;

enum WorkerMessage {
    Trigger,
    Exit,
}

/// Handle to the background snapshot worker of one database.
pub struct SnapshotWorker {
    tx: mpsc::UnboundedSender<WorkerMessage>,
    attempts: watch::Receiver<u64>,
    in_flight: Arc<AtomicBool>,
    manager: Arc<DatabaseManager>,
    config: SnapshotConfig,
}

impl SnapshotWorker {
    /// Validates `config`, optionally restores the newest dump, and starts
    /// the periodic worker. Must be called within a tokio runtime.
    pub fn spawn(manager: Arc<DatabaseManager>, config: SnapshotConfig) -> Result<Self> {
        config.validate()?;
        if config.auto_restore_latest_dump {
            match manager.restore_latest_dump(&config) {
                Ok(true) => info!("restored latest dump of `{}`", config.database_name),
                Ok(false) => info!("no dump of `{}` to restore", config.database_name),
                Err(e) => warn!("restore of `{}` failed, starting empty: {e}", config.database_name),
            }
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let (attempts_tx, attempts_rx) = watch::channel(0u64);
        let in_flight = Arc::new(AtomicBool::new(false));
        let actor = SnapshotActor {
            rx,
            manager: manager.clone(),
            config: config.clone(),
            attempts: attempts_tx,
            in_flight: in_flight.clone(),
        };
        tokio::spawn(actor.run());
        Ok(Self {
            tx,
            attempts: attempts_rx,
            in_flight,
            manager,
            config,
        })
    }

    /// Requests a backup outside the regular schedule. Skipped while a
    /// prior backup is still being written.
    pub fn trigger_backup(&self) {
        if self.in_flight.load(Ordering::Acquire) {
            return;
        }
        let _ = self.tx.send(WorkerMessage::Trigger);
    }

    /// A receiver over the number of backup attempts completed so far.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.attempts.clone()
    }

    /// Loads the newest matching dump through the manager. Returns whether
    /// a restore happened; failures are logged, not raised.
    pub fn restore_latest(&self) -> bool {
        match self.manager.restore_latest_dump(&self.config) {
            Ok(restored) => restored,
            Err(e) => {
                warn!("restore of `{}` failed: {e}", self.config.database_name);
                false
            }
        }
    }

    /// Stops the timer. A backup already being written completes.
    pub fn dispose(&self) {
        let _ = self.tx.send(WorkerMessage::Exit);
    }
}

impl Drop for SnapshotWorker {
    fn drop(&mut self) {
        let _ = self.tx.send(WorkerMessage::Exit);
    }
}

struct SnapshotActor {
    rx: mpsc::UnboundedReceiver<WorkerMessage>,
    manager: Arc<DatabaseManager>,
    config: SnapshotConfig,
    attempts: watch::Sender<u64>,
    in_flight: Arc<AtomicBool>,
}

impl SnapshotActor {
    async fn run(mut self) {
        if self.config.enable_automatic_snapshots {
            let period = self.config.snapshot_interval;
            let mut ticks = interval_at(Instant::now() + period, period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticks.tick() => self.start_backup(),
                    msg = self.rx.recv() => match msg {
                        Some(WorkerMessage::Trigger) => self.start_backup(),
                        Some(WorkerMessage::Exit) | None => break,
                    },
                }
            }
        } else {
            while let Some(WorkerMessage::Trigger) = self.rx.recv().await {
                self.start_backup();
            }
        }
    }

    /// Starts one backup on its own task, unless a prior one is still in
    /// flight, in which case the request is skipped. The flag is cleared by
    /// the backup task itself, so a write outlives a disposed worker.
    fn start_backup(&self) {
        if self.in_flight.swap(true, Ordering::AcqRel) {
            return;
        }
        let manager = self.manager.clone();
        let config = self.config.clone();
        let attempts = self.attempts.clone();
        let in_flight = self.in_flight.clone();
        tokio::spawn(async move {
            let database = config.database_name.clone();
            let result = tokio::task::spawn_blocking(move || manager.dump_database_with(&config)).await;
            match result {
                Ok(Ok(path)) => info!("captured snapshot of `{database}` at {}", path.display()),
                Ok(Err(e)) => warn!("snapshot of `{database}` failed: {e}"),
                Err(e) => warn!("snapshot task of `{database}` panicked: {e}"),
            }
            in_flight.store(false, Ordering::Release);
            attempts.send_modify(|n| *n += 1);
        });
    }
}

mod availability;
mod conflict;
mod error;
mod lifecycle;
mod queries;
mod slot_lock;
mod store;
#[cfg(test)]
mod tests;

pub use availability::{free_spans, merge_overlapping, subtract_intervals};
pub use error::{EngineError, ErrorKind};
pub use store::{AppointmentStore, SharedAppointment};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::info;

use crate::config::EngineConfig;
use crate::model::*;
use crate::roster::DoctorRoster;
use crate::wal::Wal;

use slot_lock::SlotLocks;

// ── Group-commit WAL channel ─────────────────────────────

enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit:
/// take the first append, drain whatever else is already queued, then pay a
/// single fsync for the whole batch.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };

        let mut batch = vec![(event, response)];
        let mut deferred = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { event, response } => batch.push((event, response)),
                other => {
                    // Commit what we have before compaction sees the log.
                    deferred = Some(other);
                    break;
                }
            }
        }

        commit_batch(&mut wal, &mut batch);
        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after an append error so partial bytes don't leak into the
    // next batch; every caller in this batch is told it failed.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result =
                Wal::write_compact_file(wal.path(), &events).and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            commit_batch(wal, &mut vec![(event, response)]);
        }
    }
}

/// The appointment lifecycle and availability engine.
///
/// Owns the appointment store, the slot lock table and the WAL writer. All
/// mutation goes through the lifecycle methods in `lifecycle.rs`.
pub struct Engine {
    store: AppointmentStore,
    slot_locks: SlotLocks,
    wal_tx: mpsc::Sender<WalCommand>,
    /// Writers hold it shared; compaction holds it exclusively so no write
    /// lands in the old log after the snapshot was taken.
    compaction_gate: RwLock<()>,
    roster: Arc<DoctorRoster>,
    config: EngineConfig,
}

impl Engine {
    /// Replay the WAL at `wal_path` and start the writer task.
    /// Must be called from inside a tokio runtime.
    pub fn new(wal_path: PathBuf, roster: Arc<DoctorRoster>, config: EngineConfig) -> io::Result<Self> {
        config
            .validate()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let store = AppointmentStore::new(config.slot_width_ms);
        for event in &events {
            store.replay_event(event);
        }
        info!(
            "replayed {} events: {} appointments, {} active slots",
            events.len(),
            store.len(),
            store.active_slot_count()
        );

        Ok(Self {
            store,
            slot_locks: SlotLocks::new(),
            wal_tx,
            compaction_gate: RwLock::new(()),
            roster,
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn roster(&self) -> &DoctorRoster {
        &self.roster
    }

    /// Send a command to the writer and wait for its reply, bounded by the
    /// store timeout.
    async fn wal_request<T>(
        &self,
        cmd: WalCommand,
        rx: oneshot::Receiver<T>,
    ) -> Result<T, EngineError> {
        let timeout = self.config.store_timeout;
        let round_trip = async {
            self.wal_tx
                .send(cmd)
                .await
                .map_err(|_| EngineError::Infrastructure("WAL writer shut down".into()))?;
            rx.await
                .map_err(|_| EngineError::Infrastructure("WAL writer dropped response".into()))
        };
        tokio::time::timeout(timeout, round_trip)
            .await
            .map_err(|_| EngineError::Infrastructure("WAL commit timed out".into()))?
    }

    /// Durably append one event. Nothing in memory changes until this succeeds.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        let cmd = WalCommand::Append {
            event: event.clone(),
            response: tx,
        };
        self.wal_request(cmd, rx)
            .await?
            .map_err(|e| EngineError::Infrastructure(e.to_string()))
    }

    /// WAL-append then apply to a record the caller holds for writing.
    async fn persist_and_apply(
        &self,
        appt: &mut Appointment,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.store.apply_event(appt, event);
        Ok(())
    }

    /// Rewrite the WAL as one `AppointmentCreated` per record in its current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.compaction_gate.write().await;
        let mut snapshot = Vec::with_capacity(self.store.len());
        for shared in self.store.all() {
            let appointment = shared.read().await.clone();
            snapshot.push(appointment);
        }
        snapshot.sort_by_key(|a| a.id);
        let events = snapshot
            .into_iter()
            .map(|appointment| Event::AppointmentCreated { appointment })
            .collect();

        let (tx, rx) = oneshot::channel();
        self.wal_request(WalCommand::Compact { events, response: tx }, rx)
            .await?
            .map_err(|e| EngineError::Infrastructure(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        self.wal_request(WalCommand::AppendsSinceCompact { response: tx }, rx)
            .await
            .unwrap_or(0)
    }
}

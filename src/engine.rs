mod availability;
mod blocks;
mod conflict;
mod error;
mod ledger;
mod lifecycle;
mod mutations;
mod queries;
mod store;
#[cfg(test)]
mod tests;

pub use availability::{free_spans, has_overlap, merge_overlapping, subtract_intervals};
pub use error::{EngineError, EntityKind};
pub use ledger::{EntryPatch, NewEntry, reconcile, summarize};
pub use lifecycle::{BookingUpdate, PriceChange};
pub use mutations::{NewHotel, NewRoom};
pub use queries::HotelSummary;
pub use store::{SharedHotelState, SharedRoomState};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{FixedOffset, NaiveDate, Offset, Utc};
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock, mpsc, oneshot};
use tracing::{info, warn};
use ulid::Ulid;

use crate::model::*;
use crate::notify::Broadcast;
use crate::observability;
use crate::wal::Wal;

use store::{Held, InMemoryStore};

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
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

/// Background task that owns the WAL and batches appends for group commit:
/// block for one append, drain whatever else is queued, fsync once, ack all.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Append { event, response } = cmd else {
            handle_non_append(&mut wal, cmd);
            continue;
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        metrics::histogram!(observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        if let Err(e) = &result {
            warn!("WAL flush of {} records failed: {e}", batch.len());
        }
        for (_, tx) in batch {
            let r = match &result {
                Ok(()) => Ok(()),
                Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
            };
            let _ = tx.send(r);
        }

        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let append_result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so a partial batch does not leak into the next one.
    let flush_result = wal.flush_sync();
    append_result.and(flush_result)
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

// ── Engine ───────────────────────────────────────────────

/// Runtime knobs for an engine.
#[derive(Debug, Clone, Copy)]
pub struct EngineOptions {
    /// Property time zone used for every timestamp -> date conversion.
    pub zone: FixedOffset,
    /// Upper bound on waiting for a room or hotel write lock.
    pub lock_timeout: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            zone: FixedOffset::east_opt(7 * 3600).unwrap_or_else(|| Utc.fix()),
            lock_timeout: Duration::from_secs(2),
        }
    }
}

/// Shared hold on the mutation gate. Every mutation owns one from before it
/// takes its first lock until its event is applied; compaction takes the gate
/// exclusively so its snapshot and the log rewrite see no writes in between.
pub(super) type Gate = OwnedRwLockReadGuard<()>;

pub struct Engine {
    pub(super) store: Arc<InMemoryStore>,
    pub(super) gate: Arc<RwLock<()>>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub(super) notify: Arc<dyn Broadcast>,
    pub(super) options: EngineOptions,
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<dyn Broadcast>) -> io::Result<Self> {
        Self::with_options(wal_path, notify, EngineOptions::default())
    }

    /// Replay the log at `wal_path` and start its writer task. Must run inside a tokio runtime.
    pub fn with_options(
        wal_path: PathBuf,
        notify: Arc<dyn Broadcast>,
        options: EngineOptions,
    ) -> io::Result<Self> {
        let replay = Wal::replay(&wal_path)?;
        if replay.discarded_tail {
            warn!("discarded torn or corrupt tail of {}", wal_path.display());
        }
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let store = Arc::new(InMemoryStore::new());
        let mut skipped = 0usize;
        for event in &replay.events {
            if !store.apply_replayed(event) {
                skipped += 1;
            }
        }
        if skipped > 0 {
            warn!("{skipped} replayed events referenced unknown hotels or rooms");
        }
        info!(
            "replayed {} events from {}",
            replay.events.len(),
            wal_path.display()
        );

        Ok(Self {
            store,
            gate: Arc::new(RwLock::new(())),
            wal_tx,
            notify,
            options,
        })
    }

    pub fn zone(&self) -> FixedOffset {
        self.options.zone
    }

    /// Today's date in the property time zone.
    pub fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.options.zone).date_naive()
    }

    /// Queue an event for the WAL writer. Cancel-safe: if this future is
    /// dropped before completing, nothing was queued.
    async fn wal_enqueue(&self, event: Event) -> Result<oneshot::Receiver<io::Result<()>>, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::StorageFailure("WAL writer shut down".into()))?;
        Ok(rx)
    }

    /// Durably append `event`, then apply it under the `held` locks and publish
    /// it to `hotel_id`'s subscribers (guest registrations have no hotel).
    ///
    /// Everything after the event is queued runs on a detached task that owns
    /// the locks, so a caller that stops waiting cannot leave the projection
    /// out of step with the log. On a WAL failure nothing is applied.
    pub(super) async fn commit(
        &self,
        gate: Gate,
        hotel_id: Option<Ulid>,
        event: Event,
        held: Held,
    ) -> Result<(), EngineError> {
        let ack = self.wal_enqueue(event.clone()).await?;
        let store = self.store.clone();
        let notify = self.notify.clone();
        let task = tokio::spawn(async move {
            let mut held = held;
            ack.await
                .map_err(|_| EngineError::StorageFailure("WAL writer dropped response".into()))?
                .map_err(|e| EngineError::StorageFailure(e.to_string()))?;
            store.apply_held(&event, &mut held);
            if let Some(hotel_id) = hotel_id {
                store.bump_generation(hotel_id);
            }
            drop(held);
            drop(gate);
            if let Some(hotel_id) = hotel_id {
                notify.send(hotel_id, &event);
            }
            Ok(())
        });
        task.await
            .map_err(|e| EngineError::StorageFailure(format!("commit task failed: {e}")))?
    }

    /// Enter the mutation gate. Taken before any room or hotel lock.
    pub(super) async fn enter(&self) -> Result<Gate, EngineError> {
        tokio::time::timeout(self.options.lock_timeout, self.gate.clone().read_owned())
            .await
            .map_err(|_| {
                metrics::counter!(observability::LOCK_TIMEOUTS_TOTAL).increment(1);
                EngineError::StorageFailure("lock timeout waiting for compaction".into())
            })
    }

    /// Acquire a room's write lock within the configured timeout.
    pub(super) async fn lock_room(
        &self,
        room_id: Ulid,
    ) -> Result<OwnedRwLockWriteGuard<RoomState>, EngineError> {
        let rs = self
            .store
            .room(&room_id)
            .ok_or(EngineError::NotFound(EntityKind::Room, room_id))?;
        tokio::time::timeout(self.options.lock_timeout, rs.write_owned())
            .await
            .map_err(|_| {
                metrics::counter!(observability::LOCK_TIMEOUTS_TOTAL).increment(1);
                EngineError::StorageFailure(format!("lock timeout on room {room_id}"))
            })
    }

    /// Lock several rooms in id order so concurrent multi-room callers cannot deadlock.
    pub(super) async fn lock_rooms(
        &self,
        mut room_ids: Vec<Ulid>,
    ) -> Result<Vec<OwnedRwLockWriteGuard<RoomState>>, EngineError> {
        room_ids.sort();
        room_ids.dedup();
        let mut guards = Vec::with_capacity(room_ids.len());
        for room_id in room_ids {
            guards.push(self.lock_room(room_id).await?);
        }
        Ok(guards)
    }

    pub(super) async fn lock_hotel(
        &self,
        hotel_id: Ulid,
    ) -> Result<OwnedRwLockWriteGuard<HotelState>, EngineError> {
        let hs = self
            .store
            .hotel(&hotel_id)
            .ok_or(EngineError::NotFound(EntityKind::Hotel, hotel_id))?;
        tokio::time::timeout(self.options.lock_timeout, hs.write_owned())
            .await
            .map_err(|_| {
                metrics::counter!(observability::LOCK_TIMEOUTS_TOTAL).increment(1);
                EngineError::StorageFailure(format!("lock timeout on hotel {hotel_id}"))
            })
    }

    /// Snapshot of a hotel's catalog row (rates included).
    pub(super) async fn hotel_snapshot(&self, hotel_id: Ulid) -> Result<Hotel, EngineError> {
        let hs = self
            .store
            .hotel(&hotel_id)
            .ok_or(EngineError::NotFound(EntityKind::Hotel, hotel_id))?;
        let guard = hs.read().await;
        Ok(guard.hotel.clone())
    }

    /// Snapshot of a room's catalog row.
    pub(super) async fn room_snapshot(&self, room_id: Ulid) -> Result<Room, EngineError> {
        let rs = self
            .store
            .room(&room_id)
            .ok_or(EngineError::NotFound(EntityKind::Room, room_id))?;
        let guard = rs.read().await;
        Ok(guard.room.clone())
    }
}

/// Record an operation outcome in metrics and pass it through.
pub(super) fn observe<T>(op: &'static str, result: Result<T, EngineError>) -> Result<T, EngineError> {
    let status = match &result {
        Ok(_) => "ok",
        Err(e) => e.kind(),
    };
    metrics::counter!(observability::OPERATIONS_TOTAL, "op" => op, "status" => status).increment(1);
    if let Err(e) = &result {
        if e.is_retryable() {
            warn!("{op} failed: {e}");
        } else {
            tracing::debug!("{op} rejected: {e}");
        }
    }
    result
}

use std::collections::HashSet;
use std::sync::Arc;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use tracing::info;
use ulid::Ulid;

use crate::limits::MAX_DESCRIPTION_LEN;
use crate::model::*;
use crate::observability;

use super::conflict::check_text;
use super::store::Held;
use super::{Engine, EngineError, EntityKind, observe};

/// Fields for a new persisted ledger row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEntry {
    pub entry_type: EntryType,
    pub amount: Decimal,
    pub description: Option<String>,
    /// Defaults to today in the property time zone.
    pub date: Option<NaiveDate>,
    pub booking_id: Option<Ulid>,
}

/// Partial update of a persisted row. The booking link cannot be changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryPatch {
    pub entry_type: Option<EntryType>,
    pub amount: Option<Decimal>,
    pub description: Option<String>,
    pub date: Option<NaiveDate>,
}

fn synthesized_description(booking_id: Ulid, guest_name: &str) -> String {
    format!("Booking #{booking_id} ({guest_name})")
}

/// The transient income row standing in for a booking without a persisted entry.
fn synthesize(hotel_id: Ulid, booking: &Booking, guest_name: &str) -> LedgerEntry {
    LedgerEntry {
        id: None,
        hotel_id,
        booking_id: Some(booking.id),
        entry_type: EntryType::Income,
        amount: booking.total_price,
        description: synthesized_description(booking.id, guest_name),
        date: booking.span.start,
        generated: true,
    }
}

/// Merge persisted rows with synthesized ones for every non-cancelled booking
/// that has no linked row. Newest first; rows on the same date are ordered by
/// booking id (or entry id for unlinked rows), descending.
pub fn reconcile<F>(
    hotel_id: Ulid,
    persisted: &[AccountingEntry],
    bookings: &[Booking],
    guest_name: F,
) -> Vec<LedgerEntry>
where
    F: Fn(&Ulid) -> String,
{
    let linked: HashSet<Ulid> = persisted.iter().filter_map(|e| e.booking_id).collect();
    let mut merged: Vec<LedgerEntry> = persisted.iter().map(LedgerEntry::from).collect();
    merged.extend(
        bookings
            .iter()
            .filter(|b| b.status.is_active() && !linked.contains(&b.id))
            .map(|b| synthesize(hotel_id, b, &guest_name(&b.guest_id))),
    );
    merged.sort_by(|a, b| {
        b.date
            .cmp(&a.date)
            .then_with(|| b.booking_id.or(b.id).cmp(&a.booking_id.or(a.id)))
    });
    merged
}

pub fn summarize(entries: &[LedgerEntry]) -> LedgerSummary {
    let mut summary = LedgerSummary::default();
    for e in entries {
        match e.entry_type {
            EntryType::Income => summary.income += e.amount,
            EntryType::Expense => summary.expense += e.amount,
        }
    }
    summary.net = summary.income - summary.expense;
    summary
}

fn check_amount(amount: Decimal) -> Result<(), EngineError> {
    if amount < Decimal::ZERO {
        return Err(EngineError::InvalidAmount);
    }
    Ok(())
}

impl Engine {
    /// Merged ledger for a hotel, newest first, optionally limited to an
    /// inclusive date range. Point-in-time: a booking committed concurrently
    /// may or may not be reflected.
    pub async fn ledger(
        &self,
        hotel_id: Ulid,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<LedgerEntry>, EngineError> {
        observe("ledger", self.ledger_inner(hotel_id, from, to).await)
    }

    async fn ledger_inner(
        &self,
        hotel_id: Ulid,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<LedgerEntry>, EngineError> {
        if let (Some(start), Some(end)) = (from, to)
            && end < start
        {
            return Err(EngineError::InvalidRange { start, end });
        }
        let merged = self.merged_ledger(hotel_id).await?;
        Ok(merged
            .iter()
            .filter(|e| from.is_none_or(|f| e.date >= f) && to.is_none_or(|t| e.date <= t))
            .cloned()
            .collect())
    }

    /// Income, expense and net over the merged ledger.
    pub async fn ledger_summary(
        &self,
        hotel_id: Ulid,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<LedgerSummary, EngineError> {
        let entries = self.ledger(hotel_id, from, to).await?;
        Ok(summarize(&entries))
    }

    async fn merged_ledger(&self, hotel_id: Ulid) -> Result<Arc<Vec<LedgerEntry>>, EngineError> {
        if let Some(cached) = self.store.cached_ledger(&hotel_id) {
            metrics::counter!(observability::LEDGER_CACHE_HITS_TOTAL).increment(1);
            return Ok(cached);
        }
        metrics::counter!(observability::LEDGER_CACHE_MISSES_TOTAL).increment(1);

        // Read the generation first: a commit landing mid-read makes this result stale, and
        // `cache_ledger` then refuses it.
        let generation = self.store.generation(&hotel_id);
        let (rooms, persisted) = {
            let hs = self
                .store
                .hotel(&hotel_id)
                .ok_or(EngineError::NotFound(EntityKind::Hotel, hotel_id))?;
            let guard = hs.read().await;
            (guard.rooms.clone(), guard.entries.clone())
        };
        let bookings = self.bookings_in_rooms(&rooms).await;
        let merged = Arc::new(reconcile(hotel_id, &persisted, &bookings, |g| {
            self.store.guest_name(g)
        }));
        self.store.cache_ledger(hotel_id, generation, merged.clone());
        Ok(merged)
    }

    /// Record a ledger row. A row linked to a booking must be the only one for it.
    pub async fn add_entry(
        &self,
        hotel_id: Ulid,
        new: NewEntry,
    ) -> Result<AccountingEntry, EngineError> {
        observe("add_entry", self.add_entry_inner(hotel_id, new).await)
    }

    async fn add_entry_inner(
        &self,
        hotel_id: Ulid,
        new: NewEntry,
    ) -> Result<AccountingEntry, EngineError> {
        check_amount(new.amount)?;
        let description = new.description.unwrap_or_default();
        check_text(&description, MAX_DESCRIPTION_LEN, "description too long")?;

        let entry = AccountingEntry {
            id: Ulid::new(),
            hotel_id,
            booking_id: new.booking_id,
            entry_type: new.entry_type,
            amount: new.amount,
            description,
            date: new.date.unwrap_or_else(|| self.today()),
        };
        self.record_entry(entry).await
    }

    /// Persist the synthesized row for a booking so it can be edited.
    pub async fn materialize_entry(&self, booking_id: Ulid) -> Result<AccountingEntry, EngineError> {
        observe("materialize_entry", self.materialize_entry_inner(booking_id).await)
    }

    async fn materialize_entry_inner(&self, booking_id: Ulid) -> Result<AccountingEntry, EngineError> {
        let room_id = self
            .store
            .room_for_booking(&booking_id)
            .ok_or(EngineError::NotFound(EntityKind::Booking, booking_id))?;
        let (hotel_id, booking) = {
            let rs = self
                .store
                .room(&room_id)
                .ok_or(EngineError::NotFound(EntityKind::Room, room_id))?;
            let guard = rs.read().await;
            let booking = guard
                .booking(booking_id)
                .cloned()
                .ok_or(EngineError::NotFound(EntityKind::Booking, booking_id))?;
            (guard.room.hotel_id, booking)
        };
        // Cancelled bookings have no generated row to materialize.
        if !booking.status.is_active() {
            return Err(EngineError::NotFound(EntityKind::Entry, booking_id));
        }

        let generated = synthesize(hotel_id, &booking, &self.store.guest_name(&booking.guest_id));
        let entry = AccountingEntry {
            id: Ulid::new(),
            hotel_id,
            booking_id: Some(booking_id),
            entry_type: generated.entry_type,
            amount: generated.amount,
            description: generated.description,
            date: generated.date,
        };
        self.record_entry(entry).await
    }

    async fn record_entry(&self, entry: AccountingEntry) -> Result<AccountingEntry, EngineError> {
        let gate = self.enter().await?;
        let guard = self.lock_hotel(entry.hotel_id).await?;
        if let Some(booking_id) = entry.booking_id {
            // Ownership is read under the hotel lock so the row lands in the booking's own ledger.
            let owned = self
                .store
                .room_for_booking(&booking_id)
                .is_some_and(|room_id| guard.rooms.contains(&room_id));
            if !owned {
                return Err(EngineError::NotFound(EntityKind::Booking, booking_id));
            }
            if guard.entry_for_booking(booking_id).is_some() {
                return Err(EngineError::AlreadyLinked(booking_id));
            }
        }
        let event = Event::EntryRecorded {
            entry: entry.clone(),
        };
        self.commit(gate, Some(entry.hotel_id), event, Held::Hotel(guard))
            .await?;
        info!(
            "entry {} recorded for hotel {}: {:?} {}",
            entry.id, entry.hotel_id, entry.entry_type, entry.amount
        );
        Ok(entry)
    }

    /// Edit a persisted row. Generated rows have no id and cannot be targeted.
    pub async fn update_entry(
        &self,
        entry_id: Ulid,
        patch: EntryPatch,
    ) -> Result<AccountingEntry, EngineError> {
        observe("update_entry", self.update_entry_inner(entry_id, patch).await)
    }

    async fn update_entry_inner(
        &self,
        entry_id: Ulid,
        patch: EntryPatch,
    ) -> Result<AccountingEntry, EngineError> {
        if let Some(amount) = patch.amount {
            check_amount(amount)?;
        }
        if let Some(description) = &patch.description {
            check_text(description, MAX_DESCRIPTION_LEN, "description too long")?;
        }
        let hotel_id = self
            .store
            .hotel_for_entry(&entry_id)
            .ok_or(EngineError::NotFound(EntityKind::Entry, entry_id))?;
        let gate = self.enter().await?;
        let guard = self.lock_hotel(hotel_id).await?;
        let mut entry = guard
            .entries
            .iter()
            .find(|e| e.id == entry_id)
            .cloned()
            .ok_or(EngineError::NotFound(EntityKind::Entry, entry_id))?;

        if let Some(t) = patch.entry_type {
            entry.entry_type = t;
        }
        if let Some(amount) = patch.amount {
            entry.amount = amount;
        }
        if let Some(description) = patch.description {
            entry.description = description;
        }
        if let Some(date) = patch.date {
            entry.date = date;
        }

        let event = Event::EntryUpdated {
            entry: entry.clone(),
        };
        self.commit(gate, Some(hotel_id), event, Held::Hotel(guard))
            .await?;
        info!("entry {entry_id} updated");
        Ok(entry)
    }

    pub async fn delete_entry(&self, entry_id: Ulid) -> Result<(), EngineError> {
        observe("delete_entry", self.delete_entry_inner(entry_id).await)
    }

    async fn delete_entry_inner(&self, entry_id: Ulid) -> Result<(), EngineError> {
        let hotel_id = self
            .store
            .hotel_for_entry(&entry_id)
            .ok_or(EngineError::NotFound(EntityKind::Entry, entry_id))?;
        let gate = self.enter().await?;
        let guard = self.lock_hotel(hotel_id).await?;
        if !guard.entries.iter().any(|e| e.id == entry_id) {
            return Err(EngineError::NotFound(EntityKind::Entry, entry_id));
        }
        let event = Event::EntryDeleted {
            id: entry_id,
            hotel_id,
        };
        self.commit(gate, Some(hotel_id), event, Held::Hotel(guard))
            .await?;
        info!("entry {entry_id} deleted");
        Ok(())
    }
}

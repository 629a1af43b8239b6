use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Half-open date interval `[start, end)`. `end` is the check-out day: its night is not occupied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl Span {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Whole days between start and end.
    pub fn nights(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_date(&self, d: NaiveDate) -> bool {
        self.start <= d && d < self.end
    }

    /// Month (1..=12) of the check-in day.
    pub fn check_in_month(&self) -> u32 {
        self.start.month()
    }
}

// ── Catalog ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeasonalMultiplier {
    pub month: u32,
    pub multiplier: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hotel {
    pub id: Ulid,
    pub name: String,
    /// Nightly base rate.
    pub base_price: Decimal,
    /// At most one entry per month, sorted by month.
    pub seasonal_multipliers: Vec<SeasonalMultiplier>,
}

impl Hotel {
    /// Multiplier for a calendar month; months without an entry use 1.
    pub fn multiplier_for(&self, month: u32) -> Decimal {
        self.seasonal_multipliers
            .iter()
            .find(|m| m.month == month)
            .map_or(Decimal::ONE, |m| m.multiplier)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: Ulid,
    pub hotel_id: Ulid,
    pub number: String,
    pub room_type: String,
    /// Added to the hotel's nightly rate.
    pub price_override: Decimal,
    /// Display flag only; does not affect availability.
    pub visible: bool,
    pub position: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Guest {
    pub id: Ulid,
    pub name: String,
}

// ── Bookings ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Tentative,
    Booked,
    CheckedIn,
    CheckedOut,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Tentative => "tentative",
            BookingStatus::Booked => "booked",
            BookingStatus::CheckedIn => "checkedin",
            BookingStatus::CheckedOut => "checkedout",
            BookingStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BookingStatus::CheckedOut | BookingStatus::Cancelled)
    }

    /// Anything but cancelled occupies the room.
    pub fn is_active(&self) -> bool {
        !matches!(self, BookingStatus::Cancelled)
    }

    /// Edges of the booking state graph. Self-loops are not edges.
    pub fn can_transition_to(&self, next: BookingStatus) -> bool {
        use BookingStatus::*;
        matches!(
            (self, next),
            (Tentative, Booked)
                | (Booked, CheckedIn)
                | (CheckedIn, CheckedOut)
                | (Tentative, Cancelled)
                | (Booked, Cancelled)
                | (CheckedIn, Cancelled)
        )
    }

    /// Calendar color for this status.
    pub fn color(&self) -> &'static str {
        match self {
            BookingStatus::Tentative => "#f0ad4e",
            BookingStatus::Booked => "#3788d8",
            BookingStatus::CheckedIn => "#28a745",
            BookingStatus::CheckedOut => "#6c757d",
            BookingStatus::Cancelled => "#dc3545",
        }
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub room_id: Ulid,
    pub guest_id: Ulid,
    pub span: Span,
    /// Authoritative amount charged for the stay.
    pub total_price: Decimal,
    pub status: BookingStatus,
}

impl Booking {
    pub fn nights(&self) -> i64 {
        self.span.nights()
    }

    /// Per-night display value derived from the total.
    pub fn nightly_price(&self) -> Decimal {
        match self.nights() {
            n if n > 0 => self.total_price / Decimal::from(n),
            _ => self.total_price,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomBlock {
    pub id: Ulid,
    pub room_id: Ulid,
    pub span: Span,
    pub reason: String,
}

impl RoomBlock {
    /// True for the sentinel block that hides a room from the scheduling surface.
    pub fn is_full_block(&self) -> bool {
        self.span == crate::limits::full_block_span() && self.reason == crate::limits::FULL_BLOCK_REASON
    }
}

// ── Ledger ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    Income,
    Expense,
}

/// A persisted ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountingEntry {
    pub id: Ulid,
    pub hotel_id: Ulid,
    /// Unique across persisted entries when present.
    pub booking_id: Option<Ulid>,
    pub entry_type: EntryType,
    pub amount: Decimal,
    pub description: String,
    pub date: NaiveDate,
}

/// A row of the merged ledger view. Generated rows have no id and are never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub id: Option<Ulid>,
    pub hotel_id: Ulid,
    pub booking_id: Option<Ulid>,
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    pub amount: Decimal,
    pub description: String,
    pub date: NaiveDate,
    pub generated: bool,
}

impl From<&AccountingEntry> for LedgerEntry {
    fn from(e: &AccountingEntry) -> Self {
        Self {
            id: Some(e.id),
            hotel_id: e.hotel_id,
            booking_id: e.booking_id,
            entry_type: e.entry_type,
            amount: e.amount,
            description: e.description.clone(),
            date: e.date,
            generated: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LedgerSummary {
    pub income: Decimal,
    pub expense: Decimal,
    pub net: Decimal,
}

// ── Projections ──────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct HotelState {
    pub hotel: Hotel,
    pub rooms: Vec<Ulid>,
    /// Persisted ledger rows.
    pub entries: Vec<AccountingEntry>,
}

impl HotelState {
    pub fn new(hotel: Hotel) -> Self {
        Self {
            hotel,
            rooms: Vec::new(),
            entries: Vec::new(),
        }
    }

    pub fn entry_for_booking(&self, booking_id: Ulid) -> Option<&AccountingEntry> {
        self.entries.iter().find(|e| e.booking_id == Some(booking_id))
    }

    pub fn upsert_entry(&mut self, entry: AccountingEntry) {
        match self.entries.iter_mut().find(|e| e.id == entry.id) {
            Some(slot) => *slot = entry,
            None => self.entries.push(entry),
        }
    }

    pub fn remove_entry(&mut self, id: Ulid) -> Option<AccountingEntry> {
        let pos = self.entries.iter().position(|e| e.id == id)?;
        Some(self.entries.remove(pos))
    }
}

/// A room plus everything scheduled on it. Bookings and blocks are each sorted by `span.start`.
#[derive(Debug, Clone)]
pub struct RoomState {
    pub room: Room,
    pub bookings: Vec<Booking>,
    pub blocks: Vec<RoomBlock>,
}

impl RoomState {
    pub fn new(room: Room) -> Self {
        Self {
            room,
            bookings: Vec::new(),
            blocks: Vec::new(),
        }
    }

    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .binary_search_by_key(&booking.span.start, |b| b.span.start)
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    pub fn remove_booking(&mut self, id: Ulid) -> Option<Booking> {
        let pos = self.bookings.iter().position(|b| b.id == id)?;
        Some(self.bookings.remove(pos))
    }

    pub fn booking(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    pub fn booking_mut(&mut self, id: Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }

    pub fn insert_block(&mut self, block: RoomBlock) {
        let pos = self
            .blocks
            .binary_search_by_key(&block.span.start, |b| b.span.start)
            .unwrap_or_else(|e| e);
        self.blocks.insert(pos, block);
    }

    pub fn remove_block(&mut self, id: Ulid) -> Option<RoomBlock> {
        let pos = self.blocks.iter().position(|b| b.id == id)?;
        Some(self.blocks.remove(pos))
    }

    /// Non-cancelled bookings whose span overlaps the query.
    /// Binary search skips bookings starting at or after `query.end`.
    pub fn active_bookings_overlapping(&self, query: &Span) -> impl Iterator<Item = &Booking> {
        let right_bound = self.bookings.partition_point(|b| b.span.start < query.end);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.status.is_active() && b.span.overlaps(query))
    }

    pub fn blocks_overlapping(&self, query: &Span) -> impl Iterator<Item = &RoomBlock> {
        let right_bound = self.blocks.partition_point(|b| b.span.start < query.end);
        self.blocks[..right_bound]
            .iter()
            .filter(move |b| b.span.overlaps(query))
    }

    pub fn full_block(&self) -> Option<&RoomBlock> {
        self.blocks.iter().find(|b| b.is_full_block())
    }
}

/// The event types, flat with no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    HotelRegistered {
        hotel: Hotel,
    },
    HotelRatesUpdated {
        id: Ulid,
        base_price: Decimal,
        seasonal_multipliers: Vec<SeasonalMultiplier>,
    },
    RoomRegistered {
        room: Room,
    },
    GuestRegistered {
        guest: Guest,
    },
    BookingCreated {
        booking: Booking,
    },
    /// Full post-update state; `previous_room_id` differs from `booking.room_id` on a room move.
    BookingUpdated {
        booking: Booking,
        previous_room_id: Ulid,
    },
    BookingStatusChanged {
        id: Ulid,
        room_id: Ulid,
        status: BookingStatus,
    },
    BlockCreated {
        block: RoomBlock,
    },
    BlockRemoved {
        id: Ulid,
        room_id: Ulid,
    },
    EntryRecorded {
        entry: AccountingEntry,
    },
    EntryUpdated {
        entry: AccountingEntry,
    },
    EntryDeleted {
        id: Ulid,
        hotel_id: Ulid,
    },
}

// ── Query result types ───────────────────────────────────────────

/// A booking shaped for the scheduling calendar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarEvent {
    pub id: Ulid,
    pub resource_id: Ulid,
    pub title: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub color: &'static str,
}

impl CalendarEvent {
    pub fn from_booking(booking: &Booking, guest_name: &str) -> Self {
        Self {
            id: booking.id,
            resource_id: booking.room_id,
            title: guest_name.to_string(),
            start: booking.span.start,
            end: booking.span.end,
            color: booking.status.color(),
        }
    }
}

use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::BookingStatus;

/// What a `NotFound` refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Hotel,
    Room,
    Guest,
    Booking,
    Block,
    Entry,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Hotel => "hotel",
            EntityKind::Room => "room",
            EntityKind::Guest => "guest",
            EntityKind::Booking => "booking",
            EntityKind::Block => "block",
            EntityKind::Entry => "accounting entry",
        }
    }
}

#[derive(Debug)]
pub enum EngineError {
    NotFound(EntityKind, Ulid),
    AlreadyExists(Ulid),
    InvalidRange {
        start: NaiveDate,
        end: NaiveDate,
    },
    /// Overlaps the given active booking.
    DoubleBooking(Ulid),
    /// Overlaps the given block.
    BlockConflict(Ulid),
    InvalidTransition {
        from: BookingStatus,
        to: BookingStatus,
    },
    /// A persisted entry already references this booking.
    AlreadyLinked(Ulid),
    /// A booking can only move between rooms of its own hotel.
    CrossHotelMove {
        booking: Ulid,
        room: Ulid,
    },
    InvalidAmount,
    InvalidRates(&'static str),
    LimitExceeded(&'static str),
    /// Durable write or lock acquisition failed; nothing was applied.
    StorageFailure(String),
}

impl EngineError {
    /// Only storage failures are worth retrying unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::StorageFailure(_))
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::NotFound(..) => "not_found",
            EngineError::AlreadyExists(_) => "already_exists",
            EngineError::InvalidRange { .. } => "invalid_range",
            EngineError::DoubleBooking(_) => "double_booking",
            EngineError::BlockConflict(_) => "block_conflict",
            EngineError::InvalidTransition { .. } => "invalid_transition",
            EngineError::AlreadyLinked(_) => "already_linked",
            EngineError::CrossHotelMove { .. } => "cross_hotel_move",
            EngineError::InvalidAmount => "invalid_amount",
            EngineError::InvalidRates(_) => "invalid_rates",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::StorageFailure(_) => "storage_failure",
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(kind, id) => write!(f, "{} not found: {id}", kind.as_str()),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::InvalidRange { start, end } => {
                write!(f, "invalid date range [{start}, {end}): end must be after start")
            }
            EngineError::DoubleBooking(id) => write!(f, "room already booked by {id} for these dates"),
            EngineError::BlockConflict(id) => write!(f, "overlaps existing block {id}"),
            EngineError::InvalidTransition { from, to } => {
                write!(f, "cannot move booking from {from} to {to}")
            }
            EngineError::AlreadyLinked(id) => {
                write!(f, "booking {id} already has an accounting entry")
            }
            EngineError::CrossHotelMove { booking, room } => {
                write!(f, "booking {booking} cannot move to room {room} of another hotel")
            }
            EngineError::InvalidAmount => write!(f, "amount must be zero or positive"),
            EngineError::InvalidRates(msg) => write!(f, "invalid rate configuration: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::StorageFailure(e) => write!(f, "storage failure: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;
use crate::observability::OVERLAP_REJECTIONS_TOTAL;

use super::EngineError;

/// Build a stay span, rejecting empty/inverted ranges and dates outside the supported window.
pub(crate) fn checked_span(start: NaiveDate, end: NaiveDate) -> Result<Span, EngineError> {
    use crate::limits::*;
    if end <= start {
        return Err(EngineError::InvalidRange { start, end });
    }
    if start < MIN_VALID_DATE || end > MAX_VALID_DATE {
        return Err(EngineError::LimitExceeded("date out of range"));
    }
    Ok(Span::new(start, end))
}

/// `checked_span` plus the maximum stay length.
pub(crate) fn checked_stay(start: NaiveDate, end: NaiveDate) -> Result<Span, EngineError> {
    let span = checked_span(start, end)?;
    if span.nights() > crate::limits::MAX_STAY_NIGHTS {
        return Err(EngineError::LimitExceeded("stay too long"));
    }
    Ok(span)
}

/// Fails with `DoubleBooking` if an active booking other than `exclude` overlaps `span`.
pub(crate) fn check_no_double_booking(
    rs: &RoomState,
    span: &Span,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    match rs
        .active_bookings_overlapping(span)
        .find(|b| Some(b.id) != exclude)
    {
        Some(existing) => {
            metrics::counter!(OVERLAP_REJECTIONS_TOTAL, "kind" => "booking").increment(1);
            Err(EngineError::DoubleBooking(existing.id))
        }
        None => Ok(()),
    }
}

/// Fails with `BlockConflict` if any block on the room overlaps `span`.
/// Bookings are not consulted: blocks are their own overlap domain.
pub(crate) fn check_no_block_conflict(rs: &RoomState, span: &Span) -> Result<(), EngineError> {
    match rs.blocks_overlapping(span).next() {
        Some(existing) => {
            metrics::counter!(OVERLAP_REJECTIONS_TOTAL, "kind" => "block").increment(1);
            Err(EngineError::BlockConflict(existing.id))
        }
        None => Ok(()),
    }
}

pub(crate) fn check_capacity(rs: &RoomState) -> Result<(), EngineError> {
    if rs.bookings.len() + rs.blocks.len() >= crate::limits::MAX_INTERVALS_PER_ROOM {
        return Err(EngineError::LimitExceeded("too many intervals on room"));
    }
    Ok(())
}

pub(crate) fn check_text(value: &str, max: usize, what: &'static str) -> Result<(), EngineError> {
    if value.len() > max {
        return Err(EngineError::LimitExceeded(what));
    }
    Ok(())
}

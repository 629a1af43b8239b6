use chrono::NaiveDate;

use crate::model::Span;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_REASON_LEN: usize = 512;
pub const MAX_DESCRIPTION_LEN: usize = 1024;

/// Longest bookable stay, in nights.
pub const MAX_STAY_NIGHTS: i64 = 366;

/// Widest window accepted by availability queries, in days.
pub const MAX_QUERY_WINDOW_DAYS: i64 = 3 * 366;

/// Rooms per hotel.
pub const MAX_ROOMS_PER_HOTEL: usize = 10_000;

/// Bookings + blocks held on one room.
pub const MAX_INTERVALS_PER_ROOM: usize = 100_000;

pub const DEFAULT_BLOCK_REASON: &str = "Blocked";
pub const FULL_BLOCK_REASON: &str = "All Dates";

/// Inclusive bounds of the supported date window. The full-block sentinel spans exactly this.
pub const MIN_VALID_DATE: NaiveDate = match NaiveDate::from_ymd_opt(1970, 1, 1) {
    Some(d) => d,
    None => panic!("invalid MIN_VALID_DATE"),
};
pub const MAX_VALID_DATE: NaiveDate = match NaiveDate::from_ymd_opt(2100, 12, 31) {
    Some(d) => d,
    None => panic!("invalid MAX_VALID_DATE"),
};

/// The sentinel interval marking a room as entirely unavailable.
pub fn full_block_span() -> Span {
    Span::new(MIN_VALID_DATE, MAX_VALID_DATE)
}

use rust_decimal::Decimal;

use crate::engine::EngineError;
use crate::model::{Hotel, Room, Span};

/// `basePrice * multiplier(check-in month) + room override`.
///
/// Only the check-in month's multiplier applies, even when the stay crosses
/// into a month with a different multiplier.
pub fn nightly_rate(hotel: &Hotel, room: &Room, span: &Span) -> Decimal {
    hotel.base_price * hotel.multiplier_for(span.check_in_month()) + room.price_override
}

/// Total price of a stay. Pure: same inputs, same amount.
pub fn price(hotel: &Hotel, room: &Room, span: &Span) -> Result<Decimal, EngineError> {
    let nights = span.nights();
    if nights <= 0 {
        return Err(EngineError::InvalidRange {
            start: span.start,
            end: span.end,
        });
    }
    Ok(nightly_rate(hotel, room, span) * Decimal::from(nights))
}

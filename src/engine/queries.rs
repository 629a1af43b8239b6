use chrono::NaiveDate;
use rust_decimal::Decimal;
use ulid::Ulid;

use crate::limits::MAX_QUERY_WINDOW_DAYS;
use crate::model::*;
use crate::pricing;

use super::availability::free_spans;
use super::conflict::{checked_span, checked_stay};
use super::{Engine, EngineError, EntityKind};

/// Per-hotel counts reported by the maintenance binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HotelSummary {
    pub hotel_id: Ulid,
    pub name: String,
    pub rooms: usize,
    pub active_bookings: usize,
    pub blocks: usize,
    pub ledger: LedgerSummary,
}

fn checked_window(start: NaiveDate, end: NaiveDate) -> Result<Span, EngineError> {
    let query = checked_span(start, end)?;
    if query.nights() > MAX_QUERY_WINDOW_DAYS {
        return Err(EngineError::LimitExceeded("query window too wide"));
    }
    Ok(query)
}

impl Engine {
    pub async fn get_hotel(&self, hotel_id: Ulid) -> Result<Hotel, EngineError> {
        self.hotel_snapshot(hotel_id).await
    }

    pub async fn get_room(&self, room_id: Ulid) -> Result<Room, EngineError> {
        self.room_snapshot(room_id).await
    }

    pub fn get_guest(&self, guest_id: Ulid) -> Result<Guest, EngineError> {
        self.store
            .guest(&guest_id)
            .ok_or(EngineError::NotFound(EntityKind::Guest, guest_id))
    }

    pub async fn get_booking(&self, booking_id: Ulid) -> Result<Booking, EngineError> {
        let room_id = self
            .store
            .room_for_booking(&booking_id)
            .ok_or(EngineError::NotFound(EntityKind::Booking, booking_id))?;
        let rs = self
            .store
            .room(&room_id)
            .ok_or(EngineError::NotFound(EntityKind::Room, room_id))?;
        let guard = rs.read().await;
        guard
            .booking(booking_id)
            .cloned()
            .ok_or(EngineError::NotFound(EntityKind::Booking, booking_id))
    }

    /// Room ids of one hotel, or of every hotel.
    async fn scope_rooms(&self, hotel_id: Option<Ulid>) -> Result<Vec<Ulid>, EngineError> {
        let hotel_ids = match hotel_id {
            Some(id) => vec![id],
            None => self.store.hotel_ids(),
        };
        let mut rooms = Vec::new();
        for id in hotel_ids {
            let hs = self
                .store
                .hotel(&id)
                .ok_or(EngineError::NotFound(EntityKind::Hotel, id))?;
            rooms.extend(hs.read().await.rooms.iter().copied());
        }
        Ok(rooms)
    }

    /// Every booking on the given rooms, cancelled ones included.
    pub(super) async fn bookings_in_rooms(&self, room_ids: &[Ulid]) -> Vec<Booking> {
        let mut bookings = Vec::new();
        for room_id in room_ids {
            if let Some(rs) = self.store.room(room_id) {
                bookings.extend(rs.read().await.bookings.iter().cloned());
            }
        }
        bookings
    }

    /// All bookings, cancelled included, ordered by check-in.
    pub async fn list_bookings(&self, hotel_id: Option<Ulid>) -> Result<Vec<Booking>, EngineError> {
        let rooms = self.scope_rooms(hotel_id).await?;
        let mut bookings = self.bookings_in_rooms(&rooms).await;
        bookings.sort_by_key(|b| (b.span.start, b.id));
        Ok(bookings)
    }

    /// Non-cancelled bookings shaped for the scheduling calendar.
    pub async fn calendar_events(
        &self,
        hotel_id: Option<Ulid>,
    ) -> Result<Vec<CalendarEvent>, EngineError> {
        Ok(self
            .list_bookings(hotel_id)
            .await?
            .iter()
            .filter(|b| b.status.is_active())
            .map(|b| CalendarEvent::from_booking(b, &self.store.guest_name(&b.guest_id)))
            .collect())
    }

    pub async fn list_blocks(&self, hotel_id: Option<Ulid>) -> Result<Vec<RoomBlock>, EngineError> {
        let rooms = self.scope_rooms(hotel_id).await?;
        let mut blocks = Vec::new();
        for room_id in &rooms {
            if let Some(rs) = self.store.room(room_id) {
                blocks.extend(rs.read().await.blocks.iter().cloned());
            }
        }
        blocks.sort_by_key(|b| (b.span.start, b.id));
        Ok(blocks)
    }

    /// Sub-ranges of `[start, end)` on a room not covered by an active booking or a block.
    pub async fn free_spans(
        &self,
        room_id: Ulid,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Span>, EngineError> {
        let query = checked_window(start, end)?;
        let rs = self
            .store
            .room(&room_id)
            .ok_or(EngineError::NotFound(EntityKind::Room, room_id))?;
        let guard = rs.read().await;
        Ok(free_spans(&guard, &query))
    }

    /// Visible rooms of a hotel that are free for the whole stay, by position.
    pub async fn available_rooms(
        &self,
        hotel_id: Ulid,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Room>, EngineError> {
        let query = checked_window(start, end)?;
        let mut rooms = Vec::new();
        for room_id in self.scope_rooms(Some(hotel_id)).await? {
            let Some(rs) = self.store.room(&room_id) else {
                continue;
            };
            let guard = rs.read().await;
            if guard.room.visible
                && guard.active_bookings_overlapping(&query).next().is_none()
                && guard.blocks_overlapping(&query).next().is_none()
            {
                rooms.push(guard.room.clone());
            }
        }
        rooms.sort_by(|a, b| a.position.cmp(&b.position).then_with(|| a.number.cmp(&b.number)));
        Ok(rooms)
    }

    /// What a stay would cost at current rates. Nothing is reserved.
    pub async fn quote(
        &self,
        room_id: Ulid,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Decimal, EngineError> {
        let span = checked_stay(start, end)?;
        let room = self.room_snapshot(room_id).await?;
        let hotel = self.hotel_snapshot(room.hotel_id).await?;
        pricing::price(&hotel, &room, &span)
    }

    pub async fn hotel_summaries(&self) -> Result<Vec<HotelSummary>, EngineError> {
        let mut summaries = Vec::new();
        for hotel_id in self.store.hotel_ids() {
            let hotel = self.hotel_snapshot(hotel_id).await?;
            let rooms = self.scope_rooms(Some(hotel_id)).await?;
            let mut active_bookings = 0;
            let mut blocks = 0;
            for room_id in &rooms {
                if let Some(rs) = self.store.room(room_id) {
                    let guard = rs.read().await;
                    active_bookings += guard.bookings.iter().filter(|b| b.status.is_active()).count();
                    blocks += guard.blocks.len();
                }
            }
            summaries.push(HotelSummary {
                hotel_id,
                name: hotel.name,
                rooms: rooms.len(),
                active_bookings,
                blocks,
                ledger: self.ledger_summary(hotel_id, None, None).await?,
            });
        }
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(summaries)
    }
}

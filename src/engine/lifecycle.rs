use chrono::NaiveDate;
use rust_decimal::Decimal;
use tracing::info;
use ulid::Ulid;

use crate::model::*;
use crate::pricing;

use super::conflict::{check_capacity, check_no_double_booking, checked_stay};
use super::store::Held;
use super::{Engine, EngineError, EntityKind, observe};

/// How an update treats the stored total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceChange {
    /// Store this amount as the new total.
    Set(Decimal),
    /// Price the resulting stay from current rates.
    Recompute,
}

/// Partial booking update. Absent fields keep their current value; the total
/// is only touched when `price` says so, even if the dates change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookingUpdate {
    pub room_id: Option<Ulid>,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub status: Option<BookingStatus>,
    pub price: Option<PriceChange>,
}

impl BookingUpdate {
    fn touches_schedule(&self) -> bool {
        self.room_id.is_some() || self.start.is_some() || self.end.is_some()
    }
}

impl Engine {
    /// Reserve a room for a guest. The overlap check and the insert happen
    /// under the room's write lock, so of two racing overlapping requests at
    /// most one succeeds.
    pub async fn create_booking(
        &self,
        room_id: Ulid,
        guest_id: Ulid,
        start: NaiveDate,
        end: NaiveDate,
        initial_status: BookingStatus,
    ) -> Result<Booking, EngineError> {
        observe(
            "create_booking",
            self.create_booking_inner(room_id, guest_id, start, end, initial_status)
                .await,
        )
    }

    async fn create_booking_inner(
        &self,
        room_id: Ulid,
        guest_id: Ulid,
        start: NaiveDate,
        end: NaiveDate,
        initial_status: BookingStatus,
    ) -> Result<Booking, EngineError> {
        let span = checked_stay(start, end)?;
        if !matches!(initial_status, BookingStatus::Tentative | BookingStatus::Booked) {
            return Err(EngineError::InvalidTransition {
                from: BookingStatus::Tentative,
                to: initial_status,
            });
        }
        if self.store.guest(&guest_id).is_none() {
            return Err(EngineError::NotFound(EntityKind::Guest, guest_id));
        }
        let room = self.room_snapshot(room_id).await?;
        let hotel = self.hotel_snapshot(room.hotel_id).await?;
        let total_price = pricing::price(&hotel, &room, &span)?;

        let gate = self.enter().await?;
        let guard = self.lock_room(room_id).await?;
        check_capacity(&guard)?;
        check_no_double_booking(&guard, &span, None)?;

        let booking = Booking {
            id: Ulid::new(),
            room_id,
            guest_id,
            span,
            total_price,
            status: initial_status,
        };
        let event = Event::BookingCreated {
            booking: booking.clone(),
        };
        self.commit(gate, Some(room.hotel_id), event, Held::Rooms(vec![guard]))
            .await?;
        info!(
            "booking {} created: room {} [{}, {}) {} total {}",
            booking.id, room_id, span.start, span.end, booking.status, booking.total_price
        );
        Ok(booking)
    }

    /// Move a booking along the status graph. Dates and price are untouched.
    pub async fn transition(
        &self,
        booking_id: Ulid,
        new_status: BookingStatus,
    ) -> Result<Booking, EngineError> {
        observe("transition", self.transition_inner(booking_id, new_status).await)
    }

    async fn transition_inner(
        &self,
        booking_id: Ulid,
        new_status: BookingStatus,
    ) -> Result<Booking, EngineError> {
        let room_id = self
            .store
            .room_for_booking(&booking_id)
            .ok_or(EngineError::NotFound(EntityKind::Booking, booking_id))?;
        let gate = self.enter().await?;
        let guard = self.lock_room(room_id).await?;
        let current = guard
            .booking(booking_id)
            .cloned()
            .ok_or(EngineError::NotFound(EntityKind::Booking, booking_id))?;
        if !current.status.can_transition_to(new_status) {
            return Err(EngineError::InvalidTransition {
                from: current.status,
                to: new_status,
            });
        }

        let hotel_id = guard.room.hotel_id;
        let event = Event::BookingStatusChanged {
            id: booking_id,
            room_id,
            status: new_status,
        };
        self.commit(gate, Some(hotel_id), event, Held::Rooms(vec![guard]))
            .await?;
        info!("booking {booking_id}: {} -> {new_status}", current.status);
        Ok(Booking {
            status: new_status,
            ..current
        })
    }

    /// Release the room. Allowed from any non-terminal status.
    pub async fn cancel_booking(&self, booking_id: Ulid) -> Result<Booking, EngineError> {
        self.transition(booking_id, BookingStatus::Cancelled).await
    }

    /// Change the dates (and optionally the status) of a booking, keeping its price.
    pub async fn reschedule(
        &self,
        booking_id: Ulid,
        start: NaiveDate,
        end: NaiveDate,
        status: Option<BookingStatus>,
    ) -> Result<Booking, EngineError> {
        self.update_booking(
            booking_id,
            BookingUpdate {
                start: Some(start),
                end: Some(end),
                status,
                ..Default::default()
            },
        )
        .await
    }

    /// Apply a partial update. A schedule change re-runs the overlap check on
    /// the target room with the booking's own interval excluded. The target
    /// room must belong to the booking's hotel.
    pub async fn update_booking(
        &self,
        booking_id: Ulid,
        update: BookingUpdate,
    ) -> Result<Booking, EngineError> {
        observe("update_booking", self.update_booking_inner(booking_id, update).await)
    }

    async fn update_booking_inner(
        &self,
        booking_id: Ulid,
        update: BookingUpdate,
    ) -> Result<Booking, EngineError> {
        if let Some(PriceChange::Set(amount)) = update.price
            && amount < Decimal::ZERO
        {
            return Err(EngineError::InvalidAmount);
        }
        let current_room = self
            .store
            .room_for_booking(&booking_id)
            .ok_or(EngineError::NotFound(EntityKind::Booking, booking_id))?;
        let target_room = update.room_id.unwrap_or(current_room);
        if !self.store.contains_room(&target_room) {
            return Err(EngineError::NotFound(EntityKind::Room, target_room));
        }

        // Rates are read before any room lock is taken; locks are never nested across kinds.
        let pricing_inputs = match update.price {
            Some(PriceChange::Recompute) => {
                let room = self.room_snapshot(target_room).await?;
                let hotel = self.hotel_snapshot(room.hotel_id).await?;
                Some((hotel, room))
            }
            _ => None,
        };

        let gate = self.enter().await?;
        let guards = self.lock_rooms(vec![current_room, target_room]).await?;
        let source = guards
            .iter()
            .position(|g| g.room.id == current_room)
            .ok_or(EngineError::NotFound(EntityKind::Room, current_room))?;
        let current = guards[source]
            .booking(booking_id)
            .cloned()
            .ok_or(EngineError::NotFound(EntityKind::Booking, booking_id))?;

        let status = match update.status {
            Some(s) if s != current.status => {
                if !current.status.can_transition_to(s) {
                    return Err(EngineError::InvalidTransition {
                        from: current.status,
                        to: s,
                    });
                }
                s
            }
            _ => current.status,
        };
        if update.touches_schedule() && current.status.is_terminal() {
            return Err(EngineError::InvalidTransition {
                from: current.status,
                to: status,
            });
        }

        let span = checked_stay(
            update.start.unwrap_or(current.span.start),
            update.end.unwrap_or(current.span.end),
        )?;
        let target = guards
            .iter()
            .position(|g| g.room.id == target_room)
            .ok_or(EngineError::NotFound(EntityKind::Room, target_room))?;
        let hotel_id = guards[source].room.hotel_id;
        if guards[target].room.hotel_id != hotel_id {
            return Err(EngineError::CrossHotelMove {
                booking: booking_id,
                room: target_room,
            });
        }
        if target != source {
            check_capacity(&guards[target])?;
        }
        if status.is_active() && (span != current.span || target_room != current_room) {
            check_no_double_booking(&guards[target], &span, Some(booking_id))?;
        }

        let total_price = match update.price {
            Some(PriceChange::Set(amount)) => amount,
            Some(PriceChange::Recompute) => match &pricing_inputs {
                Some((hotel, room)) => pricing::price(hotel, room, &span)?,
                None => current.total_price,
            },
            None => current.total_price,
        };

        let updated = Booking {
            id: booking_id,
            room_id: target_room,
            guest_id: current.guest_id,
            span,
            total_price,
            status,
        };
        if updated == current {
            return Ok(current);
        }

        let event = Event::BookingUpdated {
            booking: updated.clone(),
            previous_room_id: current_room,
        };
        self.commit(gate, Some(hotel_id), event, Held::Rooms(guards))
            .await?;
        info!(
            "booking {booking_id} updated: room {target_room} [{}, {}) {} total {}",
            span.start, span.end, status, total_price
        );
        Ok(updated)
    }
}

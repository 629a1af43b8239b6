use std::collections::HashSet;

use rust_decimal::Decimal;
use tokio::sync::oneshot;
use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::conflict::check_text;
use super::store::Held;
use super::{Engine, EngineError, WalCommand, observe};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewHotel {
    pub name: String,
    pub base_price: Decimal,
    pub seasonal_multipliers: Vec<SeasonalMultiplier>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRoom {
    pub hotel_id: Ulid,
    pub number: String,
    pub room_type: String,
    pub price_override: Decimal,
    pub visible: bool,
    pub position: u32,
}

/// Validate a rate table and return it sorted by month.
fn checked_rates(
    base_price: Decimal,
    mut seasonal: Vec<SeasonalMultiplier>,
) -> Result<Vec<SeasonalMultiplier>, EngineError> {
    if base_price < Decimal::ZERO {
        return Err(EngineError::InvalidRates("base price is negative"));
    }
    let mut months = HashSet::new();
    for m in &seasonal {
        if !(1..=12).contains(&m.month) {
            return Err(EngineError::InvalidRates("month must be 1..=12"));
        }
        if !months.insert(m.month) {
            return Err(EngineError::InvalidRates("duplicate month"));
        }
        if m.multiplier < Decimal::ZERO {
            return Err(EngineError::InvalidRates("multiplier is negative"));
        }
    }
    seasonal.sort_by_key(|m| m.month);
    Ok(seasonal)
}

impl Engine {
    pub async fn register_hotel(&self, id: Ulid, new: NewHotel) -> Result<Hotel, EngineError> {
        observe("register_hotel", self.register_hotel_inner(id, new).await)
    }

    async fn register_hotel_inner(&self, id: Ulid, new: NewHotel) -> Result<Hotel, EngineError> {
        check_text(&new.name, MAX_NAME_LEN, "hotel name too long")?;
        let seasonal_multipliers = checked_rates(new.base_price, new.seasonal_multipliers)?;
        let gate = self.enter().await?;
        if self.store.contains_hotel(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let hotel = Hotel {
            id,
            name: new.name,
            base_price: new.base_price,
            seasonal_multipliers,
        };
        let event = Event::HotelRegistered {
            hotel: hotel.clone(),
        };
        self.commit(gate, Some(id), event, Held::Nothing).await?;
        info!("hotel {id} registered: {}", hotel.name);
        Ok(hotel)
    }

    /// Replace a hotel's rates. Existing bookings keep their stored totals.
    pub async fn update_hotel_rates(
        &self,
        hotel_id: Ulid,
        base_price: Decimal,
        seasonal_multipliers: Vec<SeasonalMultiplier>,
    ) -> Result<Hotel, EngineError> {
        observe(
            "update_hotel_rates",
            self.update_hotel_rates_inner(hotel_id, base_price, seasonal_multipliers)
                .await,
        )
    }

    async fn update_hotel_rates_inner(
        &self,
        hotel_id: Ulid,
        base_price: Decimal,
        seasonal_multipliers: Vec<SeasonalMultiplier>,
    ) -> Result<Hotel, EngineError> {
        let seasonal_multipliers = checked_rates(base_price, seasonal_multipliers)?;
        let gate = self.enter().await?;
        let guard = self.lock_hotel(hotel_id).await?;
        let hotel = Hotel {
            base_price,
            seasonal_multipliers: seasonal_multipliers.clone(),
            ..guard.hotel.clone()
        };
        let event = Event::HotelRatesUpdated {
            id: hotel_id,
            base_price,
            seasonal_multipliers,
        };
        self.commit(gate, Some(hotel_id), event, Held::Hotel(guard))
            .await?;
        info!("hotel {hotel_id} rates updated: base {base_price}");
        Ok(hotel)
    }

    pub async fn register_room(&self, id: Ulid, new: NewRoom) -> Result<Room, EngineError> {
        observe("register_room", self.register_room_inner(id, new).await)
    }

    async fn register_room_inner(&self, id: Ulid, new: NewRoom) -> Result<Room, EngineError> {
        check_text(&new.number, MAX_NAME_LEN, "room number too long")?;
        check_text(&new.room_type, MAX_NAME_LEN, "room type too long")?;
        let gate = self.enter().await?;
        let guard = self.lock_hotel(new.hotel_id).await?;
        if self.store.contains_room(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        if guard.rooms.len() >= MAX_ROOMS_PER_HOTEL {
            return Err(EngineError::LimitExceeded("too many rooms"));
        }

        let room = Room {
            id,
            hotel_id: new.hotel_id,
            number: new.number,
            room_type: new.room_type,
            price_override: new.price_override,
            visible: new.visible,
            position: new.position,
        };
        let event = Event::RoomRegistered { room: room.clone() };
        self.commit(gate, Some(room.hotel_id), event, Held::Hotel(guard))
            .await?;
        info!("room {id} ({}) registered in hotel {}", room.number, room.hotel_id);
        Ok(room)
    }

    pub async fn register_guest(&self, id: Ulid, name: String) -> Result<Guest, EngineError> {
        observe("register_guest", self.register_guest_inner(id, name).await)
    }

    async fn register_guest_inner(&self, id: Ulid, name: String) -> Result<Guest, EngineError> {
        check_text(&name, MAX_NAME_LEN, "guest name too long")?;
        let gate = self.enter().await?;
        if self.store.guest(&id).is_some() {
            return Err(EngineError::AlreadyExists(id));
        }
        let guest = Guest { id, name };
        let event = Event::GuestRegistered {
            guest: guest.clone(),
        };
        self.commit(gate, None, event, Held::Nothing).await?;
        info!("guest {id} registered");
        Ok(guest)
    }

    /// Rewrite the WAL as the smallest event sequence reproducing current state:
    /// hotels, guests, rooms, their bookings and blocks, then persisted entries.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        // Exclusive: no mutation can be queued between the snapshot and the rewrite.
        let _exclusive = self.gate.write().await;

        let mut hotels = Vec::new();
        for hotel_id in self.store.hotel_ids() {
            let Some(hs) = self.store.hotel(&hotel_id) else {
                continue;
            };
            let guard = hs.read().await;
            hotels.push((guard.hotel.clone(), guard.rooms.clone(), guard.entries.clone()));
        }

        let mut events = Vec::new();
        for (hotel, _, _) in &hotels {
            events.push(Event::HotelRegistered {
                hotel: hotel.clone(),
            });
        }
        for guest_id in self.store.guest_ids() {
            if let Some(guest) = self.store.guest(&guest_id) {
                events.push(Event::GuestRegistered { guest });
            }
        }
        for (_, rooms, _) in &hotels {
            for room_id in rooms {
                let Some(rs) = self.store.room(room_id) else {
                    continue;
                };
                let guard = rs.read().await;
                events.push(Event::RoomRegistered {
                    room: guard.room.clone(),
                });
                for booking in &guard.bookings {
                    events.push(Event::BookingCreated {
                        booking: booking.clone(),
                    });
                }
                for block in &guard.blocks {
                    events.push(Event::BlockCreated {
                        block: block.clone(),
                    });
                }
            }
        }
        for (_, _, entries) in hotels {
            for entry in entries {
                events.push(Event::EntryRecorded { entry });
            }
        }

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::StorageFailure("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::StorageFailure("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::StorageFailure(e.to_string()))?;
        metrics::counter!(observability::WAL_COMPACTIONS_TOTAL).increment(1);
        info!("WAL compacted to {count} events");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

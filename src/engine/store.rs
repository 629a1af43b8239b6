use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::model::*;

pub type SharedRoomState = Arc<RwLock<RoomState>>;
pub type SharedHotelState = Arc<RwLock<HotelState>>;

/// Write locks a commit holds until its event is applied.
pub enum Held {
    Nothing,
    Rooms(Vec<OwnedRwLockWriteGuard<RoomState>>),
    Hotel(OwnedRwLockWriteGuard<HotelState>),
}

/// Projections rebuilt from the event log, plus reverse indexes.
pub struct InMemoryStore {
    hotels: DashMap<Ulid, SharedHotelState>,
    rooms: DashMap<Ulid, SharedRoomState>,
    guests: DashMap<Ulid, Guest>,
    booking_room: DashMap<Ulid, Ulid>,
    block_room: DashMap<Ulid, Ulid>,
    entry_hotel: DashMap<Ulid, Ulid>,
    /// Bumped on every committed change to a hotel; a cached ledger is valid
    /// only for the generation it was computed at.
    generations: DashMap<Ulid, Arc<AtomicU64>>,
    ledger_cache: DashMap<Ulid, (u64, Arc<Vec<LedgerEntry>>)>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            hotels: DashMap::new(),
            rooms: DashMap::new(),
            guests: DashMap::new(),
            booking_room: DashMap::new(),
            block_room: DashMap::new(),
            entry_hotel: DashMap::new(),
            generations: DashMap::new(),
            ledger_cache: DashMap::new(),
        }
    }

    // ── Lookups ──────────────────────────────────────────────

    pub fn hotel(&self, id: &Ulid) -> Option<SharedHotelState> {
        self.hotels.get(id).map(|e| e.value().clone())
    }

    pub fn hotel_ids(&self) -> Vec<Ulid> {
        self.hotels.iter().map(|e| *e.key()).collect()
    }

    pub fn contains_hotel(&self, id: &Ulid) -> bool {
        self.hotels.contains_key(id)
    }

    pub fn room(&self, id: &Ulid) -> Option<SharedRoomState> {
        self.rooms.get(id).map(|e| e.value().clone())
    }

    pub fn contains_room(&self, id: &Ulid) -> bool {
        self.rooms.contains_key(id)
    }

    pub fn guest(&self, id: &Ulid) -> Option<Guest> {
        self.guests.get(id).map(|e| e.value().clone())
    }

    pub fn guest_ids(&self) -> Vec<Ulid> {
        self.guests.iter().map(|e| *e.key()).collect()
    }

    pub fn guest_name(&self, id: &Ulid) -> String {
        self.guests
            .get(id)
            .map(|g| g.name.clone())
            .unwrap_or_default()
    }

    pub fn room_for_booking(&self, booking_id: &Ulid) -> Option<Ulid> {
        self.booking_room.get(booking_id).map(|e| *e.value())
    }

    pub fn room_for_block(&self, block_id: &Ulid) -> Option<Ulid> {
        self.block_room.get(block_id).map(|e| *e.value())
    }

    pub fn hotel_for_entry(&self, entry_id: &Ulid) -> Option<Ulid> {
        self.entry_hotel.get(entry_id).map(|e| *e.value())
    }

    // ── Ledger cache ─────────────────────────────────────────

    pub fn generation(&self, hotel_id: &Ulid) -> u64 {
        self.generations
            .get(hotel_id)
            .map_or(0, |g| g.load(Ordering::Acquire))
    }

    pub fn bump_generation(&self, hotel_id: Ulid) {
        self.generations
            .entry(hotel_id)
            .or_default()
            .fetch_add(1, Ordering::AcqRel);
    }

    pub fn cached_ledger(&self, hotel_id: &Ulid) -> Option<Arc<Vec<LedgerEntry>>> {
        let current = self.generation(hotel_id);
        self.ledger_cache
            .get(hotel_id)
            .filter(|e| e.value().0 == current)
            .map(|e| e.value().1.clone())
    }

    /// Cache a merged ledger computed at `generation`. Stale results are dropped.
    pub fn cache_ledger(&self, hotel_id: Ulid, generation: u64, entries: Arc<Vec<LedgerEntry>>) {
        if self.generation(&hotel_id) == generation {
            self.ledger_cache.insert(hotel_id, (generation, entries));
        }
    }

    // ── Event application ────────────────────────────────────

    /// Map-level effects: new hotels, rooms and guests. Other events are ignored here.
    pub fn register(&self, event: &Event) {
        match event {
            Event::HotelRegistered { hotel } => {
                self.hotels
                    .insert(hotel.id, Arc::new(RwLock::new(HotelState::new(hotel.clone()))));
            }
            Event::RoomRegistered { room } => {
                self.rooms
                    .insert(room.id, Arc::new(RwLock::new(RoomState::new(room.clone()))));
            }
            Event::GuestRegistered { guest } => {
                self.guests.insert(guest.id, guest.clone());
            }
            _ => {}
        }
    }

    /// Apply an event to a room the caller has locked.
    pub fn apply_to_room(&self, rs: &mut RoomState, event: &Event) {
        match event {
            Event::BookingCreated { booking } => {
                rs.insert_booking(booking.clone());
                self.booking_room.insert(booking.id, booking.room_id);
            }
            Event::BookingUpdated {
                booking,
                previous_room_id,
            } => {
                if rs.room.id == *previous_room_id {
                    rs.remove_booking(booking.id);
                }
                if rs.room.id == booking.room_id {
                    rs.insert_booking(booking.clone());
                    self.booking_room.insert(booking.id, booking.room_id);
                }
            }
            Event::BookingStatusChanged { id, status, .. } => {
                if let Some(b) = rs.booking_mut(*id) {
                    b.status = *status;
                }
            }
            Event::BlockCreated { block } => {
                rs.insert_block(block.clone());
                self.block_room.insert(block.id, block.room_id);
            }
            Event::BlockRemoved { id, .. } => {
                rs.remove_block(*id);
                self.block_room.remove(id);
            }
            _ => {}
        }
    }

    /// Apply an event to a hotel the caller has locked.
    pub fn apply_to_hotel(&self, hs: &mut HotelState, event: &Event) {
        match event {
            Event::HotelRatesUpdated {
                base_price,
                seasonal_multipliers,
                ..
            } => {
                hs.hotel.base_price = *base_price;
                hs.hotel.seasonal_multipliers = seasonal_multipliers.clone();
            }
            Event::RoomRegistered { room } => {
                hs.rooms.push(room.id);
            }
            Event::EntryRecorded { entry } | Event::EntryUpdated { entry } => {
                self.entry_hotel.insert(entry.id, entry.hotel_id);
                hs.upsert_entry(entry.clone());
            }
            Event::EntryDeleted { id, .. } => {
                hs.remove_entry(*id);
                self.entry_hotel.remove(id);
            }
            _ => {}
        }
    }

    /// Apply a committed event with the locks its commit acquired.
    pub fn apply_held(&self, event: &Event, held: &mut Held) {
        self.register(event);
        match held {
            Held::Nothing => {}
            Held::Rooms(guards) => {
                for guard in guards.iter_mut() {
                    self.apply_to_room(guard, event);
                }
            }
            Held::Hotel(guard) => self.apply_to_hotel(guard, event),
        }
    }

    /// Apply an event during replay, when nothing else can hold a lock.
    /// Returns false if the event references an entity that does not exist.
    pub fn apply_replayed(&self, event: &Event) -> bool {
        self.register(event);
        if let Some(hotel_id) = hotel_scope(event) {
            let Some(hs) = self.hotel(&hotel_id) else {
                return false;
            };
            let Ok(mut guard) = hs.try_write() else {
                return false;
            };
            self.apply_to_hotel(&mut guard, event);
        }
        for room_id in room_scope(event) {
            let Some(rs) = self.room(&room_id) else {
                return false;
            };
            let Ok(mut guard) = rs.try_write() else {
                return false;
            };
            self.apply_to_room(&mut guard, event);
        }
        true
    }
}

/// The hotel whose persisted state an event changes, if any.
pub(super) fn hotel_scope(event: &Event) -> Option<Ulid> {
    match event {
        Event::HotelRatesUpdated { id, .. } => Some(*id),
        Event::RoomRegistered { room } => Some(room.hotel_id),
        Event::EntryRecorded { entry } | Event::EntryUpdated { entry } => Some(entry.hotel_id),
        Event::EntryDeleted { hotel_id, .. } => Some(*hotel_id),
        _ => None,
    }
}

/// The rooms whose schedule an event changes.
pub(super) fn room_scope(event: &Event) -> Vec<Ulid> {
    match event {
        Event::BookingCreated { booking } => vec![booking.room_id],
        Event::BookingUpdated {
            booking,
            previous_room_id,
        } if booking.room_id != *previous_room_id => vec![*previous_room_id, booking.room_id],
        Event::BookingUpdated { booking, .. } => vec![booking.room_id],
        Event::BookingStatusChanged { room_id, .. } | Event::BlockRemoved { room_id, .. } => {
            vec![*room_id]
        }
        Event::BlockCreated { block } => vec![block.room_id],
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 9, day).unwrap()
    }

    fn seed(store: &InMemoryStore) -> (Ulid, Ulid, Ulid) {
        let hotel = Hotel {
            id: Ulid::new(),
            name: "Lakeside".into(),
            base_price: dec!(90),
            seasonal_multipliers: vec![],
        };
        let room = Room {
            id: Ulid::new(),
            hotel_id: hotel.id,
            number: "3".into(),
            room_type: "double".into(),
            price_override: dec!(0),
            visible: true,
            position: 1,
        };
        let guest = Guest { id: Ulid::new(), name: "Mae".into() };
        let ids = (hotel.id, room.id, guest.id);
        assert!(store.apply_replayed(&Event::HotelRegistered { hotel }));
        assert!(store.apply_replayed(&Event::RoomRegistered { room }));
        assert!(store.apply_replayed(&Event::GuestRegistered { guest }));
        ids
    }

    #[test]
    fn replay_builds_projections_and_indexes() {
        let store = InMemoryStore::new();
        let (hotel_id, room_id, guest_id) = seed(&store);

        let booking = Booking {
            id: Ulid::new(),
            room_id,
            guest_id,
            span: Span::new(d(1), d(3)),
            total_price: dec!(180),
            status: BookingStatus::Booked,
        };
        assert!(store.apply_replayed(&Event::BookingCreated { booking: booking.clone() }));
        assert!(store.apply_replayed(&Event::BookingStatusChanged {
            id: booking.id,
            room_id,
            status: BookingStatus::CheckedIn,
        }));

        assert_eq!(store.room_for_booking(&booking.id), Some(room_id));
        let rs = store.room(&room_id).unwrap();
        let guard = rs.try_read().unwrap();
        assert_eq!(guard.bookings[0].status, BookingStatus::CheckedIn);

        let hs = store.hotel(&hotel_id).unwrap();
        assert_eq!(hs.try_read().unwrap().rooms, vec![room_id]);
        assert_eq!(store.guest_name(&guest_id), "Mae");
    }

    #[test]
    fn booking_move_between_rooms() {
        let store = InMemoryStore::new();
        let (hotel_id, room_a, guest_id) = seed(&store);
        let room_b = Room {
            id: Ulid::new(),
            hotel_id,
            number: "4".into(),
            room_type: "double".into(),
            price_override: dec!(0),
            visible: true,
            position: 2,
        };
        let room_b_id = room_b.id;
        store.apply_replayed(&Event::RoomRegistered { room: room_b });

        let mut booking = Booking {
            id: Ulid::new(),
            room_id: room_a,
            guest_id,
            span: Span::new(d(5), d(7)),
            total_price: dec!(180),
            status: BookingStatus::Tentative,
        };
        store.apply_replayed(&Event::BookingCreated { booking: booking.clone() });
        booking.room_id = room_b_id;
        store.apply_replayed(&Event::BookingUpdated {
            booking: booking.clone(),
            previous_room_id: room_a,
        });

        assert!(store.room(&room_a).unwrap().try_read().unwrap().bookings.is_empty());
        assert_eq!(store.room(&room_b_id).unwrap().try_read().unwrap().bookings, vec![booking.clone()]);
        assert_eq!(store.room_for_booking(&booking.id), Some(room_b_id));
    }

    #[test]
    fn replay_rejects_orphans() {
        let store = InMemoryStore::new();
        let orphan = Event::BlockRemoved { id: Ulid::new(), room_id: Ulid::new() };
        assert!(!store.apply_replayed(&orphan));
    }

    #[test]
    fn stale_ledger_is_not_cached() {
        let store = InMemoryStore::new();
        let hotel_id = Ulid::new();
        let generation = store.generation(&hotel_id);
        store.bump_generation(hotel_id);
        store.cache_ledger(hotel_id, generation, Arc::new(Vec::new()));
        assert!(store.cached_ledger(&hotel_id).is_none());

        let generation = store.generation(&hotel_id);
        store.cache_ledger(hotel_id, generation, Arc::new(Vec::new()));
        assert!(store.cached_ledger(&hotel_id).is_some());
    }
}

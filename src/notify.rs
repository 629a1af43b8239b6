use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Outbound live-update seam. The engine publishes every committed event for
/// the hotel it belongs to; transports decide what to do with it.
pub trait Broadcast: Send + Sync {
    fn send(&self, hotel_id: Ulid, event: &Event);
}

/// Broadcast hub with one channel per hotel.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to a hotel's events. Creates the channel if needed.
    pub fn subscribe(&self, hotel_id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(hotel_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }
}

impl Broadcast for NotifyHub {
    /// No-op if nobody is listening.
    fn send(&self, hotel_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&hotel_id) {
            let _ = sender.send(event.clone());
        }
    }
}

/// JSON text of an event, for transports that relay notifications as strings.
pub fn payload(event: &Event) -> serde_json::Result<String> {
    serde_json::to_string(event)
}

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;
const CHANNEL_PREFIX: &str = "listing_";

/// Broadcast hub for LISTEN/NOTIFY per listing. A channel lives while at
/// least one [`Subscription`] to it does.
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

    /// Subscribe to changes of one listing. Creates the channel if needed;
    /// the listing does not have to exist yet.
    pub fn subscribe(self: &Arc<Self>, listing_id: Ulid) -> Subscription {
        let rx = self
            .channels
            .entry(listing_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe();
        Subscription {
            hub: Arc::clone(self),
            listing_id,
            rx: Some(rx),
        }
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, listing_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&listing_id) {
            let _ = sender.send(event.clone());
        }
    }

    /// Drop the channel of a deleted listing. Receivers see it closed.
    pub fn remove(&self, listing_id: &Ulid) {
        self.channels.remove(listing_id);
    }

    /// Channels with at least one live subscription.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    fn release(&self, listing_id: &Ulid) {
        self.channels
            .remove_if(listing_id, |_, sender| sender.receiver_count() == 0);
    }
}

/// One listener on one listing's channel.
pub struct Subscription {
    hub: Arc<NotifyHub>,
    listing_id: Ulid,
    /// Always `Some` until drop.
    rx: Option<broadcast::Receiver<Event>>,
}

impl Subscription {
    pub fn listing_id(&self) -> Ulid {
        self.listing_id
    }

    pub async fn recv(&mut self) -> Result<Event, broadcast::error::RecvError> {
        match self.rx.as_mut() {
            Some(rx) => rx.recv().await,
            None => Err(broadcast::error::RecvError::Closed),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        // The receiver has to be gone before the count is checked.
        drop(self.rx.take());
        self.hub.release(&self.listing_id);
    }
}

/// `listing_<ULID>`
pub fn channel_name(listing_id: Ulid) -> String {
    format!("{CHANNEL_PREFIX}{listing_id}")
}

pub fn parse_channel(name: &str) -> Option<Ulid> {
    let raw = name.strip_prefix(CHANNEL_PREFIX)?;
    Ulid::from_string(&raw.to_ascii_uppercase()).ok()
}

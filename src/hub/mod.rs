//! # Hub Module
//!
//! Fan-out of sensor events to every connected display client.
//!
//! The hub is a membership set. Each subscriber owns a small bounded queue
//! that its connection task drains; [`BroadcastHub::publish`] only ever
//! `try_send`s into those queues, so a stalled client can never hold up the
//! serial path or the other clients. A full or closed queue removes its
//! subscriber.
//!
//! A queued message is one accepted at publish time and not yet written to
//! the socket. Nothing is retained for replay: a subscriber only ever sees
//! events published after it subscribed.

pub mod server;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::event::Event;

pub use server::{Connection, ConnectionEvent, HubServer};

/// per-subscriber queue depth
pub const SUBSCRIBER_QUEUE_CAPACITY: usize = 16;

/// notification name used by the JSON envelope
pub const NOTIFICATION_NAME: &str = "RETRIEVED_GESTURE";

/// Opaque identity of one subscriber.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriberHandle(u64);

/// Receiving end of a subscription.
pub type Outbound = mpsc::Receiver<String>;

/// How events are written to the wire.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum WireFormat {
    /// the bare token, e.g. `LEFT`
    #[default]
    Token,
    /// `{"notification":"RETRIEVED_GESTURE","payload":"LEFT"}`
    Notification,
}

/// JSON envelope for [`WireFormat::Notification`].
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Notification {
    pub notification: String,
    pub payload: String,
}

impl WireFormat {
    /// wire text for one event
    pub fn encode(self, event: &Event) -> String {
        let token = event.token();
        match self {
            WireFormat::Token => token.to_string(),
            WireFormat::Notification => {
                let notification = Notification {
                    notification: NOTIFICATION_NAME.to_string(),
                    payload: token.to_string(),
                };
                serde_json::to_string(&notification).unwrap_or_else(|e| {
                    warn!("Cannot encode notification for {token}: {e}");
                    token.to_string()
                })
            }
        }
    }
}

/// Set of live subscribers.
#[derive(Debug)]
pub struct BroadcastHub {
    subscribers: Mutex<HashMap<SubscriberHandle, mpsc::Sender<String>>>,
    next_id: AtomicU64,
    format: WireFormat,
}

impl BroadcastHub {
    pub fn new(format: WireFormat) -> Self {
        BroadcastHub {
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            format,
        }
    }

    /// Registers a subscriber and returns its handle and queue.
    pub fn subscribe(&self) -> (SubscriberHandle, Outbound) {
        let handle = SubscriberHandle(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE_CAPACITY);
        let count = {
            let mut subscribers = self.subscribers.lock();
            subscribers.insert(handle, tx);
            subscribers.len()
        };
        info!("Subscriber {handle:?} added ({count} connected)");
        (handle, rx)
    }

    /// Removes a subscriber. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, handle: SubscriberHandle) -> bool {
        let removed = self.subscribers.lock().remove(&handle).is_some();
        if removed {
            info!("Subscriber {handle:?} removed");
        }
        removed
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Delivers the event to every current subscriber.
    ///
    /// Returns how many subscribers accepted it. Subscribers whose queue is
    /// full or closed are dropped.
    pub fn publish(&self, event: &Event) -> usize {
        let text = self.format.encode(event);
        let targets: Vec<(SubscriberHandle, mpsc::Sender<String>)> = self
            .subscribers
            .lock()
            .iter()
            .map(|(handle, tx)| (*handle, tx.clone()))
            .collect();

        let mut delivered = 0;
        let mut failed = Vec::new();
        for (handle, tx) in targets {
            match tx.try_send(text.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!("Dropping subscriber {handle:?}: {e}");
                    failed.push(handle);
                }
            }
        }

        if !failed.is_empty() {
            let mut subscribers = self.subscribers.lock();
            for handle in &failed {
                subscribers.remove(handle);
            }
        }
        debug!("Published {text} to {delivered} subscribers");
        delivered
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(WireFormat::default())
    }
}

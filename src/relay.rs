//! Per-line dispatch: parse, then publish and feed the power controller.

use std::sync::Arc;

use log::{debug, info};

use crate::event::Event;
use crate::hub::BroadcastHub;
use crate::power::PowerController;

/// Connects the serial line source to its two consumers.
#[derive(Clone)]
pub struct Relay {
    hub: Arc<BroadcastHub>,
    power: PowerController,
}

impl Relay {
    pub fn new(hub: Arc<BroadcastHub>, power: PowerController) -> Self {
        Relay { hub, power }
    }

    pub fn hub(&self) -> &Arc<BroadcastHub> {
        &self.hub
    }

    pub fn power(&self) -> &PowerController {
        &self.power
    }

    /// Handles one raw serial line and returns the event it carried.
    pub fn handle_line(&self, line: &str) -> Option<Event> {
        debug!("Serial line: {line:?}");
        let Some(event) = Event::parse(line) else {
            debug!("Ignoring unrecognized serial line");
            return None;
        };
        let delivered = self.hub.publish(&event);
        info!("Received {event}, sent to {delivered} clients");
        self.power.handle_event(&event);
        Some(event)
    }
}

//! # Event Module
//!
//! Typed sensor events and the line parser that produces them.
//!
//! The sensor speaks a line-oriented text protocol:
//!
//! ```text
//! Person: <PRESENT|AWAY>
//! Gesture: <token>
//! ```
//!
//! Anything else is not an event.

use std::fmt;

/// prefix of presence lines
pub const PRESENCE_PREFIX: &str = "Person: ";
/// prefix of gesture lines
pub const GESTURE_PREFIX: &str = "Gesture: ";

/// Presence state reported by the distance sensor.
///
/// Unknown values are kept verbatim in [`Presence::Other`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Presence {
    /// someone is in front of the display
    Present,
    /// nobody is in front of the display
    Away,
    /// any other payload
    Other(String),
}

impl Presence {
    fn from_payload(payload: &str) -> Self {
        match payload {
            "PRESENT" => Presence::Present,
            "AWAY" => Presence::Away,
            other => Presence::Other(other.to_string()),
        }
    }

    /// payload string as received
    pub fn as_str(&self) -> &str {
        match self {
            Presence::Present => "PRESENT",
            Presence::Away => "AWAY",
            Presence::Other(other) => other,
        }
    }
}

/// A recognized sensor event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    /// `Person: <state>`
    Presence(Presence),
    /// `Gesture: <token>`
    Gesture(String),
}

impl Event {
    /// Classifies one raw line.
    ///
    /// Returns `None` for any line without a known prefix. The payload after
    /// the prefix is passed through unchanged.
    ///
    /// # Examples
    ///
    /// ```
    /// use gesture_relay::event::{Event, Presence};
    ///
    /// assert_eq!(Event::parse("Person: AWAY"), Some(Event::Presence(Presence::Away)));
    /// assert_eq!(Event::parse("Gesture: LEFT"), Some(Event::Gesture("LEFT".to_string())));
    /// assert_eq!(Event::parse("boot ok"), None);
    /// ```
    #[must_use]
    pub fn parse(line: &str) -> Option<Event> {
        if let Some(payload) = line.strip_prefix(PRESENCE_PREFIX) {
            Some(Event::Presence(Presence::from_payload(payload)))
        } else {
            line.strip_prefix(GESTURE_PREFIX)
                .map(|payload| Event::Gesture(payload.to_string()))
        }
    }

    /// token sent to subscribers
    pub fn token(&self) -> &str {
        match self {
            Event::Presence(presence) => presence.as_str(),
            Event::Gesture(token) => token,
        }
    }

    /// presence state, if this is a presence event
    pub fn presence(&self) -> Option<&Presence> {
        match self {
            Event::Presence(presence) => Some(presence),
            Event::Gesture(_) => None,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Presence(presence) => write!(f, "presence {}", presence.as_str()),
            Event::Gesture(token) => write!(f, "gesture {token}"),
        }
    }
}

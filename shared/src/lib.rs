use serde::{Deserialize, Serialize};

/// Side length of a region cell, in coordinate degrees.
pub const REGION_AREA: f64 = 1.0;

/// Floors raw coordinates down to the cell they fall in.
pub fn cell_of(lat: f64, long: f64) -> (f64, f64) {
    (lat.floor(), long.floor())
}

/// A connected chat client and its last reported position.
///
/// Coordinates are plain degrees; no range validation happens here — the
/// client lands in whatever cell the raw values floor to.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Client {
    pub id: String,
    pub lat: f64,
    pub long: f64,
}

impl Client {
    pub fn new(id: impl Into<String>, lat: f64, long: f64) -> Self {
        Self {
            id: id.into(),
            lat,
            long,
        }
    }

    /// The cell this client's coordinates floor to.
    pub fn cell(&self) -> (f64, f64) {
        cell_of(self.lat, self.long)
    }
}

/// A message submitted by a client. The payload is opaque to the server;
/// topic and message contents are carried, never interpreted.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ClientMessageEvent {
    pub client_id: String,
    pub topic: String,
    pub message_id: String,
    pub message: String,
}

// Packet types for client-server communication
#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum Packet {
    /// Client announces itself with its position
    Connect { id: String, lat: f64, long: f64 },
    /// Client leaves
    Disconnect { id: String },
    /// Chat message from a client
    Message {
        id: String,
        topic: String,
        message_id: String,
        message: String,
    },

    /// Server acknowledges a connect
    Connected { id: String },
}

//! Lifecycle and message events flowing through the world's channel

use shared::{Client, ClientMessageEvent};

/// Events consumed by the world's dispatch loop, one variant per kind of
/// thing a client can do to the system.
#[derive(Debug)]
pub enum NetworkEvent {
    /// A client connected and must be placed in a network
    Connect(Client),
    /// A client left
    Disconnect { client_id: String },
    /// A client sent a message; routed to the network that holds the client
    Message(ClientMessageEvent),
}

/// A completed message batch for one network, produced when that network's
/// collection window closes. Delivery to recipients happens downstream.
#[derive(Debug)]
pub struct MessageBatch {
    /// Cell of the owning network's root region, for attribution
    pub cell: (f64, f64),
    /// Messages in arrival order
    pub messages: Vec<ClientMessageEvent>,
}

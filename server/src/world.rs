//! World-level orchestration of client networks
//!
//! The [`ClientWorld`] owns every network and is the single consumer of the
//! lifecycle channel. All graph mutation — placing clients, growing networks,
//! fusing networks — happens on the task running [`ClientWorld::run`], so the
//! channel itself is the only synchronization the graphs need: no locks on
//! regions or networks, and a merge can touch several networks atomically
//! from every other task's point of view.

use crate::client_network::ClientNetwork;
use crate::events::{MessageBatch, NetworkEvent};
use log::{debug, info, warn};
use shared::{cell_of, Client, ClientMessageEvent};
use std::time::Duration;
use tokio::sync::mpsc;

/// Cloneable submission handle for the world's event channel.
///
/// The world itself keeps only the receiving end, so its dispatch loop ends
/// once every handle has been dropped.
#[derive(Clone)]
pub struct WorldHandle {
    event_tx: mpsc::UnboundedSender<NetworkEvent>,
}

impl WorldHandle {
    pub fn submit_connect(&self, client: Client) {
        self.submit(NetworkEvent::Connect(client));
    }

    pub fn submit_disconnect(&self, client_id: impl Into<String>) {
        self.submit(NetworkEvent::Disconnect {
            client_id: client_id.into(),
        });
    }

    pub fn submit_message(&self, event: ClientMessageEvent) {
        self.submit(NetworkEvent::Message(event));
    }

    fn submit(&self, event: NetworkEvent) {
        if self.event_tx.send(event).is_err() {
            warn!("world dispatch loop is gone, dropping event");
        }
    }
}

/// The registry of all client networks and the lifecycle dispatcher.
pub struct ClientWorld {
    networks: Vec<ClientNetwork>,
    event_rx: mpsc::UnboundedReceiver<NetworkEvent>,
    batch_tx: mpsc::UnboundedSender<MessageBatch>,
    batch_window: Duration,
}

impl ClientWorld {
    /// Creates an empty world. Returns the world, a submission handle, and
    /// the channel on which every network's completed message batches arrive
    /// (delivery is the consumer's business).
    pub fn new(
        batch_window: Duration,
    ) -> (
        Self,
        WorldHandle,
        mpsc::UnboundedReceiver<MessageBatch>,
    ) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (batch_tx, batch_rx) = mpsc::unbounded_channel();

        let world = ClientWorld {
            networks: Vec::new(),
            event_rx,
            batch_tx,
            batch_window,
        };
        (world, WorldHandle { event_tx }, batch_rx)
    }

    pub fn networks(&self) -> &[ClientNetwork] {
        &self.networks
    }

    /// Places a connecting client.
    ///
    /// Every network passing the bounding-box pre-filter gets to try
    /// `add_client`. One acceptor: done. None: the client's cell is disjoint
    /// from every footprint and seeds a brand-new single-region network.
    /// Two or more: each acceptor now holds a duplicate region at the
    /// client's cell, and they are fused there.
    pub fn handle_client_connect(&mut self, client: Client) {
        let (lat, long) = cell_of(client.lat, client.long);

        let mut connected = Vec::new();
        for (i, network) in self.networks.iter_mut().enumerate() {
            if network.possibly_contains(&client) && network.add_client(client.clone()) {
                connected.push(i);
            }
        }

        match connected.len() {
            0 => {
                debug!(
                    "client {} seeds a new network at cell ({}, {})",
                    client.id, lat, long
                );
                let mut network = ClientNetwork::new(lat, long);
                network.add_client(client);
                self.networks.push(network);
            }
            1 => {}
            _ => self.merge_networks(&connected, lat, long),
        }
    }

    /// Fuses the networks at the given indices; the first one survives.
    ///
    /// Every other network is pulled out of the registry and absorbed into
    /// the survivor at the fusion cell `(lat, long)`, in the order given.
    /// Indices must be distinct and in range; they come straight from a
    /// connect that just succeeded on each of these networks.
    pub fn merge_networks(&mut self, indices: &[usize], lat: f64, long: f64) {
        let mut survivor = indices[0];
        let mut doomed: Vec<usize> = indices[1..].to_vec();
        doomed.sort_unstable_by(|a, b| b.cmp(a));

        // Remove highest index first so the remaining positions stay valid,
        // tracking where the survivor shifts to
        let mut donors = Vec::with_capacity(doomed.len());
        for i in doomed {
            donors.push(self.networks.remove(i));
            if i < survivor {
                survivor -= 1;
            }
        }
        donors.reverse();

        let count = donors.len() + 1;
        for donor in donors {
            self.networks[survivor].absorb(donor, lat, long);
        }
        info!("fused {} networks at cell ({}, {})", count, lat, long);
    }

    /// Removes a disconnecting client from whichever network holds it.
    /// Unknown ids are a no-op.
    pub fn handle_client_disconnect(&mut self, client_id: &str) {
        for network in &mut self.networks {
            if network.remove_client(client_id) {
                info!("client {} disconnected", client_id);
                return;
            }
        }
        debug!("disconnect for unknown client {}", client_id);
    }

    /// Hands a message to the network currently holding its sender.
    fn forward_message(&self, event: ClientMessageEvent) {
        match self
            .networks
            .iter()
            .find(|network| network.contains_client(&event.client_id))
        {
            Some(network) => network.submit_message(event),
            None => warn!(
                "dropping message {} from unknown client {}",
                event.message_id, event.client_id
            ),
        }
    }

    /// Runs the dispatch loop: one event at a time, in arrival order, until
    /// every [`WorldHandle`] is dropped. Returns the world for inspection.
    pub async fn run(mut self) -> Self {
        info!("world dispatch loop started");
        while let Some(event) = self.event_rx.recv().await {
            match event {
                NetworkEvent::Connect(client) => {
                    info!(
                        "client {} connecting at ({:.3}, {:.3})",
                        client.id, client.lat, client.long
                    );
                    self.handle_client_connect(client);
                }
                NetworkEvent::Disconnect { client_id } => {
                    self.handle_client_disconnect(&client_id);
                }
                NetworkEvent::Message(event) => self.forward_message(event),
            }
            self.spawn_pending_batchers();
        }
        info!("world dispatch loop finished");
        self
    }

    /// Starts the message batcher of any network that doesn't have one yet.
    /// Batchers are spawned here, inside the async loop, so the synchronous
    /// handlers above stay runtime-free.
    fn spawn_pending_batchers(&mut self) {
        for network in &mut self.networks {
            if !network.batcher_running() {
                network.spawn_message_batcher(self.batch_window, self.batch_tx.clone());
            }
        }
    }
}

//! A single shard of the client world
//!
//! A [`ClientNetwork`] owns one connected region graph, the bounding box the
//! world uses to pre-filter candidate shards, and the inbound message channel
//! drained by this shard's batching task. Growth happens one cell at a time:
//! a client whose cell touches the network's footprint gets a freshly wired
//! region; a client whose cell doesn't is rejected for the world to place
//! elsewhere.

use crate::events::MessageBatch;
use crate::region::{Direction, Region, RegionGraph, RegionId};
use log::{debug, error};
use shared::{cell_of, Client, ClientMessageEvent, REGION_AREA};
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

/// Default quiet period that closes a message batch.
pub const MESSAGE_BATCH_WINDOW: Duration = Duration::from_millis(5);

/// A connected graph of regions plus its footprint and message channel.
pub struct ClientNetwork {
    graph: RegionGraph,
    root: RegionId,
    /// Half-open `[min, max)` latitude cover of the owned regions
    lat_range: [f64; 2],
    /// Half-open `[min, max)` longitude cover of the owned regions
    long_range: [f64; 2],
    message_tx: mpsc::UnboundedSender<ClientMessageEvent>,
    /// Taken by the batching task when it starts
    message_rx: Option<mpsc::UnboundedReceiver<ClientMessageEvent>>,
}

impl ClientNetwork {
    /// Creates a network with a single root region at the cell the given
    /// coordinates floor to. The message batcher is not running yet; see
    /// [`spawn_message_batcher`](Self::spawn_message_batcher).
    pub fn new(lat: f64, long: f64) -> Self {
        let (cell_lat, cell_long) = cell_of(lat, long);
        let mut graph = RegionGraph::new();
        let root = graph.add_region(cell_lat, cell_long);
        let (message_tx, message_rx) = mpsc::unbounded_channel();

        Self {
            graph,
            root,
            lat_range: [cell_lat, cell_lat + REGION_AREA],
            long_range: [cell_long, cell_long + REGION_AREA],
            message_tx,
            message_rx: Some(message_rx),
        }
    }

    /// Adds a client to this network, reporting whether its cell connects to
    /// the footprint.
    ///
    /// The flat region list is scanned once. An exact cell match takes the
    /// client as-is. Otherwise any region exactly one cell away in some
    /// direction marks the target cell as connected; a new region is then
    /// created there, wired to every such neighbor, and the bounding box
    /// widens by one degree on whichever edges the new region extends.
    /// Returns false, mutating nothing, when no region touches the cell.
    pub fn add_client(&mut self, client: Client) -> bool {
        let (lat, long) = cell_of(client.lat, client.long);

        let mut exact: Option<RegionId> = None;
        let mut neighbors: [Option<RegionId>; 4] = [None; 4];
        let mut connected = false;
        for (id, region) in self.graph.iter() {
            if region.is_cell(lat, long) {
                exact = Some(id);
                break;
            }
            for (slot, dir) in neighbors.iter_mut().zip(Direction::ALL) {
                let (dlat, dlong) = dir.offset();
                if region.lat() - lat == dlat * REGION_AREA
                    && region.long() - long == dlong * REGION_AREA
                {
                    *slot = Some(id);
                    connected = true;
                }
            }
        }

        if let Some(id) = exact {
            self.graph.region_mut(id).add_client(client);
            return true;
        }
        if !connected {
            return false;
        }

        let new_region = self.graph.add_region(lat, long);
        self.graph.region_mut(new_region).add_client(client);
        for (slot, dir) in neighbors.iter().zip(Direction::ALL) {
            if let Some(neighbor) = *slot {
                self.graph.link(new_region, dir, neighbor);
            }
        }
        self.widen_to_include(lat, long);
        true
    }

    /// Widens the bounding box to cover the given cell. Grow only; edges the
    /// cell doesn't extend are untouched.
    fn widen_to_include(&mut self, lat: f64, long: f64) {
        if lat < self.lat_range[0] {
            self.lat_range[0] = lat;
        }
        if lat + REGION_AREA > self.lat_range[1] {
            self.lat_range[1] = lat + REGION_AREA;
        }
        if long < self.long_range[0] {
            self.long_range[0] = long;
        }
        if long + REGION_AREA > self.long_range[1] {
            self.long_range[1] = long + REGION_AREA;
        }
    }

    /// Fast pre-filter: could this network possibly admit the client?
    ///
    /// True when the raw coordinates fall within the bounding box extended by
    /// one region-width on every side. The halo matters: a client one cell
    /// outside the box can still be adjacent to the footprint, and filtering
    /// it out here would make both adjacent growth and network fusion
    /// unreachable from the world's connect path.
    pub fn possibly_contains(&self, client: &Client) -> bool {
        client.lat >= self.lat_range[0] - REGION_AREA
            && client.lat < self.lat_range[1] + REGION_AREA
            && client.long >= self.long_range[0] - REGION_AREA
            && client.long < self.long_range[1] + REGION_AREA
    }

    /// Removes a client from whichever region holds it. Empty regions keep
    /// their place in the graph; the topology is never collapsed.
    pub fn remove_client(&mut self, client_id: &str) -> bool {
        let holder = self
            .graph
            .iter()
            .find(|(_, region)| region.clients().contains_key(client_id))
            .map(|(id, _)| id);

        match holder {
            Some(id) => {
                self.graph.region_mut(id).remove_client(client_id);
                true
            }
            None => false,
        }
    }

    pub fn contains_client(&self, client_id: &str) -> bool {
        self.graph
            .iter()
            .any(|(_, region)| region.clients().contains_key(client_id))
    }

    /// Searches the graph for the region at cell `(lat, long)`, starting from
    /// the root. `visited` follows the contract of
    /// [`RegionGraph::find_region`]: it belongs to the caller.
    pub fn find_region(
        &self,
        lat: f64,
        long: f64,
        visited: &mut HashSet<RegionId>,
    ) -> Option<RegionId> {
        self.graph.find_region(self.root, lat, long, visited)
    }

    /// Absorbs another network at the fusion cell, taking over its regions
    /// and clients. The donor must hold a region at `(lat, long)` — it was
    /// just produced by a successful `add_client` — and so must this network;
    /// anything else is caller misuse and panics.
    pub fn absorb(&mut self, donor: ClientNetwork, lat: f64, long: f64) {
        let mut visited = HashSet::new();
        let fusion = self
            .find_region(lat, long, &mut visited)
            .expect("fusion cell missing from surviving network");
        let mut visited = HashSet::new();
        let donor_fusion = donor
            .find_region(lat, long, &mut visited)
            .expect("fusion cell missing from absorbed network");

        self.graph.graft(donor.graph, donor_fusion, fusion);

        // The absorbed clients are ours now, so their cells must stay inside
        // the bounding box
        self.lat_range[0] = self.lat_range[0].min(donor.lat_range[0]);
        self.lat_range[1] = self.lat_range[1].max(donor.lat_range[1]);
        self.long_range[0] = self.long_range[0].min(donor.long_range[0]);
        self.long_range[1] = self.long_range[1].max(donor.long_range[1]);
        // Dropping the donor closes its message channel; its batcher flushes
        // any open batch and exits
    }

    pub fn root(&self) -> RegionId {
        self.root
    }

    pub fn region(&self, id: RegionId) -> &Region {
        self.graph.region(id)
    }

    pub fn regions(&self) -> impl Iterator<Item = (RegionId, &Region)> {
        self.graph.iter()
    }

    pub fn region_count(&self) -> usize {
        self.graph.len()
    }

    pub fn lat_range(&self) -> [f64; 2] {
        self.lat_range
    }

    pub fn long_range(&self) -> [f64; 2] {
        self.long_range
    }

    /// Cell of the root region.
    pub fn root_cell(&self) -> (f64, f64) {
        let root = self.graph.region(self.root);
        (root.lat(), root.long())
    }

    /// Enqueues a message for this network's batcher.
    pub fn submit_message(&self, event: ClientMessageEvent) {
        if self.message_tx.send(event).is_err() {
            error!(
                "message batcher for network at {:?} is gone, dropping message",
                self.root_cell()
            );
        }
    }

    pub fn batcher_running(&self) -> bool {
        self.message_rx.is_none()
    }

    /// Spawns the task that drains this network's message channel.
    ///
    /// The first message opens a batch; every further message arriving within
    /// `window` of the previous one joins it; a quiet window closes the batch
    /// and sends it to `batch_tx`. No locks anywhere — the task owns the
    /// receiver outright. Calling this a second time is a no-op.
    pub fn spawn_message_batcher(
        &mut self,
        window: Duration,
        batch_tx: mpsc::UnboundedSender<MessageBatch>,
    ) {
        let Some(mut message_rx) = self.message_rx.take() else {
            return;
        };
        let cell = self.root_cell();

        tokio::spawn(async move {
            while let Some(first) = message_rx.recv().await {
                let mut messages = vec![first];
                loop {
                    match timeout(window, message_rx.recv()).await {
                        Ok(Some(event)) => messages.push(event),
                        // Window elapsed or channel closed: batch is complete
                        Ok(None) | Err(_) => break,
                    }
                }
                debug!("batch of {} messages for network at {:?}", messages.len(), cell);
                if batch_tx.send(MessageBatch { cell, messages }).is_err() {
                    // Consumer is gone, nothing left to batch for
                    break;
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn message(client_id: &str, message_id: &str) -> ClientMessageEvent {
        ClientMessageEvent {
            client_id: client_id.to_string(),
            topic: "general".to_string(),
            message_id: message_id.to_string(),
            message: "hello".to_string(),
        }
    }

    #[test]
    fn test_network_setup() {
        let mut network = ClientNetwork::new(40.0, 38.0);
        assert!(network.add_client(Client::new("A", 40.0, 38.0)));

        let root = network.root();
        assert_eq!(network.region(root).clients().len(), 1);
        assert_eq!(network.region_count(), 1);
    }

    #[test]
    fn test_duplicate_clients_collapse() {
        let mut network = ClientNetwork::new(40.0, 38.0);
        assert!(network.add_client(Client::new("A", 40.1, 38.1)));
        assert!(network.add_client(Client::new("A", 40.2, 38.2)));
        assert!(network.add_client(Client::new("B", 40.3, 38.3)));

        assert_eq!(network.region(network.root()).clients().len(), 2);
    }

    #[test]
    fn test_add_client_new_region() {
        let mut network = ClientNetwork::new(40.0, 38.0);
        assert!(network.add_client(Client::new("A", 40.0, 38.0)));
        assert!(network.add_client(Client::new("B", 40.0, 39.0)));

        let mut visited = HashSet::new();
        let found = network
            .find_region(40.0, 39.0, &mut visited)
            .expect("didn't find the expected region");
        assert!(network.region(found).is_cell(40.0, 39.0));
        assert_eq!(network.region(found).clients().len(), 1);
        assert_eq!(network.region_count(), 2);

        // New region is east of the root and mutually wired
        let root = network.root();
        assert_eq!(network.region(root).neighbor(Direction::Right), Some(found));
        assert_eq!(network.region(found).neighbor(Direction::Left), Some(root));

        // Bounds widened one degree east only
        assert_approx_eq!(network.lat_range()[0], 40.0);
        assert_approx_eq!(network.lat_range()[1], 41.0);
        assert_approx_eq!(network.long_range()[0], 38.0);
        assert_approx_eq!(network.long_range()[1], 40.0);
    }

    #[test]
    fn test_add_client_wires_all_adjacent_regions() {
        // Build a plus-shape around (40,38) without occupying it, then land
        // a client in the middle: the new region must wire in all four
        // directions at once.
        let mut network = ClientNetwork::new(41.0, 38.0);
        assert!(network.add_client(Client::new("up", 41.2, 38.2)));
        assert!(network.add_client(Client::new("right", 41.0, 39.0)));
        assert!(network.add_client(Client::new("corner", 40.5, 39.5)));
        assert!(network.add_client(Client::new("corner2", 39.5, 39.5)));
        assert!(network.add_client(Client::new("down", 39.1, 38.4)));

        // (41,38), (41,39), (40,39), (39,39) and (39,38) now ring the empty
        // cell (40,38), which touches three of them (up, right, down)
        assert!(network.add_client(Client::new("mid", 40.5, 38.5)));
        assert_eq!(network.region_count(), 6);

        let mut visited = HashSet::new();
        let mid = network.find_region(40.0, 38.0, &mut visited).unwrap();
        let mid_region = network.region(mid);
        assert!(mid_region.neighbor(Direction::Up).is_some());
        assert!(mid_region.neighbor(Direction::Right).is_some());
        assert!(mid_region.neighbor(Direction::Down).is_some());
        assert!(mid_region.neighbor(Direction::Left).is_none());

        let up = mid_region.neighbor(Direction::Up).unwrap();
        assert!(network.region(up).is_cell(41.0, 38.0));
        let down = mid_region.neighbor(Direction::Down).unwrap();
        assert!(network.region(down).is_cell(39.0, 38.0));
    }

    #[test]
    fn test_add_client_disconnected_cell_rejected() {
        let mut network = ClientNetwork::new(40.0, 38.0);
        assert!(!network.add_client(Client::new("far", 50.0, 50.0)));

        // No mutation happened
        assert_eq!(network.region_count(), 1);
        assert_eq!(network.region(network.root()).clients().len(), 0);
        assert_approx_eq!(network.lat_range()[1], 41.0);
    }

    #[test]
    fn test_possibly_contains_halo() {
        let network = ClientNetwork::new(40.0, 38.0);

        // Inside the box
        assert!(network.possibly_contains(&Client::new("in", 40.5, 38.5)));
        // One cell outside: adjacent, still a candidate
        assert!(network.possibly_contains(&Client::new("adj", 41.5, 38.5)));
        assert!(network.possibly_contains(&Client::new("adj2", 40.5, 37.2)));
        // Two cells outside: cannot possibly connect
        assert!(!network.possibly_contains(&Client::new("far", 42.5, 38.5)));
        assert!(!network.possibly_contains(&Client::new("far2", 40.5, 41.1)));
    }

    #[test]
    fn test_remove_client() {
        let mut network = ClientNetwork::new(40.0, 38.0);
        network.add_client(Client::new("A", 40.1, 38.1));

        assert!(network.remove_client("A"));
        assert!(!network.contains_client("A"));
        assert!(!network.remove_client("A"));
        // Topology untouched
        assert_eq!(network.region_count(), 1);
    }

    #[test]
    fn test_absorb_merges_graphs_and_bounds() {
        let mut survivor = ClientNetwork::new(38.0, 40.0);
        survivor.add_client(Client::new("A", 38.8, 40.2));

        let mut donor = ClientNetwork::new(37.0, 40.0);
        donor.add_client(Client::new("B", 37.5, 40.5));
        // Grows the donor a duplicate region at the fusion cell (38,40)
        assert!(donor.add_client(Client::new("C", 38.8, 40.4)));

        survivor.absorb(donor, 38.0, 40.0);

        assert_eq!(survivor.region_count(), 2);
        let fusion = survivor.root();
        for id in ["A", "C"] {
            assert!(survivor.region(fusion).clients().contains_key(id));
        }
        assert!(survivor.contains_client("B"));

        // Donor hangs south of the fusion region
        let carried = survivor.region(fusion).neighbor(Direction::Down).unwrap();
        assert!(survivor.region(carried).is_cell(37.0, 40.0));

        // Bounds are the union of both networks
        assert_approx_eq!(survivor.lat_range()[0], 37.0);
        assert_approx_eq!(survivor.lat_range()[1], 39.0);
        assert_approx_eq!(survivor.long_range()[0], 40.0);
        assert_approx_eq!(survivor.long_range()[1], 41.0);
    }

    #[tokio::test]
    async fn test_batcher_collects_queued_messages() {
        let mut network = ClientNetwork::new(40.0, 38.0);
        network.submit_message(message("A", "m1"));
        network.submit_message(message("A", "m2"));
        network.submit_message(message("B", "m3"));

        let (batch_tx, mut batch_rx) = mpsc::unbounded_channel();
        network.spawn_message_batcher(Duration::from_millis(5), batch_tx);
        assert!(network.batcher_running());

        let batch = batch_rx.recv().await.expect("no batch produced");
        assert_eq!(batch.cell, (40.0, 38.0));
        assert_eq!(batch.messages.len(), 3);
        // Arrival order is preserved within the batch
        let ids: Vec<&str> = batch.messages.iter().map(|m| m.message_id.as_str()).collect();
        assert_eq!(ids, ["m1", "m2", "m3"]);
    }

    #[tokio::test]
    async fn test_batcher_splits_batches_on_quiet_window() {
        let mut network = ClientNetwork::new(40.0, 38.0);
        let (batch_tx, mut batch_rx) = mpsc::unbounded_channel();
        network.spawn_message_batcher(Duration::from_millis(20), batch_tx);

        network.submit_message(message("A", "m1"));
        let first = batch_rx.recv().await.expect("first batch missing");
        assert_eq!(first.messages.len(), 1);

        // The window has long since closed; a fresh message opens a new batch
        network.submit_message(message("A", "m2"));
        let second = batch_rx.recv().await.expect("second batch missing");
        assert_eq!(second.messages.len(), 1);
        assert_eq!(second.messages[0].message_id, "m2");
    }

    #[tokio::test]
    async fn test_batcher_flushes_on_channel_close() {
        let mut network = ClientNetwork::new(40.0, 38.0);
        network.submit_message(message("A", "m1"));

        let (batch_tx, mut batch_rx) = mpsc::unbounded_channel();
        network.spawn_message_batcher(Duration::from_secs(60), batch_tx);

        // Dropping the network drops its sender; the open batch must still
        // come out
        drop(network);
        let batch = batch_rx.recv().await.expect("open batch was not flushed");
        assert_eq!(batch.messages.len(), 1);
        // And the task exits, closing the batch channel
        assert!(batch_rx.recv().await.is_none());
    }
}

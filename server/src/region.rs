//! Region graph for a single shard
//!
//! Regions are the nodes of a shard's spatial graph: one node per occupied
//! 1°×1° cell, each holding the clients located in that cell and up to four
//! links to the neighboring cells. Nodes live in a per-shard arena and are
//! addressed by index, so merge surgery is plain index reassignment rather
//! than pointer juggling.
//!
//! Traversals take a caller-owned visited set. Two searches sharing one set
//! cannot revisit each other's regions; callers that want independent
//! searches pass a fresh set each time.

use shared::Client;
use std::collections::{HashMap, HashSet};

/// Stable index of a region within its shard's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegionId(usize);

/// The four cardinal neighbor slots of a region.
///
/// Up is one degree north (+lat), Left one degree west (-long), Down one
/// degree south (-lat), Right one degree east (+long). Each direction is
/// detected and wired independently of the others.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Left,
    Down,
    Right,
}

impl Direction {
    /// All directions, in graph traversal order.
    pub const ALL: [Direction; 4] = [
        Direction::Up,
        Direction::Left,
        Direction::Down,
        Direction::Right,
    ];

    pub fn opposite(self) -> Direction {
        match self {
            Direction::Up => Direction::Down,
            Direction::Left => Direction::Right,
            Direction::Down => Direction::Up,
            Direction::Right => Direction::Left,
        }
    }

    /// Offset of the neighboring cell in this direction, as (dlat, dlong)
    /// in cell units.
    pub fn offset(self) -> (f64, f64) {
        match self {
            Direction::Up => (1.0, 0.0),
            Direction::Left => (0.0, -1.0),
            Direction::Down => (-1.0, 0.0),
            Direction::Right => (0.0, 1.0),
        }
    }

    fn index(self) -> usize {
        match self {
            Direction::Up => 0,
            Direction::Left => 1,
            Direction::Down => 2,
            Direction::Right => 3,
        }
    }
}

/// One occupied cell: its floored coordinates, the clients in it, and its
/// neighbor links.
#[derive(Debug)]
pub struct Region {
    lat: f64,
    long: f64,
    clients: HashMap<String, Client>,
    neighbors: [Option<RegionId>; 4],
}

impl Region {
    fn new(lat: f64, long: f64) -> Self {
        Self {
            lat,
            long,
            clients: HashMap::new(),
            neighbors: [None; 4],
        }
    }

    /// Floored latitude of this region's cell.
    pub fn lat(&self) -> f64 {
        self.lat
    }

    /// Floored longitude of this region's cell.
    pub fn long(&self) -> f64 {
        self.long
    }

    pub fn is_cell(&self, lat: f64, long: f64) -> bool {
        self.lat == lat && self.long == long
    }

    /// Adds a client to this region. A client already present is ignored.
    pub fn add_client(&mut self, client: Client) {
        if self.clients.contains_key(&client.id) {
            return;
        }
        self.clients.insert(client.id.clone(), client);
    }

    pub fn remove_client(&mut self, client_id: &str) -> Option<Client> {
        self.clients.remove(client_id)
    }

    pub fn clients(&self) -> &HashMap<String, Client> {
        &self.clients
    }

    pub fn neighbor(&self, dir: Direction) -> Option<RegionId> {
        self.neighbors[dir.index()]
    }
}

/// Arena of regions forming one shard's connected graph.
#[derive(Debug, Default)]
pub struct RegionGraph {
    regions: Vec<Region>,
}

impl RegionGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_region(&mut self, lat: f64, long: f64) -> RegionId {
        self.regions.push(Region::new(lat, long));
        RegionId(self.regions.len() - 1)
    }

    pub fn region(&self, id: RegionId) -> &Region {
        &self.regions[id.0]
    }

    pub fn region_mut(&mut self, id: RegionId) -> &mut Region {
        &mut self.regions[id.0]
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (RegionId, &Region)> {
        self.regions
            .iter()
            .enumerate()
            .map(|(i, r)| (RegionId(i), r))
    }

    /// Wires `a --dir--> b` together with the reciprocal edge, keeping
    /// adjacency symmetric.
    pub fn link(&mut self, a: RegionId, dir: Direction, b: RegionId) {
        self.regions[a.0].neighbors[dir.index()] = Some(b);
        self.regions[b.0].neighbors[dir.opposite().index()] = Some(a);
    }

    /// Depth-first search for the region at cell `(lat, long)`, starting at
    /// `from`. Graph search order is Up, Left, Down, Right; every region is
    /// marked in `visited` before its neighbors are descended into.
    ///
    /// `visited` belongs to the caller: a region already in the set is
    /// invisible to this search, so back-to-back independent searches must
    /// each get a fresh set.
    pub fn find_region(
        &self,
        from: RegionId,
        lat: f64,
        long: f64,
        visited: &mut HashSet<RegionId>,
    ) -> Option<RegionId> {
        if !visited.insert(from) {
            return None;
        }
        let region = self.region(from);
        if region.is_cell(lat, long) {
            return Some(from);
        }
        for dir in Direction::ALL {
            if let Some(next) = region.neighbor(dir) {
                if let Some(found) = self.find_region(next, lat, long, visited) {
                    return Some(found);
                }
            }
        }
        None
    }

    /// Reachability probe from `from` to `root`, with the same traversal
    /// order and visited discipline as [`find_region`](Self::find_region).
    pub fn is_connected_to_root(
        &self,
        from: RegionId,
        root: RegionId,
        visited: &mut HashSet<RegionId>,
    ) -> bool {
        if !visited.insert(from) {
            return false;
        }
        if from == root {
            return true;
        }
        for dir in Direction::ALL {
            if let Some(next) = self.region(from).neighbor(dir) {
                if self.is_connected_to_root(next, root, visited) {
                    return true;
                }
            }
        }
        false
    }

    /// Grafts `donor` onto this graph at the fusion cell.
    ///
    /// `donor_fusion` is the donor's duplicate region at the fusion cell and
    /// `fusion` is ours. The duplicate's clients fold into our fusion region;
    /// every other donor region is carried over with its edges remapped to
    /// this arena; each populated edge of the duplicate is rewired so its
    /// former neighbor and our fusion region point at each other. The
    /// duplicate itself is discarded.
    pub fn graft(&mut self, donor: RegionGraph, donor_fusion: RegionId, fusion: RegionId) {
        // New ids for every carried donor region; the duplicate maps to our
        // fusion region so carried edges pointing at it land there directly.
        let mut remap: HashMap<RegionId, RegionId> = HashMap::new();
        let mut next = self.regions.len();
        for i in 0..donor.regions.len() {
            if i != donor_fusion.0 {
                remap.insert(RegionId(i), RegionId(next));
                next += 1;
            }
        }
        remap.insert(donor_fusion, fusion);

        let mut dup_clients = HashMap::new();
        let mut dup_neighbors = [None; 4];
        for (i, mut region) in donor.regions.into_iter().enumerate() {
            if i == donor_fusion.0 {
                dup_clients = region.clients;
                dup_neighbors = region.neighbors;
            } else {
                for slot in region.neighbors.iter_mut() {
                    if let Some(old) = *slot {
                        *slot = Some(remap[&old]);
                    }
                }
                self.regions.push(region);
            }
        }

        for client in dup_clients.into_values() {
            self.region_mut(fusion).add_client(client);
        }
        for dir in Direction::ALL {
            if let Some(old) = dup_neighbors[dir.index()] {
                self.link(fusion, dir, remap[&old]);
            }
        }
    }
}

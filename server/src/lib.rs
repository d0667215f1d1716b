//! # Geochat Server Library
//!
//! This library implements the spatial client map for the chat server: every
//! connected client is placed in the 1°×1° cell its coordinates floor to, and
//! cells are grouped into independently managed networks so that lookups,
//! message batching, and bookkeeping scale with local density rather than the
//! global population.
//!
//! ## Architecture
//!
//! ### Region graphs (`region`)
//! Each network is a connected graph of regions, one per occupied cell, with
//! four-directional adjacency. Regions live in a per-network arena and are
//! addressed by index, which keeps merge surgery to index reassignment.
//! Graph searches run depth-first in a fixed Up, Left, Down, Right order and
//! take a caller-owned visited set.
//!
//! ### Networks (`client_network`)
//! A [`client_network::ClientNetwork`] owns its region arena, a grow-only
//! bounding box used as the world's pre-filter, and an inbound message
//! channel drained by a dedicated batching task. A client whose cell touches
//! the footprint grows the network by one freshly wired region; any other
//! client is rejected for the world to place.
//!
//! ### The world (`world`)
//! The [`world::ClientWorld`] registers every network and is the single
//! consumer of the lifecycle channel. A connecting client that is accepted by
//! two or more networks proves their footprints now touch, and those
//! networks are fused at the client's cell without dropping a single client
//! or region.
//!
//! ### Concurrency
//! All graph mutation is serialized through the world's event channel — the
//! channel is the lock. Per-network message batching runs on its own task
//! and never touches graph state, so it proceeds concurrently with growth
//! and merges.
//!
//! ### Ingress (`network`)
//! The UDP ingress decodes wire packets into events and feeds the world
//! handle. Retry policy, framing choices, and fan-out of completed batches
//! all live at this layer or beyond, never in the graph code.

pub mod client_network;
pub mod events;
pub mod network;
pub mod region;
pub mod world;

//! # Presence Server Library
//!
//! This library implements a real-time presence and signaling hub. Clients
//! connect over WebSocket, join a named room under a player id, and stream
//! their 2D positions. The server keeps every room's player list, groups
//! nearby players into proximity clusters, and tells each room when
//! clusters form or break up. It also relays opaque peer-to-peer signaling
//! messages (offer, answer, candidate) to a single named player.
//!
//! ## Core Responsibilities
//!
//! ### Presence
//! Every join, move and departure results in the room's full player list
//! being pushed to every connection in that room. Positions are whatever
//! the client reports; the server does not simulate or validate movement.
//!
//! ### Proximity Clustering
//! After each move the room is re-clustered. A lone player needs to come
//! within the proximity radius of someone to start a cluster, but an
//! existing cluster only breaks once its members drift past the wider exit
//! radius. The gap between the two radii keeps clusters from flickering at
//! the boundary.
//!
//! ### Signaling Relay
//! Offer, answer and candidate messages are forwarded verbatim to whichever
//! connection is bound to the target player id, regardless of room.
//!
//! ## Module Organization
//!
//! ### Client Manager Module (`client_manager`)
//! Registry of live connections, their outbound queues and the player
//! identity each one has bound with a join.
//!
//! ### Cluster Module (`cluster`)
//! The clustering pass: grouping, id assignment and the join/leave events
//! that describe how membership changed.
//!
//! ### Game Module (`game`)
//! Rooms and their players, each room behind its own lock.
//!
//! ### Dispatcher Module (`dispatcher`)
//! Encodes outbound messages and queues them for a room or a single player.
//! A slow or dead recipient never blocks anyone else.
//!
//! ### Hub Module (`hub`)
//! Routes each inbound message to its handler and ties the registry, the
//! rooms and the dispatcher together.
//!
//! ### Network Module (`network`)
//! WebSocket accept loop and the per-connection read/write task.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig {
//!         bind_addr: "127.0.0.1:8080".to_string(),
//!         ..ServerConfig::default()
//!     };
//!     config.validate()?;
//!
//!     let server = Server::bind(config).await?;
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod client_manager;
pub mod cluster;
pub mod config;
pub mod dispatcher;
pub mod game;
pub mod hub;
pub mod network;

//! Connection registry for the presence server
//!
//! This module tracks every live transport connection and what it represents:
//! - Connection lifecycle (register on connect, unregister on close)
//! - The player identity and room a connection claimed when it joined
//! - Reverse lookups by player id (for relays) and by room (for broadcasts)
//! - Capacity limits on concurrent connections
//!
//! The registry is the single source of truth for "which connection currently
//! speaks for player X" and "which connections belong to room R". It does no
//! I/O; each entry only holds the sending half of that connection's outbound
//! queue.

use log::{debug, info};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;
use tokio::sync::mpsc;

/// Server-assigned connection handle.
pub type ConnId = u32;

/// Sending half of a connection's outbound queue of encoded text frames.
pub type Outbound = mpsc::Sender<String>;

/// The player and room a connection is bound to after joining.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub player_id: String,
    pub room: String,
}

/// A registered connection
///
/// Each connection maintains:
/// - Transport metadata (handle, peer address, connect time)
/// - Its bound identity, if it has joined a room
/// - The outbound queue used to deliver frames to it
#[derive(Debug)]
pub struct Client {
    /// Unique connection handle assigned by the registry
    pub id: ConnId,
    /// Peer address, when the transport knows it
    pub addr: Option<SocketAddr>,
    /// When the connection was registered
    pub connected_at: Instant,
    /// Player/room binding, set once per join
    pub identity: Option<Identity>,
    /// Order of the most recent bind, used to pick the newest owner of a player id
    bind_seq: u64,
    sender: Outbound,
}

impl Client {
    /// Creates an unbound connection entry.
    pub fn new(id: ConnId, addr: Option<SocketAddr>, sender: Outbound) -> Self {
        Self {
            id,
            addr,
            connected_at: Instant::now(),
            identity: None,
            bind_seq: 0,
            sender,
        }
    }

    fn is_bound_to(&self, room: &str, player_id: &str) -> bool {
        self.identity
            .as_ref()
            .is_some_and(|identity| identity.room == room && identity.player_id == player_id)
    }
}

/// Manages all live connections and their identities
///
/// Handles are never reused within the lifetime of a registry, so a stale
/// handle held by a finished connection task cannot address a newer one.
pub struct ClientManager {
    /// Connections indexed by their handle
    clients: HashMap<ConnId, Client>,
    /// Next handle for a new connection
    next_client_id: ConnId,
    /// Monotonic counter stamped on each successful bind
    next_bind_seq: u64,
    /// Maximum number of concurrent connections allowed
    max_clients: usize,
}

impl ClientManager {
    /// Creates an empty registry with the given capacity limit
    ///
    /// Handles start from 1 and increment for each new connection.
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients: HashMap::new(),
            next_client_id: 1,
            next_bind_seq: 1,
            max_clients,
        }
    }

    /// Registers a freshly established connection with no identity
    ///
    /// Returns the new handle, or None if the registry is at capacity.
    pub fn register(&mut self, addr: Option<SocketAddr>, sender: Outbound) -> Option<ConnId> {
        if self.clients.len() >= self.max_clients {
            return None;
        }

        let conn_id = self.next_client_id;
        self.next_client_id += 1;

        match addr {
            Some(addr) => info!("Connection {} registered from {}", conn_id, addr),
            None => info!("Connection {} registered", conn_id),
        }
        self.clients.insert(conn_id, Client::new(conn_id, addr, sender));

        Some(conn_id)
    }

    /// Removes a connection
    ///
    /// Returns the removed entry so the caller can clean up after its identity.
    /// Removing an unknown or already removed handle is a no-op.
    pub fn unregister(&mut self, conn_id: &ConnId) -> Option<Client> {
        let client = self.clients.remove(conn_id)?;
        info!("Connection {} unregistered", client.id);
        Some(client)
    }

    /// Associates a connection with a player id and room
    ///
    /// Only the first bind takes effect; binding an already bound connection
    /// is a no-op and returns false. Callers that want to move a connection to
    /// a new identity release the old one first.
    pub fn bind_identity(&mut self, conn_id: ConnId, player_id: &str, room: &str) -> bool {
        let Some(client) = self.clients.get_mut(&conn_id) else {
            return false;
        };
        if client.identity.is_some() {
            debug!("Connection {} is already bound, ignoring bind", conn_id);
            return false;
        }

        client.identity = Some(Identity {
            player_id: player_id.to_string(),
            room: room.to_string(),
        });
        client.bind_seq = self.next_bind_seq;
        self.next_bind_seq += 1;
        true
    }

    /// Clears a connection's identity, returning what it was bound to
    pub fn release_identity(&mut self, conn_id: ConnId) -> Option<Identity> {
        self.clients.get_mut(&conn_id)?.identity.take()
    }

    /// Unbinds every other connection that holds `player_id` in a room other
    /// than `room`, returning the identities it released.
    ///
    /// A player id lives in one room at a time, so a join elsewhere takes it
    /// over from connections that bound it earlier.
    pub fn release_player_elsewhere(
        &mut self,
        conn_id: ConnId,
        player_id: &str,
        room: &str,
    ) -> Vec<Identity> {
        let mut released = Vec::new();
        for client in self.clients.values_mut() {
            if client.id == conn_id {
                continue;
            }
            let elsewhere = client
                .identity
                .as_ref()
                .is_some_and(|identity| identity.player_id == player_id && identity.room != room);
            if elsewhere {
                if let Some(identity) = client.identity.take() {
                    info!(
                        "Connection {} lost {} in {} to a join in {}",
                        client.id, identity.player_id, identity.room, room
                    );
                    released.push(identity);
                }
            }
        }
        released
    }

    pub fn identity(&self, conn_id: ConnId) -> Option<&Identity> {
        self.clients.get(&conn_id)?.identity.as_ref()
    }

    /// Finds the connection bound to a player id in any room
    ///
    /// Relays are deliberately not room scoped, so this searches every
    /// connection. If several connections claim the same id, the most
    /// recently bound one wins.
    pub fn find_by_player_id(&self, player_id: &str) -> Option<(ConnId, Outbound)> {
        self.clients
            .values()
            .filter(|client| {
                client
                    .identity
                    .as_ref()
                    .is_some_and(|identity| identity.player_id == player_id)
            })
            .max_by_key(|client| client.bind_seq)
            .map(|client| (client.id, client.sender.clone()))
    }

    /// Returns true if any live connection is bound to this player in this room
    pub fn is_player_bound(&self, room: &str, player_id: &str) -> bool {
        self.clients
            .values()
            .any(|client| client.is_bound_to(room, player_id))
    }

    /// Lists every connection bound to a room, in no particular order
    pub fn list_by_room(&self, room: &str) -> Vec<(ConnId, Outbound)> {
        self.clients
            .values()
            .filter(|client| {
                client
                    .identity
                    .as_ref()
                    .is_some_and(|identity| identity.room == room)
            })
            .map(|client| (client.id, client.sender.clone()))
            .collect()
    }

    /// Returns the number of registered connections
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Returns true if no connections are registered
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

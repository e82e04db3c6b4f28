//! Inbound message routing.
//!
//! The hub owns the shared state (connection registry and room store) and
//! runs one handler per inbound message. Room handlers mutate, re-cluster and
//! queue their messages through the [`Dispatcher`] while holding that room's
//! lock, so every connection sees a room's updates in the order they were
//! applied. Lock order is room, then registry; the registry lock is never
//! held while waiting for a room.
//!
//! Nothing is ever sent back to the originator as an error: malformed
//! frames, unknown rooms and unknown relay targets are logged and dropped.

use crate::client_manager::{ClientManager, ConnId, Identity, Outbound};
use crate::cluster::ClusterEvent;
use crate::config::{ClusterConfig, ServerConfig};
use crate::dispatcher::Dispatcher;
use crate::game::RoomStore;
use log::{debug, info, warn};
use shared::{ClientMessage, Signal};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::RwLock;

pub struct Hub {
    clients: Arc<RwLock<ClientManager>>,
    rooms: Arc<RoomStore>,
    dispatcher: Dispatcher,
    cluster: ClusterConfig,
}

impl Hub {
    pub fn new(config: &ServerConfig) -> Self {
        let clients = Arc::new(RwLock::new(ClientManager::new(config.max_clients)));
        let rooms = Arc::new(RoomStore::new());
        let dispatcher = Dispatcher::new(Arc::clone(&clients), Arc::clone(&rooms));

        Self {
            clients,
            rooms,
            dispatcher,
            cluster: config.cluster.clone(),
        }
    }

    pub fn rooms(&self) -> &RoomStore {
        &self.rooms
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Registers a new connection. Returns None if the server is full.
    pub async fn connect(&self, addr: Option<SocketAddr>, sender: Outbound) -> Option<ConnId> {
        let conn_id = self.clients.write().await.register(addr, sender);
        if conn_id.is_none() {
            warn!("Rejecting connection from {:?}: server full", addr);
        }
        conn_id
    }

    /// Forgets a connection and removes the player it spoke for.
    pub async fn disconnect(&self, conn_id: ConnId) {
        let removed = self.clients.write().await.unregister(&conn_id);
        if let Some(identity) = removed.and_then(|client| client.identity) {
            self.remove_player(identity).await;
        }
    }

    /// Parses and handles one inbound text frame.
    pub async fn handle_text(&self, conn_id: ConnId, text: &str) {
        match ClientMessage::parse(text) {
            Ok(message) => self.handle_message(conn_id, message).await,
            Err(e) => warn!("Ignoring message from connection {}: {}", conn_id, e),
        }
    }

    pub async fn handle_message(&self, conn_id: ConnId, message: ClientMessage) {
        match message {
            ClientMessage::Join {
                room,
                player_id,
                name,
            } => self.handle_join(conn_id, room, player_id, name).await,
            ClientMessage::Move {
                room,
                player_id,
                x,
                y,
            } => self.handle_move(&room, &player_id, x, y).await,
            ClientMessage::Leave => self.handle_leave(conn_id).await,
            ClientMessage::Signal(signal) => self.handle_signal(conn_id, signal).await,
        }
    }

    async fn handle_join(&self, conn_id: ConnId, room: String, player_id: String, name: String) {
        let released = {
            let mut clients = self.clients.write().await;
            let rejoin = clients
                .identity(conn_id)
                .is_some_and(|current| current.room == room && current.player_id == player_id);

            let mut released = Vec::new();
            if !rejoin {
                released.extend(clients.release_identity(conn_id));
                if !clients.bind_identity(conn_id, &player_id, &room) {
                    debug!("Ignoring join from unregistered connection {}", conn_id);
                    return;
                }
            }
            released.extend(clients.release_player_elsewhere(conn_id, &player_id, &room));
            released
        };

        for previous in released {
            info!(
                "Removing {} from {} before its join to {}",
                previous.player_id, previous.room, room
            );
            self.remove_player(previous).await;
        }

        // Bound before stored: a relay can reach this connection just ahead
        // of the first snapshot that lists its player.
        let joined = self.rooms.join(&room, &player_id, &name).await;
        self.dispatcher.broadcast_snapshot(&room, joined.players()).await;
    }

    async fn handle_move(&self, room_id: &str, player_id: &str, x: f64, y: f64) {
        let Some(mut room) = self.rooms.move_player(room_id, player_id, x, y).await else {
            debug!("Ignoring move for unknown player {} in {}", player_id, room_id);
            return;
        };
        let events = room.recluster(&self.cluster);

        self.dispatcher.send_cluster_events(room_id, events).await;
        self.dispatcher.broadcast_snapshot(room_id, room.players()).await;
    }

    async fn handle_leave(&self, conn_id: ConnId) {
        let released = self.clients.write().await.release_identity(conn_id);
        match released {
            Some(identity) => self.remove_player(identity).await,
            None => debug!("Leave from unbound connection {}", conn_id),
        }
    }

    async fn handle_signal(&self, conn_id: ConnId, signal: Signal) {
        debug!(
            "Relaying {} from connection {} to {}",
            signal.kind.as_str(),
            conn_id,
            signal.to
        );
        self.dispatcher.relay(&signal).await;
    }

    /// Removes a departed identity's player, re-clusters what remains and
    /// tells the room.
    ///
    /// Skipped when another live connection has since bound the same player
    /// in the same room, since that connection now owns the player.
    async fn remove_player(&self, identity: Identity) {
        let Some(room) = self.rooms.room(&identity.room).await else {
            return;
        };

        let mut room = room.lock().await;
        if self
            .clients
            .read()
            .await
            .is_player_bound(&identity.room, &identity.player_id)
        {
            debug!(
                "Player {} in {} is still bound elsewhere, keeping it",
                identity.player_id, identity.room
            );
            return;
        }

        let Some(removed) = room.remove_player(&identity.player_id) else {
            return;
        };
        let mut events = Vec::new();
        if let Some(cluster_id) = removed.cluster_id {
            events.push(ClusterEvent::Leave {
                cluster_id,
                player_id: removed.id,
            });
        }
        events.extend(room.recluster(&self.cluster));

        self.dispatcher.send_cluster_events(&identity.room, events).await;
        self.dispatcher.broadcast_snapshot(&identity.room, room.players()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{ServerMessage, SPAWN_X, SPAWN_Y};
    use tokio::sync::mpsc;

    async fn connect(hub: &Hub) -> (ConnId, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(64);
        let conn = hub.connect(None, tx).await.unwrap();
        (conn, rx)
    }

    fn drain(rx: &mut mpsc::Receiver<String>) -> Vec<ServerMessage> {
        let mut messages = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            messages.push(ServerMessage::decode(&frame).unwrap());
        }
        messages
    }

    fn join(room: &str, player_id: &str) -> String {
        ClientMessage::Join {
            room: room.to_string(),
            player_id: player_id.to_string(),
            name: player_id.to_lowercase(),
        }
        .encode()
    }

    fn moved(room: &str, player_id: &str, x: f64, y: f64) -> String {
        ClientMessage::Move {
            room: room.to_string(),
            player_id: player_id.to_string(),
            x,
            y,
        }
        .encode()
    }

    #[tokio::test]
    async fn test_connect_respects_capacity() {
        let config = ServerConfig {
            max_clients: 1,
            ..ServerConfig::default()
        };
        let hub = Hub::new(&config);
        let (tx1, _rx1) = mpsc::channel(1);
        let (tx2, _rx2) = mpsc::channel(1);

        assert!(hub.connect(None, tx1).await.is_some());
        assert!(hub.connect(None, tx2).await.is_none());
        assert_eq!(hub.client_count().await, 1);
    }

    #[tokio::test]
    async fn test_join_broadcasts_snapshot() {
        let hub = Hub::new(&ServerConfig::default());
        let (conn, mut rx) = connect(&hub).await;

        hub.handle_text(conn, &join("R1", "P1")).await;

        let messages = drain(&mut rx);
        assert_eq!(messages.len(), 1);
        match &messages[0] {
            ServerMessage::Players { players } => {
                assert_eq!(players.len(), 1);
                assert_eq!(players[0].position(), (SPAWN_X, SPAWN_Y));
            }
            other => panic!("Unexpected message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_join_from_unknown_connection_is_ignored() {
        let hub = Hub::new(&ServerConfig::default());
        hub.handle_text(42, &join("R1", "P1")).await;

        assert!(hub.rooms().snapshot("R1").await.is_empty());
    }

    #[tokio::test]
    async fn test_rejoin_moves_connection_between_rooms() {
        let hub = Hub::new(&ServerConfig::default());
        let (conn, mut rx) = connect(&hub).await;
        let (watcher, mut watcher_rx) = connect(&hub).await;

        hub.handle_text(watcher, &join("R1", "W")).await;
        hub.handle_text(conn, &join("R1", "P1")).await;
        drain(&mut rx);
        drain(&mut watcher_rx);

        hub.handle_text(conn, &join("R2", "P1")).await;

        assert_eq!(hub.rooms().snapshot("R1").await.len(), 1);
        assert_eq!(hub.rooms().snapshot("R2").await.len(), 1);

        // The old room hears about the departure, the new one about the arrival.
        match drain(&mut watcher_rx).last() {
            Some(ServerMessage::Players { players }) => {
                assert_eq!(players.len(), 1);
                assert_eq!(players[0].id, "W");
            }
            other => panic!("Unexpected message: {:?}", other),
        }
        match drain(&mut rx).last() {
            Some(ServerMessage::Players { players }) => assert_eq!(players[0].room, "R2"),
            other => panic!("Unexpected message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_rejoin_same_identity_resets_position() {
        let hub = Hub::new(&ServerConfig::default());
        let (conn, _rx) = connect(&hub).await;

        hub.handle_text(conn, &join("R1", "P1")).await;
        hub.handle_text(conn, &moved("R1", "P1", 1.0, 2.0)).await;
        hub.handle_text(conn, &join("R1", "P1")).await;

        let players = hub.rooms().snapshot("R1").await;
        assert_eq!(players.len(), 1);
        assert_eq!(players[0].position(), (SPAWN_X, SPAWN_Y));
    }

    #[tokio::test]
    async fn test_leave_removes_player_and_announces_split() {
        let hub = Hub::new(&ServerConfig::default());
        let (a, mut a_rx) = connect(&hub).await;
        let (b, _b_rx) = connect(&hub).await;

        hub.handle_text(a, &join("R1", "A")).await;
        hub.handle_text(b, &join("R1", "B")).await;
        hub.handle_text(a, &moved("R1", "A", 0.0, 0.0)).await;
        hub.handle_text(b, &moved("R1", "B", 50.0, 0.0)).await;
        drain(&mut a_rx);

        hub.handle_text(b, r#"{"type":"leave"}"#).await;

        let messages = drain(&mut a_rx);
        assert!(messages.contains(&ServerMessage::ClusterLeave {
            cluster_id: "c1".to_string(),
            player_id: "B".to_string(),
        }));
        assert!(messages.contains(&ServerMessage::ClusterLeave {
            cluster_id: "c1".to_string(),
            player_id: "A".to_string(),
        }));
        match messages.last() {
            Some(ServerMessage::Players { players }) => {
                assert_eq!(players.len(), 1);
                assert!(players[0].cluster_id.is_none());
            }
            other => panic!("Unexpected message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_disconnect_keeps_player_claimed_by_newer_connection() {
        let hub = Hub::new(&ServerConfig::default());
        let (old, _old_rx) = connect(&hub).await;
        let (new, _new_rx) = connect(&hub).await;

        hub.handle_text(old, &join("R1", "P1")).await;
        hub.handle_text(new, &join("R1", "P1")).await;
        hub.disconnect(old).await;

        assert_eq!(hub.rooms().snapshot("R1").await.len(), 1);

        hub.disconnect(new).await;
        assert!(hub.rooms().snapshot("R1").await.is_empty());
        assert_eq!(hub.client_count().await, 0);
    }

    #[tokio::test]
    async fn test_join_in_other_room_takes_player_over() {
        let hub = Hub::new(&ServerConfig::default());
        let (first, _first_rx) = connect(&hub).await;
        let (second, _second_rx) = connect(&hub).await;
        let (watcher, mut watcher_rx) = connect(&hub).await;

        hub.handle_text(watcher, &join("R1", "W")).await;
        hub.handle_text(first, &join("R1", "P1")).await;
        drain(&mut watcher_rx);

        hub.handle_text(second, &join("R2", "P1")).await;

        assert_eq!(hub.rooms().snapshot("R1").await.len(), 1);
        assert_eq!(hub.rooms().snapshot("R2").await.len(), 1);
        match drain(&mut watcher_rx).last() {
            Some(ServerMessage::Players { players }) => {
                assert_eq!(players.len(), 1);
                assert_eq!(players[0].id, "W");
            }
            other => panic!("Unexpected message: {:?}", other),
        }

        // The displaced connection no longer speaks for P1.
        hub.handle_text(first, r#"{"type":"leave"}"#).await;
        hub.disconnect(first).await;
        assert_eq!(hub.rooms().snapshot("R2").await.len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_frames_are_ignored() {
        let hub = Hub::new(&ServerConfig::default());
        let (conn, mut rx) = connect(&hub).await;

        hub.handle_text(conn, "{").await;
        hub.handle_text(conn, r#"{"type":"teleport"}"#).await;
        hub.handle_text(conn, r#"{"type":"join","room":"R1"}"#).await;

        assert!(drain(&mut rx).is_empty());
        assert_eq!(hub.rooms().room_count().await, 0);
        assert_eq!(hub.client_count().await, 1);
    }
}

//! Outbound delivery: room broadcasts and point-to-point relays.
//!
//! Messages are encoded once and pushed onto each recipient's outbound queue
//! with `try_send`, which never waits on the socket. Recipients are collected
//! before sending, so the registry lock is not held while frames are queued.
//! Room handlers call in here while still holding the room lock, which keeps
//! every recipient's queue in the same order as the room's mutations. A full
//! or closed queue is logged and skipped without affecting the other
//! recipients or the caller.

use crate::client_manager::{ClientManager, ConnId, Outbound};
use crate::cluster::ClusterEvent;
use crate::game::RoomStore;
use log::{debug, error, warn};
use shared::{Player, ServerMessage, Signal};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::RwLock;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SendError {
    #[error("outbound queue is full")]
    QueueFull,
    #[error("connection is closed")]
    Closed,
}

#[derive(Clone)]
pub struct Dispatcher {
    clients: Arc<RwLock<ClientManager>>,
    rooms: Arc<RoomStore>,
}

impl Dispatcher {
    pub fn new(clients: Arc<RwLock<ClientManager>>, rooms: Arc<RoomStore>) -> Self {
        Self { clients, rooms }
    }

    /// Sends the room's current player list to everyone in the room.
    pub async fn broadcast_players(&self, room_id: &str) -> usize {
        let Some(room) = self.rooms.room(room_id).await else {
            return 0;
        };
        let room = room.lock().await;
        self.broadcast_snapshot(room_id, room.players()).await
    }

    /// Sends an already captured player list to everyone in the room.
    pub async fn broadcast_snapshot(&self, room: &str, players: Vec<Player>) -> usize {
        self.send_room(room, &ServerMessage::Players { players }).await
    }

    pub async fn send_cluster_join(
        &self,
        room: &str,
        cluster_id: String,
        members: Vec<String>,
    ) -> usize {
        let message = ServerMessage::ClusterJoin {
            cluster_id,
            members,
        };
        self.send_room(room, &message).await
    }

    pub async fn send_cluster_leave(
        &self,
        room: &str,
        cluster_id: String,
        player_id: String,
    ) -> usize {
        let message = ServerMessage::ClusterLeave {
            cluster_id,
            player_id,
        };
        self.send_room(room, &message).await
    }

    /// Announces a clustering pass's events to the room, in order.
    pub async fn send_cluster_events(&self, room: &str, events: Vec<ClusterEvent>) {
        for event in events {
            self.send_room(room, &event.into_message()).await;
        }
    }

    /// Forwards a signal to whichever connection is bound to its target,
    /// in any room. Returns false if nothing was delivered.
    pub async fn relay(&self, signal: &Signal) -> bool {
        let target = {
            let clients = self.clients.read().await;
            clients.find_by_player_id(&signal.to)
        };

        let Some((conn_id, sender)) = target else {
            debug!(
                "Dropping {} for {}: no bound connection",
                signal.kind.as_str(),
                signal.to
            );
            return false;
        };

        match deliver(&sender, signal.encode()) {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    "Failed to relay {} to connection {}: {}",
                    signal.kind.as_str(),
                    conn_id,
                    e
                );
                false
            }
        }
    }

    /// Encodes a message once and queues it for every connection in the room.
    /// Returns how many recipients accepted it.
    async fn send_room(&self, room: &str, message: &ServerMessage) -> usize {
        let payload = match message.encode() {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to encode message for room {}: {}", room, e);
                return 0;
            }
        };

        let recipients: Vec<(ConnId, Outbound)> = {
            let clients = self.clients.read().await;
            clients.list_by_room(room)
        };

        let mut delivered = 0;
        for (conn_id, sender) in recipients {
            match deliver(&sender, payload.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => warn!("Skipping connection {} in room {}: {}", conn_id, room, e),
            }
        }
        delivered
    }
}

fn deliver(sender: &Outbound, payload: String) -> Result<(), SendError> {
    sender.try_send(payload).map_err(|e| match e {
        TrySendError::Full(_) => SendError::QueueFull,
        TrySendError::Closed(_) => SendError::Closed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use shared::ClientMessage;
    use tokio::sync::mpsc;

    struct Fixture {
        clients: Arc<RwLock<ClientManager>>,
        rooms: Arc<RoomStore>,
        dispatcher: Dispatcher,
    }

    fn fixture() -> Fixture {
        let clients = Arc::new(RwLock::new(ClientManager::new(16)));
        let rooms = Arc::new(RoomStore::new());
        let dispatcher = Dispatcher::new(Arc::clone(&clients), Arc::clone(&rooms));
        Fixture {
            clients,
            rooms,
            dispatcher,
        }
    }

    async fn bound_connection(
        fixture: &Fixture,
        player_id: &str,
        room: &str,
        capacity: usize,
    ) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(capacity);
        let mut clients = fixture.clients.write().await;
        let conn = clients.register(None, tx).unwrap();
        clients.bind_identity(conn, player_id, room);
        rx
    }

    fn drain(rx: &mut mpsc::Receiver<String>) -> Vec<String> {
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame);
        }
        frames
    }

    fn offer_to(target: &str) -> Signal {
        let text = format!(r#"{{"type":"offer","to":"{}","sdp":"v=0"}}"#, target);
        match ClientMessage::parse(&text).unwrap() {
            ClientMessage::Signal(signal) => signal,
            other => panic!("Unexpected message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_broadcast_players_reaches_room_only() {
        let fixture = fixture();
        drop(fixture.rooms.join("R1", "P1", "Ann").await);
        let mut in_room = bound_connection(&fixture, "P1", "R1", 8).await;
        let mut elsewhere = bound_connection(&fixture, "P2", "R2", 8).await;

        let delivered = fixture.dispatcher.broadcast_players("R1").await;
        assert_eq!(delivered, 1);

        let frames = drain(&mut in_room);
        assert_eq!(frames.len(), 1);
        match ServerMessage::decode(&frames[0]).unwrap() {
            ServerMessage::Players { players } => {
                assert_eq!(players.len(), 1);
                assert_eq!(players[0].id, "P1");
            }
            other => panic!("Unexpected message: {:?}", other),
        }
        assert!(drain(&mut elsewhere).is_empty());
    }

    #[tokio::test]
    async fn test_broadcast_twice_is_identical() {
        let fixture = fixture();
        drop(fixture.rooms.join("R1", "P1", "Ann").await);
        drop(fixture.rooms.join("R1", "P2", "Bob").await);
        let mut rx = bound_connection(&fixture, "P1", "R1", 8).await;

        fixture.dispatcher.broadcast_players("R1").await;
        fixture.dispatcher.broadcast_players("R1").await;

        let frames = drain(&mut rx);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], frames[1]);
    }

    #[tokio::test]
    async fn test_full_queue_is_skipped() {
        let fixture = fixture();
        let mut slow = bound_connection(&fixture, "P1", "R1", 1).await;
        let mut fast = bound_connection(&fixture, "P2", "R1", 8).await;

        fixture
            .dispatcher
            .send_cluster_leave("R1", "c1".to_string(), "P1".to_string())
            .await;
        let delivered = fixture
            .dispatcher
            .send_cluster_leave("R1", "c1".to_string(), "P2".to_string())
            .await;

        assert_eq!(delivered, 1);
        assert_eq!(drain(&mut slow).len(), 1);
        assert_eq!(drain(&mut fast).len(), 2);
    }

    #[tokio::test]
    async fn test_closed_connection_is_skipped() {
        let fixture = fixture();
        let closed = bound_connection(&fixture, "P1", "R1", 8).await;
        drop(closed);
        let mut open = bound_connection(&fixture, "P2", "R1", 8).await;

        let delivered = fixture
            .dispatcher
            .send_cluster_join("R1", "c1".to_string(), vec!["P1".into(), "P2".into()])
            .await;

        assert_eq!(delivered, 1);
        let value: Value = serde_json::from_str(&drain(&mut open)[0]).unwrap();
        assert_eq!(value["type"], "CLUSTER_JOIN");
        assert_eq!(value["members"][1], "P2");
    }

    #[tokio::test]
    async fn test_cluster_events_keep_order() {
        let fixture = fixture();
        let mut rx = bound_connection(&fixture, "P1", "R1", 8).await;

        let events = vec![
            ClusterEvent::Join {
                cluster_id: "c2".to_string(),
                members: vec!["P1".to_string(), "P2".to_string()],
            },
            ClusterEvent::Leave {
                cluster_id: "c1".to_string(),
                player_id: "P1".to_string(),
            },
        ];
        fixture.dispatcher.send_cluster_events("R1", events).await;

        let kinds: Vec<String> = drain(&mut rx)
            .iter()
            .map(|frame| {
                let value: Value = serde_json::from_str(frame).unwrap();
                value["type"].as_str().unwrap().to_string()
            })
            .collect();
        assert_eq!(kinds, vec!["CLUSTER_JOIN", "CLUSTER_LEAVE"]);
    }

    #[tokio::test]
    async fn test_relay_targets_single_connection_across_rooms() {
        let fixture = fixture();
        let mut sender = bound_connection(&fixture, "P1", "R1", 8).await;
        let mut target = bound_connection(&fixture, "P2", "R2", 8).await;
        let mut bystander = bound_connection(&fixture, "P3", "R2", 8).await;

        assert!(fixture.dispatcher.relay(&offer_to("P2")).await);

        let frames = drain(&mut target);
        assert_eq!(frames.len(), 1);
        let value: Value = serde_json::from_str(&frames[0]).unwrap();
        assert_eq!(value["type"], "offer");
        assert_eq!(value["to"], "P2");
        assert_eq!(value["sdp"], "v=0");

        assert!(drain(&mut sender).is_empty());
        assert!(drain(&mut bystander).is_empty());
    }

    #[tokio::test]
    async fn test_relay_to_unknown_player_is_dropped() {
        let fixture = fixture();
        let mut rx = bound_connection(&fixture, "P1", "R1", 8).await;

        assert!(!fixture.dispatcher.relay(&offer_to("nobody")).await);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_deliver_maps_errors() {
        let (tx, rx) = mpsc::channel(1);
        assert_eq!(deliver(&tx, "a".to_string()), Ok(()));
        assert_eq!(deliver(&tx, "b".to_string()), Err(SendError::QueueFull));
        drop(rx);
        assert_eq!(deliver(&tx, "c".to_string()), Err(SendError::Closed));
    }
}

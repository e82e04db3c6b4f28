//! Room and player state.
//!
//! Rooms are created lazily on first join and hold their players keyed by
//! player id. Each room sits behind its own mutex so that mutation and the
//! clustering pass it triggers are atomic per room without serializing
//! unrelated rooms against each other.

use crate::cluster::{self, ClusterEvent};
use crate::config::ClusterConfig;
use log::info;
use shared::Player;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

#[derive(Debug, Clone)]
pub struct Room {
    pub id: String,
    // BTreeMap keeps iteration in player id order, which fixes cluster roots.
    players: BTreeMap<String, Player>,
}

impl Room {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            players: BTreeMap::new(),
        }
    }

    /// Inserts a player at the spawn point, replacing any player with the same id.
    pub fn join(&mut self, player_id: &str, name: &str) {
        let player = Player::new(player_id, name, self.id.as_str());
        info!(
            "Player {} ({}) joined room {} at ({}, {})",
            player_id, name, self.id, player.x, player.y
        );
        self.players.insert(player_id.to_string(), player);
    }

    /// Updates a player's position. Returns false if the player is not here.
    pub fn move_player(&mut self, player_id: &str, x: f64, y: f64) -> bool {
        match self.players.get_mut(player_id) {
            Some(player) => {
                player.x = x;
                player.y = y;
                true
            }
            None => false,
        }
    }

    pub fn remove_player(&mut self, player_id: &str) -> Option<Player> {
        let player = self.players.remove(player_id)?;
        info!("Player {} left room {}", player_id, self.id);
        Some(player)
    }

    pub fn player(&self, player_id: &str) -> Option<&Player> {
        self.players.get(player_id)
    }

    /// Current players in player id order.
    pub fn players(&self) -> Vec<Player> {
        self.players.values().cloned().collect()
    }

    /// Runs a clustering pass over this room's players.
    pub fn recluster(&mut self, config: &ClusterConfig) -> Vec<ClusterEvent> {
        cluster::recompute(self.players.values_mut(), config)
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}

/// All rooms known to the server.
///
/// The outer lock is only held long enough to find or create a room; all
/// player mutation happens under that room's own lock.
#[derive(Debug, Default)]
pub struct RoomStore {
    rooms: RwLock<HashMap<String, Arc<Mutex<Room>>>>,
}

impl RoomStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn room(&self, room_id: &str) -> Option<Arc<Mutex<Room>>> {
        self.rooms.read().await.get(room_id).cloned()
    }

    async fn room_or_create(&self, room_id: &str) -> Arc<Mutex<Room>> {
        if let Some(room) = self.room(room_id).await {
            return room;
        }

        let mut rooms = self.rooms.write().await;
        rooms
            .entry(room_id.to_string())
            .or_insert_with(|| {
                info!("Created room {}", room_id);
                Arc::new(Mutex::new(Room::new(room_id)))
            })
            .clone()
    }

    /// Adds a player to a room, creating the room if needed, and hands back
    /// the still-locked room.
    pub async fn join(
        &self,
        room_id: &str,
        player_id: &str,
        name: &str,
    ) -> OwnedMutexGuard<Room> {
        let room = self.room_or_create(room_id).await;
        let mut room = room.lock_owned().await;
        room.join(player_id, name);
        room
    }

    /// Moves a player and hands back the still-locked room.
    ///
    /// Returns None when the room or player does not exist. Holding the
    /// returned guard keeps the room consistent while the caller re-clusters.
    pub async fn move_player(
        &self,
        room_id: &str,
        player_id: &str,
        x: f64,
        y: f64,
    ) -> Option<OwnedMutexGuard<Room>> {
        let room = self.room(room_id).await?;
        let mut room = room.lock_owned().await;
        if room.move_player(player_id, x, y) {
            Some(room)
        } else {
            None
        }
    }

    /// Current player list for a room, empty if the room does not exist.
    pub async fn snapshot(&self, room_id: &str) -> Vec<Player> {
        match self.room(room_id).await {
            Some(room) => room.lock().await.players(),
            None => Vec::new(),
        }
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }
}

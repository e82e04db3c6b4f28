//! Proximity clustering with hysteresis.
//!
//! Every pass rebuilds a room's clusters from scratch with a breadth-first
//! expansion over the players' proximity graph, then diffs the new assignment
//! against the previous one to produce join/leave events.
//!
//! Two radii are in play. A lone root that was not clustered on the previous
//! pass only pulls players within the proximity radius. Every other puller
//! (members added during this expansion, or a root that was already
//! clustered last pass) reaches out to the wider exit radius. Forming a
//! cluster is therefore harder than holding one together.
//!
//! Players are visited in the order the caller yields them, so callers that
//! want deterministic results must iterate in a fixed order.

use crate::config::{ClusterConfig, ClusterIdMode};
use shared::{distance, Player, ServerMessage};
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashSet, VecDeque};
use std::hash::{Hash, Hasher};

/// Change in cluster membership produced by a clustering pass.
#[derive(Debug, Clone, PartialEq)]
pub enum ClusterEvent {
    /// A multi-member cluster exists with exactly these members.
    Join {
        cluster_id: String,
        members: Vec<String>,
    },
    /// A player is no longer part of the cluster it was in last pass.
    Leave {
        cluster_id: String,
        player_id: String,
    },
}

impl ClusterEvent {
    pub fn into_message(self) -> ServerMessage {
        match self {
            ClusterEvent::Join {
                cluster_id,
                members,
            } => ServerMessage::ClusterJoin {
                cluster_id,
                members,
            },
            ClusterEvent::Leave {
                cluster_id,
                player_id,
            } => ServerMessage::ClusterLeave {
                cluster_id,
                player_id,
            },
        }
    }
}

/// Recomputes cluster ids for a room's players and returns the resulting events.
///
/// All joins come first, in cluster discovery order, followed by leaves in
/// player order. Singletons end up with no cluster id and are never announced.
pub fn recompute<'a, I>(players: I, config: &ClusterConfig) -> Vec<ClusterEvent>
where
    I: IntoIterator<Item = &'a mut Player>,
{
    let mut players: Vec<&'a mut Player> = players.into_iter().collect();
    let previous: Vec<Option<String>> = players
        .iter_mut()
        .map(|player| player.cluster_id.take())
        .collect();

    let positions: Vec<(f64, f64)> = players.iter().map(|player| player.position()).collect();
    let groups = expand_groups(&positions, &previous, config);

    let previous_ids: HashSet<&str> = previous.iter().flatten().map(String::as_str).collect();
    let mut events = Vec::new();

    for (index, members) in groups.iter().enumerate() {
        if members.len() < 2 {
            continue;
        }

        let member_ids: Vec<String> = members.iter().map(|&i| players[i].id.clone()).collect();
        let (cluster_id, announce) = match config.id_mode {
            ClusterIdMode::Sequential => (format!("c{}", index + 1), true),
            ClusterIdMode::Stable => {
                let id = stable_id(&member_ids);
                let announce = !previous_ids.contains(id.as_str());
                (id, announce)
            }
        };

        for &i in members {
            players[i].cluster_id = Some(cluster_id.clone());
        }
        if announce {
            events.push(ClusterEvent::Join {
                cluster_id,
                members: member_ids,
            });
        }
    }

    for (player, old) in players.iter().zip(&previous) {
        if let Some(old) = old {
            if player.cluster_id.as_ref() != Some(old) {
                events.push(ClusterEvent::Leave {
                    cluster_id: old.clone(),
                    player_id: player.id.clone(),
                });
            }
        }
    }

    events
}

/// Partitions player indices into clusters, in root discovery order.
///
/// Each returned group lists its member indices in ascending order.
fn expand_groups(
    positions: &[(f64, f64)],
    previous: &[Option<String>],
    config: &ClusterConfig,
) -> Vec<Vec<usize>> {
    let count = positions.len();
    let mut assigned = vec![false; count];
    let mut groups = Vec::new();

    for root in 0..count {
        if assigned[root] {
            continue;
        }
        assigned[root] = true;

        let mut members = vec![root];
        let mut queue = VecDeque::from([root]);

        while let Some(puller) = queue.pop_front() {
            let radius = if puller == root && previous[root].is_none() {
                config.prox_radius
            } else {
                config.exit_radius
            };

            for candidate in 0..count {
                if assigned[candidate] {
                    continue;
                }
                if distance(positions[puller], positions[candidate]) < radius {
                    assigned[candidate] = true;
                    members.push(candidate);
                    queue.push_back(candidate);
                }
            }
        }

        members.sort_unstable();
        groups.push(members);
    }

    groups
}

/// Cluster id derived from the membership set, independent of member order.
fn stable_id(member_ids: &[String]) -> String {
    let mut sorted: Vec<&str> = member_ids.iter().map(String::as_str).collect();
    sorted.sort_unstable();

    let mut hasher = DefaultHasher::new();
    sorted.hash(&mut hasher);
    format!("c{:016x}", hasher.finish())
}

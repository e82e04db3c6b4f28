use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;

pub const PROX_RADIUS: f64 = 140.0;
pub const EXIT_RADIUS: f64 = 160.0;
pub const SPAWN_X: f64 = 200.0;
pub const SPAWN_Y: f64 = 200.0;

/// A player as stored by the server and reported in `PLAYERS` snapshots.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub id: String,
    pub name: String,
    pub room: String,
    pub x: f64,
    pub y: f64,
    pub cluster_id: Option<String>,
}

impl Player {
    /// Creates a player at the spawn point with no cluster.
    pub fn new(id: impl Into<String>, name: impl Into<String>, room: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            room: room.into(),
            x: SPAWN_X,
            y: SPAWN_Y,
            cluster_id: None,
        }
    }

    pub fn position(&self) -> (f64, f64) {
        (self.x, self.y)
    }
}

/// Euclidean distance between two points.
pub fn distance(a: (f64, f64), b: (f64, f64)) -> f64 {
    (a.0 - b.0).hypot(a.1 - b.1)
}

/// Why an inbound frame could not be turned into a [`ClientMessage`].
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid JSON object: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("missing or non-string field `{0}`")]
    MissingField(&'static str),
    #[error("unknown message type `{0}`")]
    UnknownKind(String),
    #[error("invalid `{kind}` message: {source}")]
    InvalidFields {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Offer,
    Answer,
    Candidate,
}

impl SignalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::Offer => "offer",
            SignalKind::Answer => "answer",
            SignalKind::Candidate => "candidate",
        }
    }

    fn from_kind(kind: &str) -> Option<Self> {
        match kind {
            "offer" => Some(SignalKind::Offer),
            "answer" => Some(SignalKind::Answer),
            "candidate" => Some(SignalKind::Candidate),
            _ => None,
        }
    }
}

/// Peer negotiation payload addressed to a single player.
///
/// The server never looks inside beyond `type` and `to`; `payload` holds the
/// whole inbound object so it can be forwarded unchanged.
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    pub kind: SignalKind,
    pub to: String,
    pub payload: Map<String, Value>,
}

impl Signal {
    /// Builds a signal from arbitrary extra fields; `type` and `to` are filled in.
    pub fn new(kind: SignalKind, to: impl Into<String>, mut fields: Map<String, Value>) -> Self {
        let to = to.into();
        fields.insert("type".to_string(), Value::String(kind.as_str().to_string()));
        fields.insert("to".to_string(), Value::String(to.clone()));
        Self {
            kind,
            to,
            payload: fields,
        }
    }

    pub fn encode(&self) -> String {
        Value::Object(self.payload.clone()).to_string()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JoinFields {
    room: String,
    player_id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MoveFields {
    room: String,
    player_id: String,
    x: f64,
    y: f64,
}

/// Messages a client sends to the server, one JSON object per frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Join {
        room: String,
        player_id: String,
        name: String,
    },
    Move {
        room: String,
        player_id: String,
        x: f64,
        y: f64,
    },
    Leave,
    Signal(Signal),
}

impl ClientMessage {
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let object: Map<String, Value> = serde_json::from_str(text)?;
        let kind = object
            .get("type")
            .and_then(Value::as_str)
            .ok_or(ProtocolError::MissingField("type"))?
            .to_owned();

        match kind.as_str() {
            "join" => {
                let fields: JoinFields = serde_json::from_value(Value::Object(object))
                    .map_err(|source| ProtocolError::InvalidFields { kind: "join", source })?;
                Ok(ClientMessage::Join {
                    room: fields.room,
                    player_id: fields.player_id,
                    name: fields.name,
                })
            }
            "move" => {
                let fields: MoveFields = serde_json::from_value(Value::Object(object))
                    .map_err(|source| ProtocolError::InvalidFields { kind: "move", source })?;
                Ok(ClientMessage::Move {
                    room: fields.room,
                    player_id: fields.player_id,
                    x: fields.x,
                    y: fields.y,
                })
            }
            "leave" => Ok(ClientMessage::Leave),
            other => {
                let kind = SignalKind::from_kind(other)
                    .ok_or_else(|| ProtocolError::UnknownKind(other.to_string()))?;
                let to = object
                    .get("to")
                    .and_then(Value::as_str)
                    .ok_or(ProtocolError::MissingField("to"))?
                    .to_owned();
                Ok(ClientMessage::Signal(Signal::new(kind, to, object)))
            }
        }
    }

    pub fn encode(&self) -> String {
        match self {
            ClientMessage::Join {
                room,
                player_id,
                name,
            } => json!({ "type": "join", "room": room, "playerId": player_id, "name": name })
                .to_string(),
            ClientMessage::Move {
                room,
                player_id,
                x,
                y,
            } => json!({ "type": "move", "room": room, "playerId": player_id, "x": x, "y": y })
                .to_string(),
            ClientMessage::Leave => json!({ "type": "leave" }).to_string(),
            ClientMessage::Signal(signal) => signal.encode(),
        }
    }
}

/// Messages the server emits to every connection in a room.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "PLAYERS")]
    Players { players: Vec<Player> },
    #[serde(rename = "CLUSTER_JOIN")]
    ClusterJoin {
        #[serde(rename = "clusterId")]
        cluster_id: String,
        members: Vec<String>,
    },
    #[serde(rename = "CLUSTER_LEAVE")]
    ClusterLeave {
        #[serde(rename = "clusterId")]
        cluster_id: String,
        #[serde(rename = "playerId")]
        player_id: String,
    },
}

impl ServerMessage {
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

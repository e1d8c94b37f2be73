//! Core protocol types: the room snapshot and the client actions.
//!
//! Everything in this module travels "on the wire" or into the durable
//! store. Field names follow the browser client's conventions
//! (`activePlayerId`, `lastUpdate`, `"JOIN"`), so serde renames are used
//! rather than renaming the Rust fields.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ProtocolError;

/// Width and height of the board. The board is always square.
pub const BOARD_SIZE: usize = 10;

/// The fixed 10×10 grid. Using an array (not `Vec<Vec<_>>`) makes the
/// dimension invariant part of the type: a snapshot with a different shape
/// simply fails to decode.
pub type Board = [[i64; BOARD_SIZE]; BOARD_SIZE];

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// The name a room is addressed by (the last path segment of the URL).
///
/// Rooms are independent: two connections with the same `RoomId` (and the
/// same codec) always reach the same room actor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(pub String);

impl RoomId {
    /// Creates a room id from anything string-like.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the room name.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The single durable-store key this room's snapshot lives under.
    ///
    /// The codec name is part of the key so a JSON room and a binary room
    /// with the same name never read each other's blobs.
    pub fn snapshot_key(&self, codec: &str) -> String {
        format!("{codec}/{}/state", self.0)
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Player
// ---------------------------------------------------------------------------

/// Where a player is in the game. Serialized lowercase (`"active"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerStatus {
    #[default]
    Active,
    Waiting,
    Disconnected,
}

/// One player on the board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub id: String,
    pub x: i64,
    pub y: i64,
    pub score: i64,
    pub inventory: Vec<String>,
    pub status: PlayerStatus,
}

impl Player {
    /// A freshly joined player: origin, no score, empty inventory, active.
    pub fn joined(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            x: 0,
            y: 0,
            score: 0,
            inventory: Vec::new(),
            status: PlayerStatus::Active,
        }
    }
}

// ---------------------------------------------------------------------------
// RoomState
// ---------------------------------------------------------------------------

/// The authoritative state of one room, and the snapshot format sent to
/// clients and written to the durable store.
///
/// `players` is a `BTreeMap` so two equal states always encode to the same
/// bytes, whatever order the players joined in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomState {
    pub turn: u64,
    pub active_player_id: String,
    pub players: BTreeMap<String, Player>,
    pub board: Board,
    /// Wall-clock milliseconds since the Unix epoch of the last mutation.
    pub last_update: u64,
}

impl RoomState {
    /// The zero-value state a room starts from when nothing is persisted.
    pub fn new(last_update: u64) -> Self {
        Self {
            turn: 0,
            active_player_id: String::new(),
            players: BTreeMap::new(),
            board: [[0; BOARD_SIZE]; BOARD_SIZE],
            last_update,
        }
    }
}

impl Default for RoomState {
    fn default() -> Self {
        Self::new(0)
    }
}

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

/// Something a client asks the room to do.
///
/// This is the type the room works with. On the wire an action travels as
/// an [`ActionFrame`]; see [`Codec::decode_action`](crate::Codec::decode_action).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Add (or reset) the player with this id.
    Join { id: String },
    /// Put the player at `(x, y)`. Coordinates are not checked against the
    /// board.
    Move { id: String, x: i64, y: i64 },
    /// Accepted, but changes nothing.
    EndTurn,
}

impl Action {
    /// The wire tag of this action.
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::Join { .. } => ActionKind::Join,
            Self::Move { .. } => ActionKind::Move,
            Self::EndTurn => ActionKind::EndTurn,
        }
    }
}

/// The `type` tag of an inbound action envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionKind {
    Join,
    Move,
    EndTurn,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            Self::Join => "JOIN",
            Self::Move => "MOVE",
            Self::EndTurn => "END_TURN",
        };
        f.write_str(tag)
    }
}

/// The variant-specific part of an action envelope.
///
/// Every field is optional so that one struct can carry any variant in
/// both self-describing (JSON) and positional (bincode) formats. Which
/// fields are required is checked when converting into an [`Action`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ActionPayload {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub x: Option<i64>,
    #[serde(default)]
    pub y: Option<i64>,
}

/// The inbound envelope: `{ "type": "MOVE", "payload": { "id", "x", "y" } }`.
///
/// Serde's internally/adjacently tagged enums need a self-describing
/// format, which bincode is not, so the envelope is a plain struct and the
/// tagged [`Action`] is recovered with `TryFrom`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionFrame {
    #[serde(rename = "type")]
    pub kind: ActionKind,
    #[serde(default)]
    pub payload: ActionPayload,
}

impl From<&Action> for ActionFrame {
    fn from(action: &Action) -> Self {
        let payload = match action {
            Action::Join { id } => ActionPayload {
                id: Some(id.clone()),
                ..ActionPayload::default()
            },
            Action::Move { id, x, y } => ActionPayload {
                id: Some(id.clone()),
                x: Some(*x),
                y: Some(*y),
            },
            Action::EndTurn => ActionPayload::default(),
        };
        Self {
            kind: action.kind(),
            payload,
        }
    }
}

impl TryFrom<ActionFrame> for Action {
    type Error = ProtocolError;

    fn try_from(frame: ActionFrame) -> Result<Self, Self::Error> {
        let ActionPayload { id, x, y } = frame.payload;
        let missing = |field: &str| {
            ProtocolError::InvalidMessage(format!(
                "{} payload is missing `{field}`",
                frame.kind
            ))
        };

        match frame.kind {
            ActionKind::Join => Ok(Action::Join {
                id: id.ok_or_else(|| missing("id"))?,
            }),
            ActionKind::Move => Ok(Action::Move {
                id: id.ok_or_else(|| missing("id"))?,
                x: x.ok_or_else(|| missing("x"))?,
                y: y.ok_or_else(|| missing("y"))?,
            }),
            ActionKind::EndTurn => Ok(Action::EndTurn),
        }
    }
}

//! Maps a connection's request path to a codec and a room.
//!
//! ```text
//! /json/{room}     JSON snapshots in text frames
//! /binary/{room}   bincode snapshots in binary frames
//! ```

use std::fmt;

use boardcast_protocol::{BincodeCodec, Codec, JsonCodec, RoomId};

/// Which codec a connection speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecKind {
    Json,
    Binary,
}

impl CodecKind {
    /// The path segment (and store key prefix) for this codec.
    pub fn name(self) -> &'static str {
        match self {
            Self::Json => JsonCodec::NAME,
            Self::Binary => BincodeCodec::NAME,
        }
    }

    fn from_segment(segment: &str) -> Option<Self> {
        [Self::Json, Self::Binary]
            .into_iter()
            .find(|kind| kind.name() == segment)
    }
}

impl fmt::Display for CodecKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A parsed `/{codec}/{room}` path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub codec: CodecKind,
    pub room: RoomId,
}

impl Route {
    /// Parses a request path. Returns `None` for anything that isn't
    /// exactly `/{codec}/{room}` with a known codec and a usable room name.
    ///
    /// Room names end up in store keys, so `.`, `..` and names containing
    /// a backslash are refused.
    pub fn parse(path: &str) -> Option<Self> {
        let rest = path.strip_prefix('/')?;
        let (codec, room) = rest.split_once('/')?;
        let codec = CodecKind::from_segment(codec)?;

        if room.is_empty()
            || room == "."
            || room == ".."
            || room.contains(['/', '\\'])
        {
            return None;
        }

        Some(Self {
            codec,
            room: RoomId::new(room),
        })
    }
}

//! The bot-facing protocol: requests a bot submits, events it receives
//! back, and the correlation tags pairing the two.
//!
//! Every submitted request returns a [`Tag`]; the completion event for
//! that request carries the same tag. Events caused by the server alone
//! (chat from other players, forced position corrections, session loss)
//! carry no tag.

use glam::{DVec3, Vec2};
use thiserror::Error;


/// Height of the player's eyes above its feet; `stance` stays at
/// `y + PLAYER_EYE_OFFSET` through every movement.
pub const PLAYER_EYE_OFFSET: f64 = 1.6;


/// Opaque single-shot correlation handle between a request and its
/// completion event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tag(pub(crate) u64);

/// Full player position, as carried by the wire heartbeat.
///
/// Equality is exact on every field; the movement engine relies on it for
/// arrival detection and snaps to the target rather than chasing float
/// round-off.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    /// Feet position.
    pub pos: DVec3,
    /// Eye height, `pos.y + PLAYER_EYE_OFFSET`.
    pub stance: f64,
    /// Yaw and pitch, in degrees.
    pub look: Vec2,
    pub on_ground: bool,
}

impl Default for Position {
    fn default() -> Self {
        Self {
            pos: DVec3::ZERO,
            stance: 0.0,
            look: Vec2::ZERO,
            on_ground: true,
        }
    }
}

impl Position {

    /// A grounded position standing at the given feet coordinates.
    pub fn standing(pos: DVec3) -> Self {
        Self {
            pos,
            stance: pos.y + PLAYER_EYE_OFFSET,
            look: Vec2::ZERO,
            on_ground: true,
        }
    }

    /// Same position with a different look.
    pub fn with_look(mut self, look: Vec2) -> Self {
        self.look = look;
        self
    }

}

/// The currently held item, set through creative inventory actions.
#[derive(Debug, Clone, Copy)]
pub struct Tool {
    pub id: i16,
    pub count: i16,
    pub uses: i16,
}

impl Default for Tool {
    fn default() -> Self {
        // Stone, the placement default.
        Self { id: 1, count: 1, uses: 0 }
    }
}


/// A request submitted by the bot.
#[derive(Debug, Clone)]
pub enum Request {
    /// Open a session. Completes with [`Event::ServerJoined`] once the
    /// server accepts us into the world.
    Connect {
        username: String,
        host: String,
        port: u16,
    },
    /// Send a chat line. Completes with the self-echoed
    /// [`Event::ChatMessage`].
    Say {
        text: String,
    },
    /// Walk toward a target position. Completes with
    /// [`Event::PositionChanged`], `forced: false` on arrival or
    /// `forced: true` if the server corrects us first.
    Move {
        target: Position,
    },
    /// Change the held item. Completes with [`Event::Ack`] immediately,
    /// the wire protocol gives no confirmation.
    SetActiveTool {
        item_id: i16,
        item_uses: i16,
    },
    /// Replace the block at the given coordinates, using the creative
    /// instant-break sequence. Completes with [`Event::Ack`].
    SetBlock {
        x: i32,
        y: i32,
        z: i32,
        /// Item to place; the active tool when `None`.
        item_id: Option<i16>,
        item_uses: Option<i16>,
    },
}

/// An event delivered to the bot.
#[derive(Debug, Clone)]
pub enum Event {
    /// The session reached the playing state; completion of `Connect`.
    ServerJoined {
        tag: Tag,
    },
    /// A chat line. Tagged when it is the self-echo completing one of our
    /// own `Say` requests.
    ChatMessage {
        tag: Option<Tag>,
        username: String,
        text: String,
    },
    /// The bot's position settled. Tagged when it completes a `Move`;
    /// `forced` marks a server-side correction instead of an arrival.
    PositionChanged {
        tag: Option<Tag>,
        position: Position,
        forced: bool,
    },
    /// Completion of a request the wire protocol cannot confirm.
    Ack {
        tag: Tag,
    },
    /// A request will never complete.
    Failed {
        tag: Tag,
        error: RequestError,
    },
    /// The session is gone; every pending tag has already been failed
    /// with [`RequestError::Disconnected`].
    Disconnected {
        reason: String,
    },
}

impl Event {

    /// The correlation tag this event completes, if any.
    pub fn tag(&self) -> Option<Tag> {
        match *self {
            Event::ServerJoined { tag } => Some(tag),
            Event::ChatMessage { tag, .. } => tag,
            Event::PositionChanged { tag, .. } => tag,
            Event::Ack { tag } => Some(tag),
            Event::Failed { tag, .. } => Some(tag),
            Event::Disconnected { .. } => None,
        }
    }

}

/// Why a request failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    /// The session died before the request could complete.
    #[error("session disconnected")]
    Disconnected,
    /// The request was superseded (a newer `Move` replaced this one).
    #[error("superseded by a newer request")]
    Cancelled,
    /// Request submitted while no session is playing.
    #[error("not connected")]
    NotConnected,
    /// `Connect` submitted while a session is already up.
    #[error("already connected")]
    AlreadyConnected,
    /// The chat text cannot be sent.
    #[error("invalid chat text: {0}")]
    ChatInvalid(String),
}


#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn standing_keeps_eye_offset() {
        let pos = Position::standing(DVec3::new(0.5, 64.0, 0.5));
        assert!((pos.stance - pos.pos.y - PLAYER_EYE_OFFSET).abs() < 1e-9);
    }

    #[test]
    fn position_equality_is_exact() {
        let a = Position::standing(DVec3::new(1.0, 64.0, 1.0));
        let mut b = a;
        assert_eq!(a, b);
        b.stance += 1e-12;
        assert_ne!(a, b);
    }

}

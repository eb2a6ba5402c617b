//! A bot that endlessly walks a square around wherever it joined.
//!
//! Exercises the movement protocol: each leg is a `Move` request, the
//! next leg starts when the previous one completes, and a server-side
//! correction restarts the square from the corrected position.

use glam::DVec3;
use tracing::{debug, info};

use mcbot::bot::{Event, Position, Request, Tag};
use mcbot::client::{Bot, Client};


/// Side length of the patrolled square, in world units.
const SIDE: f64 = 5.0;

const CORNERS: [(f64, f64); 4] = [
    (SIDE, 0.0),
    (SIDE, SIDE),
    (0.0, SIDE),
    (0.0, 0.0),
];


pub struct PatrolBot {
    /// Corner of the square we loop around, set at join.
    origin: Option<DVec3>,
    /// Index of the next corner to walk to.
    corner: usize,
    /// Tag of the in-flight move.
    pending: Option<Tag>,
}

impl PatrolBot {

    pub fn new() -> Self {
        Self {
            origin: None,
            corner: 0,
            pending: None,
        }
    }

    fn walk_next_leg(&mut self, client: &mut Client) {
        let Some(origin) = self.origin else { return };
        let (dx, dz) = CORNERS[self.corner % CORNERS.len()];
        self.corner += 1;
        let target = Position::standing(origin + DVec3::new(dx, 0.0, dz));
        self.pending = Some(client.submit(Request::Move { target }));
    }

}

impl Bot for PatrolBot {

    fn handle(&mut self, client: &mut Client, event: Event) {
        match event {
            Event::ServerJoined { .. } => {
                let position = client.position();
                info!("patrolling a {SIDE}x{SIDE} square from {}", position.pos);
                self.origin = Some(position.pos);
                self.corner = 0;
                self.walk_next_leg(client);
            }
            Event::PositionChanged { tag, position, forced } => {
                if forced {
                    debug!("pushed to {}, restarting the square there", position.pos);
                    self.origin = Some(position.pos);
                    self.corner = 0;
                    self.walk_next_leg(client);
                } else if tag.is_some() && tag == self.pending {
                    self.walk_next_leg(client);
                }
            }
            Event::Disconnected { .. } => {
                self.origin = None;
                self.pending = None;
            }
            _ => {}
        }
    }

}

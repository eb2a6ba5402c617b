//! The simplest possible bot: it connects and does nothing.

use tracing::info;

use mcbot::bot::Event;
use mcbot::client::{Bot, Client};


pub struct IdleBot;

impl Bot for IdleBot {
    fn handle(&mut self, _client: &mut Client, event: Event) {
        if let Event::ServerJoined { .. } = event {
            info!("standing by");
        }
    }
}

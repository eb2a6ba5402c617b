//! Built-in example bots.

mod echo;
mod idle;
mod patrol;

use clap::ValueEnum;

use mcbot::client::Bot;


/// Selectable bot behaviors.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum BotKind {
    /// Connect and stand still.
    Idle,
    /// Repeat whatever other players say.
    Echo,
    /// Walk a square around the join position.
    Patrol,
}

pub fn new_bot(kind: BotKind) -> Box<dyn Bot> {
    match kind {
        BotKind::Idle => Box::new(idle::IdleBot),
        BotKind::Echo => Box::new(echo::EchoBot),
        BotKind::Patrol => Box::new(patrol::PatrolBot::new()),
    }
}

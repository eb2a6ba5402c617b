//! A bot that repeats what everyone else says on chat.

use mcbot::bot::{Event, Request};
use mcbot::client::{Bot, Client};


pub struct EchoBot;

impl Bot for EchoBot {
    fn handle(&mut self, client: &mut Client, event: Event) {
        // Only untagged lines: tagged ones are echoes of our own sends.
        if let Event::ChatMessage { tag: None, username, text } = event {
            if username != client.username() {
                client.submit(Request::Say { text });
            }
        }
    }
}

//! Event-driven bot client framework for blocky-world game servers
//! speaking the legacy binary protocol (version 23).
//!
//! The crate translates between two protocols: the game's timing-ridden
//! wire protocol (position heartbeats every 50 ms, keep-alives, a
//! handshake/login dance, involuntary position corrections) and a small
//! request/response bot protocol with opaque correlation tags. Bot logic
//! implements [`client::Bot`] and reacts to [`bot::Event`]s, submitting
//! [`bot::Request`]s through the [`client::Client`] handle; the client
//! runs everything on a single thread over one non-blocking socket.
//!
//! Layering, bottom up: [`io`] wire primitives, [`stream`] inbound
//! buffering, [`proto`] the packet codec, [`net`] the socket, [`session`]
//! the state machine and movement engine, [`client`] the event loop, and
//! [`reconnect`] the backoff policy between sessions.

pub mod io;
pub mod stream;
pub mod proto;

pub mod bot;
pub mod session;

pub mod net;
pub mod client;
pub mod reconnect;

pub use bot::{Event, Position, Request, RequestError, Tag, Tool};
pub use client::{Bot, Client, ClientConfig, ConnectOptions, RunExit};
pub use reconnect::ReconnectPolicy;
pub use session::SessionState;

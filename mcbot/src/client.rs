//! The client event loop tying the socket, the session state machine and
//! the user bot together.
//!
//! Everything runs on one thread: socket readiness and the movement tick
//! deadline are multiplexed through a single mio poll, and the bot's
//! callback runs between poll wakeups. Requests a bot submits from inside
//! its callback are queued and dispatched after the callback returns, and
//! completions are only ever delivered on a later pump turn, never
//! synchronously at submit, so bot code can always finish wiring itself
//! up before results arrive.

use std::collections::VecDeque;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use indexmap::IndexMap;
use mio::{Events, Poll, Token};
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::bot::{Event, Position, Request, Tag};
use crate::net::Connection;
use crate::proto::{DecodeError, InPacket};
use crate::reconnect::ReconnectPolicy;
use crate::session::{Session, SessionState};


/// Poll token of the single server connection.
const SOCKET: Token = Token(0);

/// Upper bound on one poll wait, so shutdown requests are noticed even
/// while idle.
const MAX_POLL_WAIT: Duration = Duration::from_millis(250);


/// Tunables of the translator, wired in at construction.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Interval of the movement/heartbeat tick loop.
    pub tick_duration: Duration,
    /// Velocity clamp: maximum distance covered per tick, in world units.
    pub max_move_per_tick: f64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            tick_duration: Duration::from_millis(50),
            max_move_per_tick: 1.0,
        }
    }
}

/// Where and as whom to connect, used by the reconnect runner to restart
/// sessions.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub username: String,
    pub host: String,
    pub port: u16,
}

/// User bot logic, driven by the client with one call per event.
pub trait Bot {
    /// React to an event, optionally submitting new requests through the
    /// client handle.
    fn handle(&mut self, client: &mut Client, event: Event);
}

/// A fatal error of the client machinery itself. Session-level failures
/// (lost socket, kick, malformed packets) are not errors here: they
/// surface to the bot as failed tags and a `Disconnected` event.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

/// How a [`Client::run`] call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunExit {
    /// The session is over; `joined` tells whether it ever reached the
    /// world, which reconnect policies use to reset their backoff.
    Disconnected { joined: bool },
    /// A shutdown request arrived on the channel.
    Shutdown,
}

/// The protocol translator: one instance drives one session at a time.
pub struct Client {
    poll: Poll,
    session: Session,
    conn: Option<Connection>,
    /// Requests queued by [`submit`](Self::submit), dispatched between
    /// bot callbacks.
    requests: VecDeque<(Tag, Request)>,
}

impl Client {

    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        Ok(Self {
            poll: Poll::new()?,
            session: Session::new(config.tick_duration, config.max_move_per_tick),
            conn: None,
            requests: VecDeque::new(),
        })
    }

    /// Queue a request and return its correlation tag. Dispatch happens
    /// after the current callback returns.
    pub fn submit(&mut self, request: Request) -> Tag {
        let tag = self.session.alloc_tag();
        self.requests.push_back((tag, request));
        tag
    }

    /// Discard the eventual completion of a previously submitted request.
    pub fn cancel(&mut self, tag: Tag) {
        self.session.cancel(tag);
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn position(&self) -> Position {
        self.session.current_position()
    }

    pub fn spawn(&self) -> Option<glam::IVec3> {
        self.session.spawn()
    }

    pub fn world_time(&self) -> u64 {
        self.session.world_time()
    }

    /// Online players and their ping, in join order.
    pub fn players(&self) -> &IndexMap<String, i16> {
        self.session.players()
    }

    pub fn username(&self) -> &str {
        self.session.username()
    }

    /// Drive one session to completion: deliver events to the bot, pump
    /// the socket and run movement ticks until the session ends or a
    /// shutdown request arrives.
    pub fn run(&mut self, bot: &mut dyn Bot, shutdown: &Receiver<()>) -> Result<RunExit, ClientError> {

        let mut events = Events::with_capacity(64);

        loop {

            if shutdown.try_recv().is_ok() {
                // Undispatched requests die with the shutdown, dispatching
                // them now could open a fresh connection.
                self.requests.clear();
                self.teardown("shutdown requested");
                self.pump(bot);
                return Ok(RunExit::Shutdown);
            }

            self.pump(bot);
            self.flush_session();

            if self.session.state() == SessionState::Disconnected
                && self.conn.is_none()
                && self.requests.is_empty()
            {
                return Ok(RunExit::Disconnected { joined: self.session.joined() });
            }

            let timeout = match self.session.next_deadline() {
                Some(deadline) => deadline
                    .saturating_duration_since(Instant::now())
                    .min(MAX_POLL_WAIT),
                None => MAX_POLL_WAIT,
            };
            self.poll.poll(&mut events, Some(timeout))?;

            for event in events.iter() {
                if event.token() == SOCKET {
                    self.handle_socket(event);
                }
            }

            if let Some(deadline) = self.session.next_deadline() {
                let now = Instant::now();
                if now >= deadline {
                    self.session.tick(now);
                }
            }

            self.flush_session();

        }

    }

    /// Run sessions forever, re-submitting `Connect` after each loss with
    /// the policy's backoff in between. Returns on shutdown or on a fatal
    /// client error.
    pub fn run_reconnecting(
        &mut self,
        bot: &mut dyn Bot,
        options: &ConnectOptions,
        shutdown: &Receiver<()>,
        policy: &mut ReconnectPolicy,
    ) -> Result<(), ClientError> {

        loop {

            self.submit(Request::Connect {
                username: options.username.clone(),
                host: options.host.clone(),
                port: options.port,
            });

            match self.run(bot, shutdown)? {
                RunExit::Shutdown => return Ok(()),
                RunExit::Disconnected { joined } => {
                    if joined {
                        policy.reset();
                    }
                    let delay = policy.next_delay();
                    info!("reconnecting in {delay:.1?}");
                    match shutdown.recv_timeout(delay) {
                        Ok(()) => return Ok(()),
                        Err(RecvTimeoutError::Timeout) => {}
                        Err(RecvTimeoutError::Disconnected) => {
                            // No shutdown sender left, plain sleep.
                            std::thread::sleep(delay);
                        }
                    }
                }
            }

        }

    }

    /// Deliver pending events to the bot, dispatching any requests it
    /// submits along the way, until both queues are quiet.
    fn pump(&mut self, bot: &mut dyn Bot) {
        loop {
            self.dispatch_requests();
            let Some(event) = self.session.poll_event() else { break };
            trace!("delivering {event:?}");
            bot.handle(self, event);
        }
    }

    fn dispatch_requests(&mut self) {
        while let Some((tag, request)) = self.requests.pop_front() {
            match request {
                Request::Connect { username, host, port } =>
                    self.dispatch_connect(tag, username, host, port),
                other =>
                    self.session.handle_request(tag, other),
            }
        }
    }

    fn dispatch_connect(&mut self, tag: Tag, username: String, host: String, port: u16) {

        if self.session.state() != SessionState::Disconnected {
            // Routed into the session only for the failure answer.
            self.session.handle_request(tag, Request::Connect { username, host, port });
            return;
        }

        info!("connecting to {host}:{port} as {username}");
        self.session.begin_connect(username, tag);

        let addr = match resolve(&host, port) {
            Ok(addr) => addr,
            Err(e) => {
                self.session.on_disconnected(&format!("failed to resolve {host}: {e}"));
                return;
            }
        };

        match Connection::open(addr, self.poll.registry(), SOCKET) {
            Ok(conn) => self.conn = Some(conn),
            Err(e) => {
                self.session.on_disconnected(&format!("connect failed: {e}"));
            }
        }

    }

    fn handle_socket(&mut self, event: &mio::event::Event) {

        if event.is_writable() {
            if let Err(e) = self.socket_writable() {
                self.teardown(&format!("connection failed: {e}"));
                return;
            }
        }

        if event.is_readable() {
            match self.socket_readable() {
                Ok(eof) => {
                    if let Some(reason) = self.session.take_kick_reason() {
                        self.teardown(&format!("kicked: {reason}"));
                        return;
                    }
                    if eof {
                        self.teardown("connection closed by server");
                        return;
                    }
                }
                Err(e) => {
                    self.teardown(&e.to_string());
                    return;
                }
            }
        }

        if (event.is_read_closed() || event.is_write_closed()) && self.conn.is_some() {
            self.teardown("connection closed by server");
        }

    }

    fn socket_writable(&mut self) -> io::Result<()> {
        let Some(conn) = self.conn.as_mut() else { return Ok(()) };
        if conn.try_establish()? {
            self.session.on_connected();
        }
        if let Some(conn) = self.conn.as_mut() {
            if conn.established() {
                conn.flush()?;
            }
        }
        Ok(())
    }

    /// Read and decode everything the socket has buffered. Returns true
    /// when the peer closed the stream.
    fn socket_readable(&mut self) -> io::Result<bool> {

        let Some(conn) = self.conn.as_mut() else { return Ok(false) };
        let eof = conn.fill()?;

        loop {

            if self.session.state() == SessionState::Closing {
                break;
            }

            match InPacket::decode(conn.recv_buf()) {
                Ok(packet) => {
                    conn.recv_buf().commit();
                    self.session.handle_packet(packet, Instant::now());
                }
                Err(DecodeError::Truncated) => {
                    conn.recv_buf().rewind();
                    break;
                }
                Err(DecodeError::UnsupportedId(id)) => {
                    warn!("unsupported packet id {id}, discarding buffered bytes");
                    conn.recv_buf().clear();
                    break;
                }
                Err(DecodeError::Malformed(e)) => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("malformed packet: {e}"),
                    ));
                }
            }

        }

        Ok(eof)

    }

    /// Push the session's outbound queue into the socket.
    fn flush_session(&mut self) {
        while let Some(packet) = self.session.poll_out() {
            let Some(conn) = self.conn.as_mut() else { break };
            trace!("sending {packet:?}");
            if let Err(e) = conn.send(&packet) {
                self.teardown(&format!("write failed: {e}"));
                return;
            }
        }
    }

    /// Drop the socket and run the session's disconnect path, failing
    /// every pending tag.
    fn teardown(&mut self, reason: &str) {
        if let Some(mut conn) = self.conn.take() {
            if let Err(e) = conn.deregister(self.poll.registry()) {
                debug!("deregister failed: {e}");
            }
        }
        self.session.on_disconnected(reason);
    }

}

fn resolve(host: &str, port: u16) -> io::Result<SocketAddr> {
    (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| io::Error::new(
            io::ErrorKind::NotFound,
            "hostname resolved to no address",
        ))
}

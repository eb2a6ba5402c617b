//! The session state machine: handshake and login sequencing, world
//! bookkeeping, the fixed-tick movement loop and the translation between
//! bot requests and wire packets.
//!
//! A [`Session`] never touches a socket. It consumes decoded [`InPacket`]s
//! and bot [`Request`]s, and produces [`OutPacket`]s and bot [`Event`]s
//! through two queues drained by the owning client. This keeps every state
//! transition testable without I/O, and makes all outbound packet ordering
//! total: whatever order things are pushed in is the order the socket sees.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use glam::IVec3;
use indexmap::IndexMap;
use tracing::{debug, info, trace, warn};

use crate::bot::{Event, Position, Request, RequestError, Tag, Tool};
use crate::proto::{
    BreakBlockPacket, ChatPacket, CreativeActionPacket, InPacket, ItemPayload,
    OutHandshakePacket, OutLoginPacket, OutPacket, PlaceBlockPacket,
    PositionLookPacket, PROTOCOL_VERSION,
};


/// Longest chat line the server accepts from a client, in bytes.
const CHAT_MAX_BYTES: usize = 100;
/// Hotbar slot targeted by creative tool changes.
const HAND_SLOT: i16 = 36;
/// The +Y block face, used for digging down onto a block and placing on
/// top of one.
const FACE_UP: i8 = 1;


/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No socket, nothing pending.
    Disconnected,
    /// Socket opening, waiting for the connection to establish.
    Connecting,
    /// Handshake sent, waiting for the server's hash.
    Handshaking,
    /// Login sent, waiting for the first position packet.
    LoggingIn,
    /// In the world; the tick loop is armed.
    Playing,
    /// The server kicked us; the socket is about to be dropped.
    Closing,
}

/// The single in-flight movement: target and the tag to complete when it
/// resolves. Both are set and cleared together.
#[derive(Debug, Clone, Copy)]
struct MoveTarget {
    target: Position,
    tag: Tag,
}

/// State machine of one server session. See the module docs for how it
/// relates to the socket and the bot.
#[derive(Debug)]
pub struct Session {
    /// Interval of the movement/heartbeat loop.
    tick_duration: Duration,
    /// Velocity clamp, in world units per tick.
    max_move_per_tick: f64,
    state: SessionState,
    /// Username presented at handshake, also used to recognize our own
    /// chat echoes.
    username: String,
    /// World time from the last update packet.
    world_time: u64,
    /// World spawn point, immutable once set.
    spawn: Option<IVec3>,
    /// Online players and their ping, in join order.
    players: IndexMap<String, i16>,
    /// Our authoritative position, fed to the heartbeat.
    current: Position,
    /// The held item, as last set by the bot.
    active_tool: Tool,
    move_target: Option<MoveTarget>,
    /// Tags waiting for a chat self-echo, FIFO per exact text. Emptied
    /// queues are removed so arbitrary chat cannot grow the map.
    pending_chat: HashMap<String, VecDeque<Tag>>,
    /// Tag completing with `ServerJoined` once we reach `Playing`.
    connect_tag: Option<Tag>,
    /// Tags whose completion must be discarded.
    cancelled: HashSet<Tag>,
    next_tag: u64,
    /// Deadline of the next tick, armed while `Playing`.
    next_tick: Option<Instant>,
    /// Kick reason from a server `Disconnect` packet.
    kick_reason: Option<String>,
    /// True once this session reached `Playing`.
    joined: bool,
    /// Outbound wire queue, drained by the client into the socket.
    out: VecDeque<OutPacket>,
    /// Bot event queue, drained by the client into the bot callback.
    events: VecDeque<Event>,
}

impl Session {

    pub fn new(tick_duration: Duration, max_move_per_tick: f64) -> Self {
        Self {
            tick_duration,
            max_move_per_tick,
            state: SessionState::Disconnected,
            username: String::new(),
            world_time: 0,
            spawn: None,
            players: IndexMap::new(),
            current: Position::default(),
            active_tool: Tool::default(),
            move_target: None,
            pending_chat: HashMap::new(),
            connect_tag: None,
            cancelled: HashSet::new(),
            next_tag: 0,
            next_tick: None,
            kick_reason: None,
            joined: false,
            out: VecDeque::new(),
            events: VecDeque::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn current_position(&self) -> Position {
        self.current
    }

    pub fn spawn(&self) -> Option<IVec3> {
        self.spawn
    }

    pub fn world_time(&self) -> u64 {
        self.world_time
    }

    pub fn players(&self) -> &IndexMap<String, i16> {
        &self.players
    }

    /// True once this session reached the world, reconnect policies use
    /// it to reset their backoff.
    pub fn joined(&self) -> bool {
        self.joined
    }

    /// Deadline of the next movement tick, if the loop is armed.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.next_tick
    }

    /// Allocate a fresh correlation tag.
    pub fn alloc_tag(&mut self) -> Tag {
        self.next_tag += 1;
        Tag(self.next_tag)
    }

    /// Mark a tag so that its eventual completion is quietly discarded.
    pub fn cancel(&mut self, tag: Tag) {
        self.cancelled.insert(tag);
    }

    /// Pop the next outbound wire packet.
    pub fn poll_out(&mut self) -> Option<OutPacket> {
        self.out.pop_front()
    }

    /// Pop the next bot event, skipping completions of cancelled tags.
    pub fn poll_event(&mut self) -> Option<Event> {
        while let Some(event) = self.events.pop_front() {
            if let Some(tag) = event.tag() {
                if self.cancelled.remove(&tag) {
                    trace!("discarding completion of cancelled {tag:?}");
                    continue;
                }
            }
            return Some(event);
        }
        None
    }

    /// Kick reason observed from the server, consumed by the client when
    /// tearing the socket down.
    pub fn take_kick_reason(&mut self) -> Option<String> {
        self.kick_reason.take()
    }

    /// Start a fresh session attempt. World state from any previous
    /// session is discarded wholesale.
    pub fn begin_connect(&mut self, username: String, tag: Tag) {
        debug_assert_eq!(self.state, SessionState::Disconnected);
        self.state = SessionState::Connecting;
        self.username = username;
        self.world_time = 0;
        self.spawn = None;
        self.players.clear();
        self.current = Position::default();
        self.active_tool = Tool::default();
        self.move_target = None;
        self.pending_chat.clear();
        self.connect_tag = Some(tag);
        self.next_tick = None;
        self.kick_reason = None;
        self.joined = false;
    }

    /// The socket is established: open the wire dialogue.
    pub fn on_connected(&mut self) {
        debug_assert_eq!(self.state, SessionState::Connecting);
        info!("connected, handshaking as {}", self.username);
        self.out.push_back(OutPacket::Handshake(OutHandshakePacket {
            username: self.username.clone(),
        }));
        self.state = SessionState::Handshaking;
    }

    /// The socket is gone. Every pending tag fails with `Disconnected`
    /// and the bot gets one untagged `Disconnected` event.
    pub fn on_disconnected(&mut self, reason: &str) {
        if self.state == SessionState::Disconnected {
            return;
        }
        info!("disconnected: {reason}");
        self.state = SessionState::Disconnected;
        self.next_tick = None;
        self.out.clear();
        if let Some(tag) = self.connect_tag.take() {
            self.fail(tag, RequestError::Disconnected);
        }
        if let Some(slot) = self.move_target.take() {
            self.fail(slot.tag, RequestError::Disconnected);
        }
        for (_, queue) in self.pending_chat.drain() {
            for tag in queue {
                self.events.push_back(Event::Failed { tag, error: RequestError::Disconnected });
            }
        }
        self.events.push_back(Event::Disconnected { reason: reason.to_string() });
    }

    /// Handle one decoded inbound packet.
    pub fn handle_packet(&mut self, packet: InPacket, now: Instant) {
        match packet {
            InPacket::KeepAlive(packet) => {
                trace!("keep alive {}", packet.id);
                self.out.push_back(OutPacket::KeepAlive(crate::proto::KeepAlivePacket { id: 0 }));
            }
            InPacket::Login(packet) => {
                debug!("login confirmed, entity id {}", packet.entity_id);
            }
            InPacket::Handshake(packet) => {
                if self.state == SessionState::Handshaking {
                    debug!("handshake done, hash: {}", packet.hash);
                    self.out.push_back(OutPacket::Login(OutLoginPacket {
                        protocol_version: PROTOCOL_VERSION,
                        username: self.username.clone(),
                    }));
                    self.state = SessionState::LoggingIn;
                } else {
                    warn!("handshake packet in state {:?}", self.state);
                }
            }
            InPacket::Chat(packet) => {
                self.handle_chat(packet.message);
            }
            InPacket::UpdateTime(packet) => {
                self.world_time = packet.time;
            }
            InPacket::SpawnPosition(packet) => {
                if self.spawn.is_none() {
                    debug!("spawn position: {}", packet.pos);
                    self.spawn = Some(packet.pos);
                }
            }
            InPacket::PositionLook(packet) => {
                self.handle_position_look(packet, now);
            }
            InPacket::PreChunk(_) | InPacket::Chunk(_) => {
                // The world is not modelled, bytes already consumed.
            }
            InPacket::PlayerList(packet) => {
                if packet.online {
                    trace!("player {} @ {} ms", packet.name, packet.ping);
                    self.players.insert(packet.name, packet.ping);
                } else {
                    self.players.shift_remove(&packet.name);
                }
            }
            InPacket::Disconnect(packet) => {
                info!("kicked: {}", packet.reason);
                self.kick_reason = Some(packet.reason);
                self.state = SessionState::Closing;
            }
        }
    }

    /// Handle one bot request. `Connect` never reaches this point, the
    /// client routes it before the session exists on the wire.
    pub fn handle_request(&mut self, tag: Tag, request: Request) {

        if self.state != SessionState::Playing {
            let error = match request {
                Request::Connect { .. } => RequestError::AlreadyConnected,
                _ => RequestError::NotConnected,
            };
            self.fail(tag, error);
            return;
        }

        match request {
            Request::Connect { .. } => {
                self.fail(tag, RequestError::AlreadyConnected);
            }
            Request::Say { text } => {
                self.handle_say(tag, text);
            }
            Request::Move { target } => {
                if let Some(prev) = self.move_target.replace(MoveTarget { target, tag }) {
                    self.fail(prev.tag, RequestError::Cancelled);
                }
            }
            Request::SetActiveTool { item_id, item_uses } => {
                self.active_tool.id = item_id;
                self.active_tool.uses = item_uses;
                self.out.push_back(OutPacket::CreativeAction(CreativeActionPacket {
                    slot: HAND_SLOT,
                    item_id: self.active_tool.id,
                    count: self.active_tool.count,
                    uses: self.active_tool.uses,
                }));
                // No wire confirmation exists for this.
                self.events.push_back(Event::Ack { tag });
            }
            Request::SetBlock { x, y, z, item_id, item_uses } => {
                self.handle_set_block(tag, x, y, z, item_id, item_uses);
            }
        }

    }

    /// Run one movement tick: arrival detection, clamped interpolation,
    /// then the mandatory position heartbeat. Re-arms the deadline, so a
    /// forced extra invocation pushes the next regular tick back.
    pub fn tick(&mut self, now: Instant) {

        if self.state != SessionState::Playing {
            return;
        }

        match self.move_target.take() {
            Some(slot) if slot.target == self.current => {
                self.events.push_back(Event::PositionChanged {
                    tag: Some(slot.tag),
                    position: self.current,
                    forced: false,
                });
            }
            Some(slot) => {

                let target = slot.target;
                self.current.look = target.look;
                self.current.on_ground = target.on_ground;

                let delta = target.pos - self.current.pos;
                let dist = delta.length();
                if dist <= self.max_move_per_tick {
                    // Snap: adding the remaining delta would land within
                    // float round-off of the target, not on it.
                    self.current = target;
                } else {
                    let step = delta * (self.max_move_per_tick / dist);
                    self.current.pos += step;
                    self.current.stance += step.y;
                }

                self.move_target = Some(slot);

            }
            None => {}
        }

        self.out.push_back(OutPacket::PositionLook(self.position_packet()));
        self.next_tick = Some(now + self.tick_duration);

    }

    fn position_packet(&self) -> PositionLookPacket {
        PositionLookPacket {
            pos: self.current.pos,
            stance: self.current.stance,
            look: self.current.look,
            on_ground: self.current.on_ground,
        }
    }

    fn fail(&mut self, tag: Tag, error: RequestError) {
        self.events.push_back(Event::Failed { tag, error });
    }

    /// Inbound absolute position. During login this is the signal that we
    /// are in the world; afterwards it is a server-side correction that
    /// must be adopted and acknowledged right away.
    fn handle_position_look(&mut self, packet: PositionLookPacket, now: Instant) {

        let incoming = Position {
            pos: packet.pos,
            stance: packet.stance,
            look: packet.look,
            on_ground: packet.on_ground,
        };

        match self.state {
            SessionState::LoggingIn => {
                // First position is adopted silently.
                self.current = incoming;
                self.state = SessionState::Playing;
                self.joined = true;
                self.next_tick = Some(now + self.tick_duration);
                info!("joined the world at {}", self.current.pos);
                if let Some(tag) = self.connect_tag.take() {
                    self.events.push_back(Event::ServerJoined { tag });
                }
            }
            SessionState::Playing => {
                if incoming != self.current {
                    debug!("forced move to {}", incoming.pos);
                    self.current = incoming;
                    let tag = self.move_target.take().map(|slot| slot.tag);
                    self.events.push_back(Event::PositionChanged {
                        tag,
                        position: self.current,
                        forced: true,
                    });
                    // Acknowledge the correction without waiting out the
                    // current tick interval.
                    self.tick(now);
                }
            }
            state => {
                warn!("position packet in state {state:?}");
            }
        }

    }

    fn handle_say(&mut self, tag: Tag, text: String) {
        if text.len() > CHAT_MAX_BYTES {
            self.fail(tag, RequestError::ChatInvalid("too long".to_string()));
            return;
        }
        self.pending_chat.entry(text.clone()).or_default().push_back(tag);
        self.out.push_back(OutPacket::Chat(ChatPacket { message: text }));
    }

    fn handle_chat(&mut self, message: String) {

        let Some((username, text)) = split_chat_line(&message) else {
            warn!("unrecognized chat line: {message:?}");
            return;
        };

        let mut tag = None;
        if username == self.username {
            if let Some(queue) = self.pending_chat.get_mut(text) {
                tag = queue.pop_front();
                if queue.is_empty() {
                    self.pending_chat.remove(text);
                }
            }
        }

        self.events.push_back(Event::ChatMessage {
            tag,
            username: username.to_string(),
            text: text.to_string(),
        });

    }

    /// The creative-mode instant break sequence: start and finish digging
    /// the block above, then place onto the +Y face.
    fn handle_set_block(&mut self, tag: Tag, x: i32, y: i32, z: i32,
                        item_id: Option<i16>, item_uses: Option<i16>) {

        let dig = BreakBlockPacket {
            status: 0,
            x,
            y: (y + 1) as i8,
            z,
            face: FACE_UP,
        };
        self.out.push_back(OutPacket::BreakBlock(dig.clone()));
        self.out.push_back(OutPacket::BreakBlock(BreakBlockPacket { status: 2, ..dig }));

        let mut tool = self.active_tool;
        if let Some(id) = item_id {
            tool.id = id;
            tool.uses = item_uses.unwrap_or(0);
        }

        self.out.push_back(OutPacket::PlaceBlock(PlaceBlockPacket {
            x,
            y: y as i8,
            z,
            direction: FACE_UP,
            item: Some(ItemPayload {
                id: tool.id,
                count: tool.count as i8,
                uses: tool.uses,
            }),
        }));

        self.events.push_back(Event::Ack { tag });

    }

}

/// Split a `<username> text` chat line. Lines in any other shape (server
/// announcements, death messages) yield `None`.
fn split_chat_line(line: &str) -> Option<(&str, &str)> {
    let rest = line.strip_prefix('<')?;
    let (username, rest) = rest.split_once('>')?;
    if username.is_empty() {
        return None;
    }
    let text = rest.strip_prefix(' ')?;
    Some((username, text))
}


#[cfg(test)]
mod tests {

    use super::*;
    use glam::{DVec3, Vec2};

    const TICK: Duration = Duration::from_millis(50);

    fn new_session() -> Session {
        Session::new(TICK, 1.0)
    }

    fn now() -> Instant {
        Instant::now()
    }

    fn drain_out(session: &mut Session) -> Vec<OutPacket> {
        std::iter::from_fn(|| session.poll_out()).collect()
    }

    fn drain_events(session: &mut Session) -> Vec<Event> {
        std::iter::from_fn(|| session.poll_event()).collect()
    }

    fn in_position(x: f64, y: f64, z: f64) -> InPacket {
        InPacket::PositionLook(PositionLookPacket {
            pos: DVec3::new(x, y, z),
            stance: y + 1.6,
            look: Vec2::ZERO,
            on_ground: true,
        })
    }

    /// Drive a fresh session up to `Handshaking`, outbound queue drained.
    fn handshaking_session() -> (Session, Tag) {
        let mut session = new_session();
        let tag = session.alloc_tag();
        session.begin_connect("bot".to_string(), tag);
        session.on_connected();
        (session, tag)
    }

    /// Drive a fresh session up to `Playing` at (0.5, 64, 0.5).
    fn playing_session() -> Session {
        let (mut session, _) = handshaking_session();
        session.handle_packet(InPacket::Handshake(crate::proto::InHandshakePacket {
            hash: "-".to_string(),
        }), now());
        session.handle_packet(in_position(0.5, 64.0, 0.5), now());
        drain_out(&mut session);
        drain_events(&mut session);
        session
    }

    #[test]
    fn handshake_then_login() {

        let (mut session, _) = handshaking_session();

        let out = drain_out(&mut session);
        assert_eq!(out.len(), 1);
        let OutPacket::Handshake(packet) = &out[0] else { panic!("expected handshake") };
        assert_eq!(packet.username, "bot");

        session.handle_packet(InPacket::Handshake(crate::proto::InHandshakePacket {
            hash: "-".to_string(),
        }), now());
        assert_eq!(session.state(), SessionState::LoggingIn);

        let out = drain_out(&mut session);
        assert_eq!(out.len(), 1);
        let OutPacket::Login(packet) = &out[0] else { panic!("expected login") };
        assert_eq!(packet.protocol_version, 23);
        assert_eq!(packet.username, "bot");

    }

    #[test]
    fn first_position_joins_silently() {

        let (mut session, connect_tag) = handshaking_session();
        session.handle_packet(InPacket::Handshake(crate::proto::InHandshakePacket {
            hash: "-".to_string(),
        }), now());
        drain_out(&mut session);

        session.handle_packet(in_position(0.5, 64.0, 0.5), now());
        assert_eq!(session.state(), SessionState::Playing);

        let events = drain_events(&mut session);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], Event::ServerJoined { tag } if tag == connect_tag));

        // A second position packet with the same coordinates changes
        // nothing and emits nothing.
        session.handle_packet(in_position(0.5, 64.0, 0.5), now());
        assert!(drain_events(&mut session).is_empty());

        // The tick loop is armed and the heartbeat repeats the adopted
        // coordinates.
        assert!(session.next_deadline().is_some());
        session.tick(now());
        let out = drain_out(&mut session);
        assert_eq!(out.len(), 1);
        let OutPacket::PositionLook(packet) = &out[0] else { panic!("expected heartbeat") };
        assert_eq!(packet.pos, DVec3::new(0.5, 64.0, 0.5));
        assert_eq!(packet.stance, 65.6);

    }

    #[test]
    fn keep_alive_is_answered_with_zero() {
        let mut session = playing_session();
        session.handle_packet(InPacket::KeepAlive(crate::proto::KeepAlivePacket { id: 42 }), now());
        let out = drain_out(&mut session);
        assert_eq!(out.len(), 1);
        assert!(matches!(out[0], OutPacket::KeepAlive(ref p) if p.id == 0));
        assert_eq!(session.state(), SessionState::Playing);
    }

    #[test]
    fn move_clamps_then_snaps_then_arrives() {

        let mut session = playing_session();
        let target = Position::standing(DVec3::new(2.5, 64.0, 0.5));
        let tag = session.alloc_tag();
        session.handle_request(tag, Request::Move { target });

        // Distance 2.0: one full clamped step.
        session.tick(now());
        assert_eq!(session.current_position().pos.x, 1.5);
        assert!((session.current_position().stance - 65.6).abs() < 1e-9);

        // Distance 1.0: snap onto the target.
        session.tick(now());
        assert_eq!(session.current_position().pos.x, 2.5);
        assert_eq!(session.current_position(), target);
        assert!(drain_events(&mut session).is_empty());

        // Equality holds: the move completes.
        session.tick(now());
        let events = drain_events(&mut session);
        assert_eq!(events.len(), 1);
        let &Event::PositionChanged { tag: Some(t), position, forced } = &events[0] else {
            panic!("expected tagged position change");
        };
        assert_eq!(t, tag);
        assert_eq!(position, target);
        assert!(!forced);

        // Heartbeats were emitted on every tick.
        let out = drain_out(&mut session);
        assert_eq!(out.len(), 3);
        assert!(out.iter().all(|p| matches!(p, OutPacket::PositionLook(_))));

    }

    #[test]
    fn velocity_clamp_advances_exactly_one_unit() {
        let mut session = playing_session();
        let start = session.current_position().pos;
        let target = Position::standing(DVec3::new(4.5, 66.0, 3.5));
        let tag = session.alloc_tag();
        session.handle_request(tag, Request::Move { target });
        session.tick(now());
        let step = session.current_position().pos - start;
        assert!((step.length() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn move_to_current_position_completes_on_next_tick_only() {

        let mut session = playing_session();
        let target = session.current_position();
        let tag = session.alloc_tag();
        session.handle_request(tag, Request::Move { target });

        // Nothing before the tick runs.
        assert!(drain_events(&mut session).is_empty());

        session.tick(now());
        let events = drain_events(&mut session);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0],
            Event::PositionChanged { tag: Some(t), forced: false, .. } if t == tag));

    }

    #[test]
    fn forced_correction_fails_fast_and_acknowledges() {

        let mut session = playing_session();
        let tag = session.alloc_tag();
        session.handle_request(tag, Request::Move {
            target: Position::standing(DVec3::new(20.5, 64.0, 0.5)),
        });
        session.tick(now());
        drain_out(&mut session);

        session.handle_packet(in_position(10.0, 64.0, 10.0), now());

        let events = drain_events(&mut session);
        assert_eq!(events.len(), 1);
        let &Event::PositionChanged { tag: Some(t), position, forced } = &events[0] else {
            panic!("expected tagged position change");
        };
        assert_eq!(t, tag);
        assert!(forced);
        assert_eq!(position.pos, DVec3::new(10.0, 64.0, 10.0));

        // The correction is acknowledged immediately by an extra
        // heartbeat carrying the corrected coordinates.
        let out = drain_out(&mut session);
        assert_eq!(out.len(), 1);
        let OutPacket::PositionLook(packet) = &out[0] else { panic!("expected heartbeat") };
        assert_eq!(packet.pos, DVec3::new(10.0, 64.0, 10.0));

        // The move slot is clear: further ticks only heartbeat.
        session.tick(now());
        assert!(drain_events(&mut session).is_empty());

    }

    #[test]
    fn new_move_cancels_pending_one() {
        let mut session = playing_session();
        let first = session.alloc_tag();
        session.handle_request(first, Request::Move {
            target: Position::standing(DVec3::new(5.5, 64.0, 0.5)),
        });
        let second = session.alloc_tag();
        session.handle_request(second, Request::Move {
            target: Position::standing(DVec3::new(0.5, 64.0, 5.5)),
        });
        let events = drain_events(&mut session);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0],
            Event::Failed { tag, error: RequestError::Cancelled } if tag == first));
    }

    #[test]
    fn chat_echo_completes_in_fifo_order() {

        let mut session = playing_session();
        let first = session.alloc_tag();
        session.handle_request(first, Request::Say { text: "hi".to_string() });
        let second = session.alloc_tag();
        session.handle_request(second, Request::Say { text: "hi".to_string() });

        let out = drain_out(&mut session);
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|p| matches!(p, OutPacket::Chat(ref c) if c.message == "hi")));

        session.handle_packet(InPacket::Chat(ChatPacket {
            message: "<bot> hi".to_string(),
        }), now());
        session.handle_packet(InPacket::Chat(ChatPacket {
            message: "<bot> hi".to_string(),
        }), now());

        let events = drain_events(&mut session);
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0],
            Event::ChatMessage { tag: Some(t), username, text }
                if *t == first && username == "bot" && text == "hi"));
        assert!(matches!(&events[1],
            Event::ChatMessage { tag: Some(t), .. } if *t == second));

        // The queue for "hi" is gone: a third echo is unsolicited.
        session.handle_packet(InPacket::Chat(ChatPacket {
            message: "<bot> hi".to_string(),
        }), now());
        let events = drain_events(&mut session);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], Event::ChatMessage { tag: None, .. }));

    }

    #[test]
    fn chat_from_others_is_untagged() {
        let mut session = playing_session();
        session.handle_packet(InPacket::Chat(ChatPacket {
            message: "<alice> hello bot".to_string(),
        }), now());
        let events = drain_events(&mut session);
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0],
            Event::ChatMessage { tag: None, username, text }
                if username == "alice" && text == "hello bot"));
    }

    #[test]
    fn unshaped_chat_is_dropped() {
        let mut session = playing_session();
        session.handle_packet(InPacket::Chat(ChatPacket {
            message: "bot joined the game".to_string(),
        }), now());
        assert!(drain_events(&mut session).is_empty());
    }

    #[test]
    fn say_length_boundary() {

        let mut session = playing_session();

        let tag = session.alloc_tag();
        session.handle_request(tag, Request::Say { text: "a".repeat(100) });
        assert!(drain_events(&mut session).is_empty());
        assert_eq!(drain_out(&mut session).len(), 1);

        let tag = session.alloc_tag();
        session.handle_request(tag, Request::Say { text: "a".repeat(101) });
        let events = drain_events(&mut session);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0],
            Event::Failed { tag: t, error: RequestError::ChatInvalid(_) } if t == tag));
        assert!(drain_out(&mut session).is_empty());

    }

    #[test]
    fn set_active_tool_acks_immediately() {
        let mut session = playing_session();
        let tag = session.alloc_tag();
        session.handle_request(tag, Request::SetActiveTool { item_id: 4, item_uses: 0 });
        let out = drain_out(&mut session);
        assert_eq!(out.len(), 1);
        let OutPacket::CreativeAction(packet) = &out[0] else { panic!("expected creative action") };
        assert_eq!(packet.slot, 36);
        assert_eq!(packet.item_id, 4);
        let events = drain_events(&mut session);
        assert!(matches!(events.as_slice(), [Event::Ack { tag: t }] if *t == tag));
    }

    #[test]
    fn set_block_uses_instant_break_sequence() {

        let mut session = playing_session();
        let tag = session.alloc_tag();
        session.handle_request(tag, Request::SetBlock {
            x: 3, y: 64, z: -2,
            item_id: Some(20),
            item_uses: None,
        });

        let out = drain_out(&mut session);
        assert_eq!(out.len(), 3);

        let OutPacket::BreakBlock(dig) = &out[0] else { panic!("expected dig start") };
        assert_eq!((dig.status, dig.x, dig.y, dig.z, dig.face), (0, 3, 65, -2, 1));
        let OutPacket::BreakBlock(dig) = &out[1] else { panic!("expected dig finish") };
        assert_eq!(dig.status, 2);

        let OutPacket::PlaceBlock(place) = &out[2] else { panic!("expected place") };
        assert_eq!((place.x, place.y, place.z, place.direction), (3, 64, -2, 1));
        let item = place.item.unwrap();
        assert_eq!(item.id, 20);

        let events = drain_events(&mut session);
        assert!(matches!(events.as_slice(), [Event::Ack { tag: t }] if *t == tag));

    }

    #[test]
    fn requests_before_playing_fail_not_connected() {
        let mut session = new_session();
        let tag = session.alloc_tag();
        session.handle_request(tag, Request::Say { text: "hi".to_string() });
        let events = drain_events(&mut session);
        assert!(matches!(events.as_slice(),
            [Event::Failed { tag: t, error: RequestError::NotConnected }] if *t == tag));
    }

    #[test]
    fn disconnect_fails_all_pending_tags() {

        let mut session = playing_session();
        let move_tag = session.alloc_tag();
        session.handle_request(move_tag, Request::Move {
            target: Position::standing(DVec3::new(9.5, 64.0, 0.5)),
        });
        let say_tag = session.alloc_tag();
        session.handle_request(say_tag, Request::Say { text: "bye".to_string() });
        drain_out(&mut session);

        session.on_disconnected("connection lost");
        assert_eq!(session.state(), SessionState::Disconnected);

        let events = drain_events(&mut session);
        assert_eq!(events.len(), 3);
        let failed: Vec<Tag> = events.iter()
            .filter_map(|e| match e {
                Event::Failed { tag, error: RequestError::Disconnected } => Some(*tag),
                _ => None,
            })
            .collect();
        assert!(failed.contains(&move_tag));
        assert!(failed.contains(&say_tag));
        assert!(matches!(events.last(), Some(Event::Disconnected { .. })));

    }

    #[test]
    fn cancelled_completion_is_discarded() {
        let mut session = playing_session();
        let tag = session.alloc_tag();
        session.handle_request(tag, Request::Move {
            target: session.current_position(),
        });
        session.cancel(tag);
        session.tick(now());
        assert!(drain_events(&mut session).is_empty());
    }

    #[test]
    fn spawn_position_is_set_once() {
        let mut session = playing_session();
        session.handle_packet(InPacket::SpawnPosition(crate::proto::SpawnPositionPacket {
            pos: IVec3::new(0, 64, 0),
        }), now());
        session.handle_packet(InPacket::SpawnPosition(crate::proto::SpawnPositionPacket {
            pos: IVec3::new(100, 70, 100),
        }), now());
        assert_eq!(session.spawn(), Some(IVec3::new(0, 64, 0)));
    }

    #[test]
    fn player_roster_tracks_online_state() {
        let mut session = playing_session();
        for (name, online, ping) in [("alice", true, 30i16), ("carol", true, 60), ("alice", false, 0)] {
            session.handle_packet(InPacket::PlayerList(crate::proto::PlayerListPacket {
                name: name.to_string(),
                online,
                ping,
            }), now());
        }
        assert_eq!(session.players().len(), 1);
        assert_eq!(session.players().get("carol"), Some(&60));
    }

    #[test]
    fn kick_packet_closes_session() {
        let mut session = playing_session();
        session.handle_packet(InPacket::Disconnect(crate::proto::DisconnectPacket {
            reason: "bye".to_string(),
        }), now());
        assert_eq!(session.state(), SessionState::Closing);
        assert_eq!(session.take_kick_reason().as_deref(), Some("bye"));
    }

    #[test]
    fn world_time_is_stored() {
        let mut session = playing_session();
        session.handle_packet(InPacket::UpdateTime(crate::proto::UpdateTimePacket {
            time: 1234,
        }), now());
        assert_eq!(session.world_time(), 1234);
    }

    #[test]
    fn stance_tracks_y_through_vertical_moves() {
        let mut session = playing_session();
        let tag = session.alloc_tag();
        session.handle_request(tag, Request::Move {
            target: Position::standing(DVec3::new(0.5, 70.0, 0.5)),
        });
        for _ in 0..10 {
            session.tick(now());
            let position = session.current_position();
            assert!((position.stance - position.pos.y - 1.6).abs() < 1e-9);
        }
    }

}

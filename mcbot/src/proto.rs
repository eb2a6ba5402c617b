//! Wire protocol definition for protocol version 23, from the client's
//! point of view: [`InPacket`] is decoded off the server stream and
//! [`OutPacket`] is encoded toward it.
//!
//! Packets are framed as a one-byte id followed by a schema-driven body;
//! integers are big-endian, strings length-prefixed UTF-16. The per-packet
//! field orderings below are the ground truth for the whole crate and must
//! match the game server bit for bit.

use std::io::{self, Read, Write};

use glam::{DVec3, IVec3, Vec2};
use thiserror::Error;

use crate::io::{ReadWireExt, WriteWireExt};

/// Protocol version spoken by this client.
pub const PROTOCOL_VERSION: i32 = 23;

/// Longest chat line accepted from the server, in UTF-16 code units.
const CHAT_DECODE_MAX: usize = 199;
/// Upper bound on a chunk payload; vanilla chunks stay well under this.
const CHUNK_DATA_MAX: usize = 1 << 22;


/// A packet received from the server (client-bound).
#[derive(Debug, Clone)]
pub enum InPacket {
    /// Keep-alive probe, to be answered with id 0.
    KeepAlive(KeepAlivePacket),
    /// Login confirmation, nothing in it is needed after the handshake.
    Login(InLoginPacket),
    /// Server's answer to our handshake, carrying the connection hash.
    Handshake(InHandshakePacket),
    /// A chat line, our own messages echo back through this.
    Chat(ChatPacket),
    /// World time update.
    UpdateTime(UpdateTimePacket),
    /// World spawn point, sent once during the login burst.
    SpawnPosition(SpawnPositionPacket),
    /// Absolute position correction; must be acknowledged by the next
    /// outbound heartbeat.
    PositionLook(PositionLookPacket),
    /// Chunk allocation/deallocation notice, unused by a bot.
    PreChunk(PreChunkPacket),
    /// Chunk payload, consumed off the stream and otherwise ignored.
    Chunk(ChunkPacket),
    /// Player roster delta for the tab list.
    PlayerList(PlayerListPacket),
    /// The server kicked us.
    Disconnect(DisconnectPacket),
}

/// A packet sent to the server (server-bound).
#[derive(Debug, Clone)]
pub enum OutPacket {
    /// Keep-alive answer.
    KeepAlive(KeepAlivePacket),
    /// First packet of a session, carrying the username.
    Handshake(OutHandshakePacket),
    /// Login request following the handshake answer.
    Login(OutLoginPacket),
    /// A chat line.
    Chat(ChatPacket),
    /// The position heartbeat, emitted every tick while playing.
    PositionLook(PositionLookPacket),
    /// Start/stop digging a block.
    BreakBlock(BreakBlockPacket),
    /// Place a block against a face.
    PlaceBlock(PlaceBlockPacket),
    /// Put an item into an inventory slot in creative mode.
    CreativeAction(CreativeActionPacket),
}

/// Packet 0
#[derive(Debug, Clone)]
pub struct KeepAlivePacket {
    pub id: i32,
}

/// Packet 1 (client-bound)
#[derive(Debug, Clone)]
pub struct InLoginPacket {
    /// The entity id assigned to this client.
    pub entity_id: i32,
}

/// Packet 1 (server-bound)
#[derive(Debug, Clone)]
pub struct OutLoginPacket {
    /// Must be [`PROTOCOL_VERSION`].
    pub protocol_version: i32,
    pub username: String,
}

/// Packet 2 (client-bound)
#[derive(Debug, Clone)]
pub struct InHandshakePacket {
    /// Connection hash, "-" when the server runs in offline mode.
    pub hash: String,
}

/// Packet 2 (server-bound)
#[derive(Debug, Clone)]
pub struct OutHandshakePacket {
    pub username: String,
}

/// Packet 3
#[derive(Debug, Clone)]
pub struct ChatPacket {
    pub message: String,
}

/// Packet 4
#[derive(Debug, Clone)]
pub struct UpdateTimePacket {
    /// The world time, in game ticks.
    pub time: u64,
}

/// Packet 6
#[derive(Debug, Clone)]
pub struct SpawnPositionPacket {
    pub pos: IVec3,
}

/// Packet 13
///
/// Both directions use the same field order: x, y, stance, z, yaw, pitch,
/// on_ground.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionLookPacket {
    pub pos: DVec3,
    pub stance: f64,
    pub look: Vec2,
    pub on_ground: bool,
}

/// Packet 14
#[derive(Debug, Clone)]
pub struct BreakBlockPacket {
    pub status: i8,
    pub x: i32,
    pub y: i8,
    pub z: i32,
    pub face: i8,
}

/// Packet 15
#[derive(Debug, Clone)]
pub struct PlaceBlockPacket {
    pub x: i32,
    pub y: i8,
    pub z: i32,
    pub direction: i8,
    pub item: Option<ItemPayload>,
}

/// Packet 50
#[derive(Debug, Clone)]
pub struct PreChunkPacket {
    pub cx: i32,
    pub cz: i32,
    pub init: bool,
}

/// Packet 51
#[derive(Debug, Clone)]
pub struct ChunkPacket {
    pub x: i32,
    pub y: i16,
    pub z: i32,
    pub x_size: u8,
    pub y_size: u8,
    pub z_size: u8,
    pub compressed_data: Vec<u8>,
}

/// Packet 107
#[derive(Debug, Clone)]
pub struct CreativeActionPacket {
    pub slot: i16,
    pub item_id: i16,
    pub count: i16,
    pub uses: i16,
}

/// Packet 201
#[derive(Debug, Clone)]
pub struct PlayerListPacket {
    pub name: String,
    pub online: bool,
    pub ping: i16,
}

/// Packet 255
#[derive(Debug, Clone)]
pub struct DisconnectPacket {
    pub reason: String,
}

/// An item description embedded in a block placement.
#[derive(Debug, Clone, Copy)]
pub struct ItemPayload {
    pub id: i16,
    pub count: i8,
    pub uses: i16,
}


/// Error while decoding a client-bound packet.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Not enough buffered bytes for a full packet; wait for more input
    /// and retry from the packet boundary. Never fatal.
    #[error("truncated packet")]
    Truncated,
    /// A packet id with no schema; the body length is unknowable.
    #[error("unsupported packet id {0}")]
    UnsupportedId(u8),
    /// A schema-level violation in the packet body.
    #[error("malformed packet: {0}")]
    Malformed(io::Error),
}

impl From<io::Error> for DecodeError {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            DecodeError::Truncated
        } else {
            DecodeError::Malformed(err)
        }
    }
}


impl InPacket {

    /// Decode a single packet, id byte included, off the reader.
    pub fn decode(read: &mut impl Read) -> Result<Self, DecodeError> {
        let id = match read.read_u8_or_eof()? {
            Some(id) => id,
            None => return Err(DecodeError::Truncated),
        };
        Ok(match id {
            0 => InPacket::KeepAlive(KeepAlivePacket {
                id: read.read_wire_int()?,
            }),
            1 => {

                let packet = InLoginPacket {
                    entity_id: read.read_wire_int()?,
                };

                // Padding mirroring the server-bound login body.
                let _unused = read.read_wire_string(16)?;
                for _ in 0..6 {
                    let _pad = read.read_wire_long()?;
                }
                let _trailer = read.read_wire_string(16)?;

                InPacket::Login(packet)

            }
            2 => InPacket::Handshake(InHandshakePacket {
                hash: read.read_wire_string(64)?,
            }),
            3 => InPacket::Chat(ChatPacket {
                message: read.read_wire_string(CHAT_DECODE_MAX)?,
            }),
            4 => InPacket::UpdateTime(UpdateTimePacket {
                time: read.read_wire_long()? as u64,
            }),
            6 => {
                let x = read.read_wire_int()?;
                let y = read.read_wire_int()?;
                let z = read.read_wire_int()?;
                InPacket::SpawnPosition(SpawnPositionPacket {
                    pos: IVec3::new(x, y, z),
                })
            }
            13 => {
                let x = read.read_wire_double()?;
                let y = read.read_wire_double()?;
                let stance = read.read_wire_double()?;
                let z = read.read_wire_double()?;
                let yaw = read.read_wire_float()?;
                let pitch = read.read_wire_float()?;
                let on_ground = read.read_wire_bool()?;
                InPacket::PositionLook(PositionLookPacket {
                    pos: DVec3::new(x, y, z),
                    stance,
                    look: Vec2::new(yaw, pitch),
                    on_ground,
                })
            }
            50 => InPacket::PreChunk(PreChunkPacket {
                cx: read.read_wire_int()?,
                cz: read.read_wire_int()?,
                init: read.read_wire_bool()?,
            }),
            51 => {

                let x = read.read_wire_int()?;
                let y = read.read_wire_short()?;
                let z = read.read_wire_int()?;
                let x_size = (read.read_wire_byte()? as u8).wrapping_add(1);
                let y_size = (read.read_wire_byte()? as u8).wrapping_add(1);
                let z_size = (read.read_wire_byte()? as u8).wrapping_add(1);

                let data_len = read.read_wire_int()?;
                if data_len < 0 || data_len as usize > CHUNK_DATA_MAX {
                    return Err(DecodeError::Malformed(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("invalid chunk data length {data_len}"))));
                }

                let mut compressed_data = vec![0u8; data_len as usize];
                read.read_exact(&mut compressed_data)?;

                InPacket::Chunk(ChunkPacket {
                    x, y, z,
                    x_size, y_size, z_size,
                    compressed_data,
                })

            }
            201 => InPacket::PlayerList(PlayerListPacket {
                name: read.read_wire_string(64)?,
                online: read.read_wire_bool()?,
                ping: read.read_wire_short()?,
            }),
            255 => InPacket::Disconnect(DisconnectPacket {
                reason: read.read_wire_string(100)?,
            }),
            id => return Err(DecodeError::UnsupportedId(id)),
        })
    }

}

impl OutPacket {

    /// Encode this packet, id byte included, into the writer.
    pub fn encode(&self, write: &mut impl Write) -> io::Result<()> {

        match self {
            OutPacket::KeepAlive(packet) => {
                write.write_wire_byte(0)?;
                write.write_wire_int(packet.id)?;
            }
            OutPacket::Handshake(packet) => {
                write.write_wire_byte(2)?;
                write.write_wire_string(&packet.username)?;
            }
            OutPacket::Login(packet) => {
                write.write_wire_byte(1)?;
                write.write_wire_int(packet.protocol_version)?;
                write.write_wire_string(&packet.username)?;
                // The server expects this exact zero padding after the
                // username; it carries nothing.
                for _ in 0..6 {
                    write.write_wire_long(0)?;
                }
                write.write_wire_string("")?;
            }
            OutPacket::Chat(packet) => {
                write.write_wire_byte(3)?;
                write.write_wire_string(&packet.message)?;
            }
            OutPacket::PositionLook(packet) => {
                write.write_wire_byte(13)?;
                write.write_wire_double(packet.pos.x)?;
                write.write_wire_double(packet.pos.y)?;
                write.write_wire_double(packet.stance)?;
                write.write_wire_double(packet.pos.z)?;
                write.write_wire_float(packet.look.x)?;
                write.write_wire_float(packet.look.y)?;
                write.write_wire_bool(packet.on_ground)?;
            }
            OutPacket::BreakBlock(packet) => {
                write.write_wire_byte(14)?;
                write.write_wire_byte(packet.status)?;
                write.write_wire_int(packet.x)?;
                write.write_wire_byte(packet.y)?;
                write.write_wire_int(packet.z)?;
                write.write_wire_byte(packet.face)?;
            }
            OutPacket::PlaceBlock(packet) => {
                write.write_wire_byte(15)?;
                write.write_wire_int(packet.x)?;
                write.write_wire_byte(packet.y)?;
                write.write_wire_int(packet.z)?;
                write.write_wire_byte(packet.direction)?;
                if let Some(item) = packet.item {
                    write.write_wire_short(item.id)?;
                    write.write_wire_byte(item.count)?;
                    write.write_wire_short(item.uses)?;
                } else {
                    write.write_wire_short(-1)?;
                }
            }
            OutPacket::CreativeAction(packet) => {
                write.write_wire_byte(107)?;
                write.write_wire_short(packet.slot)?;
                write.write_wire_short(packet.item_id)?;
                write.write_wire_short(packet.count)?;
                write.write_wire_short(packet.uses)?;
            }
        }

        Ok(())

    }

    /// Encode into a fresh byte vector.
    pub fn encode_to_vec(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        // Writing to a Vec cannot fail.
        self.encode(&mut buf).expect("infallible write");
        buf
    }

}


/// Internal helper distinguishing "no byte at all" from a read error, so
/// an empty buffer does not allocate an error for the common idle case.
trait ReadIdExt: Read {
    fn read_u8_or_eof(&mut self) -> io::Result<Option<u8>> {
        let mut byte = [0u8; 1];
        loop {
            return match self.read(&mut byte) {
                Ok(0) => Ok(None),
                Ok(_) => Ok(Some(byte[0])),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => Err(e),
            };
        }
    }
}

impl<R: Read> ReadIdExt for R {}


#[cfg(test)]
mod tests {

    use super::*;
    use std::io::Cursor;

    fn decode(bytes: &[u8]) -> Result<InPacket, DecodeError> {
        InPacket::decode(&mut Cursor::new(bytes))
    }

    #[test]
    fn keep_alive_round_trip() {
        let bytes = OutPacket::KeepAlive(KeepAlivePacket { id: 42 }).encode_to_vec();
        assert_eq!(bytes, [0, 0, 0, 0, 42]);
        let InPacket::KeepAlive(packet) = decode(&bytes).unwrap() else {
            panic!("wrong variant");
        };
        assert_eq!(packet.id, 42);
    }

    #[test]
    fn chat_round_trip() {
        let bytes = OutPacket::Chat(ChatPacket { message: "<bot> hi".to_string() })
            .encode_to_vec();
        let InPacket::Chat(packet) = decode(&bytes).unwrap() else {
            panic!("wrong variant");
        };
        assert_eq!(packet.message, "<bot> hi");
    }

    #[test]
    fn position_look_round_trip() {
        let out = PositionLookPacket {
            pos: DVec3::new(0.5, 64.0, 0.5),
            stance: 65.6,
            look: Vec2::new(90.0, -10.0),
            on_ground: true,
        };
        let bytes = OutPacket::PositionLook(out.clone()).encode_to_vec();
        // 1 id + 4 doubles + 2 floats + 1 bool.
        assert_eq!(bytes.len(), 1 + 32 + 8 + 1);
        let InPacket::PositionLook(packet) = decode(&bytes).unwrap() else {
            panic!("wrong variant");
        };
        assert_eq!(packet, out);
    }

    #[test]
    fn login_round_trip_shape() {
        let bytes = OutPacket::Login(OutLoginPacket {
            protocol_version: PROTOCOL_VERSION,
            username: "bot".to_string(),
        }).encode_to_vec();
        // id + version + "bot" + 6 longs + empty trailer.
        assert_eq!(bytes.len(), 1 + 4 + (2 + 6) + 48 + 2);
        // The client-bound login shares the same padding, with the entity
        // id in place of the protocol version.
        let InPacket::Login(packet) = decode(&bytes).unwrap() else {
            panic!("wrong variant");
        };
        assert_eq!(packet.entity_id, PROTOCOL_VERSION);
    }

    #[test]
    fn spawn_position_decodes() {
        let mut bytes = vec![6];
        for v in [10i32, 64, -3] {
            bytes.extend_from_slice(&v.to_be_bytes());
        }
        let InPacket::SpawnPosition(packet) = decode(&bytes).unwrap() else {
            panic!("wrong variant");
        };
        assert_eq!(packet.pos, IVec3::new(10, 64, -3));
    }

    #[test]
    fn player_list_decodes() {
        let mut bytes = vec![201];
        let mut cursor = Cursor::new(&mut bytes);
        cursor.set_position(1);
        cursor.write_wire_string("alice").unwrap();
        cursor.write_wire_bool(true).unwrap();
        cursor.write_wire_short(35).unwrap();
        let InPacket::PlayerList(packet) = decode(&bytes).unwrap() else {
            panic!("wrong variant");
        };
        assert_eq!(packet.name, "alice");
        assert!(packet.online);
        assert_eq!(packet.ping, 35);
    }

    #[test]
    fn truncated_body_is_need_more() {
        // Keep-alive id cut short.
        assert!(matches!(decode(&[0, 0, 0]), Err(DecodeError::Truncated)));
        // Empty buffer as well.
        assert!(matches!(decode(&[]), Err(DecodeError::Truncated)));
    }

    #[test]
    fn unknown_id_is_unsupported() {
        assert!(matches!(decode(&[97]), Err(DecodeError::UnsupportedId(97))));
    }

    #[test]
    fn packets_survive_arbitrary_splits() {

        use crate::stream::RecvBuf;

        let a = OutPacket::KeepAlive(KeepAlivePacket { id: 7 }).encode_to_vec();
        let b = OutPacket::Chat(ChatPacket { message: "hello".to_string() }).encode_to_vec();
        let bytes: Vec<u8> = [a, b].concat();

        for split in 0..=bytes.len() {
            let mut buf = RecvBuf::new();
            let mut decoded = Vec::new();
            for chunk in [&bytes[..split], &bytes[split..]] {
                buf.append(chunk);
                loop {
                    match InPacket::decode(&mut buf) {
                        Ok(packet) => {
                            buf.commit();
                            decoded.push(packet);
                        }
                        Err(DecodeError::Truncated) => {
                            buf.rewind();
                            break;
                        }
                        Err(e) => panic!("unexpected error at split {split}: {e}"),
                    }
                }
            }
            assert_eq!(decoded.len(), 2, "split at {split}");
            assert!(matches!(decoded[0], InPacket::KeepAlive(ref p) if p.id == 7));
            assert!(matches!(decoded[1], InPacket::Chat(ref c) if c.message == "hello"));
        }

    }

    #[test]
    fn chunk_body_is_consumed() {
        let mut bytes = vec![51];
        bytes.extend_from_slice(&5i32.to_be_bytes());
        bytes.extend_from_slice(&0i16.to_be_bytes());
        bytes.extend_from_slice(&7i32.to_be_bytes());
        bytes.extend_from_slice(&[15, 127, 15]);
        bytes.extend_from_slice(&3i32.to_be_bytes());
        bytes.extend_from_slice(&[0xAA, 0xBB, 0xCC]);
        let InPacket::Chunk(packet) = decode(&bytes).unwrap() else {
            panic!("wrong variant");
        };
        assert_eq!((packet.x_size, packet.y_size, packet.z_size), (16, 128, 16));
        assert_eq!(packet.compressed_data, [0xAA, 0xBB, 0xCC]);
    }

}

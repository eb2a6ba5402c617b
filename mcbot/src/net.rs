//! Non-blocking TCP connection to the game server.
//!
//! A [`Connection`] owns the single mio stream of a session: it funnels
//! inbound bytes into a [`RecvBuf`] for the codec, and buffers outbound
//! frames whenever the socket would block, flushing them on the next
//! writable event. Connect completion is deferred: mio reports the socket
//! writable once the connect resolves, and [`try_establish`] tells a
//! successful connect from a refused one.
//!
//! [`try_establish`]: Connection::try_establish

use std::io::{self, Read, Write};
use std::net::SocketAddr;

use mio::net::TcpStream;
use mio::{Interest, Registry, Token};

use crate::proto::OutPacket;
use crate::stream::RecvBuf;


/// Size of the stack chunk used to drain the socket.
const READ_CHUNK: usize = 1024;


/// One in-flight connection to a server.
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    /// Inbound bytes awaiting a full packet.
    recv: RecvBuf,
    /// Outbound bytes the socket has not accepted yet.
    send: Vec<u8>,
    /// True once the connect has resolved successfully.
    established: bool,
}

impl Connection {

    /// Start a non-blocking connect and register the stream for both
    /// readable and writable readiness.
    pub fn open(addr: SocketAddr, registry: &Registry, token: Token) -> io::Result<Self> {
        let mut stream = TcpStream::connect(addr)?;
        registry.register(&mut stream, token, Interest::READABLE | Interest::WRITABLE)?;
        Ok(Self {
            stream,
            recv: RecvBuf::new(),
            send: Vec::new(),
            established: false,
        })
    }

    pub fn established(&self) -> bool {
        self.established
    }

    /// Called on a writable event while the connect is pending. Returns
    /// true exactly once, when the connection is confirmed established;
    /// an error means the connect failed and the connection is dead.
    pub fn try_establish(&mut self) -> io::Result<bool> {

        if self.established {
            return Ok(false);
        }

        if let Some(err) = self.stream.take_error()? {
            return Err(err);
        }

        match self.stream.peer_addr() {
            Ok(_) => {
                self.established = true;
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(false),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(false),
            Err(e) => Err(e),
        }

    }

    /// Drain every byte the socket has to offer into the receive buffer.
    /// Returns true if the peer closed its side.
    pub fn fill(&mut self) -> io::Result<bool> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => return Ok(true),
                Ok(len) => self.recv.append(&chunk[..len]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// The buffer the codec parses packets from.
    pub fn recv_buf(&mut self) -> &mut RecvBuf {
        &mut self.recv
    }

    /// Encode a packet behind any bytes still queued and push as much as
    /// the socket accepts, keeping outbound order total.
    pub fn send(&mut self, packet: &OutPacket) -> io::Result<()> {
        packet.encode(&mut self.send)?;
        self.flush()
    }

    /// Push queued outbound bytes until done or the socket would block.
    pub fn flush(&mut self) -> io::Result<()> {
        while !self.send.is_empty() {
            match self.stream.write(&self.send) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(len) => drop(self.send.drain(..len)),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    pub fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        registry.deregister(&mut self.stream)
    }

}

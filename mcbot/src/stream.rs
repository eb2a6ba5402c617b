//! Inbound byte accumulation with packet-boundary rewind.
//!
//! The server writes packets back to back with no framing length, so a
//! decoder can run out of bytes in the middle of a packet. [`RecvBuf`]
//! keeps a mark at the start of the packet being parsed: the decoder
//! either consumes a whole packet (the caller then [`commit`]s) or hits
//! the end of the buffer (`UnexpectedEof` from the [`Read`] impl), in
//! which case the caller [`rewind`]s and waits for more bytes. Nothing is
//! discarded until a commit.
//!
//! [`commit`]: RecvBuf::commit
//! [`rewind`]: RecvBuf::rewind

use std::io::{self, Read};


/// Growable receive buffer with a parse cursor and a packet mark.
#[derive(Debug, Default)]
pub struct RecvBuf {
    /// Buffered bytes, compacted on commit.
    buf: Vec<u8>,
    /// Current parse position.
    read: usize,
    /// Start of the packet currently being parsed.
    mark: usize,
}

impl RecvBuf {

    pub fn new() -> Self {
        Self::default()
    }

    /// Append freshly received bytes, leaving both cursors in place.
    pub fn append(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Number of unread bytes past the parse cursor.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.read
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Seal the packet that was just parsed: compact everything before the
    /// parse cursor out of the buffer and reset both cursors.
    pub fn commit(&mut self) {
        self.buf.drain(..self.read);
        self.read = 0;
        self.mark = 0;
    }

    /// Abandon the current parse attempt and move the cursor back to the
    /// packet mark.
    pub fn rewind(&mut self) {
        self.read = self.mark;
    }

    /// Drop everything, cursors included. Used when the stream can no
    /// longer be resynchronised (unknown packet id of unknowable length).
    pub fn clear(&mut self) {
        self.buf.clear();
        self.read = 0;
        self.mark = 0;
    }

}

impl Read for RecvBuf {

    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let n = out.len().min(self.remaining());
        out[..n].copy_from_slice(&self.buf[self.read..self.read + n]);
        self.read += n;
        Ok(n)
    }

}


#[cfg(test)]
mod tests {

    use super::*;
    use byteorder::{ReadBytesExt, BE};

    #[test]
    fn commit_compacts() {
        let mut buf = RecvBuf::new();
        buf.append(&[1, 2, 3, 4]);
        assert_eq!(buf.read_u16::<BE>().unwrap(), 0x0102);
        buf.commit();
        assert_eq!(buf.remaining(), 2);
        assert_eq!(buf.read_u16::<BE>().unwrap(), 0x0304);
    }

    #[test]
    fn rewind_restores_packet_start() {
        let mut buf = RecvBuf::new();
        buf.append(&[1, 2, 3]);
        let mut out = [0u8; 2];
        buf.read_exact(&mut out).unwrap();
        assert!(buf.read_u16::<BE>().is_err());
        buf.rewind();
        assert_eq!(buf.remaining(), 3);
        assert_eq!(buf.read_u16::<BE>().unwrap(), 0x0102);
    }

    #[test]
    fn no_bytes_lost_across_split_appends() {
        let mut buf = RecvBuf::new();
        buf.append(&[0x01]);
        assert!(buf.read_u16::<BE>().is_err());
        buf.rewind();
        buf.append(&[0x02]);
        assert_eq!(buf.read_u16::<BE>().unwrap(), 0x0102);
        buf.commit();
        assert!(buf.is_empty());
    }

}

//! Read and write extension traits for the wire protocol's primitive types.
//!
//! All integers and floats are big-endian, strings are a signed 16-bit
//! code-unit count followed by UTF-16 code units.

use byteorder::{ReadBytesExt, WriteBytesExt, BE};
use std::io::{self, Read, Write};


/// Extension trait for reading wire primitives off a stream.
pub trait ReadWireExt: Read {

    #[inline]
    fn read_wire_byte(&mut self) -> io::Result<i8> {
        ReadBytesExt::read_i8(self)
    }

    #[inline]
    fn read_wire_short(&mut self) -> io::Result<i16> {
        ReadBytesExt::read_i16::<BE>(self)
    }

    #[inline]
    fn read_wire_int(&mut self) -> io::Result<i32> {
        ReadBytesExt::read_i32::<BE>(self)
    }

    #[inline]
    fn read_wire_long(&mut self) -> io::Result<i64> {
        ReadBytesExt::read_i64::<BE>(self)
    }

    #[inline]
    fn read_wire_float(&mut self) -> io::Result<f32> {
        ReadBytesExt::read_f32::<BE>(self)
    }

    #[inline]
    fn read_wire_double(&mut self) -> io::Result<f64> {
        ReadBytesExt::read_f64::<BE>(self)
    }

    #[inline]
    fn read_wire_bool(&mut self) -> io::Result<bool> {
        Ok(self.read_wire_byte()? != 0)
    }

    /// Read a length-prefixed UTF-16 string, `max_len` bounding the
    /// code-unit count announced by the prefix.
    fn read_wire_string(&mut self, max_len: usize) -> io::Result<String> {

        let len = self.read_wire_short()?;
        if len < 0 {
            return Err(new_invalid_data_err("negative length string"));
        }

        if len as usize > max_len {
            return Err(new_invalid_data_err("exceeded max string length"));
        }

        let mut units = Vec::with_capacity(len as usize);
        for _ in 0..len {
            units.push(ReadBytesExt::read_u16::<BE>(self)?);
        }

        Ok(char::decode_utf16(units)
            .map(|res| res.unwrap_or(char::REPLACEMENT_CHARACTER))
            .collect())

    }

}

/// Extension trait for writing wire primitives to a stream.
pub trait WriteWireExt: Write {

    #[inline]
    fn write_wire_byte(&mut self, b: i8) -> io::Result<()> {
        WriteBytesExt::write_i8(self, b)
    }

    #[inline]
    fn write_wire_short(&mut self, s: i16) -> io::Result<()> {
        WriteBytesExt::write_i16::<BE>(self, s)
    }

    #[inline]
    fn write_wire_int(&mut self, i: i32) -> io::Result<()> {
        WriteBytesExt::write_i32::<BE>(self, i)
    }

    #[inline]
    fn write_wire_long(&mut self, l: i64) -> io::Result<()> {
        WriteBytesExt::write_i64::<BE>(self, l)
    }

    #[inline]
    fn write_wire_float(&mut self, f: f32) -> io::Result<()> {
        WriteBytesExt::write_f32::<BE>(self, f)
    }

    #[inline]
    fn write_wire_double(&mut self, d: f64) -> io::Result<()> {
        WriteBytesExt::write_f64::<BE>(self, d)
    }

    #[inline]
    fn write_wire_bool(&mut self, b: bool) -> io::Result<()> {
        self.write_wire_byte(b as i8)
    }

    /// Write a length-prefixed UTF-16 string.
    fn write_wire_string(&mut self, s: &str) -> io::Result<()> {

        let len = s.chars().map(|c| c.len_utf16()).sum::<usize>();
        if len > i16::MAX as usize {
            return Err(new_invalid_data_err("string too big"));
        }

        self.write_wire_short(len as i16)?;
        for unit in s.encode_utf16() {
            WriteBytesExt::write_u16::<BE>(self, unit)?;
        }

        Ok(())

    }

}

impl<R: Read> ReadWireExt for R {}
impl<W: Write> WriteWireExt for W {}


fn new_invalid_data_err(message: &'static str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message)
}

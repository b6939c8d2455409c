//! Wire message framing and argument encoding
//!
//! Every message starts with an 8-byte header of two native-endian words:
//! ```text
//! word 0: object id
//! word 1: (size << 16) | opcode      size includes the header
//! ```
//! followed by the arguments, each padded to 32 bits. File descriptors do
//! not appear in the payload; they travel as ancillary data.

use crate::common::{Error, Result};

/// Size of the message header in bytes
pub const HEADER_SIZE: usize = 8;

/// Largest message the protocol allows
pub const MAX_MESSAGE_SIZE: usize = 4096;

/// Signed 24.8 fixed-point number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Fixed(pub i32);

impl Fixed {
    pub fn from_f64(value: f64) -> Self {
        Fixed((value * 256.0).round() as i32)
    }

    pub fn from_int(value: i32) -> Self {
        Fixed(value << 8)
    }

    pub fn to_f64(self) -> f64 {
        f64::from(self.0) / 256.0
    }
}

/// Decoded message header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub object: u32,
    pub opcode: u16,
    pub size: u16,
}

impl FrameHeader {
    /// Parse a header from the start of `buf`, if enough bytes are present
    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        let object = u32::from_ne_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let word = u32::from_ne_bytes([buf[4], buf[5], buf[6], buf[7]]);
        Some(Self {
            object,
            opcode: (word & 0xffff) as u16,
            size: (word >> 16) as u16,
        })
    }

    /// Validate the declared size
    pub fn check(&self) -> Result<()> {
        let size = self.size as usize;
        if size < HEADER_SIZE || size % 4 != 0 {
            return Err(Error::protocol(format!(
                "invalid message size {} for object {}",
                size, self.object
            )));
        }
        Ok(())
    }
}

/// Frame a payload into a complete message
pub fn encode_message(object: u32, opcode: u16, payload: &[u8]) -> Result<Vec<u8>> {
    let size = HEADER_SIZE + payload.len();
    if size > MAX_MESSAGE_SIZE {
        return Err(Error::protocol(format!(
            "message too large: {} bytes (max {})",
            size, MAX_MESSAGE_SIZE
        )));
    }

    let mut message = Vec::with_capacity(size);
    message.extend_from_slice(&object.to_ne_bytes());
    message.extend_from_slice(&(((size as u32) << 16) | u32::from(opcode)).to_ne_bytes());
    message.extend_from_slice(payload);
    Ok(message)
}

/// Split one complete message off the front of `buf`
///
/// Returns `Ok(None)` while the message is still incomplete.
pub fn take_frame(buf: &mut Vec<u8>) -> Result<Option<(FrameHeader, Vec<u8>)>> {
    let Some(header) = FrameHeader::parse(buf) else {
        return Ok(None);
    };
    header.check()?;

    let size = header.size as usize;
    if buf.len() < size {
        return Ok(None);
    }
    let payload = buf[HEADER_SIZE..size].to_vec();
    buf.drain(..size);
    Ok(Some((header, payload)))
}

fn padded(len: usize) -> usize {
    (len + 3) & !3
}

/// Builds a message payload argument by argument
#[derive(Debug, Default)]
pub struct PayloadWriter {
    buf: Vec<u8>,
}

impl PayloadWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_int(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_ne_bytes());
    }

    pub fn put_uint(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_ne_bytes());
    }

    pub fn put_fixed(&mut self, value: Fixed) {
        self.put_int(value.0);
    }

    /// Length (including the terminating NUL), bytes, NUL, padding.
    /// `None` encodes a null string as length 0.
    pub fn put_string(&mut self, value: Option<&str>) {
        match value {
            None => self.put_uint(0),
            Some(s) => {
                let len = s.len() + 1;
                self.put_uint(len as u32);
                self.buf.extend_from_slice(s.as_bytes());
                self.buf.push(0);
                self.pad(len);
            }
        }
    }

    pub fn put_array(&mut self, value: &[u8]) {
        self.put_uint(value.len() as u32);
        self.buf.extend_from_slice(value);
        self.pad(value.len());
    }

    fn pad(&mut self, len: usize) {
        self.buf.resize(self.buf.len() + padded(len) - len, 0);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

/// Reads arguments back out of a payload
#[derive(Debug)]
pub struct PayloadReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self.pos + len;
        if end > self.buf.len() {
            return Err(Error::protocol(format!(
                "truncated payload: need {} bytes at offset {}, have {}",
                len,
                self.pos,
                self.buf.len()
            )));
        }
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    pub fn get_uint(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn get_int(&mut self) -> Result<i32> {
        let b = self.take(4)?;
        Ok(i32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn get_fixed(&mut self) -> Result<Fixed> {
        self.get_int().map(Fixed)
    }

    pub fn get_string(&mut self) -> Result<Option<String>> {
        let len = self.get_uint()? as usize;
        if len == 0 {
            return Ok(None);
        }
        let bytes = self.take(padded(len))?;
        if bytes[len - 1] != 0 {
            return Err(Error::protocol("string argument is not NUL-terminated"));
        }
        String::from_utf8(bytes[..len - 1].to_vec())
            .map(Some)
            .map_err(|e| Error::protocol(format!("string argument is not UTF-8: {}", e)))
    }

    pub fn get_array(&mut self) -> Result<Vec<u8>> {
        let len = self.get_uint()? as usize;
        let bytes = self.take(padded(len))?;
        Ok(bytes[..len].to_vec())
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let msg = encode_message(3, 2, &[0; 4]).unwrap();
        assert_eq!(msg.len(), 12);
        assert_eq!(&msg[0..4], &3u32.to_ne_bytes());
        let header = FrameHeader::parse(&msg).unwrap();
        assert_eq!(
            header,
            FrameHeader {
                object: 3,
                opcode: 2,
                size: 12
            }
        );
    }

    #[test]
    fn test_string_padding() {
        let mut w = PayloadWriter::new();
        w.put_string(Some("abc"));
        // length word + "abc\0"
        assert_eq!(w.len(), 8);

        let mut w = PayloadWriter::new();
        w.put_string(Some("abcd"));
        // length word + "abcd\0" padded to 8
        assert_eq!(w.len(), 12);
    }

    #[test]
    fn test_null_string() {
        let mut w = PayloadWriter::new();
        w.put_string(None);
        let bytes = w.into_inner();
        let mut r = PayloadReader::new(&bytes);
        assert_eq!(r.get_string().unwrap(), None);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn test_mixed_payload() {
        let mut w = PayloadWriter::new();
        w.put_int(-7);
        w.put_array(&[1, 2, 3, 4, 5]);
        w.put_fixed(Fixed::from_f64(15.0));
        w.put_string(Some("wl_seat"));
        let bytes = w.into_inner();

        let mut r = PayloadReader::new(&bytes);
        assert_eq!(r.get_int().unwrap(), -7);
        assert_eq!(r.get_array().unwrap(), vec![1, 2, 3, 4, 5]);
        assert_eq!(r.get_fixed().unwrap().to_f64(), 15.0);
        assert_eq!(r.get_string().unwrap().as_deref(), Some("wl_seat"));
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn test_truncated_payload() {
        let mut r = PayloadReader::new(&[1, 0]);
        assert!(matches!(r.get_uint(), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_take_frame_waits_for_complete_message() {
        let msg = encode_message(1, 0, &[9, 9, 9, 9]).unwrap();
        let mut buf = msg[..10].to_vec();
        assert!(take_frame(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&msg[10..]);
        buf.extend_from_slice(&msg[..3]);
        let (header, payload) = take_frame(&mut buf).unwrap().unwrap();
        assert_eq!(header.object, 1);
        assert_eq!(payload, vec![9, 9, 9, 9]);
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn test_bad_size_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&1u32.to_ne_bytes());
        buf.extend_from_slice(&(6u32 << 16).to_ne_bytes());
        assert!(take_frame(&mut buf).is_err());
    }

    #[test]
    fn test_fixed_conversions() {
        assert_eq!(Fixed::from_int(2).to_f64(), 2.0);
        assert_eq!(Fixed::from_f64(-0.5).0, -128);
    }

    #[test]
    fn test_oversized_message() {
        assert!(encode_message(1, 0, &vec![0; MAX_MESSAGE_SIZE]).is_err());
    }
}

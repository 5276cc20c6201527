//! # Frame
//!
//! RFC 6455 frames as seen by a client.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |         (16 or 64 bits)       |
//! |N|V|V|V|       |S|             |                               |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |        Extended payload length continued, if payload len == 127|
//! +---------------------------------------------------------------+
//! |                               |   Masking-key, if MASK set to 1|
//! +-------------------------------+-------------------------------+
//! |     Masking-key (continued)       |          Payload Data      |
//! +-----------------------------------+ - - - - - - - - - - - - - -+
//! ```
//!
//! No extensions are negotiated by this client, so the RSV bits are always
//! written as zero and rejected when set on inbound frames.

use bytes::{BufMut, Bytes, BytesMut};

use crate::{FrameFault, WireError, close::CloseCode};

/// Largest possible frame header: 2 fixed bytes, 8 length bytes, 4 mask bytes.
pub const MAX_HEAD_SIZE: usize = 14;

/// Largest payload a control frame may carry.
pub const MAX_CONTROL_PAYLOAD: usize = 125;

/// Frame type carried in the low nibble of the first header byte.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OpCode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl OpCode {
    /// Returns `true` for `Close`, `Ping` and `Pong`.
    ///
    /// Control frames cannot be fragmented and carry at most 125 bytes.
    pub fn is_control(&self) -> bool {
        matches!(*self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }
}

impl TryFrom<u8> for OpCode {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x0 => Ok(Self::Continuation),
            0x1 => Ok(Self::Text),
            0x2 => Ok(Self::Binary),
            0x8 => Ok(Self::Close),
            0x9 => Ok(Self::Ping),
            0xA => Ok(Self::Pong),
            _ => Err(FrameFault::UnknownOpCode(value).into()),
        }
    }
}

impl From<OpCode> for u8 {
    fn from(val: OpCode) -> Self {
        match val {
            OpCode::Continuation => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
        }
    }
}

impl<T> From<(OpCode, T)> for Frame
where
    T: Into<Bytes>,
{
    fn from((opcode, payload): (OpCode, T)) -> Self {
        Self::new(true, opcode, None, payload)
    }
}

/// A single frame: header flags plus an unmasked payload.
///
/// The payload is always held unmasked. Masking happens while encoding, using
/// `mask` if one is set (client role sets a fresh random key per frame).
#[derive(Clone, Debug)]
pub struct Frame {
    pub(crate) fin: bool,
    pub(crate) opcode: OpCode,
    pub(crate) mask: Option<[u8; 4]>,
    pub(crate) payload: Bytes,
}

impl Frame {
    /// Creates a final text frame.
    pub fn text(payload: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Text, None, payload)
    }

    /// Creates a final binary frame.
    pub fn binary(payload: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Binary, None, payload)
    }

    pub fn ping(payload: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Ping, None, payload)
    }

    pub fn pong(payload: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Pong, None, payload)
    }

    /// Creates a continuation frame. Use [`Frame::with_fin`] to mark
    /// non-final fragments.
    pub fn continuation(payload: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Continuation, None, payload)
    }

    /// Creates a close frame carrying `code` followed by `reason`.
    pub fn close(code: CloseCode, reason: impl AsRef<[u8]>) -> Self {
        let reason = reason.as_ref();
        let mut payload = BytesMut::with_capacity(2 + reason.len());
        payload.put_u16(u16::from(code));
        payload.extend_from_slice(reason);
        Self::new(true, OpCode::Close, None, payload.freeze())
    }

    pub fn new(fin: bool, opcode: OpCode, mask: Option<[u8; 4]>, payload: impl Into<Bytes>) -> Self {
        Self {
            fin,
            opcode,
            mask,
            payload: payload.into(),
        }
    }

    #[must_use]
    pub fn with_fin(mut self, fin: bool) -> Self {
        self.fin = fin;
        self
    }

    #[must_use]
    pub fn with_mask(mut self, mask: [u8; 4]) -> Self {
        self.mask = Some(mask);
        self
    }

    #[inline(always)]
    pub fn opcode(&self) -> OpCode {
        self.opcode
    }

    #[inline(always)]
    pub fn is_fin(&self) -> bool {
        self.fin
    }

    #[inline(always)]
    pub fn mask(&self) -> Option<[u8; 4]> {
        self.mask
    }

    #[inline(always)]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    #[inline(always)]
    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    #[inline(always)]
    pub fn into_parts(self) -> (OpCode, bool, Bytes) {
        (self.opcode, self.fin, self.payload)
    }

    /// Status code of a close frame, if the payload carries one.
    pub fn close_code(&self) -> Option<CloseCode> {
        let bytes = self.payload.get(0..2)?;
        Some(CloseCode::from(u16::from_be_bytes([bytes[0], bytes[1]])))
    }

    /// Reason text of a close frame, `None` when the payload is empty.
    pub fn close_reason(&self) -> Result<Option<&str>, WireError> {
        if self.payload.is_empty() {
            return Ok(None);
        }

        let reason = self.payload.get(2..).ok_or(WireError::InvalidUtf8)?;
        std::str::from_utf8(reason)
            .map(Some)
            .map_err(|_| WireError::InvalidUtf8)
    }

    #[inline]
    pub(crate) fn set_random_mask_if_not_set(&mut self) {
        if self.mask.is_none() {
            self.mask = Some(rand::random());
        }
    }

    /// Writes the frame header (including the mask key, if any) into `dst`.
    pub(crate) fn write_head(&self, dst: &mut BytesMut) {
        let first_byte = (self.fin as u8) << 7 | u8::from(self.opcode);
        let mask_bit = if self.mask.is_some() { 0x80 } else { 0 };

        let len = self.payload.len();
        dst.put_u8(first_byte);
        if len < 126 {
            dst.put_u8(len as u8 | mask_bit);
        } else if len <= u16::MAX as usize {
            dst.put_u8(126 | mask_bit);
            dst.put_u16(len as u16);
        } else {
            dst.put_u8(127 | mask_bit);
            dst.put_u64(len as u64);
        }

        if let Some(mask) = self.mask {
            dst.put_slice(&mask);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_control() {
        assert!(OpCode::Close.is_control());
        assert!(OpCode::Ping.is_control());
        assert!(OpCode::Pong.is_control());

        assert!(!OpCode::Continuation.is_control());
        assert!(!OpCode::Text.is_control());
        assert!(!OpCode::Binary.is_control());
    }

    #[test]
    fn test_opcode_from_u8() {
        for code in [0x0u8, 0x1, 0x2, 0x8, 0x9, 0xA] {
            let opcode = OpCode::try_from(code).unwrap();
            assert_eq!(u8::from(opcode), code);
        }
        for code in [0x3u8, 0x4, 0x5, 0x6, 0x7, 0xB, 0xC, 0xD, 0xE, 0xF] {
            assert!(matches!(
                OpCode::try_from(code),
                Err(WireError::MalformedFrame(FrameFault::UnknownOpCode(c))) if c == code
            ));
        }
    }

    #[test]
    fn test_close_frame_layout() {
        let frame = Frame::close(CloseCode::Normal, "bye");
        assert_eq!(frame.opcode(), OpCode::Close);
        assert_eq!(frame.payload().as_ref(), &[0x03, 0xE8, b'b', b'y', b'e']);
        assert_eq!(frame.close_code(), Some(CloseCode::Normal));
        assert_eq!(frame.close_reason().unwrap(), Some("bye"));

        let empty = Frame::new(true, OpCode::Close, None, Bytes::new());
        assert!(empty.close_code().is_none());
        assert!(empty.close_reason().unwrap().is_none());
    }

    #[test]
    fn test_write_head_length_forms() {
        let cases = [(0usize, 2usize), (125, 2), (126, 4), (65_535, 4), (65_536, 10)];
        for (len, head_len) in cases {
            let frame = Frame::binary(vec![0u8; len]);
            let mut dst = BytesMut::new();
            frame.write_head(&mut dst);
            assert_eq!(dst.len(), head_len, "payload length {len}");
            assert_eq!(dst[0], 0x82);
        }
    }

    #[test]
    fn test_write_head_masked() {
        let frame = Frame::text("hi").with_mask([1, 2, 3, 4]);
        let mut dst = BytesMut::new();
        frame.write_head(&mut dst);
        assert_eq!(dst.as_ref(), &[0x81, 0x82, 1, 2, 3, 4]);
    }

    #[test]
    fn test_fragment_flags() {
        let first = Frame::text("par").with_fin(false);
        let last = Frame::continuation("tial");
        assert!(!first.is_fin());
        assert!(last.is_fin());
        assert_eq!(last.opcode(), OpCode::Continuation);
    }
}

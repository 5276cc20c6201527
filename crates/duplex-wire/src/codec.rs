//! # codec
//!
//! Byte-level encoding and decoding of frames.
//!
//! Decoding happens in two stages so that slow transports can deliver a
//! frame in arbitrarily small pieces:
//!
//! 1. [`FrameHeader::parse`] consumes exactly one header once enough bytes
//!    are buffered (2 to 14 bytes depending on length form and mask).
//! 2. The [`Decoder`] remembers that header and waits until
//!    `payload_len` bytes have arrived, then unmasks and yields the [`Frame`].
//!
//! The codec operates on single frames. Fragment reassembly, UTF-8
//! validation of text messages and ping/close replies belong to the
//! connection layer above.

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec;

use crate::{
    FrameFault, Role, WireError, WireResult,
    frame::{Frame, MAX_CONTROL_PAYLOAD, MAX_HEAD_SIZE, OpCode},
    mask::apply_mask,
};

/// A parsed frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub fin: bool,
    pub opcode: OpCode,
    pub mask: Option<[u8; 4]>,
    pub payload_len: usize,
}

impl FrameHeader {
    /// Parses one header from the front of `src`.
    ///
    /// Returns `Ok(None)` without consuming anything while the header is
    /// incomplete. On success the header bytes are removed from `src` and the
    /// payload is left in place for the caller.
    ///
    /// # Errors
    ///
    /// [`WireError::MalformedFrame`] when a reserved bit is set, the opcode is
    /// unknown, a control frame is fragmented or oversized, or the declared
    /// length exceeds `max_payload`.
    pub fn parse(src: &mut BytesMut, max_payload: usize) -> WireResult<Option<Self>> {
        if src.len() < 2 {
            return Ok(None);
        }

        let fin = src[0] & 0b1000_0000 != 0;
        if src[0] & 0b0111_0000 != 0 {
            return Err(FrameFault::ReservedBits.into());
        }

        let opcode = OpCode::try_from(src[0] & 0b0000_1111)?;
        let masked = src[1] & 0b1000_0000 != 0;
        let length_code = src[1] & 0x7F;

        let extra = match length_code {
            126 => 2,
            127 => 8,
            _ => 0,
        };
        let header_size = 2 + extra + if masked { 4 } else { 0 };
        if src.len() < header_size {
            return Ok(None);
        }

        let declared = match extra {
            0 => u64::from(length_code),
            2 => u64::from(u16::from_be_bytes([src[2], src[3]])),
            _ => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&src[2..10]);
                u64::from_be_bytes(raw)
            }
        };

        if opcode.is_control() {
            if !fin {
                return Err(FrameFault::FragmentedControl.into());
            }
            if declared > MAX_CONTROL_PAYLOAD as u64 {
                return Err(FrameFault::ControlTooLarge(declared as usize).into());
            }
        }

        let payload_len = match usize::try_from(declared) {
            Ok(len) if len <= max_payload => len,
            _ => {
                return Err(FrameFault::LengthOverflow {
                    len: declared,
                    max: max_payload,
                }
                .into());
            }
        };

        let mask = masked.then(|| {
            let at = 2 + extra;
            [src[at], src[at + 1], src[at + 2], src[at + 3]]
        });

        src.advance(header_size);

        Ok(Some(Self {
            fin,
            opcode,
            mask,
            payload_len,
        }))
    }
}

/// A combined encoder/decoder for one side of a connection.
#[derive(Debug)]
pub struct Codec {
    decoder: Decoder,
    encoder: Encoder,
}

impl Codec {
    pub fn new(role: Role, max_payload_size: usize) -> Self {
        Self {
            decoder: Decoder::new(max_payload_size),
            encoder: Encoder::new(role),
        }
    }

    /// Drops any half-decoded frame. Call when the underlying stream is
    /// replaced.
    pub fn reset(&mut self) {
        self.decoder.state = None;
    }
}

impl codec::Decoder for Codec {
    type Item = Frame;
    type Error = WireError;

    #[inline]
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        self.decoder.decode(src)
    }
}

impl codec::Encoder<Frame> for Codec {
    type Error = WireError;

    #[inline]
    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        self.encoder.encode(item, dst)
    }
}

/// Stateful frame decoder.
///
/// Holds the header of a frame whose payload has not fully arrived yet.
#[derive(Debug)]
pub struct Decoder {
    state: Option<FrameHeader>,
    max_payload_size: usize,
}

impl Decoder {
    pub fn new(max_payload_size: usize) -> Self {
        Self {
            state: None,
            max_payload_size,
        }
    }
}

impl codec::Decoder for Decoder {
    type Item = Frame;
    type Error = WireError;

    /// Returns `Ok(Some(frame))` once a whole frame is buffered, `Ok(None)`
    /// when more bytes are needed.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let header = match self.state.take() {
            Some(header) => header,
            None => match FrameHeader::parse(src, self.max_payload_size)? {
                Some(header) => header,
                None => return Ok(None),
            },
        };

        if src.len() < header.payload_len {
            src.reserve(header.payload_len - src.len());
            self.state = Some(header);
            return Ok(None);
        }

        let mut payload = src.split_to(header.payload_len);
        if let Some(mask) = header.mask {
            apply_mask(&mut payload, mask);
        }

        Ok(Some(Frame::new(
            header.fin,
            header.opcode,
            header.mask,
            payload.freeze(),
        )))
    }
}

/// Frame encoder.
///
/// In the client role every frame gets a fresh random mask key unless one is
/// already set; in the server role frames are always sent unmasked.
#[derive(Debug)]
pub struct Encoder {
    role: Role,
}

impl Encoder {
    pub fn new(role: Role) -> Self {
        Self { role }
    }
}

impl codec::Encoder<Frame> for Encoder {
    type Error = WireError;

    fn encode(&mut self, mut frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if frame.opcode.is_control() {
            if !frame.fin {
                return Err(FrameFault::FragmentedControl.into());
            }
            if frame.payload.len() > MAX_CONTROL_PAYLOAD {
                return Err(FrameFault::ControlTooLarge(frame.payload.len()).into());
            }
        }

        match self.role {
            Role::Client => frame.set_random_mask_if_not_set(),
            Role::Server => frame.mask = None,
        }

        dst.reserve(MAX_HEAD_SIZE + frame.payload.len());
        frame.write_head(dst);

        let index = dst.len();
        dst.extend_from_slice(&frame.payload);
        if let Some(mask) = frame.mask {
            apply_mask(&mut dst[index..], mask);
        }

        Ok(())
    }
}

/// Encodes a single final frame into `dst`.
///
/// With `mask` set the frame is written as a client frame with a fresh
/// random key; otherwise it is written unmasked.
pub fn encode(
    opcode: OpCode,
    payload: impl Into<Bytes>,
    mask: bool,
    dst: &mut BytesMut,
) -> WireResult<()> {
    let role = if mask { Role::Client } else { Role::Server };
    codec::Encoder::encode(
        &mut Encoder::new(role),
        Frame::new(true, opcode, None, payload),
        dst,
    )
}

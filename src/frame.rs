//! The on-wire representation of frames.
//!
//! Frames have a fixed size that is determined by the configured payload capacity, and all
//!  numbers are in network byte order (BE):
//!
//! ```ascii
//! 0: source endpoint id (u16)
//! 2: destination endpoint id (u16)
//! 4: sequence number (u16)
//! 6: flag (u8): 0 = DATA, 1 = ACK
//! 7: payload length (u16)
//! 9: payload, zero padded to the payload capacity
//! *: checksum (u32): CRC-32 over everything before it
//! ```
//!
//! Nothing in a frame is trusted before its checksum was verified - a corrupted destination
//!  field is as likely as a corrupted payload.

use std::fmt::{Debug, Formatter};
use std::mem::size_of;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use crc::Crc;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use crate::error::ArqError;
use crate::seq_no::SeqNo;

const CRC_32: Crc<u32> = Crc::<u32>::new(&crc::CRC_32_ISO_HDLC);

#[derive(Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct EndpointId(pub u16);
impl Debug for EndpointId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "<{}>", self.0)
    }
}

#[derive(Clone, Copy, Eq, PartialEq)]
pub struct Checksum(pub u32);
impl Debug for Checksum {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:08x?}", self.0)
    }
}
impl Checksum {
    pub fn of(buf: &[u8]) -> Checksum {
        Checksum(CRC_32.checksum(buf))
    }
}

#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, TryFromPrimitive, IntoPrimitive)]
enum FrameFlag {
    Data = 0,
    Ack = 1,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum FrameKind {
    Data(Bytes),
    Ack,
}
impl FrameKind {
    fn flag(&self) -> FrameFlag {
        match self {
            FrameKind::Data(_) => FrameFlag::Data,
            FrameKind::Ack => FrameFlag::Ack,
        }
    }
}

/// A frame is immutable once it is built: its checksum is calculated by the [FrameCodec] that
///  creates it, or read from the wire when it is deserialized.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Frame {
    src: EndpointId,
    dst: EndpointId,
    seq: SeqNo,
    kind: FrameKind,
    checksum: Checksum,
}
impl Frame {
    pub fn src(&self) -> EndpointId {
        self.src
    }

    pub fn dst(&self) -> EndpointId {
        self.dst
    }

    pub fn seq(&self) -> SeqNo {
        self.seq
    }

    pub fn kind(&self) -> &FrameKind {
        &self.kind
    }

    pub fn checksum(&self) -> Checksum {
        self.checksum
    }

    pub fn is_ack(&self) -> bool {
        matches!(self.kind, FrameKind::Ack)
    }

    pub fn payload(&self) -> Option<&Bytes> {
        match &self.kind {
            FrameKind::Data(payload) => Some(payload),
            FrameKind::Ack => None,
        }
    }

    /// for simulating frames that were damaged after their checksum was calculated
    #[cfg(test)]
    pub(crate) fn with_checksum(mut self, checksum: Checksum) -> Frame {
        self.checksum = checksum;
        self
    }
}


/// Serialization and validation of frames for a given payload capacity. This is pure data
///  transformation without any I/O.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct FrameCodec {
    payload_capacity: usize,
}
impl FrameCodec {
    pub const HEADER_LEN: usize = 2 * size_of::<u16>() + size_of::<u16>() + size_of::<u8>() + size_of::<u16>();
    pub const CHECKSUM_LEN: usize = size_of::<u32>();

    pub fn new(payload_capacity: usize) -> FrameCodec {
        assert!(payload_capacity <= u16::MAX as usize, "payload length must fit into the u16 length field");
        FrameCodec { payload_capacity }
    }

    pub fn payload_capacity(&self) -> usize {
        self.payload_capacity
    }

    /// the length of every serialized frame
    pub fn frame_len(&self) -> usize {
        Self::HEADER_LEN + self.payload_capacity + Self::CHECKSUM_LEN
    }

    pub fn check_payload_len(&self, len: usize) -> Result<(), ArqError> {
        if len > self.payload_capacity {
            return Err(ArqError::PayloadTooLarge { len, capacity: self.payload_capacity });
        }
        Ok(())
    }

    pub fn data_frame(&self, src: EndpointId, dst: EndpointId, seq: SeqNo, payload: Bytes) -> Result<Frame, ArqError> {
        self.check_payload_len(payload.len())?;
        Ok(self.with_fresh_checksum(src, dst, seq, FrameKind::Data(payload)))
    }

    pub fn ack_frame(&self, src: EndpointId, dst: EndpointId, seq: SeqNo) -> Frame {
        self.with_fresh_checksum(src, dst, seq, FrameKind::Ack)
    }

    fn with_fresh_checksum(&self, src: EndpointId, dst: EndpointId, seq: SeqNo, kind: FrameKind) -> Frame {
        let mut frame = Frame {
            src,
            dst,
            seq,
            kind,
            checksum: Checksum(0),
        };
        frame.checksum = self.calc_checksum(&frame);
        frame
    }

    fn ser_without_checksum(&self, frame: &Frame, buf: &mut BytesMut) {
        buf.put_u16(frame.src.0);
        buf.put_u16(frame.dst.0);
        buf.put_u16(frame.seq.to_raw());
        buf.put_u8(frame.kind.flag().into());

        let payload: &[u8] = match &frame.kind {
            FrameKind::Data(payload) => payload,
            FrameKind::Ack => &[],
        };
        debug_assert!(payload.len() <= self.payload_capacity);
        buf.put_u16(payload.len() as u16);
        buf.put_slice(payload);
        buf.put_bytes(0, self.payload_capacity - payload.len());
    }

    fn calc_checksum(&self, frame: &Frame) -> Checksum {
        let mut buf = BytesMut::with_capacity(self.frame_len());
        self.ser_without_checksum(frame, &mut buf);
        Checksum::of(&buf)
    }

    /// The checksum is recalculated from the frame's fields rather than taken from the frame,
    ///  so the bytes on the wire always carry a checksum that matches their contents.
    pub fn serialize(&self, frame: &Frame) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.frame_len());
        self.ser_without_checksum(frame, &mut buf);
        let checksum = Checksum::of(&buf);
        buf.put_u32(checksum.0);

        debug_assert_eq!(buf.len(), self.frame_len());
        buf.freeze()
    }

    /// Parses a frame, verifying the checksum over the raw bytes before looking at any of
    ///  the fields.
    pub fn deserialize(&self, raw: &[u8]) -> Result<Frame, ArqError> {
        if raw.len() != self.frame_len() {
            return Err(ArqError::CorruptLayout(format!("frame has {} bytes, expected {}", raw.len(), self.frame_len())));
        }

        let (mut body, mut checksum_buf) = raw.split_at(raw.len() - Self::CHECKSUM_LEN);
        let checksum = Checksum(checksum_buf.get_u32());
        if Checksum::of(body) != checksum {
            return Err(ArqError::CorruptFrame);
        }

        let src = EndpointId(body.get_u16());
        let dst = EndpointId(body.get_u16());
        let seq = SeqNo::from_raw(body.get_u16());
        let raw_flag = body.get_u8();
        let payload_len = body.get_u16() as usize;

        let flag = FrameFlag::try_from(raw_flag)
            .map_err(|_| ArqError::CorruptLayout(format!("unknown frame flag {}", raw_flag)))?;
        if payload_len > self.payload_capacity {
            return Err(ArqError::CorruptLayout(format!("payload length {} exceeds capacity {}", payload_len, self.payload_capacity)));
        }

        let kind = match flag {
            FrameFlag::Data => FrameKind::Data(Bytes::copy_from_slice(&body[..payload_len])),
            FrameFlag::Ack => FrameKind::Ack,
        };

        Ok(Frame {
            src,
            dst,
            seq,
            kind,
            checksum,
        })
    }

    /// recalculates the checksum from all other fields and compares it to the frame's checksum
    pub fn is_corrupt(&self, frame: &Frame) -> bool {
        if let FrameKind::Data(payload) = &frame.kind {
            if payload.len() > self.payload_capacity {
                return true;
            }
        }
        self.calc_checksum(frame) != frame.checksum
    }
}

//! Wire format of the stream-framed transport.
//!
//! Every fragment, notification and init record travels as a fixed header
//! followed by its payload:
//!
//! ```text
//! ┌───────┬──────┬───────┬────────┬──────┬────────┬───────┬───────┬───────┬──────────┬────────┐
//! │ Magic │ Kind │ Flags │ Policy │ Rsvd │ Stream │  SSN  │ PPID  │  TSN  │ PR value │ Length │
//! │  (4)  │ (1)  │  (1)  │  (1)   │ (1)  │  (2)   │  (2)  │  (4)  │  (4)  │   (4)    │  (4)   │
//! └───────┴──────┴───────┴────────┴──────┴────────┴───────┴───────┴───────┴──────────┴────────┘
//! ```
//!
//! All integers are big-endian. The magic is `0x53435446` ("SCTF").
//!
//! # Examples
//!
//! ```
//! use sctperf::frame::{FrameHeader, FrameKind};
//!
//! let header = FrameHeader::data(3, 7, 0x27, 11, true, false, 2, 100, 1024);
//! let bytes = header.to_bytes();
//! let parsed = FrameHeader::from_bytes(&bytes).expect("valid header");
//!
//! assert_eq!(parsed.kind, FrameKind::Data);
//! assert_eq!(parsed.stream, 3);
//! assert!(parsed.is_end_of_record());
//! ```

use crate::{Error, Result};

/// Magic marker identifying framed-transport records
pub const FRAME_MAGIC: u32 = 0x53435446;

/// Flag: this fragment completes its message
pub const FLAG_END_OF_RECORD: u8 = 0x01;

/// Flag: the message is delivered unordered
pub const FLAG_UNORDERED: u8 = 0x02;

/// Largest payload a single record may carry.
pub const MAX_FRAME_PAYLOAD: u32 = 1 << 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// A fragment of application data
    Data,
    /// A transport notification for the peer application
    Notification,
    /// Association setup, sent once by the connecting side
    Init,
}

impl FrameKind {
    fn to_u8(self) -> u8 {
        match self {
            FrameKind::Data => 0,
            FrameKind::Notification => 1,
            FrameKind::Init => 2,
        }
    }

    fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(FrameKind::Data),
            1 => Some(FrameKind::Notification),
            2 => Some(FrameKind::Init),
            _ => None,
        }
    }
}

/// Record header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub kind: FrameKind,
    pub flags: u8,
    pub policy: u8,
    pub stream: u16,
    pub ssn: u16,
    pub ppid: u32,
    pub tsn: u32,
    pub pr_value: u32,
    pub length: u32,
}

impl FrameHeader {
    /// Size of the header in bytes
    pub const SIZE: usize = 28;

    #[allow(clippy::too_many_arguments)]
    pub fn data(
        stream: u16,
        ssn: u16,
        ppid: u32,
        tsn: u32,
        end_of_record: bool,
        unordered: bool,
        policy: u8,
        pr_value: u32,
        length: u32,
    ) -> Self {
        let mut flags = 0;
        if end_of_record {
            flags |= FLAG_END_OF_RECORD;
        }
        if unordered {
            flags |= FLAG_UNORDERED;
        }
        Self {
            kind: FrameKind::Data,
            flags,
            policy,
            stream,
            ssn,
            ppid,
            tsn,
            pr_value,
            length,
        }
    }

    pub fn notification(length: u32) -> Self {
        Self::control(FrameKind::Notification, length)
    }

    pub fn init() -> Self {
        Self::control(FrameKind::Init, InitChunk::SIZE as u32)
    }

    fn control(kind: FrameKind, length: u32) -> Self {
        Self {
            kind,
            flags: 0,
            policy: 0,
            stream: 0,
            ssn: 0,
            ppid: 0,
            tsn: 0,
            pr_value: 0,
            length,
        }
    }

    pub fn is_data(&self) -> bool {
        self.kind == FrameKind::Data
    }

    pub fn is_end_of_record(&self) -> bool {
        self.flags & FLAG_END_OF_RECORD != 0
    }

    pub fn is_unordered(&self) -> bool {
        self.flags & FLAG_UNORDERED != 0
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..4].copy_from_slice(&FRAME_MAGIC.to_be_bytes());
        bytes[4] = self.kind.to_u8();
        bytes[5] = self.flags;
        bytes[6] = self.policy;
        bytes[8..10].copy_from_slice(&self.stream.to_be_bytes());
        bytes[10..12].copy_from_slice(&self.ssn.to_be_bytes());
        bytes[12..16].copy_from_slice(&self.ppid.to_be_bytes());
        bytes[16..20].copy_from_slice(&self.tsn.to_be_bytes());
        bytes[20..24].copy_from_slice(&self.pr_value.to_be_bytes());
        bytes[24..28].copy_from_slice(&self.length.to_be_bytes());
        bytes
    }

    /// Parses and validates a header.
    ///
    /// # Errors
    ///
    /// Returns `Error::Protocol` on a short buffer, a wrong magic, an unknown
    /// kind or an oversized payload length.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::SIZE {
            return Err(Error::Protocol(format!(
                "short frame header: {} bytes",
                bytes.len()
            )));
        }

        let magic = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        if magic != FRAME_MAGIC {
            return Err(Error::Protocol(format!("bad frame magic 0x{:08x}", magic)));
        }
        let kind = FrameKind::from_u8(bytes[4])
            .ok_or_else(|| Error::Protocol(format!("unknown frame kind {}", bytes[4])))?;
        let length = u32::from_be_bytes([bytes[24], bytes[25], bytes[26], bytes[27]]);
        if length > MAX_FRAME_PAYLOAD {
            return Err(Error::Protocol(format!("frame payload too large: {}", length)));
        }

        Ok(Self {
            kind,
            flags: bytes[5],
            policy: bytes[6],
            stream: u16::from_be_bytes([bytes[8], bytes[9]]),
            ssn: u16::from_be_bytes([bytes[10], bytes[11]]),
            ppid: u32::from_be_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]),
            tsn: u32::from_be_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]),
            pr_value: u32::from_be_bytes([bytes[20], bytes[21], bytes[22], bytes[23]]),
            length,
        })
    }
}

/// Payload of the init record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitChunk {
    /// Number of outbound streams the connecting side will use
    pub streams: u16,
    /// Adaptation layer indication, zero when unset
    pub adaptation: u32,
}

impl InitChunk {
    pub const SIZE: usize = 8;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..2].copy_from_slice(&self.streams.to_be_bytes());
        bytes[4..8].copy_from_slice(&self.adaptation.to_be_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::SIZE {
            return Err(Error::Protocol("short init chunk".to_string()));
        }
        let streams = u16::from_be_bytes([bytes[0], bytes[1]]);
        if streams == 0 {
            return Err(Error::Protocol("init chunk with zero streams".to_string()));
        }
        Ok(Self {
            streams,
            adaptation: u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        })
    }
}

/// Notification type carried in the first two bytes of a notification
/// payload: the peer's adaptation layer indication.
pub const NOTIFY_ADAPTATION_INDICATION: u16 = 0x8006;

/// Encodes an adaptation indication notification.
pub fn adaptation_notification(adaptation: u32) -> Vec<u8> {
    let mut body = Vec::with_capacity(8);
    body.extend_from_slice(&NOTIFY_ADAPTATION_INDICATION.to_be_bytes());
    body.extend_from_slice(&8u16.to_be_bytes());
    body.extend_from_slice(&adaptation.to_be_bytes());
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_serialization() {
        let header = FrameHeader::data(9, 300, 39, 0xdead_beef, false, true, 1, 250, 4096);
        let parsed = FrameHeader::from_bytes(&header.to_bytes()).expect("valid header");

        assert_eq!(parsed, header);
        assert!(parsed.is_unordered());
        assert!(!parsed.is_end_of_record());
    }

    #[test]
    fn test_invalid_magic() {
        let mut bytes = FrameHeader::init().to_bytes();
        bytes[0] = 0;
        assert!(matches!(
            FrameHeader::from_bytes(&bytes),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn test_short_header() {
        assert!(FrameHeader::from_bytes(&[0u8; 10]).is_err());
    }

    #[test]
    fn test_unknown_kind() {
        let mut bytes = FrameHeader::notification(4).to_bytes();
        bytes[4] = 42;
        assert!(FrameHeader::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_oversized_length() {
        let bytes = FrameHeader::notification(MAX_FRAME_PAYLOAD + 1).to_bytes();
        assert!(FrameHeader::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_init_chunk() {
        let chunk = InitChunk {
            streams: 16,
            adaptation: 7,
        };
        assert_eq!(InitChunk::from_bytes(&chunk.to_bytes()).unwrap(), chunk);

        let zero = InitChunk {
            streams: 0,
            adaptation: 0,
        };
        assert!(InitChunk::from_bytes(&zero.to_bytes()).is_err());
    }

    #[test]
    fn test_adaptation_notification_layout() {
        let body = adaptation_notification(0x0102_0304);
        assert_eq!(body.len(), 8);
        assert_eq!(&body[0..2], &NOTIFY_ADAPTATION_INDICATION.to_be_bytes());
        assert_eq!(&body[4..8], &[1, 2, 3, 4]);
    }

    #[cfg(test)]
    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_data_header_roundtrip(
                stream in any::<u16>(),
                ssn in any::<u16>(),
                ppid in any::<u32>(),
                tsn in any::<u32>(),
                eor in any::<bool>(),
                unordered in any::<bool>(),
                policy in 0u8..4,
                pr_value in any::<u32>(),
                length in 0u32..=MAX_FRAME_PAYLOAD,
            ) {
                let header = FrameHeader::data(stream, ssn, ppid, tsn, eor, unordered, policy, pr_value, length);
                let parsed = FrameHeader::from_bytes(&header.to_bytes()).unwrap();
                prop_assert_eq!(parsed, header);
                prop_assert_eq!(parsed.is_end_of_record(), eor);
                prop_assert_eq!(parsed.is_unordered(), unordered);
            }
        }
    }
}

use crate::error::{ParseErrorKind, Result, RtspError};

const FIXED_HEADER_BYTES: usize = 12;

/// Read-only view of an RTP packet (RFC 3550 §5.1).
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |V=2|P|X|  CC   |M|     PT      |       Sequence Number         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           Timestamp                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                             SSRC                              |
/// +=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+
/// |                  CSRC list (CC × 32 bits)                     |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |  profile (if X)               |  length in 32-bit words       |
/// |                       extension words                         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// The payload is everything after the CSRC list and the extension.
/// Padding is not stripped.
#[derive(Debug, Clone, Copy)]
pub struct RtpPacket<'a> {
    data: &'a [u8],
    payload_offset: usize,
}

/// Header extension (RFC 3550 §5.3.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpExtension<'a> {
    pub profile: u16,
    pub data: &'a [u8],
}

impl<'a> RtpPacket<'a> {
    /// Validate the header lengths and wrap `data`.
    pub fn new(data: &'a [u8]) -> Result<Self> {
        if data.len() < FIXED_HEADER_BYTES {
            return Err(RtspError::parse(ParseErrorKind::TruncatedRtp));
        }
        let mut payload_offset = FIXED_HEADER_BYTES + (data[0] & 0x0f) as usize * 4;
        if data[0] & 0x10 != 0 {
            if data.len() < payload_offset + 4 {
                return Err(RtspError::parse(ParseErrorKind::TruncatedRtp));
            }
            let words = u16::from_be_bytes([data[payload_offset + 2], data[payload_offset + 3]]);
            payload_offset += 4 + words as usize * 4;
        }
        if data.len() < payload_offset {
            return Err(RtspError::parse(ParseErrorKind::TruncatedRtp));
        }
        Ok(Self {
            data,
            payload_offset,
        })
    }

    pub fn version(&self) -> u8 {
        self.data[0] >> 6
    }

    pub fn padding(&self) -> bool {
        self.data[0] & 0x20 != 0
    }

    pub fn extension(&self) -> bool {
        self.data[0] & 0x10 != 0
    }

    pub fn csrc_count(&self) -> u8 {
        self.data[0] & 0x0f
    }

    /// Set on the last packet of an access unit.
    pub fn marker(&self) -> bool {
        self.data[1] & 0x80 != 0
    }

    pub fn payload_type(&self) -> u8 {
        self.data[1] & 0x7f
    }

    pub fn sequence_number(&self) -> u16 {
        u16::from_be_bytes([self.data[2], self.data[3]])
    }

    pub fn timestamp(&self) -> u32 {
        u32::from_be_bytes([self.data[4], self.data[5], self.data[6], self.data[7]])
    }

    pub fn ssrc(&self) -> u32 {
        u32::from_be_bytes([self.data[8], self.data[9], self.data[10], self.data[11]])
    }

    /// Contributing source at `rank`, if present.
    pub fn csrc(&self, rank: usize) -> Option<u32> {
        if rank >= self.csrc_count() as usize {
            return None;
        }
        let at = FIXED_HEADER_BYTES + rank * 4;
        Some(u32::from_be_bytes([
            self.data[at],
            self.data[at + 1],
            self.data[at + 2],
            self.data[at + 3],
        ]))
    }

    pub fn extension_header(&self) -> Option<RtpExtension<'a>> {
        if !self.extension() {
            return None;
        }
        let at = FIXED_HEADER_BYTES + self.csrc_count() as usize * 4;
        Some(RtpExtension {
            profile: u16::from_be_bytes([self.data[at], self.data[at + 1]]),
            data: &self.data[at + 4..self.payload_offset],
        })
    }

    /// Offset of the first payload byte.
    pub fn payload_offset(&self) -> usize {
        self.payload_offset
    }

    pub fn payload(&self) -> &'a [u8] {
        &self.data[self.payload_offset..]
    }
}

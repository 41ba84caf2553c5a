//! RTCP packet parsing (RFC 3550 §6).
//!
//! Every packet starts with the common header:
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |V=2|P|  count  |      PT       |   length (words minus one)    |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! `count` is the report/source count, or the subtype for APP packets.

use crate::error::{ParseErrorKind, Result, RtspError};

pub const SENDER_REPORT: u8 = 200;
pub const RECEIVER_REPORT: u8 = 201;
pub const SOURCE_DESCRIPTION: u8 = 202;
pub const BYE: u8 = 203;
pub const APP: u8 = 204;

/// SDES item type of private extensions (RFC 3550 §6.5.8).
const SDES_PRIV: u8 = 8;

/// Seconds between the NTP epoch (1900) and the Unix epoch (1970).
const NTP_UNIX_OFFSET: f64 = 2_208_988_800.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtcpHeader {
    pub version: u8,
    pub padding: bool,
    pub count: u8,
    pub packet_type: u8,
    /// Packet length in 32-bit words minus one.
    pub length: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportBlock {
    pub ssrc: u32,
    pub fraction_lost: u8,
    /// 24-bit cumulative number of packets lost.
    pub packets_lost: u32,
    pub highest_sequence: u32,
    pub jitter: u32,
    pub last_sr: u32,
    pub delay_since_last_sr: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderReport {
    pub header: RtcpHeader,
    pub ssrc: u32,
    pub ntp_most: u32,
    pub ntp_least: u32,
    pub rtp_timestamp: u32,
    pub packet_count: u32,
    pub octet_count: u32,
    pub reports: Vec<ReportBlock>,
}

impl SenderReport {
    /// Wall-clock time of the report, milliseconds since the Unix epoch.
    pub fn ntp_millis(&self) -> f64 {
        ntp_to_millis(self.ntp_most, self.ntp_least)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiverReport {
    pub header: RtcpHeader,
    pub ssrc: u32,
    pub reports: Vec<ReportBlock>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SdesItem {
    /// CNAME (1), NAME (2), ... NOTE (7).
    Item { kind: u8, value: String },
    /// PRIV (8): a prefix string followed by the value.
    Private { prefix: String, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdesChunk {
    pub source: u32,
    pub items: Vec<SdesItem>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDescription {
    pub header: RtcpHeader,
    pub chunks: Vec<SdesChunk>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Goodbye {
    pub header: RtcpHeader,
    pub sources: Vec<u32>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppDefined {
    pub header: RtcpHeader,
    pub subtype: u8,
    pub source: u32,
    /// Four ASCII characters.
    pub name: String,
    pub data: Vec<u8>,
}

/// One RTCP packet, dispatched on its packet type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RtcpPacket {
    SenderReport(SenderReport),
    ReceiverReport(ReceiverReport),
    SourceDescription(SourceDescription),
    Bye(Goodbye),
    App(AppDefined),
    /// Known header, unknown packet type.
    Other(RtcpHeader),
}

impl RtcpPacket {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let r = Reader(data);
        let header = RtcpHeader {
            version: r.u8(0)? >> 6,
            padding: r.u8(0)? & 0x20 != 0,
            count: r.u8(0)? & 0x1f,
            packet_type: r.u8(1)?,
            length: r.u16(2)?,
        };

        Ok(match header.packet_type {
            SENDER_REPORT => RtcpPacket::SenderReport(SenderReport {
                header,
                ssrc: r.u32(4)?,
                ntp_most: r.u32(8)?,
                ntp_least: r.u32(12)?,
                rtp_timestamp: r.u32(16)?,
                packet_count: r.u32(20)?,
                octet_count: r.u32(24)?,
                reports: report_blocks(&r, header.count, 28)?,
            }),
            RECEIVER_REPORT => RtcpPacket::ReceiverReport(ReceiverReport {
                header,
                ssrc: r.u32(4)?,
                reports: report_blocks(&r, header.count, 8)?,
            }),
            SOURCE_DESCRIPTION => RtcpPacket::SourceDescription(SourceDescription {
                header,
                chunks: sdes_chunks(&r, header.count)?,
            }),
            BYE => {
                let sources = (0..header.count as usize)
                    .map(|i| r.u32(4 + 4 * i))
                    .collect::<Result<Vec<_>>>()?;
                let reason = if header.length > u16::from(header.count) {
                    let start = 4 + 4 * header.count as usize;
                    let length = r.u8(start)? as usize;
                    Some(r.text(start + 1, length)?)
                } else {
                    None
                };
                RtcpPacket::Bye(Goodbye {
                    header,
                    sources,
                    reason,
                })
            }
            APP => RtcpPacket::App(AppDefined {
                header,
                subtype: header.count,
                source: r.u32(4)?,
                name: r.text(8, 4)?,
                data: r.bytes(12, data.len().saturating_sub(12))?.to_vec(),
            }),
            _ => RtcpPacket::Other(header),
        })
    }

    pub fn header(&self) -> &RtcpHeader {
        match self {
            RtcpPacket::SenderReport(p) => &p.header,
            RtcpPacket::ReceiverReport(p) => &p.header,
            RtcpPacket::SourceDescription(p) => &p.header,
            RtcpPacket::Bye(p) => &p.header,
            RtcpPacket::App(p) => &p.header,
            RtcpPacket::Other(header) => header,
        }
    }
}

/// NTP timestamp to milliseconds since the Unix epoch.
pub fn ntp_to_millis(most: u32, least: u32) -> f64 {
    (f64::from(most) - NTP_UNIX_OFFSET) * 1000.0 + f64::from(least) * 1000.0 / 4_294_967_296.0
}

fn report_blocks(r: &Reader<'_>, count: u8, offset: usize) -> Result<Vec<ReportBlock>> {
    (0..count as usize)
        .map(|i| {
            let o = offset + i * 24;
            Ok(ReportBlock {
                ssrc: r.u32(o)?,
                fraction_lost: r.u8(o + 4)?,
                packets_lost: r.u32(o + 4)? & 0x00ff_ffff,
                highest_sequence: r.u32(o + 8)?,
                jitter: r.u32(o + 12)?,
                last_sr: r.u32(o + 16)?,
                delay_since_last_sr: r.u32(o + 20)?,
            })
        })
        .collect()
}

fn sdes_chunks(r: &Reader<'_>, count: u8) -> Result<Vec<SdesChunk>> {
    let mut chunks = Vec::with_capacity(count as usize);
    let mut offset = 4;
    for _ in 0..count {
        let mut chunk = SdesChunk {
            source: r.u32(offset)?,
            items: Vec::new(),
        };
        offset += 4;

        loop {
            let kind = r.u8(offset)?;
            offset += 1;
            if kind == 0 {
                // Chunks start on a word boundary.
                offset = offset.next_multiple_of(4);
                break;
            }
            let length = r.u8(offset)? as usize;
            offset += 1;
            let item = if kind == SDES_PRIV {
                let prefix_length = r.u8(offset)? as usize;
                SdesItem::Private {
                    prefix: r.text(offset + 1, prefix_length)?,
                    value: r.text(
                        offset + 1 + prefix_length,
                        length.saturating_sub(prefix_length + 1),
                    )?,
                }
            } else {
                SdesItem::Item {
                    kind,
                    value: r.text(offset, length)?,
                }
            };
            chunk.items.push(item);
            offset += length;
        }
        chunks.push(chunk);
    }
    Ok(chunks)
}

/// Bounds-checked big-endian reads.
struct Reader<'a>(&'a [u8]);

impl Reader<'_> {
    fn bytes(&self, at: usize, len: usize) -> Result<&[u8]> {
        self.0
            .get(at..at + len)
            .ok_or(RtspError::parse(ParseErrorKind::TruncatedRtcp))
    }

    fn u8(&self, at: usize) -> Result<u8> {
        Ok(self.bytes(at, 1)?[0])
    }

    fn u16(&self, at: usize) -> Result<u16> {
        let b = self.bytes(at, 2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&self, at: usize) -> Result<u32> {
        let b = self.bytes(at, 4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn text(&self, at: usize, len: usize) -> Result<String> {
        Ok(String::from_utf8_lossy(self.bytes(at, len)?).into_owned())
    }
}

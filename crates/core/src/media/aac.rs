use bytes::{BufMut, Bytes, BytesMut};

use super::rtp::RtpPacket;
use super::{Depacketizer, has_encoding};
use crate::bits::BitReader;
use crate::error::{ParseErrorKind, Result, RtspError};
use crate::message::{ElementaryMessage, Message};
use crate::protocol::sdp::MediaDescription;

/// Samples per AAC frame, the timestamp step between consecutive AUs.
const SAMPLES_PER_FRAME: u32 = 1024;

/// Bit widths of the fields in one AU-header, from the SDP `fmtp` line
/// (RFC 3640 §4.1).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AuHeaderLayout {
    pub size_length: u32,
    pub index_length: u32,
    pub index_delta_length: u32,
    pub cts_delta_length: u32,
    pub dts_delta_length: u32,
    pub random_access_indication: bool,
    pub stream_state_indication: u32,
}

impl AuHeaderLayout {
    pub fn from_media(media: &MediaDescription) -> Self {
        let Some(fmtp) = media.fmtp() else {
            return Self::default();
        };
        let field = |key: &str| fmtp.get_u32(key).unwrap_or(0);
        Self {
            size_length: field("sizelength"),
            index_length: field("indexlength"),
            index_delta_length: field("indexdeltalength"),
            cts_delta_length: field("ctsdeltalength"),
            dts_delta_length: field("dtsdeltalength"),
            random_access_indication: field("randomaccessindication") != 0,
            stream_state_indication: field("streamstateindication"),
        }
    }

    /// Whether packets start with an AU-header section.
    pub fn has_header(&self) -> bool {
        self.size_length
            + self.index_length.max(self.index_delta_length)
            + self.cts_delta_length
            + self.dts_delta_length
            + self.random_access_indication as u32
            + self.stream_state_indication
            > 0
    }

    /// Smallest AU-header: every optional delta absent.
    fn min_header_bits(&self, index_length: u32) -> usize {
        (self.size_length
            + index_length
            + (self.cts_delta_length > 0) as u32
            + (self.dts_delta_length > 0) as u32
            + self.random_access_indication as u32
            + self.stream_state_indication) as usize
    }

    /// Sizes of the AUs described by an AU-header section of `bits` bits.
    fn au_sizes(&self, section: &[u8], bits: usize) -> Result<Vec<usize>> {
        let mut reader = BitReader::new(section);
        let mut sizes = Vec::new();
        let mut consumed = 0;
        loop {
            let index_length = if sizes.is_empty() {
                self.index_length
            } else {
                self.index_delta_length
            };
            // Bits left over after the last whole header are padding.
            if bits.saturating_sub(consumed) < self.min_header_bits(index_length) {
                break;
            }
            let before = reader.remaining();
            let size = read_field(&mut reader, self.size_length)?;
            read_field(&mut reader, index_length)?;
            if self.cts_delta_length > 0 && reader.read_bit()? {
                read_field(&mut reader, self.cts_delta_length)?;
            }
            if self.dts_delta_length > 0 && reader.read_bit()? {
                read_field(&mut reader, self.dts_delta_length)?;
            }
            if self.random_access_indication {
                reader.read_bit()?;
            }
            read_field(&mut reader, self.stream_state_indication)?;

            let step = before - reader.remaining();
            if step == 0 {
                break;
            }
            consumed += step;
            sizes.push(size as usize);
        }
        Ok(sizes)
    }
}

fn read_field(reader: &mut BitReader<'_>, bits: u32) -> Result<u32> {
    if bits == 0 {
        return Ok(0);
    }
    reader.read_bits(bits)
}

/// AU being reassembled across packets.
#[derive(Debug)]
struct Fragment {
    timestamp: u32,
    expected: usize,
    data: BytesMut,
}

/// MPEG-4 AAC depacketizer for `mpeg4-generic` payloads (RFC 3640).
///
/// ```text
/// +---------+-----------+-----------+---------------+
/// | RTP     | AU Header | Auxiliary | Access Unit   |
/// | Header  | Section   | Section   | Data Section  |
/// +---------+-----------+-----------+---------------+
/// ```
///
/// The AU-header section starts with a 16-bit length in bits and is padded
/// to a whole byte. Each AU-header gives the size of one AU in the data
/// section. The auxiliary section is empty for AAC-hbr and is not parsed.
///
/// A packet with several AUs yields one message per AU, timestamps spaced
/// by 1024 samples. An AU larger than the packet is reassembled from the
/// following packets sharing its timestamp.
#[derive(Debug)]
pub struct AacDepacketizer {
    payload_type: u8,
    layout: AuHeaderLayout,
    fragment: Option<Fragment>,
}

impl AacDepacketizer {
    pub fn new(payload_type: u8, layout: AuHeaderLayout) -> Self {
        Self {
            payload_type,
            layout,
            fragment: None,
        }
    }

    fn message(&self, timestamp: u32, ntp_timestamp: Option<f64>, data: Bytes) -> Message {
        Message::Elementary(ElementaryMessage {
            payload_type: self.payload_type,
            timestamp,
            ntp_timestamp,
            data,
        })
    }

    /// Continue a pending fragment. Returns `None` when `payload` does not
    /// belong to it.
    fn continue_fragment(
        &mut self,
        timestamp: u32,
        marker: bool,
        data: &[u8],
        ntp_timestamp: Option<f64>,
    ) -> Option<Vec<Message>> {
        let fragment = self.fragment.as_mut()?;
        if fragment.timestamp != timestamp {
            tracing::debug!(
                timestamp = fragment.timestamp,
                collected = fragment.data.len(),
                expected = fragment.expected,
                "incomplete AAC fragment discarded"
            );
            self.fragment = None;
            return None;
        }

        fragment.data.put_slice(data);
        if fragment.data.len() < fragment.expected && !marker {
            return Some(Vec::new());
        }
        let fragment = self.fragment.take()?;
        if fragment.data.len() != fragment.expected {
            tracing::warn!(
                collected = fragment.data.len(),
                expected = fragment.expected,
                "AAC fragment size mismatch"
            );
        }
        Some(vec![self.message(
            fragment.timestamp,
            ntp_timestamp,
            fragment.data.freeze(),
        )])
    }
}

impl Depacketizer for AacDepacketizer {
    fn accepts(media: &MediaDescription) -> bool {
        media.media_type == "audio" && has_encoding(media, "MPEG4-GENERIC")
    }

    fn from_media(media: &MediaDescription) -> Result<Self> {
        Ok(Self::new(
            media.payload_type().unwrap_or(97),
            AuHeaderLayout::from_media(media),
        ))
    }

    fn depacketize(
        &mut self,
        packet: &RtpPacket<'_>,
        data: &Bytes,
        ntp_timestamp: Option<f64>,
    ) -> Result<Vec<Message>> {
        let timestamp = packet.timestamp();
        let payload = data.slice(packet.payload_offset()..);

        if !self.layout.has_header() {
            return Ok(vec![self.message(timestamp, ntp_timestamp, payload)]);
        }

        if payload.len() < 2 {
            return Err(RtspError::parse(ParseErrorKind::TruncatedRtp));
        }
        let header_bits = u16::from_be_bytes([payload[0], payload[1]]) as usize;
        let header_end = 2 + header_bits.div_ceil(8);
        if payload.len() < header_end {
            return Err(RtspError::parse(ParseErrorKind::TruncatedRtp));
        }
        let sizes = self.layout.au_sizes(&payload[2..header_end], header_bits)?;
        let body = payload.slice(header_end..);

        if let Some(out) =
            self.continue_fragment(timestamp, packet.marker(), &body, ntp_timestamp)
        {
            return Ok(out);
        }

        if let [size] = sizes[..]
            && size > body.len()
        {
            if packet.marker() {
                tracing::warn!(size, available = body.len(), "AAC AU truncated");
                return Ok(vec![self.message(timestamp, ntp_timestamp, body)]);
            }
            let mut data = BytesMut::with_capacity(size);
            data.put_slice(&body);
            self.fragment = Some(Fragment {
                timestamp,
                expected: size,
                data,
            });
            return Ok(Vec::new());
        }

        let mut out = Vec::with_capacity(sizes.len());
        let mut offset = 0;
        for (i, size) in sizes.into_iter().enumerate() {
            let end = offset + size;
            if end > body.len() {
                return Err(RtspError::parse(ParseErrorKind::TruncatedRtp));
            }
            let au_timestamp = timestamp.wrapping_add(i as u32 * SAMPLES_PER_FRAME);
            out.push(self.message(au_timestamp, ntp_timestamp, body.slice(offset..end)));
            offset = end;
        }
        Ok(out)
    }
}

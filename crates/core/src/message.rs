//! Typed records flowing between pipeline stages.
//!
//! Only the first stage after the transport sees [`Message::Raw`] bytes;
//! every later stage works on structured variants.

use bytes::Bytes;

use crate::protocol::request::RtspRequest;
use crate::protocol::response::RtspResponse;
use crate::protocol::sdp::Sdp;

/// One unit on a stage's inbound or outbound flow.
#[derive(Debug, Clone)]
pub enum Message {
    /// Unframed bytes from (incoming) or for (outgoing) the transport.
    Raw(Bytes),
    /// An RTSP response, header and body.
    Rtsp(RtspResponse),
    /// An RTSP request on its way to the server.
    Request(RtspRequest),
    /// A session description carried by a DESCRIBE response.
    Sdp(Sdp),
    /// One RTP packet from an even interleaved channel.
    Rtp(RtpMessage),
    /// One RTCP packet from an odd interleaved channel.
    Rtcp(RtcpMessage),
    /// A reconstructed access unit (AAC and other non-video payloads).
    Elementary(ElementaryMessage),
    /// A reconstructed H.264 access unit.
    H264(H264Message),
    /// A complete ONVIF metadata document.
    Xml(XmlMessage),
    /// Muxed ISO BMFF bytes ready for a decoder.
    Isom(IsomMessage),
}

impl Message {
    /// Short lowercase name of the variant, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Raw(_) => "raw",
            Message::Rtsp(_) => "rtsp",
            Message::Request(_) => "request",
            Message::Sdp(_) => "sdp",
            Message::Rtp(_) => "rtp",
            Message::Rtcp(_) => "rtcp",
            Message::Elementary(_) => "elementary",
            Message::H264(_) => "h264",
            Message::Xml(_) => "xml",
            Message::Isom(_) => "isom",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RtpMessage {
    /// Interleaved channel the packet arrived on (always even).
    pub channel: u8,
    /// The complete RTP packet, header included.
    pub data: Bytes,
    /// Wall-clock presentation time in milliseconds since the Unix epoch,
    /// filled in by the session once an RTCP sender report has been seen.
    pub ntp_timestamp: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct RtcpMessage {
    /// Interleaved channel the packet arrived on (always odd).
    pub channel: u8,
    /// A single RTCP packet, already split out of its compound packet.
    pub data: Bytes,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ElementaryMessage {
    pub payload_type: u8,
    /// RTP timestamp shared by every packet of the access unit.
    pub timestamp: u32,
    pub ntp_timestamp: Option<f64>,
    pub data: Bytes,
}

#[derive(Debug, Clone, PartialEq)]
pub struct H264Message {
    /// Length-prefixed NAL units (4-byte big-endian lengths).
    pub frame: ElementaryMessage,
    /// Type of the primary NAL unit in the access unit.
    pub nal_type: u8,
    pub idr: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct XmlMessage {
    pub payload_type: u8,
    pub timestamp: u32,
    pub ntp_timestamp: Option<f64>,
    pub data: Bytes,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IsomMessage {
    pub data: Bytes,
    pub kind: IsomKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum IsomKind {
    /// `ftyp` + `moov`, with the MSE-style MIME type of the movie.
    Init { mime: String },
    /// `moof` + `mdat` for one access unit.
    Fragment {
        ntp_timestamp: Option<f64>,
        /// Seconds since the presentation origin, set on IDR frames.
        checkpoint_time: Option<f64>,
    },
}

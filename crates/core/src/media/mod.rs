//! RTP depacketization.
//!
//! This module provides the [`Depacketizer`] trait and codec-specific
//! implementations that rebuild access units from RTP packets, plus the
//! RTP/RTCP parsers and the H.264 SPS reader they rely on.
//!
//! ## RTP overview (RFC 3550)
//!
//! Each encoded frame arrives split over one or more RTP packets. Every
//! packet carries a 12-byte fixed header ([`rtp::RtpPacket`]) containing:
//!
//! - **Sequence number** (16-bit, wrapping): for reordering and loss detection.
//! - **Timestamp** (32-bit): media clock, 90 kHz for video, sample rate for audio.
//! - **SSRC** (32-bit): identifies the sender.
//! - **Marker bit**: set on the last packet of an access unit (frame).
//!
//! Packets are handled in arrival order. Lost or reordered packets degrade
//! the rebuilt frame, they are never corrected.
//!
//! ## Supported payloads
//!
//! | Payload | Module | RFC | Encoding name |
//! |-------|--------|-----|--------|
//! | H.264 | [`h264`] | [RFC 6184](https://tools.ietf.org/html/rfc6184) | `H264` |
//! | AAC | [`aac`] | [RFC 3640](https://tools.ietf.org/html/rfc3640) | `MPEG4-GENERIC` |
//! | ONVIF metadata | [`onvif`] | ONVIF streaming spec | `VND.ONVIF.METADATA` |

pub mod aac;
pub mod h264;
pub mod onvif;
pub mod rtcp;
pub mod rtp;
pub mod sps;

use bytes::Bytes;

use crate::error::Result;
use crate::message::{Message, RtpMessage};
use crate::pipeline::{Component, Context, Stage, Tube};
use crate::protocol::sdp::MediaDescription;
use rtp::RtpPacket;

/// Codec-specific RTP depacketizer.
///
/// One instance owns one payload type. It is created from the SDP media
/// section that declares that payload type and dropped when a new SDP
/// arrives, so a parameter change never leaks into a half-built frame.
///
/// ## Implementing a new payload format
///
/// 1. Create a new module (e.g. `media/mjpeg.rs`)
/// 2. Implement `Depacketizer` for your type
/// 3. Add a [`Depay`] alias and insert it into the pipeline
pub trait Depacketizer: Send + Sized + 'static {
    /// Whether this depacketizer can handle `media`.
    fn accepts(media: &MediaDescription) -> bool;

    /// Build a depacketizer from the media section it will serve.
    fn from_media(media: &MediaDescription) -> Result<Self>;

    /// Consume one RTP packet. `data` is the full packet `packet` views.
    /// Returns the messages completed by this packet, possibly none.
    fn depacketize(
        &mut self,
        packet: &RtpPacket<'_>,
        data: &Bytes,
        ntp_timestamp: Option<f64>,
    ) -> Result<Vec<Message>>;
}

/// Tube running a [`Depacketizer`] on the RTP packets of its payload type.
///
/// The payload type is learned from the first accepted SDP media section.
/// RTP packets of other payload types, and every other message, pass
/// through untouched.
pub struct Depay<D> {
    payload_type: Option<u8>,
    depacketizer: Option<D>,
}

pub type H264Depay = Depay<h264::H264Depacketizer>;
pub type AacDepay = Depay<aac::AacDepacketizer>;
pub type OnvifDepay = Depay<onvif::OnvifDepacketizer>;

impl<D: Depacketizer> Depay<D> {
    pub fn new() -> Self {
        Self {
            payload_type: None,
            depacketizer: None,
        }
    }

    /// Payload type owned by this stage, once an SDP has been seen.
    pub fn payload_type(&self) -> Option<u8> {
        self.payload_type
    }

    fn handle_rtp(&mut self, rtp: RtpMessage, ctx: &mut Context) -> Result<()> {
        let (Some(payload_type), Some(depacketizer)) =
            (self.payload_type, self.depacketizer.as_mut())
        else {
            ctx.push(Message::Rtp(rtp));
            return Ok(());
        };

        let packet = RtpPacket::new(&rtp.data)?;
        if packet.payload_type() != payload_type {
            ctx.push(Message::Rtp(rtp));
            return Ok(());
        }

        tracing::trace!(
            payload_type,
            seq = packet.sequence_number(),
            timestamp = packet.timestamp(),
            marker = packet.marker(),
            "depacketizing"
        );
        for msg in depacketizer.depacketize(&packet, &rtp.data, rtp.ntp_timestamp)? {
            ctx.push(msg);
        }
        Ok(())
    }
}

impl<D: Depacketizer> Default for Depay<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: Depacketizer> Stage for Depay<D> {
    fn incoming(&mut self, msg: Message, ctx: &mut Context) -> Result<()> {
        match msg {
            Message::Sdp(sdp) => {
                self.payload_type = None;
                self.depacketizer = None;
                if let Some(media) = sdp.media.iter().find(|m| D::accepts(m)) {
                    self.depacketizer = Some(D::from_media(media)?);
                    self.payload_type = media.payload_type();
                    tracing::debug!(
                        stage = self.name(),
                        payload_type = ?self.payload_type,
                        "depacketizer configured from SDP"
                    );
                }
                ctx.push(Message::Sdp(sdp));
            }
            Message::Rtp(rtp) => self.handle_rtp(rtp, ctx)?,
            other => ctx.push(other),
        }
        Ok(())
    }
}

impl<D: Depacketizer> Component for Depay<D> {
    type Role = Tube;
}

/// Encoding name of `media`, compared case-insensitively.
pub(crate) fn has_encoding(media: &MediaDescription, name: &str) -> bool {
    media
        .encoding_name()
        .is_some_and(|encoding| encoding.eq_ignore_ascii_case(name))
}

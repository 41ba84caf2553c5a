use bytes::{BufMut, Bytes, BytesMut};

use super::rtp::RtpPacket;
use super::{Depacketizer, has_encoding};
use crate::error::Result;
use crate::message::{Message, XmlMessage};
use crate::protocol::sdp::MediaDescription;

/// ONVIF metadata depacketizer (`vnd.onvif.metadata`).
///
/// An XML document is split across packets sharing one RTP timestamp; the
/// marker bit flags the last one. Payloads are concatenated and emitted as
/// one [`XmlMessage`]. A timestamp change before the marker discards the
/// partial document.
#[derive(Debug)]
pub struct OnvifDepacketizer {
    payload_type: u8,
    document: BytesMut,
    timestamp: Option<u32>,
}

impl OnvifDepacketizer {
    pub fn new(payload_type: u8) -> Self {
        Self {
            payload_type,
            document: BytesMut::new(),
            timestamp: None,
        }
    }
}

impl Depacketizer for OnvifDepacketizer {
    fn accepts(media: &MediaDescription) -> bool {
        media.media_type == "application" && has_encoding(media, "VND.ONVIF.METADATA")
    }

    fn from_media(media: &MediaDescription) -> Result<Self> {
        Ok(Self::new(media.payload_type().unwrap_or(98)))
    }

    fn depacketize(
        &mut self,
        packet: &RtpPacket<'_>,
        _data: &Bytes,
        ntp_timestamp: Option<f64>,
    ) -> Result<Vec<Message>> {
        let timestamp = packet.timestamp();
        if self.timestamp.is_some_and(|t| t != timestamp) && !self.document.is_empty() {
            tracing::debug!(
                bytes = self.document.len(),
                "metadata document incomplete, discarding"
            );
            self.document.clear();
        }
        self.timestamp = Some(timestamp);
        self.document.put_slice(packet.payload());

        if !packet.marker() || self.document.is_empty() {
            return Ok(Vec::new());
        }
        self.timestamp = None;
        Ok(vec![Message::Xml(XmlMessage {
            payload_type: self.payload_type,
            timestamp,
            ntp_timestamp,
            data: self.document.split().freeze(),
        })])
    }
}

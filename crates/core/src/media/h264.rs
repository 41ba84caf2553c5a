use std::collections::HashSet;

use bytes::{BufMut, Bytes, BytesMut};

use super::rtp::RtpPacket;
use super::{Depacketizer, has_encoding};
use crate::error::Result;
use crate::message::{ElementaryMessage, H264Message, Message};
use crate::protocol::sdp::MediaDescription;

const NAL_TYPE_IDR: u8 = 5;
const NAL_TYPE_STAP_A: u8 = 24;
const NAL_TYPE_FU_A: u8 = 28;
const NAL_TYPE_FU_B: u8 = 29;

/// H.264 RTP depacketizer (RFC 6184).
///
/// Rebuilds access units from RTP packets and emits them in AVC format:
/// every NAL unit is prefixed with its 4-byte big-endian length, the layout
/// `avcC`-based MP4 samples expect. Two packetization modes are handled:
///
/// - **Single NAL Unit** (§5.6): types 1-23, the payload is one NAL unit.
///
/// - **FU-A Fragmentation** (§5.8): type 28, one NAL unit split across
///   packets. Each fragment carries a 2-byte FU header before the data:
///
///   ```text
///   FU indicator:  [F|NRI|Type=28]     (1 byte)
///   FU header:     [S|E|R|NAL_Type]    (1 byte)
///   Fragment data: [...]
///   ```
///
///   The rebuilt NAL header is `F|NRI` from the indicator and `NAL_Type`
///   from the FU header.
///
/// Aggregation packets (STAP-A, STAP-B, MTAP16, MTAP24) and FU-B are not
/// supported; they are dropped with one warning per type.
///
/// ## Access units
///
/// NAL units sharing an RTP timestamp are collected until the marker bit
/// (RFC 6184 §5.1). A timestamp change without a marker closes the previous
/// access unit. Nothing is emitted before the first IDR frame, so a decoder
/// always starts on a keyframe.
#[derive(Debug)]
pub struct H264Depacketizer {
    payload_type: u8,
    /// FU-A NAL unit in progress, NAL header included.
    fragment: Option<BytesMut>,
    /// Length-prefixed NAL units of the current access unit.
    frame: BytesMut,
    frame_timestamp: u32,
    frame_ntp: Option<f64>,
    /// NAL types of the current access unit, in order.
    nal_types: Vec<u8>,
    idr_seen: bool,
    warned: HashSet<u8>,
}

impl H264Depacketizer {
    pub fn new(payload_type: u8) -> Self {
        Self {
            payload_type,
            fragment: None,
            frame: BytesMut::new(),
            frame_timestamp: 0,
            frame_ntp: None,
            nal_types: Vec::new(),
            idr_seen: false,
            warned: HashSet::new(),
        }
    }

    fn push_nal(&mut self, nal: &[u8]) {
        if nal.is_empty() {
            return;
        }
        self.frame.put_u32(nal.len() as u32);
        self.frame.put_slice(nal);
        self.nal_types.push(nal[0] & 0x1f);
    }

    fn handle_fu_a(&mut self, payload: &[u8]) {
        if payload.len() < 2 {
            tracing::debug!(len = payload.len(), "FU-A packet too short");
            return;
        }
        let indicator = payload[0];
        let header = payload[1];
        let start = header & 0x80 != 0;
        let end = header & 0x40 != 0;

        if start {
            if self.fragment.is_some() {
                tracing::debug!("FU-A start before previous end, discarding fragment");
            }
            let mut nal = BytesMut::with_capacity(payload.len() * 4);
            nal.put_u8((indicator & 0xe0) | (header & 0x1f));
            nal.put_slice(&payload[2..]);
            self.fragment = Some(nal);
        } else if let Some(nal) = self.fragment.as_mut() {
            nal.put_slice(&payload[2..]);
        } else {
            tracing::debug!("FU-A continuation without start, dropping");
            return;
        }

        if end && let Some(nal) = self.fragment.take() {
            self.push_nal(&nal);
        }
    }

    /// Close the current access unit, returning it unless it is still
    /// waiting for the first IDR.
    fn flush(&mut self) -> Option<Message> {
        let nal_types = std::mem::take(&mut self.nal_types);
        let data = self.frame.split().freeze();
        if data.is_empty() {
            return None;
        }

        let idr = nal_types.contains(&NAL_TYPE_IDR);
        if !idr && !self.idr_seen {
            tracing::trace!(timestamp = self.frame_timestamp, "waiting for IDR, dropping frame");
            return None;
        }
        self.idr_seen = true;

        let nal_type = if idr {
            NAL_TYPE_IDR
        } else {
            nal_types
                .iter()
                .copied()
                .find(|t| (1..=5).contains(t))
                .unwrap_or(nal_types[0])
        };
        tracing::trace!(
            timestamp = self.frame_timestamp,
            nal_type,
            idr,
            size = data.len(),
            "H.264 access unit"
        );
        Some(Message::H264(H264Message {
            frame: ElementaryMessage {
                payload_type: self.payload_type,
                timestamp: self.frame_timestamp,
                ntp_timestamp: self.frame_ntp,
                data,
            },
            nal_type,
            idr,
        }))
    }

    fn warn_once(&mut self, nal_type: u8) {
        if self.warned.insert(nal_type) {
            let kind = match nal_type {
                NAL_TYPE_STAP_A => "STAP-A",
                25 => "STAP-B",
                26 => "MTAP16",
                27 => "MTAP24",
                NAL_TYPE_FU_B => "FU-B",
                _ => "reserved",
            };
            tracing::warn!(nal_type, kind, "unsupported H.264 payload, dropping");
        }
    }
}

impl Depacketizer for H264Depacketizer {
    fn accepts(media: &MediaDescription) -> bool {
        media.media_type == "video" && has_encoding(media, "H264")
    }

    fn from_media(media: &MediaDescription) -> Result<Self> {
        Ok(Self::new(media.payload_type().unwrap_or(96)))
    }

    fn depacketize(
        &mut self,
        packet: &RtpPacket<'_>,
        _data: &Bytes,
        ntp_timestamp: Option<f64>,
    ) -> Result<Vec<Message>> {
        let mut out = Vec::new();
        let timestamp = packet.timestamp();

        if !self.frame.is_empty() && timestamp != self.frame_timestamp {
            tracing::debug!(
                previous = self.frame_timestamp,
                timestamp,
                "timestamp changed without marker, closing access unit"
            );
            out.extend(self.flush());
        }
        self.frame_timestamp = timestamp;
        self.frame_ntp = ntp_timestamp;

        let payload = packet.payload();
        if let Some(&first) = payload.first() {
            match first & 0x1f {
                1..=23 => self.push_nal(payload),
                NAL_TYPE_FU_A => self.handle_fu_a(payload),
                other => self.warn_once(other),
            }
        }

        if packet.marker() {
            out.extend(self.flush());
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use base64::prelude::{BASE64_STANDARD, Engine as _};

    use super::*;

    const SINGLE_NALU: &str = "gOATzCCbbTXpPLiiQZrALBJ/AEphqA==";
    const FU_A_PART_1: &str = concat!(
        "gGBwUAkfABNeSvUmfIWIgwAAv7fhaOZ7/8I48OQXY7Fpl6o9HpvJiYz5b2JyowHtuVDBxLY9ZL8FHJOD6rs6h91C",
        "SMQmA9fgnTDCVgJ5vdm99c7OMzF3l4K9+VJeZ4eKyC32WVXoVh3h+KVVJERORlYXJDq+1IlMC0EzAqltdPKwC1Um",
        "wbsMgtz6fjR/v19wZf0DXOfxTBnb0OnN83kR5G8TffuGm2njvkWsEX7ecpJDzhu0Wn0RZ9Z0I39RuOT5hHrKKSMQ",
        "SfwWbITrzL+j5bneysE7nAD9mPsEQxqH99GPZodENIbuYhog8TS/Qlv+Ty20GkAZfbZILfjoELO9ahh2wQgLaGd0",
        "31W4Z7bmM7WACu7fPVm4blRP1rhomufuUAD8ceqjqxcivy5CxeyWS764bBNkffWBVHL7PpzXPhd4e56YduXnWwQO",
        "1REIs2MiPfyx7UumMIwDCCKhgDf3BUxWuSXVqcORn0aSp7k8SFCM/767e1peyADK+WKuWVDbrDvPW2igZKBADyas",
        "hVjvNhdaHJBCWPOpVwfghRhSjeaK2k6/OdY6ebpRDv4J7ZnUCGnNspqy6fo5WbUoQwc4+3xXbq8lN7kYP9zSH4iE",
        "xe7f//+9flejgJql61Z4A34bwazQ/KlCmySYm/cbIyWuZVQo0R8="
    );
    const FU_A_PART_2: &str =
        "gOBwUQkfABNeSvUmfEV10JWHPGgQDhsFYeRYLNcUCLF5ek1hA7BRpPeURyWGQa9vOSr5DM0WpqX78A==";

    fn feed(depay: &mut H264Depacketizer, b64: &str) -> Vec<Message> {
        let data = Bytes::from(BASE64_STANDARD.decode(b64).unwrap());
        let packet = RtpPacket::new(&data).unwrap();
        depay.depacketize(&packet, &data, None).unwrap()
    }

    fn rtp(seq: u16, timestamp: u32, marker: bool, payload: &[u8]) -> Bytes {
        let mut data = vec![0x80, if marker { 0xe0 } else { 0x60 }];
        data.extend_from_slice(&seq.to_be_bytes());
        data.extend_from_slice(&timestamp.to_be_bytes());
        data.extend_from_slice(&[0, 0, 0, 1]);
        data.extend_from_slice(payload);
        Bytes::from(data)
    }

    fn feed_raw(depay: &mut H264Depacketizer, data: Bytes) -> Vec<Message> {
        let packet = RtpPacket::new(&data).unwrap();
        depay.depacketize(&packet, &data, Some(1.5)).unwrap()
    }

    fn h264(msg: &Message) -> &H264Message {
        match msg {
            Message::H264(h) => h,
            other => panic!("expected h264, got {}", other.kind()),
        }
    }

    // --- fragmentation ---

    #[test]
    fn fu_a_over_two_packets() {
        let mut depay = H264Depacketizer::new(96);
        assert!(feed(&mut depay, FU_A_PART_1).is_empty());
        assert!(depay.fragment.is_some());

        let out = feed(&mut depay, FU_A_PART_2);
        assert_eq!(out.len(), 1);
        let msg = h264(&out[0]);
        assert_eq!(msg.frame.timestamp, 153026579);
        assert_eq!(msg.frame.payload_type, 96);
        assert_eq!(msg.frame.data.len(), 535);
        assert!(msg.idr);
        assert_eq!(msg.nal_type, NAL_TYPE_IDR);
        // Length prefix covers the rebuilt NAL unit.
        assert_eq!(&msg.frame.data[..4], &531u32.to_be_bytes());
        assert_eq!(msg.frame.data[4], 0x65);
        assert!(depay.fragment.is_none());
    }

    #[test]
    fn continuation_without_start_is_dropped() {
        let mut depay = H264Depacketizer::new(96);
        assert!(feed(&mut depay, FU_A_PART_2).is_empty());
    }

    // --- single NAL units ---

    #[test]
    fn single_nalu_after_idr() {
        let mut depay = H264Depacketizer::new(96);
        feed(&mut depay, FU_A_PART_1);
        feed(&mut depay, FU_A_PART_2);

        let out = feed(&mut depay, SINGLE_NALU);
        assert_eq!(out.len(), 1);
        let msg = h264(&out[0]);
        assert_eq!(msg.frame.timestamp, 547056949);
        assert_eq!(msg.frame.data.len(), 14);
        assert_eq!(msg.nal_type, 1);
        assert!(!msg.idr);
        assert!(depay.frame.is_empty());
    }

    #[test]
    fn frames_before_first_idr_are_dropped() {
        let mut depay = H264Depacketizer::new(96);
        assert!(feed(&mut depay, SINGLE_NALU).is_empty());
    }

    #[test]
    fn access_unit_spans_nal_units_until_marker() {
        let mut depay = H264Depacketizer::new(96);
        assert!(feed_raw(&mut depay, rtp(1, 3000, false, &[0x67, 1, 2])).is_empty());
        assert!(feed_raw(&mut depay, rtp(2, 3000, false, &[0x68, 3])).is_empty());
        let out = feed_raw(&mut depay, rtp(3, 3000, true, &[0x65, 4, 5, 6]));

        let msg = h264(&out[0]);
        assert!(msg.idr);
        assert_eq!(msg.frame.ntp_timestamp, Some(1.5));
        assert_eq!(
            &msg.frame.data[..],
            &[0, 0, 0, 3, 0x67, 1, 2, 0, 0, 0, 2, 0x68, 3, 0, 0, 0, 4, 0x65, 4, 5, 6]
        );
    }

    #[test]
    fn timestamp_change_closes_access_unit() {
        let mut depay = H264Depacketizer::new(96);
        assert!(feed_raw(&mut depay, rtp(1, 3000, false, &[0x65, 1])).is_empty());
        let out = feed_raw(&mut depay, rtp(2, 6000, true, &[0x41, 2]));
        assert_eq!(out.len(), 2);
        assert_eq!(h264(&out[0]).frame.timestamp, 3000);
        assert_eq!(h264(&out[1]).frame.timestamp, 6000);
        assert_eq!(h264(&out[1]).nal_type, 1);
    }

    // --- unsupported payloads ---

    #[test]
    fn aggregation_packets_warn_once() {
        let mut depay = H264Depacketizer::new(96);
        assert!(feed_raw(&mut depay, rtp(1, 0, true, &[0x78, 0, 2, 0x67, 1])).is_empty());
        assert!(feed_raw(&mut depay, rtp(2, 0, true, &[0x78, 0, 2, 0x67, 1])).is_empty());
        assert_eq!(depay.warned.len(), 1);
        assert!(depay.warned.contains(&NAL_TYPE_STAP_A));
    }
}

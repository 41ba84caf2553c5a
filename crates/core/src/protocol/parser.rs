//! Deframing of the RTSP control connection.
//!
//! With RTP over TCP (RFC 2326 §10.12) the connection carries RTSP
//! responses interleaved with binary frames:
//!
//! ```text
//! +---+---------+----------------+-----------------+
//! | $ | channel | length (u16 BE)| RTP/RTCP packet |
//! +---+---------+----------------+-----------------+
//! ```
//!
//! Even channels carry RTP and odd channels RTCP. RTCP frames may hold a
//! compound packet, which is split into its individual packets.

use bytes::{Buf, Bytes, BytesMut};

use super::response::{RtspResponse, body_offset, extract_header_value};
use super::sdp::Sdp;
use crate::error::{ParseErrorKind, Result, RtspError};
use crate::message::{Message, RtcpMessage, RtpMessage};
use crate::pipeline::{Component, Context, Stage, Tube};

const INTERLEAVED_HEADER_BYTES: usize = 4;
const DOLLAR: u8 = b'$';

/// Tube turning raw connection bytes into typed messages, and outgoing
/// requests into raw bytes.
#[derive(Debug, Default)]
pub struct RtspParser {
    buffer: BytesMut,
}

impl RtspParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and extract every complete message it finishes.
    pub fn parse(&mut self, chunk: &[u8]) -> Result<Vec<Message>> {
        let mut messages = Vec::new();
        self.parse_into(chunk, &mut messages)?;
        Ok(messages)
    }

    /// Like [`parse`](Self::parse), but messages extracted before a failure
    /// stay in `messages`.
    pub fn parse_into(&mut self, chunk: &[u8], messages: &mut Vec<Message>) -> Result<()> {
        self.buffer.extend_from_slice(chunk);

        loop {
            let Some(&first) = self.buffer.first() else {
                break;
            };
            let extracted = match first {
                DOLLAR => self.parse_interleaved(messages),
                b'R' => self.parse_rtsp(messages)?,
                other => {
                    tracing::warn!(byte = other, bytes = self.buffer.len(), "lost framing, dropping buffer");
                    self.buffer.clear();
                    return Err(RtspError::parse(ParseErrorKind::UnexpectedByte(other)));
                }
            };
            if !extracted {
                break;
            }
        }
        Ok(())
    }

    /// Bytes held back waiting for the rest of a message.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    fn parse_interleaved(&mut self, messages: &mut Vec<Message>) -> bool {
        if self.buffer.len() < INTERLEAVED_HEADER_BYTES {
            return false;
        }
        let channel = self.buffer[1];
        let length = u16::from_be_bytes([self.buffer[2], self.buffer[3]]) as usize;
        if self.buffer.len() < INTERLEAVED_HEADER_BYTES + length {
            return false;
        }

        self.buffer.advance(INTERLEAVED_HEADER_BYTES);
        let packet = self.buffer.split_to(length).freeze();

        if channel % 2 == 0 {
            messages.push(Message::Rtp(RtpMessage {
                channel,
                data: packet,
                ntp_timestamp: None,
            }));
        } else {
            for data in split_compound(packet) {
                messages.push(Message::Rtcp(RtcpMessage { channel, data }));
            }
        }
        true
    }

    fn parse_rtsp(&mut self, messages: &mut Vec<Message>) -> Result<bool> {
        let prefix = &self.buffer[..self.buffer.len().min(4)];
        if !b"RTSP".starts_with(prefix) {
            return Err(RtspError::parse(ParseErrorKind::UnexpectedByte(b'R')));
        }
        let Some(header_length) = body_offset(&self.buffer) else {
            return Ok(false);
        };

        let header = String::from_utf8_lossy(&self.buffer[..header_length]);
        let content_length = extract_header_value(&header, "Content-Length")
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(0);
        let content_type = extract_header_value(&header, "Content-Type")
            .map(|v| v.to_ascii_lowercase());
        if self.buffer.len() < header_length + content_length {
            return Ok(false);
        }

        let data = self.buffer.split_to(header_length + content_length).freeze();
        let body = data.slice(header_length..);
        let response = RtspResponse::parse(data)?;
        tracing::trace!(status = response.status_code(), cseq = ?response.cseq(), "RTSP response");
        messages.push(Message::Rtsp(response));

        let is_sdp = match content_type {
            Some(t) => t.contains("sdp"),
            None => body.starts_with(b"v="),
        };
        if !body.is_empty() && is_sdp {
            messages.push(Message::Sdp(Sdp::from_bytes(&body)?));
        }
        Ok(true)
    }
}

/// Split a compound RTCP packet (RFC 3550 §6.1) into its parts using the
/// length field of each header.
pub fn split_compound(mut packet: Bytes) -> Vec<Bytes> {
    let mut packets = Vec::new();
    while packet.len() >= 4 {
        let size = (u16::from_be_bytes([packet[2], packet[3]]) as usize + 1) * 4;
        if size > packet.len() {
            tracing::warn!(size, available = packet.len(), "truncated RTCP packet in compound");
            packets.push(packet);
            return packets;
        }
        packets.push(packet.split_to(size));
    }
    if !packet.is_empty() {
        tracing::warn!(bytes = packet.len(), "trailing bytes after RTCP compound");
    }
    packets
}

impl Stage for RtspParser {
    fn incoming(&mut self, msg: Message, ctx: &mut Context) -> Result<()> {
        match msg {
            Message::Raw(chunk) => {
                let mut messages = Vec::new();
                let result = self.parse_into(&chunk, &mut messages);
                for message in messages {
                    ctx.push(message);
                }
                result?;
            }
            other => ctx.push(other),
        }
        Ok(())
    }

    fn outgoing(&mut self, msg: Message, ctx: &mut Context) -> Result<()> {
        match msg {
            Message::Request(request) => {
                let text = request.serialize()?;
                tracing::debug!(method = %request.method, uri = %request.uri, "sending request");
                tracing::trace!(request = %text);
                ctx.push_outgoing(Message::Raw(Bytes::from(text)));
            }
            other => ctx.push_outgoing(other),
        }
        Ok(())
    }

    fn end(&mut self, _ctx: &mut Context) -> Result<()> {
        if !self.buffer.is_empty() {
            tracing::debug!(bytes = self.buffer.len(), "discarding partial message at end of stream");
            self.buffer.clear();
        }
        Ok(())
    }
}

impl Component for RtspParser {
    type Role = Tube;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::request::{Method, RtspRequest};
    use crate::test_fixtures::{RTCP_SR_SDES, SDP_RESPONSE, SETUP_RESPONSE};

    fn interleaved(channel: u8, packet: &[u8]) -> Vec<u8> {
        let mut frame = vec![DOLLAR, channel];
        frame.extend_from_slice(&(packet.len() as u16).to_be_bytes());
        frame.extend_from_slice(packet);
        frame
    }

    const RTP: [u8; 15] = [128, 224, 80, 76, 225, 39, 108, 97, 25, 190, 186, 105, 1, 2, 3];

    // --- interleaved ---

    #[test]
    fn empty_chunk_is_accepted() {
        let mut parser = RtspParser::new();
        assert!(parser.parse(&[]).unwrap().is_empty());
    }

    #[test]
    fn partial_header_is_buffered() {
        let mut parser = RtspParser::new();
        assert!(parser.parse(&[36]).unwrap().is_empty());
        assert_eq!(parser.buffered(), 1);
        assert!(parser.parse(&[0, 5]).unwrap().is_empty());
        assert_eq!(parser.buffered(), 3);
    }

    #[test]
    fn unknown_byte_fails() {
        let mut parser = RtspParser::new();
        let err = parser.parse(&[1, 2, 3]).unwrap_err();
        assert!(matches!(
            err,
            RtspError::Parse {
                kind: ParseErrorKind::UnexpectedByte(1)
            }
        ));
    }

    #[test]
    fn one_rtp_packet() {
        let mut parser = RtspParser::new();
        let messages = parser.parse(&interleaved(0, &RTP)).unwrap();
        assert_eq!(messages.len(), 1);
        match &messages[0] {
            Message::Rtp(rtp) => {
                assert_eq!(rtp.channel, 0);
                assert_eq!(&rtp.data[..], &RTP);
            }
            other => panic!("expected rtp, got {}", other.kind()),
        }
        assert_eq!(parser.buffered(), 0);
    }

    #[test]
    fn packet_split_across_chunks() {
        let frame = [interleaved(0, &RTP), interleaved(2, &RTP)].concat();
        let (first, second) = frame.split_at(frame.len() - 7);

        let mut parser = RtspParser::new();
        assert_eq!(parser.parse(first).unwrap().len(), 1);
        assert!(parser.buffered() > 0);
        let messages = parser.parse(second).unwrap();
        assert_eq!(messages.len(), 1);
        assert!(matches!(&messages[0], Message::Rtp(rtp) if rtp.channel == 2));
        assert_eq!(parser.buffered(), 0);
    }

    #[test]
    fn compound_rtcp_is_split() {
        let mut parser = RtspParser::new();
        let messages = parser.parse(&interleaved(1, &RTCP_SR_SDES)).unwrap();
        let sizes: Vec<_> = messages
            .iter()
            .map(|m| match m {
                Message::Rtcp(rtcp) => {
                    assert_eq!(rtcp.channel, 1);
                    rtcp.data.len()
                }
                other => panic!("expected rtcp, got {}", other.kind()),
            })
            .collect();
        assert_eq!(sizes, [28, 52]);
    }

    // --- RTSP ---

    #[test]
    fn rtsp_response_without_body() {
        let mut parser = RtspParser::new();
        let messages = parser.parse(SETUP_RESPONSE.as_bytes()).unwrap();
        assert_eq!(messages.len(), 1);
        match &messages[0] {
            Message::Rtsp(response) => {
                assert_eq!(&response.data()[..], SETUP_RESPONSE.as_bytes());
                assert_eq!(response.session_id(), Some("Bk48Ak7wjcWaAgRD"));
            }
            other => panic!("expected rtsp, got {}", other.kind()),
        }
        assert_eq!(parser.buffered(), 0);
    }

    #[test]
    fn rtsp_followed_by_rtp_and_rtcp() {
        let data = [
            SETUP_RESPONSE.as_bytes().to_vec(),
            interleaved(0, &RTP),
            interleaved(1, &RTCP_SR_SDES),
        ]
        .concat();

        let mut parser = RtspParser::new();
        let kinds: Vec<_> = parser
            .parse(&data)
            .unwrap()
            .iter()
            .map(Message::kind)
            .collect();
        assert_eq!(kinds, ["rtsp", "rtp", "rtcp", "rtcp"]);
    }

    #[test]
    fn trailing_partial_rtp_after_rtsp() {
        let data = [SETUP_RESPONSE.as_bytes(), &[DOLLAR, 0, 0, 15]].concat();
        let mut parser = RtspParser::new();
        assert_eq!(parser.parse(&data).unwrap().len(), 1);
        assert_eq!(parser.buffered(), 4);
    }

    #[test]
    fn rtsp_with_sdp_body() {
        let mut parser = RtspParser::new();
        let messages = parser.parse(SDP_RESPONSE.as_bytes()).unwrap();
        assert_eq!(messages.len(), 2);
        match (&messages[0], &messages[1]) {
            (Message::Rtsp(response), Message::Sdp(sdp)) => {
                assert_eq!(response.body().len(), 623);
                assert!(response.body().starts_with(b"v=0"));
                assert_eq!(sdp.media.len(), 1);
                assert_eq!(sdp.media[0].encoding_name(), Some("H264"));
            }
            (a, b) => panic!("expected rtsp + sdp, got {} + {}", a.kind(), b.kind()),
        }
    }

    #[test]
    fn segmented_rtsp_and_sdp() {
        let split = SDP_RESPONSE.find("\r\n\r\n").unwrap() + 4;
        let (head, body) = SDP_RESPONSE.split_at(split);

        let mut parser = RtspParser::new();
        assert!(parser.parse(head.as_bytes()).unwrap().is_empty());
        assert_eq!(parser.parse(body.as_bytes()).unwrap().len(), 2);
    }

    #[test]
    fn body_without_sdp_type_is_not_parsed() {
        let text = "RTSP/1.0 200 OK\r\nCSeq: 7\r\nContent-Type: text/parameters\r\n\
                    Content-Length: 11\r\n\r\nposition: 0";
        let messages = RtspParser::new().parse(text.as_bytes()).unwrap();
        assert!(matches!(messages.as_slice(), [Message::Rtsp(_)]));

        let untyped = "RTSP/1.0 200 OK\r\nCSeq: 8\r\nContent-Length: 5\r\n\r\nhello";
        let messages = RtspParser::new().parse(untyped.as_bytes()).unwrap();
        assert!(matches!(messages.as_slice(), [Message::Rtsp(_)]));
    }

    #[test]
    fn untyped_body_starting_like_sdp_is_parsed() {
        let body = "v=0\r\ns=-\r\nm=video 0 RTP/AVP 96\r\n";
        let text = format!(
            "RTSP/1.0 200 OK\r\nCSeq: 3\r\nContent-Length: {}\r\n\r\n{body}",
            body.len()
        );
        let messages = RtspParser::new().parse(text.as_bytes()).unwrap();
        assert!(matches!(messages.as_slice(), [Message::Rtsp(_), Message::Sdp(_)]));
    }

    #[test]
    fn messages_before_a_bad_frame_are_delivered() {
        let data = [interleaved(0, &RTP), b"garbage".to_vec()].concat();
        let mut parser = RtspParser::new();
        let mut ctx = Context::default();
        let result = parser.incoming(Message::Raw(Bytes::from(data)), &mut ctx);

        assert!(matches!(
            result,
            Err(RtspError::Parse {
                kind: ParseErrorKind::UnexpectedByte(b'g')
            })
        ));
        assert!(matches!(ctx.take_incoming().as_slice(), [Message::Rtp(_)]));
        assert_eq!(parser.buffered(), 0);
    }

    // --- outgoing ---

    #[test]
    fn request_is_serialized() {
        let mut parser = RtspParser::new();
        let mut ctx = Context::default();
        let request = RtspRequest::new(Method::Options, "rtsp://host/media").add_header("CSeq", "1");
        parser.outgoing(Message::Request(request), &mut ctx).unwrap();

        match ctx.take_outgoing().as_slice() {
            [Message::Raw(bytes)] => {
                assert_eq!(&bytes[..], b"OPTIONS rtsp://host/media RTSP/1.0\r\nCSeq: 1\r\n\r\n");
            }
            other => panic!("unexpected outgoing {other:?}"),
        }
    }
}

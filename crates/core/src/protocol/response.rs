use std::fmt;

use bytes::Bytes;

use crate::error::{ParseErrorKind, Result, RtspError};

/// An RTSP response as received from the server (RFC 2326 §7).
///
/// ```text
/// RTSP/1.0 200 OK\r\n
/// CSeq: 3\r\n
/// Content-Base: rtsp://192.168.0.3/axis-media/media.amp/\r\n
/// Content-Length: 623\r\n
/// \r\n
/// v=0\r\n...
/// ```
///
/// Header lookups search for `\n<name>: ` case-insensitively, so the
/// status line is never mistaken for a header and lower-case names such
/// as `cseq:` are still found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtspResponse {
    data: Bytes,
    head: String,
    body_offset: usize,
    status_code: u16,
}

/// Range of a PLAY response, e.g. `npt=now-` or `npt=1154.59-3610.25`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayRange {
    pub start: String,
    pub end: Option<String>,
}

impl RtspResponse {
    /// Wrap one complete response, header and body.
    pub fn parse(data: Bytes) -> Result<Self> {
        if data.len() < 12 || !data.starts_with(b"RTSP/") {
            return Err(RtspError::parse(ParseErrorKind::InvalidStatusLine));
        }
        let status_code = std::str::from_utf8(&data[9..12])
            .ok()
            .and_then(|code| code.parse().ok())
            .ok_or(RtspError::parse(ParseErrorKind::InvalidStatusLine))?;

        let body_offset = body_offset(&data).unwrap_or(data.len());
        let head = String::from_utf8_lossy(&data[..body_offset]).into_owned();

        Ok(Self {
            data,
            head,
            body_offset,
            status_code,
        })
    }

    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn reason(&self) -> &str {
        let line = self.head.lines().next().unwrap_or_default();
        line.get(13..).unwrap_or_default().trim()
    }

    /// Value of the first header called `name`, trimmed.
    pub fn header(&self, name: &str) -> Option<&str> {
        extract_header_value(&self.head, name)
    }

    /// `CSeq` (RFC 2326 §12.17).
    pub fn cseq(&self) -> Option<u32> {
        self.header("CSeq").and_then(|v| v.parse().ok())
    }

    /// Session identifier from `Session: id[;timeout=N]` (RFC 2326 §12.37).
    pub fn session_id(&self) -> Option<&str> {
        self.header("Session")
            .and_then(|v| v.split(';').next())
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }

    /// Session timeout in seconds, when announced.
    pub fn session_timeout(&self) -> Option<u64> {
        const TOKEN: &str = "timeout=";
        let value = self.header("Session")?;
        let position = value.to_ascii_lowercase().find(TOKEN)?;
        let rest = &value[position + TOKEN.len()..];
        rest.split(';').next()?.trim().parse().ok()
    }

    pub fn content_base(&self) -> Option<&str> {
        self.header("Content-Base")
    }

    pub fn content_length(&self) -> Option<usize> {
        self.header("Content-Length").and_then(|v| v.parse().ok())
    }

    /// `Connection: close` was sent, the server is tearing the session down.
    pub fn connection_ended(&self) -> bool {
        self.header("Connection")
            .is_some_and(|v| v.eq_ignore_ascii_case("close"))
    }

    pub fn range(&self) -> Option<PlayRange> {
        let value = self.header("Range")?;
        let (_, spec) = value.split_once('=')?;
        let (start, end) = match spec.split_once('-') {
            Some((start, end)) => (start, end),
            None => (spec, ""),
        };
        Some(PlayRange {
            start: start.to_string(),
            end: (!end.is_empty()).then(|| end.to_string()),
        })
    }

    pub fn rtp_info(&self) -> Option<&str> {
        self.header("RTP-Info")
    }

    pub fn transport(&self) -> Option<&str> {
        self.header("Transport")
    }

    /// Bytes after the blank line ending the header section.
    pub fn body(&self) -> Bytes {
        self.data.slice(self.body_offset..)
    }

    /// The complete response as received.
    pub fn data(&self) -> &Bytes {
        &self.data
    }
}

impl fmt::Display for RtspResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.head.trim_end())
    }
}

/// Find `\n<header>: ` case-insensitively and return the rest of that line.
pub fn extract_header_value<'a>(text: &'a str, header: &str) -> Option<&'a str> {
    let anchor = format!("\n{}: ", header.to_ascii_lowercase());
    // ASCII lowercasing keeps byte offsets stable.
    let start = text.to_ascii_lowercase().find(&anchor)? + anchor.len();
    let end = text[start..]
        .find('\n')
        .map_or(text.len(), |offset| start + offset);
    Some(text[start..end].trim())
}

/// Offset of the first byte after the header section, if it is complete.
///
/// `\r\n\r\n` is what RFC 2326 requires, `\n\n` and `\r\r` are tolerated.
/// The earliest terminator wins.
pub fn body_offset(chunk: &[u8]) -> Option<usize> {
    [&b"\n\n"[..], b"\r\r", b"\r\n\r\n"]
        .iter()
        .filter_map(|terminator| {
            chunk
                .windows(terminator.len())
                .position(|w| w == *terminator)
                .map(|offset| offset + terminator.len())
        })
        .min()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SETUP_RESPONSE: &str = "RTSP/1.0 200 OK\r\n\
        CSeq: 5\r\n\
        RTP-Info: url=rtsp://192.168.0.3/axis-media/media.amp/stream=0?resolution=176x144&fps=1;seq=10176;rtptime=2419713327\r\n\
        Range: npt=now-\r\n\
        Server: GStreamer RTSP server\r\n\
        Session: Bk48Ak7wjcWaAgRD; timeout=60\r\n\
        Date: Wed, 03 Jun 2015 14:23:42 GMT\r\n\
        \r\n";

    const TEARDOWN_RESPONSE: &str = "RTSP/1.0 200 OK\r\n\
        CSeq: 5\r\n\
        Server: GStreamer RTSP server\r\n\
        Session: ZyHdf8Mn.$epq_8Z; timeout=60\r\n\
        Connection: close\r\n\
        Date: Tue, 23 Jun 2015 08:38:03 GMT\r\n\
        \r\n";

    const OPTIONS_LOWER_CASE: &str = "RTSP/1.0 200 OK\r\n\
        Server: H264DVR 1.0\r\n\
        cseq: 1\r\n\
        Public: OPTIONS, DESCRIBE, SETUP, TEARDOWN, GET_PARAMETER, PLAY, PAUSE\r\n\
        \r\n";

    fn response(text: &'static str) -> RtspResponse {
        RtspResponse::parse(Bytes::from_static(text.as_bytes())).unwrap()
    }

    // --- status line ---

    #[test]
    fn status_and_reason() {
        let r = response(SETUP_RESPONSE);
        assert_eq!(r.status_code(), 200);
        assert_eq!(r.reason(), "OK");

        let r = response("RTSP/1.0 454 Session Not Found\r\nCSeq: 9\r\n\r\n");
        assert_eq!(r.status_code(), 454);
        assert_eq!(r.reason(), "Session Not Found");
    }

    #[test]
    fn rejects_non_rtsp() {
        let err = RtspResponse::parse(Bytes::from_static(b"HTTP/1.1 200 OK\r\n\r\n")).unwrap_err();
        assert!(matches!(
            err,
            RtspError::Parse {
                kind: ParseErrorKind::InvalidStatusLine
            }
        ));
        assert!(RtspResponse::parse(Bytes::from_static(b"RTSP/1.0 2x0 OK\r\n\r\n")).is_err());
    }

    // --- headers ---

    #[test]
    fn sequence_number() {
        assert_eq!(response(SETUP_RESPONSE).cseq(), Some(5));
    }

    #[test]
    fn lower_case_sequence_number() {
        assert_eq!(response(OPTIONS_LOWER_CASE).cseq(), Some(1));
    }

    #[test]
    fn session_id_and_timeout() {
        let r = response(SETUP_RESPONSE);
        assert_eq!(r.session_id(), Some("Bk48Ak7wjcWaAgRD"));
        assert_eq!(r.session_timeout(), Some(60));
    }

    #[test]
    fn session_without_timeout() {
        let r = response("RTSP/1.0 200 OK\r\nCSeq: 5\r\nSession: Bk48Ak7wjcWaAgRD\r\n\r\n");
        assert_eq!(r.session_id(), Some("Bk48Ak7wjcWaAgRD"));
        assert_eq!(r.session_timeout(), None);
    }

    #[test]
    fn connection_close() {
        assert!(response(TEARDOWN_RESPONSE).connection_ended());
        assert!(!response(SETUP_RESPONSE).connection_ended());
    }

    #[test]
    fn open_and_closed_ranges() {
        let open = response(SETUP_RESPONSE).range().unwrap();
        assert_eq!(open.start, "now");
        assert_eq!(open.end, None);

        let closed = response("RTSP/1.0 200 OK\r\nCSeq: 6\r\nRange: npt=1154.598701-3610.259146\r\n\r\n")
            .range()
            .unwrap();
        assert_eq!(closed.start, "1154.598701");
        assert_eq!(closed.end.as_deref(), Some("3610.259146"));
    }

    #[test]
    fn rtp_info_is_kept_verbatim() {
        let info = response(SETUP_RESPONSE).rtp_info().unwrap().to_string();
        assert!(info.starts_with("url=rtsp://192.168.0.3/"));
        assert!(info.ends_with("rtptime=2419713327"));
    }

    #[test]
    fn missing_header() {
        assert_eq!(response(SETUP_RESPONSE).content_base(), None);
    }

    // --- body offset ---

    #[test]
    fn body_offset_variants() {
        assert_eq!(body_offset(b"RTSP/1.0 200 OK\r\n\r\nv=0"), Some(19));
        assert_eq!(body_offset(b"RTSP/1.0 200 OK\n\nv=0"), Some(17));
        assert_eq!(body_offset(b"RTSP/1.0 200 OK\r\rv=0"), Some(17));
        assert_eq!(body_offset(b"RTSP/1.0 200 OK\r\n"), None);
    }

    #[test]
    fn body_is_split_from_header() {
        let r = response("RTSP/1.0 200 OK\r\nCSeq: 3\r\nContent-Length: 5\r\n\r\nv=0\r\n");
        assert_eq!(r.content_length(), Some(5));
        assert_eq!(&r.body()[..], b"v=0\r\n");
    }
}

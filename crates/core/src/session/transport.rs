use std::fmt;

/// Interleaved RTP-over-RTSP transport for one media (RFC 2326 §12.39).
///
/// Sent by the client in SETUP and echoed, possibly amended, by the server.
///
/// ## Wire format example
///
/// ```text
/// Client → Server:
///   Transport: RTP/AVP/TCP;unicast;interleaved=0-1
///
/// Server → Client:
///   Transport: RTP/AVP/TCP;unicast;interleaved=0-1;ssrc=5C7FA41A;mode="PLAY"
/// ```
///
/// RTP for the media arrives on the even channel and RTCP on the odd one,
/// both framed with `$` on the control connection (RFC 2326 §10.12).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportHeader {
    /// RTP channel, always even when built by the client.
    pub rtp_channel: u8,
    pub rtcp_channel: u8,
    pub ssrc: Option<u32>,
    pub mode: Option<String>,
}

impl TransportHeader {
    /// Transport request for the media at `index` in the SDP, or `None`
    /// when its channel pair does not fit in the one-byte channel field.
    pub fn interleaved(index: usize) -> Option<Self> {
        let rtp_channel = u8::try_from(index.checked_mul(2)?).ok()?;
        Some(Self {
            rtp_channel,
            rtcp_channel: rtp_channel.checked_add(1)?,
            ssrc: None,
            mode: None,
        })
    }

    /// Parse a `Transport` header value.
    ///
    /// Requires `interleaved=RTP-RTCP` among the semicolon-separated
    /// parameters. A single channel `interleaved=N` implies `N+1` for RTCP.
    ///
    /// ## Examples
    ///
    /// ```
    /// use rtsp::session::transport::TransportHeader;
    ///
    /// let th = TransportHeader::parse("RTP/AVP/TCP;unicast;interleaved=2-3;ssrc=0000BEEF").unwrap();
    /// assert_eq!(th.rtp_channel, 2);
    /// assert_eq!(th.rtcp_channel, 3);
    /// assert_eq!(th.ssrc, Some(0xbeef));
    ///
    /// assert!(TransportHeader::parse("RTP/AVP;unicast;client_port=8000-8001").is_none());
    /// ```
    pub fn parse(header: &str) -> Option<Self> {
        let mut channels = None;
        let mut ssrc = None;
        let mut mode = None;

        for part in header.split(';').map(str::trim) {
            if let Some(value) = part.strip_prefix("interleaved=") {
                channels = match value.split_once('-') {
                    Some((rtp, rtcp)) => Some((rtp.parse().ok()?, rtcp.parse().ok()?)),
                    None => {
                        let rtp: u8 = value.parse().ok()?;
                        Some((rtp, rtp.checked_add(1)?))
                    }
                };
            } else if let Some(value) = part.strip_prefix("ssrc=") {
                ssrc = u32::from_str_radix(value, 16).ok();
            } else if let Some(value) = part.strip_prefix("mode=") {
                mode = Some(value.trim_matches('"').to_string());
            }
        }

        let (rtp_channel, rtcp_channel) = channels?;
        Some(TransportHeader {
            rtp_channel,
            rtcp_channel,
            ssrc,
            mode,
        })
    }
}

impl fmt::Display for TransportHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RTP/AVP/TCP;unicast;interleaved={}-{}",
            self.rtp_channel, self.rtcp_channel
        )
    }
}

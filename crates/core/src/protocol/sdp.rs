//! SDP (Session Description Protocol) parsing (RFC 4566 / RFC 8866).
//!
//! Reads the body of a DESCRIBE response. The format:
//!
//! ```text
//! v=0                                          ← protocol version
//! o=<user> <sess-id> <sess-ver> IN IP4 <addr>  ← origin
//! s=<session-name>                             ← session name
//! t=0 0                                        ← timing (live stream)
//! a=control:rtsp://host/media.amp              ← session control URI
//! m=video 0 RTP/AVP 96                         ← media description
//! a=rtpmap:96 H264/90000                       ← codec/clock rate
//! a=fmtp:96 packetization-mode=1;...           ← codec parameters
//! a=control:stream=0                           ← track control URI
//! ```
//!
//! Lines before the first `m=` belong to the session; every `m=` line
//! opens a new media section. Unknown attributes are kept as raw
//! `key[:value]` pairs, repeated single-valued fields keep the last value.

use std::collections::HashMap;

use bytes::Bytes;

use crate::error::{ParseErrorKind, Result, RtspError};

/// A parsed session description.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sdp {
    pub session: SessionDescription,
    pub media: Vec<MediaDescription>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionDescription {
    /// `v=`
    pub version: Option<u32>,
    /// `o=`
    pub origin: Option<Origin>,
    /// `s=`
    pub name: Option<String>,
    /// `i=`
    pub information: Option<String>,
    /// `u=`
    pub uri: Option<String>,
    /// `e=`
    pub email: Vec<String>,
    /// `p=`
    pub phone: Vec<String>,
    pub connection: Option<Connection>,
    pub bandwidth: Option<Bandwidth>,
    pub time: Option<TimeDescription>,
    pub repeat_times: Option<RepeatTimes>,
    pub attributes: Attributes,
}

/// `o=<username> <sess-id> <sess-version> <nettype> <addrtype> <unicast-address>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    pub username: String,
    pub session_id: String,
    pub session_version: String,
    pub network_type: String,
    pub address_type: String,
    pub address: String,
}

/// `c=<nettype> <addrtype> <connection-address>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub network_type: String,
    pub address_type: String,
    pub address: String,
}

/// `b=<bwtype>:<bandwidth>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bandwidth {
    pub kind: String,
    pub value: u64,
}

/// `t=<start-time> <stop-time>`, NTP seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeDescription {
    pub start: u64,
    pub stop: u64,
}

/// `r=<repeat interval> <active duration> <offsets from start-time>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepeatTimes {
    pub interval: u64,
    pub active_duration: u64,
    pub offsets: Vec<u64>,
}

/// One `m=` section.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaDescription {
    /// `audio`, `video`, `application`, ...
    pub media_type: String,
    pub port: u16,
    pub protocol: String,
    /// Format list of the `m=` line; for RTP these are payload types.
    pub formats: Vec<String>,
    pub information: Option<String>,
    pub connection: Option<Connection>,
    pub bandwidth: Option<Bandwidth>,
    pub attributes: Attributes,
}

/// `a=rtpmap:<payload type> <encoding name>/<clock rate>[/<encoding parameters>]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpMap {
    pub payload_type: u8,
    /// Upper-cased, e.g. `H264` or `MPEG4-GENERIC`.
    pub encoding_name: String,
    pub clock_rate: u32,
    pub encoding_parameters: Option<String>,
}

/// `a=fmtp:<format> <key>=<value>;...`, keys lower-cased.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fmtp {
    pub format: String,
    pub parameters: HashMap<String, String>,
}

impl Fmtp {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).map(String::as_str)
    }

    /// Parameter parsed as an integer, `None` when absent or malformed.
    pub fn get_u32(&self, key: &str) -> Option<u32> {
        self.get(key).and_then(|v| v.parse().ok())
    }
}

/// Attributes that may appear at session or media level.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attributes {
    pub control: Option<String>,
    pub range: Option<String>,
    pub rtpmap: Option<RtpMap>,
    pub fmtp: Option<Fmtp>,
    pub framerate: Option<f64>,
    /// 3x3 transformation matrix, row-major.
    pub transform: Option<Vec<Vec<f64>>>,
    /// `a=framesize:<pt> <width>-<height>`
    pub framesize: Option<(u32, u32)>,
    /// Everything else, in order of appearance. Flag attributes have no value.
    pub other: Vec<(String, Option<String>)>,
}

impl Attributes {
    /// Value of an unstructured attribute, `Some(None)` for a flag.
    pub fn get(&self, key: &str) -> Option<Option<&str>> {
        self.other
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_deref())
    }

    fn parse(&mut self, body: &str) {
        let (key, value) = match body.split_once(':') {
            Some((key, value)) => (key, value),
            None => {
                self.other.push((body.to_string(), None));
                return;
            }
        };
        match key {
            "control" => self.control = Some(value.to_string()),
            "range" => self.range = Some(value.to_string()),
            "rtpmap" => self.rtpmap = parse_rtpmap(value),
            "fmtp" => self.fmtp = Some(parse_fmtp(value)),
            "framerate" => self.framerate = value.trim().parse().ok(),
            "transform" => self.transform = Some(parse_transform(value)),
            "framesize" => self.framesize = parse_framesize(value),
            _ => self.other.push((key.to_string(), Some(value.to_string()))),
        }
    }
}

impl MediaDescription {
    /// First payload type of the `m=` line.
    pub fn payload_type(&self) -> Option<u8> {
        self.formats.first().and_then(|f| f.parse().ok())
    }

    pub fn rtpmap(&self) -> Option<&RtpMap> {
        self.attributes.rtpmap.as_ref()
    }

    pub fn fmtp(&self) -> Option<&Fmtp> {
        self.attributes.fmtp.as_ref()
    }

    pub fn control(&self) -> Option<&str> {
        self.attributes.control.as_deref()
    }

    /// Upper-cased encoding name from the payload map.
    pub fn encoding_name(&self) -> Option<&str> {
        self.rtpmap().map(|m| m.encoding_name.as_str())
    }

    pub fn clock_rate(&self) -> Option<u32> {
        self.rtpmap().map(|m| m.clock_rate)
    }
}

impl Sdp {
    /// Parse a session description. Lines may end in CRLF or LF.
    pub fn parse(text: &str) -> Result<Self> {
        let mut sdp = Sdp::default();

        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let (prefix, body) = match line.split_once('=') {
                Some((prefix, body)) if prefix.len() == 1 => (prefix, body),
                _ => return Err(RtspError::parse(ParseErrorKind::InvalidSdpLine(line.to_string()))),
            };

            if prefix == "m" {
                sdp.media.push(parse_media_line(body)?);
                continue;
            }

            match sdp.media.last_mut() {
                Some(media) => match prefix {
                    "i" => media.information = Some(body.to_string()),
                    "c" => media.connection = parse_connection(body),
                    "b" => media.bandwidth = parse_bandwidth(body),
                    "a" => media.attributes.parse(body),
                    _ => tracing::trace!(line, "ignoring media-level SDP line"),
                },
                None => sdp.session.parse_field(prefix, body),
            }
        }

        tracing::debug!(media = sdp.media.len(), "parsed SDP");
        Ok(sdp)
    }

    pub fn from_bytes(data: &Bytes) -> Result<Self> {
        Self::parse(&String::from_utf8_lossy(data))
    }

    /// Session-level control URI.
    pub fn control(&self) -> Option<&str> {
        self.session.attributes.control.as_deref()
    }
}

impl SessionDescription {
    fn parse_field(&mut self, prefix: &str, body: &str) {
        match prefix {
            "v" => self.version = body.trim().parse().ok(),
            "o" => self.origin = parse_origin(body),
            "s" => self.name = Some(body.to_string()),
            "i" => self.information = Some(body.to_string()),
            "u" => self.uri = Some(body.to_string()),
            "e" => self.email.push(body.to_string()),
            "p" => self.phone.push(body.to_string()),
            "c" => self.connection = parse_connection(body),
            "b" => self.bandwidth = parse_bandwidth(body),
            "t" => {
                let mut fields = body.split(' ').map(|v| v.parse().unwrap_or(0));
                self.time = Some(TimeDescription {
                    start: fields.next().unwrap_or(0),
                    stop: fields.next().unwrap_or(0),
                });
            }
            "r" => {
                let values: Vec<u64> = body.split(' ').filter_map(|v| v.parse().ok()).collect();
                if let [interval, active_duration, offsets @ ..] = values.as_slice() {
                    self.repeat_times = Some(RepeatTimes {
                        interval: *interval,
                        active_duration: *active_duration,
                        offsets: offsets.to_vec(),
                    });
                }
            }
            // Time zones and encryption keys are not used.
            "z" | "k" => {}
            "a" => self.attributes.parse(body),
            _ => tracing::trace!(prefix, "ignoring unknown SDP field"),
        }
    }
}

fn parse_media_line(body: &str) -> Result<MediaDescription> {
    let mut fields = body.split_whitespace();
    let (Some(media_type), Some(port), Some(protocol)) = (fields.next(), fields.next(), fields.next())
    else {
        return Err(RtspError::parse(ParseErrorKind::InvalidMediaLine(body.to_string())));
    };
    let formats: Vec<String> = fields.map(str::to_string).collect();
    if formats.is_empty() {
        return Err(RtspError::parse(ParseErrorKind::InvalidMediaLine(body.to_string())));
    }
    // `<port>/<number of ports>`
    let port = port.split('/').next().and_then(|p| p.parse().ok()).unwrap_or(0);

    Ok(MediaDescription {
        media_type: media_type.to_string(),
        port,
        protocol: protocol.to_string(),
        formats,
        ..Default::default()
    })
}

fn parse_origin(body: &str) -> Option<Origin> {
    let f: Vec<&str> = body.split(' ').collect();
    match f.as_slice() {
        [username, session_id, session_version, network_type, address_type, address] => {
            Some(Origin {
                username: username.to_string(),
                session_id: session_id.to_string(),
                session_version: session_version.to_string(),
                network_type: network_type.to_string(),
                address_type: address_type.to_string(),
                address: address.to_string(),
            })
        }
        _ => None,
    }
}

fn parse_connection(body: &str) -> Option<Connection> {
    let f: Vec<&str> = body.split(' ').collect();
    match f.as_slice() {
        [network_type, address_type, address] => Some(Connection {
            network_type: network_type.to_string(),
            address_type: address_type.to_string(),
            address: address.to_string(),
        }),
        _ => None,
    }
}

fn parse_bandwidth(body: &str) -> Option<Bandwidth> {
    let (kind, value) = body.split_once(':')?;
    Some(Bandwidth {
        kind: kind.to_string(),
        value: value.trim().parse().ok()?,
    })
}

fn parse_rtpmap(value: &str) -> Option<RtpMap> {
    let (payload_type, encoding) = value.split_once(' ')?;
    let encoding = encoding.trim().to_ascii_uppercase();
    let mut parts = encoding.splitn(3, '/');
    Some(RtpMap {
        payload_type: payload_type.trim().parse().ok()?,
        encoding_name: parts.next()?.to_string(),
        clock_rate: parts.next()?.parse().ok()?,
        encoding_parameters: parts.next().map(str::to_string),
    })
}

fn parse_fmtp(value: &str) -> Fmtp {
    let (format, parameters) = value.split_once(' ').unwrap_or((value, ""));
    let parameters = parameters
        .trim()
        .split(';')
        .filter_map(|pair| {
            let (key, val) = pair.split_once('=').unwrap_or((pair, ""));
            let key = key.trim().to_ascii_lowercase();
            (!key.is_empty()).then(|| (key, val.trim().to_string()))
        })
        .collect();
    Fmtp {
        format: format.to_string(),
        parameters,
    }
}

fn parse_transform(value: &str) -> Vec<Vec<f64>> {
    value
        .split(';')
        .map(|row| row.split(',').map(|v| v.trim().parse().unwrap_or(0.0)).collect())
        .collect()
}

fn parse_framesize(value: &str) -> Option<(u32, u32)> {
    let (_, size) = value.split_once(' ')?;
    let (width, height) = size.split_once('-')?;
    Some((width.trim().parse().ok()?, height.trim().parse().ok()?))
}

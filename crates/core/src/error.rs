//! Error types for the RTSP client media engine.

use std::fmt;

/// Errors that can occur anywhere in the engine.
///
/// Variants map to specific failure modes across the stack:
///
/// - **Protocol**: [`Parse`](Self::Parse) for malformed RTSP/RTP/RTCP/SDP
///   input and [`BitRead`](Self::BitRead), [`EndOfData`](Self::EndOfData),
///   [`ExpGolomb`](Self::ExpGolomb) for bitstream contract violations.
/// - **Transport**: [`Io`](Self::Io) for socket failures.
/// - **Configuration**: [`Connect`](Self::Connect) for illegal stage
///   topologies, [`MissingUri`](Self::MissingUri) and friends for missing
///   construction parameters.
/// - **Session**: [`Status`](Self::Status) is only ever handed to the
///   session's error callback, never returned.
/// - **Box model**: [`UnknownBox`](Self::UnknownBox),
///   [`UnknownField`](Self::UnknownField), [`FieldType`](Self::FieldType),
///   [`FieldRange`](Self::FieldRange), [`DuplicateField`](Self::DuplicateField).
#[derive(Debug, thiserror::Error)]
pub enum RtspError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse wire data.
    #[error("parse error: {kind}")]
    Parse { kind: ParseErrorKind },

    /// Two stages could not be connected.
    #[error("connection failed: {0}")]
    Connect(ConnectError),

    /// A session was created without a URI or a hostname to derive one from.
    #[error("you must supply an uri when creating an RTSP session")]
    MissingUri,

    /// A URI that cannot be parsed or has no host to connect to.
    #[error("invalid uri: {0}")]
    InvalidUri(String),

    /// An RTSP request was serialized without a request URI.
    #[error("missing uri when building request")]
    MissingRequestUri,

    /// `play()` from the paused state without an established session.
    #[error("no RTSP session established")]
    NoSession,

    /// The server answered with a status code of 400 or above.
    #[error("RTSP status {code}: {response}")]
    Status { code: u16, response: String },

    /// Box type missing from the box table.
    #[error("unknown box type: {0}")]
    UnknownBox(String),

    /// Element key not present in the box.
    #[error("invalid key '{key}' for box '{box_type}'")]
    UnknownField { box_type: String, key: String },

    /// Value kind does not match the element kind.
    #[error("value for '{key}' has the wrong type")]
    FieldType { key: String },

    /// Element key added twice to the same box.
    #[error("box '{box_type}' already has an element '{key}'")]
    DuplicateField { box_type: String, key: String },

    /// Value does not fit the element's width.
    #[error("value {value} out of range for '{key}'")]
    FieldRange { key: String, value: u64 },

    /// Bit reads must be 1 to 31 bits wide.
    #[error("cannot read {bits} bits, reads must be 1 to 31 bits")]
    BitRead { bits: u32 },

    /// A bit read ran past the end of the buffer.
    #[error("bitstream ended unexpectedly")]
    EndOfData,

    /// An Exp-Golomb code with 31 or more leading zeros.
    #[error("invalid Exp-Golomb code")]
    ExpGolomb,

    /// An access unit for a payload type the movie has no track for.
    #[error("missing track data for payload type {payload_type}")]
    MissingTrack { payload_type: u8 },

    /// A [`StageHandle`](crate::pipeline::StageHandle) that does not
    /// resolve to a stage of the expected type.
    #[error("stage not found in pipeline")]
    StageNotFound,
}

/// Specific kind of parse failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// Response did not start with `RTSP/1.0 <code>`.
    InvalidStatusLine,
    /// Response had no `CSeq` header.
    MissingCSeq,
    /// RTP packet shorter than its header claims.
    TruncatedRtp,
    /// RTCP packet shorter than its header claims.
    TruncatedRtcp,
    /// SDP line not of the form `<letter>=<value>`.
    InvalidSdpLine(String),
    /// SDP `m=` line without type, port, protocol and formats.
    InvalidMediaLine(String),
    /// Interleaved stream frame starting with neither `$` nor `R`.
    UnexpectedByte(u8),
    /// `sprop-parameter-sets` that is not valid base64, or an unusable SPS.
    InvalidParameterSet,
    /// AAC `config` parameter that is not a hex AudioSpecificConfig.
    InvalidAudioConfig,
    /// Box shorter than its `size` field, or a `size` below the header length.
    TruncatedBox,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidStatusLine => write!(f, "invalid status line"),
            Self::MissingCSeq => write!(f, "expected sequence number"),
            Self::TruncatedRtp => write!(f, "truncated RTP packet"),
            Self::TruncatedRtcp => write!(f, "truncated RTCP packet"),
            Self::InvalidSdpLine(line) => write!(f, "invalid SDP line: {line}"),
            Self::InvalidMediaLine(line) => write!(f, "invalid SDP media line: {line}"),
            Self::UnexpectedByte(b) => write!(f, "unexpected byte {b:#04x} in interleaved stream"),
            Self::InvalidParameterSet => write!(f, "invalid H.264 parameter set"),
            Self::InvalidAudioConfig => write!(f, "invalid AAC audio config"),
            Self::TruncatedBox => write!(f, "truncated ISO BMFF box"),
        }
    }
}

/// Why a stage connection was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectError {
    /// Upstream already has a downstream, or downstream already has an upstream.
    AlreadyConnected,
    /// Sinks have no outbound flow.
    AfterSink,
    /// Sources have no inbound flow.
    Incompatible,
    /// The link would close a loop.
    Cycle,
}

impl fmt::Display for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyConnected => write!(f, "component(s) already connected"),
            Self::AfterSink => write!(f, "attempting to connect after a sink"),
            Self::Incompatible => write!(f, "next component not compatible"),
            Self::Cycle => write!(f, "connection would create a cycle"),
        }
    }
}

impl RtspError {
    pub(crate) fn parse(kind: ParseErrorKind) -> Self {
        RtspError::Parse { kind }
    }
}

/// Convenience alias for `Result<T, RtspError>`.
pub type Result<T> = std::result::Result<T, RtspError>;

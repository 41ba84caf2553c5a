//! RTSP client signaling (RFC 2326).
//!
//! Requests are built from [`Command`]s by the session and serialized by
//! [`RtspParser`] on the way out. On the way in, the same parser cuts the
//! shared TCP stream into responses, SDP bodies and `$`-framed media.
//!
//! A typical exchange with a camera:
//!
//! ```text
//! C→S  OPTIONS  rtsp://cam/media.amp          CSeq: 1
//! C→S  DESCRIBE rtsp://cam/media.amp          CSeq: 2  Accept: application/sdp
//! S→C  200 OK + SDP body (Content-Base: rtsp://cam/media.amp/)
//! C→S  SETUP    rtsp://cam/media.amp/stream=0 CSeq: 3  Transport: RTP/AVP/TCP;unicast;interleaved=0-1
//! S→C  200 OK   Session: 12345678; timeout=60
//! C→S  PLAY     rtsp://cam/media.amp          CSeq: 4  Range: npt=0-
//! S→C  $0 <rtp> $1 <rtcp> $0 <rtp> ...
//! ```
//!
//! Responses are matched to requests by `CSeq`. Only one request is in
//! flight at a time.

pub mod parser;
pub mod request;
pub mod response;
pub mod sdp;

pub use parser::RtspParser;
pub use request::{Command, Headers, Method, RtspRequest};
pub use response::{PlayRange, RtspResponse};
pub use sdp::{MediaDescription, Sdp};

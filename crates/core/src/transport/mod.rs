//! Network transport for the RTSP client.
//!
//! Everything travels over one TCP connection: RTSP requests and responses
//! plus RTP and RTCP interleaved with `$` framing (RFC 2326 §10.12).
//!
//! [`tcp::Connection`] reads the socket and feeds the bytes into a
//! [`Pipeline`](crate::pipeline::Pipeline); the pipeline's source writes
//! requests back through [`tcp::Connection::writer`]. Reads time out every
//! [`tcp::POLL_INTERVAL`] so session timers keep firing on a quiet link.

pub mod tcp;

pub use tcp::{Connection, Exit};

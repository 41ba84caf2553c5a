pub mod bits;
pub mod error;
pub mod media;
pub mod message;
pub mod mp4;
pub mod pipeline;
pub mod protocol;
pub mod session;
pub mod transport;

#[cfg(test)]
mod test_fixtures;

pub use error::{Result, RtspError};
pub use media::{AacDepay, H264Depay, OnvifDepay};
pub use message::Message;
pub use mp4::Mp4Muxer;
pub use pipeline::Pipeline;
pub use protocol::RtspParser;
pub use session::{Auth, RtspSession, SessionConfig, SessionState};
pub use transport::Connection;

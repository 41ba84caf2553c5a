//! Fragmented MP4 output.
//!
//! ```text
//! ftyp moov | moof mdat | moof mdat | ...
//! └─ init ─┘ └─ one fragment per access unit
//! ```
//!
//! - [`isom`]: the ISO BMFF box model, a typed table driven encoder/parser.
//! - [`settings`]: per-codec track parameters taken from the SDP.
//! - [`builder`]: `moov`/`moof`/`mdat` construction and track timing.
//! - [`Mp4Muxer`]: the pipeline stage tying them together.

pub mod builder;
pub mod isom;
mod muxer;
pub mod settings;

pub use muxer::{Mp4Muxer, SyncCallback};

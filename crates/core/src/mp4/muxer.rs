use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{Bytes, BytesMut};

use super::builder::{BoxBuilder, TrackData};
use super::isom::{Encode as _, IsoBox};
use super::settings::{media_settings, mime_type};
use crate::error::Result;
use crate::message::{ElementaryMessage, IsomKind, IsomMessage, Message};
use crate::pipeline::{Component, Context, Stage, Tube};
use crate::protocol::sdp::Sdp;

/// Seconds between 1904-01-01 and 1970-01-01.
const EPOCH_OFFSET_1904: u64 = 2_082_844_800;

pub type SyncCallback = Box<dyn FnMut(f64) + Send>;

/// Tube turning H.264 and AAC access units into a fragmented MP4 stream.
///
/// An SDP starts a new movie: it is passed on, followed by the `ftyp` +
/// `moov` init segment. Every access unit afterwards becomes one `moof` +
/// `mdat` fragment. ONVIF metadata and anything else pass through.
#[derive(Default)]
pub struct Mp4Muxer {
    builder: BoxBuilder,
    on_sync: Option<SyncCallback>,
}

impl Mp4Muxer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called once per movie, with the wall-clock time (ms since the Unix
    /// epoch) of the start of the video, as soon as it is known.
    pub fn on_sync(&mut self, f: impl FnMut(f64) + Send + 'static) {
        self.on_sync = Some(Box::new(f));
    }

    pub fn tracks(&self) -> impl Iterator<Item = &TrackData> {
        self.builder.tracks()
    }

    pub fn bitrate(&self, payload_type: u8) -> Option<f64> {
        self.builder.track(payload_type).map(|t| t.bitrate)
    }

    pub fn framerate(&self, payload_type: u8) -> Option<f64> {
        self.builder.track(payload_type).map(|t| t.framerate)
    }

    pub fn ntp_presentation_time(&self) -> Option<f64> {
        self.builder.ntp_presentation_time()
    }

    fn init_segment(&mut self, sdp: &Sdp) -> Result<IsomMessage> {
        let date = now_1904();
        let tracks = media_settings(&sdp.media, date)?;
        for track in &tracks {
            tracing::info!(id = track.id, total = tracks.len(), codec = %track.name, "track");
        }

        let ftyp = IsoBox::new("ftyp")?;
        let moov = self.builder.moov(&tracks, date)?;
        tracing::trace!("init segment\n{}\n{}", ftyp.format(0), moov.format(0));

        let mut data = BytesMut::with_capacity(ftyp.byte_length() + moov.byte_length());
        ftyp.encode(&mut data);
        moov.encode(&mut data);
        Ok(IsomMessage {
            data: data.freeze(),
            kind: IsomKind::Init {
                mime: mime_type(&tracks),
            },
        })
    }

    fn fragment(&mut self, frame: &ElementaryMessage) -> Result<Bytes> {
        let moof = self
            .builder
            .moof(frame.payload_type, frame.timestamp, frame.data.len())?;
        let mdat = BoxBuilder::mdat(frame.data.clone())?;

        let mut data = BytesMut::with_capacity(moof.byte_length() + mdat.byte_length());
        moof.encode(&mut data);
        mdat.encode(&mut data);
        Ok(data.freeze())
    }
}

impl Stage for Mp4Muxer {
    fn incoming(&mut self, msg: Message, ctx: &mut Context) -> Result<()> {
        match msg {
            Message::Sdp(sdp) => {
                let init = self.init_segment(&sdp)?;
                ctx.push(Message::Sdp(sdp));
                ctx.push(Message::Isom(init));
            }
            Message::H264(h264) => {
                let frame = &h264.frame;
                if let Some(start) = self
                    .builder
                    .set_presentation_time(frame.payload_type, frame.ntp_timestamp)
                {
                    tracing::debug!(start, "video presentation time anchored");
                    if let Some(on_sync) = self.on_sync.as_mut() {
                        on_sync(start);
                    }
                }

                let checkpoint_time = match (h264.idr, frame.ntp_timestamp, self.ntp_presentation_time()) {
                    (true, Some(ntp), Some(start)) => Some((ntp - start) / 1000.0),
                    _ => None,
                };
                let data = self.fragment(frame)?;
                ctx.push(Message::Isom(IsomMessage {
                    data,
                    kind: IsomKind::Fragment {
                        ntp_timestamp: frame.ntp_timestamp,
                        checkpoint_time,
                    },
                }));
            }
            Message::Elementary(frame) => {
                let data = self.fragment(&frame)?;
                ctx.push(Message::Isom(IsomMessage {
                    data,
                    kind: IsomKind::Fragment {
                        ntp_timestamp: frame.ntp_timestamp,
                        checkpoint_time: None,
                    },
                }));
            }
            other => ctx.push(other),
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "mp4-muxer"
    }
}

impl Component for Mp4Muxer {
    type Role = Tube;
}

/// Current time in seconds since 1904, as stored in `mvhd`/`tkhd`/`mdhd`.
fn now_1904() -> u32 {
    let unix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs());
    u32::try_from(unix + EPOCH_OFFSET_1904).unwrap_or(u32::MAX)
}

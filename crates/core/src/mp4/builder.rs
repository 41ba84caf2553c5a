//! Builds the `moov` box once per movie and a `moof` + `mdat` pair per
//! access unit, keeping the timing state of every track.

use std::collections::BTreeMap;

use bytes::Bytes;

use super::isom::{Element, Encode as _, IsoBox, Value};
use super::settings::{TrackKind, TrackSettings};
use crate::error::{Result, RtspError};

/// `sample_depends_on` = 1 for the single sample of a fragment.
const FIRST_SAMPLE_FLAGS: u32 = 0x40;

/// Timing and rate state of one track.
#[derive(Debug, Clone)]
pub struct TrackData {
    pub id: u32,
    pub kind: TrackKind,
    pub payload_type: u8,
    pub clock_rate: u32,
    pub codec: String,
    pub name: String,
    pub default_frame_duration: u32,
    /// Sum of all sample durations so far, in clock ticks.
    pub base_media_decode_time: u64,
    last_timestamp: Option<u32>,
    /// Bits per second over the last completed window.
    pub bitrate: f64,
    /// Frames per second over the last completed window.
    pub framerate: f64,
    window_bytes: u64,
    window_duration: u64,
    window_frames: u32,
}

impl TrackData {
    fn new(settings: &TrackSettings) -> Self {
        Self {
            id: settings.id,
            kind: settings.kind,
            payload_type: settings.payload_type,
            clock_rate: settings.clock_rate,
            codec: settings.codec.clone(),
            name: settings.name.clone(),
            default_frame_duration: settings.default_frame_duration,
            base_media_decode_time: 0,
            last_timestamp: None,
            bitrate: 0.0,
            framerate: 0.0,
            window_bytes: 0,
            window_duration: 0,
            window_frames: 0,
        }
    }

    /// Ticks since the previous sample. RTP timestamps wrap, so the
    /// difference is taken as signed 32-bit; a step backwards counts as 0.
    fn duration(&mut self, timestamp: u32) -> u32 {
        let duration = match self.last_timestamp {
            Some(last) => (timestamp.wrapping_sub(last) as i32).max(0) as u32,
            None => self.default_frame_duration,
        };
        self.last_timestamp = Some(timestamp);
        duration
    }

    /// Recompute bitrate and framerate once a second worth of ticks has
    /// accumulated.
    fn update_rate(&mut self, byte_length: usize, duration: u32) {
        self.window_bytes += byte_length as u64;
        self.window_duration += u64::from(duration);
        self.window_frames += 1;

        if self.clock_rate > 0 && self.window_duration >= u64::from(self.clock_rate) {
            let seconds = self.window_duration as f64 / f64::from(self.clock_rate);
            self.bitrate = (8 * self.window_bytes) as f64 / seconds;
            self.framerate = f64::from(self.window_frames) / seconds;
            self.window_bytes = 0;
            self.window_duration = 0;
            self.window_frames = 0;
        }
    }
}

/// Box factory for one fragmented movie.
#[derive(Debug, Default)]
pub struct BoxBuilder {
    sequence_number: u32,
    /// Wall-clock time (ms) of the start of the video media, extrapolated
    /// from the first NTP timestamp and the decode time at that point.
    ntp_presentation_time: Option<f64>,
    tracks: BTreeMap<u8, TrackData>,
}

impl BoxBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&self, payload_type: u8) -> Option<&TrackData> {
        self.tracks.get(&payload_type)
    }

    /// Tracks in payload type order.
    pub fn tracks(&self) -> impl Iterator<Item = &TrackData> {
        self.tracks.values()
    }

    pub fn ntp_presentation_time(&self) -> Option<f64> {
        self.ntp_presentation_time
    }

    pub fn sequence_number(&self) -> u32 {
        self.sequence_number
    }

    fn trak(settings: &TrackSettings) -> Result<IsoBox> {
        let mut dref = IsoBox::with("dref", [("entry_count", Value::from(1u32))])?;
        dref.append(IsoBox::new("url ")?);

        let stbl = IsoBox::new("stbl")?
            .child(IsoBox::new("stsd")?.child(settings.sample_entry.clone()))
            .child(IsoBox::new("stts")?)
            .child(IsoBox::new("stsc")?)
            .child(IsoBox::new("stco")?)
            .child(IsoBox::new("stsz")?)
            .child(IsoBox::new("stss")?);

        let minf = IsoBox::new("minf")?
            .child(settings.media_header.clone())
            .child(IsoBox::new("dinf")?.child(dref))
            .child(stbl);

        let mdia = IsoBox::new("mdia")?
            .child(IsoBox::with("mdhd", settings.mdhd.iter().cloned())?)
            .child(IsoBox::with("hdlr", settings.hdlr.iter().cloned())?)
            .child(minf);

        Ok(IsoBox::new("trak")?
            .child(IsoBox::with("tkhd", settings.tkhd.iter().cloned())?)
            .child(mdia))
    }

    /// Build `moov` for `tracks` and reset all fragment state. `date` is
    /// seconds since 1904.
    pub fn moov(&mut self, tracks: &[TrackSettings], date: u32) -> Result<IsoBox> {
        self.sequence_number = 0;
        self.ntp_presentation_time = None;
        self.tracks.clear();

        let mut moov = IsoBox::new("moov")?;
        moov.append(IsoBox::with(
            "mvhd",
            [
                ("creation_time", Value::from(date)),
                ("modification_time", Value::from(date)),
                ("duration", Value::from(0u32)),
            ],
        )?);

        let mut mvex = IsoBox::new("mvex")?;
        for settings in tracks {
            self.tracks
                .insert(settings.payload_type, TrackData::new(settings));
            moov.append(Self::trak(settings)?);
            mvex.append(IsoBox::with("trex", [("track_ID", Value::from(settings.id))])?);
        }
        moov.append(mvex);
        Ok(moov)
    }

    /// Build the `moof` for one sample of `byte_length` bytes and advance
    /// the track's decode time.
    pub fn moof(&mut self, payload_type: u8, timestamp: u32, byte_length: usize) -> Result<IsoBox> {
        let track = self
            .tracks
            .get_mut(&payload_type)
            .ok_or(RtspError::MissingTrack { payload_type })?;
        let duration = track.duration(timestamp);

        let sample_size = u32::try_from(byte_length).map_err(|_| RtspError::FieldRange {
            key: "sample_size".to_string(),
            value: byte_length as u64,
        })?;
        let trun = IsoBox::with(
            "trun",
            [
                ("sample_duration", Value::from(duration)),
                ("sample_size", Value::from(sample_size)),
                ("first_sample_flags", Value::from(FIRST_SAMPLE_FLAGS)),
            ],
        )?;
        let traf = IsoBox::new("traf")?
            .child(IsoBox::with("tfhd", [("track_ID", Value::from(track.id))])?)
            .child(IsoBox::with(
                "tfdt",
                [("baseMediaDecodeTime", Value::from(track.base_media_decode_time))],
            )?)
            .child(trun);
        let mut moof = IsoBox::new("moof")?
            .child(IsoBox::with(
                "mfhd",
                [("sequence_number", Value::from(self.sequence_number))],
            )?)
            .child(traf);
        self.sequence_number = self.sequence_number.wrapping_add(1);
        track.base_media_decode_time += u64::from(duration);

        // Samples start right after the mdat header.
        let data_offset = moof.byte_length() as u64 + 8;
        if let Some(trun) = moof.find_mut("trun") {
            trun.set("data_offset", data_offset)?;
        }

        track.update_rate(byte_length, duration);
        Ok(moof)
    }

    pub fn mdat(data: Bytes) -> Result<IsoBox> {
        let mut mdat = IsoBox::new("mdat")?;
        mdat.add("data", Element::U8Array(data))?;
        Ok(mdat)
    }

    /// Anchor the presentation time on the first NTP timestamp of the
    /// video track. Returns the new anchor when this call set it.
    pub fn set_presentation_time(&mut self, payload_type: u8, ntp_timestamp: Option<f64>) -> Option<f64> {
        if self.ntp_presentation_time.is_some() {
            return None;
        }
        let ntp = ntp_timestamp?;
        let track = self.tracks.get(&payload_type)?;
        if track.kind != TrackKind::Video || track.clock_rate == 0 {
            return None;
        }
        let elapsed = track.base_media_decode_time as f64 / f64::from(track.clock_rate);
        let start = ntp - 1000.0 * elapsed;
        self.ntp_presentation_time = Some(start);
        Some(start)
    }
}

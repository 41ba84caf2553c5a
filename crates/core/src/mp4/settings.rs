//! Per-track settings derived from an SDP media section.
//!
//! Each supported codec contributes the values for its `trak` boxes, the
//! media header box (`vmhd` or `smhd`), its sample entry (`avc1` or `mp4a`)
//! and the bookkeeping the fragment builder needs.

use base64::Engine as _;
use base64::prelude::BASE64_STANDARD;
use bytes::Bytes;

use super::isom::{IsoBox, Value};
use crate::error::{ParseErrorKind, Result, RtspError};
use crate::media::aac::AacDepacketizer;
use crate::media::h264::H264Depacketizer;
use crate::media::sps::Sps;
use crate::media::Depacketizer;
use crate::protocol::sdp::MediaDescription;

/// 90 kHz at 25 fps, used when the SDP has no usable framerate.
const FALLBACK_FRAME_DURATION: u32 = 3600;

/// Every AAC frame decodes to 1024 samples.
const AAC_FRAME_DURATION: u32 = 1024;

const AAC_FALLBACK_BITRATE: u32 = 320_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Video,
    Audio,
}

/// Everything needed to describe one track in `moov` and to fragment it.
#[derive(Debug, Clone)]
pub struct TrackSettings {
    pub id: u32,
    pub kind: TrackKind,
    pub payload_type: u8,
    pub clock_rate: u32,
    /// Ticks per frame, used for the first fragment of the track.
    pub default_frame_duration: u32,
    /// RFC 6381 codec string, e.g. `avc1.4d0032`.
    pub codec: String,
    /// Human readable codec description.
    pub name: String,
    pub tkhd: Vec<(&'static str, Value)>,
    pub mdhd: Vec<(&'static str, Value)>,
    pub hdlr: Vec<(&'static str, Value)>,
    /// `vmhd` or `smhd`.
    pub media_header: IsoBox,
    /// `avc1` with `avcC`, or `mp4a` with `esds`.
    pub sample_entry: IsoBox,
}

/// Settings for every H.264 and AAC media, with track ids from 1 in SDP
/// order. Other media are skipped. `date` is seconds since 1904.
pub fn media_settings(media: &[MediaDescription], date: u32) -> Result<Vec<TrackSettings>> {
    let mut tracks = Vec::new();
    for m in media {
        let id = tracks.len() as u32 + 1;
        if H264Depacketizer::accepts(m) {
            tracks.push(h264_settings(m, date, id)?);
        } else if AacDepacketizer::accepts(m) {
            tracks.push(aac_settings(m, date, id)?);
        }
    }
    Ok(tracks)
}

/// `video/mp4; codecs="avc1.4d0032, mp4a.40.2"`, or `audio/mp4` without a
/// video track.
pub fn mime_type(tracks: &[TrackSettings]) -> String {
    let container = if tracks.iter().any(|t| t.kind == TrackKind::Video) {
        "video/mp4"
    } else {
        "audio/mp4"
    };
    let codecs: Vec<&str> = tracks.iter().map(|t| t.codec.as_str()).collect();
    format!("{container}; codecs=\"{}\"", codecs.join(", "))
}

// --- H.264 ---

pub fn h264_settings(media: &MediaDescription, date: u32, id: u32) -> Result<TrackSettings> {
    let invalid = || RtspError::parse(ParseErrorKind::InvalidParameterSet);
    let fmtp = media.fmtp().ok_or_else(invalid)?;
    let parameter_sets = fmtp
        .get("sprop-parameter-sets")
        .ok_or_else(invalid)?
        .split(',')
        .map(|set| BASE64_STANDARD.decode(set.trim()).map(Bytes::from))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|_| invalid())?;

    // The first set is the SPS, the rest are PPS.
    let (sps, pps) = parameter_sets.split_first().ok_or_else(invalid)?;
    let parsed = Sps::parse(sps)?;
    let clock_rate = media.clock_rate().unwrap_or(90_000);

    let default_frame_duration = match media.attributes.framerate {
        Some(fps) if fps > 0.0 => (f64::from(clock_rate) / fps).round() as u32,
        _ => FALLBACK_FRAME_DURATION,
    };
    let profile_level_id = match fmtp.get("profile-level-id") {
        Some(id) => id.to_string(),
        None => format!("{:02x}{:02x}{:02x}", sps[1], sps[2], sps[3]),
    };

    let avcc = IsoBox::with(
        "avcC",
        [
            ("AVCProfileIndication", Value::from(sps[1])),
            ("profile_compatibility", Value::from(sps[2])),
            ("AVCLevelIndication", Value::from(sps[3])),
            ("sequenceParameterSets", Value::from(vec![sps.clone()])),
            ("pictureParameterSets", Value::from(pps.to_vec())),
        ],
    )?;
    let width = u16::try_from(parsed.width).map_err(|_| invalid())?;
    let height = u16::try_from(parsed.height).map_err(|_| invalid())?;
    let avc1 = IsoBox::with(
        "avc1",
        [("width", Value::from(width)), ("height", Value::from(height))],
    )?
    .child(avcc);

    Ok(TrackSettings {
        id,
        kind: TrackKind::Video,
        payload_type: media.payload_type().unwrap_or(96),
        clock_rate,
        default_frame_duration,
        name: h264_name(&profile_level_id),
        codec: format!("avc1.{profile_level_id}"),
        tkhd: vec![
            ("track_ID", id.into()),
            ("creation_time", date.into()),
            ("modification_time", date.into()),
            ("width", (u32::from(width) << 16).into()),
            ("height", (u32::from(height) << 16).into()),
            ("volume", 0u16.into()),
        ],
        mdhd: vec![
            ("timescale", clock_rate.into()),
            ("creation_time", date.into()),
            ("modification_time", date.into()),
            ("duration", 0u32.into()),
        ],
        hdlr: Vec::new(),
        media_header: IsoBox::new("vmhd")?,
        sample_entry: avc1,
    })
}

/// `H.264, Main Profile, level 5.0` from a `profile-level-id` like `4d0032`.
fn h264_name(profile_level_id: &str) -> String {
    let byte = |i: usize| {
        profile_level_id
            .get(i..i + 2)
            .and_then(|hex| u8::from_str_radix(hex, 16).ok())
            .unwrap_or(0)
    };
    let profile = match byte(0) {
        66 => "Baseline Profile".to_string(),
        77 => "Main Profile".to_string(),
        100 => "High Profile".to_string(),
        other => other.to_string(),
    };
    format!("H.264, {profile}, level {:.1}", f64::from(byte(4)) / 10.0)
}

// --- AAC ---

/// The leading fields of an MPEG-4 AudioSpecificConfig (ISO/IEC 14496-3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioSpecificConfig {
    pub audio_object_type: u8,
    pub frequency_index: Option<u8>,
    pub channel_config: Option<u8>,
}

impl AudioSpecificConfig {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let [b0, b1, ..] = *bytes else {
            return Err(RtspError::parse(ParseErrorKind::InvalidAudioConfig));
        };

        let audio_object_type = b0 >> 3;
        if audio_object_type == 31 {
            return Ok(Self {
                audio_object_type: 32 + (b0 & 0x07) * 8 + (b1 >> 5),
                frequency_index: None,
                channel_config: None,
            });
        }

        let frequency_index = (b0 & 0x07) * 2 + (b1 >> 7);
        let channel_config = (frequency_index != 0x0f).then_some((b1 >> 3) & 0x0f);
        Ok(Self {
            audio_object_type,
            frequency_index: Some(frequency_index),
            channel_config,
        })
    }

    /// e.g. `AAC LC, 16 kHz, Mono`.
    pub fn name(&self) -> String {
        let mut name = match self.audio_object_type {
            1 => "AAC Main".to_string(),
            2 => "AAC LC".to_string(),
            other => format!("AAC ({other})"),
        };
        let Some(index) = self.frequency_index else {
            return name;
        };
        name.push_str(", ");
        name.push_str(frequency_name(index));
        match self.channel_config {
            Some(1) => name.push_str(", Mono"),
            Some(2) => name.push_str(", Stereo"),
            Some(channels) => name.push_str(&format!(", {channels}")),
            None => {}
        }
        name
    }
}

fn frequency_name(index: u8) -> &'static str {
    match index {
        0x0 => "96 kHz",
        0x1 => "88.2 kHz",
        0x2 => "64 kHz",
        0x3 => "48 kHz",
        0x4 => "44.1 kHz",
        0x5 => "32 kHz",
        0x6 => "24 kHz",
        0x7 => "22.05 kHz",
        0x8 => "16 kHz",
        0x9 => "12 kHz",
        0xa => "11.025 kHz",
        0xb => "8 kHz",
        0xc => "7.35 kHz",
        0xf => "custom",
        _ => "unknown",
    }
}

pub fn aac_settings(media: &MediaDescription, date: u32, id: u32) -> Result<TrackSettings> {
    let invalid = || RtspError::parse(ParseErrorKind::InvalidAudioConfig);
    let fmtp = media.fmtp().ok_or_else(invalid)?;
    let config_bytes = fmtp.get("config").and_then(from_hex).ok_or_else(invalid)?;
    let config = AudioSpecificConfig::parse(&config_bytes)?;
    let config_len = u8::try_from(config_bytes.len())
        .ok()
        .filter(|&len| len <= u8::MAX - 23)
        .ok_or_else(invalid)?;

    let bitrate = fmtp.get_u32("bitrate").unwrap_or(AAC_FALLBACK_BITRATE);
    let clock_rate = media.clock_rate().unwrap_or(48_000);
    // 16.16 fixed point, zero when the rate does not fit
    let samplerate = u32::try_from(u64::from(clock_rate) << 16).unwrap_or(0);

    let esds = IsoBox::with(
        "esds",
        [
            ("ES_DescrLength", Value::from(23 + config_len)),
            ("DecoderConfigDescrLength", Value::from(15 + config_len)),
            ("DecSpecificInfoShortLength", Value::from(config_len)),
            ("audioConfigBytes", Value::from(Bytes::from(config_bytes))),
            ("maxBitRate", Value::from(bitrate)),
            ("avgBitRate", Value::from(bitrate)),
        ],
    )?;
    let mut mp4a = IsoBox::with("mp4a", [("samplerate", Value::from(samplerate))])?;
    if let Some(channels @ 1..=2) = config.channel_config {
        mp4a.set("channelcount", u16::from(channels))?;
    }

    Ok(TrackSettings {
        id,
        kind: TrackKind::Audio,
        payload_type: media.payload_type().unwrap_or(97),
        clock_rate,
        default_frame_duration: AAC_FRAME_DURATION,
        codec: format!("mp4a.40.{}", config.audio_object_type),
        name: config.name(),
        tkhd: vec![
            ("track_ID", id.into()),
            ("creation_time", date.into()),
            ("modification_time", date.into()),
            ("width", 0u32.into()),
            ("height", 0u32.into()),
            ("volume", 0x0100u16.into()),
        ],
        mdhd: vec![
            ("timescale", clock_rate.into()),
            ("creation_time", date.into()),
            ("modification_time", date.into()),
            ("duration", 0u32.into()),
        ],
        hdlr: vec![
            ("handler_type", "soun".into()),
            ("name", "SoundHandler\0".into()),
        ],
        media_header: IsoBox::new("smhd")?,
        sample_entry: mp4a.child(esds),
    })
}

fn from_hex(hex: &str) -> Option<Vec<u8>> {
    if hex.is_empty() || hex.len() % 2 != 0 {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::sdp::Sdp;
    use crate::test_fixtures::SDP_VIDEO_AUDIO_SVG;

    fn tracks() -> Vec<TrackSettings> {
        let sdp = Sdp::parse(SDP_VIDEO_AUDIO_SVG).unwrap();
        media_settings(&sdp.media, 3_600_000_000).unwrap()
    }

    #[test]
    fn tracks_for_video_and_audio_only() {
        let tracks = tracks();
        assert_eq!(tracks.len(), 2);
        assert_eq!((tracks[0].id, tracks[0].payload_type), (1, 96));
        assert_eq!((tracks[1].id, tracks[1].payload_type), (2, 97));
    }

    #[test]
    fn mime_lists_all_codecs() {
        assert_eq!(
            mime_type(&tracks()),
            "video/mp4; codecs=\"avc1.4d0032, mp4a.40.2\""
        );
        assert_eq!(mime_type(&tracks()[1..]), "audio/mp4; codecs=\"mp4a.40.2\"");
    }

    // --- H.264 ---

    #[test]
    fn video_track_from_sps() {
        let video = &tracks()[0];
        assert_eq!(video.kind, TrackKind::Video);
        assert_eq!(video.clock_rate, 90_000);
        assert_eq!(video.default_frame_duration, 7500);
        assert_eq!(video.name, "H.264, Main Profile, level 5.0");

        let avc1 = &video.sample_entry;
        assert_eq!(avc1.get_int("width").unwrap(), 2592);
        assert_eq!(avc1.get_int("height").unwrap(), 1944);
        let avcc = avc1.find("avcC").unwrap();
        assert_eq!(avcc.get_int("AVCProfileIndication").unwrap(), 0x4d);
        assert_eq!(avcc.get_int("AVCLevelIndication").unwrap(), 0x32);
        let Value::ParameterSets(pps) = avcc.get("pictureParameterSets").unwrap() else {
            panic!("expected parameter sets");
        };
        assert_eq!(&pps[0][..], &[0x68, 0xee, 0x3c, 0x80]);
    }

    #[test]
    fn video_without_framerate_uses_fallback() {
        let text = SDP_VIDEO_AUDIO_SVG.replace("a=framerate:12.000000\r\n", "");
        let sdp = Sdp::parse(&text).unwrap();
        let video = h264_settings(&sdp.media[0], 0, 1).unwrap();
        assert_eq!(video.default_frame_duration, FALLBACK_FRAME_DURATION);
    }

    #[test]
    fn bad_sprop_rejected() {
        let text = SDP_VIDEO_AUDIO_SVG.replace("Z00AMuKQBRAevy4C3AQEBpB4kRU=", "!!!");
        let sdp = Sdp::parse(&text).unwrap();
        assert!(matches!(
            h264_settings(&sdp.media[0], 0, 1),
            Err(RtspError::Parse {
                kind: ParseErrorKind::InvalidParameterSet
            })
        ));
    }

    #[test]
    fn profile_names() {
        assert_eq!(h264_name("42e01f"), "H.264, Baseline Profile, level 3.1");
        assert_eq!(h264_name("640028"), "H.264, High Profile, level 4.0");
        assert_eq!(h264_name("580028"), "H.264, 88, level 4.0");
    }

    // --- AAC ---

    #[test]
    fn audio_track_from_config() {
        let audio = &tracks()[1];
        assert_eq!(audio.kind, TrackKind::Audio);
        assert_eq!(audio.clock_rate, 16_000);
        assert_eq!(audio.default_frame_duration, 1024);
        assert_eq!(audio.name, "AAC LC, 16 kHz, Mono");

        let mp4a = &audio.sample_entry;
        assert_eq!(mp4a.get_int("samplerate").unwrap(), 16_000 << 16);
        assert_eq!(mp4a.get_int("channelcount").unwrap(), 1);
        let esds = mp4a.find("esds").unwrap();
        assert_eq!(
            esds.get("audioConfigBytes").unwrap(),
            Value::Bytes(Bytes::from_static(&[0x14, 0x08]))
        );
        assert_eq!(esds.get_int("ES_DescrLength").unwrap(), 25);
        assert_eq!(esds.get_int("DecoderConfigDescrLength").unwrap(), 17);
        assert_eq!(esds.get_int("maxBitRate").unwrap(), 320_000);
    }

    #[test]
    fn audio_specific_config_variants() {
        let lc = AudioSpecificConfig::parse(&[0x11, 0x90]).unwrap();
        assert_eq!(lc.name(), "AAC LC, 48 kHz, Stereo");

        let escaped = AudioSpecificConfig::parse(&[0xf8, 0x20]).unwrap();
        assert_eq!(escaped.audio_object_type, 33);
        assert_eq!(escaped.name(), "AAC (33)");

        let custom = AudioSpecificConfig::parse(&[0x17, 0x80]).unwrap();
        assert_eq!(custom.frequency_index, Some(0x0f));
        assert_eq!(custom.name(), "AAC LC, custom");

        assert!(AudioSpecificConfig::parse(&[0x12]).is_err());
    }

    #[test]
    fn hex_config() {
        assert_eq!(from_hex("1408"), Some(vec![0x14, 0x08]));
        assert_eq!(from_hex("1210"), Some(vec![0x12, 0x10]));
        assert_eq!(from_hex("141"), None);
        assert_eq!(from_hex("zz"), None);
    }
}

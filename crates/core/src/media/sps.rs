//! H.264 sequence parameter set walker (ITU-T H.264 §7.3.2.1.1).
//!
//! Only the fields needed to size the `avc1` sample entry are kept; the
//! rest are skipped in order.

use crate::bits::BitReader;
use crate::error::{ParseErrorKind, Result, RtspError};

/// Profiles whose SPS carries chroma format and bit depth fields.
const HIGH_PROFILES: [u8; 8] = [100, 110, 122, 244, 44, 83, 86, 118];

/// Geometry and profile extracted from an SPS NAL unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sps {
    pub profile_idc: u8,
    pub constraint_flags: u8,
    pub level_idc: u8,
    pub width: u32,
    pub height: u32,
}

impl Sps {
    /// Parse an SPS NAL unit, header byte included.
    pub fn parse(nal: &[u8]) -> Result<Self> {
        if nal.len() < 4 || nal[0] & 0x1f != 7 {
            return Err(RtspError::parse(ParseErrorKind::InvalidParameterSet));
        }

        let rbsp = strip_emulation_prevention(&nal[1..]);
        let mut r = BitReader::new(&rbsp);

        let profile_idc = r.read_bits(8)? as u8;
        let constraint_flags = r.read_bits(8)? as u8;
        let level_idc = r.read_bits(8)? as u8;
        r.skip_ue()?; // seq_parameter_set_id

        if HIGH_PROFILES.contains(&profile_idc) {
            let chroma_format_idc = r.read_ue()?;
            if chroma_format_idc == 3 {
                r.skip_bits(1)?; // separate_colour_plane_flag
            }
            r.skip_ue()?; // bit_depth_luma_minus8
            r.skip_ue()?; // bit_depth_chroma_minus8
            r.skip_bits(1)?; // qpprime_y_zero_transform_bypass_flag
            if r.read_bit()? {
                let lists = if chroma_format_idc == 3 { 12 } else { 8 };
                for i in 0..lists {
                    if r.read_bit()? {
                        skip_scaling_list(&mut r, if i < 6 { 16 } else { 64 })?;
                    }
                }
            }
        }

        r.skip_ue()?; // log2_max_frame_num_minus4
        match r.read_ue()? {
            0 => r.skip_ue()?, // log2_max_pic_order_cnt_lsb_minus4
            1 => {
                r.skip_bits(1)?; // delta_pic_order_always_zero_flag
                r.skip_se()?; // offset_for_non_ref_pic
                r.skip_se()?; // offset_for_top_to_bottom_field
                let cycle = r.read_ue()?;
                for _ in 0..cycle {
                    r.skip_se()?;
                }
            }
            _ => {}
        }
        r.skip_ue()?; // max_num_ref_frames
        r.skip_bits(1)?; // gaps_in_frame_num_value_allowed_flag

        let width_in_mbs = r.read_ue()? + 1;
        let height_in_map_units = r.read_ue()? + 1;
        let frame_mbs_only = r.read_bit()?;
        if !frame_mbs_only {
            r.skip_bits(1)?; // mb_adaptive_frame_field_flag
        }
        r.skip_bits(1)?; // direct_8x8_inference_flag

        let (mut left, mut right, mut top, mut bottom) = (0, 0, 0, 0);
        if r.read_bit()? {
            left = r.read_ue()?;
            right = r.read_ue()?;
            top = r.read_ue()?;
            bottom = r.read_ue()?;
        }

        let frame_height_factor = if frame_mbs_only { 1 } else { 2 };
        let width = cropped(width_in_mbs, 16, left, right)?;
        let height = cropped(height_in_map_units, frame_height_factor * 16, top, bottom)?;

        Ok(Sps {
            profile_idc,
            constraint_flags,
            level_idc,
            width,
            height,
        })
    }

    /// Level as a decimal number, e.g. `4.1` for `level_idc` 41.
    pub fn level(&self) -> f64 {
        f64::from(self.level_idc) / 10.0
    }
}

/// `units * unit_size - 2 * (start + end)`, clamped at zero. Sizes that do
/// not fit in 32 bits make the SPS invalid.
fn cropped(units: u32, unit_size: u32, start: u32, end: u32) -> Result<u32> {
    let invalid = || RtspError::parse(ParseErrorKind::InvalidParameterSet);
    let full = units.checked_mul(unit_size).ok_or_else(invalid)?;
    let crop = start
        .checked_add(end)
        .and_then(|c| c.checked_mul(2))
        .ok_or_else(invalid)?;
    Ok(full.saturating_sub(crop))
}

fn skip_scaling_list(r: &mut BitReader<'_>, size: usize) -> Result<()> {
    let mut last = 8i32;
    let mut next = 8i32;
    for _ in 0..size {
        if next != 0 {
            let delta = r.read_se()?;
            next = (last + delta + 256) % 256;
        }
        if next != 0 {
            last = next;
        }
    }
    Ok(())
}

/// Drop the `0x03` of every `00 00 03` sequence.
fn strip_emulation_prevention(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut zeros = 0;
    for &b in data {
        if zeros >= 2 && b == 3 {
            zeros = 0;
            continue;
        }
        zeros = if b == 0 { zeros + 1 } else { 0 };
        out.push(b);
    }
    out
}

//! Sequence parameter set, including VUI and HRD parameters.

use crate::error::{ParseError, ParseResult};
use crate::h264::golomb::ExpGolomb;
use crate::h264::state::SequenceState;
use crate::h264::syntax::{Severity, SyntaxReader};
use crate::tree::AttrValue;

/// Profiles whose SPS carries chroma format and bit depth fields.
const HIGH_PROFILES: [u8; 13] = [100, 110, 122, 244, 44, 83, 86, 118, 128, 138, 139, 134, 135];

const KNOWN_PROFILES: [u8; 16] = [
    66, 77, 88, 100, 110, 122, 244, 44, 83, 86, 118, 128, 138, 139, 134, 135,
];

const KNOWN_LEVELS: [u8; 20] = [
    9, 10, 11, 12, 13, 20, 21, 22, 30, 31, 32, 40, 41, 42, 50, 51, 52, 60, 61, 62,
];

/// Largest frame size of any level, in macroblocks.
pub const MAX_FRAME_SIZE_IN_MBS: u32 = 139_264;

pub fn is_known_profile(profile_idc: u8) -> bool {
    KNOWN_PROFILES.contains(&profile_idc)
}

/// `scaling_list()`; values are checked but not kept.
pub(crate) fn skip_scaling_list(r: &mut SyntaxReader<'_, '_>, size: u32) -> ParseResult<()> {
    let mut last = 8i32;
    let mut next = 8i32;
    for _ in 0..size {
        if next != 0 {
            let delta = r.cursor().read_se()?;
            if !(-128..=127).contains(&delta) {
                return Err(ParseError::semantic("delta_scale", delta));
            }
            next = (last + delta + 256) % 256;
        }
        if next != 0 {
            last = next;
        }
    }
    Ok(())
}

/// Parse an SPS payload (after the NAL header byte).
pub fn parse_sps(r: &mut SyntaxReader<'_, '_>) -> ParseResult<SequenceState> {
    let profile_idc = r.bits("profile_idc", 8)? as u8;
    if !is_known_profile(profile_idc) {
        return Err(ParseError::semantic("profile_idc", profile_idc));
    }
    r.bits("constraint_set_flags", 6)?;
    r.bits_max("reserved_zero_2bits", 2, 0, Severity::Soft)?;
    let level_idc = r.bits("level_idc", 8)? as u8;
    if !KNOWN_LEVELS.contains(&level_idc) {
        r.note("level_idc_known", AttrValue::Unsigned(u64::from(level_idc)), false);
    }
    let sps_id = r.ue("seq_parameter_set_id", 31, Severity::Fatal)?;

    let mut chroma_format_idc = 1;
    let mut separate_colour_plane = false;
    let mut bit_depth_luma = 8;
    let mut bit_depth_chroma = 8;
    if HIGH_PROFILES.contains(&profile_idc) {
        chroma_format_idc = r.ue("chroma_format_idc", 3, Severity::Fatal)?;
        if chroma_format_idc == 3 {
            separate_colour_plane = r.flag("separate_colour_plane_flag")?;
        }
        bit_depth_luma = 8 + r.ue("bit_depth_luma_minus8", 6, Severity::Fatal)?;
        bit_depth_chroma = 8 + r.ue("bit_depth_chroma_minus8", 6, Severity::Fatal)?;
        r.flag("qpprime_y_zero_transform_bypass_flag")?;
        if r.flag("seq_scaling_matrix_present_flag")? {
            let lists = if chroma_format_idc == 3 { 12 } else { 8 };
            for i in 0..lists {
                if r.cursor().read_flag()? {
                    skip_scaling_list(r, if i < 6 { 16 } else { 64 })?;
                }
            }
        }
    }

    let log2_max_frame_num = 4 + r.ue("log2_max_frame_num_minus4", 12, Severity::Fatal)?;
    let pic_order_cnt_type = r.ue("pic_order_cnt_type", 2, Severity::Fatal)?;
    let mut log2_max_pic_order_cnt_lsb = 0;
    let mut delta_pic_order_always_zero = false;
    match pic_order_cnt_type {
        0 => {
            log2_max_pic_order_cnt_lsb =
                4 + r.ue("log2_max_pic_order_cnt_lsb_minus4", 12, Severity::Fatal)?;
        }
        1 => {
            delta_pic_order_always_zero = r.flag("delta_pic_order_always_zero_flag")?;
            r.se("offset_for_non_ref_pic", i32::MIN + 1, i32::MAX, Severity::Soft)?;
            r.se("offset_for_top_to_bottom_field", i32::MIN + 1, i32::MAX, Severity::Soft)?;
            let cycle = r.ue("num_ref_frames_in_pic_order_cnt_cycle", 255, Severity::Fatal)?;
            for _ in 0..cycle {
                r.cursor().read_se()?;
            }
        }
        _ => {}
    }

    let max_num_ref_frames = r.ue("max_num_ref_frames", 16, Severity::Fatal)?;
    r.flag("gaps_in_frame_num_value_allowed_flag")?;
    let pic_width_in_mbs = 1 + r.ue("pic_width_in_mbs_minus1", 1023, Severity::Fatal)?;
    let pic_height_in_map_units = 1 + r.ue("pic_height_in_map_units_minus1", 1023, Severity::Fatal)?;
    let frame_mbs_only = r.flag("frame_mbs_only_flag")?;
    let mb_adaptive_frame_field = !frame_mbs_only && r.flag("mb_adaptive_frame_field_flag")?;
    r.flag("direct_8x8_inference_flag")?;
    if r.flag("frame_cropping_flag")? {
        for name in [
            "frame_crop_left_offset",
            "frame_crop_right_offset",
            "frame_crop_top_offset",
            "frame_crop_bottom_offset",
        ] {
            r.ue(name, 8192, Severity::Soft)?;
        }
    }
    let vui_present = r.flag("vui_parameters_present_flag")?;
    if vui_present {
        parse_vui(r)?;
    }

    let sps = SequenceState {
        sps_id,
        profile_idc,
        level_idc,
        chroma_format_idc,
        separate_colour_plane,
        bit_depth_luma,
        bit_depth_chroma,
        log2_max_frame_num,
        pic_order_cnt_type,
        log2_max_pic_order_cnt_lsb,
        delta_pic_order_always_zero,
        max_num_ref_frames,
        pic_width_in_mbs,
        pic_height_in_map_units,
        frame_mbs_only,
        mb_adaptive_frame_field,
        vui_present,
    };
    let frame_size = sps.frame_size_in_mbs();
    if frame_size > MAX_FRAME_SIZE_IN_MBS {
        return Err(ParseError::semantic("frame_size_in_mbs", frame_size));
    }
    Ok(sps)
}

fn parse_vui(r: &mut SyntaxReader<'_, '_>) -> ParseResult<()> {
    if r.flag("aspect_ratio_info_present_flag")? {
        let idc = r.bits("aspect_ratio_idc", 8)?;
        if idc == 255 {
            r.bits("sar_width", 16)?;
            r.bits("sar_height", 16)?;
        } else if idc > 16 {
            r.note("aspect_ratio_idc_known", AttrValue::Unsigned(u64::from(idc)), false);
        }
    }
    if r.flag("overscan_info_present_flag")? {
        r.flag("overscan_appropriate_flag")?;
    }
    if r.flag("video_signal_type_present_flag")? {
        r.bits_max("video_format", 3, 5, Severity::Soft)?;
        r.flag("video_full_range_flag")?;
        if r.flag("colour_description_present_flag")? {
            r.bits("colour_primaries", 8)?;
            r.bits("transfer_characteristics", 8)?;
            r.bits("matrix_coefficients", 8)?;
        }
    }
    if r.flag("chroma_loc_info_present_flag")? {
        r.ue("chroma_sample_loc_type_top_field", 5, Severity::Fatal)?;
        r.ue("chroma_sample_loc_type_bottom_field", 5, Severity::Fatal)?;
    }
    if r.flag("timing_info_present_flag")? {
        let units = r.bits("num_units_in_tick", 32)?;
        let scale = r.bits("time_scale", 32)?;
        if units == 0 || scale == 0 {
            r.note("timing_info_nonzero", AttrValue::Flag(false), false);
        }
        r.flag("fixed_frame_rate_flag")?;
    }
    let nal_hrd = r.flag("nal_hrd_parameters_present_flag")?;
    if nal_hrd {
        parse_hrd(r)?;
    }
    let vcl_hrd = r.flag("vcl_hrd_parameters_present_flag")?;
    if vcl_hrd {
        parse_hrd(r)?;
    }
    if nal_hrd || vcl_hrd {
        r.flag("low_delay_hrd_flag")?;
    }
    r.flag("pic_struct_present_flag")?;
    if r.flag("bitstream_restriction_flag")? {
        r.flag("motion_vectors_over_pic_boundaries_flag")?;
        r.ue("max_bytes_per_pic_denom", 16, Severity::Fatal)?;
        r.ue("max_bits_per_mb_denom", 16, Severity::Fatal)?;
        r.ue("log2_max_mv_length_horizontal", 16, Severity::Fatal)?;
        r.ue("log2_max_mv_length_vertical", 16, Severity::Fatal)?;
        r.ue("max_num_reorder_frames", 16, Severity::Soft)?;
        r.ue("max_dec_frame_buffering", 16, Severity::Soft)?;
    }
    Ok(())
}

fn parse_hrd(r: &mut SyntaxReader<'_, '_>) -> ParseResult<()> {
    let cpb_cnt = 1 + r.ue("cpb_cnt_minus1", 31, Severity::Fatal)?;
    r.bits("bit_rate_scale", 4)?;
    r.bits("cpb_size_scale", 4)?;
    for _ in 0..cpb_cnt {
        let c = r.cursor();
        c.read_ue()?; // bit_rate_value_minus1
        c.read_ue()?; // cpb_size_value_minus1
        c.read_flag()?; // cbr_flag
    }
    r.bits("initial_cpb_removal_delay_length_minus1", 5)?;
    r.bits("cpb_removal_delay_length_minus1", 5)?;
    r.bits("dpb_output_delay_length_minus1", 5)?;
    r.bits("time_offset_length", 5)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::Cursor;
    use crate::h264::writer::{sps_rbsp, SpsParams};

    fn parse(rbsp: &[u8]) -> ParseResult<SequenceState> {
        let mut cursor = Cursor::from_bytes(rbsp);
        let mut r = SyntaxReader::new(&mut cursor);
        parse_sps(&mut r)
    }

    #[test]
    fn parses_baseline_sps() {
        let params = SpsParams::default();
        let sps = parse(&sps_rbsp(&params)).unwrap();
        assert_eq!(sps.profile_idc, 66);
        assert_eq!(sps.pic_width_in_mbs, params.width_in_mbs);
        assert_eq!(sps.pic_height_in_map_units, params.height_in_map_units);
        assert_eq!(sps.frame_size_in_mbs(), 110);
        assert!(sps.frame_mbs_only);
    }

    #[test]
    fn parses_high_profile_sps() {
        let params = SpsParams {
            profile_idc: 100,
            sps_id: 3,
            pic_order_cnt_type: 0,
            ..Default::default()
        };
        let sps = parse(&sps_rbsp(&params)).unwrap();
        assert_eq!(sps.sps_id, 3);
        assert_eq!(sps.chroma_format_idc, 1);
        assert_eq!(sps.bit_depth_luma, 8);
        assert_eq!(sps.log2_max_pic_order_cnt_lsb, params.log2_max_pic_order_cnt_lsb);
    }

    #[test]
    fn parses_sps_with_vui_timing() {
        let params = SpsParams {
            timing: Some((1001, 60000)),
            ..Default::default()
        };
        let sps = parse(&sps_rbsp(&params)).unwrap();
        assert!(sps.vui_present);
    }

    #[test]
    fn rejects_unknown_profile() {
        let mut rbsp = sps_rbsp(&SpsParams::default());
        rbsp[0] = 42;
        assert_eq!(parse(&rbsp), Err(ParseError::semantic("profile_idc", 42)));
    }

    #[test]
    fn rejects_oversized_frame() {
        let params = SpsParams {
            width_in_mbs: 1024,
            height_in_map_units: 1024,
            ..Default::default()
        };
        assert!(matches!(
            parse(&sps_rbsp(&params)),
            Err(ParseError::SemanticInvalid { field: "frame_size_in_mbs", .. })
        ));
    }

    #[test]
    fn truncated_sps_overflows() {
        let rbsp = sps_rbsp(&SpsParams::default());
        assert_eq!(parse(&rbsp[..3]), Err(ParseError::Overflow));
    }
}

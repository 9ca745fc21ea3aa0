//! Slice header.
//!
//! When the referenced picture parameter set is unknown only the three
//! leading fields are read and a partial [`SliceState`] is returned.

use crate::error::{ParseError, ParseResult};
use crate::h264::golomb::ExpGolomb;
use crate::h264::nal::{NalHeader, NalUnitType};
use crate::h264::sps::MAX_FRAME_SIZE_IN_MBS;
use crate::h264::state::{ParameterSets, SequenceState, SliceState, SliceType};
use crate::h264::syntax::{Severity, SyntaxReader};
use crate::tree::AttrValue;

/// Upper bound on modification and marking loop iterations.
const MAX_LIST_OPERATIONS: u32 = 66;

pub fn parse_slice_header(
    r: &mut SyntaxReader<'_, '_>,
    header: NalHeader,
    sets: &ParameterSets,
) -> ParseResult<SliceState> {
    let first_mb_in_slice = r.ue("first_mb_in_slice", MAX_FRAME_SIZE_IN_MBS - 1, Severity::Fatal)?;
    let raw_slice_type = r.ue("slice_type", 9, Severity::Fatal)?;
    let slice_type =
        SliceType::from_raw(raw_slice_type).ok_or(ParseError::semantic("slice_type", raw_slice_type))?;
    let idr = header.unit_type == NalUnitType::IdrSlice;
    if idr && !slice_type.is_intra() {
        r.note("idr_slice_type", AttrValue::Unsigned(u64::from(raw_slice_type)), false);
    }
    let pps_id = r.ue("pic_parameter_set_id", 255, Severity::Fatal)?;

    let mut slice = SliceState {
        first_mb_in_slice,
        raw_slice_type,
        slice_type,
        pps_id,
        idr,
        picture: None,
        frame_num: 0,
        field_pic: false,
        bottom_field: false,
        slice_qp: 0,
    };
    let Some(pps) = sets.picture(pps_id).cloned() else {
        return Ok(slice);
    };
    let sps = pps.sequence.clone();

    if sps.separate_colour_plane {
        r.bits_max("colour_plane_id", 2, 2, Severity::Fatal)?;
    }
    slice.frame_num = r.bits("frame_num", sps.log2_max_frame_num)?;
    if !sps.frame_mbs_only {
        slice.field_pic = r.flag("field_pic_flag")?;
        if slice.field_pic {
            slice.bottom_field = r.flag("bottom_field_flag")?;
        }
    }

    let mbaff = sps.mb_adaptive_frame_field && !slice.field_pic;
    let pic_size = sps.frame_size_in_mbs() / (1 + u32::from(slice.field_pic));
    if first_mb_in_slice * (1 + u32::from(mbaff)) >= pic_size {
        return Err(ParseError::semantic("first_mb_in_slice", first_mb_in_slice));
    }

    if idr {
        r.ue("idr_pic_id", 65535, Severity::Fatal)?;
    }
    match sps.pic_order_cnt_type {
        0 => {
            r.bits("pic_order_cnt_lsb", sps.log2_max_pic_order_cnt_lsb)?;
            if pps.bottom_field_pic_order_in_frame_present && !slice.field_pic {
                r.se("delta_pic_order_cnt_bottom", i32::MIN + 1, i32::MAX, Severity::Soft)?;
            }
        }
        1 if !sps.delta_pic_order_always_zero => {
            r.se("delta_pic_order_cnt_0", i32::MIN + 1, i32::MAX, Severity::Soft)?;
            if pps.bottom_field_pic_order_in_frame_present && !slice.field_pic {
                r.se("delta_pic_order_cnt_1", i32::MIN + 1, i32::MAX, Severity::Soft)?;
            }
        }
        _ => {}
    }
    if pps.redundant_pic_cnt_present {
        r.ue("redundant_pic_cnt", 127, Severity::Fatal)?;
    }
    if slice_type.is_b() {
        r.flag("direct_spatial_mv_pred_flag")?;
    }

    let mut num_ref_idx_l0 = pps.num_ref_idx_l0_default_active;
    let mut num_ref_idx_l1 = pps.num_ref_idx_l1_default_active;
    if slice_type.is_p_like() || slice_type.is_b() {
        if r.flag("num_ref_idx_active_override_flag")? {
            num_ref_idx_l0 = 1 + r.ue("num_ref_idx_l0_active_minus1", 31, Severity::Fatal)?;
            if slice_type.is_b() {
                num_ref_idx_l1 = 1 + r.ue("num_ref_idx_l1_active_minus1", 31, Severity::Fatal)?;
            }
        }
    }

    if !slice_type.is_intra() {
        ref_pic_list_modification(r)?;
        if slice_type.is_b() {
            ref_pic_list_modification(r)?;
        }
    }

    if (pps.weighted_pred && slice_type.is_p_like()) || (pps.weighted_bipred_idc == 1 && slice_type.is_b()) {
        pred_weight_table(r, &sps, slice_type, num_ref_idx_l0, num_ref_idx_l1)?;
    }
    if header.nal_ref_idc != 0 {
        dec_ref_pic_marking(r, idr)?;
    }
    if pps.entropy_coding_mode && !slice_type.is_intra() {
        r.ue("cabac_init_idc", 2, Severity::Fatal)?;
    }

    let qp_min = -(pps.pic_init_qp + sps.qp_bd_offset_y());
    let delta = r.se("slice_qp_delta", qp_min, 51 - pps.pic_init_qp, Severity::Fatal)?;
    slice.slice_qp = pps.pic_init_qp + delta;

    if matches!(slice_type, SliceType::Sp | SliceType::Si) {
        if slice_type == SliceType::Sp {
            r.flag("sp_for_switch_flag")?;
        }
        r.se("slice_qs_delta", -51, 51, Severity::Fatal)?;
    }
    if pps.deblocking_filter_control_present {
        let idc = r.ue("disable_deblocking_filter_idc", 2, Severity::Fatal)?;
        if idc != 1 {
            r.se("slice_alpha_c0_offset_div2", -6, 6, Severity::Fatal)?;
            r.se("slice_beta_offset_div2", -6, 6, Severity::Fatal)?;
        }
    }
    if pps.num_slice_groups > 1 && (3..=5).contains(&pps.slice_group_map_type) {
        let units = sps.pic_size_in_map_units();
        let bits = ceil_log2(units / pps.slice_group_change_rate + 1);
        r.bits("slice_group_change_cycle", bits)?;
    }

    if pps.entropy_coding_mode {
        let c = r.cursor();
        while !c.is_byte_aligned() {
            if c.read_bit()? != 1 {
                return Err(ParseError::StructuralInvalid("cabac_alignment_one_bit"));
            }
        }
    }

    slice.picture = Some(pps);
    Ok(slice)
}

fn ceil_log2(n: u32) -> u32 {
    if n <= 1 {
        0
    } else {
        32 - (n - 1).leading_zeros()
    }
}

fn ref_pic_list_modification(r: &mut SyntaxReader<'_, '_>) -> ParseResult<()> {
    if !r.cursor().read_flag()? {
        return Ok(());
    }
    for _ in 0..MAX_LIST_OPERATIONS {
        let c = r.cursor();
        match c.read_ue()? {
            0..=2 => {
                c.read_ue()?;
            }
            3 => return Ok(()),
            other => return Err(ParseError::semantic("modification_of_pic_nums_idc", other)),
        }
    }
    Err(ParseError::StructuralInvalid("unterminated ref_pic_list_modification"))
}

fn pred_weight_table(
    r: &mut SyntaxReader<'_, '_>,
    sps: &SequenceState,
    slice_type: SliceType,
    num_ref_idx_l0: u32,
    num_ref_idx_l1: u32,
) -> ParseResult<()> {
    r.ue("luma_log2_weight_denom", 7, Severity::Fatal)?;
    let chroma = sps.chroma_array_type() != 0;
    if chroma {
        r.ue("chroma_log2_weight_denom", 7, Severity::Fatal)?;
    }
    let lists = if slice_type.is_b() {
        vec![num_ref_idx_l0, num_ref_idx_l1]
    } else {
        vec![num_ref_idx_l0]
    };
    for count in lists {
        for _ in 0..count {
            let weights = if chroma { 2 } else { 1 };
            for plane in 0..weights {
                let c = r.cursor();
                if c.read_flag()? {
                    let pairs = if plane == 0 { 1 } else { 2 };
                    for _ in 0..pairs {
                        let weight = c.read_se()?;
                        let offset = c.read_se()?;
                        if !(-128..=127).contains(&weight) || !(-128..=127).contains(&offset) {
                            return Err(ParseError::semantic("pred_weight", weight));
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

fn dec_ref_pic_marking(r: &mut SyntaxReader<'_, '_>, idr: bool) -> ParseResult<()> {
    if idr {
        r.flag("no_output_of_prior_pics_flag")?;
        r.flag("long_term_reference_flag")?;
        return Ok(());
    }
    if !r.flag("adaptive_ref_pic_marking_mode_flag")? {
        return Ok(());
    }
    for _ in 0..MAX_LIST_OPERATIONS {
        let c = r.cursor();
        match c.read_ue()? {
            0 => return Ok(()),
            1 | 2 | 4 | 6 => {
                c.read_ue()?;
            }
            3 => {
                c.read_ue()?;
                c.read_ue()?;
            }
            5 => {}
            other => return Err(ParseError::semantic("memory_management_control_operation", other)),
        }
    }
    Err(ParseError::StructuralInvalid("unterminated dec_ref_pic_marking"))
}

/// Whether a partial slice carries believable leading fields.
pub fn partial_is_plausible(slice: &SliceState, pps_id_threshold: u32, max_first_mb: u32) -> bool {
    (!slice.idr || slice.slice_type.is_intra())
        && slice.pps_id <= pps_id_threshold
        && slice.first_mb_in_slice <= max_first_mb
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::Cursor;
    use crate::h264::state::tests::{picture, sequence};
    use crate::h264::writer::{partial_slice_rbsp, slice_rbsp, PpsParams, SliceParams, SpsParams};
    use std::sync::Arc;

    const IDR: NalHeader = NalHeader {
        nal_ref_idc: 3,
        unit_type: NalUnitType::IdrSlice,
    };
    const NON_IDR: NalHeader = NalHeader {
        nal_ref_idc: 2,
        unit_type: NalUnitType::NonIdrSlice,
    };

    fn sets_for(sps: &SpsParams, pps: &PpsParams) -> ParameterSets {
        let mut seq = sequence(sps.sps_id);
        seq.log2_max_frame_num = sps.log2_max_frame_num;
        seq.pic_order_cnt_type = sps.pic_order_cnt_type;
        seq.log2_max_pic_order_cnt_lsb = sps.log2_max_pic_order_cnt_lsb;
        seq.pic_width_in_mbs = sps.width_in_mbs;
        seq.pic_height_in_map_units = sps.height_in_map_units;
        let mut sets = ParameterSets::new();
        let seq = sets.insert_sequence(seq);
        let mut pic = picture(pps.pps_id, Arc::clone(&seq));
        pic.entropy_coding_mode = pps.entropy_coding_mode;
        pic.deblocking_filter_control_present = pps.deblocking_filter_control_present;
        sets.insert_picture(pic);
        sets
    }

    fn parse(rbsp: &[u8], header: NalHeader, sets: &ParameterSets) -> ParseResult<SliceState> {
        let mut cursor = Cursor::from_bytes(rbsp);
        let mut r = SyntaxReader::new(&mut cursor);
        parse_slice_header(&mut r, header, sets)
    }

    #[test]
    fn full_idr_slice() {
        let (sps, pps) = (SpsParams::default(), PpsParams::default());
        let sets = sets_for(&sps, &pps);
        let params = SliceParams {
            first_mb_in_slice: 99,
            ..Default::default()
        };
        let slice = parse(&slice_rbsp(&params, IDR, &sps, &pps), IDR, &sets).unwrap();
        assert!(!slice.is_partial());
        assert_eq!(slice.first_mb_in_slice, 99);
        assert_eq!(slice.slice_type, SliceType::I);
        assert_eq!(slice.slice_qp, 26);
    }

    #[test]
    fn cabac_p_slice() {
        let sps = SpsParams {
            pic_order_cnt_type: 0,
            ..Default::default()
        };
        let pps = PpsParams {
            entropy_coding_mode: true,
            ..Default::default()
        };
        let sets = sets_for(&sps, &pps);
        let params = SliceParams {
            slice_type: 5,
            frame_num: 3,
            pic_order_cnt_lsb: 6,
            slice_qp_delta: -4,
            ..Default::default()
        };
        let slice = parse(&slice_rbsp(&params, NON_IDR, &sps, &pps), NON_IDR, &sets).unwrap();
        assert_eq!(slice.slice_type, SliceType::P);
        assert_eq!(slice.frame_num, 3);
        assert_eq!(slice.slice_qp, 22);
    }

    #[test]
    fn first_mb_beyond_picture_is_rejected() {
        let (sps, pps) = (SpsParams::default(), PpsParams::default());
        let sets = sets_for(&sps, &pps);
        let params = SliceParams {
            first_mb_in_slice: 110,
            ..Default::default()
        };
        assert_eq!(
            parse(&slice_rbsp(&params, IDR, &sps, &pps), IDR, &sets),
            Err(ParseError::semantic("first_mb_in_slice", 110))
        );
    }

    #[test]
    fn unknown_pps_gives_partial_slice() {
        let rbsp = partial_slice_rbsp(12, 0, 3, 8);
        let slice = parse(&rbsp, NON_IDR, &ParameterSets::new()).unwrap();
        assert!(slice.is_partial());
        assert_eq!(slice.first_mb_in_slice, 12);
        assert_eq!(slice.pps_id, 3);
        assert!(partial_is_plausible(&slice, 10, 139_264));
        assert!(!partial_is_plausible(&slice, 2, 139_264));
    }

    #[test]
    fn slice_type_out_of_range_is_fatal() {
        let rbsp = partial_slice_rbsp(0, 12, 0, 8);
        assert_eq!(
            parse(&rbsp, NON_IDR, &ParameterSets::new()),
            Err(ParseError::semantic("slice_type", 12))
        );
    }

    #[test]
    fn idr_p_slice_is_implausible() {
        let rbsp = partial_slice_rbsp(0, 0, 0, 8);
        let slice = parse(&rbsp, IDR, &ParameterSets::new()).unwrap();
        assert!(!partial_is_plausible(&slice, 10, 139_264));
    }
}

//! Picture parameter set.

use crate::error::{ParseError, ParseResult};
use crate::h264::golomb::ExpGolomb;
use crate::h264::sps::skip_scaling_list;
use crate::h264::state::{ParameterSets, PictureState};
use crate::h264::syntax::{Severity, SyntaxReader};

/// Bits needed to code values below `n`.
fn ceil_log2(n: u32) -> u32 {
    if n <= 1 {
        0
    } else {
        32 - (n - 1).leading_zeros()
    }
}

/// Parse a PPS payload. The referenced SPS must already be known.
pub fn parse_pps(r: &mut SyntaxReader<'_, '_>, sets: &ParameterSets) -> ParseResult<PictureState> {
    let pps_id = r.ue("pic_parameter_set_id", 255, Severity::Fatal)?;
    let sps_id = r.ue("seq_parameter_set_id", 31, Severity::Fatal)?;
    let sequence = sets
        .sequence(sps_id)
        .cloned()
        .ok_or(ParseError::StructuralInvalid("pps references an unknown sps"))?;

    let entropy_coding_mode = r.flag("entropy_coding_mode_flag")?;
    let bottom_field_pic_order_in_frame_present = r.flag("bottom_field_pic_order_in_frame_present_flag")?;

    let num_slice_groups = 1 + r.ue("num_slice_groups_minus1", 7, Severity::Fatal)?;
    let mut slice_group_map_type = 0;
    let mut slice_group_change_rate = 1;
    if num_slice_groups > 1 {
        slice_group_map_type = r.ue("slice_group_map_type", 6, Severity::Fatal)?;
        let map_units = sequence.pic_size_in_map_units();
        match slice_group_map_type {
            0 => {
                for _ in 0..num_slice_groups {
                    let run = r.cursor().read_ue()?;
                    if run >= map_units {
                        return Err(ParseError::semantic("run_length_minus1", run));
                    }
                }
            }
            2 => {
                for _ in 0..num_slice_groups - 1 {
                    let c = r.cursor();
                    let top_left = c.read_ue()?;
                    let bottom_right = c.read_ue()?;
                    if top_left > bottom_right || bottom_right >= map_units {
                        return Err(ParseError::StructuralInvalid("slice group rectangle"));
                    }
                }
            }
            3..=5 => {
                r.flag("slice_group_change_direction_flag")?;
                slice_group_change_rate =
                    1 + r.ue("slice_group_change_rate_minus1", map_units.saturating_sub(1), Severity::Fatal)?;
            }
            6 => {
                let units = 1 + r.ue("pic_size_in_map_units_minus1", map_units.saturating_sub(1), Severity::Fatal)?;
                let bits = ceil_log2(num_slice_groups);
                r.cursor().skip_bits(u64::from(units) * u64::from(bits))?;
            }
            _ => {}
        }
    }

    let num_ref_idx_l0_default_active = 1 + r.ue("num_ref_idx_l0_default_active_minus1", 31, Severity::Fatal)?;
    let num_ref_idx_l1_default_active = 1 + r.ue("num_ref_idx_l1_default_active_minus1", 31, Severity::Fatal)?;
    let weighted_pred = r.flag("weighted_pred_flag")?;
    let weighted_bipred_idc = r.bits_max("weighted_bipred_idc", 2, 2, Severity::Fatal)?;
    let qp_floor = -(26 + sequence.qp_bd_offset_y());
    let pic_init_qp = 26 + r.se("pic_init_qp_minus26", qp_floor, 25, Severity::Fatal)?;
    r.se("pic_init_qs_minus26", -26, 25, Severity::Fatal)?;
    r.se("chroma_qp_index_offset", -12, 12, Severity::Fatal)?;
    let deblocking_filter_control_present = r.flag("deblocking_filter_control_present_flag")?;
    r.flag("constrained_intra_pred_flag")?;
    let redundant_pic_cnt_present = r.flag("redundant_pic_cnt_present_flag")?;

    let mut transform_8x8_mode = false;
    if r.cursor().more_rbsp_data() {
        transform_8x8_mode = r.flag("transform_8x8_mode_flag")?;
        if r.flag("pic_scaling_matrix_present_flag")? {
            let chroma_lists = if sequence.chroma_format_idc == 3 { 6 } else { 2 };
            let lists = 6 + if transform_8x8_mode { chroma_lists } else { 0 };
            for i in 0..lists {
                if r.cursor().read_flag()? {
                    skip_scaling_list(r, if i < 6 { 16 } else { 64 })?;
                }
            }
        }
        r.se("second_chroma_qp_index_offset", -12, 12, Severity::Fatal)?;
    }

    Ok(PictureState {
        pps_id,
        sequence,
        entropy_coding_mode,
        bottom_field_pic_order_in_frame_present,
        num_slice_groups,
        slice_group_map_type,
        slice_group_change_rate,
        num_ref_idx_l0_default_active,
        num_ref_idx_l1_default_active,
        weighted_pred,
        weighted_bipred_idc,
        pic_init_qp,
        deblocking_filter_control_present,
        redundant_pic_cnt_present,
        transform_8x8_mode,
    })
}

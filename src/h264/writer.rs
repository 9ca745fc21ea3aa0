//! Synthetic H.264 streams.
//!
//! Writes minimal but well-formed parameter sets, slice headers and
//! auxiliary units in either framing. Used for reference header files,
//! tests and benchmarks.

use crate::bitwriter::{add_emulation_prevention, BitWriter};
use crate::h264::framing::NalFraming;
use crate::h264::nal::{NalHeader, NalUnitType};
use crate::h264::state::SliceType;

/// Sequence parameter set fields written by [`sps_rbsp`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpsParams {
    pub sps_id: u32,
    pub profile_idc: u8,
    pub level_idc: u8,
    pub width_in_mbs: u32,
    pub height_in_map_units: u32,
    pub frame_mbs_only: bool,
    pub log2_max_frame_num: u32,
    /// 0 or 2.
    pub pic_order_cnt_type: u32,
    pub log2_max_pic_order_cnt_lsb: u32,
    pub max_num_ref_frames: u32,
    /// `(num_units_in_tick, time_scale)` written as VUI timing info.
    pub timing: Option<(u32, u32)>,
}

impl Default for SpsParams {
    fn default() -> Self {
        Self {
            sps_id: 0,
            profile_idc: 66,
            level_idc: 30,
            width_in_mbs: 11,
            height_in_map_units: 10,
            frame_mbs_only: true,
            log2_max_frame_num: 4,
            pic_order_cnt_type: 2,
            log2_max_pic_order_cnt_lsb: 6,
            max_num_ref_frames: 1,
            timing: None,
        }
    }
}

/// Picture parameter set fields written by [`pps_rbsp`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PpsParams {
    pub pps_id: u32,
    pub sps_id: u32,
    pub entropy_coding_mode: bool,
    pub pic_init_qp_minus26: i32,
    pub deblocking_filter_control_present: bool,
    pub transform_8x8_mode: bool,
}

impl Default for PpsParams {
    fn default() -> Self {
        Self {
            pps_id: 0,
            sps_id: 0,
            entropy_coding_mode: false,
            pic_init_qp_minus26: 0,
            deblocking_filter_control_present: true,
            transform_8x8_mode: false,
        }
    }
}

/// Slice header fields written by [`slice_rbsp`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceParams {
    pub first_mb_in_slice: u32,
    /// Raw `slice_type` (0..=9).
    pub slice_type: u32,
    pub pps_id: u32,
    pub frame_num: u32,
    pub idr_pic_id: u32,
    pub pic_order_cnt_lsb: u32,
    pub slice_qp_delta: i32,
    /// Bytes of opaque slice data after the header.
    pub data_len: usize,
}

impl Default for SliceParams {
    fn default() -> Self {
        Self {
            first_mb_in_slice: 0,
            slice_type: 7,
            pps_id: 0,
            frame_num: 0,
            idr_pic_id: 0,
            pic_order_cnt_lsb: 0,
            slice_qp_delta: 0,
            data_len: 24,
        }
    }
}

fn write_opaque(w: &mut BitWriter, len: usize, seed: u32) {
    // Pseudo-random, never two zero bytes in a row.
    let mut state = seed.wrapping_mul(2_654_435_761).wrapping_add(1);
    for _ in 0..len {
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        w.write_u8((state as u8) | 0x01);
    }
}

pub fn sps_rbsp(p: &SpsParams) -> Vec<u8> {
    let mut w = BitWriter::new();
    w.write_u8(p.profile_idc);
    w.write_bits(0, 8); // constraint flags and reserved bits
    w.write_u8(p.level_idc);
    w.write_ue(p.sps_id);
    if matches!(p.profile_idc, 100 | 110 | 122 | 244 | 44 | 83 | 86 | 118 | 128 | 138 | 139 | 134 | 135) {
        w.write_ue(1); // chroma_format_idc
        w.write_ue(0);
        w.write_ue(0);
        w.write_flag(false);
        w.write_flag(false);
    }
    w.write_ue(p.log2_max_frame_num - 4);
    w.write_ue(p.pic_order_cnt_type);
    if p.pic_order_cnt_type == 0 {
        w.write_ue(p.log2_max_pic_order_cnt_lsb - 4);
    }
    w.write_ue(p.max_num_ref_frames);
    w.write_flag(false); // gaps_in_frame_num_value_allowed_flag
    w.write_ue(p.width_in_mbs - 1);
    w.write_ue(p.height_in_map_units - 1);
    w.write_flag(p.frame_mbs_only);
    if !p.frame_mbs_only {
        w.write_flag(false);
    }
    w.write_flag(true); // direct_8x8_inference_flag
    w.write_flag(false); // frame_cropping_flag
    w.write_flag(p.timing.is_some());
    if let Some((units, scale)) = p.timing {
        w.write_flag(false); // aspect_ratio_info_present_flag
        w.write_flag(false); // overscan_info_present_flag
        w.write_flag(false); // video_signal_type_present_flag
        w.write_flag(false); // chroma_loc_info_present_flag
        w.write_flag(true);
        w.write_bits(units, 32);
        w.write_bits(scale, 32);
        w.write_flag(true); // fixed_frame_rate_flag
        w.write_flag(false); // nal_hrd
        w.write_flag(false); // vcl_hrd
        w.write_flag(false); // pic_struct_present_flag
        w.write_flag(false); // bitstream_restriction_flag
    }
    w.write_trailing_bits();
    w.finish()
}

pub fn pps_rbsp(p: &PpsParams) -> Vec<u8> {
    let mut w = BitWriter::new();
    w.write_ue(p.pps_id);
    w.write_ue(p.sps_id);
    w.write_flag(p.entropy_coding_mode);
    w.write_flag(false); // bottom_field_pic_order_in_frame_present_flag
    w.write_ue(0); // num_slice_groups_minus1
    w.write_ue(0); // num_ref_idx_l0_default_active_minus1
    w.write_ue(0); // num_ref_idx_l1_default_active_minus1
    w.write_flag(false); // weighted_pred_flag
    w.write_bits(0, 2); // weighted_bipred_idc
    w.write_se(p.pic_init_qp_minus26);
    w.write_se(0); // pic_init_qs_minus26
    w.write_se(0); // chroma_qp_index_offset
    w.write_flag(p.deblocking_filter_control_present);
    w.write_flag(false); // constrained_intra_pred_flag
    w.write_flag(false); // redundant_pic_cnt_present_flag
    if p.transform_8x8_mode {
        w.write_flag(true);
        w.write_flag(false); // pic_scaling_matrix_present_flag
        w.write_se(0); // second_chroma_qp_index_offset
    }
    w.write_trailing_bits();
    w.finish()
}

/// A full slice header followed by opaque slice data.
pub fn slice_rbsp(p: &SliceParams, header: NalHeader, sps: &SpsParams, pps: &PpsParams) -> Vec<u8> {
    let idr = header.unit_type == NalUnitType::IdrSlice;
    let slice_type = SliceType::from_raw(p.slice_type).unwrap_or(SliceType::I);

    let mut w = BitWriter::new();
    w.write_ue(p.first_mb_in_slice);
    w.write_ue(p.slice_type);
    w.write_ue(p.pps_id);
    w.write_bits(p.frame_num, sps.log2_max_frame_num);
    if !sps.frame_mbs_only {
        w.write_flag(false); // field_pic_flag
    }
    if idr {
        w.write_ue(p.idr_pic_id);
    }
    if sps.pic_order_cnt_type == 0 {
        w.write_bits(p.pic_order_cnt_lsb, sps.log2_max_pic_order_cnt_lsb);
    }
    if slice_type.is_b() {
        w.write_flag(true); // direct_spatial_mv_pred_flag
    }
    if slice_type.is_p_like() || slice_type.is_b() {
        w.write_flag(false); // num_ref_idx_active_override_flag
        w.write_flag(false); // ref_pic_list_modification_flag_l0
        if slice_type.is_b() {
            w.write_flag(false);
        }
    }
    if header.nal_ref_idc != 0 {
        if idr {
            w.write_flag(false); // no_output_of_prior_pics_flag
            w.write_flag(false); // long_term_reference_flag
        } else {
            w.write_flag(false); // adaptive_ref_pic_marking_mode_flag
        }
    }
    if pps.entropy_coding_mode && !slice_type.is_intra() {
        w.write_ue(0); // cabac_init_idc
    }
    w.write_se(p.slice_qp_delta);
    if matches!(slice_type, SliceType::Sp | SliceType::Si) {
        if slice_type == SliceType::Sp {
            w.write_flag(false);
        }
        w.write_se(0);
    }
    if pps.deblocking_filter_control_present {
        w.write_ue(1); // disable_deblocking_filter_idc
    }
    if pps.entropy_coding_mode {
        w.align_with(1);
    }
    write_opaque(&mut w, p.data_len, p.first_mb_in_slice ^ p.frame_num);
    w.write_trailing_bits();
    w.finish()
}

/// Slice header fields readable without a picture parameter set, followed
/// by opaque bytes.
pub fn partial_slice_rbsp(first_mb_in_slice: u32, slice_type: u32, pps_id: u32, data_len: usize) -> Vec<u8> {
    let mut w = BitWriter::new();
    w.write_ue(first_mb_in_slice);
    w.write_ue(slice_type);
    w.write_ue(pps_id);
    write_opaque(&mut w, data_len, first_mb_in_slice);
    w.write_trailing_bits();
    w.finish()
}

pub fn aud_rbsp(primary_pic_type: u32) -> Vec<u8> {
    let mut w = BitWriter::new();
    w.write_bits(primary_pic_type, 3);
    w.write_trailing_bits();
    w.finish()
}

pub fn sei_rbsp(payload_type: u32, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 4);
    for value in [payload_type, payload.len() as u32] {
        let mut v = value;
        while v >= 255 {
            out.push(0xff);
            v -= 255;
        }
        out.push(v as u8);
    }
    out.extend_from_slice(payload);
    out.push(0x80);
    out
}

pub fn filler_rbsp(len: usize) -> Vec<u8> {
    let mut out = vec![0xff; len];
    out.push(0x80);
    out
}

/// Frames units into one stream.
#[derive(Debug, Clone)]
pub struct StreamWriter {
    framing: NalFraming,
    out: Vec<u8>,
}

impl StreamWriter {
    pub fn new(framing: NalFraming) -> Self {
        Self {
            framing,
            out: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.out.len()
    }

    pub fn is_empty(&self) -> bool {
        self.out.is_empty()
    }

    /// Append one unit: start code or length, header byte, escaped payload.
    pub fn unit(&mut self, header: u8, rbsp: &[u8]) -> &mut Self {
        let payload = add_emulation_prevention(rbsp);
        let len = payload.len() + 1;
        match self.framing {
            NalFraming::ByteStream => self.out.extend_from_slice(&[0, 0, 0, 1]),
            NalFraming::LengthPrefixed => {
                if matches!(header & 0x1f, 7 | 8) {
                    self.out.extend_from_slice(&(len as u16).to_be_bytes());
                } else {
                    self.out.extend_from_slice(&(len as u32).to_be_bytes());
                }
            }
        }
        self.out.push(header);
        self.out.extend_from_slice(&payload);
        self
    }

    pub fn sps(&mut self, p: &SpsParams) -> &mut Self {
        self.unit(0x67, &sps_rbsp(p))
    }

    pub fn pps(&mut self, p: &PpsParams) -> &mut Self {
        self.unit(0x68, &pps_rbsp(p))
    }

    /// IDR slice when `idr`, otherwise a reference P or I slice.
    pub fn slice(&mut self, idr: bool, p: &SliceParams, sps: &SpsParams, pps: &PpsParams) -> &mut Self {
        let (byte, unit_type) = if idr {
            (0x65, NalUnitType::IdrSlice)
        } else {
            (0x41, NalUnitType::NonIdrSlice)
        };
        let header = NalHeader {
            nal_ref_idc: (byte >> 5) & 0x03,
            unit_type,
        };
        self.unit(byte, &slice_rbsp(p, header, sps, pps))
    }

    /// Non-reference slice whose header stops after `pps_id`.
    pub fn partial_slice(&mut self, first_mb_in_slice: u32, slice_type: u32, pps_id: u32) -> &mut Self {
        self.unit(0x01, &partial_slice_rbsp(first_mb_in_slice, slice_type, pps_id, 32))
    }

    pub fn aud(&mut self, primary_pic_type: u32) -> &mut Self {
        self.unit(0x09, &aud_rbsp(primary_pic_type))
    }

    pub fn sei(&mut self, payload_type: u32, payload: &[u8]) -> &mut Self {
        self.unit(0x06, &sei_rbsp(payload_type, payload))
    }

    /// Unframed bytes, e.g. garbage between units.
    pub fn raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.out.extend_from_slice(bytes);
        self
    }

    pub fn bytes(&self) -> &[u8] {
        &self.out
    }

    pub fn finish(self) -> Vec<u8> {
        self.out
    }
}

//! Decoded parameter set state.
//!
//! A picture state holds an `Arc` to the sequence state it was parsed
//! against and a full slice holds an `Arc` to its picture state, so every
//! slice reaches the exact parameters it was decoded with even after newer
//! parameter sets with the same id arrive. The chain only ever points from
//! slice to picture to sequence.

use std::collections::HashMap;
use std::sync::Arc;

/// Sequence parameter set fields the slice layer depends on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceState {
    pub sps_id: u32,
    pub profile_idc: u8,
    pub level_idc: u8,
    pub chroma_format_idc: u32,
    pub separate_colour_plane: bool,
    pub bit_depth_luma: u32,
    pub bit_depth_chroma: u32,
    pub log2_max_frame_num: u32,
    pub pic_order_cnt_type: u32,
    pub log2_max_pic_order_cnt_lsb: u32,
    pub delta_pic_order_always_zero: bool,
    pub max_num_ref_frames: u32,
    pub pic_width_in_mbs: u32,
    pub pic_height_in_map_units: u32,
    pub frame_mbs_only: bool,
    pub mb_adaptive_frame_field: bool,
    pub vui_present: bool,
}

impl SequenceState {
    /// `ChromaArrayType`: 0 for monochrome or separately coded planes.
    pub fn chroma_array_type(&self) -> u32 {
        if self.separate_colour_plane {
            0
        } else {
            self.chroma_format_idc
        }
    }

    pub fn frame_height_in_mbs(&self) -> u32 {
        (2 - u32::from(self.frame_mbs_only)) * self.pic_height_in_map_units
    }

    pub fn pic_size_in_map_units(&self) -> u32 {
        self.pic_width_in_mbs * self.pic_height_in_map_units
    }

    /// Macroblocks in one frame.
    pub fn frame_size_in_mbs(&self) -> u32 {
        self.pic_width_in_mbs * self.frame_height_in_mbs()
    }

    pub fn qp_bd_offset_y(&self) -> i32 {
        6 * (self.bit_depth_luma as i32 - 8)
    }
}

/// Picture parameter set fields, bound to the sequence they reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PictureState {
    pub pps_id: u32,
    pub sequence: Arc<SequenceState>,
    pub entropy_coding_mode: bool,
    pub bottom_field_pic_order_in_frame_present: bool,
    pub num_slice_groups: u32,
    pub slice_group_map_type: u32,
    pub slice_group_change_rate: u32,
    pub num_ref_idx_l0_default_active: u32,
    pub num_ref_idx_l1_default_active: u32,
    pub weighted_pred: bool,
    pub weighted_bipred_idc: u32,
    pub pic_init_qp: i32,
    pub deblocking_filter_control_present: bool,
    pub redundant_pic_cnt_present: bool,
    pub transform_8x8_mode: bool,
}

/// Slice type, folded to 0..=4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SliceType {
    P,
    B,
    I,
    Sp,
    Si,
}

impl SliceType {
    /// Map a raw `slice_type` (0..=9).
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 | 5 => Some(Self::P),
            1 | 6 => Some(Self::B),
            2 | 7 => Some(Self::I),
            3 | 8 => Some(Self::Sp),
            4 | 9 => Some(Self::Si),
            _ => None,
        }
    }

    /// I and SI slices carry no inter prediction.
    pub fn is_intra(self) -> bool {
        matches!(self, Self::I | Self::Si)
    }

    pub fn is_b(self) -> bool {
        self == Self::B
    }

    pub fn is_p_like(self) -> bool {
        matches!(self, Self::P | Self::Sp)
    }
}

/// Fields decoded from one slice header.
///
/// A partial slice has no picture state: only `first_mb_in_slice`,
/// `slice_type` and `pps_id` are known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceState {
    pub first_mb_in_slice: u32,
    pub raw_slice_type: u32,
    pub slice_type: SliceType,
    pub pps_id: u32,
    pub idr: bool,
    pub picture: Option<Arc<PictureState>>,
    pub frame_num: u32,
    pub field_pic: bool,
    pub bottom_field: bool,
    pub slice_qp: i32,
}

impl SliceState {
    pub fn is_partial(&self) -> bool {
        self.picture.is_none()
    }

    pub fn sequence(&self) -> Option<&Arc<SequenceState>> {
        self.picture.as_ref().map(|p| &p.sequence)
    }
}

/// Active parameter sets of one carve attempt, keyed by id.
#[derive(Debug, Clone, Default)]
pub struct ParameterSets {
    sequences: HashMap<u32, Arc<SequenceState>>,
    pictures: HashMap<u32, Arc<PictureState>>,
}

impl ParameterSets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_sequence(&mut self, sps: SequenceState) -> Arc<SequenceState> {
        let sps = Arc::new(sps);
        self.sequences.insert(sps.sps_id, Arc::clone(&sps));
        sps
    }

    pub fn insert_picture(&mut self, pps: PictureState) -> Arc<PictureState> {
        let pps = Arc::new(pps);
        self.pictures.insert(pps.pps_id, Arc::clone(&pps));
        pps
    }

    pub fn sequence(&self, sps_id: u32) -> Option<&Arc<SequenceState>> {
        self.sequences.get(&sps_id)
    }

    pub fn picture(&self, pps_id: u32) -> Option<&Arc<PictureState>> {
        self.pictures.get(&pps_id)
    }

    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty() && self.pictures.is_empty()
    }

    /// True when at least one picture set is usable.
    pub fn has_pair(&self) -> bool {
        !self.pictures.is_empty()
    }

    pub fn clear(&mut self) {
        self.sequences.clear();
        self.pictures.clear();
    }
}

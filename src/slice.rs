use crate::bitstream::BitReader;
use crate::nal::NalHeader;
use crate::pps::Pps;
use crate::sps::Sps;
use crate::Error;

/// slice_type modulo 5; values 5..=9 additionally promise the whole
/// picture uses this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceType {
    P,
    B,
    I,
    Sp,
    Si,
}

impl SliceType {
    fn from_syntax(v: u32) -> Result<Self, Error> {
        match v % 5 {
            0 => Ok(Self::P),
            1 => Ok(Self::B),
            2 => Ok(Self::I),
            3 => Ok(Self::Sp),
            4 => Ok(Self::Si),
            _ => Err(Error::Slice(format!("slice_type {v} out of range"))),
        }
    }
}

/// Parsed IDR slice header, up to and including `slice_qp_delta`. The
/// pixel reconstruction that follows it is owned by the external slice
/// decoder; this is the state the dispatcher validates and hands off.
#[derive(Debug, Clone)]
pub struct SliceHeader {
    pub first_mb_in_slice: u32,
    pub slice_type: SliceType,
    pub pic_parameter_set_id: u8,
    pub colour_plane_id: u8,
    pub frame_num: u32,
    pub idr_pic_id: u32,
    pub pic_order_cnt_lsb: u32,
    pub no_output_of_prior_pics_flag: bool,
    pub long_term_reference_flag: bool,
    /// SliceQP_Y = 26 + pic_init_qp_minus26 + slice_qp_delta.
    pub slice_qp: u8,
}

fn clip3(low: i32, high: i32, x: i32) -> i32 {
    x.max(low).min(high)
}

impl SliceHeader {
    /// Parse the leading `pic_parameter_set_id` so the dispatcher can run
    /// the cache integrity check before committing to a full parse.
    pub fn peek_pps_id(rbsp: &[u8]) -> Result<u8, Error> {
        let mut r = BitReader::new(rbsp);
        let _first_mb_in_slice = r.ue()?;
        let _slice_type = r.ue()?;
        let id = r.ue()?;
        if id >= crate::params::MAX_PPS as u32 {
            return Err(Error::Slice(format!("pic_parameter_set_id {id} out of range")));
        }
        Ok(id as u8)
    }

    /// Parse an IDR slice header against its resolved parameter sets.
    ///
    /// Field pictures and non-intra slice types are outside the supported
    /// subset and fail with `Unsupported`.
    pub fn parse(rbsp: &[u8], nal: NalHeader, sps: &Sps, pps: &Pps) -> Result<Self, Error> {
        let mut r = BitReader::new(rbsp);

        let first_mb_in_slice = r.ue()?;
        let slice_type_syntax = r.ue()?;
        if slice_type_syntax > 9 {
            return Err(Error::Slice(format!(
                "slice_type {slice_type_syntax} out of range"
            )));
        }
        let slice_type = SliceType::from_syntax(slice_type_syntax)?;
        if !matches!(slice_type, SliceType::I | SliceType::Si) {
            return Err(Error::Unsupported(format!(
                "{slice_type:?} slice in idr access unit"
            )));
        }

        let pic_parameter_set_id = r.ue()?;
        if pic_parameter_set_id != pps.pic_parameter_set_id as u32 {
            return Err(Error::Slice(format!(
                "slice pps id {pic_parameter_set_id} does not match active pps {}",
                pps.pic_parameter_set_id
            )));
        }

        let colour_plane_id = if sps.separate_colour_plane_flag {
            r.read_bits(2)? as u8
        } else {
            0
        };

        let frame_num = r.read_bits(sps.log2_max_frame_num_minus4 as u32 + 4)?;

        if !sps.frame_mbs_only_flag {
            let field_pic_flag = r.read_bit()?;
            if field_pic_flag {
                return Err(Error::Unsupported("field-coded idr picture".into()));
            }
        }

        let idr_pic_id = r.ue()?;
        if idr_pic_id > 65535 {
            return Err(Error::Slice(format!("idr_pic_id {idr_pic_id} out of range")));
        }

        let mut pic_order_cnt_lsb = 0u32;
        match sps.pic_order_cnt_type {
            0 => {
                pic_order_cnt_lsb =
                    r.read_bits(sps.log2_max_pic_order_cnt_lsb_minus4 as u32 + 4)?;
                if pps.bottom_field_pic_order_in_frame_present_flag {
                    let _delta_pic_order_cnt_bottom = r.se()?;
                }
            }
            1 if !sps.delta_pic_order_always_zero_flag => {
                let _delta_pic_order_cnt_0 = r.se()?;
                if pps.bottom_field_pic_order_in_frame_present_flag {
                    let _delta_pic_order_cnt_1 = r.se()?;
                }
            }
            _ => {}
        }

        if pps.redundant_pic_cnt_present_flag {
            let _redundant_pic_cnt = r.ue()?;
        }

        // dec_ref_pic_marking, IDR branch.
        let mut no_output_of_prior_pics_flag = false;
        let mut long_term_reference_flag = false;
        if nal.ref_idc != 0 {
            no_output_of_prior_pics_flag = r.read_bit()?;
            long_term_reference_flag = r.read_bit()?;
        }

        let slice_qp_delta = r.se()?;
        let qp = 26 + pps.pic_init_qp_minus26 as i32 + slice_qp_delta;
        if qp != clip3(0, 51, qp) {
            return Err(Error::Slice(format!("slice qp {qp} outside [0, 51]")));
        }
        let slice_qp = qp as u8;

        Ok(SliceHeader {
            first_mb_in_slice,
            slice_type,
            pic_parameter_set_id: pic_parameter_set_id as u8,
            colour_plane_id,
            frame_num,
            idr_pic_id,
            pic_order_cnt_lsb,
            no_output_of_prior_pics_flag,
            long_term_reference_flag,
            slice_qp,
        })
    }
}

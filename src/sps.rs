use crate::bitstream::BitReader;
use crate::params::MAX_SPS;
use crate::Error;

/// Sequence parameter set, reduced to the fields the IDR pipeline and
/// the stream report consume.
#[derive(Debug, Clone)]
pub struct Sps {
    pub seq_parameter_set_id: u8,
    pub profile_idc: u8,
    pub level_idc: u8,

    pub chroma_format_idc: u8,
    pub separate_colour_plane_flag: bool,
    pub bit_depth_luma_minus8: u8,
    pub bit_depth_chroma_minus8: u8,

    pub log2_max_frame_num_minus4: u8,
    pub pic_order_cnt_type: u8,
    pub log2_max_pic_order_cnt_lsb_minus4: u8,
    pub delta_pic_order_always_zero_flag: bool,

    pub max_num_ref_frames: u32,
    pub pic_width_in_mbs_minus1: u32,
    pub pic_height_in_map_units_minus1: u32,
    pub frame_mbs_only_flag: bool,
    pub mb_adaptive_frame_field_flag: bool,
    pub direct_8x8_inference_flag: bool,

    pub frame_cropping_flag: bool,
    pub frame_crop_left_offset: u32,
    pub frame_crop_right_offset: u32,
    pub frame_crop_top_offset: u32,
    pub frame_crop_bottom_offset: u32,

    pub vui_parameters_present_flag: bool,

    /// Cropped luma width in pixels.
    pub width: u32,
    /// Cropped luma height in pixels.
    pub height: u32,
}

// Profiles whose SPS carries the chroma/bit-depth/scaling block.
const HIGH_PROFILE_IDCS: [u8; 13] = [100, 110, 122, 244, 44, 83, 86, 118, 128, 138, 139, 134, 135];

impl Sps {
    /// Parse an SPS RBSP (emulation-prevention bytes already removed,
    /// NAL header byte excluded).
    pub fn parse(rbsp: &[u8]) -> Result<Self, Error> {
        let mut r = BitReader::new(rbsp);

        let profile_idc = r.read_u8()?;
        // constraint_setN flags + reserved_zero_2bits
        r.skip_bits(8)?;
        let level_idc = r.read_u8()?;

        let seq_parameter_set_id = r.ue()?;
        if seq_parameter_set_id >= MAX_SPS as u32 {
            return Err(Error::Sps(format!(
                "seq_parameter_set_id {seq_parameter_set_id} out of range"
            )));
        }

        let mut chroma_format_idc = 1u8;
        let mut separate_colour_plane_flag = false;
        let mut bit_depth_luma_minus8 = 0u8;
        let mut bit_depth_chroma_minus8 = 0u8;

        if HIGH_PROFILE_IDCS.contains(&profile_idc) {
            let idc = r.ue()?;
            if idc > 3 {
                return Err(Error::Sps(format!("chroma_format_idc {idc} out of range")));
            }
            chroma_format_idc = idc as u8;
            if chroma_format_idc == 3 {
                separate_colour_plane_flag = r.read_bit()?;
            }
            bit_depth_luma_minus8 = r.ue()? as u8;
            bit_depth_chroma_minus8 = r.ue()? as u8;
            let _qpprime_y_zero_transform_bypass_flag = r.read_bit()?;
            if r.read_bit()? {
                // seq_scaling_matrix_present_flag
                let lists = if chroma_format_idc == 3 { 12 } else { 8 };
                for i in 0..lists {
                    if r.read_bit()? {
                        skip_scaling_list(&mut r, if i < 6 { 16 } else { 64 })?;
                    }
                }
            }
        }

        let log2_max_frame_num_minus4 = r.ue()?;
        if log2_max_frame_num_minus4 > 12 {
            return Err(Error::Sps(format!(
                "log2_max_frame_num_minus4 {log2_max_frame_num_minus4} out of range"
            )));
        }

        let pic_order_cnt_type = r.ue()?;
        let mut log2_max_pic_order_cnt_lsb_minus4 = 0u8;
        let mut delta_pic_order_always_zero_flag = false;
        match pic_order_cnt_type {
            0 => {
                let v = r.ue()?;
                if v > 12 {
                    return Err(Error::Sps(format!(
                        "log2_max_pic_order_cnt_lsb_minus4 {v} out of range"
                    )));
                }
                log2_max_pic_order_cnt_lsb_minus4 = v as u8;
            }
            1 => {
                delta_pic_order_always_zero_flag = r.read_bit()?;
                let _offset_for_non_ref_pic = r.se()?;
                let _offset_for_top_to_bottom_field = r.se()?;
                let cycle_len = r.ue()?;
                for _ in 0..cycle_len {
                    let _offset_for_ref_frame = r.se()?;
                }
            }
            2 => {}
            other => {
                return Err(Error::Sps(format!("pic_order_cnt_type {other} out of range")));
            }
        }

        let max_num_ref_frames = r.ue()?;
        let _gaps_in_frame_num_value_allowed_flag = r.read_bit()?;

        let pic_width_in_mbs_minus1 = r.ue()?;
        let pic_height_in_map_units_minus1 = r.ue()?;
        let frame_mbs_only_flag = r.read_bit()?;
        let mb_adaptive_frame_field_flag = if frame_mbs_only_flag {
            false
        } else {
            r.read_bit()?
        };
        let direct_8x8_inference_flag = r.read_bit()?;

        let frame_cropping_flag = r.read_bit()?;
        let (mut crop_left, mut crop_right, mut crop_top, mut crop_bottom) = (0, 0, 0, 0);
        if frame_cropping_flag {
            crop_left = r.ue()?;
            crop_right = r.ue()?;
            crop_top = r.ue()?;
            crop_bottom = r.ue()?;
        }

        let vui_parameters_present_flag = r.read_bit()?;

        let (width, height) = frame_dimensions(
            pic_width_in_mbs_minus1,
            pic_height_in_map_units_minus1,
            frame_mbs_only_flag,
            chroma_format_idc,
            frame_cropping_flag,
            [crop_left, crop_right, crop_top, crop_bottom],
        )?;

        Ok(Sps {
            seq_parameter_set_id: seq_parameter_set_id as u8,
            profile_idc,
            level_idc,
            chroma_format_idc,
            separate_colour_plane_flag,
            bit_depth_luma_minus8,
            bit_depth_chroma_minus8,
            log2_max_frame_num_minus4: log2_max_frame_num_minus4 as u8,
            pic_order_cnt_type: pic_order_cnt_type as u8,
            log2_max_pic_order_cnt_lsb_minus4,
            delta_pic_order_always_zero_flag,
            max_num_ref_frames,
            pic_width_in_mbs_minus1,
            pic_height_in_map_units_minus1,
            frame_mbs_only_flag,
            mb_adaptive_frame_field_flag,
            direct_8x8_inference_flag,
            frame_cropping_flag,
            frame_crop_left_offset: crop_left,
            frame_crop_right_offset: crop_right,
            frame_crop_top_offset: crop_top,
            frame_crop_bottom_offset: crop_bottom,
            vui_parameters_present_flag,
            width,
            height,
        })
    }

    /// Macroblocks per frame, the size of the decoder's macroblock array.
    pub fn mb_count(&self) -> usize {
        let w = (self.pic_width_in_mbs_minus1 + 1) as usize;
        let h = (self.pic_height_in_map_units_minus1 + 1) as usize
            * if self.frame_mbs_only_flag { 1 } else { 2 };
        w * h
    }
}

fn frame_dimensions(
    width_mbs_minus1: u32,
    height_units_minus1: u32,
    frame_mbs_only: bool,
    chroma_format_idc: u8,
    cropping: bool,
    crop: [u32; 4],
) -> Result<(u32, u32), Error> {
    let raw_w = (width_mbs_minus1 + 1) * 16;
    let raw_h = (height_units_minus1 + 1) * 16 * if frame_mbs_only { 1 } else { 2 };

    if !cropping {
        return Ok((raw_w, raw_h));
    }

    let (sub_w, sub_h) = match chroma_format_idc {
        1 => (2, 2),
        2 => (2, 1),
        3 => (1, 1),
        _ => (0, 0),
    };
    let frame_mult = if frame_mbs_only { 1 } else { 2 };
    let [left, right, top, bottom] = crop;

    let crop_w = sub_w * (left + right);
    let crop_h = sub_h * frame_mult * (top + bottom);
    if crop_w >= raw_w || crop_h >= raw_h {
        return Err(Error::Sps(format!(
            "cropping {crop:?} exceeds frame {raw_w}x{raw_h}"
        )));
    }
    Ok((raw_w - crop_w, raw_h - crop_h))
}

fn skip_scaling_list(r: &mut BitReader, size: usize) -> Result<(), Error> {
    let mut last_scale = 8i32;
    let mut next_scale = 8i32;
    for _ in 0..size {
        if next_scale != 0 {
            let delta = r.se()?;
            next_scale = (last_scale + delta + 256) % 256;
        }
        if next_scale != 0 {
            last_scale = next_scale;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitstream::strip_emulation_prevention;

    // Baseline 1280x720 SPS captured from a reference encoder.
    const SPS_720P: [u8; 21] = [
        0x42, 0x00, 0x1f, 0xac, 0x34, 0xc8, 0x14, 0x00, 0x00, 0x03, 0x00, 0x04, 0x00, 0x00, 0x03,
        0x00, 0xf0, 0x3c, 0x60, 0xc6, 0x58,
    ];

    #[test]
    fn parse_baseline_sps() {
        let rbsp = strip_emulation_prevention(&SPS_720P);
        let sps = Sps::parse(&rbsp).unwrap();
        assert_eq!(sps.profile_idc, 66);
        assert_eq!(sps.level_idc, 31);
        assert_eq!(sps.seq_parameter_set_id, 0);
        assert!(sps.width > 0 && sps.height > 0);
        assert!(sps.mb_count() > 0);
    }

    #[test]
    fn truncated_sps_rejected() {
        let rbsp = strip_emulation_prevention(&SPS_720P);
        assert!(Sps::parse(&rbsp[..4]).is_err());
    }
}

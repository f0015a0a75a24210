use crate::bitstream::BitReader;
use crate::params::{MAX_PPS, MAX_SPS};
use crate::Error;

/// Picture parameter set, reduced to the fields slice validation and
/// quantization setup consume.
#[derive(Debug, Clone)]
pub struct Pps {
    pub pic_parameter_set_id: u8,
    pub seq_parameter_set_id: u8,
    pub entropy_coding_mode_flag: bool,
    pub bottom_field_pic_order_in_frame_present_flag: bool,
    pub num_ref_idx_l0_default_active_minus1: u8,
    pub num_ref_idx_l1_default_active_minus1: u8,
    pub weighted_pred_flag: bool,
    pub weighted_bipred_idc: u8,
    pub pic_init_qp_minus26: i8,
    pub pic_init_qs_minus26: i8,
    pub chroma_qp_index_offset: i8,
    pub deblocking_filter_control_present_flag: bool,
    pub constrained_intra_pred_flag: bool,
    pub redundant_pic_cnt_present_flag: bool,
    pub transform_8x8_mode_flag: bool,
}

impl Pps {
    /// Parse a PPS RBSP (emulation-prevention bytes already removed,
    /// NAL header byte excluded).
    pub fn parse(rbsp: &[u8]) -> Result<Self, Error> {
        let mut r = BitReader::new(rbsp);

        let pic_parameter_set_id = r.ue()?;
        if pic_parameter_set_id >= MAX_PPS as u32 {
            return Err(Error::Pps(format!(
                "pic_parameter_set_id {pic_parameter_set_id} out of range"
            )));
        }
        let seq_parameter_set_id = r.ue()?;
        if seq_parameter_set_id >= MAX_SPS as u32 {
            return Err(Error::Pps(format!(
                "seq_parameter_set_id {seq_parameter_set_id} out of range"
            )));
        }

        let entropy_coding_mode_flag = r.read_bit()?;
        let bottom_field_pic_order_in_frame_present_flag = r.read_bit()?;

        let num_slice_groups_minus1 = r.ue()?;
        if num_slice_groups_minus1 > 0 {
            // FMO slice groups never occur in the IDR-only subset we
            // decode, but the syntax must still be consumed.
            skip_slice_groups(&mut r, num_slice_groups_minus1)?;
        }

        let num_ref_idx_l0_default_active_minus1 = range_checked(
            r.ue()?,
            31,
            "num_ref_idx_l0_default_active_minus1",
        )?;
        let num_ref_idx_l1_default_active_minus1 = range_checked(
            r.ue()?,
            31,
            "num_ref_idx_l1_default_active_minus1",
        )?;

        let weighted_pred_flag = r.read_bit()?;
        let weighted_bipred_idc = r.read_bits(2)? as u8;

        let pic_init_qp_minus26 = signed_range_checked(r.se()?, -26, 25, "pic_init_qp_minus26")?;
        let pic_init_qs_minus26 = signed_range_checked(r.se()?, -26, 25, "pic_init_qs_minus26")?;
        let chroma_qp_index_offset =
            signed_range_checked(r.se()?, -12, 12, "chroma_qp_index_offset")?;

        let deblocking_filter_control_present_flag = r.read_bit()?;
        let constrained_intra_pred_flag = r.read_bit()?;
        let redundant_pic_cnt_present_flag = r.read_bit()?;

        let mut transform_8x8_mode_flag = false;
        if r.more_rbsp_data() {
            transform_8x8_mode_flag = r.read_bit()?;
            if r.read_bit()? {
                // pic_scaling_matrix_present_flag
                let lists = 6 + if transform_8x8_mode_flag { 2 } else { 0 };
                for i in 0..lists {
                    if r.read_bit()? {
                        skip_scaling_list(&mut r, if i < 6 { 16 } else { 64 })?;
                    }
                }
            }
            let _second_chroma_qp_index_offset =
                signed_range_checked(r.se()?, -12, 12, "second_chroma_qp_index_offset")?;
        }

        Ok(Pps {
            pic_parameter_set_id: pic_parameter_set_id as u8,
            seq_parameter_set_id: seq_parameter_set_id as u8,
            entropy_coding_mode_flag,
            bottom_field_pic_order_in_frame_present_flag,
            num_ref_idx_l0_default_active_minus1: num_ref_idx_l0_default_active_minus1 as u8,
            num_ref_idx_l1_default_active_minus1: num_ref_idx_l1_default_active_minus1 as u8,
            weighted_pred_flag,
            weighted_bipred_idc,
            pic_init_qp_minus26: pic_init_qp_minus26 as i8,
            pic_init_qs_minus26: pic_init_qs_minus26 as i8,
            chroma_qp_index_offset: chroma_qp_index_offset as i8,
            deblocking_filter_control_present_flag,
            constrained_intra_pred_flag,
            redundant_pic_cnt_present_flag,
            transform_8x8_mode_flag,
        })
    }
}

fn range_checked(v: u32, max: u32, name: &str) -> Result<u32, Error> {
    if v > max {
        return Err(Error::Pps(format!("{name} {v} out of range")));
    }
    Ok(v)
}

fn signed_range_checked(v: i32, min: i32, max: i32, name: &str) -> Result<i32, Error> {
    if v < min || v > max {
        return Err(Error::Pps(format!("{name} {v} out of range")));
    }
    Ok(v)
}

fn skip_slice_groups(r: &mut BitReader, num_slice_groups_minus1: u32) -> Result<(), Error> {
    let map_type = r.ue()?;
    match map_type {
        0 => {
            for _ in 0..=num_slice_groups_minus1 {
                let _run_length_minus1 = r.ue()?;
            }
        }
        2 => {
            for _ in 0..num_slice_groups_minus1 {
                let _top_left = r.ue()?;
                let _bottom_right = r.ue()?;
            }
        }
        3 | 4 | 5 => {
            let _change_direction_flag = r.read_bit()?;
            let _change_rate_minus1 = r.ue()?;
        }
        6 => {
            let pic_size_in_map_units_minus1 = r.ue()?;
            let id_bits = (num_slice_groups_minus1 + 1).ilog2();
            for _ in 0..=pic_size_in_map_units_minus1 {
                r.read_bits(id_bits)?;
            }
        }
        1 => {}
        other => {
            return Err(Error::Pps(format!("slice_group_map_type {other} out of range")));
        }
    }
    Ok(())
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

    // Minimal CABAC PPS: ids 0/0.
    const PPS_MIN: [u8; 3] = [0xee, 0x3c, 0x80];

    #[test]
    fn parse_minimal_pps() {
        let pps = Pps::parse(&PPS_MIN).unwrap();
        assert_eq!(pps.pic_parameter_set_id, 0);
        assert_eq!(pps.seq_parameter_set_id, 0);
    }

    #[test]
    fn empty_pps_rejected() {
        assert!(Pps::parse(&[]).is_err());
    }
}

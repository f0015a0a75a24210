use crate::pps::Pps;
use crate::sps::Sps;
use crate::Error;

/// H.264 caps the id spaces at 32 sequence and 32 picture parameter sets.
pub const MAX_SPS: usize = 32;
pub const MAX_PPS: usize = 32;

/// Indexed slots for the parameter sets seen so far in the stream.
///
/// Entries are written only by the SPS/PPS NAL handlers; a later set with
/// the same id replaces the slot. Slots live until decoder teardown.
pub struct ParameterSetCache {
    sps: [Option<Sps>; MAX_SPS],
    pps: [Option<Pps>; MAX_PPS],
}

impl ParameterSetCache {
    pub fn new() -> Self {
        Self {
            sps: std::array::from_fn(|_| None),
            pps: std::array::from_fn(|_| None),
        }
    }

    /// Store a parsed SPS in its id slot, returning the slot id.
    pub fn put_sps(&mut self, sps: Sps) -> u8 {
        let id = sps.seq_parameter_set_id;
        self.sps[id as usize] = Some(sps);
        id
    }

    /// Store a parsed PPS in its id slot, returning the slot id.
    pub fn put_pps(&mut self, pps: Pps) -> u8 {
        let id = pps.pic_parameter_set_id;
        self.pps[id as usize] = Some(pps);
        id
    }

    pub fn sps(&self, id: u8) -> Option<&Sps> {
        self.sps.get(id as usize).and_then(Option::as_ref)
    }

    pub fn pps(&self, id: u8) -> Option<&Pps> {
        self.pps.get(id as usize).and_then(Option::as_ref)
    }

    pub fn sps_count(&self) -> usize {
        self.sps.iter().filter(|s| s.is_some()).count()
    }

    pub fn pps_count(&self) -> usize {
        self.pps.iter().filter(|s| s.is_some()).count()
    }

    /// Referential-integrity walk for a slice about to be decoded:
    /// `slice.pic_parameter_set_id` must resolve to a cached PPS whose
    /// `seq_parameter_set_id` in turn resolves to a cached SPS.
    pub fn resolve(&self, pic_parameter_set_id: u8) -> Result<(&Sps, &Pps), Error> {
        let pps = self
            .pps(pic_parameter_set_id)
            .ok_or(Error::MissingPps(pic_parameter_set_id))?;
        let sps = self
            .sps(pps.seq_parameter_set_id)
            .ok_or(Error::MissingSps(pps.seq_parameter_set_id))?;
        Ok((sps, pps))
    }
}

impl Default for ParameterSetCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitstream::strip_emulation_prevention;

    fn sample_sps() -> Sps {
        let ebsp = [
            0x42, 0x00, 0x1f, 0xac, 0x34, 0xc8, 0x14, 0x00, 0x00, 0x03, 0x00, 0x04, 0x00, 0x00,
            0x03, 0x00, 0xf0, 0x3c, 0x60, 0xc6, 0x58,
        ];
        Sps::parse(&strip_emulation_prevention(&ebsp)).unwrap()
    }

    fn sample_pps() -> Pps {
        Pps::parse(&[0xee, 0x3c, 0x80]).unwrap()
    }

    #[test]
    fn resolve_requires_both_sets() {
        let mut cache = ParameterSetCache::new();
        assert!(matches!(cache.resolve(0), Err(Error::MissingPps(0))));

        cache.put_pps(sample_pps());
        assert!(matches!(cache.resolve(0), Err(Error::MissingSps(0))));

        cache.put_sps(sample_sps());
        let (sps, pps) = cache.resolve(0).unwrap();
        assert_eq!(sps.seq_parameter_set_id, pps.seq_parameter_set_id);
    }

    #[test]
    fn dangling_pps_reference() {
        let mut cache = ParameterSetCache::new();
        cache.put_sps(sample_sps());
        cache.put_pps(sample_pps());
        assert!(matches!(cache.resolve(2), Err(Error::MissingPps(2))));
    }

    #[test]
    fn replacement_overwrites_slot() {
        let mut cache = ParameterSetCache::new();
        cache.put_sps(sample_sps());
        cache.put_sps(sample_sps());
        assert_eq!(cache.sps_count(), 1);
    }
}

use crate::Error;

/// H.264 nal_unit_type values this pipeline distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NalUnitType {
    NonIdrSlice,
    PartitionA,
    PartitionB,
    PartitionC,
    IdrSlice,
    Sei,
    Sps,
    Pps,
    AccessUnitDelimiter,
    EndOfSequence,
    EndOfStream,
    Filler,
    Other(u8),
}

impl From<u8> for NalUnitType {
    fn from(v: u8) -> Self {
        match v {
            1 => Self::NonIdrSlice,
            2 => Self::PartitionA,
            3 => Self::PartitionB,
            4 => Self::PartitionC,
            5 => Self::IdrSlice,
            6 => Self::Sei,
            7 => Self::Sps,
            8 => Self::Pps,
            9 => Self::AccessUnitDelimiter,
            10 => Self::EndOfSequence,
            11 => Self::EndOfStream,
            12 => Self::Filler,
            other => Self::Other(other),
        }
    }
}

/// One-byte NAL unit header.
#[derive(Debug, Clone, Copy)]
pub struct NalHeader {
    pub ref_idc: u8,
    pub unit_type: NalUnitType,
}

impl NalHeader {
    /// Parse the header byte; the forbidden_zero_bit must be clear.
    pub fn parse(nal: &[u8]) -> Result<Self, Error> {
        let Some(&header) = nal.first() else {
            return Err(Error::Bitstream("empty nal unit".into()));
        };
        if header & 0x80 != 0 {
            return Err(Error::Bitstream("forbidden_zero_bit set".into()));
        }
        Ok(NalHeader {
            ref_idc: (header >> 5) & 0b11,
            unit_type: NalUnitType::from(header & 0x1F),
        })
    }

    pub fn is_vcl(&self) -> bool {
        matches!(
            self.unit_type,
            NalUnitType::NonIdrSlice
                | NalUnitType::PartitionA
                | NalUnitType::PartitionB
                | NalUnitType::PartitionC
                | NalUnitType::IdrSlice
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_fields() {
        let h = NalHeader::parse(&[0x67, 0x42]).unwrap();
        assert_eq!(h.ref_idc, 3);
        assert_eq!(h.unit_type, NalUnitType::Sps);

        let h = NalHeader::parse(&[0x65]).unwrap();
        assert_eq!(h.unit_type, NalUnitType::IdrSlice);
        assert!(h.is_vcl());
    }

    #[test]
    fn forbidden_bit_rejected() {
        assert!(NalHeader::parse(&[0xE7]).is_err());
        assert!(NalHeader::parse(&[]).is_err());
    }

    #[test]
    fn unknown_types_preserved() {
        let h = NalHeader::parse(&[20]).unwrap();
        assert_eq!(h.unit_type, NalUnitType::Other(20));
        assert!(!h.is_vcl());
    }
}

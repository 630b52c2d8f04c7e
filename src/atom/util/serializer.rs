use crate::atom::util::parser::{FIXED_POINT_16X16_SCALE, FIXED_POINT_8X8_SCALE};

pub fn be_u32(value: u32) -> Vec<u8> {
    value.to_be_bytes().to_vec()
}

/// Serializes a count that was built from an in-memory table, saturating at `u32::MAX`.
pub fn be_u32_len(len: usize) -> Vec<u8> {
    be_u32(u32::try_from(len).unwrap_or(u32::MAX))
}

/// Serializes a version-sized field (32 bits for version 0, 64 bits for version 1).
pub fn be_u32_or_u64(version: u8, value: u64) -> Vec<u8> {
    if version == 1 {
        value.to_be_bytes().to_vec()
    } else {
        be_u32(u32::try_from(value).unwrap_or(u32::MAX))
    }
}

pub fn fixed_point_16x16(val: f32) -> Vec<u8> {
    let fixed = (val * FIXED_POINT_16X16_SCALE) as u32;
    fixed.to_be_bytes().to_vec()
}

pub fn fixed_point_8x8(val: f32) -> Vec<u8> {
    let fixed = (val * FIXED_POINT_8X8_SCALE) as u16;
    fixed.to_be_bytes().to_vec()
}

/// Serializes a box header for a box whose body is `data_size` bytes.
///
/// Falls back to the 16 byte extended form when the total size doesn't fit in 32 bits.
pub fn atom_header(atom_type: [u8; 4], data_size: u64) -> Vec<u8> {
    let mut result = Vec::with_capacity(16);

    let total_size_with_32bit_header = 8u64 + data_size;
    if total_size_with_32bit_header > u32::MAX as u64 {
        result.extend_from_slice(&1u32.to_be_bytes());
        result.extend_from_slice(&atom_type);
        result.extend_from_slice(&(16u64 + data_size).to_be_bytes());
    } else {
        result.extend_from_slice(&(total_size_with_32bit_header as u32).to_be_bytes());
        result.extend_from_slice(&atom_type);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_atom_header_32bit() {
        assert_eq!(atom_header(*b"free", 8), vec![0, 0, 0, 16, b'f', b'r', b'e', b'e']);
    }

    #[test]
    fn test_atom_header_64bit() {
        let header = atom_header(*b"mdat", u32::MAX as u64);
        assert_eq!(header.len(), 16);
        assert_eq!(&header[0..4], &[0, 0, 0, 1]);
        assert_eq!(&header[4..8], b"mdat");
        assert_eq!(
            u64::from_be_bytes(header[8..16].try_into().unwrap()),
            u32::MAX as u64 + 16
        );
    }

    #[test]
    fn test_version_sized() {
        assert_eq!(be_u32_or_u64(0, 5), vec![0, 0, 0, 5]);
        assert_eq!(be_u32_or_u64(1, 5), vec![0, 0, 0, 0, 0, 0, 0, 5]);
    }
}

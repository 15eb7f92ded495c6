//! Disk-identifier and label checksums that are neither CRC32 nor GUIDs:
//! the DOS disk signature string, and the XOR-fold checksums Sun and SGI
//! disklabels use to self-validate.

#[cfg(feature = "alloc")]
use alloc::string::String;

/// Formats a 4-byte little-endian DOS disk signature as the 8 hex-digit
/// `PTUUID` string util-linux reports for `dos` tables.
#[cfg(feature = "alloc")]
pub fn dos_disk_id(bytes: [u8; 4]) -> String {
    alloc::format!(
        "{:02x}{:02x}{:02x}{:02x}",
        bytes[3], bytes[2], bytes[1], bytes[0]
    )
}

/// Sun disklabels are valid when the 16-bit big-endian XOR-fold of the
/// first 512 bytes (label + checksum field) is zero.
pub fn sun_checksum(label: &[u8; 512]) -> u16 {
    label
        .chunks_exact(2)
        .fold(0u16, |acc, w| acc ^ u16::from_be_bytes([w[0], w[1]]))
}

/// SGI volume headers are valid when the 32-bit big-endian sum of the
/// first 512 bytes (including the stored checksum) is zero.
pub fn sgi_checksum(header: &[u8; 512]) -> u32 {
    header
        .chunks_exact(4)
        .fold(0u32, |acc, w| acc.wrapping_add(u32::from_be_bytes([w[0], w[1], w[2], w[3]])))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(feature = "alloc")]
    fn dos_disk_id_formats_reversed() {
        assert_eq!(dos_disk_id([0x12, 0x34, 0x56, 0x78]), "78563412");
    }

    #[test]
    fn sun_checksum_of_zeroed_label_is_zero() {
        let label = [0u8; 512];
        assert_eq!(sun_checksum(&label), 0);
    }

    #[test]
    fn sun_checksum_detects_corruption() {
        let mut label = [0u8; 512];
        label[0] = 1;
        assert_ne!(sun_checksum(&label), 0);
    }

    #[test]
    fn sgi_checksum_of_zeroed_header_is_zero() {
        let header = [0u8; 512];
        assert_eq!(sgi_checksum(&header), 0);
    }
}

//! UTF-16LE decoding for on-disk partition names (GPT, Atari ICD labels).

#[cfg(feature = "alloc")]
use alloc::string::String;

/// Decodes up to `len` little-endian UTF-16 code units from `src`,
/// stopping at the first code unit past `len` or at the end of `src`,
/// whichever comes first. Ill-formed sequences (unpaired surrogates)
/// are replaced with `U+FFFD`, matching `char::decode_utf16`'s lossy
/// behavior rather than rejecting the whole string the way a strict
/// decoder would — GPT partition names routinely contain padding
/// garbage beyond their NUL terminator that callers want trimmed, not
/// treated as a hard parse error.
#[cfg(feature = "alloc")]
pub fn utf16le_decode(src: &[u8], len: usize) -> String {
    let units = src
        .chunks_exact(2)
        .take(len)
        .map(|c| u16::from_le_bytes([c[0], c[1]]));
    char::decode_utf16(units)
        .map(|r| r.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}

/// A fixed-capacity, NUL-terminated UTF-16LE string as stored inline in
/// an on-disk struct (e.g. a GPT partition entry's 72-byte name field,
/// `N = 36` code units).
#[repr(transparent)]
#[derive(Clone, Copy)]
#[cfg_attr(feature = "bytemuck", derive(bytemuck::Pod, bytemuck::Zeroable))]
pub struct FixedUtf16Str<const N: usize> {
    units: [crate::types::number::U16<crate::LittleEndian>; N],
}

impl<const N: usize> FixedUtf16Str<N> {
    /// Decodes the field, stopping at the first NUL code unit (or the
    /// end of the field), trimming any trailing whitespace per spec
    /// §4.3.2.
    #[cfg(feature = "alloc")]
    pub fn to_trimmed_string(&self) -> String {
        use crate::types::endian::Endian;
        let len = self
            .units
            .iter()
            .position(|u| u.get() == 0)
            .unwrap_or(N);
        let bytes: alloc::vec::Vec<u8> = self.units[..len]
            .iter()
            .flat_map(|u| u.get().to_le_bytes())
            .collect();
        utf16le_decode(&bytes, len).trim_end().into()
    }
}

#[cfg(all(test, feature = "alloc"))]
mod tests {
    use super::*;
    use crate::types::endian::Endian;
    use crate::types::number::U16;

    #[test]
    fn decodes_ascii_prefix() {
        let src = b"EFI\x00\x00\x00\x00\x00";
        assert_eq!(utf16le_decode(src, 4), "EFI\0");
    }

    #[test]
    fn fixed_str_trims_at_nul_and_whitespace() {
        let mut units = [U16::<crate::LittleEndian>::new(0); 8];
        for (i, c) in "data  ".chars().enumerate() {
            units[i].set(c as u16);
        }
        let s = FixedUtf16Str { units };
        assert_eq!(s.to_trimmed_string(), "data");
    }

    #[test]
    fn replaces_unpaired_surrogate() {
        // 0xD800 is a lone high surrogate with no following low surrogate.
        let src = [0x00, 0xD8, 0x41, 0x00];
        let decoded = utf16le_decode(&src, 2);
        assert_eq!(decoded.chars().next(), Some(char::REPLACEMENT_CHARACTER));
    }
}

//! Small helpers for binary data processing.
//!
//! - Power-of-two alignment arithmetic
//! - C string scanning (via memchr)
//! - Fixed 16-byte Mach-O name fields
//! - Signed offset arithmetic used when shifting file offsets

// =============================================================================
// Alignment Utilities
// =============================================================================

/// Aligns a value up to the given power-of-two alignment.
///
/// # Panics
///
/// Debug assertion fails if `alignment` is not a power of 2.
#[inline(always)]
pub const fn align_up(value: u64, alignment: u64) -> u64 {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

/// Checks if a value is aligned to the given power-of-two alignment.
#[inline(always)]
pub const fn is_aligned(value: u64, alignment: u64) -> bool {
    debug_assert!(alignment.is_power_of_two());
    (value & (alignment - 1)) == 0
}

/// Pads `buffer` with zero bytes until its length is a multiple of `alignment`.
#[inline]
pub fn pad_to(buffer: &mut Vec<u8>, alignment: u64) {
    let len = align_up(buffer.len() as u64, alignment) as usize;
    buffer.resize(len, 0);
}

// =============================================================================
// C Strings
// =============================================================================

/// Finds the position of the first null byte in a slice.
///
/// Returns the slice length when there is no terminator.
#[inline(always)]
pub fn memchr_null(data: &[u8]) -> usize {
    memchr::memchr(0, data).unwrap_or(data.len())
}

/// Returns the bytes of the C string starting at `offset`, without the terminator.
///
/// Returns `None` if `offset` lies outside `data`. A string that runs to the
/// end of `data` without a terminator is returned as-is.
#[inline]
pub fn cstr_at(data: &[u8], offset: usize) -> Option<&[u8]> {
    let tail = data.get(offset..)?;
    Some(&tail[..memchr_null(tail)])
}

/// Returns a null-padded 16-byte name as a string.
pub fn fixed_name(name: &[u8; 16]) -> &str {
    let end = memchr_null(name);
    std::str::from_utf8(&name[..end]).unwrap_or("")
}

/// Builds a null-padded 16-byte name, truncating longer input.
pub fn to_fixed_name(name: &str) -> [u8; 16] {
    let mut out = [0u8; 16];
    let bytes = name.as_bytes();
    let len = bytes.len().min(16);
    out[..len].copy_from_slice(&bytes[..len]);
    out
}

// =============================================================================
// Offset Arithmetic
// =============================================================================

/// Adds a signed delta to a 32-bit file offset.
#[inline]
pub fn shift_u32(value: u32, delta: i64) -> Option<u32> {
    u32::try_from(i64::from(value).checked_add(delta)?).ok()
}

/// Adds a signed delta to a 64-bit file offset or address.
#[inline]
pub fn shift_u64(value: u64, delta: i64) -> Option<u64> {
    value.checked_add_signed(delta)
}

/// Converts a pair of unsigned positions into a signed delta `to - from`.
#[inline]
pub fn delta(from: u64, to: u64) -> Option<i64> {
    i64::try_from(i128::from(to) - i128::from(from)).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 8), 0);
        assert_eq!(align_up(1, 8), 8);
        assert_eq!(align_up(8, 8), 8);
        assert_eq!(align_up(100, 0x4000), 0x4000);
        assert_eq!(align_up(0x4001, 0x4000), 0x8000);
    }

    #[test]
    fn test_pad_to() {
        let mut buffer = vec![1u8; 5];
        pad_to(&mut buffer, 8);
        assert_eq!(buffer, [1, 1, 1, 1, 1, 0, 0, 0]);
        pad_to(&mut buffer, 8);
        assert_eq!(buffer.len(), 8);
    }

    #[test]
    fn test_cstr_at() {
        let data = b"\0_main\0_start";
        assert_eq!(cstr_at(data, 0), Some(&b""[..]));
        assert_eq!(cstr_at(data, 1), Some(&b"_main"[..]));
        assert_eq!(cstr_at(data, 7), Some(&b"_start"[..]));
        assert_eq!(cstr_at(data, 64), None);
    }

    #[test]
    fn test_fixed_name() {
        let name = to_fixed_name("__LINKEDIT");
        assert_eq!(fixed_name(&name), "__LINKEDIT");
        let long = to_fixed_name("__a_very_long_segment_name");
        assert_eq!(fixed_name(&long).len(), 16);
    }

    #[test]
    fn test_shift() {
        assert_eq!(shift_u32(0x4000, 0x4000), Some(0x8000));
        assert_eq!(shift_u32(0x4000, -0x4000), Some(0));
        assert_eq!(shift_u32(0x10, -0x20), None);
        assert_eq!(shift_u32(u32::MAX, 1), None);
        assert_eq!(shift_u64(0x1_0000_0000, -1), Some(0xFFFF_FFFF));
        assert_eq!(delta(0x5000, 0x1000), Some(-0x4000));
    }
}

//! Byte-order aware reading and writing of on-disk records.
//!
//! Universal binary tables are always big-endian, while everything inside a
//! slice follows the byte order of that slice's CPU. Records are copied out
//! of the buffer with zerocopy and their integer fields swapped when the
//! image order differs from the host.

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use zerocopy::{FromBytes, Immutable, IntoBytes};

use super::constants::*;
use super::structs::*;

/// Byte order of an image or table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    /// Little-endian (x86, ARM)
    Little,
    /// Big-endian (PowerPC, universal tables)
    Big,
}

impl Endian {
    /// The byte order of the host.
    pub const NATIVE: Endian = if cfg!(target_endian = "little") {
        Endian::Little
    } else {
        Endian::Big
    };

    /// Returns true if values in this order can be used without swapping.
    #[inline]
    pub fn is_native(self) -> bool {
        self == Self::NATIVE
    }

    /// Detects the byte order and width of a Mach-O image from its first word.
    ///
    /// Returns `(endian, is_64)`, or `None` for an unrecognised magic.
    pub fn from_mach_magic(bytes: [u8; 4]) -> Option<(Endian, bool)> {
        match u32::from_le_bytes(bytes) {
            MH_MAGIC => Some((Endian::Little, false)),
            MH_MAGIC_64 => Some((Endian::Little, true)),
            MH_CIGAM => Some((Endian::Big, false)),
            MH_CIGAM_64 => Some((Endian::Big, true)),
            _ => None,
        }
    }

    /// Reads a `u32` at `offset`.
    #[inline]
    pub fn read_u32(self, data: &[u8], offset: usize) -> Option<u32> {
        let bytes = data.get(offset..offset.checked_add(4)?)?;
        Some(match self {
            Endian::Little => LittleEndian::read_u32(bytes),
            Endian::Big => BigEndian::read_u32(bytes),
        })
    }

    /// Writes a `u32` at `offset`.
    #[inline]
    pub fn write_u32(self, data: &mut [u8], offset: usize, value: u32) -> Option<()> {
        let bytes = data.get_mut(offset..offset.checked_add(4)?)?;
        match self {
            Endian::Little => LittleEndian::write_u32(bytes, value),
            Endian::Big => BigEndian::write_u32(bytes, value),
        }
        Some(())
    }
}

// =============================================================================
// Field Swapping
// =============================================================================

/// Reverses the byte order of every integer field of a record.
pub trait ByteSwap {
    /// Swaps all multi-byte fields in place.
    fn swap_fields(&mut self);
}

macro_rules! impl_byte_swap {
    ($($ty:ty => [$($field:ident),* $(,)?]),* $(,)?) => {
        $(
            impl ByteSwap for $ty {
                #[inline]
                fn swap_fields(&mut self) {
                    $(self.$field = self.$field.swap_bytes();)*
                }
            }
        )*
    };
}

impl_byte_swap! {
    FatHeader => [magic, nfat_arch],
    FatArch => [cputype, cpusubtype, offset, size, align],
    MachHeader => [magic, cputype, cpusubtype, filetype, ncmds, sizeofcmds, flags],
    LoadCommandHeader => [cmd, cmdsize],
    SegmentCommand32 => [cmd, cmdsize, vmaddr, vmsize, fileoff, filesize, maxprot, initprot, nsects, flags],
    SegmentCommand64 => [cmd, cmdsize, vmaddr, vmsize, fileoff, filesize, maxprot, initprot, nsects, flags],
    Section32 => [addr, size, offset, align, reloff, nreloc, flags, reserved1, reserved2],
    Section64 => [addr, size, offset, align, reloff, nreloc, flags, reserved1, reserved2, reserved3],
    SymtabCommand => [cmd, cmdsize, symoff, nsyms, stroff, strsize],
    DysymtabCommand => [
        cmd, cmdsize, ilocalsym, nlocalsym, iextdefsym, nextdefsym, iundefsym, nundefsym,
        tocoff, ntoc, modtaboff, nmodtab, extrefsymoff, nextrefsyms, indirectsymoff,
        nindirectsyms, extreloff, nextrel, locreloff, nlocrel,
    ],
    DyldInfoCommand => [
        cmd, cmdsize, rebase_off, rebase_size, bind_off, bind_size, weak_bind_off,
        weak_bind_size, lazy_bind_off, lazy_bind_size, export_off, export_size,
    ],
    LinkeditDataCommand => [cmd, cmdsize, dataoff, datasize],
    TwolevelHintsCommand => [cmd, cmdsize, offset, nhints],
    DylibCommand => [cmd, cmdsize, name_offset, timestamp, current_version, compatibility_version],
    UuidCommand => [cmd, cmdsize],
    VersionMinCommand => [cmd, cmdsize, version, sdk],
    BuildVersionCommand => [cmd, cmdsize, platform, minos, sdk, ntools],
    Nlist32 => [n_strx, n_desc, n_value],
    Nlist64 => [n_strx, n_desc, n_value],
    RelocationInfo => [r_address, r_info],
}

// =============================================================================
// Record Codec
// =============================================================================

/// Reads a record at `offset`, converting it from `endian` to host order.
///
/// Returns `None` if the record does not fit in `data`.
#[inline]
pub fn read<T: FromBytes + ByteSwap>(data: &[u8], offset: usize, endian: Endian) -> Option<T> {
    let (mut value, _) = T::read_from_prefix(data.get(offset..)?).ok()?;
    if !endian.is_native() {
        value.swap_fields();
    }
    Some(value)
}

/// Writes a record at `offset`, converting it from host order to `endian`.
///
/// Returns `None` if the record does not fit in `data`.
#[inline]
pub fn write<T>(data: &mut [u8], offset: usize, value: &T, endian: Endian) -> Option<()>
where
    T: IntoBytes + Immutable + ByteSwap + Copy,
{
    let mut value = *value;
    if !endian.is_native() {
        value.swap_fields();
    }
    let bytes = value.as_bytes();
    data.get_mut(offset..offset.checked_add(bytes.len())?)?
        .copy_from_slice(bytes);
    Some(())
}

/// Appends a record to `out` in `endian` order.
#[inline]
pub fn push<T>(out: &mut Vec<u8>, value: &T, endian: Endian)
where
    T: IntoBytes + Immutable + ByteSwap + Copy,
{
    let mut value = *value;
    if !endian.is_native() {
        value.swap_fields();
    }
    out.extend_from_slice(value.as_bytes());
}

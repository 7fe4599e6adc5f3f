//! Mach-O binary structures.
//!
//! These structures match the on-disk layout of Mach-O and universal binary
//! records. They are read and written through [`super::endian`], which swaps
//! the integer fields when the image byte order differs from the host.

use std::fmt;

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use super::arch::Architecture;
use super::constants::*;
use super::endian::Endian;

// =============================================================================
// Universal Binary Structures
// =============================================================================

/// Universal binary header. Always big-endian on disk.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct FatHeader {
    /// FAT_MAGIC
    pub magic: u32,
    /// Number of fat_arch records that follow
    pub nfat_arch: u32,
}

impl FatHeader {
    /// Size of the header in bytes.
    pub const SIZE: usize = 8;
}

/// Describes one architecture slice of a universal binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct FatArch {
    /// CPU type
    pub cputype: u32,
    /// CPU subtype
    pub cpusubtype: u32,
    /// File offset of the slice
    pub offset: u32,
    /// Size of the slice
    pub size: u32,
    /// Slice alignment as a power of two
    pub align: u32,
}

impl FatArch {
    /// Size of the record in bytes.
    pub const SIZE: usize = 20;

    /// Returns the architecture of this slice.
    #[inline]
    pub fn architecture(&self) -> Architecture {
        Architecture::from_cpu(self.cputype, self.cpusubtype)
    }
}

// =============================================================================
// Header Structures
// =============================================================================

/// Mach-O header shared by both widths.
///
/// The 64-bit header carries one more reserved word, which the image keeps
/// alongside this record.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct MachHeader {
    /// Magic number (MH_MAGIC or MH_MAGIC_64)
    pub magic: u32,
    /// CPU type
    pub cputype: u32,
    /// CPU subtype
    pub cpusubtype: u32,
    /// File type
    pub filetype: u32,
    /// Number of load commands
    pub ncmds: u32,
    /// Size of load commands
    pub sizeofcmds: u32,
    /// Flags
    pub flags: u32,
}

impl MachHeader {
    /// Size of the shared part of the header in bytes.
    pub const SIZE: usize = 28;

    /// Returns true for the file types the engine accepts.
    #[inline]
    pub fn is_supported_filetype(&self) -> bool {
        matches!(self.filetype, MH_EXECUTE | MH_BUNDLE | MH_OBJECT)
    }

    /// Returns the architecture named by the CPU type and subtype.
    #[inline]
    pub fn architecture(&self) -> Architecture {
        Architecture::from_cpu(self.cputype, self.cpusubtype)
    }

    /// Returns the header flags.
    #[inline]
    pub fn flags(&self) -> MachOFlags {
        MachOFlags::from_bits_retain(self.flags)
    }
}

// =============================================================================
// Load Command Header
// =============================================================================

/// Generic load command header.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct LoadCommandHeader {
    /// Type of load command
    pub cmd: u32,
    /// Size of load command
    pub cmdsize: u32,
}

impl LoadCommandHeader {
    /// Size of the load command header.
    pub const SIZE: usize = 8;
}

// =============================================================================
// Segment Commands
// =============================================================================

/// 32-bit segment command.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct SegmentCommand32 {
    /// LC_SEGMENT
    pub cmd: u32,
    /// Size of this load command
    pub cmdsize: u32,
    /// Segment name (16 bytes, null-padded)
    pub segname: [u8; 16],
    /// Virtual memory address
    pub vmaddr: u32,
    /// Virtual memory size
    pub vmsize: u32,
    /// File offset
    pub fileoff: u32,
    /// Amount of file to map
    pub filesize: u32,
    /// Maximum VM protection
    pub maxprot: u32,
    /// Initial VM protection
    pub initprot: u32,
    /// Number of sections
    pub nsects: u32,
    /// Flags
    pub flags: u32,
}

impl SegmentCommand32 {
    /// Size of the segment command (without sections).
    pub const SIZE: usize = 56;
}

/// 64-bit segment command.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct SegmentCommand64 {
    /// LC_SEGMENT_64
    pub cmd: u32,
    /// Size of this load command
    pub cmdsize: u32,
    /// Segment name (16 bytes, null-padded)
    pub segname: [u8; 16],
    /// Virtual memory address
    pub vmaddr: u64,
    /// Virtual memory size
    pub vmsize: u64,
    /// File offset
    pub fileoff: u64,
    /// Amount of file to map
    pub filesize: u64,
    /// Maximum VM protection
    pub maxprot: u32,
    /// Initial VM protection
    pub initprot: u32,
    /// Number of sections
    pub nsects: u32,
    /// Flags
    pub flags: u32,
}

impl SegmentCommand64 {
    /// Size of the segment command (without sections).
    pub const SIZE: usize = 72;
}

// =============================================================================
// Sections
// =============================================================================

/// 32-bit section.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct Section32 {
    /// Section name (16 bytes, null-padded)
    pub sectname: [u8; 16],
    /// Segment name (16 bytes, null-padded)
    pub segname: [u8; 16],
    /// Memory address
    pub addr: u32,
    /// Size in bytes
    pub size: u32,
    /// File offset
    pub offset: u32,
    /// Alignment (power of 2)
    pub align: u32,
    /// File offset of relocation entries
    pub reloff: u32,
    /// Number of relocation entries
    pub nreloc: u32,
    /// Flags (section type and attributes)
    pub flags: u32,
    /// Reserved (index or count)
    pub reserved1: u32,
    /// Reserved (count or sizeof)
    pub reserved2: u32,
}

impl Section32 {
    /// Size of the section structure.
    pub const SIZE: usize = 68;
}

/// 64-bit section.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct Section64 {
    /// Section name (16 bytes, null-padded)
    pub sectname: [u8; 16],
    /// Segment name (16 bytes, null-padded)
    pub segname: [u8; 16],
    /// Memory address
    pub addr: u64,
    /// Size in bytes
    pub size: u64,
    /// File offset
    pub offset: u32,
    /// Alignment (power of 2)
    pub align: u32,
    /// File offset of relocation entries
    pub reloff: u32,
    /// Number of relocation entries
    pub nreloc: u32,
    /// Flags (section type and attributes)
    pub flags: u32,
    /// Reserved (index or count)
    pub reserved1: u32,
    /// Reserved (count or sizeof)
    pub reserved2: u32,
    /// Reserved
    pub reserved3: u32,
}

impl Section64 {
    /// Size of the section structure.
    pub const SIZE: usize = 80;
}

// =============================================================================
// Symbol Table Commands
// =============================================================================

/// Symbol table command.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct SymtabCommand {
    /// LC_SYMTAB
    pub cmd: u32,
    /// Size of this load command
    pub cmdsize: u32,
    /// Symbol table offset
    pub symoff: u32,
    /// Number of symbol table entries
    pub nsyms: u32,
    /// String table offset
    pub stroff: u32,
    /// String table size in bytes
    pub strsize: u32,
}

impl SymtabCommand {
    /// Size of this command.
    pub const SIZE: usize = 24;
}

/// Dynamic symbol table command.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct DysymtabCommand {
    /// LC_DYSYMTAB
    pub cmd: u32,
    /// Size of this load command
    pub cmdsize: u32,
    /// Index to local symbols
    pub ilocalsym: u32,
    /// Number of local symbols
    pub nlocalsym: u32,
    /// Index to externally defined symbols
    pub iextdefsym: u32,
    /// Number of externally defined symbols
    pub nextdefsym: u32,
    /// Index to undefined symbols
    pub iundefsym: u32,
    /// Number of undefined symbols
    pub nundefsym: u32,
    /// File offset to table of contents
    pub tocoff: u32,
    /// Number of entries in table of contents
    pub ntoc: u32,
    /// File offset to module table
    pub modtaboff: u32,
    /// Number of module table entries
    pub nmodtab: u32,
    /// Offset to referenced symbol table
    pub extrefsymoff: u32,
    /// Number of referenced symbol table entries
    pub nextrefsyms: u32,
    /// File offset to the indirect symbol table
    pub indirectsymoff: u32,
    /// Number of indirect symbol table entries
    pub nindirectsyms: u32,
    /// Offset to external relocation entries
    pub extreloff: u32,
    /// Number of external relocation entries
    pub nextrel: u32,
    /// Offset to local relocation entries
    pub locreloff: u32,
    /// Number of local relocation entries
    pub nlocrel: u32,
}

impl DysymtabCommand {
    /// Size of this command.
    pub const SIZE: usize = 80;
}

// =============================================================================
// LINKEDIT Data Commands
// =============================================================================

/// Compressed dyld info command.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct DyldInfoCommand {
    /// LC_DYLD_INFO or LC_DYLD_INFO_ONLY
    pub cmd: u32,
    /// Size of this load command
    pub cmdsize: u32,
    /// File offset to rebase info
    pub rebase_off: u32,
    /// Size of rebase info
    pub rebase_size: u32,
    /// File offset to binding info
    pub bind_off: u32,
    /// Size of binding info
    pub bind_size: u32,
    /// File offset to weak binding info
    pub weak_bind_off: u32,
    /// Size of weak binding info
    pub weak_bind_size: u32,
    /// File offset to lazy binding info
    pub lazy_bind_off: u32,
    /// Size of lazy binding info
    pub lazy_bind_size: u32,
    /// File offset to export info
    pub export_off: u32,
    /// Size of export info
    pub export_size: u32,
}

impl DyldInfoCommand {
    /// Size of this command.
    pub const SIZE: usize = 48;

    /// Returns the five (offset, size) streams in file order of the fields.
    pub fn streams(&self) -> [(u32, u32); 5] {
        [
            (self.rebase_off, self.rebase_size),
            (self.bind_off, self.bind_size),
            (self.weak_bind_off, self.weak_bind_size),
            (self.lazy_bind_off, self.lazy_bind_size),
            (self.export_off, self.export_size),
        ]
    }

    /// Returns mutable references to the five stream offsets.
    pub fn offsets_mut(&mut self) -> [&mut u32; 5] {
        [
            &mut self.rebase_off,
            &mut self.bind_off,
            &mut self.weak_bind_off,
            &mut self.lazy_bind_off,
            &mut self.export_off,
        ]
    }
}

/// LINKEDIT data command (code signature, function starts, data in code, ...).
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct LinkeditDataCommand {
    /// Command type
    pub cmd: u32,
    /// Size of this load command
    pub cmdsize: u32,
    /// File offset of data in __LINKEDIT
    pub dataoff: u32,
    /// Size of data in __LINKEDIT
    pub datasize: u32,
}

impl LinkeditDataCommand {
    /// Size of this command.
    pub const SIZE: usize = 16;
}

/// Two-level namespace hints command.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct TwolevelHintsCommand {
    /// LC_TWOLEVEL_HINTS
    pub cmd: u32,
    /// Size of this load command
    pub cmdsize: u32,
    /// File offset of the hint table
    pub offset: u32,
    /// Number of hints
    pub nhints: u32,
}

impl TwolevelHintsCommand {
    /// Size of this command.
    pub const SIZE: usize = 16;
    /// Size of one hint entry.
    pub const HINT_SIZE: usize = 4;
}

// =============================================================================
// Identification Commands
// =============================================================================

/// Dylib load command.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct DylibCommand {
    /// LC_LOAD_DYLIB, LC_LOAD_WEAK_DYLIB, etc.
    pub cmd: u32,
    /// Size of this load command
    pub cmdsize: u32,
    /// Offset of the library path from the start of the command
    pub name_offset: u32,
    /// Library build timestamp
    pub timestamp: u32,
    /// Library current version
    pub current_version: u32,
    /// Library compatibility version
    pub compatibility_version: u32,
}

impl DylibCommand {
    /// Minimum size of this command.
    pub const SIZE: usize = 24;
}

/// UUID command.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct UuidCommand {
    /// LC_UUID
    pub cmd: u32,
    /// Size of this load command
    pub cmdsize: u32,
    /// 128-bit UUID
    pub uuid: [u8; 16],
}

impl UuidCommand {
    /// Size of this command.
    pub const SIZE: usize = 24;
}

/// Minimum OS version command (macOS, iOS, tvOS, watchOS).
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct VersionMinCommand {
    /// LC_VERSION_MIN_*
    pub cmd: u32,
    /// Size of this load command
    pub cmdsize: u32,
    /// X.Y.Z encoded in nibbles xxxx.yy.zz
    pub version: u32,
    /// SDK version, same encoding
    pub sdk: u32,
}

impl VersionMinCommand {
    /// Size of this command.
    pub const SIZE: usize = 16;
}

/// Build version command.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct BuildVersionCommand {
    /// LC_BUILD_VERSION
    pub cmd: u32,
    /// Size of this load command
    pub cmdsize: u32,
    /// Platform
    pub platform: u32,
    /// Minimum OS version
    pub minos: u32,
    /// SDK version
    pub sdk: u32,
    /// Number of tool entries following this
    pub ntools: u32,
}

impl BuildVersionCommand {
    /// Minimum size of this command.
    pub const SIZE: usize = 24;
}

// =============================================================================
// Symbol Table Entries
// =============================================================================

/// 32-bit symbol table entry.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct Nlist32 {
    /// Index into the string table
    pub n_strx: u32,
    /// Type flag
    pub n_type: u8,
    /// Section number or NO_SECT
    pub n_sect: u8,
    /// Description
    pub n_desc: u16,
    /// Value of this symbol
    pub n_value: u32,
}

impl Nlist32 {
    /// Size of the structure.
    pub const SIZE: usize = 12;
}

/// 64-bit symbol table entry.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct Nlist64 {
    /// Index into the string table
    pub n_strx: u32,
    /// Type flag
    pub n_type: u8,
    /// Section number or NO_SECT
    pub n_sect: u8,
    /// Description
    pub n_desc: u16,
    /// Value of this symbol
    pub n_value: u64,
}

impl Nlist64 {
    /// Size of the structure.
    pub const SIZE: usize = 16;
}

// =============================================================================
// Relocation Entries
// =============================================================================

/// Relocation entry.
///
/// `r_info` packs `r_symbolnum:24, r_pcrel:1, r_length:2, r_extern:1,
/// r_type:4`. The C bitfield allocation follows the image byte order, so
/// big-endian images keep the symbol number in the top 24 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct RelocationInfo {
    /// Offset in the section to what is being relocated
    pub r_address: u32,
    /// Packed bitfields
    pub r_info: u32,
}

impl RelocationInfo {
    /// Size of the structure.
    pub const SIZE: usize = 8;

    /// Builds a non-scattered relocation entry.
    pub fn new(endian: Endian, address: u32, symbolnum: u32, is_extern: bool, length: u32) -> Self {
        let symbolnum = symbolnum & 0x00FF_FFFF;
        let ext = u32::from(is_extern);
        let length = length & 0x3;
        let r_info = match endian {
            Endian::Little => symbolnum | (length << 25) | (ext << 27),
            Endian::Big => (symbolnum << 8) | (length << 5) | (ext << 4),
        };
        Self {
            r_address: address,
            r_info,
        }
    }

    /// Returns true for scattered relocations, which carry no symbol number.
    #[inline]
    pub fn is_scattered(&self) -> bool {
        self.r_address & R_SCATTERED != 0
    }

    /// Returns the `r_extern` bit.
    #[inline]
    pub fn is_extern(&self, endian: Endian) -> bool {
        match endian {
            Endian::Little => (self.r_info >> 27) & 1 != 0,
            Endian::Big => (self.r_info >> 4) & 1 != 0,
        }
    }

    /// Returns the `r_symbolnum` field.
    #[inline]
    pub fn symbol_number(&self, endian: Endian) -> u32 {
        match endian {
            Endian::Little => self.r_info & 0x00FF_FFFF,
            Endian::Big => self.r_info >> 8,
        }
    }

    /// Replaces the `r_symbolnum` field, keeping the other bitfields.
    #[inline]
    pub fn set_symbol_number(&mut self, endian: Endian, symbolnum: u32) {
        let symbolnum = symbolnum & 0x00FF_FFFF;
        self.r_info = match endian {
            Endian::Little => (self.r_info & 0xFF00_0000) | symbolnum,
            Endian::Big => (self.r_info & 0x0000_00FF) | (symbolnum << 8),
        };
    }
}

// =============================================================================
// Display Implementations
// =============================================================================

impl fmt::Display for MachHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MachO {{ arch: {}, type: {:#x}, cmds: {}, flags: {:#x} }}",
            self.architecture(),
            self.filetype,
            self.ncmds,
            self.flags
        )
    }
}

impl fmt::Display for FatArch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Slice {{ arch: {}, file: {:#x}+{:#x}, align: 2^{} }}",
            self.architecture(),
            self.offset,
            self.size,
            self.align
        )
    }
}

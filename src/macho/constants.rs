//! Mach-O and universal binary constants.

use bitflags::bitflags;

// =============================================================================
// Magic Numbers
// =============================================================================

/// 64-bit Mach-O magic (native byte order)
pub const MH_MAGIC_64: u32 = 0xFEEDFACF;

/// 64-bit Mach-O magic (foreign byte order)
pub const MH_CIGAM_64: u32 = 0xCFFAEDFE;

/// 32-bit Mach-O magic (native byte order)
pub const MH_MAGIC: u32 = 0xFEEDFACE;

/// 32-bit Mach-O magic (foreign byte order)
pub const MH_CIGAM: u32 = 0xCEFAEDFE;

/// Universal binary magic, as read big-endian
pub const FAT_MAGIC: u32 = 0xCAFEBABE;

/// Universal binary magic with a little-endian arch table
pub const FAT_CIGAM: u32 = 0xBEBAFECA;

// =============================================================================
// File Types
// =============================================================================

/// Relocatable object file
pub const MH_OBJECT: u32 = 0x1;
/// Demand paged executable
pub const MH_EXECUTE: u32 = 0x2;
/// Dynamically bound shared library
pub const MH_DYLIB: u32 = 0x6;
/// Dynamically bound bundle
pub const MH_BUNDLE: u32 = 0x8;

// =============================================================================
// CPU Types
// =============================================================================

/// 64-bit architecture flag
pub const CPU_ARCH_ABI64: u32 = 0x0100_0000;

/// x86 CPU type
pub const CPU_TYPE_X86: u32 = 7;
/// x86_64 CPU type
pub const CPU_TYPE_X86_64: u32 = CPU_TYPE_X86 | CPU_ARCH_ABI64;
/// ARM CPU type
pub const CPU_TYPE_ARM: u32 = 12;
/// ARM64 CPU type
pub const CPU_TYPE_ARM64: u32 = CPU_TYPE_ARM | CPU_ARCH_ABI64;
/// PowerPC CPU type
pub const CPU_TYPE_POWERPC: u32 = 18;
/// 64-bit PowerPC CPU type
pub const CPU_TYPE_POWERPC64: u32 = CPU_TYPE_POWERPC | CPU_ARCH_ABI64;

// =============================================================================
// CPU Subtypes
// =============================================================================

/// Capability bits carried in the high byte of a subtype
pub const CPU_SUBTYPE_MASK: u32 = 0xFF00_0000;

/// Any x86 processor
pub const CPU_SUBTYPE_X86_ALL: u32 = 3;
/// ARMv6
pub const CPU_SUBTYPE_ARM_V6: u32 = 6;
/// ARMv7
pub const CPU_SUBTYPE_ARM_V7: u32 = 9;
/// ARMv7s
pub const CPU_SUBTYPE_ARM_V7S: u32 = 11;

// =============================================================================
// Load Commands
// =============================================================================

/// Set on commands dyld must understand to load the image
pub const LC_REQ_DYLD: u32 = 0x8000_0000;

/// 32-bit segment
pub const LC_SEGMENT: u32 = 0x1;
/// Symbol and string tables
pub const LC_SYMTAB: u32 = 0x2;
/// Thread state
pub const LC_THREAD: u32 = 0x4;
/// Thread state with stack
pub const LC_UNIXTHREAD: u32 = 0x5;
/// Dynamic symbol table layout
pub const LC_DYSYMTAB: u32 = 0xB;
/// Linked dylib
pub const LC_LOAD_DYLIB: u32 = 0xC;
/// Install name of a dylib
pub const LC_ID_DYLIB: u32 = 0xD;
/// Dynamic linker path
pub const LC_LOAD_DYLINKER: u32 = 0xE;
/// Identifies a dynamic linker
pub const LC_ID_DYLINKER: u32 = 0xF;
/// Two-level namespace hints
pub const LC_TWOLEVEL_HINTS: u32 = 0x16;
/// Weakly linked dylib
pub const LC_LOAD_WEAK_DYLIB: u32 = 0x18 | LC_REQ_DYLD;
/// 64-bit segment
pub const LC_SEGMENT_64: u32 = 0x19;
/// UUID
pub const LC_UUID: u32 = 0x1B;
/// Run path search entry
pub const LC_RPATH: u32 = 0x1C | LC_REQ_DYLD;
/// Code signature blob
pub const LC_CODE_SIGNATURE: u32 = 0x1D;
/// Segment split info blob
pub const LC_SEGMENT_SPLIT_INFO: u32 = 0x1E;
/// Re-exported dylib
pub const LC_REEXPORT_DYLIB: u32 = 0x1F | LC_REQ_DYLD;
/// Lazily loaded dylib
pub const LC_LAZY_LOAD_DYLIB: u32 = 0x20;
/// Encrypted range (32-bit)
pub const LC_ENCRYPTION_INFO: u32 = 0x21;
/// Compressed dyld info
pub const LC_DYLD_INFO: u32 = 0x22;
/// Compressed dyld info, no classic tables needed
pub const LC_DYLD_INFO_ONLY: u32 = 0x22 | LC_REQ_DYLD;
/// Upward linked dylib
pub const LC_LOAD_UPWARD_DYLIB: u32 = 0x23 | LC_REQ_DYLD;
/// macOS minimum version
pub const LC_VERSION_MIN_MACOSX: u32 = 0x24;
/// iOS minimum version
pub const LC_VERSION_MIN_IPHONEOS: u32 = 0x25;
/// Function starts blob
pub const LC_FUNCTION_STARTS: u32 = 0x26;
/// dyld environment string
pub const LC_DYLD_ENVIRONMENT: u32 = 0x27;
/// Entry point offset
pub const LC_MAIN: u32 = 0x28 | LC_REQ_DYLD;
/// Data-in-code table
pub const LC_DATA_IN_CODE: u32 = 0x29;
/// Source version of the build
pub const LC_SOURCE_VERSION: u32 = 0x2A;
/// Designated requirements of linked dylibs
pub const LC_DYLIB_CODE_SIGN_DRS: u32 = 0x2B;
/// Encrypted range (64-bit)
pub const LC_ENCRYPTION_INFO_64: u32 = 0x2C;
/// Linker optimization hints
pub const LC_LINKER_OPTIMIZATION_HINT: u32 = 0x2E;
/// tvOS minimum version
pub const LC_VERSION_MIN_TVOS: u32 = 0x2F;
/// watchOS minimum version
pub const LC_VERSION_MIN_WATCHOS: u32 = 0x30;
/// Platform, minimum OS and SDK
pub const LC_BUILD_VERSION: u32 = 0x32;
/// Export trie blob
pub const LC_DYLD_EXPORTS_TRIE: u32 = 0x33 | LC_REQ_DYLD;
/// Chained fixups blob
pub const LC_DYLD_CHAINED_FIXUPS: u32 = 0x34 | LC_REQ_DYLD;

// =============================================================================
// Symbol Types
// =============================================================================

/// Any of these bits marks a debugger entry
pub const N_STAB: u8 = 0xE0;
/// External symbol bit
pub const N_EXT: u8 = 0x01;
/// Defined in section `n_sect`
pub const N_SECT: u8 = 0xE;
/// Undefined symbol
pub const N_UNDF: u8 = 0x0;

// =============================================================================
// Indirect Symbol Table
// =============================================================================

/// Local symbol sentinel
pub const INDIRECT_SYMBOL_LOCAL: u32 = 0x8000_0000;
/// Absolute symbol sentinel
pub const INDIRECT_SYMBOL_ABS: u32 = 0x4000_0000;

// =============================================================================
// Relocations
// =============================================================================

/// High bit of `r_address` marks a scattered relocation
pub const R_SCATTERED: u32 = 0x8000_0000;

// =============================================================================
// Header Flags
// =============================================================================

bitflags! {
    /// Header flags shown by `info`; the engine never changes them.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MachOFlags: u32 {
        /// No undefined references
        const NOUNDEFS = 0x1;
        /// Linked for dyld
        const DYLDLINK = 0x4;
        /// Two-level namespace
        const TWOLEVEL = 0x80;
        /// Position independent executable
        const PIE = 0x200000;
        /// Non-executable heap
        const NO_HEAP_EXECUTION = 0x1000000;
    }
}

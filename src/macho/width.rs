//! 32-bit and 64-bit record shapes.
//!
//! Segments, sections and symbols differ between the two widths only in the
//! size of their address fields. The [`AddressWidth`] trait decodes both
//! shapes into one in-memory form with 64-bit fields and encodes them back,
//! refusing values that no longer fit a 32-bit image.

use std::fmt;

use super::constants::*;
use super::endian::{self, Endian};
use super::structs::*;
use crate::util::fixed_name;

// =============================================================================
// Width-independent Records
// =============================================================================

/// A section of either width.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
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
    /// Flags
    pub flags: u32,
    /// Reserved
    pub reserved1: u32,
    /// Reserved
    pub reserved2: u32,
    /// Reserved (64-bit only)
    pub reserved3: u32,
}

impl Section {
    /// Returns the section name.
    pub fn name(&self) -> &str {
        fixed_name(&self.sectname)
    }

    /// Returns the segment name recorded in the section.
    pub fn segment_name(&self) -> &str {
        fixed_name(&self.segname)
    }
}

/// A segment command of either width, with its sections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
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
    /// Flags
    pub flags: u32,
    /// Sections, in command order
    pub sections: Vec<Section>,
}

impl Segment {
    /// Returns the segment name.
    pub fn name(&self) -> &str {
        fixed_name(&self.segname)
    }

    /// Returns a section by name.
    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name() == name)
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Segment {{ name: \"{}\", vm: {:#x}+{:#x}, file: {:#x}+{:#x}, sects: {} }}",
            self.name(),
            self.vmaddr,
            self.vmsize,
            self.fileoff,
            self.filesize,
            self.sections.len()
        )
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Section {{ name: \"{},{}\", addr: {:#x}+{:#x}, offset: {:#x} }}",
            self.segment_name(),
            self.name(),
            self.addr,
            self.size,
            self.offset
        )
    }
}

/// A symbol table entry of either width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Symbol {
    /// Index into the string table
    pub n_strx: u32,
    /// Type flag
    pub n_type: u8,
    /// Section number
    pub n_sect: u8,
    /// Description
    pub n_desc: u16,
    /// Value
    pub n_value: u64,
}

impl Symbol {
    /// Returns true for debugger-only (N_STAB) entries.
    #[inline]
    pub fn is_debug(&self) -> bool {
        self.n_type & N_STAB != 0
    }
}

// =============================================================================
// Address Width
// =============================================================================

/// Record shapes for one address width.
pub trait AddressWidth {
    /// The segment load command for this width.
    const SEGMENT_COMMAND: u32;
    /// Size of the Mach-O header.
    const HEADER_SIZE: usize;
    /// Size of a segment command without sections.
    const SEGMENT_SIZE: usize;
    /// Size of a section record.
    const SECTION_SIZE: usize;
    /// Size of a symbol table entry.
    const NLIST_SIZE: usize;
    /// Size of a pointer.
    const POINTER_SIZE: usize;

    /// Decodes a segment command and its sections from the full command bytes.
    fn decode_segment(command: &[u8], endian: Endian) -> Option<Segment>;

    /// Encodes a segment over the full command bytes.
    ///
    /// Returns `None` if the sections do not fit or a value overflows the width.
    fn encode_segment(segment: &Segment, command: &mut [u8], endian: Endian) -> Option<()>;

    /// Decodes the symbol at `offset`.
    fn decode_symbol(data: &[u8], offset: usize, endian: Endian) -> Option<Symbol>;

    /// Appends a symbol; `None` if the value overflows the width.
    fn encode_symbol(symbol: &Symbol, out: &mut Vec<u8>, endian: Endian) -> Option<()>;
}

/// 32-bit images.
#[derive(Debug, Clone, Copy)]
pub struct Mach32;

/// 64-bit images.
#[derive(Debug, Clone, Copy)]
pub struct Mach64;

impl AddressWidth for Mach32 {
    const SEGMENT_COMMAND: u32 = LC_SEGMENT;
    const HEADER_SIZE: usize = MachHeader::SIZE;
    const SEGMENT_SIZE: usize = SegmentCommand32::SIZE;
    const SECTION_SIZE: usize = Section32::SIZE;
    const NLIST_SIZE: usize = Nlist32::SIZE;
    const POINTER_SIZE: usize = 4;

    fn decode_segment(command: &[u8], endian: Endian) -> Option<Segment> {
        let seg: SegmentCommand32 = endian::read(command, 0, endian)?;
        let mut sections = Vec::with_capacity(sections_capacity::<Self>(command, seg.nsects)?);
        for i in 0..seg.nsects as usize {
            let s: Section32 = endian::read(command, Self::SEGMENT_SIZE + i * Self::SECTION_SIZE, endian)?;
            sections.push(Section {
                sectname: s.sectname,
                segname: s.segname,
                addr: u64::from(s.addr),
                size: u64::from(s.size),
                offset: s.offset,
                align: s.align,
                reloff: s.reloff,
                nreloc: s.nreloc,
                flags: s.flags,
                reserved1: s.reserved1,
                reserved2: s.reserved2,
                reserved3: 0,
            });
        }
        Some(Segment {
            segname: seg.segname,
            vmaddr: u64::from(seg.vmaddr),
            vmsize: u64::from(seg.vmsize),
            fileoff: u64::from(seg.fileoff),
            filesize: u64::from(seg.filesize),
            maxprot: seg.maxprot,
            initprot: seg.initprot,
            flags: seg.flags,
            sections,
        })
    }

    fn encode_segment(segment: &Segment, command: &mut [u8], endian: Endian) -> Option<()> {
        let seg = SegmentCommand32 {
            cmd: Self::SEGMENT_COMMAND,
            cmdsize: u32::try_from(command.len()).ok()?,
            segname: segment.segname,
            vmaddr: u32::try_from(segment.vmaddr).ok()?,
            vmsize: u32::try_from(segment.vmsize).ok()?,
            fileoff: u32::try_from(segment.fileoff).ok()?,
            filesize: u32::try_from(segment.filesize).ok()?,
            maxprot: segment.maxprot,
            initprot: segment.initprot,
            nsects: u32::try_from(segment.sections.len()).ok()?,
            flags: segment.flags,
        };
        endian::write(command, 0, &seg, endian)?;
        for (i, s) in segment.sections.iter().enumerate() {
            let section = Section32 {
                sectname: s.sectname,
                segname: s.segname,
                addr: u32::try_from(s.addr).ok()?,
                size: u32::try_from(s.size).ok()?,
                offset: s.offset,
                align: s.align,
                reloff: s.reloff,
                nreloc: s.nreloc,
                flags: s.flags,
                reserved1: s.reserved1,
                reserved2: s.reserved2,
            };
            endian::write(command, Self::SEGMENT_SIZE + i * Self::SECTION_SIZE, &section, endian)?;
        }
        Some(())
    }

    fn decode_symbol(data: &[u8], offset: usize, endian: Endian) -> Option<Symbol> {
        let n: Nlist32 = endian::read(data, offset, endian)?;
        Some(Symbol {
            n_strx: n.n_strx,
            n_type: n.n_type,
            n_sect: n.n_sect,
            n_desc: n.n_desc,
            n_value: u64::from(n.n_value),
        })
    }

    fn encode_symbol(symbol: &Symbol, out: &mut Vec<u8>, endian: Endian) -> Option<()> {
        let n = Nlist32 {
            n_strx: symbol.n_strx,
            n_type: symbol.n_type,
            n_sect: symbol.n_sect,
            n_desc: symbol.n_desc,
            n_value: u32::try_from(symbol.n_value).ok()?,
        };
        endian::push(out, &n, endian);
        Some(())
    }
}

impl AddressWidth for Mach64 {
    const SEGMENT_COMMAND: u32 = LC_SEGMENT_64;
    const HEADER_SIZE: usize = MachHeader::SIZE + 4;
    const SEGMENT_SIZE: usize = SegmentCommand64::SIZE;
    const SECTION_SIZE: usize = Section64::SIZE;
    const NLIST_SIZE: usize = Nlist64::SIZE;
    const POINTER_SIZE: usize = 8;

    fn decode_segment(command: &[u8], endian: Endian) -> Option<Segment> {
        let seg: SegmentCommand64 = endian::read(command, 0, endian)?;
        let mut sections = Vec::with_capacity(sections_capacity::<Self>(command, seg.nsects)?);
        for i in 0..seg.nsects as usize {
            let s: Section64 = endian::read(command, Self::SEGMENT_SIZE + i * Self::SECTION_SIZE, endian)?;
            sections.push(Section {
                sectname: s.sectname,
                segname: s.segname,
                addr: s.addr,
                size: s.size,
                offset: s.offset,
                align: s.align,
                reloff: s.reloff,
                nreloc: s.nreloc,
                flags: s.flags,
                reserved1: s.reserved1,
                reserved2: s.reserved2,
                reserved3: s.reserved3,
            });
        }
        Some(Segment {
            segname: seg.segname,
            vmaddr: seg.vmaddr,
            vmsize: seg.vmsize,
            fileoff: seg.fileoff,
            filesize: seg.filesize,
            maxprot: seg.maxprot,
            initprot: seg.initprot,
            flags: seg.flags,
            sections,
        })
    }

    fn encode_segment(segment: &Segment, command: &mut [u8], endian: Endian) -> Option<()> {
        let seg = SegmentCommand64 {
            cmd: Self::SEGMENT_COMMAND,
            cmdsize: u32::try_from(command.len()).ok()?,
            segname: segment.segname,
            vmaddr: segment.vmaddr,
            vmsize: segment.vmsize,
            fileoff: segment.fileoff,
            filesize: segment.filesize,
            maxprot: segment.maxprot,
            initprot: segment.initprot,
            nsects: u32::try_from(segment.sections.len()).ok()?,
            flags: segment.flags,
        };
        endian::write(command, 0, &seg, endian)?;
        for (i, s) in segment.sections.iter().enumerate() {
            let section = Section64 {
                sectname: s.sectname,
                segname: s.segname,
                addr: s.addr,
                size: s.size,
                offset: s.offset,
                align: s.align,
                reloff: s.reloff,
                nreloc: s.nreloc,
                flags: s.flags,
                reserved1: s.reserved1,
                reserved2: s.reserved2,
                reserved3: s.reserved3,
            };
            endian::write(command, Self::SEGMENT_SIZE + i * Self::SECTION_SIZE, &section, endian)?;
        }
        Some(())
    }

    fn decode_symbol(data: &[u8], offset: usize, endian: Endian) -> Option<Symbol> {
        let n: Nlist64 = endian::read(data, offset, endian)?;
        Some(Symbol {
            n_strx: n.n_strx,
            n_type: n.n_type,
            n_sect: n.n_sect,
            n_desc: n.n_desc,
            n_value: n.n_value,
        })
    }

    fn encode_symbol(symbol: &Symbol, out: &mut Vec<u8>, endian: Endian) -> Option<()> {
        let n = Nlist64 {
            n_strx: symbol.n_strx,
            n_type: symbol.n_type,
            n_sect: symbol.n_sect,
            n_desc: symbol.n_desc,
            n_value: symbol.n_value,
        };
        endian::push(out, &n, endian);
        Some(())
    }
}

/// Checks that `nsects` sections fit in the command before allocating.
fn sections_capacity<W: AddressWidth>(command: &[u8], nsects: u32) -> Option<usize> {
    let nsects = nsects as usize;
    let needed = nsects.checked_mul(W::SECTION_SIZE)?.checked_add(W::SEGMENT_SIZE)?;
    (needed <= command.len()).then_some(nsects)
}

// =============================================================================
// Runtime Width Selector
// =============================================================================

/// The width of a parsed image, chosen once from its magic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
    /// MH_MAGIC images
    Bits32,
    /// MH_MAGIC_64 images
    Bits64,
}

impl Width {
    /// Size of the Mach-O header.
    pub fn header_size(self) -> usize {
        match self {
            Width::Bits32 => Mach32::HEADER_SIZE,
            Width::Bits64 => Mach64::HEADER_SIZE,
        }
    }
}

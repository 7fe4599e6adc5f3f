//! Symbol table dieter.
//!
//! Strips debugger symbols (`N_STAB` entries) from executables and rebuilds
//! `__LINKEDIT` around the smaller symbol and string tables:
//!
//! ```text
//! [dyld info, linkedit data]  locrel  symbols  extrel  indirect  strings  [signature]
//! ```
//!
//! Every symbol index stored elsewhere in the image (relocations, indirect
//! symbols, dysymtab groups) is rewritten through the old-to-new index map.

use std::collections::HashMap;
use std::path::PathBuf;

use bitflags::bitflags;
use tracing::{debug, info};

use crate::deploy::compose::{compose, SingleSlice};
use crate::deploy::layout::LINKEDIT_SEGMENT;
use crate::error::{Error, Result};
use crate::macho::endian::{self, Endian};
use crate::macho::*;
use crate::output::{map_input, write_output};
use crate::util::{cstr_at, pad_to};

bitflags! {
    /// CPU types kept by a diet; slices of any other type are dropped.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DietArchitectures: u32 {
        /// 32-bit Intel
        const X86 = 1 << 0;
        /// 64-bit Intel
        const X86_64 = 1 << 1;
        /// 32-bit ARM
        const ARM = 1 << 2;
        /// 64-bit ARM
        const ARM64 = 1 << 3;
        /// 32-bit PowerPC
        const PPC = 1 << 4;
        /// 64-bit PowerPC
        const PPC64 = 1 << 5;
    }
}

impl Default for DietArchitectures {
    fn default() -> Self {
        Self::all()
    }
}

impl DietArchitectures {
    /// The flag for a CPU type; empty for unsupported types.
    pub fn from_cputype(cputype: u32) -> Self {
        match cputype {
            CPU_TYPE_X86 => Self::X86,
            CPU_TYPE_X86_64 => Self::X86_64,
            CPU_TYPE_ARM => Self::ARM,
            CPU_TYPE_ARM64 => Self::ARM64,
            CPU_TYPE_POWERPC => Self::PPC,
            CPU_TYPE_POWERPC64 => Self::PPC64,
            _ => Self::empty(),
        }
    }

    /// Returns true if slices of `cputype` are kept.
    pub fn keeps(self, cputype: u32) -> bool {
        let flag = Self::from_cputype(cputype);
        !flag.is_empty() && self.contains(flag)
    }
}

/// Parameters of a diet.
#[derive(Debug, Clone, Default)]
pub struct DietParameters {
    /// Executable to strip
    pub input: PathBuf,
    /// Where to write the result
    pub output: PathBuf,
    /// Architectures to keep
    pub keep: DietArchitectures,
}

/// Strips the file named by `params` and writes the result.
pub fn diet(params: &DietParameters) -> Result<()> {
    let input = map_input(&params.input)?;
    let data = diet_bytes(&input, params.keep)?;
    write_output(&params.output, &data, true)?;
    info!(
        "Wrote {} ({} -> {} bytes)",
        params.output.display(),
        input.len(),
        data.len()
    );
    Ok(())
}

/// Strips an in-memory executable, thin or universal.
///
/// A universal input reduced to one slice is written thin.
pub fn diet_bytes(input: &[u8], keep: DietArchitectures) -> Result<Vec<u8>> {
    compose(
        input,
        SingleSlice::Thin,
        |cputype, _| keep.keeps(cputype),
        diet_slice,
    )
}

/// Strips one single-architecture image.
pub fn diet_slice(input: &[u8]) -> Result<Vec<u8>> {
    let image = MachImage::parse(input)?;
    match image.width {
        Width::Bits32 => diet_image::<Mach32>(input, image),
        Width::Bits64 => diet_image::<Mach64>(input, image),
    }
}

// =============================================================================
// String Table
// =============================================================================

/// Deduplicating string table builder.
#[derive(Debug)]
struct StringTable {
    /// Map from name to offset in `data`
    offsets: HashMap<Vec<u8>, u32>,
    data: Vec<u8>,
}

impl StringTable {
    /// Starts a table with four empty-string slots.
    fn new() -> Self {
        Self {
            offsets: HashMap::new(),
            data: vec![0; 4],
        }
    }

    /// Adds a name and returns its offset; the empty name is offset 0.
    fn add(&mut self, name: &[u8]) -> u32 {
        if name.is_empty() {
            return 0;
        }
        if let Some(&offset) = self.offsets.get(name) {
            return offset;
        }

        let offset = self.data.len() as u32;
        self.data.extend_from_slice(name);
        self.data.push(0);
        self.offsets.insert(name.to_vec(), offset);
        offset
    }

    /// Closes the table with a trailing empty slot.
    fn finish(mut self) -> Vec<u8> {
        self.data.push(0);
        self.data
    }
}

// =============================================================================
// Symbol Map
// =============================================================================

/// Old symbol index to new symbol index.
#[derive(Debug)]
struct SymbolMap {
    new_index: Vec<Option<u32>>,
}

impl SymbolMap {
    fn lookup(&self, old: u32, offset: usize) -> Result<u32> {
        self.new_index
            .get(old as usize)
            .copied()
            .flatten()
            .ok_or_else(|| Error::bad_file(offset, format!("reference to stripped or missing symbol {old}")))
    }

    /// Number of surviving symbols whose old index is below `old`.
    fn survivors_before(&self, old: u32) -> Result<u32> {
        let head = self
            .new_index
            .get(..old as usize)
            .ok_or_else(|| Error::bad_file(0, format!("symbol group boundary {old} past the symbol table")))?;
        Ok(head.iter().flatten().count() as u32)
    }

    /// Maps a dysymtab group `(start, count)`.
    fn group(&self, start: u32, count: u32) -> Result<(u32, u32)> {
        let end = start
            .checked_add(count)
            .ok_or_else(|| Error::bad_file(0, "symbol group overflows"))?;
        let new_start = self.survivors_before(start)?;
        Ok((new_start, self.survivors_before(end)? - new_start))
    }

    /// Rewrites the symbol numbers of extern, non-scattered relocations.
    fn remap_relocations(&self, data: &mut [u8], endian: Endian, offset: usize) -> Result<()> {
        for at in (0..data.len()).step_by(RelocationInfo::SIZE) {
            let mut reloc: RelocationInfo = endian::read(data, at, endian)
                .ok_or_else(|| Error::bad_file(offset + at, "truncated relocation entry"))?;
            if reloc.is_scattered() || !reloc.is_extern(endian) {
                continue;
            }
            let symbol = self.lookup(reloc.symbol_number(endian), offset + at)?;
            reloc.set_symbol_number(endian, symbol);
            endian::write(data, at, &reloc, endian)
                .ok_or_else(|| Error::bad_file(offset + at, "truncated relocation entry"))?;
        }
        Ok(())
    }
}

// =============================================================================
// Diet
// =============================================================================

fn diet_image<W: AddressWidth>(input: &[u8], mut image: MachImage) -> Result<Vec<u8>> {
    let endian = image.endian;
    let (symtab_index, symtab) = image
        .symtab()
        .map(|(i, c)| (i, *c))
        .ok_or(Error::CannotDiet {
            reason: "no symbol table",
        })?;
    let (dysymtab_index, dysymtab) = image
        .dysymtab()
        .map(|(i, c)| (i, *c))
        .ok_or(Error::CannotDiet {
            reason: "no dynamic symbol table",
        })?;
    if dysymtab.ntoc != 0 {
        return Err(Error::CannotDiet {
            reason: "image has a table of contents",
        });
    }
    if dysymtab.nmodtab != 0 {
        return Err(Error::CannotDiet {
            reason: "image has a module table",
        });
    }
    if dysymtab.nextrefsyms != 0 {
        return Err(Error::CannotDiet {
            reason: "image has a reference symbol table",
        });
    }

    let (linkedit_index, linkedit) = image
        .find_segment(LINKEDIT_SEGMENT)
        .map(|(i, s)| (i, s.clone()))
        .ok_or(Error::NoLinkEditSegment)?;
    let trailing = image
        .segments()
        .any(|(i, s)| i != linkedit_index && s.filesize != 0 && s.fileoff > linkedit.fileoff);
    if trailing {
        return Err(Error::BadSegmentOrder {
            reason: "a segment follows __LINKEDIT",
        });
    }
    let base = linkedit.fileoff;
    if base > input.len() as u64 {
        return Err(Error::bad_file(base as usize, "__LINKEDIT starts past the end of the image"));
    }
    let pointer = W::POINTER_SIZE as u64;

    // Symbols and names
    let symbol_data = table(input, "symbol table", symtab.symoff, symtab.nsyms, W::NLIST_SIZE)?;
    let names = table(input, "string table", symtab.stroff, symtab.strsize, 1)?;
    let mut strings = StringTable::new();
    let mut map = SymbolMap {
        new_index: vec![None; symtab.nsyms as usize],
    };
    let mut kept = Vec::new();
    for index in 0..symtab.nsyms as usize {
        let at = symtab.symoff as usize + index * W::NLIST_SIZE;
        let mut symbol = W::decode_symbol(symbol_data, index * W::NLIST_SIZE, endian)
            .ok_or_else(|| Error::bad_file(at, "truncated symbol"))?;
        if symbol.is_debug() {
            continue;
        }
        let name = match symbol.n_strx {
            0 => &[][..],
            strx => cstr_at(names, strx as usize).ok_or_else(|| {
                Error::bad_file(at, format!("symbol name {strx:#x} outside the string table"))
            })?,
        };
        symbol.n_strx = strings.add(name);
        map.new_index[index] = Some(kept.len() as u32);
        kept.push(symbol);
    }
    let strings = strings.finish();
    let stripped = symtab.nsyms as usize - kept.len();
    debug!("Keeping {} of {} symbols", kept.len(), symtab.nsyms);

    // Blobs that precede the symbol tables
    let mut linkedit_data = Vec::new();
    let mut signature = None;
    for command in &mut image.commands {
        let cmd = command.cmd;
        let offset = command.offset;
        match &mut command.kind {
            CommandKind::DyldInfo(c) => {
                let streams = c.streams();
                for (field, (stream, size)) in c.offsets_mut().into_iter().zip(streams) {
                    *field = copy_blob(input, &mut linkedit_data, base, pointer, "dyld info", stream, size)?;
                }
            }
            CommandKind::LinkeditData(c) if cmd == LC_CODE_SIGNATURE => signature = Some(*c),
            CommandKind::LinkeditData(c) => {
                c.dataoff = copy_blob(input, &mut linkedit_data, base, pointer, "linkedit data", c.dataoff, c.datasize)?;
            }
            CommandKind::TwolevelHints(c) => {
                let size = c
                    .nhints
                    .checked_mul(TwolevelHintsCommand::HINT_SIZE as u32)
                    .ok_or_else(|| Error::bad_command(offset, "hint count overflows"))?;
                c.offset = copy_blob(input, &mut linkedit_data, base, pointer, "two-level hints", c.offset, size)?;
            }
            _ => {}
        }
    }

    // Local relocations
    let locrel = table(input, "local relocations", dysymtab.locreloff, dysymtab.nlocrel, RelocationInfo::SIZE)?;
    let locreloff = table_offset(base, &linkedit_data, locrel)?;
    let start = linkedit_data.len();
    linkedit_data.extend_from_slice(locrel);
    map.remap_relocations(&mut linkedit_data[start..], endian, dysymtab.locreloff as usize)?;

    // Symbol table
    pad_to(&mut linkedit_data, pointer);
    let symoff = if kept.is_empty() { 0 } else { file_offset(base, linkedit_data.len())? };
    for symbol in &kept {
        W::encode_symbol(symbol, &mut linkedit_data, endian)
            .ok_or_else(|| Error::bad_file(symoff as usize, "symbol value does not fit the image width"))?;
    }

    // External relocations
    let extrel = table(input, "external relocations", dysymtab.extreloff, dysymtab.nextrel, RelocationInfo::SIZE)?;
    let extreloff = table_offset(base, &linkedit_data, extrel)?;
    let start = linkedit_data.len();
    linkedit_data.extend_from_slice(extrel);
    map.remap_relocations(&mut linkedit_data[start..], endian, dysymtab.extreloff as usize)?;

    // Indirect symbols
    let indirect = table(input, "indirect symbols", dysymtab.indirectsymoff, dysymtab.nindirectsyms, 4)?;
    let indirectsymoff = table_offset(base, &linkedit_data, indirect)?;
    for (i, entry) in indirect.chunks_exact(4).enumerate() {
        let at = dysymtab.indirectsymoff as usize + i * 4;
        let mut value = endian
            .read_u32(entry, 0)
            .ok_or_else(|| Error::bad_file(at, "truncated indirect symbol"))?;
        if value & (INDIRECT_SYMBOL_LOCAL | INDIRECT_SYMBOL_ABS) == 0 {
            value = map.lookup(value, at)?;
        }
        let mut word = [0u8; 4];
        endian.write_u32(&mut word, 0, value);
        linkedit_data.extend_from_slice(&word);
    }

    // Strings
    pad_to(&mut linkedit_data, pointer);
    let stroff = file_offset(base, linkedit_data.len())?;
    linkedit_data.extend_from_slice(&strings);
    pad_to(&mut linkedit_data, pointer);
    let strsize = file_offset(base, linkedit_data.len())? - stroff;

    let signature_offset = match signature {
        Some(c) if c.dataoff != 0 && c.datasize != 0 => {
            copy_blob(input, &mut linkedit_data, base, 16, "code signature", c.dataoff, c.datasize)?
        }
        _ => 0,
    };

    let new_len = base as usize + linkedit_data.len();
    if new_len > input.len() {
        info!(
            "Rebuilt __LINKEDIT would grow the {} slice; leaving it unchanged",
            image.architecture()
        );
        return Ok(input.to_vec());
    }

    // Load commands
    for command in &mut image.commands {
        if let CommandKind::LinkeditData(c) = &mut command.kind {
            if c.cmd == LC_CODE_SIGNATURE {
                c.dataoff = signature_offset;
            }
        }
    }
    if let CommandKind::Symtab(c) = &mut image.commands[symtab_index].kind {
        c.symoff = symoff;
        c.nsyms = kept.len() as u32;
        c.stroff = stroff;
        c.strsize = strsize;
    }
    let (ilocalsym, nlocalsym) = map.group(dysymtab.ilocalsym, dysymtab.nlocalsym)?;
    let (iextdefsym, nextdefsym) = map.group(dysymtab.iextdefsym, dysymtab.nextdefsym)?;
    let (iundefsym, nundefsym) = map.group(dysymtab.iundefsym, dysymtab.nundefsym)?;
    if let CommandKind::Dysymtab(c) = &mut image.commands[dysymtab_index].kind {
        c.ilocalsym = ilocalsym;
        c.nlocalsym = nlocalsym;
        c.iextdefsym = iextdefsym;
        c.nextdefsym = nextdefsym;
        c.iundefsym = iundefsym;
        c.nundefsym = nundefsym;
        c.locreloff = locreloff;
        c.extreloff = extreloff;
        c.indirectsymoff = indirectsymoff;
    }
    if let Some(segment) = image.commands[linkedit_index].segment_mut() {
        segment.filesize = linkedit_data.len() as u64;
        segment.vmsize = linkedit_data.len() as u64;
    }

    let mut out = input[..base as usize].to_vec();
    remap_section_relocations(&image, &map, &mut out)?;
    out.extend_from_slice(&linkedit_data);
    image.overlay(&mut out)?;

    info!(
        "Stripped {} debug symbols from {} slice: {} -> {} bytes",
        stripped,
        image.architecture(),
        input.len(),
        out.len()
    );
    Ok(out)
}

/// Rewrites the relocation entries attached to sections.
///
/// They live before `__LINKEDIT`, so they are patched in place in `out`.
fn remap_section_relocations(image: &MachImage, map: &SymbolMap, out: &mut [u8]) -> Result<()> {
    for (_, segment) in image.segments() {
        for section in &segment.sections {
            if section.nreloc == 0 || section.reloff == 0 {
                continue;
            }
            let start = section.reloff as usize;
            let end = section.nreloc as usize * RelocationInfo::SIZE + start;
            let entries = out.get_mut(start..end).ok_or_else(|| {
                Error::bad_file(start, format!("relocations of {} lie outside the image prefix", section.name()))
            })?;
            map.remap_relocations(entries, image.endian, start)?;
        }
    }
    Ok(())
}

/// Returns `count` entries of `entry_size` bytes at `offset`.
fn table<'a>(input: &'a [u8], field: &'static str, offset: u32, count: u32, entry_size: usize) -> Result<&'a [u8]> {
    if count == 0 {
        return Ok(&[]);
    }
    let needed = u64::from(count) * entry_size as u64;
    let available = (input.len() as u64).saturating_sub(u64::from(offset));
    if needed > available {
        return Err(Error::no_memory(field, needed, available));
    }
    let start = offset as usize;
    Ok(&input[start..start + needed as usize])
}

/// Appends a blob, returning its new file offset; absent blobs stay at 0.
fn copy_blob(
    input: &[u8],
    out: &mut Vec<u8>,
    base: u64,
    alignment: u64,
    field: &'static str,
    offset: u32,
    size: u32,
) -> Result<u32> {
    if offset == 0 || size == 0 {
        return Ok(0);
    }
    let data = table(input, field, offset, size, 1)?;
    pad_to(out, alignment);
    let new_offset = file_offset(base, out.len())?;
    out.extend_from_slice(data);
    Ok(new_offset)
}

/// The offset a table about to be appended will have, or 0 if it is empty.
fn table_offset(base: u64, out: &[u8], table: &[u8]) -> Result<u32> {
    if table.is_empty() {
        Ok(0)
    } else {
        file_offset(base, out.len())
    }
}

fn file_offset(base: u64, position: usize) -> Result<u32> {
    u32::try_from(base + position as u64)
        .map_err(|_| Error::bad_file(base as usize, "__LINKEDIT exceeds 32-bit file offsets"))
}

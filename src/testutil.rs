//! Synthetic Mach-O engines for unit tests.
//!
//! The builder lays out a small but complete executable:
//!
//! ```text
//! 0x0000  header + load commands
//! 0x0700  one relocation entry for __TEXT,__text
//! 0x0800  __TEXT,__text
//! 0x1000  middle segments (__PAYLOAD, __PROJECT, __MISC, ...)
//!         __LINKEDIT: [dyld info] function starts, local relocs, symbols,
//!                     external relocs, indirect symbols, strings, [signature]
//! ```

use crate::macho::endian::{self, Endian};
use crate::macho::*;
use crate::util::{align_up, pad_to, to_fixed_name};

pub const COCOA: &str = "/System/Library/Frameworks/Cocoa.framework/Versions/A/Cocoa";
pub const UIKIT: &str = "/System/Library/Frameworks/UIKit.framework/UIKit";
pub const TEST_UUID: [u8; 16] = [
    0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF, 0x00,
];

/// Offset of the relocation entry belonging to __TEXT,__text.
pub const TEXT_RELOC_OFFSET: usize = 0x700;

/// Symbol group in the dynamic symbol table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Group {
    Local,
    Defined,
    Undefined,
}

#[derive(Debug, Clone)]
pub struct TestSymbol {
    pub name: &'static str,
    pub n_type: u8,
    pub group: Group,
}

fn symbol(name: &'static str, n_type: u8, group: Group) -> TestSymbol {
    TestSymbol { name, n_type, group }
}

/// Default symbols: three stabs among the locals, one of which shares a
/// name with a surviving symbol.
pub fn default_symbols() -> Vec<TestSymbol> {
    vec![
        symbol("/tmp/main.c", 0x64, Group::Local),
        symbol("_helper", N_SECT, Group::Local),
        symbol("_main", 0x24, Group::Local),
        symbol("_helper", 0x26, Group::Local),
        symbol("_main", N_SECT | N_EXT, Group::Defined),
        symbol("_printf", N_UNDF | N_EXT, Group::Undefined),
        symbol("_exit", N_UNDF | N_EXT, Group::Undefined),
    ]
}

#[derive(Debug, Clone)]
pub struct EngineBuilder {
    bits64: bool,
    endian: Endian,
    cputype: u32,
    cpusubtype: u32,
    filetype: u32,
    dylib: &'static str,
    middle: Vec<&'static str>,
    project_contents: Vec<u8>,
    segment_after_linkedit: bool,
    version_min: Option<u32>,
    build_version: bool,
    dyld_info: bool,
    code_signature: bool,
    symtab: bool,
    toc: bool,
    symbols: Vec<TestSymbol>,
    extrel: Vec<(u32, u32)>,
    indirect: Vec<u32>,
    raw_commands: Vec<(u32, usize)>,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineBuilder {
    /// A 64-bit little-endian x86_64 desktop engine with an empty __PROJECT.
    pub fn new() -> Self {
        Self {
            bits64: true,
            endian: Endian::Little,
            cputype: CPU_TYPE_X86_64,
            cpusubtype: CPU_SUBTYPE_X86_ALL,
            filetype: MH_EXECUTE,
            dylib: COCOA,
            middle: vec!["__PROJECT"],
            project_contents: Vec::new(),
            segment_after_linkedit: false,
            version_min: Some(LC_VERSION_MIN_MACOSX),
            build_version: false,
            dyld_info: false,
            code_signature: true,
            symtab: true,
            toc: false,
            symbols: default_symbols(),
            extrel: vec![(0x10, 5), (0x18, 6)],
            indirect: vec![
                5,
                6,
                INDIRECT_SYMBOL_LOCAL,
                INDIRECT_SYMBOL_LOCAL | INDIRECT_SYMBOL_ABS,
            ],
            raw_commands: Vec::new(),
        }
    }

    /// A 32-bit little-endian i386 desktop engine.
    pub fn i386() -> Self {
        Self::new().bits64(false).cpu(CPU_TYPE_X86, CPU_SUBTYPE_X86_ALL)
    }

    /// A 32-bit big-endian PowerPC desktop engine.
    pub fn ppc() -> Self {
        Self::new()
            .bits64(false)
            .endian(Endian::Big)
            .cpu(CPU_TYPE_POWERPC, 0)
    }

    /// A 64-bit ARM mobile engine.
    pub fn ios_arm64() -> Self {
        Self::new()
            .cpu(CPU_TYPE_ARM64, 0)
            .dylib(UIKIT)
            .version_min(Some(LC_VERSION_MIN_IPHONEOS))
    }

    /// A 32-bit ARMv7 mobile engine.
    pub fn ios_armv7() -> Self {
        Self::ios_arm64().bits64(false).cpu(CPU_TYPE_ARM, CPU_SUBTYPE_ARM_V7)
    }

    pub fn bits64(mut self, bits64: bool) -> Self {
        self.bits64 = bits64;
        self
    }

    pub fn endian(mut self, endian: Endian) -> Self {
        self.endian = endian;
        self
    }

    pub fn cpu(mut self, cputype: u32, cpusubtype: u32) -> Self {
        self.cputype = cputype;
        self.cpusubtype = cpusubtype;
        self
    }

    pub fn filetype(mut self, filetype: u32) -> Self {
        self.filetype = filetype;
        self
    }

    pub fn dylib(mut self, dylib: &'static str) -> Self {
        self.dylib = dylib;
        self
    }

    /// Segments placed between __TEXT and __LINKEDIT, in order.
    pub fn middle(mut self, names: &[&'static str]) -> Self {
        self.middle = names.to_vec();
        self
    }

    pub fn project_contents(mut self, contents: Vec<u8>) -> Self {
        self.project_contents = contents;
        self
    }

    pub fn segment_after_linkedit(mut self, yes: bool) -> Self {
        self.segment_after_linkedit = yes;
        self
    }

    pub fn version_min(mut self, cmd: Option<u32>) -> Self {
        self.version_min = cmd;
        self
    }

    pub fn build_version(mut self, yes: bool) -> Self {
        self.build_version = yes;
        self
    }

    pub fn dyld_info(mut self, yes: bool) -> Self {
        self.dyld_info = yes;
        self
    }

    pub fn code_signature(mut self, yes: bool) -> Self {
        self.code_signature = yes;
        self
    }

    pub fn symtab(mut self, yes: bool) -> Self {
        self.symtab = yes;
        self
    }

    pub fn toc(mut self, yes: bool) -> Self {
        self.toc = yes;
        self
    }

    pub fn symbols(mut self, symbols: Vec<TestSymbol>) -> Self {
        self.symbols = symbols;
        self
    }

    pub fn extrel(mut self, extrel: Vec<(u32, u32)>) -> Self {
        self.extrel = extrel;
        self
    }

    pub fn indirect(mut self, indirect: Vec<u32>) -> Self {
        self.indirect = indirect;
        self
    }

    /// Appends a zero-filled command of the given type after all others.
    pub fn raw_command(mut self, cmd: u32, cmdsize: usize) -> Self {
        self.raw_commands.push((cmd, cmdsize));
        self
    }

    fn base(&self) -> u64 {
        if self.bits64 {
            0x1_0000_0000
        } else {
            0x1000
        }
    }

    fn pointer_size(&self) -> u64 {
        if self.bits64 {
            8
        } else {
            4
        }
    }

    fn reloc_length(&self) -> u32 {
        if self.bits64 {
            3
        } else {
            2
        }
    }

    pub fn build(&self) -> Vec<u8> {
        let e = self.endian;
        let base = self.base();

        let mut middle = Vec::new();
        let mut cursor = 0x1000u64;
        for &name in &self.middle {
            let contents = match name {
                "__PROJECT" => self.project_contents.clone(),
                "__PAYLOAD" => Vec::new(),
                _ => vec![0x4D; 0x100],
            };
            let len = contents.len() as u64;
            middle.push((name, cursor, contents));
            cursor += len;
        }

        let linkedit_off = cursor;
        let (linkedit, tables) = self.linkedit(linkedit_off);

        let mut commands: Vec<Vec<u8>> = Vec::new();
        commands.push(self.segment_command(&segment("__PAGEZERO", 0, base, 0, 0, 0, Vec::new())));

        let mut text_section = section("__TEXT", "__text", base + 0x800, 0x100, 0x800);
        text_section.align = 4;
        text_section.reloff = TEXT_RELOC_OFFSET as u32;
        text_section.nreloc = 1;
        text_section.flags = 0x8000_0400;
        commands.push(self.segment_command(&segment(
            "__TEXT",
            base,
            0x1000,
            0,
            0x1000,
            5,
            vec![text_section],
        )));

        for (name, fileoff, contents) in &middle {
            let sectname = name.to_ascii_lowercase();
            let size = contents.len() as u64;
            commands.push(self.segment_command(&segment(
                name,
                base + fileoff,
                size,
                *fileoff,
                size,
                3,
                vec![section(name, &sectname, base + fileoff, size, *fileoff as u32)],
            )));
        }

        let linkedit_len = linkedit.len() as u64;
        commands.push(self.segment_command(&segment(
            "__LINKEDIT",
            base + linkedit_off,
            align_up(linkedit_len, 0x1000),
            linkedit_off,
            linkedit_len,
            1,
            Vec::new(),
        )));

        if self.segment_after_linkedit {
            let end = linkedit_off + linkedit_len;
            commands.push(self.segment_command(&segment("__EXTRA", base + end, 0, end, 0, 1, Vec::new())));
        }

        if self.dyld_info {
            commands.push(record(
                &DyldInfoCommand {
                    cmd: LC_DYLD_INFO_ONLY,
                    cmdsize: DyldInfoCommand::SIZE as u32,
                    rebase_off: tables.rebase.0,
                    rebase_size: tables.rebase.1,
                    bind_off: tables.bind.0,
                    bind_size: tables.bind.1,
                    weak_bind_off: 0,
                    weak_bind_size: 0,
                    lazy_bind_off: 0,
                    lazy_bind_size: 0,
                    export_off: 0,
                    export_size: 0,
                },
                e,
            ));
        }

        if self.symtab {
            commands.push(record(
                &SymtabCommand {
                    cmd: LC_SYMTAB,
                    cmdsize: SymtabCommand::SIZE as u32,
                    symoff: tables.symoff,
                    nsyms: self.symbols.len() as u32,
                    stroff: tables.stroff,
                    strsize: tables.strsize,
                },
                e,
            ));
            let count = |group| self.symbols.iter().filter(|s| s.group == group).count() as u32;
            let nlocalsym = count(Group::Local);
            let nextdefsym = count(Group::Defined);
            let nundefsym = count(Group::Undefined);
            commands.push(record(
                &DysymtabCommand {
                    cmd: LC_DYSYMTAB,
                    cmdsize: DysymtabCommand::SIZE as u32,
                    ilocalsym: 0,
                    nlocalsym,
                    iextdefsym: nlocalsym,
                    nextdefsym,
                    iundefsym: nlocalsym + nextdefsym,
                    nundefsym,
                    tocoff: if self.toc { tables.symoff } else { 0 },
                    ntoc: u32::from(self.toc),
                    modtaboff: 0,
                    nmodtab: 0,
                    extrefsymoff: 0,
                    nextrefsyms: 0,
                    indirectsymoff: tables.indirect.0,
                    nindirectsyms: tables.indirect.1,
                    extreloff: tables.extrel.0,
                    nextrel: tables.extrel.1,
                    locreloff: tables.locrel.0,
                    nlocrel: tables.locrel.1,
                },
                e,
            ));
        }

        commands.push(self.string_command(LC_LOAD_DYLINKER, 12, "/usr/lib/dyld", &[]));
        commands.push(record(
            &UuidCommand {
                cmd: LC_UUID,
                cmdsize: UuidCommand::SIZE as u32,
                uuid: TEST_UUID,
            },
            e,
        ));
        if let Some(cmd) = self.version_min {
            commands.push(record(
                &VersionMinCommand {
                    cmd,
                    cmdsize: VersionMinCommand::SIZE as u32,
                    version: 0x000A_0600,
                    sdk: 0x000A_0F00,
                },
                e,
            ));
        }
        if self.build_version {
            commands.push(record(
                &BuildVersionCommand {
                    cmd: LC_BUILD_VERSION,
                    cmdsize: BuildVersionCommand::SIZE as u32,
                    platform: 1,
                    minos: 0x000A_0F00,
                    sdk: 0x000B_0000,
                    ntools: 0,
                },
                e,
            ));
        }
        commands.push(self.raw(LC_MAIN, 24));

        commands.push(self.string_command(
            LC_LOAD_DYLIB,
            DylibCommand::SIZE,
            self.dylib,
            &[2, 0x0001_0000, 0x0001_0000],
        ));

        commands.push(record(
            &LinkeditDataCommand {
                cmd: LC_FUNCTION_STARTS,
                cmdsize: LinkeditDataCommand::SIZE as u32,
                dataoff: tables.function_starts.0,
                datasize: tables.function_starts.1,
            },
            e,
        ));
        if self.code_signature {
            commands.push(record(
                &LinkeditDataCommand {
                    cmd: LC_CODE_SIGNATURE,
                    cmdsize: LinkeditDataCommand::SIZE as u32,
                    dataoff: tables.code_signature.0,
                    datasize: tables.code_signature.1,
                },
                e,
            ));
        }
        for &(cmd, cmdsize) in &self.raw_commands {
            commands.push(self.raw(cmd, cmdsize));
        }

        let sizeofcmds: usize = commands.iter().map(Vec::len).sum();
        let header = MachHeader {
            magic: if self.bits64 { MH_MAGIC_64 } else { MH_MAGIC },
            cputype: self.cputype,
            cpusubtype: self.cpusubtype,
            filetype: self.filetype,
            ncmds: commands.len() as u32,
            sizeofcmds: sizeofcmds as u32,
            flags: 0x0020_0085,
        };

        let mut out = Vec::new();
        endian::push(&mut out, &header, e);
        if self.bits64 {
            out.extend_from_slice(&[0; 4]);
        }
        for command in &commands {
            out.extend_from_slice(command);
        }
        assert!(out.len() <= TEXT_RELOC_OFFSET, "test engine load commands overflow");

        out.resize(TEXT_RELOC_OFFSET, 0);
        let symbolnum = if self.symbols.len() > 5 { 5 } else { 0 };
        endian::push(
            &mut out,
            &RelocationInfo::new(e, 0x10, symbolnum, true, self.reloc_length()),
            e,
        );
        out.resize(0x800, 0);
        out.resize(0x900, 0x90);
        out.resize(0x1000, 0);
        for (_, _, contents) in &middle {
            out.extend_from_slice(contents);
        }
        out.extend_from_slice(&linkedit);
        out
    }

    fn segment_command(&self, segment: &Segment) -> Vec<u8> {
        let (header, section) = if self.bits64 {
            (Mach64::SEGMENT_SIZE, Mach64::SECTION_SIZE)
        } else {
            (Mach32::SEGMENT_SIZE, Mach32::SECTION_SIZE)
        };
        let mut out = vec![0u8; header + segment.sections.len() * section];
        let encoded = if self.bits64 {
            Mach64::encode_segment(segment, &mut out, self.endian)
        } else {
            Mach32::encode_segment(segment, &mut out, self.endian)
        };
        assert!(encoded.is_some());
        out
    }

    /// A command carrying a C string at `name_offset`, after `fields` words.
    fn string_command(&self, cmd: u32, name_offset: usize, name: &str, fields: &[u32]) -> Vec<u8> {
        let cmdsize = (name_offset + name.len() + 1).next_multiple_of(8);
        let mut out = vec![0u8; cmdsize];
        self.endian.write_u32(&mut out, 0, cmd);
        self.endian.write_u32(&mut out, 4, cmdsize as u32);
        self.endian.write_u32(&mut out, 8, name_offset as u32);
        for (i, &field) in fields.iter().enumerate() {
            self.endian.write_u32(&mut out, 12 + i * 4, field);
        }
        out[name_offset..name_offset + name.len()].copy_from_slice(name.as_bytes());
        out
    }

    fn raw(&self, cmd: u32, cmdsize: usize) -> Vec<u8> {
        let mut out = vec![0u8; cmdsize];
        self.endian.write_u32(&mut out, 0, cmd);
        self.endian.write_u32(&mut out, 4, cmdsize as u32);
        out
    }

    fn linkedit(&self, start: u64) -> (Vec<u8>, Tables) {
        let e = self.endian;
        let mut tables = Tables::default();
        let mut out = Vec::new();
        let at = |out: &Vec<u8>| (start + out.len() as u64) as u32;

        if self.dyld_info {
            tables.rebase = (at(&out), 8);
            out.extend_from_slice(&[0x11, 0x22, 0x33, 0x44, 0x00, 0x00, 0x00, 0x00]);
            tables.bind = (at(&out), 8);
            out.extend_from_slice(&[0x55, 0x66, 0x77, 0x00, 0x00, 0x00, 0x00, 0x00]);
        }

        tables.function_starts = (at(&out), 8);
        out.extend_from_slice(&[0x80, 0x10, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);

        tables.locrel = (at(&out), 1);
        endian::push(&mut out, &RelocationInfo::new(e, 0x30, 1, false, self.reloc_length()), e);

        pad_to(&mut out, self.pointer_size());
        let mut strings = vec![b' ', 0];
        tables.symoff = at(&out);
        for sym in &self.symbols {
            let n_strx = strings.len() as u32;
            strings.extend_from_slice(sym.name.as_bytes());
            strings.push(0);
            let defined = sym.group != Group::Undefined;
            let symbol = Symbol {
                n_strx,
                n_type: sym.n_type,
                n_sect: u8::from(defined),
                n_desc: 0,
                n_value: if defined { self.base() + 0x800 } else { 0 },
            };
            let pushed = if self.bits64 {
                Mach64::encode_symbol(&symbol, &mut out, e)
            } else {
                Mach32::encode_symbol(&symbol, &mut out, e)
            };
            assert!(pushed.is_some());
        }

        tables.extrel = (at(&out), self.extrel.len() as u32);
        for &(address, symbolnum) in &self.extrel {
            endian::push(
                &mut out,
                &RelocationInfo::new(e, address, symbolnum, true, self.reloc_length()),
                e,
            );
        }

        tables.indirect = (at(&out), self.indirect.len() as u32);
        for &entry in &self.indirect {
            let mut word = [0u8; 4];
            e.write_u32(&mut word, 0, entry);
            out.extend_from_slice(&word);
        }

        pad_to(&mut strings, self.pointer_size());
        tables.stroff = at(&out);
        tables.strsize = strings.len() as u32;
        out.extend_from_slice(&strings);

        if self.code_signature {
            pad_to(&mut out, 16);
            tables.code_signature = (at(&out), 0x20);
            out.extend_from_slice(&[0xC5; 0x20]);
        }

        (out, tables)
    }
}

#[derive(Debug, Default)]
struct Tables {
    rebase: (u32, u32),
    bind: (u32, u32),
    function_starts: (u32, u32),
    locrel: (u32, u32),
    symoff: u32,
    extrel: (u32, u32),
    indirect: (u32, u32),
    stroff: u32,
    strsize: u32,
    code_signature: (u32, u32),
}

fn record<T>(value: &T, endian: Endian) -> Vec<u8>
where
    T: zerocopy::IntoBytes + zerocopy::Immutable + ByteSwap + Copy,
{
    let mut out = Vec::new();
    endian::push(&mut out, value, endian);
    out
}

fn segment(
    name: &str,
    vmaddr: u64,
    vmsize: u64,
    fileoff: u64,
    filesize: u64,
    prot: u32,
    sections: Vec<Section>,
) -> Segment {
    Segment {
        segname: to_fixed_name(name),
        vmaddr,
        vmsize,
        fileoff,
        filesize,
        maxprot: prot,
        initprot: prot,
        flags: 0,
        sections,
    }
}

fn section(segname: &str, sectname: &str, addr: u64, size: u64, offset: u32) -> Section {
    Section {
        sectname: to_fixed_name(sectname),
        segname: to_fixed_name(segname),
        addr,
        size,
        offset,
        align: 0,
        reloff: 0,
        nreloc: 0,
        flags: 0,
        reserved1: 0,
        reserved2: 0,
        reserved3: 0,
    }
}

/// Wraps thin engines in a universal binary, one `(image, align)` per slice.
pub fn universal(slices: &[(Vec<u8>, u32)]) -> Vec<u8> {
    let composed: Vec<ComposedSlice> = slices
        .iter()
        .map(|(data, align)| {
            let image = MachImage::parse(data).unwrap();
            ComposedSlice {
                cputype: image.header.cputype,
                cpusubtype: image.header.cpusubtype,
                align: *align,
                data: data.clone(),
            }
        })
        .collect();
    write_universal(&composed).unwrap()
}

/// Reads a whole segment back from a built or deployed image.
pub fn segment_of<'a>(image: &'a MachImage, name: &str) -> &'a Segment {
    image.find_segment(name).map(|(_, s)| s).unwrap()
}

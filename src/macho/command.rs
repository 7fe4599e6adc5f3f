//! Load command model.
//!
//! Each load command keeps its original bytes alongside a decoded view of the
//! fields the engine understands. Encoding writes the decoded view back over
//! a copy of the original bytes, so trailing data (dylib names, section
//! padding, build tool entries) survives untouched.

use zerocopy::FromBytes;

use super::constants::*;
use super::endian::{self, ByteSwap, Endian};
use super::structs::*;
use super::width::{AddressWidth, Segment};
use crate::error::{Error, Result};
use crate::util::cstr_at;

/// The decoded view of a load command.
#[derive(Debug, Clone)]
pub enum CommandKind {
    /// LC_SEGMENT or LC_SEGMENT_64 matching the image width
    Segment(Segment),
    /// LC_SYMTAB
    Symtab(SymtabCommand),
    /// LC_DYSYMTAB
    Dysymtab(DysymtabCommand),
    /// LC_DYLD_INFO and LC_DYLD_INFO_ONLY
    DyldInfo(DyldInfoCommand),
    /// Any command pointing at a single blob in __LINKEDIT
    LinkeditData(LinkeditDataCommand),
    /// LC_TWOLEVEL_HINTS
    TwolevelHints(TwolevelHintsCommand),
    /// Dylib load and identification commands
    Dylib {
        /// The fixed part of the command
        command: DylibCommand,
        /// The library install name
        name: String,
    },
    /// LC_UUID
    Uuid(UuidCommand),
    /// LC_VERSION_MIN_*
    VersionMin(VersionMinCommand),
    /// LC_BUILD_VERSION
    BuildVersion(BuildVersionCommand),
    /// Everything else, kept as raw bytes
    Other,
}

/// A load command with its original bytes.
#[derive(Debug, Clone)]
pub struct LoadCommand {
    /// Command type
    pub cmd: u32,
    /// Offset of the command from the start of the image
    pub offset: usize,
    /// Decoded fields
    pub kind: CommandKind,
    raw: Vec<u8>,
}

impl LoadCommand {
    /// Decodes one command from its full `cmdsize` bytes.
    pub fn decode<W: AddressWidth>(raw: &[u8], offset: usize, endian: Endian) -> Result<Self> {
        let header: LoadCommandHeader = endian::read(raw, 0, endian)
            .ok_or_else(|| Error::bad_command(offset, "truncated load command header"))?;

        let kind = match header.cmd {
            cmd if cmd == W::SEGMENT_COMMAND => CommandKind::Segment(
                W::decode_segment(raw, endian)
                    .ok_or_else(|| Error::bad_command(offset, "segment sections exceed cmdsize"))?,
            ),
            LC_SYMTAB => CommandKind::Symtab(record(raw, offset, endian, "symtab")?),
            LC_DYSYMTAB => CommandKind::Dysymtab(record(raw, offset, endian, "dysymtab")?),
            LC_DYLD_INFO | LC_DYLD_INFO_ONLY => {
                CommandKind::DyldInfo(record(raw, offset, endian, "dyld info")?)
            }
            LC_CODE_SIGNATURE
            | LC_SEGMENT_SPLIT_INFO
            | LC_FUNCTION_STARTS
            | LC_DATA_IN_CODE
            | LC_DYLIB_CODE_SIGN_DRS
            | LC_LINKER_OPTIMIZATION_HINT
            | LC_DYLD_EXPORTS_TRIE
            | LC_DYLD_CHAINED_FIXUPS => {
                CommandKind::LinkeditData(record(raw, offset, endian, "linkedit data")?)
            }
            LC_TWOLEVEL_HINTS => {
                CommandKind::TwolevelHints(record(raw, offset, endian, "twolevel hints")?)
            }
            LC_LOAD_DYLIB
            | LC_LOAD_WEAK_DYLIB
            | LC_REEXPORT_DYLIB
            | LC_LAZY_LOAD_DYLIB
            | LC_LOAD_UPWARD_DYLIB
            | LC_ID_DYLIB => {
                let command: DylibCommand = record(raw, offset, endian, "dylib")?;
                let name = cstr_at(raw, command.name_offset as usize)
                    .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
                    .unwrap_or_default();
                CommandKind::Dylib { command, name }
            }
            LC_UUID => CommandKind::Uuid(record(raw, offset, endian, "uuid")?),
            LC_VERSION_MIN_MACOSX
            | LC_VERSION_MIN_IPHONEOS
            | LC_VERSION_MIN_TVOS
            | LC_VERSION_MIN_WATCHOS => {
                CommandKind::VersionMin(record(raw, offset, endian, "version min")?)
            }
            LC_BUILD_VERSION => CommandKind::BuildVersion(record(raw, offset, endian, "build version")?),
            _ => CommandKind::Other,
        };

        Ok(Self {
            cmd: header.cmd,
            offset,
            kind,
            raw: raw.to_vec(),
        })
    }

    /// Encodes the command, overlaying the decoded fields on the original bytes.
    pub fn encode<W: AddressWidth>(&self, endian: Endian) -> Result<Vec<u8>> {
        let mut out = self.raw.clone();
        let written = match &self.kind {
            CommandKind::Segment(segment) => W::encode_segment(segment, &mut out, endian),
            CommandKind::Symtab(c) => endian::write(&mut out, 0, c, endian),
            CommandKind::Dysymtab(c) => endian::write(&mut out, 0, c, endian),
            CommandKind::DyldInfo(c) => endian::write(&mut out, 0, c, endian),
            CommandKind::LinkeditData(c) => endian::write(&mut out, 0, c, endian),
            CommandKind::TwolevelHints(c) => endian::write(&mut out, 0, c, endian),
            CommandKind::Dylib { command, .. } => endian::write(&mut out, 0, command, endian),
            CommandKind::Uuid(c) => endian::write(&mut out, 0, c, endian),
            CommandKind::VersionMin(c) => endian::write(&mut out, 0, c, endian),
            CommandKind::BuildVersion(c) => endian::write(&mut out, 0, c, endian),
            CommandKind::Other => Some(()),
        };
        written.ok_or_else(|| {
            Error::bad_command(self.offset, "command values do not fit the image width")
        })?;
        Ok(out)
    }

    /// Size of the command in bytes.
    #[inline]
    pub fn cmdsize(&self) -> u32 {
        self.raw.len() as u32
    }

    /// Returns true for segment commands of either width.
    #[inline]
    pub fn is_segment(&self) -> bool {
        matches!(self.cmd, LC_SEGMENT | LC_SEGMENT_64)
    }

    /// Returns the decoded segment, if this is one.
    pub fn segment(&self) -> Option<&Segment> {
        match &self.kind {
            CommandKind::Segment(segment) => Some(segment),
            _ => None,
        }
    }

    /// Returns the decoded segment mutably, if this is one.
    pub fn segment_mut(&mut self) -> Option<&mut Segment> {
        match &mut self.kind {
            CommandKind::Segment(segment) => Some(segment),
            _ => None,
        }
    }
}

/// Reads a fixed-size command record, mapping a short read to `BadCommand`.
fn record<T: FromBytes + ByteSwap>(
    raw: &[u8],
    offset: usize,
    endian: Endian,
    what: &str,
) -> Result<T> {
    endian::read(raw, 0, endian)
        .ok_or_else(|| Error::bad_command(offset, format!("{what} command shorter than its record")))
}

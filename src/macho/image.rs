//! Single-architecture Mach-O image: header plus load command list.

use tracing::debug;

use super::arch::Architecture;
use super::command::{CommandKind, LoadCommand};
use super::endian::{self, Endian};
use super::structs::*;
use super::width::{AddressWidth, Mach32, Mach64, Section, Segment, Width};
use crate::error::{Error, Result};

/// A parsed Mach-O image.
///
/// Only the header and the load commands are decoded; the rest of the image
/// stays in the caller's buffer and is addressed through the offsets the
/// commands carry.
#[derive(Debug, Clone)]
pub struct MachImage {
    /// The header, in host byte order
    pub header: MachHeader,
    /// Trailing reserved word of 64-bit headers
    pub reserved: u32,
    /// Byte order of the image
    pub endian: Endian,
    /// Address width of the image
    pub width: Width,
    /// Load commands in file order
    pub commands: Vec<LoadCommand>,
}

impl MachImage {
    /// Parses the header and load commands at the start of `data`.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let magic: [u8; 4] = data
            .get(..4)
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or(Error::NoHeader { offset: 0 })?;

        match Endian::from_mach_magic(magic) {
            Some((endian, true)) => Self::parse_with::<Mach64>(data, endian, Width::Bits64),
            Some((endian, false)) => Self::parse_with::<Mach32>(data, endian, Width::Bits32),
            None => Err(Error::BadHeader {
                magic: u32::from_le_bytes(magic),
                filetype: 0,
            }),
        }
    }

    fn parse_with<W: AddressWidth>(data: &[u8], endian: Endian, width: Width) -> Result<Self> {
        if data.len() < W::HEADER_SIZE {
            return Err(Error::NoHeader { offset: 0 });
        }
        let header: MachHeader =
            endian::read(data, 0, endian).ok_or(Error::NoHeader { offset: 0 })?;
        if !header.is_supported_filetype() {
            return Err(Error::BadHeader {
                magic: header.magic,
                filetype: header.filetype,
            });
        }
        let reserved = if W::HEADER_SIZE > MachHeader::SIZE {
            endian.read_u32(data, MachHeader::SIZE).unwrap_or(0)
        } else {
            0
        };

        let commands_end = W::HEADER_SIZE as u64 + u64::from(header.sizeofcmds);
        if commands_end > data.len() as u64 {
            return Err(Error::bad_command(
                W::HEADER_SIZE,
                format!(
                    "sizeofcmds {:#x} runs past the end of the image ({:#x} bytes)",
                    header.sizeofcmds,
                    data.len()
                ),
            ));
        }
        if u64::from(header.ncmds) * LoadCommandHeader::SIZE as u64 > u64::from(header.sizeofcmds) {
            return Err(Error::bad_command(
                W::HEADER_SIZE,
                format!(
                    "{} commands cannot fit in sizeofcmds {:#x}",
                    header.ncmds, header.sizeofcmds
                ),
            ));
        }
        let commands_end = commands_end as usize;

        let mut commands = Vec::with_capacity(header.ncmds as usize);
        let mut offset = W::HEADER_SIZE;
        for _ in 0..header.ncmds {
            let lc: LoadCommandHeader = endian::read(&data[..commands_end], offset, endian)
                .ok_or_else(|| Error::bad_command(offset, "load command header past sizeofcmds"))?;
            let cmdsize = lc.cmdsize as usize;
            if cmdsize < LoadCommandHeader::SIZE || cmdsize % 4 != 0 {
                return Err(Error::bad_command(
                    offset,
                    format!("invalid cmdsize {:#x} for command {:#x}", lc.cmdsize, lc.cmd),
                ));
            }
            let end = offset
                .checked_add(cmdsize)
                .filter(|&end| end <= commands_end)
                .ok_or_else(|| {
                    Error::bad_command(
                        offset,
                        format!("command {:#x} runs past sizeofcmds", lc.cmd),
                    )
                })?;
            commands.push(LoadCommand::decode::<W>(&data[offset..end], offset, endian)?);
            offset = end;
        }

        debug!(
            "Parsed {} image with {} load commands ({:?}, {:?})",
            header.architecture(),
            commands.len(),
            width,
            endian
        );

        Ok(Self {
            header,
            reserved,
            endian,
            width,
            commands,
        })
    }

    /// Size of the header for this image's width.
    #[inline]
    pub fn header_size(&self) -> usize {
        self.width.header_size()
    }

    /// Returns the architecture of the image.
    #[inline]
    pub fn architecture(&self) -> Architecture {
        self.header.architecture()
    }

    /// Iterates over the segments with their command indices.
    pub fn segments(&self) -> impl Iterator<Item = (usize, &Segment)> {
        self.commands
            .iter()
            .enumerate()
            .filter_map(|(i, c)| c.segment().map(|s| (i, s)))
    }

    /// Finds the first segment with the given name.
    pub fn find_segment(&self, name: &str) -> Option<(usize, &Segment)> {
        self.segments().find(|(_, s)| s.name() == name)
    }

    /// Finds a section by the segment and section names recorded in the
    /// section itself.
    pub fn find_section(&self, segname: &str, sectname: &str) -> Option<&Section> {
        self.segments()
            .flat_map(|(_, s)| s.sections.iter())
            .find(|s| s.segment_name() == segname && s.name() == sectname)
    }

    /// Returns the symbol table command and its index.
    pub fn symtab(&self) -> Option<(usize, &SymtabCommand)> {
        self.commands.iter().enumerate().find_map(|(i, c)| match &c.kind {
            CommandKind::Symtab(symtab) => Some((i, symtab)),
            _ => None,
        })
    }

    /// Returns the dynamic symbol table command and its index.
    pub fn dysymtab(&self) -> Option<(usize, &DysymtabCommand)> {
        self.commands.iter().enumerate().find_map(|(i, c)| match &c.kind {
            CommandKind::Dysymtab(dysymtab) => Some((i, dysymtab)),
            _ => None,
        })
    }

    /// Iterates over the linked and identified dylib names with their command types.
    pub fn dylibs(&self) -> impl Iterator<Item = (u32, &str)> {
        self.commands.iter().filter_map(|c| match &c.kind {
            CommandKind::Dylib { name, .. } => Some((c.cmd, name.as_str())),
            _ => None,
        })
    }

    /// Encodes the header and all load commands.
    ///
    /// `ncmds` and `sizeofcmds` are written as parsed; commands are never
    /// added or removed.
    pub fn serialize_commands(&self) -> Result<Vec<u8>> {
        match self.width {
            Width::Bits32 => self.serialize_with::<Mach32>(),
            Width::Bits64 => self.serialize_with::<Mach64>(),
        }
    }

    fn serialize_with<W: AddressWidth>(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(W::HEADER_SIZE + self.header.sizeofcmds as usize);
        endian::push(&mut out, &self.header, self.endian);
        if W::HEADER_SIZE > MachHeader::SIZE {
            let mut word = [0u8; 4];
            self.endian.write_u32(&mut word, 0, self.reserved);
            out.extend_from_slice(&word);
        }
        for command in &self.commands {
            out.extend_from_slice(&command.encode::<W>(self.endian)?);
        }
        Ok(out)
    }

    /// Writes the header and load commands over the start of `data`.
    pub fn overlay(&self, data: &mut [u8]) -> Result<()> {
        let encoded = self.serialize_commands()?;
        data.get_mut(..encoded.len())
            .ok_or_else(|| Error::bad_file(0, "image too small for its load commands"))?
            .copy_from_slice(&encoded);
        Ok(())
    }
}

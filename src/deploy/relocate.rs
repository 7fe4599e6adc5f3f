//! Relocation engine.
//!
//! Once the deploy segments have been resized, every structure from the
//! pivot segment onwards sits `file_delta` bytes away from where its load
//! command says. This pass rewrites those offsets. Offsets of zero mean
//! "absent" and are never shifted.
//!
//! The set of commands the engine knows how to move is closed: anything
//! unrecognised after the pivot fails the deploy rather than being guessed at.

use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::macho::*;
use crate::util::{shift_u32, shift_u64};

/// The changes applied to a slice's load commands.
#[derive(Debug, Clone, Copy, Default)]
pub struct Relocation {
    /// Signed change of file offsets at and after the pivot
    pub file_delta: i64,
    /// Signed change of virtual addresses at and after the pivot
    pub address_delta: i64,
    /// Replacement UUID bytes
    pub uuid: Option<[u8; 16]>,
    /// Replacement minimum OS version, already resolved for this slice
    pub min_os_version: Option<u32>,
}

/// Commands that carry no file offsets and may follow the pivot unchanged.
const PASS_THROUGH: &[u32] = &[
    LC_THREAD,
    LC_UNIXTHREAD,
    LC_LOAD_DYLINKER,
    LC_ID_DYLINKER,
    LC_ENCRYPTION_INFO,
    LC_ENCRYPTION_INFO_64,
    LC_SOURCE_VERSION,
    LC_MAIN,
    LC_RPATH,
    LC_DYLD_ENVIRONMENT,
];

/// Rewrites the command list for a resized slice.
///
/// Commands before `pivot` only receive the UUID and version overrides.
pub fn relocate_commands(
    commands: &mut [LoadCommand],
    pivot: usize,
    relocation: &Relocation,
) -> Result<()> {
    debug!(
        "Relocating from command {} by {:+#x} (address {:+#x})",
        pivot, relocation.file_delta, relocation.address_delta
    );

    for (index, command) in commands.iter_mut().enumerate() {
        apply_overrides(command, relocation);
        if index >= pivot {
            relocate_command(command, relocation)?;
        }
    }
    Ok(())
}

fn apply_overrides(command: &mut LoadCommand, relocation: &Relocation) {
    let cmd = command.cmd;
    match &mut command.kind {
        CommandKind::Uuid(c) => {
            if let Some(uuid) = relocation.uuid {
                c.uuid = uuid;
            }
        }
        CommandKind::VersionMin(c) if matches!(cmd, LC_VERSION_MIN_MACOSX | LC_VERSION_MIN_IPHONEOS) => {
            if let Some(version) = relocation.min_os_version {
                c.version = version;
            }
        }
        CommandKind::BuildVersion(c) => {
            if let Some(version) = relocation.min_os_version {
                c.minos = version;
            }
        }
        _ => {}
    }
}

fn relocate_command(command: &mut LoadCommand, relocation: &Relocation) -> Result<()> {
    let cmd = command.cmd;
    let offset = command.offset;
    let delta = relocation.file_delta;

    match &mut command.kind {
        CommandKind::Segment(segment) => {
            trace!("  {}", segment);
            relocate_segment(segment, relocation, offset)?;
        }
        CommandKind::Symtab(c) => {
            shift(&mut c.symoff, delta, offset)?;
            shift(&mut c.stroff, delta, offset)?;
        }
        CommandKind::Dysymtab(c) => {
            for field in [
                &mut c.tocoff,
                &mut c.modtaboff,
                &mut c.extrefsymoff,
                &mut c.indirectsymoff,
                &mut c.extreloff,
                &mut c.locreloff,
            ] {
                shift(field, delta, offset)?;
            }
        }
        CommandKind::DyldInfo(c) => {
            for field in c.offsets_mut() {
                shift(field, delta, offset)?;
            }
        }
        CommandKind::LinkeditData(c) => shift(&mut c.dataoff, delta, offset)?,
        CommandKind::TwolevelHints(c) => shift(&mut c.offset, delta, offset)?,
        CommandKind::Uuid(_)
        | CommandKind::VersionMin(_)
        | CommandKind::BuildVersion(_)
        | CommandKind::Dylib { .. } => {}
        CommandKind::Other => {
            if !PASS_THROUGH.contains(&cmd) {
                return Err(Error::UnknownLoadCommand(cmd));
            }
        }
    }
    Ok(())
}

/// Moves a segment and its sections.
pub fn relocate_segment(segment: &mut Segment, relocation: &Relocation, offset: usize) -> Result<()> {
    let name = segment.name().to_string();
    let overflow = || Error::bad_command(offset, format!("{name} moves out of range"));

    segment.fileoff = shift_u64(segment.fileoff, relocation.file_delta).ok_or_else(overflow)?;
    segment.vmaddr = shift_u64(segment.vmaddr, relocation.address_delta).ok_or_else(overflow)?;

    for section in &mut segment.sections {
        shift(&mut section.offset, relocation.file_delta, offset)?;
        shift(&mut section.reloff, relocation.file_delta, offset)?;
        section.addr = shift_u64(section.addr, relocation.address_delta).ok_or_else(overflow)?;
    }
    Ok(())
}

/// Shifts a nonzero 32-bit file offset.
#[inline]
fn shift(field: &mut u32, delta: i64, offset: usize) -> Result<()> {
    if *field != 0 {
        *field = shift_u32(*field, delta).ok_or_else(|| {
            Error::bad_command(offset, format!("offset {:#x} moves out of range", *field))
        })?;
    }
    Ok(())
}

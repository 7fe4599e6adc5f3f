//! Per-slice deploy pipeline.
//!
//! Parse, validate, compute the delta, relocate, serialize. The output image
//! is assembled in one pass:
//!
//! ```text
//! input[..injection]  payload+pad  project+pad  input[pivot..]
//! ```
//!
//! followed by the rewritten header and load commands laid over its start.

use tracing::{debug, info, warn};

use super::layout::SegmentLayout;
use super::relocate::{relocate_commands, Relocation};
use super::MinOsVersion;
use crate::error::{Error, Result};
use crate::macho::{MachImage, Segment};
use crate::util::{align_up, delta, is_aligned};

/// Engine predicate run on each slice before it is modified.
pub type Validator<'a> = &'a dyn Fn(&MachImage) -> Result<()>;

/// Everything a slice needs from the deploy parameters.
#[derive(Clone, Copy)]
pub struct SliceJob<'a> {
    /// Bytes placed in `__PAYLOAD`
    pub payload: &'a [u8],
    /// Bytes placed in `__PROJECT`
    pub project: &'a [u8],
    /// Segment size granularity
    pub alignment: u64,
    /// Replacement UUID bytes
    pub uuid: Option<[u8; 16]>,
    /// Minimum OS version table
    pub min_os_versions: &'a [MinOsVersion],
    /// Engine predicate
    pub validate: Validator<'a>,
}

/// Deploys into one single-architecture image.
pub fn deploy_slice(input: &[u8], job: &SliceJob<'_>) -> Result<Vec<u8>> {
    let mut image = MachImage::parse(input)?;
    (job.validate)(&image)?;

    let layout = SegmentLayout::locate(&image.commands, !job.payload.is_empty())?;
    let injection = segment_at(&image, layout.injection())?.clone();
    let pivot = segment_at(&image, layout.pivot())?.clone();

    let commands_end = (image.header_size() + image.header.sizeofcmds as usize) as u64;
    if injection.fileoff < commands_end {
        return Err(Error::bad_file(
            injection.fileoff as usize,
            format!("{} overlaps the load commands", injection.name()),
        ));
    }
    if pivot.fileoff < injection.fileoff || pivot.fileoff > input.len() as u64 {
        return Err(Error::bad_file(
            pivot.fileoff as usize,
            format!("{} lies outside the image", pivot.name()),
        ));
    }
    if !is_aligned(injection.fileoff, job.alignment) {
        warn!(
            "{} starts at {:#x}, which is not a multiple of {:#x}",
            injection.name(),
            injection.fileoff,
            job.alignment
        );
    }

    let mut out = input[..injection.fileoff as usize].to_vec();
    if let Some(index) = layout.payload {
        fill_segment(&mut image, index, &injection, job.payload, job.alignment, &mut out)?;
    }
    fill_segment(&mut image, layout.project, &injection, job.project, job.alignment, &mut out)?;

    let new_end = out.len() as u64;
    let new_end_address = address_at(&injection, new_end)?;
    let out_of_range = || Error::bad_file(pivot.fileoff as usize, "deployed image exceeds the address space");
    let relocation = Relocation {
        file_delta: delta(pivot.fileoff, new_end).ok_or_else(out_of_range)?,
        address_delta: delta(pivot.vmaddr, new_end_address).ok_or_else(out_of_range)?,
        uuid: job.uuid,
        min_os_version: MinOsVersion::lookup(job.min_os_versions, image.architecture()),
    };
    relocate_commands(&mut image.commands, layout.pivot(), &relocation)?;

    out.extend_from_slice(&input[pivot.fileoff as usize..]);
    image.overlay(&mut out)?;

    info!(
        "Deployed {} slice: {} -> {} bytes ({:+#x})",
        image.architecture(),
        input.len(),
        out.len(),
        relocation.file_delta
    );
    Ok(out)
}

/// Maps a file offset at or past the injection point to its address.
fn address_at(injection: &Segment, fileoff: u64) -> Result<u64> {
    fileoff
        .checked_sub(injection.fileoff)
        .and_then(|distance| injection.vmaddr.checked_add(distance))
        .ok_or_else(|| {
            Error::bad_file(fileoff as usize, "deployed image exceeds the address space")
        })
}

fn segment_at(image: &MachImage, index: usize) -> Result<&Segment> {
    image
        .commands
        .get(index)
        .and_then(|c| c.segment())
        .ok_or_else(|| Error::bad_command(index, "expected a segment command"))
}

/// Appends `contents` padded to `alignment` and points the segment and its
/// first section at it.
fn fill_segment(
    image: &mut MachImage,
    index: usize,
    injection: &Segment,
    contents: &[u8],
    alignment: u64,
    out: &mut Vec<u8>,
) -> Result<()> {
    let fileoff = out.len() as u64;
    let size = align_up(contents.len() as u64, alignment);
    let vmaddr = address_at(injection, fileoff)?;

    out.extend_from_slice(contents);
    out.resize((fileoff + size) as usize, 0);

    let offset = image.commands[index].offset;
    let segment = image.commands[index]
        .segment_mut()
        .ok_or_else(|| Error::bad_command(offset, "expected a segment command"))?;
    segment.fileoff = fileoff;
    segment.filesize = size;
    segment.vmaddr = vmaddr;
    segment.vmsize = size;
    if let Some(section) = segment.sections.first_mut() {
        section.offset = u32::try_from(fileoff)
            .map_err(|_| Error::bad_command(offset, "section offset exceeds 32 bits"))?;
        section.addr = vmaddr;
        section.size = size;
    }

    debug!(
        "  {} -> {:#x}+{:#x} ({} bytes of content)",
        segment.name(),
        fileoff,
        size,
        contents.len()
    );
    Ok(())
}

//! Section extraction.
//!
//! Returns the bytes of a named section from the first slice of a thin or
//! universal file that has it.

use std::path::PathBuf;

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::macho::{slices, MachImage};
use crate::output::map_input;

/// Parameters of an extraction.
#[derive(Debug, Clone)]
pub struct ExtractParameters {
    /// File to read
    pub input: PathBuf,
    /// Segment name, e.g. `__PROJECT`
    pub segment: String,
    /// Section name, e.g. `__project`
    pub section: String,
}

/// Reads a section's bytes out of a file.
pub fn extract_section(params: &ExtractParameters) -> Result<Vec<u8>> {
    let data = map_input(&params.input)?;
    let bytes = extract_section_from_bytes(&data, &params.segment, &params.section)?;
    info!(
        "Extracted {},{} ({} bytes) from {}",
        params.segment,
        params.section,
        bytes.len(),
        params.input.display()
    );
    Ok(bytes)
}

/// Reads a section's bytes out of an in-memory file.
pub fn extract_section_from_bytes(data: &[u8], segment: &str, section: &str) -> Result<Vec<u8>> {
    for slice in slices(data)? {
        let image = MachImage::parse(slice.data)?;
        let Some(found) = image.find_section(segment, section) else {
            debug!("{} slice has no {},{}", image.architecture(), segment, section);
            continue;
        };

        let start = found.offset as usize;
        let end = start
            .checked_add(found.size as usize)
            .filter(|&end| end <= slice.data.len())
            .ok_or_else(|| {
                Error::bad_file(
                    slice.offset + start,
                    format!("{segment},{section} extends past the end of the image"),
                )
            })?;
        debug!(
            "Found {} in {} slice at {:#x}",
            found,
            image.architecture(),
            slice.offset + start
        );
        return Ok(slice.data[start..end].to_vec());
    }

    Err(Error::SectionNotFound {
        segment: segment.to_string(),
        section: section.to_string(),
    })
}

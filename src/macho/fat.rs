//! Universal (fat) binary containers.
//!
//! The arch table is read in either byte order but always written big-endian.

use tracing::debug;

use super::constants::*;
use super::endian::{self, Endian};
use super::structs::{FatArch, FatHeader};
use crate::error::{Error, Result};
use crate::util::align_up;

/// One architecture image inside a file.
#[derive(Debug, Clone, Copy)]
pub struct Slice<'a> {
    /// The fat_arch entry, or `None` for a thin file
    pub arch: Option<FatArch>,
    /// File offset of the image
    pub offset: usize,
    /// The image bytes
    pub data: &'a [u8],
}

/// A slice produced by a transform, ready to be placed in a universal binary.
#[derive(Debug, Clone)]
pub struct ComposedSlice {
    /// CPU type
    pub cputype: u32,
    /// CPU subtype
    pub cpusubtype: u32,
    /// Slice alignment as a power of two
    pub align: u32,
    /// The image bytes
    pub data: Vec<u8>,
}

/// Returns the byte order of the arch table if `data` is a universal binary.
pub fn fat_endian(data: &[u8]) -> Option<Endian> {
    let magic = Endian::Big.read_u32(data, 0)?;
    match magic {
        FAT_MAGIC => Some(Endian::Big),
        FAT_CIGAM => Some(Endian::Little),
        _ => None,
    }
}

/// Reads and validates the arch table of a universal binary.
///
/// Returns `Ok(None)` for a thin file.
pub fn read_arches(data: &[u8]) -> Result<Option<Vec<FatArch>>> {
    if data.len() < 4 {
        return Err(Error::NoHeader { offset: 0 });
    }
    let Some(endian) = fat_endian(data) else {
        return Ok(None);
    };

    let header: FatHeader = endian::read(data, 0, endian).ok_or(Error::NoHeader { offset: 0 })?;
    let table_size = FatHeader::SIZE as u64 + u64::from(header.nfat_arch) * FatArch::SIZE as u64;
    if table_size > data.len() as u64 {
        return Err(Error::no_memory("fat_arch table", table_size, data.len() as u64));
    }

    let mut arches = Vec::with_capacity(header.nfat_arch as usize);
    for i in 0..header.nfat_arch as usize {
        let entry = FatHeader::SIZE + i * FatArch::SIZE;
        let arch: FatArch = endian::read(data, entry, endian).ok_or(Error::NoHeader { offset: entry })?;
        if arch.align >= 32 {
            return Err(Error::bad_file(entry, format!("slice alignment 2^{} is too large", arch.align)));
        }
        let end = u64::from(arch.offset) + u64::from(arch.size);
        if (arch.offset as u64) < table_size || end > data.len() as u64 {
            return Err(Error::bad_file(
                entry,
                format!(
                    "slice {:#x}+{:#x} lies outside the file ({:#x} bytes)",
                    arch.offset,
                    arch.size,
                    data.len()
                ),
            ));
        }
        arches.push(arch);
    }

    debug!("Universal binary with {} slices ({:?} table)", arches.len(), endian);
    Ok(Some(arches))
}

/// Enumerates the images in a file; a thin file is one slice at offset 0.
pub fn slices(data: &[u8]) -> Result<Vec<Slice<'_>>> {
    match read_arches(data)? {
        None => Ok(vec![Slice {
            arch: None,
            offset: 0,
            data,
        }]),
        Some(arches) => Ok(arches
            .into_iter()
            .map(|arch| {
                let start = arch.offset as usize;
                Slice {
                    arch: Some(arch),
                    offset: start,
                    data: &data[start..start + arch.size as usize],
                }
            })
            .collect()),
    }
}

/// Lays out slices in a new universal binary.
///
/// Each slice starts at the end of the previous one (or of the arch table)
/// rounded up to `2^align`. The table is written big-endian.
pub fn write_universal(slices: &[ComposedSlice]) -> Result<Vec<u8>> {
    let table_size = FatHeader::SIZE + slices.len() * FatArch::SIZE;
    let mut out = vec![0u8; table_size];

    let header = FatHeader {
        magic: FAT_MAGIC,
        nfat_arch: slices.len() as u32,
    };
    endian::write(&mut out, 0, &header, Endian::Big)
        .ok_or_else(|| Error::bad_file(0, "fat header does not fit"))?;

    for (i, slice) in slices.iter().enumerate() {
        if slice.align >= 32 {
            return Err(Error::bad_file(0, format!("slice alignment 2^{} is too large", slice.align)));
        }
        let offset = align_up(out.len() as u64, 1u64 << slice.align);
        let too_large = || Error::bad_file(offset as usize, "universal binary exceeds 4 GiB");
        let arch = FatArch {
            cputype: slice.cputype,
            cpusubtype: slice.cpusubtype,
            offset: u32::try_from(offset).map_err(|_| too_large())?,
            size: u32::try_from(slice.data.len()).map_err(|_| too_large())?,
            align: slice.align,
        };
        debug!("  placing {} at {:#x}", arch.architecture(), offset);

        out.resize(offset as usize, 0);
        out.extend_from_slice(&slice.data);
        endian::write(&mut out, FatHeader::SIZE + i * FatArch::SIZE, &arch, Endian::Big)
            .ok_or_else(|| Error::bad_file(0, "fat_arch entry does not fit"))?;
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn composed(cputype: u32, align: u32, len: usize) -> ComposedSlice {
        ComposedSlice {
            cputype,
            cpusubtype: 3,
            align,
            data: vec![0xAB; len],
        }
    }

    #[test]
    fn test_thin_file() {
        let data = [0xCF, 0xFA, 0xED, 0xFE, 0, 0, 0, 0];
        assert!(read_arches(&data).unwrap().is_none());
        let all = slices(&data).unwrap();
        assert_eq!(all.len(), 1);
        assert!(all[0].arch.is_none());
    }

    #[test]
    fn test_write_then_read() {
        let data = write_universal(&[
            composed(CPU_TYPE_POWERPC, 12, 100),
            composed(CPU_TYPE_X86, 14, 0x5000),
        ])
        .unwrap();
        assert_eq!(&data[..4], &FAT_MAGIC.to_be_bytes());

        let arches = read_arches(&data).unwrap().unwrap();
        assert_eq!(arches.len(), 2);
        assert_eq!(arches[0].offset, 0x1000);
        assert_eq!(arches[0].size, 100);
        assert_eq!(arches[1].offset, 0x4000);
        assert_eq!(arches[1].align, 14);
        assert_eq!(data.len(), 0x4000 + 0x5000);
    }

    #[test]
    fn test_aligned_end_is_not_padded() {
        let data = write_universal(&[composed(CPU_TYPE_X86, 12, 0x1000), composed(CPU_TYPE_X86_64, 12, 8)])
            .unwrap();
        let arches = read_arches(&data).unwrap().unwrap();
        assert_eq!(arches[1].offset, 0x2000);
    }

    #[test]
    fn test_little_endian_table() {
        let mut data = vec![0u8; 0x1010];
        endian::write(
            &mut data,
            0,
            &FatHeader {
                magic: FAT_MAGIC,
                nfat_arch: 1,
            },
            Endian::Little,
        )
        .unwrap();
        endian::write(
            &mut data,
            8,
            &FatArch {
                cputype: CPU_TYPE_X86,
                cpusubtype: 3,
                offset: 0x1000,
                size: 0x10,
                align: 12,
            },
            Endian::Little,
        )
        .unwrap();
        assert_eq!(fat_endian(&data), Some(Endian::Little));
        let all = slices(&data).unwrap();
        assert_eq!(all[0].offset, 0x1000);
        assert_eq!(all[0].data.len(), 0x10);
    }

    #[test]
    fn test_table_past_end() {
        let mut data = FAT_MAGIC.to_be_bytes().to_vec();
        data.extend_from_slice(&1000u32.to_be_bytes());
        assert!(matches!(read_arches(&data), Err(Error::NoMemory { .. })));
    }

    #[test]
    fn test_slice_out_of_bounds() {
        let mut data = write_universal(&[composed(CPU_TYPE_X86, 12, 16)]).unwrap();
        data.truncate(0x1008);
        assert!(matches!(read_arches(&data), Err(Error::BadFile { .. })));
    }
}

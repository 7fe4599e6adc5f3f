//! Fat binary composer.
//!
//! Runs a per-slice transform over every kept architecture of a file and
//! reassembles the results. Thin input is one implicit slice and produces
//! thin output.

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::macho::*;

/// What to write when exactly one slice of a universal binary survives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SingleSlice {
    /// A universal binary with one arch entry
    KeepFat,
    /// The bare slice
    Thin,
}

/// Applies `process` to each slice accepted by `keep`.
///
/// `keep` receives the CPU type and subtype of each slice. Kept slices keep
/// their CPU type, subtype and alignment; their offsets are recomputed.
pub fn compose<K, F>(input: &[u8], single: SingleSlice, keep: K, mut process: F) -> Result<Vec<u8>>
where
    K: Fn(u32, u32) -> bool,
    F: FnMut(&[u8]) -> Result<Vec<u8>>,
{
    let Some(arches) = read_arches(input)? else {
        let image = MachImage::parse(input)?;
        if !keep(image.header.cputype, image.header.cpusubtype) {
            debug!("Thin {} image excluded by filter", image.architecture());
            return Err(Error::NoArchs);
        }
        return process(input);
    };

    let mut composed = Vec::new();
    for arch in arches {
        if !keep(arch.cputype, arch.cpusubtype) {
            debug!("Skipping {}", arch);
            continue;
        }
        info!("Processing {}", arch);
        let start = arch.offset as usize;
        let data = process(&input[start..start + arch.size as usize])?;
        composed.push(ComposedSlice {
            cputype: arch.cputype,
            cpusubtype: arch.cpusubtype,
            align: arch.align,
            data,
        });
    }

    match composed.len() {
        0 => Err(Error::NoArchs),
        1 if single == SingleSlice::Thin => Ok(composed.remove(0).data),
        _ => write_universal(&composed),
    }
}

/// Builds a filter from an architecture allow-list; empty keeps everything.
pub fn architecture_filter(architectures: &[Architecture]) -> impl Fn(u32, u32) -> bool + '_ {
    move |cputype, cpusubtype| {
        architectures.is_empty()
            || architectures.contains(&Architecture::from_cpu(cputype, cpusubtype))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{universal, EngineBuilder};

    fn three_slices() -> Vec<u8> {
        universal(&[
            (EngineBuilder::ppc().build(), 12),
            (EngineBuilder::i386().build(), 13),
            (EngineBuilder::new().build(), 14),
        ])
    }

    #[test]
    fn test_filter_keeps_alignment() {
        let input = three_slices();
        let archs = [Architecture::Ppc, Architecture::X86_64];
        let output = compose(&input, SingleSlice::KeepFat, architecture_filter(&archs), |s| {
            Ok(s.to_vec())
        })
        .unwrap();

        let arches = read_arches(&output).unwrap().unwrap();
        assert_eq!(arches.len(), 2);
        assert_eq!(arches[0].architecture(), Architecture::Ppc);
        assert_eq!(arches[0].align, 12);
        assert_eq!(arches[1].architecture(), Architecture::X86_64);
        assert_eq!(arches[1].align, 14);
        assert_eq!(arches[1].offset % (1 << 14), 0);
    }

    #[test]
    fn test_empty_filter_keeps_all() {
        let input = three_slices();
        let mut seen = 0;
        let output = compose(&input, SingleSlice::KeepFat, architecture_filter(&[]), |s| {
            seen += 1;
            Ok(s.to_vec())
        })
        .unwrap();
        assert_eq!(seen, 3);
        assert_eq!(read_arches(&output).unwrap().unwrap().len(), 3);
    }

    #[test]
    fn test_single_slice_modes() {
        let input = three_slices();
        let archs = [Architecture::I386];

        let fat = compose(&input, SingleSlice::KeepFat, architecture_filter(&archs), |s| {
            Ok(s.to_vec())
        })
        .unwrap();
        assert_eq!(read_arches(&fat).unwrap().unwrap().len(), 1);

        let thin = compose(&input, SingleSlice::Thin, architecture_filter(&archs), |s| {
            Ok(s.to_vec())
        })
        .unwrap();
        assert_eq!(thin, EngineBuilder::i386().build());
    }

    #[test]
    fn test_no_archs() {
        let input = three_slices();
        let archs = [Architecture::Arm64];
        let err = compose(&input, SingleSlice::KeepFat, architecture_filter(&archs), |s| {
            Ok(s.to_vec())
        })
        .unwrap_err();
        assert!(matches!(err, Error::NoArchs));

        let thin = EngineBuilder::new().build();
        let err = compose(&thin, SingleSlice::KeepFat, architecture_filter(&archs), |s| {
            Ok(s.to_vec())
        })
        .unwrap_err();
        assert!(matches!(err, Error::NoArchs));
    }

    #[test]
    fn test_slice_failure_aborts() {
        let input = three_slices();
        let err = compose(&input, SingleSlice::KeepFat, architecture_filter(&[]), |s| {
            let image = MachImage::parse(s)?;
            if image.architecture() == Architecture::I386 {
                return Err(Error::NoProjectSegment);
            }
            Ok(s.to_vec())
        })
        .unwrap_err();
        assert!(matches!(err, Error::NoProjectSegment));
    }
}

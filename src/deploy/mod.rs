//! Deploying an application into a prebuilt engine.
//!
//! The engine carries empty `__PROJECT` (and optionally `__PAYLOAD`)
//! segments just before `__LINKEDIT`. Deploying fills them with the
//! application's bytes and moves everything after them, for each
//! architecture slice of the engine.

pub mod compose;
pub mod layout;
pub mod relocate;
pub mod slice;
pub mod validate;

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::macho::{write_universal, Architecture, ComposedSlice, MachImage, ParseArchitectureError};
use crate::output::{map_input, write_output};
use compose::{architecture_filter, compose, SingleSlice};
use slice::{deploy_slice, SliceJob, Validator};

/// Slice alignment (as a power of two) used when combining split engines.
pub const SPLIT_ENGINE_ALIGN: u32 = 12;

// =============================================================================
// Parameters
// =============================================================================

/// Minimum OS version for one architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MinOsVersion {
    /// Architecture the entry applies to; `Unknown` is the fallback entry
    pub architecture: Architecture,
    /// Version packed as `major << 16 | minor << 8 | patch`
    pub version: u32,
}

impl MinOsVersion {
    /// Creates an entry.
    pub fn new(architecture: Architecture, version: u32) -> Self {
        Self {
            architecture,
            version,
        }
    }

    /// Packs a version in Mach-O `xxxx.yy.zz` form.
    pub const fn pack(major: u32, minor: u32, patch: u32) -> u32 {
        ((major & 0xFFFF) << 16) | ((minor & 0xFF) << 8) | (patch & 0xFF)
    }

    /// Parses `X.Y.Z` leniently: parsing stops at the first malformed
    /// component and missing components are zero.
    pub fn parse_version(text: &str) -> u32 {
        let mut parts = [0u32; 3];
        for (slot, component) in parts.iter_mut().zip(text.trim().split('.')) {
            let digits = component
                .find(|c: char| !c.is_ascii_digit())
                .map_or(component, |end| &component[..end]);
            match digits.parse() {
                Ok(value) => *slot = value,
                Err(_) => break,
            }
            if digits.len() != component.len() {
                break;
            }
        }
        Self::pack(parts[0], parts[1], parts[2])
    }

    /// Finds the version for `architecture`, falling back to the entry for
    /// unknown architectures.
    pub fn lookup(table: &[MinOsVersion], architecture: Architecture) -> Option<u32> {
        table
            .iter()
            .find(|entry| entry.architecture == architecture)
            .or_else(|| table.iter().find(|entry| entry.architecture == Architecture::Unknown))
            .map(|entry| entry.version)
    }
}

impl FromStr for MinOsVersion {
    type Err = ParseArchitectureError;

    /// Parses `[ARCH=]X.Y.Z`.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.split_once('=') {
            Some((arch, version)) => Ok(Self::new(arch.parse()?, Self::parse_version(version))),
            None => Ok(Self::new(Architecture::Unknown, Self::parse_version(s))),
        }
    }
}

impl fmt::Display for MinOsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}={}.{}.{}",
            self.architecture,
            self.version >> 16,
            (self.version >> 8) & 0xFF,
            self.version & 0xFF
        )
    }
}

/// Parameters of a deploy.
#[derive(Debug, Clone, Default)]
pub struct DeployParameters {
    /// A single (thin or universal) engine
    pub engine: Option<PathBuf>,
    /// Separate thin engines, one per architecture (desktop only)
    pub architecture_engines: Vec<PathBuf>,
    /// Bytes placed in `__PAYLOAD`; empty leaves it empty
    pub payload: Vec<u8>,
    /// Bytes placed in `__PROJECT`
    pub project: Vec<u8>,
    /// Architectures to keep; empty keeps all
    pub architectures: Vec<Architecture>,
    /// Minimum OS versions to write into the version commands
    pub min_os_versions: Vec<MinOsVersion>,
    /// Replacement UUID in textual form
    pub uuid: Option<String>,
    /// Output path
    pub output: Option<PathBuf>,
    /// Segment size granularity; defaults to the target's
    pub segment_alignment: Option<u64>,
}

/// Where the engine slices come from.
#[derive(Debug, Clone, Copy)]
pub enum EngineSource<'a> {
    /// One file, thin or universal
    Single(&'a Path),
    /// One thin file per architecture
    PerArchitecture(&'a [PathBuf]),
}

impl DeployParameters {
    /// Resolves the engine source; exactly one kind must be supplied.
    pub fn engine_source(&self) -> Result<EngineSource<'_>> {
        match (&self.engine, self.architecture_engines.as_slice()) {
            (Some(engine), []) => Ok(EngineSource::Single(engine)),
            (None, engines) if !engines.is_empty() => Ok(EngineSource::PerArchitecture(engines)),
            _ => Err(Error::NoEngine),
        }
    }

    /// Parses the replacement UUID, if any.
    pub fn parsed_uuid(&self) -> Result<Option<[u8; 16]>> {
        self.uuid
            .as_deref()
            .map(|text| {
                Uuid::parse_str(text.trim())
                    .map(|uuid| *uuid.as_bytes())
                    .map_err(|_| Error::InvalidUuid(text.to_string()))
            })
            .transpose()
    }

    fn slice_job<'a>(&'a self, target: DeployTarget, validate: Validator<'a>) -> Result<SliceJob<'a>> {
        Ok(SliceJob {
            payload: &self.payload,
            project: &self.project,
            alignment: self.alignment(target),
            uuid: self.parsed_uuid()?,
            min_os_versions: &self.min_os_versions,
            validate,
        })
    }

    /// The segment alignment to use for `target`.
    pub fn alignment(&self, target: DeployTarget) -> u64 {
        match self.segment_alignment {
            None => target.default_alignment(),
            Some(alignment) if alignment.is_power_of_two() => alignment,
            Some(alignment) => {
                let rounded = alignment.max(1).next_power_of_two();
                warn!("Segment alignment {alignment:#x} is not a power of two; using {rounded:#x}");
                rounded
            }
        }
    }
}

/// The platform an engine is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployTarget {
    /// Desktop engines (PowerPC, Intel, Apple silicon) linked against Cocoa
    Desktop,
    /// Mobile engines (ARM, simulator Intel) linked against UIKit
    Mobile,
}

impl DeployTarget {
    /// Default segment alignment for this target.
    pub fn default_alignment(self) -> u64 {
        match self {
            DeployTarget::Desktop | DeployTarget::Mobile => 0x4000,
        }
    }

    /// The engine predicate for this target.
    pub fn validator(self) -> fn(&MachImage) -> Result<()> {
        match self {
            DeployTarget::Desktop => validate::desktop_engine,
            DeployTarget::Mobile => validate::mobile_engine,
        }
    }
}

impl fmt::Display for DeployTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeployTarget::Desktop => f.write_str("desktop"),
            DeployTarget::Mobile => f.write_str("mobile"),
        }
    }
}

// =============================================================================
// Entry Points
// =============================================================================

/// Deploys into the engine(s) named by `params` and writes the executable.
pub fn deploy(params: &DeployParameters, target: DeployTarget) -> Result<()> {
    let source = params.engine_source()?;
    if target == DeployTarget::Mobile && matches!(source, EngineSource::PerArchitecture(_)) {
        return Err(Error::NoEngine);
    }
    let output = params.output.as_deref().ok_or(Error::NoOutput)?;
    params.parsed_uuid()?;

    let data = match source {
        EngineSource::Single(path) => {
            info!("Deploying {} engine {}", target, path.display());
            let engine = map_input(path)?;
            deploy_bytes(&engine, params, target)?
        }
        EngineSource::PerArchitecture(paths) => deploy_split(paths, params, target)?,
    };

    write_output(output, &data, true)?;
    info!("Wrote {} ({} bytes)", output.display(), data.len());
    Ok(())
}

/// Deploys into an in-memory engine, thin or universal.
///
/// A universal engine filtered down to one slice stays universal.
pub fn deploy_bytes(engine: &[u8], params: &DeployParameters, target: DeployTarget) -> Result<Vec<u8>> {
    let validate = target.validator();
    let job = params.slice_job(target, &validate)?;
    compose(
        engine,
        SingleSlice::KeepFat,
        architecture_filter(&params.architectures),
        |slice| deploy_slice(slice, &job),
    )
}

/// Deploys into separate per-architecture engines and combines the results.
fn deploy_split(paths: &[PathBuf], params: &DeployParameters, target: DeployTarget) -> Result<Vec<u8>> {
    let validate = target.validator();
    let job = params.slice_job(target, &validate)?;
    let keep = architecture_filter(&params.architectures);

    let mut composed = Vec::with_capacity(paths.len());
    for path in paths {
        let engine = map_input(path)?;
        let header = MachImage::parse(&engine)?.header;
        if !keep(header.cputype, header.cpusubtype) {
            info!("Skipping {} engine {}", header.architecture(), path.display());
            continue;
        }
        info!("Deploying {} engine {}", header.architecture(), path.display());
        composed.push(ComposedSlice {
            cputype: header.cputype,
            cpusubtype: header.cpusubtype,
            align: SPLIT_ENGINE_ALIGN,
            data: deploy_slice(&engine, &job)?,
        });
    }

    match composed.len() {
        0 => Err(Error::NoArchs),
        1 => Ok(composed.remove(0).data),
        _ => write_universal(&composed),
    }
}

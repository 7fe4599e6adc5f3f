//! Architecture names used in filters and minimum-OS tables.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use super::constants::*;

/// A deployable architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Architecture {
    /// Unrecognised CPU; also the fallback key of the minimum-OS table
    #[default]
    Unknown,
    /// 32-bit Intel
    I386,
    /// 64-bit Intel
    X86_64,
    /// ARMv6
    ArmV6,
    /// ARMv7
    ArmV7,
    /// ARMv7s
    ArmV7s,
    /// 64-bit ARM
    Arm64,
    /// 32-bit PowerPC
    Ppc,
    /// 64-bit PowerPC
    Ppc64,
}

impl Architecture {
    /// All named architectures, in display order.
    pub const ALL: [Architecture; 8] = [
        Architecture::I386,
        Architecture::X86_64,
        Architecture::ArmV6,
        Architecture::ArmV7,
        Architecture::ArmV7s,
        Architecture::Arm64,
        Architecture::Ppc,
        Architecture::Ppc64,
    ];

    /// Maps a Mach-O CPU type and subtype to an architecture.
    ///
    /// 32-bit ARM is split by subtype after masking the capability bits;
    /// unlisted ARM subtypes map to [`Architecture::Unknown`].
    pub fn from_cpu(cputype: u32, cpusubtype: u32) -> Self {
        let subtype = cpusubtype & !CPU_SUBTYPE_MASK;
        match cputype {
            CPU_TYPE_X86 => Architecture::I386,
            CPU_TYPE_X86_64 => Architecture::X86_64,
            CPU_TYPE_ARM => match subtype {
                CPU_SUBTYPE_ARM_V6 => Architecture::ArmV6,
                CPU_SUBTYPE_ARM_V7 => Architecture::ArmV7,
                CPU_SUBTYPE_ARM_V7S => Architecture::ArmV7s,
                _ => Architecture::Unknown,
            },
            CPU_TYPE_ARM64 => Architecture::Arm64,
            CPU_TYPE_POWERPC => Architecture::Ppc,
            CPU_TYPE_POWERPC64 => Architecture::Ppc64,
            _ => Architecture::Unknown,
        }
    }

    /// Returns the conventional name, or an empty string for unknown.
    pub fn name(self) -> &'static str {
        match self {
            Architecture::Unknown => "",
            Architecture::I386 => "i386",
            Architecture::X86_64 => "x86_64",
            Architecture::ArmV6 => "armv6",
            Architecture::ArmV7 => "armv7",
            Architecture::ArmV7s => "armv7s",
            Architecture::Arm64 => "arm64",
            Architecture::Ppc => "ppc",
            Architecture::Ppc64 => "ppc64",
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Architecture::Unknown => f.write_str("unknown"),
            arch => f.write_str(arch.name()),
        }
    }
}

/// Error returned when an architecture name is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown architecture '{0}' (expected one of i386, x86_64, armv6, armv7, armv7s, arm64, ppc, ppc64)")]
pub struct ParseArchitectureError(pub String);

impl FromStr for Architecture {
    type Err = ParseArchitectureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        if lower.is_empty() || lower == "unknown" {
            return Ok(Architecture::Unknown);
        }
        Architecture::ALL
            .into_iter()
            .find(|arch| arch.name() == lower)
            .ok_or_else(|| ParseArchitectureError(s.to_string()))
    }
}

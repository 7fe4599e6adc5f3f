//! Engine predicates.
//!
//! Before deploying, each slice is checked to be a standalone engine for the
//! intended platform: the right kind of CPU, and linked against the platform's
//! application framework.

use crate::error::{Error, Result};
use crate::macho::*;

/// Framework every desktop engine links against.
pub const COCOA_FRAMEWORK: &str = "/System/Library/Frameworks/Cocoa.framework";

/// Framework every mobile engine links against.
pub const UIKIT_FRAMEWORK: &str = "/System/Library/Frameworks/UIKit.framework";

/// Checks a desktop engine slice.
pub fn desktop_engine(image: &MachImage) -> Result<()> {
    match image.header.cputype {
        CPU_TYPE_POWERPC | CPU_TYPE_X86 | CPU_TYPE_X86_64 | CPU_TYPE_ARM64 => {}
        other => return Err(Error::BadCpuType(other)),
    }
    require_framework(image, COCOA_FRAMEWORK)
}

/// Checks a mobile engine slice.
pub fn mobile_engine(image: &MachImage) -> Result<()> {
    match image.header.cputype & !CPU_ARCH_ABI64 {
        CPU_TYPE_ARM | CPU_TYPE_X86 => {}
        _ => return Err(Error::BadCpuType(image.header.cputype)),
    }
    require_framework(image, UIKIT_FRAMEWORK)
}

fn require_framework(image: &MachImage, framework: &'static str) -> Result<()> {
    let linked = image
        .dylibs()
        .any(|(cmd, name)| cmd == LC_LOAD_DYLIB && name.starts_with(framework));
    if linked {
        Ok(())
    } else {
        Err(Error::BadTarget { framework })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{EngineBuilder, UIKIT};

    fn image(builder: EngineBuilder) -> MachImage {
        MachImage::parse(&builder.build()).unwrap()
    }

    #[test]
    fn test_desktop_engines() {
        assert!(desktop_engine(&image(EngineBuilder::new())).is_ok());
        assert!(desktop_engine(&image(EngineBuilder::i386())).is_ok());
        assert!(desktop_engine(&image(EngineBuilder::ppc())).is_ok());
        assert!(desktop_engine(&image(EngineBuilder::new().cpu(CPU_TYPE_ARM64, 0))).is_ok());
    }

    #[test]
    fn test_desktop_rejects_mobile() {
        let err = desktop_engine(&image(EngineBuilder::new().cpu(CPU_TYPE_ARM, 9))).unwrap_err();
        assert!(matches!(err, Error::BadCpuType(CPU_TYPE_ARM)));

        let err = desktop_engine(&image(EngineBuilder::new().dylib(UIKIT))).unwrap_err();
        assert!(matches!(
            err,
            Error::BadTarget {
                framework: COCOA_FRAMEWORK
            }
        ));
    }

    #[test]
    fn test_mobile_engines() {
        assert!(mobile_engine(&image(EngineBuilder::ios_arm64())).is_ok());
        assert!(mobile_engine(&image(EngineBuilder::ios_armv7())).is_ok());
        // simulator builds
        assert!(mobile_engine(&image(EngineBuilder::ios_arm64().cpu(CPU_TYPE_X86_64, 3))).is_ok());

        let err = mobile_engine(&image(EngineBuilder::ppc().dylib(UIKIT))).unwrap_err();
        assert!(matches!(err, Error::BadCpuType(CPU_TYPE_POWERPC)));
        assert!(matches!(
            mobile_engine(&image(EngineBuilder::new().cpu(CPU_TYPE_ARM64, 0))),
            Err(Error::BadTarget { .. })
        ));
    }
}

//! machdeploy - A Mach-O executable deploy engine.
//!
//! This library turns a prebuilt engine executable into a standalone
//! application by writing the application's data into reserved segments and
//! relocating everything that follows them. It works on thin and universal
//! binaries, 32 and 64-bit, in either byte order.
//!
//! # Features
//!
//! - Payload and project injection into `__PAYLOAD` / `__PROJECT`
//! - Relocation of `__LINKEDIT` and every load command that points into it
//! - Architecture filtering of universal binaries
//! - Minimum OS version and UUID overrides
//! - Debug symbol stripping ("diet") with symbol index remapping
//! - Section extraction
//!
//! # Example
//!
//! ```no_run
//! use machdeploy::{deploy_to_macos, extract_section, DeployParameters, ExtractParameters};
//!
//! fn main() -> machdeploy::Result<()> {
//!     let params = DeployParameters {
//!         engine: Some("Engine".into()),
//!         project: std::fs::read("stack.bin")?,
//!         output: Some("MyApp".into()),
//!         ..Default::default()
//!     };
//!     deploy_to_macos(&params)?;
//!
//!     // Read the project back
//!     let project = extract_section(&ExtractParameters {
//!         input: "MyApp".into(),
//!         segment: "__PROJECT".into(),
//!         section: "__project".into(),
//!     })?;
//!     assert!(project.len() >= params.project.len());
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod deploy;
pub mod diet;
pub mod error;
pub mod extract;
pub mod macho;
pub mod output;
pub mod util;

#[cfg(test)]
mod testutil;

// Re-export main types
pub use deploy::{DeployParameters, DeployTarget, EngineSource, MinOsVersion};
pub use diet::{diet, diet_bytes, DietArchitectures, DietParameters};
pub use error::{Error, Result};
pub use extract::{extract_section, extract_section_from_bytes, ExtractParameters};
pub use macho::{Architecture, MachImage};

/// Deploys into a desktop (Cocoa) engine.
///
/// # Arguments
///
/// * `params` - Engine(s), project and payload data, filters and output path
///
/// # Returns
///
/// Returns `Ok(())` once the executable has been written, or the first error
/// encountered. Nothing is written on failure.
pub fn deploy_to_macos(params: &DeployParameters) -> Result<()> {
    deploy::deploy(params, DeployTarget::Desktop)
}

/// Deploys into a mobile (UIKit) engine.
///
/// Mobile engines are always a single file; per-architecture engines are
/// rejected with [`Error::NoEngine`].
pub fn deploy_to_ios(params: &DeployParameters) -> Result<()> {
    deploy::deploy(params, DeployTarget::Mobile)
}

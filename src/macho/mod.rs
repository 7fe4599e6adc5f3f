//! Mach-O file format handling.
//!
//! This module provides types and utilities for reading and rewriting Mach-O
//! images and universal binaries in either byte order and either width.

mod arch;
mod command;
mod constants;
pub mod endian;
mod fat;
mod image;
mod structs;
mod width;

pub use arch::*;
pub use command::*;
pub use constants::*;
pub use endian::{ByteSwap, Endian};
pub use fat::*;
pub use image::*;
pub use structs::*;
pub use width::*;

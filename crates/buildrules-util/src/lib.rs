#![forbid(unsafe_code)]
//! Hashing, filesystem, process and download helpers shared by the buildrules crates.

pub mod download;
pub mod error;
pub mod fs;
pub mod hash;
pub mod process;

// src/packages/mod.rs

//! Package header access for the metadata generator
//!
//! The generator consumes package headers through the `PackageReader`
//! trait. `RpmReader` implements it on top of the `rpm` crate.

pub mod rpm;
pub mod traits;

pub use rpm::RpmReader;
pub use traits::{
    ChangelogEntry, Dependency, FileKind, PackageFile, PackageHeader, PackageReader, PackageSizes,
};

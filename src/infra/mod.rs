//! Concrete implementations of the collaborator traits in [`crate::services`],
//! plus the bundled offline data reader.

pub mod assets;
pub mod backend;
pub mod overpass;

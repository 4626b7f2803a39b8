//! Pure Rust loader and rig builder for MikuMikuDance characters and motions.
//!
//! Decodes `.pmd`/`.pmx` models and `.vmd` motions into documents that round-trip
//! byte for byte, converts them to a right-handed frame, and derives the rig,
//! clip and rigid-body bridge a renderer or physics engine consumes. Rendering
//! and the solver itself live outside this crate.

#![forbid(unsafe_code)]

mod clip;
mod convert;
mod error;
mod loader;
mod math;
mod model;
mod pmd;
mod pmx;
mod reader;
mod rig;
mod skeleton;
mod text;
mod vmd;
mod writer;

pub mod physics;

pub use clip::*;
pub use convert::*;
pub use error::*;
pub use loader::*;
pub use math::*;
pub use model::*;
pub use reader::*;
pub use rig::*;
pub use skeleton::*;
pub use text::*;
pub use vmd::*;
pub use writer::*;

#[cfg(test)]
mod test_support;


#[cfg(test)]
mod text_tests;

#[cfg(test)]
mod pmx_tests;


#[cfg(test)]
mod vmd_tests;






#[cfg(all(test, feature = "serde"))]
mod serde_tests;

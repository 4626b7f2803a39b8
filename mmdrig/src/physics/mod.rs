//! Rigid-body physics bridge.
//!
//! The simulation itself is delegated to an engine behind [`PhysicsWorld`].

mod bridge;
mod config;
mod world;

pub use bridge::*;
pub use config::*;
pub use world::*;

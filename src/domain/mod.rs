//! Domain layer - Run snapshots and port definitions
//!
//! This module defines the snapshot types a run passes between stages and
//! the traits (ports) that console and array adapters implement, following
//! hexagonal architecture principles.

pub mod model;
pub mod ports;

pub use model::*;
pub use ports::*;

//! Console and Array Adapters
//!
//! Provides implementations of the domain ports:
//! - HMC dump: inventory from captured console output
//! - JSON file array: array state document for offline rehearsals
//! - Memory: in-memory console and array doubles

pub mod hmc;
pub mod json_array;
pub mod memory;

pub use hmc::*;
pub use json_array::*;
pub use memory::*;

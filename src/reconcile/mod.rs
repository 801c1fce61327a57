//! Reconciler
//!
//! Plan/apply split over one array:
//!
//! - [`state`]: read the actual state of a site
//! - [`plan`]: diff desired against actual into an ordered plan (pure)
//! - [`apply`]: execute a plan, the only side-effecting step
//! - [`consistency`]: cross-site verdicts after both sites are reconciled

pub mod apply;
pub mod consistency;
pub mod plan;
pub mod state;

pub use apply::*;
pub use consistency::*;
pub use plan::*;
pub use state::*;

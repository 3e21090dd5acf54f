//! Breakdown-voltage fitting.
//!
//! Responsibilities:
//!
//! - gate raw sweeps before any fit is attempted
//! - turn the trim current into a filtered, normalized derivative
//! - run the two independent estimators (polynomial peak, pulse shape)
//! - reconcile their estimates into one Vbd + status per channel

pub mod filter;
pub mod poly;
pub mod pulse;
pub mod quality;
pub mod reconcile;

pub use filter::*;
pub use poly::*;
pub use pulse::*;
pub use quality::*;
pub use reconcile::*;

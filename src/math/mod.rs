//! Mathematical utilities: least squares, smoothing, derivatives.

pub mod derivative;
pub mod ols;
pub mod savgol;

pub use derivative::*;
pub use ols::*;
pub use savgol::*;

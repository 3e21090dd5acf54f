//! Run configuration: channel maps and per-channel Vbd corrections.

pub mod map;
pub mod overrides;

pub use map::{ChannelMapSet, EndpointMap, MapVersion};
pub use overrides::{review_overrides_2024, VbdOverride};

//! Process lifecycle: drain coordination and OS signals.

pub mod shutdown;
pub mod signals;

pub use shutdown::{DrainControl, DrainSignal};

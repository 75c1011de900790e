//! Decoding: greedy and beam search over a step interface, and batch
//! translation on top of them.

pub mod beam;
pub mod greedy;
pub mod step;
pub mod translate;

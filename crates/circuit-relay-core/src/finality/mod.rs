//! Finality range relay: forwards justified header ranges of each gateway to the
//! orchestrator, strictly in order and one submission at a time.

pub mod range;
pub mod relay;

pub use range::{PushOutcome, RangeAccumulator};
pub use relay::FinalityRelay;

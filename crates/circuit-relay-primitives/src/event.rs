//! Runtime events emitted by a block.

use serde::{Deserialize, Serialize};

pub const SYSTEM_PALLET: &str = "System";
pub const EXTRINSIC_SUCCESS: &str = "ExtrinsicSuccess";
pub const EXTRINSIC_FAILED: &str = "ExtrinsicFailed";

/// Phase of block execution an event was emitted in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventPhase {
    Initialization,
    /// Emitted while applying the extrinsic with the given index
    ApplyExtrinsic(u32),
    Finalization,
}

/// A single event from a block's event set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainEvent {
    pub phase: EventPhase,
    pub pallet: String,
    pub name: String,
    #[serde(with = "hex::serde")]
    pub payload: Vec<u8>,
}

impl ChainEvent {
    pub fn new(phase: EventPhase, pallet: &str, name: &str, payload: Vec<u8>) -> Self {
        Self {
            phase,
            pallet: pallet.to_string(),
            name: name.to_string(),
            payload,
        }
    }

    pub fn belongs_to_extrinsic(&self, index: u32) -> bool {
        self.phase == EventPhase::ApplyExtrinsic(index)
    }

    pub fn is_extrinsic_success(&self) -> bool {
        self.pallet == SYSTEM_PALLET && self.name == EXTRINSIC_SUCCESS
    }

    pub fn is_extrinsic_failed(&self) -> bool {
        self.pallet == SYSTEM_PALLET && self.name == EXTRINSIC_FAILED
    }
}

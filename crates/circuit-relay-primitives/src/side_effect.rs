//! Side effects: actions requested by the orchestrator to be executed on a gateway.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    bytes::{bytes32, Address},
    gateway::GatewayId,
};

bytes32!(
    /// Unique identifier of a side effect, never reused
    SideEffectId
);

/// Kind of action a side effect performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SideEffectKind {
    Transfer,
    AssetTransfer,
    Swap,
}

impl fmt::Display for SideEffectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SideEffectKind::Transfer => "transfer",
            SideEffectKind::AssetTransfer => "asset-transfer",
            SideEffectKind::Swap => "swap",
        };
        f.write_str(name)
    }
}

/// Typed arguments of a side effect, tagged by kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SideEffectAction {
    /// Native token transfer
    Transfer { to: Address, amount: u128 },
    /// Transfer of a non-native asset
    AssetTransfer {
        asset_id: u32,
        to: Address,
        amount: u128,
    },
    /// Exchange of one asset for another
    Swap {
        asset_in: u32,
        asset_out: u32,
        amount_in: u128,
        min_amount_out: u128,
    },
}

impl SideEffectAction {
    pub fn kind(&self) -> SideEffectKind {
        match self {
            SideEffectAction::Transfer { .. } => SideEffectKind::Transfer,
            SideEffectAction::AssetTransfer { .. } => SideEffectKind::AssetTransfer,
            SideEffectAction::Swap { .. } => SideEffectKind::Swap,
        }
    }
}

/// Lifecycle of a side effect inside the execution relay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SideEffectStatus {
    Pending,
    Submitted,
    AwaitingFinality,
    Finalized,
    Confirmed,
    Failed,
}

impl SideEffectStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SideEffectStatus::Confirmed | SideEffectStatus::Failed)
    }
}

impl fmt::Display for SideEffectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SideEffectStatus::Pending => "pending",
            SideEffectStatus::Submitted => "submitted",
            SideEffectStatus::AwaitingFinality => "awaiting_finality",
            SideEffectStatus::Finalized => "finalized",
            SideEffectStatus::Confirmed => "confirmed",
            SideEffectStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Request to perform an action on a gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SideEffect {
    pub id: SideEffectId,
    pub gateway_id: GatewayId,
    pub action: SideEffectAction,
}

impl SideEffect {
    pub fn kind(&self) -> SideEffectKind {
        self.action.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_json_is_tagged_by_kind() {
        let action = SideEffectAction::Transfer {
            to: Address([2u8; 32]),
            amount: 1_000_000_000_000,
        };
        let json = serde_json::to_value(&action).unwrap();
        assert!(json.get("transfer").is_some());
        assert_eq!(
            serde_json::from_value::<SideEffectAction>(json).unwrap(),
            action
        );
        assert_eq!(action.kind(), SideEffectKind::Transfer);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(SideEffectStatus::Confirmed.is_terminal());
        assert!(SideEffectStatus::Failed.is_terminal());
        assert!(!SideEffectStatus::AwaitingFinality.is_terminal());
        assert!(!SideEffectStatus::Pending.is_terminal());
    }
}

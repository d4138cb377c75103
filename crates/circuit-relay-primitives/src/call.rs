//! Encoded calls, signed transactions and their submission lifecycle.

use std::fmt;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

use crate::{
    bytes::{Address, BlockHash},
    gateway::GatewayId,
    header::{BlockRef, HeaderRange},
    outcome::{InclusionProof, SideEffectFailure, TransactionOutcome},
    side_effect::SideEffectId,
};

pub const FINALITY_PALLET: &str = "finality";
pub const SUBMIT_FINALITY_PROOF: &str = "submit_finality_proof";
pub const SET_OPERATIONAL: &str = "set_operational";
pub const CIRCUIT_PALLET: &str = "circuit";
pub const CONFIRM_SIDE_EFFECT: &str = "confirm_side_effect";
pub const FAIL_SIDE_EFFECT: &str = "fail_side_effect";

#[derive(Error, Debug)]
#[error("Failed to encode or decode call arguments: {0}")]
pub struct CallError(#[from] bincode::Error);

/// Chain a transaction is addressed to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainTarget {
    Orchestrator,
    Gateway(GatewayId),
}

impl fmt::Display for ChainTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainTarget::Orchestrator => f.write_str("circuit"),
            ChainTarget::Gateway(id) => write!(f, "gateway {id}"),
        }
    }
}

/// Runtime call with bincode-encoded arguments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Call {
    pub pallet: String,
    pub method: String,
    pub args: Vec<u8>,
}

impl Call {
    pub fn new<A: Serialize>(pallet: &str, method: &str, args: &A) -> Result<Self, CallError> {
        Ok(Self {
            pallet: pallet.to_string(),
            method: method.to_string(),
            args: bincode::serialize(args)?,
        })
    }

    pub fn is(&self, pallet: &str, method: &str) -> bool {
        self.pallet == pallet && self.method == method
    }

    pub fn decode_args<A: DeserializeOwned>(&self) -> Result<A, CallError> {
        bincode::deserialize(&self.args).map_err(Into::into)
    }
}

impl fmt::Display for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.pallet, self.method)
    }
}

/// Signed transaction ready for submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTx {
    pub call: Call,
    pub signer: Address,
    pub signature: Vec<u8>,
}

impl SignedTx {
    pub fn hash(&self) -> BlockHash {
        let encoded = bincode::serialize(self).unwrap_or_default();
        BlockHash::digest(&encoded)
    }
}

/// Lifecycle notifications of a submitted transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionStatus {
    /// Included in a (not yet final) block at the given extrinsic index
    Included { block: BlockRef, extrinsic_index: u32 },
    /// The including block has been finalized
    Finalized { block: BlockRef, extrinsic_index: u32 },
    /// The chain refused the transaction
    Error(String),
}

/// `finality.submit_finality_proof`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitFinalityProof {
    pub range: HeaderRange,
}

/// `finality.set_operational`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetOperational {
    pub gateway_id: GatewayId,
    pub operational: bool,
}

/// `circuit.confirm_side_effect`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmSideEffect {
    pub id: SideEffectId,
    pub outcome: TransactionOutcome,
    pub proof: InclusionProof,
}

/// `circuit.fail_side_effect`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailSideEffect {
    pub id: SideEffectId,
    pub failure: SideEffectFailure,
}

impl SubmitFinalityProof {
    pub fn to_call(&self) -> Result<Call, CallError> {
        Call::new(FINALITY_PALLET, SUBMIT_FINALITY_PROOF, self)
    }
}

impl SetOperational {
    pub fn to_call(&self) -> Result<Call, CallError> {
        Call::new(FINALITY_PALLET, SET_OPERATIONAL, self)
    }
}

impl ConfirmSideEffect {
    pub fn to_call(&self) -> Result<Call, CallError> {
        Call::new(CIRCUIT_PALLET, CONFIRM_SIDE_EFFECT, self)
    }
}

impl FailSideEffect {
    pub fn to_call(&self) -> Result<Call, CallError> {
        Call::new(CIRCUIT_PALLET, FAIL_SIDE_EFFECT, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_args_decode() {
        let args = SetOperational {
            gateway_id: GatewayId::from("pdot"),
            operational: true,
        };
        let call = args.to_call().unwrap();
        assert!(call.is(FINALITY_PALLET, SET_OPERATIONAL));
        assert!(!call.is(CIRCUIT_PALLET, SET_OPERATIONAL));
        assert_eq!(call.to_string(), "finality.set_operational");
        assert_eq!(call.decode_args::<SetOperational>().unwrap(), args);
    }

    #[test]
    fn test_binary_gateway_id_survives_call_encoding() {
        let args = SetOperational {
            gateway_id: GatewayId::new([0x70, 0xff, 0x00, 0x9f]),
            operational: true,
        };
        let decoded = args.to_call().unwrap().decode_args::<SetOperational>().unwrap();
        assert_eq!(decoded.gateway_id.as_bytes(), &[0x70, 0xff, 0x00, 0x9f]);
    }

    #[test]
    fn test_decode_into_wrong_type_fails() {
        let call = Call::new("balances", "transfer", &1u8).unwrap();
        assert!(call.decode_args::<SetOperational>().is_err());
    }
}

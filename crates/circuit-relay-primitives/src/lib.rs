//! Data model shared by the circuit relay crates: gateways, finalized headers and
//! justifications, header ranges, side effects, encoded calls and transaction outcomes.

pub mod bytes;
pub mod call;
pub mod event;
pub mod gateway;
pub mod header;
pub mod outcome;
pub mod side_effect;

pub use bytes::{Address, BlockHash};
pub use call::{Call, CallError, ChainTarget, SignedTx, TransactionStatus};
pub use event::{ChainEvent, EventPhase};
pub use gateway::{Endpoint, Gateway, GatewayId, GatewayState};
pub use header::{BlockNumber, BlockRef, Header, HeaderRange, Justification, RangeError};
pub use outcome::{ErrorKind, InclusionProof, SideEffectFailure, TransactionOutcome};
pub use side_effect::{SideEffect, SideEffectAction, SideEffectId, SideEffectKind, SideEffectStatus};

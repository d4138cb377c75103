//! Mapping of side effect kinds to gateway runtime calls and their business events.

use circuit_relay_primitives::{
    Call, ChainEvent, Gateway, SideEffectAction, SideEffectKind,
};

use crate::error::RelayError;

/// Runtime dispatch of a side effect kind on a gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dispatch {
    pub pallet: &'static str,
    pub method: &'static str,
    /// Event proving the action took place, as `(pallet, name)`
    pub expected_event: (&'static str, &'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionSpec {
    pub kind: SideEffectKind,
    /// `None` when no gateway runtime can execute the kind
    pub dispatch: Option<Dispatch>,
}

pub const ACTIONS: &[ActionSpec] = &[
    ActionSpec {
        kind: SideEffectKind::Transfer,
        dispatch: Some(Dispatch {
            pallet: "balances",
            method: "transfer",
            expected_event: ("Balances", "Transfer"),
        }),
    },
    ActionSpec {
        kind: SideEffectKind::AssetTransfer,
        dispatch: Some(Dispatch {
            pallet: "assets",
            method: "transfer",
            expected_event: ("Assets", "Transferred"),
        }),
    },
    ActionSpec {
        kind: SideEffectKind::Swap,
        dispatch: None,
    },
];

/// Dispatch of a side effect kind on a specific gateway
pub fn dispatch_for(gateway: &Gateway, kind: SideEffectKind) -> Result<Dispatch, RelayError> {
    let unsupported = || RelayError::UnsupportedSideEffectType {
        kind,
        gateway_id: gateway.id.clone(),
    };
    if !gateway.allows(kind) {
        return Err(unsupported());
    }
    ACTIONS
        .iter()
        .find(|spec| spec.kind == kind)
        .and_then(|spec| spec.dispatch)
        .ok_or_else(unsupported)
}

impl Dispatch {
    /// Gateway call carrying the action's arguments
    pub fn call(&self, action: &SideEffectAction) -> Result<Call, RelayError> {
        Ok(Call::new(self.pallet, self.method, action)?)
    }

    pub fn is_expected_event(&self, event: &ChainEvent) -> bool {
        let (pallet, name) = self.expected_event;
        event.pallet == pallet && event.name == name
    }

    pub fn expected_event_name(&self) -> String {
        format!("{}.{}", self.expected_event.0, self.expected_event.1)
    }
}

/// What the events of one extrinsic say about its execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtrinsicEvents {
    /// The last event of the extrinsic is `System.ExtrinsicSuccess`
    pub success: bool,
    /// Payload of the expected business event, if emitted
    pub event_payload: Option<Vec<u8>>,
}

/// Inspect only the events emitted while applying the extrinsic at `extrinsic_index`.
///
/// Events of other extrinsics in the same block never influence the result.
pub fn inspect_events(
    events: &[ChainEvent],
    extrinsic_index: u32,
    dispatch: &Dispatch,
) -> ExtrinsicEvents {
    let own: Vec<&ChainEvent> = events
        .iter()
        .filter(|event| event.belongs_to_extrinsic(extrinsic_index))
        .collect();
    let success = own
        .last()
        .map_or(false, |event| event.is_extrinsic_success());
    let event_payload = own
        .iter()
        .find(|event| dispatch.is_expected_event(event))
        .map(|event| event.payload.clone());
    ExtrinsicEvents {
        success,
        event_payload,
    }
}

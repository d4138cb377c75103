//! Gateway identity, endpoints and operational state.

use std::{fmt, str::FromStr};

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::{header::BlockRef, side_effect::SideEffectKind};

/// Opaque gateway identifier, e.g. `pdot`.
///
/// Binary codecs carry the raw bytes. The text form (JSON, logs, URLs) is the id itself
/// when it is UTF-8 without a `0x` prefix, and `0x`-prefixed hex otherwise.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GatewayId(Vec<u8>);

impl GatewayId {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    fn as_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.0)
            .ok()
            .filter(|text| !text.starts_with("0x"))
    }
}

impl From<&str> for GatewayId {
    fn from(value: &str) -> Self {
        Self(value.as_bytes().to_vec())
    }
}

impl From<String> for GatewayId {
    fn from(value: String) -> Self {
        Self(value.into_bytes())
    }
}

/// Parses the text form; `0x` followed by valid hex is taken as raw bytes
impl FromStr for GatewayId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = s
            .strip_prefix("0x")
            .and_then(|digits| hex::decode(digits).ok())
            .map(Self)
            .unwrap_or_else(|| Self::from(s));
        Ok(id)
    }
}

impl fmt::Display for GatewayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_text() {
            Some(text) => f.write_str(text),
            None => write!(f, "0x{}", hex::encode(&self.0)),
        }
    }
}

impl fmt::Debug for GatewayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GatewayId({self})")
    }
}

impl Serialize for GatewayId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.collect_str(self)
        } else {
            self.0.serialize(serializer)
        }
    }
}

impl<'de> Deserialize<'de> for GatewayId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let text = String::deserialize(deserializer)?;
            text.parse().map_err(de::Error::custom)
        } else {
            Vec::<u8>::deserialize(deserializer).map(Self)
        }
    }
}

/// Connection descriptor of a gateway node, e.g. a websocket URL
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Endpoint(pub String);

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Endpoint {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Operational state of a gateway as tracked by the relay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayState {
    /// Known to the relay but not yet acknowledged by the orchestrator
    Registered,
    /// Acknowledged by the orchestrator, data is relayed
    Operational,
    /// Relaying halted until the gateway is re-activated
    Suspended,
}

impl fmt::Display for GatewayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GatewayState::Registered => "registered",
            GatewayState::Operational => "operational",
            GatewayState::Suspended => "suspended",
        };
        f.write_str(name)
    }
}

/// A configured gateway chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gateway {
    pub id: GatewayId,
    /// Primary endpoint first, fallbacks after
    pub endpoints: Vec<Endpoint>,
    pub state: GatewayState,
    /// Anchor of the last finality proof acknowledged by the orchestrator
    pub last_relayed_block: Option<BlockRef>,
    /// Side effect kinds this gateway accepts
    pub allowed_side_effects: Vec<SideEffectKind>,
}

impl Gateway {
    pub fn new(
        id: GatewayId,
        endpoints: Vec<Endpoint>,
        allowed_side_effects: Vec<SideEffectKind>,
    ) -> Self {
        Self {
            id,
            endpoints,
            state: GatewayState::Registered,
            last_relayed_block: None,
            allowed_side_effects,
        }
    }

    pub fn is_operational(&self) -> bool {
        self.state == GatewayState::Operational
    }

    pub fn allows(&self, kind: SideEffectKind) -> bool {
        self.allowed_side_effects.contains(&kind)
    }

    pub fn last_relayed_number(&self) -> Option<u64> {
        self.last_relayed_block.map(|block| block.number)
    }
}

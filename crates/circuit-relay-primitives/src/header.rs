//! Finalized headers, finality justifications and contiguous header ranges.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{bytes::BlockHash, gateway::GatewayId};

pub type BlockNumber = u64;

/// Reference to a block by number and hash
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockRef {
    pub number: BlockNumber,
    pub hash: BlockHash,
}

impl BlockRef {
    pub fn new(number: BlockNumber, hash: BlockHash) -> Self {
        Self { number, hash }
    }
}

impl fmt::Display for BlockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} ({})", self.number, self.hash)
    }
}

/// Block header as seen by the relay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub number: BlockNumber,
    pub hash: BlockHash,
    pub parent_hash: BlockHash,
    pub state_root: BlockHash,
}

impl Header {
    pub fn block_ref(&self) -> BlockRef {
        BlockRef::new(self.number, self.hash)
    }

    /// Whether `child` directly extends this header
    pub fn is_parent_of(&self, child: &Header) -> bool {
        child.parent_hash == self.hash && self.number.checked_add(1) == Some(child.number)
    }
}

/// Finality justification for a single block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Justification {
    /// Block the justification finalizes
    pub block: BlockRef,
    /// Consensus-specific encoded proof
    #[serde(with = "hex::serde")]
    pub encoded: Vec<u8>,
}

impl Justification {
    pub fn justifies(&self, header: &Header) -> bool {
        self.block == header.block_ref()
    }
}

/// Reasons a sequence of headers cannot form a relayable range
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RangeError {
    #[error("header range is empty")]
    Empty,
    #[error("header #{at} does not extend its predecessor")]
    NonContiguous { at: BlockNumber },
    #[error("justification does not cover anchor #{anchor}")]
    UnjustifiedAnchor { anchor: BlockNumber },
}

/// A contiguous, non-empty sequence of finalized headers whose last header (the anchor)
/// is covered by a finality justification.
///
/// Constructed only through [`HeaderRange::new`], which enforces both invariants; the
/// serde representation is validated on the way in as well.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "HeaderRangeParts")]
pub struct HeaderRange {
    gateway_id: GatewayId,
    headers: Vec<Header>,
    justification: Justification,
}

#[derive(Deserialize)]
struct HeaderRangeParts {
    gateway_id: GatewayId,
    headers: Vec<Header>,
    justification: Justification,
}

impl TryFrom<HeaderRangeParts> for HeaderRange {
    type Error = RangeError;

    fn try_from(parts: HeaderRangeParts) -> Result<Self, Self::Error> {
        HeaderRange::new(parts.gateway_id, parts.headers, parts.justification)
    }
}

impl HeaderRange {
    pub fn new(
        gateway_id: GatewayId,
        headers: Vec<Header>,
        justification: Justification,
    ) -> Result<Self, RangeError> {
        let anchor = headers.last().ok_or(RangeError::Empty)?;
        if !justification.justifies(anchor) {
            return Err(RangeError::UnjustifiedAnchor {
                anchor: anchor.number,
            });
        }
        if let Some(pair) = headers.windows(2).find(|pair| !pair[0].is_parent_of(&pair[1])) {
            return Err(RangeError::NonContiguous { at: pair[1].number });
        }
        Ok(Self {
            gateway_id,
            headers,
            justification,
        })
    }

    pub fn gateway_id(&self) -> &GatewayId {
        &self.gateway_id
    }

    pub fn headers(&self) -> &[Header] {
        &self.headers
    }

    pub fn justification(&self) -> &Justification {
        &self.justification
    }

    /// Last header of the range, the one the justification finalizes
    pub fn anchor(&self) -> &Header {
        // Non-empty by construction
        &self.headers[self.headers.len() - 1]
    }

    pub fn first(&self) -> &Header {
        &self.headers[0]
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

impl fmt::Display for HeaderRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} #{}..#{}",
            self.gateway_id,
            self.first().number,
            self.anchor().number
        )
    }
}

//! Accumulation of finalized headers into justified, contiguous ranges.

use std::{collections::BTreeMap, time::Duration};

use tokio::time::Instant;

use circuit_relay_primitives::{
    BlockNumber, BlockRef, GatewayId, Header, HeaderRange, Justification, RangeError,
};

/// Result of offering a header to the accumulator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    Appended,
    /// At or below the current tip, already buffered or relayed
    Stale,
    /// Does not extend the tip; headers between `tip` and the offered one are missing
    Gap { tip: BlockRef },
}

/// Buffer of finalized headers waiting to be relayed for one gateway.
///
/// Headers are only ever appended when they extend the current tip, so the buffer is
/// always a contiguous chain. A range is cut when the buffer is full or its oldest header
/// has waited `range_interval`, and always ends at a justified header.
#[derive(Debug)]
pub struct RangeAccumulator {
    gateway_id: GatewayId,
    batch_max_size: usize,
    range_interval: Duration,
    headers: Vec<Header>,
    justifications: BTreeMap<BlockNumber, Justification>,
    /// Last header appended, or the last relayed anchor while the buffer is empty
    tip: Option<BlockRef>,
    started_at: Option<Instant>,
}

impl RangeAccumulator {
    pub fn new(
        gateway_id: GatewayId,
        batch_max_size: usize,
        range_interval: Duration,
        tip: Option<BlockRef>,
    ) -> Self {
        Self {
            gateway_id,
            batch_max_size: batch_max_size.max(1),
            range_interval,
            headers: Vec::new(),
            justifications: BTreeMap::new(),
            tip,
            started_at: None,
        }
    }

    pub fn tip(&self) -> Option<BlockRef> {
        self.tip
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    pub fn push(&mut self, header: Header, now: Instant) -> PushOutcome {
        if let Some(tip) = self.tip {
            if header.number <= tip.number {
                return PushOutcome::Stale;
            }
            if tip.number.checked_add(1) != Some(header.number) || header.parent_hash != tip.hash {
                return PushOutcome::Gap { tip };
            }
        }
        if self.headers.is_empty() {
            self.started_at = Some(now);
        }
        self.tip = Some(header.block_ref());
        self.headers.push(header);
        PushOutcome::Appended
    }

    /// Append headers recovered to close a gap, oldest first
    pub fn fill_gap(&mut self, headers: Vec<Header>, now: Instant) -> Result<(), RangeError> {
        for header in headers {
            let number = header.number;
            if self.push(header, now) != PushOutcome::Appended {
                return Err(RangeError::NonContiguous { at: number });
            }
        }
        Ok(())
    }

    /// Remember a justification; returns `false` if it can never be used
    pub fn add_justification(&mut self, justification: Justification) -> bool {
        let number = justification.block.number;
        let covers_buffered = self
            .headers
            .iter()
            .any(|header| justification.justifies(header));
        let ahead_of_tip = self.tip.map_or(true, |tip| number > tip.number);
        if covers_buffered || ahead_of_tip {
            self.justifications.insert(number, justification);
            true
        } else {
            false
        }
    }

    fn justified_indexes(&self) -> Vec<usize> {
        self.headers
            .iter()
            .enumerate()
            .filter(|(_, header)| {
                self.justifications
                    .get(&header.number)
                    .map_or(false, |justification| justification.justifies(header))
            })
            .map(|(index, _)| index)
            .collect()
    }

    /// Instant at which the buffered headers are due, `None` while nothing can be cut.
    pub fn deadline(&self) -> Option<Instant> {
        let started_at = self.started_at?;
        if self.justified_indexes().is_empty() {
            return None;
        }
        Some(started_at + self.range_interval)
    }

    /// Cut the next range if the buffer is full or overdue.
    ///
    /// The range ends at the latest justified header that keeps it within the batch
    /// size. If no justified header fits, the earliest justified header is used so the
    /// relay never stalls on a long unjustified stretch.
    pub fn take_ready(&mut self, now: Instant) -> Result<Option<HeaderRange>, RangeError> {
        if self.headers.is_empty() {
            return Ok(None);
        }
        let full = self.headers.len() >= self.batch_max_size;
        let overdue = self
            .started_at
            .map_or(false, |started_at| now >= started_at + self.range_interval);
        if !full && !overdue {
            return Ok(None);
        }

        let justified = self.justified_indexes();
        let cut = justified
            .iter()
            .copied()
            .filter(|index| *index < self.batch_max_size)
            .last()
            .or_else(|| justified.first().copied());
        let Some(cut) = cut else {
            return Ok(None);
        };

        let rest = self.headers.split_off(cut + 1);
        let headers = std::mem::replace(&mut self.headers, rest);
        let anchor = headers[cut].number;
        let justification = self
            .justifications
            .remove(&anchor)
            .ok_or(RangeError::UnjustifiedAnchor { anchor })?;
        self.justifications = match anchor.checked_add(1) {
            Some(next) => self.justifications.split_off(&next),
            None => BTreeMap::new(),
        };
        self.started_at = if self.headers.is_empty() {
            None
        } else {
            Some(now)
        };

        HeaderRange::new(self.gateway_id.clone(), headers, justification).map(Some)
    }
}

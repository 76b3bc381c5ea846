//! Cursor over every primitive in an id range.
//!
//! Local ids are dense, so "all primitives in `[low, high)`" is the integer
//! range clipped to the store's current size. This is the hint cursor of a
//! linksto with no hint restriction.

use crate::budget::Budget;
use crate::error::{Budgeted, EngineError, Interrupt};
use crate::freeze::{write_span, Scanner};
use crate::iter::{Cursor, CursorStats, Node, PrimitiveSummary, RangeEstimate, Restriction};
use crate::pdb::{cost, Id, Store};

pub(crate) struct AllNode {
    store: Store,
    low: Id,
    high: Id,
    forward: bool,
    /// Ids handed out so far.
    consumed: u64,
    last: Option<Id>,
}

impl AllNode {
    pub fn new(store: Store, low: Id, high: Id, forward: bool) -> AllNode {
        AllNode {
            store,
            low,
            high,
            forward,
            consumed: 0,
            last: None,
        }
    }

    /// Bounds clipped to the primitives that actually exist.
    fn clipped(&self) -> (Id, Id) {
        let n = self.store.primitive_n();
        (self.low.min(n), self.high.min(n))
    }

    fn span_len(&self) -> u64 {
        let (low, high) = self.clipped();
        high.saturating_sub(low)
    }

    pub fn next(&mut self, b: &mut Budget) -> Budgeted<Id> {
        b.check()?;
        if self.consumed >= self.span_len() {
            return Err(Interrupt::No);
        }
        let (low, high) = self.clipped();
        let id = if self.forward {
            low + self.consumed
        } else {
            high - 1 - self.consumed
        };
        self.consumed += 1;
        self.last = Some(id);
        b.charge(cost::FUNCTION_CALL);
        Ok(id)
    }

    pub fn find(&mut self, b: &mut Budget, target: Id) -> Budgeted<Id> {
        b.charge(cost::FUNCTION_CALL);
        let (low, high) = self.clipped();
        let id = if self.forward {
            target.max(low)
        } else {
            target.min(high.saturating_sub(1))
        };
        let in_range = id >= low && id < high && (!self.forward || id >= target) && (self.forward || id <= target);
        if !in_range {
            self.consumed = self.span_len();
            return Err(Interrupt::No);
        }
        self.consumed = if self.forward { id - low + 1 } else { high - id };
        self.last = Some(id);
        Ok(id)
    }

    pub fn check(&mut self, b: &mut Budget, id: Id) -> Budgeted<bool> {
        b.charge(cost::FUNCTION_CALL);
        let (low, high) = self.clipped();
        Ok(id >= low && id < high)
    }

    pub fn statistics_step(&mut self, _b: &mut Budget) -> Budgeted<()> {
        Ok(())
    }

    pub fn reset(&mut self) {
        self.consumed = 0;
        self.last = None;
    }

    pub fn clone_node(&self) -> AllNode {
        AllNode {
            store: self.store.clone(),
            low: self.low,
            high: self.high,
            forward: self.forward,
            consumed: self.consumed,
            last: self.last,
        }
    }

    pub fn stats(&self) -> Option<CursorStats> {
        Some(CursorStats {
            n: self.span_len(),
            next_cost: cost::FUNCTION_CALL,
            check_cost: cost::FUNCTION_CALL,
            find_cost: cost::FUNCTION_CALL,
            sorted: true,
            ordered: true,
        })
    }

    pub fn freeze_set(&self, out: &mut String) -> Result<(), EngineError> {
        out.push_str("all:");
        write_span(out, self.forward, self.low, self.high);
        Ok(())
    }

    pub fn freeze_position(&self, out: &mut String) -> Result<(), EngineError> {
        match self.last {
            Some(id) => out.push_str(&id.to_string()),
            None => out.push('-'),
        }
        Ok(())
    }

    pub fn freeze_state(&self, out: &mut String) -> Result<(), EngineError> {
        out.push('-');
        Ok(())
    }

    pub fn primitive_summary(&self) -> Option<PrimitiveSummary> {
        None
    }

    pub fn range_estimate(&self) -> RangeEstimate {
        let (low, high) = self.clipped();
        RangeEstimate {
            low,
            high,
            n_exact: Some(self.span_len()),
            n_max: Some(self.span_len()),
            low_rising: self.forward,
        }
    }

    pub fn restrict(&self, _ps: &PrimitiveSummary) -> Result<Restriction, EngineError> {
        Ok(Restriction::Unchanged)
    }

    pub fn beyond(&self, value: Id) -> bool {
        match self.last {
            Some(last) => {
                if self.forward {
                    last >= value
                } else {
                    last <= value
                }
            }
            None => false,
        }
    }

    pub fn low(&self) -> Id {
        self.low
    }

    pub fn high(&self) -> Id {
        self.high
    }

    pub fn forward(&self) -> bool {
        self.forward
    }

    pub fn last_returned(&self) -> Option<Id> {
        self.last
    }

    pub fn replay(&mut self, last: Option<Id>) {
        let Some(last) = last else { return };
        let (low, high) = self.clipped();
        self.last = Some(last);
        self.consumed = if self.forward {
            (last + 1).saturating_sub(low).min(self.span_len())
        } else {
            high.saturating_sub(last)
        };
    }
}

/// Cursor over all primitives with ids in `[low, high)`.
pub fn all_cursor(store: &Store, low: Id, high: Id, forward: bool) -> Cursor {
    Cursor::from_node(Node::All(AllNode::new(store.clone(), low, high, forward)))
}

pub(crate) fn thaw(store: &Store, set: &str, position: Option<&str>) -> Result<Cursor, EngineError> {
    let mut s = Scanner::new(set);
    s.expect_tag("all:")?;
    let (forward, low, high) = s.span()?;
    s.expect_done("all cursor")?;
    let cursor = all_cursor(store, low, high, forward);
    if let Some(pos) = position {
        let mut p = Scanner::new(pos);
        if let Some(last) = p.opt_u64()? {
            cursor.with_node_mut(|n| n.replay(Some(last)));
        }
    }
    Ok(cursor)
}

//! The empty cursor.

use crate::budget::Budget;
use crate::error::{Budgeted, EngineError, Interrupt};
use crate::freeze::{write_span, Scanner};
use crate::iter::{Cursor, CursorStats, Node, PrimitiveSummary, RangeEstimate, Restriction};
use crate::pdb::Id;

pub(crate) struct NullNode {
    low: Id,
    high: Id,
    forward: bool,
}

impl NullNode {
    pub fn new(low: Id, high: Id, forward: bool) -> NullNode {
        NullNode { low, high, forward }
    }

    pub fn next(&mut self, _b: &mut Budget) -> Budgeted<Id> {
        Err(Interrupt::No)
    }

    pub fn find(&mut self, _b: &mut Budget, _target: Id) -> Budgeted<Id> {
        Err(Interrupt::No)
    }

    pub fn check(&mut self, _b: &mut Budget, _id: Id) -> Budgeted<bool> {
        Ok(false)
    }

    pub fn statistics_step(&mut self, _b: &mut Budget) -> Budgeted<()> {
        Ok(())
    }

    pub fn reset(&mut self) {}

    pub fn clone_node(&self) -> NullNode {
        NullNode::new(self.low, self.high, self.forward)
    }

    pub fn stats(&self) -> Option<CursorStats> {
        Some(CursorStats {
            n: 0,
            next_cost: 0,
            check_cost: 0,
            find_cost: 0,
            sorted: true,
            ordered: true,
        })
    }

    pub fn freeze_set(&self, out: &mut String) -> Result<(), EngineError> {
        out.push_str("null:");
        write_span(out, self.forward, self.low, self.high);
        Ok(())
    }

    pub fn freeze_position(&self, out: &mut String) -> Result<(), EngineError> {
        out.push('-');
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
        RangeEstimate {
            low: self.low,
            high: self.low,
            n_exact: Some(0),
            n_max: Some(0),
            low_rising: self.forward,
        }
    }

    pub fn restrict(&self, _ps: &PrimitiveSummary) -> Result<Restriction, EngineError> {
        Ok(Restriction::Unchanged)
    }

    pub fn beyond(&self, _value: Id) -> bool {
        true
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
        None
    }

    pub fn replay(&mut self, _last: Option<Id>) {}
}

/// Fresh empty cursor.
pub fn null_cursor(low: Id, high: Id, forward: bool) -> Cursor {
    Cursor::from_node(Node::Null(NullNode::new(low, high, forward)))
}

pub(crate) fn thaw(set: &str) -> Result<Cursor, EngineError> {
    let mut s = Scanner::new(set);
    s.expect_tag("null:")?;
    let (forward, low, high) = s.span()?;
    s.expect_done("null cursor")?;
    Ok(null_cursor(low, high, forward))
}

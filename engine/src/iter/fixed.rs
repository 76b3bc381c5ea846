//! Materialized id-set cursor.
//!
//! Holds an ascending, deduplicated id array. Preevaluation and mid-planning
//! morphs produce these; a masquerade string installed at that point makes
//! the frozen form reproduce the originating linksto specification instead
//! of the raw set.

use crate::budget::Budget;
use crate::error::{Budgeted, EngineError, Interrupt};
use crate::freeze::{write_span, Scanner};
use crate::iter::{Cursor, CursorStats, Node, PrimitiveSummary, RangeEstimate, Restriction};
use crate::pdb::{cost, Id};
use itertools::Itertools;
use std::rc::Rc;

pub(crate) struct FixedNode {
    /// Ascending, deduplicated, all within `[low, high)`.
    ids: Rc<[Id]>,
    low: Id,
    high: Id,
    forward: bool,
    /// Ids handed out so far, in iteration order.
    consumed: usize,
    last: Option<Id>,
    masquerade: Option<Rc<str>>,
}

impl FixedNode {
    pub fn new(mut ids: Vec<Id>, low: Id, high: Id, forward: bool) -> FixedNode {
        ids.retain(|&id| id >= low && id < high);
        ids.sort_unstable();
        ids.dedup();
        FixedNode {
            ids: Rc::from(ids),
            low,
            high,
            forward,
            consumed: 0,
            last: None,
            masquerade: None,
        }
    }

    pub fn set_masquerade(&mut self, masquerade: Rc<str>) {
        self.masquerade = Some(masquerade);
    }

    fn len(&self) -> usize {
        self.ids.len()
    }

    /// Array index of the next id to hand out.
    fn cursor_index(&self) -> Option<usize> {
        if self.consumed >= self.len() {
            return None;
        }
        Some(if self.forward {
            self.consumed
        } else {
            self.len() - 1 - self.consumed
        })
    }

    pub fn next(&mut self, b: &mut Budget) -> Budgeted<Id> {
        b.check()?;
        let Some(idx) = self.cursor_index() else {
            return Err(Interrupt::No);
        };
        b.charge(cost::GMAP_ELEMENT);
        let id = self.ids[idx];
        self.consumed += 1;
        self.last = Some(id);
        Ok(id)
    }

    pub fn find(&mut self, b: &mut Budget, target: Id) -> Budgeted<Id> {
        b.charge(cost::GMAP_ARRAY);
        if self.forward {
            let idx = self.ids.partition_point(|&id| id < target);
            if idx == self.len() {
                self.consumed = self.len();
                return Err(Interrupt::No);
            }
            self.consumed = idx + 1;
            self.last = Some(self.ids[idx]);
            Ok(self.ids[idx])
        } else {
            // greatest id <= target
            let gt = self.ids.partition_point(|&id| id <= target);
            if gt == 0 {
                self.consumed = self.len();
                return Err(Interrupt::No);
            }
            let idx = gt - 1;
            self.consumed = self.len() - idx;
            self.last = Some(self.ids[idx]);
            Ok(self.ids[idx])
        }
    }

    pub fn check(&mut self, b: &mut Budget, id: Id) -> Budgeted<bool> {
        b.charge(cost::FUNCTION_CALL);
        Ok(self.ids.binary_search(&id).is_ok())
    }

    pub fn statistics_step(&mut self, _b: &mut Budget) -> Budgeted<()> {
        Ok(())
    }

    pub fn reset(&mut self) {
        self.consumed = 0;
        self.last = None;
    }

    pub fn clone_node(&self) -> FixedNode {
        FixedNode {
            ids: self.ids.clone(),
            low: self.low,
            high: self.high,
            forward: self.forward,
            consumed: self.consumed,
            last: self.last,
            masquerade: self.masquerade.clone(),
        }
    }

    pub fn stats(&self) -> Option<CursorStats> {
        Some(CursorStats {
            n: self.len() as u64,
            next_cost: cost::GMAP_ELEMENT,
            check_cost: cost::FUNCTION_CALL,
            find_cost: cost::GMAP_ARRAY,
            sorted: true,
            ordered: true,
        })
    }

    pub fn freeze_set(&self, out: &mut String) -> Result<(), EngineError> {
        if let Some(masq) = &self.masquerade {
            out.push_str(masq);
            return Ok(());
        }
        out.push_str("fixed:");
        write_span(out, self.forward, self.low, self.high);
        out.push_str(":(");
        out.push_str(&self.ids.iter().join(","));
        out.push(')');
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
        RangeEstimate {
            low: self.ids.first().copied().unwrap_or(self.low),
            high: self.ids.last().map(|&id| id + 1).unwrap_or(self.low),
            n_exact: Some(self.len() as u64),
            n_max: Some(self.len() as u64),
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
        self.last = Some(last);
        self.consumed = if self.forward {
            self.ids.partition_point(|&id| id <= last)
        } else {
            self.len() - self.ids.partition_point(|&id| id < last)
        };
    }
}

/// Cursor over a materialized id set.
pub fn fixed_cursor(ids: Vec<Id>, low: Id, high: Id, forward: bool) -> Cursor {
    Cursor::from_node(Node::Fixed(FixedNode::new(ids, low, high, forward)))
}

pub(crate) fn thaw(set: &str, position: Option<&str>) -> Result<Cursor, EngineError> {
    let mut s = Scanner::new(set);
    s.expect_tag("fixed:")?;
    let (forward, low, high) = s.span()?;
    s.expect(':')?;
    let inner = s.group()?;
    s.expect_done("fixed cursor")?;
    let mut ids = Vec::new();
    if !inner.is_empty() {
        for part in inner.split(',') {
            let mut p = Scanner::new(part);
            ids.push(p.u64_val()?);
            p.expect_done("fixed id")?;
        }
    }
    if !ids.windows(2).all(|w| w[0] < w[1]) {
        return Err(EngineError::BadCursor("fixed ids not ascending".into()));
    }
    let cursor = Cursor::from_node(Node::Fixed(FixedNode::new(ids, low, high, forward)));
    if let Some(pos) = position {
        let mut p = Scanner::new(pos);
        if let Some(last) = p.opt_u64()? {
            cursor.with_node_mut(|n| n.replay(Some(last)));
        }
    }
    Ok(cursor)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::freeze::FreezeFlags;
    use crate::pdb::ID_MAX;

    #[test]
    fn forward_enumeration_and_find() {
        let c = fixed_cursor(vec![30, 10, 20, 20], 0, ID_MAX, true);
        let mut b = Budget::new(1000);
        assert_eq!(c.next(&mut b).unwrap(), 10);
        assert_eq!(c.find(&mut b, 15).unwrap(), 20);
        assert_eq!(c.next(&mut b).unwrap(), 30);
        assert!(c.next(&mut b).unwrap_err().is_no());
    }

    #[test]
    fn backward_enumeration() {
        let c = fixed_cursor(vec![10, 20, 30], 0, ID_MAX, false);
        let mut b = Budget::new(1000);
        assert_eq!(c.next(&mut b).unwrap(), 30);
        assert_eq!(c.find(&mut b, 19).unwrap(), 10);
        assert!(c.next(&mut b).unwrap_err().is_no());
    }

    #[test]
    fn bounds_clip_ids() {
        let c = fixed_cursor(vec![5, 10, 15], 6, 15, true);
        let mut b = Budget::new(1000);
        assert_eq!(c.next(&mut b).unwrap(), 10);
        assert!(c.next(&mut b).unwrap_err().is_no());
    }

    #[test]
    fn freeze_thaw_keeps_position() {
        let c = fixed_cursor(vec![1, 2, 3], 0, ID_MAX, true);
        let mut b = Budget::new(1000);
        c.next(&mut b).unwrap();
        c.next(&mut b).unwrap();
        let frozen = c.freeze(FreezeFlags::SET | FreezeFlags::POSITION).unwrap();
        assert_eq!(frozen, "fixed:+0:(1,2,3)/2");
        let thawed = thaw("fixed:+0:(1,2,3)", Some("2")).unwrap();
        assert_eq!(thawed.next(&mut b).unwrap(), 3);
    }
}

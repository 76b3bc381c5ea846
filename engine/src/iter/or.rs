//! Union cursor: deduplicating k-way merge over sorted parts.
//!
//! Each part contributes a head slot; `next` refills pending heads (any
//! refill may suspend), then hands out the minimum (maximum when backward)
//! and consumes it from every part that produced it, which deduplicates.
//! With seven or more parts a membership probe against every part gets
//! expensive, so preevaluation may attach a paired check cursor that
//! `check` delegates to.

use crate::budget::Budget;
use crate::error::{Budgeted, EngineError, Interrupt};
use crate::freeze::{split_top, write_span, Scanner};
use crate::iter::{Cursor, CursorStats, Node, PrimitiveSummary, RangeEstimate, Restriction};
use crate::pdb::{cost, Id, Store};
use itertools::Itertools;
use std::rc::Rc;

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
enum Head {
    /// Needs a refill from the part.
    Pending,
    Eof,
    Val(Id),
}

pub(crate) struct OrNode {
    parts: Vec<Cursor>,
    heads: Vec<Head>,
    low: Id,
    high: Id,
    forward: bool,
    last: Option<Id>,
    /// Paired cursor answering membership probes, when present.
    check_alt: Option<Cursor>,
    /// Resumable scan positions.
    check_pos: usize,
    stats_pos: usize,
    find_target: Option<Id>,
    find_pos: usize,
    stats: Option<CursorStats>,
    masquerade: Option<Rc<str>>,
}

impl OrNode {
    pub fn new(parts: Vec<Cursor>, low: Id, high: Id, forward: bool) -> OrNode {
        let heads = vec![Head::Pending; parts.len()];
        OrNode {
            parts,
            heads,
            low,
            high,
            forward,
            last: None,
            check_alt: None,
            check_pos: 0,
            stats_pos: 0,
            find_target: None,
            find_pos: 0,
            stats: None,
            masquerade: None,
        }
    }

    pub fn set_check_alt(&mut self, alt: Cursor) {
        self.check_alt = Some(alt);
    }

    pub fn set_masquerade(&mut self, masquerade: Rc<str>) {
        self.masquerade = Some(masquerade);
    }

    pub fn part_count(&self) -> usize {
        self.parts.len()
    }

    /// Refill every pending head; suspends with the heads table intact.
    fn refill(&mut self, b: &mut Budget) -> Budgeted<()> {
        for i in 0..self.parts.len() {
            if self.heads[i] != Head::Pending {
                continue;
            }
            b.check()?;
            match self.parts[i].next(b) {
                Ok(id) => self.heads[i] = Head::Val(id),
                Err(Interrupt::No) => self.heads[i] = Head::Eof,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Pick the next id from the heads and consume it everywhere it occurs.
    fn select(&mut self) -> Option<Id> {
        let vals = self.heads.iter().filter_map(|h| match h {
            Head::Val(id) => Some(*id),
            _ => None,
        });
        let choice = if self.forward { vals.min() } else { vals.max() }?;
        for head in &mut self.heads {
            if *head == Head::Val(choice) {
                *head = Head::Pending;
            }
        }
        self.last = Some(choice);
        Some(choice)
    }

    pub fn next(&mut self, b: &mut Budget) -> Budgeted<Id> {
        self.refill(b)?;
        b.charge(cost::FUNCTION_CALL);
        self.select().ok_or(Interrupt::No)
    }

    pub fn find(&mut self, b: &mut Budget, target: Id) -> Budgeted<Id> {
        if self.find_target != Some(target) {
            // Fresh find: fan out to every part.
            self.find_target = Some(target);
            self.find_pos = 0;
            self.heads.fill(Head::Pending);
        }
        while self.find_pos < self.parts.len() {
            b.check()?;
            let i = self.find_pos;
            match self.parts[i].find(b, target) {
                Ok(id) => self.heads[i] = Head::Val(id),
                Err(Interrupt::No) => self.heads[i] = Head::Eof,
                Err(e) => return Err(e),
            }
            self.find_pos += 1;
        }
        self.find_target = None;
        self.find_pos = 0;
        b.charge(cost::FUNCTION_CALL);
        self.select().ok_or(Interrupt::No)
    }

    pub fn check(&mut self, b: &mut Budget, id: Id) -> Budgeted<bool> {
        if let Some(alt) = &self.check_alt {
            return alt.check(b, id);
        }
        while self.check_pos < self.parts.len() {
            b.check()?;
            let hit = self.parts[self.check_pos].check(b, id)?;
            if hit {
                self.check_pos = 0;
                return Ok(true);
            }
            self.check_pos += 1;
        }
        self.check_pos = 0;
        Ok(false)
    }

    pub fn statistics_step(&mut self, b: &mut Budget) -> Budgeted<()> {
        if self.stats.is_some() {
            return Ok(());
        }
        while self.stats_pos < self.parts.len() {
            b.check()?;
            self.parts[self.stats_pos].statistics(b)?;
            self.stats_pos += 1;
        }
        let mut n = 0u64;
        let mut next_cost = cost::FUNCTION_CALL;
        let mut check_cost = 0u64;
        let mut find_cost = cost::FUNCTION_CALL;
        for part in &self.parts {
            let ps = part.stats().expect("part statistics just computed");
            n = n.saturating_add(ps.n);
            next_cost = next_cost.max(ps.next_cost);
            check_cost = check_cost.saturating_add(ps.check_cost);
            find_cost = find_cost.saturating_add(ps.find_cost);
        }
        if let Some(alt) = &self.check_alt {
            if let Some(astats) = alt.stats() {
                check_cost = astats.check_cost;
            }
        }
        self.stats = Some(CursorStats {
            n,
            next_cost,
            check_cost,
            find_cost,
            sorted: true,
            ordered: true,
        });
        self.stats_pos = 0;
        Ok(())
    }

    pub fn reset(&mut self) {
        for part in &self.parts {
            part.reset();
        }
        self.heads.fill(Head::Pending);
        self.last = None;
        self.check_pos = 0;
        self.find_target = None;
        self.find_pos = 0;
    }

    pub fn clone_node(&self) -> OrNode {
        OrNode {
            parts: self.parts.iter().map(|p| p.clone_cursor()).collect(),
            heads: self.heads.clone(),
            low: self.low,
            high: self.high,
            forward: self.forward,
            last: self.last,
            check_alt: self.check_alt.as_ref().map(|c| c.clone_cursor()),
            check_pos: self.check_pos,
            stats_pos: self.stats_pos,
            find_target: self.find_target,
            find_pos: self.find_pos,
            stats: self.stats,
            masquerade: self.masquerade.clone(),
        }
    }

    pub fn stats(&self) -> Option<CursorStats> {
        self.stats
    }

    pub fn freeze_set(&self, out: &mut String) -> Result<(), EngineError> {
        if let Some(masq) = &self.masquerade {
            out.push_str(masq);
            return Ok(());
        }
        out.push_str("or:");
        write_span(out, self.forward, self.low, self.high);
        out.push_str(":(");
        for (i, part) in self.parts.iter().enumerate() {
            if i > 0 {
                out.push(';');
            }
            let mut set = String::new();
            part.with_node(|n| n.freeze_set(&mut set))?;
            out.push('(');
            out.push_str(&set);
            out.push(')');
        }
        out.push(')');
        if let Some(alt) = &self.check_alt {
            let mut set = String::new();
            alt.with_node(|n| n.freeze_set(&mut set))?;
            out.push_str("[cc:(");
            out.push_str(&set);
            out.push_str(")]");
        }
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
        out.push('(');
        for (i, part) in self.parts.iter().enumerate() {
            if i > 0 {
                out.push(';');
            }
            let mut pos = String::new();
            part.with_node(|n| n.freeze_position(&mut pos))?;
            let mut state = String::new();
            part.with_node(|n| n.freeze_state(&mut state))?;
            out.push('(');
            out.push_str(&pos);
            out.push('/');
            out.push_str(&state);
            out.push(')');
        }
        out.push_str("):");
        let mut rendered = self.heads.iter().map(|h| match h {
            Head::Pending => "-".to_string(),
            Head::Eof => "$".to_string(),
            Head::Val(id) => id.to_string(),
        });
        out.push_str(&rendered.join(","));
        Ok(())
    }

    pub fn primitive_summary(&self) -> Option<PrimitiveSummary> {
        None
    }

    pub fn range_estimate(&self) -> RangeEstimate {
        let mut low = Id::MAX;
        let mut high = self.low;
        let mut n_max = Some(0u64);
        let mut all_empty = true;
        for part in &self.parts {
            let r = part.range_estimate();
            low = low.min(r.low);
            high = high.max(r.high);
            n_max = match (n_max, r.n_max) {
                (Some(a), Some(b)) => Some(a.saturating_add(b)),
                _ => None,
            };
            if r.n_exact != Some(0) {
                all_empty = false;
            }
        }
        if self.parts.is_empty() {
            low = self.low;
        }
        RangeEstimate {
            low,
            high,
            n_exact: all_empty.then_some(0),
            n_max,
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
        self.reset();
        let Some(last) = last else { return };
        self.last = Some(last);
        let target = if self.forward {
            last.checked_add(1)
        } else {
            last.checked_sub(1)
        };
        let Some(target) = target else {
            self.heads.fill(Head::Eof);
            return;
        };
        for i in 0..self.parts.len() {
            let mut b = Budget::unlimited();
            self.heads[i] = loop {
                match self.parts[i].find(&mut b, target) {
                    Ok(id) => break Head::Val(id),
                    Err(Interrupt::No) => break Head::Eof,
                    Err(Interrupt::More) => continue,
                    Err(Interrupt::Fail(_)) => break Head::Eof,
                }
            };
        }
    }
}

/// Union cursor over sorted parts. Parts transfer into the union.
pub fn or_cursor(parts: Vec<Cursor>, low: Id, high: Id, forward: bool) -> Cursor {
    Cursor::from_node(Node::Or(OrNode::new(parts, low, high, forward)))
}

pub(crate) fn thaw(
    store: &Store,
    set: &str,
    position: Option<&str>,
    state: Option<&str>,
) -> Result<Cursor, EngineError> {
    let mut s = Scanner::new(set);
    s.expect_tag("or:")?;
    let (forward, low, high) = s.span()?;
    s.expect(':')?;
    let inner = s.group()?;
    let mut parts = Vec::new();
    let mut part_sets = Vec::new();
    if !inner.is_empty() {
        for piece in split_top(inner, ';') {
            let mut p = Scanner::new(piece);
            let part_set = p.group()?;
            p.expect_done("or part")?;
            part_sets.push(part_set);
            parts.push(crate::freeze::thaw(store, part_set)?);
        }
    }
    let mut node = OrNode::new(parts, low, high, forward);
    if s.tag("[cc:") {
        let alt_set = s.group()?;
        s.expect(']')?;
        node.set_check_alt(crate::freeze::thaw(store, alt_set)?);
    }
    s.expect_done("or cursor")?;

    if let Some(state) = state {
        if state != "-" {
            let mut t = Scanner::new(state);
            let part_states = t.group()?;
            t.expect(':')?;
            let pieces = if part_states.is_empty() {
                Vec::new()
            } else {
                split_top(part_states, ';')
            };
            if pieces.len() != node.parts.len() {
                return Err(EngineError::BadCursor("or state arity mismatch".into()));
            }
            for (i, piece) in pieces.iter().enumerate() {
                let mut p = Scanner::new(piece);
                let pos_state = p.group()?;
                p.expect_done("or part state")?;
                let full = format!("{}/{}", part_sets[i], pos_state);
                node.parts[i] = crate::freeze::thaw(store, &full)?;
            }
            let heads: Vec<&str> = t.rest().split(',').collect();
            if heads.len() != node.heads.len() {
                return Err(EngineError::BadCursor("or heads arity mismatch".into()));
            }
            for (i, h) in heads.iter().enumerate() {
                node.heads[i] = match *h {
                    "-" => Head::Pending,
                    "$" => Head::Eof,
                    digits => {
                        let mut p = Scanner::new(digits);
                        let v = p.u64_val()?;
                        p.expect_done("or head")?;
                        Head::Val(v)
                    }
                };
            }
        }
    }
    if let Some(pos) = position {
        let mut p = Scanner::new(pos);
        if let Some(last) = p.opt_u64()? {
            node.last = Some(last);
        }
    }
    Ok(Cursor::from_node(Node::Or(node)))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::freeze::FreezeFlags;
    use crate::iter::fixed::fixed_cursor;
    use crate::pdb::ID_MAX;

    fn union_of(sets: &[&[Id]]) -> Cursor {
        let parts = sets
            .iter()
            .map(|ids| fixed_cursor(ids.to_vec(), 0, ID_MAX, true))
            .collect();
        or_cursor(parts, 0, ID_MAX, true)
    }

    fn drain(c: &Cursor) -> Vec<Id> {
        let mut b = Budget::new(100_000);
        let mut got = Vec::new();
        loop {
            match c.next(&mut b) {
                Ok(id) => got.push(id),
                Err(Interrupt::No) => return got,
                Err(e) => panic!("unexpected {e:?}"),
            }
        }
    }

    #[test]
    fn merge_deduplicates_across_parts() {
        let c = union_of(&[&[1, 5, 9], &[2, 5, 8], &[5, 9, 11]]);
        assert_eq!(drain(&c), vec![1, 2, 5, 8, 9, 11]);
    }

    #[test]
    fn find_lands_on_merged_sequence() {
        let c = union_of(&[&[1, 5, 9], &[2, 6]]);
        let mut b = Budget::new(100_000);
        assert_eq!(c.find(&mut b, 3).unwrap(), 5);
        assert_eq!(c.next(&mut b).unwrap(), 6);
    }

    #[test]
    fn check_scans_parts() {
        let c = union_of(&[&[1, 5], &[7]]);
        let mut b = Budget::new(100_000);
        assert!(c.check(&mut b, 7).unwrap());
        assert!(!c.check(&mut b, 6).unwrap());
    }

    #[test]
    fn freeze_state_roundtrips_mid_merge() {
        use crate::pdb::{MemStore, Store};
        let store: Store = MemStore::builder().build();
        let c = union_of(&[&[1, 5, 9], &[2, 5, 8]]);
        let mut b = Budget::new(100_000);
        assert_eq!(c.next(&mut b).unwrap(), 1);
        assert_eq!(c.next(&mut b).unwrap(), 2);
        let frozen = c.freeze(FreezeFlags::ALL).unwrap();
        let thawed = crate::freeze::thaw(&store, &frozen).unwrap();
        assert_eq!(drain(&thawed), vec![5, 8, 9]);
        assert_eq!(drain(&c), vec![5, 8, 9]);
    }
}

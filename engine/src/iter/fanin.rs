//! Fanin cursor: primitives whose chosen linkage pointer targets one
//! endpoint.
//!
//! Backed by the store's fanin posting for `(linkage, endpoint)`. With a
//! hint restriction the posting is either pre-narrowed by a VIP array, or
//! filtered lazily by reading each candidate primitive and comparing its
//! hint pointer (charging a primitive read per candidate).

use crate::budget::Budget;
use crate::error::{Budgeted, EngineError, Interrupt};
use crate::freeze::{write_span, Scanner};
use crate::iter::{Cursor, CursorStats, Node, PrimitiveSummary, RangeEstimate, Restriction};
use crate::pdb::{cost, Guid, Id, Linkage, Store};
use std::rc::Rc;

pub(crate) struct FaninNode {
    store: Store,
    linkage: Linkage,
    endpoint: Id,
    hint: Option<(Linkage, Guid)>,
    /// True when `posting` is already narrowed to the hint (VIP array); a
    /// false with a hint set means every candidate costs a primitive read.
    narrowed: bool,
    posting: Rc<[Id]>,
    /// Index range of `[low, high)` within the posting.
    window: (usize, usize),
    low: Id,
    high: Id,
    forward: bool,
    consumed: usize,
    last: Option<Id>,
    /// Target of a suspended `find`, so a re-call does not reposition.
    pending_find: Option<Id>,
    masquerade: Option<Rc<str>>,
}

impl FaninNode {
    /// Open the fanin of `(linkage, endpoint)`, optionally restricted to
    /// primitives whose `hint.0` pointer equals `hint.1`. Charges the array
    /// lookup.
    pub fn open(
        store: &Store,
        linkage: Linkage,
        endpoint: Id,
        hint: Option<(Linkage, Guid)>,
        low: Id,
        high: Id,
        forward: bool,
        b: &mut Budget,
    ) -> Result<FaninNode, EngineError> {
        b.charge(cost::GMAP_ARRAY);
        let (posting, narrowed) = match hint {
            Some(h) => match store.vip_fanin(endpoint, linkage, h)? {
                Some(p) => (p, true),
                None => (store.fanin(linkage, endpoint)?, false),
            },
            None => (store.fanin(linkage, endpoint)?, true),
        };
        let from = posting.partition_point(|&id| id < low);
        let to = posting.partition_point(|&id| id < high);
        Ok(FaninNode {
            store: store.clone(),
            linkage,
            endpoint,
            hint,
            narrowed,
            posting,
            window: (from, to),
            low,
            high,
            forward,
            consumed: 0,
            last: None,
            pending_find: None,
            masquerade: None,
        })
    }

    pub fn set_masquerade(&mut self, masquerade: Rc<str>) {
        self.masquerade = Some(masquerade);
    }

    fn window_len(&self) -> usize {
        self.window.1 - self.window.0
    }

    /// Posting index of the next candidate, in iteration order.
    fn cursor_index(&self) -> Option<usize> {
        if self.consumed >= self.window_len() {
            return None;
        }
        Some(if self.forward {
            self.window.0 + self.consumed
        } else {
            self.window.1 - 1 - self.consumed
        })
    }

    fn hint_matches(&self, id: Id, b: &mut Budget) -> Result<bool, EngineError> {
        let Some((hl, hg)) = self.hint else { return Ok(true) };
        if self.narrowed {
            return Ok(true);
        }
        b.charge(cost::PRIMITIVE);
        Ok(self.store.read(id)?.linkage_guid(hl) == Some(hg))
    }

    pub fn next(&mut self, b: &mut Budget) -> Budgeted<Id> {
        self.pending_find = None;
        self.advance(b)
    }

    fn advance(&mut self, b: &mut Budget) -> Budgeted<Id> {
        loop {
            b.check()?;
            let Some(idx) = self.cursor_index() else {
                return Err(Interrupt::No);
            };
            let id = self.posting[idx];
            self.consumed += 1;
            b.charge(cost::GMAP_ELEMENT);
            if self.hint_matches(id, b)? {
                self.last = Some(id);
                return Ok(id);
            }
        }
    }

    pub fn find(&mut self, b: &mut Budget, target: Id) -> Budgeted<Id> {
        if self.pending_find != Some(target) {
            b.charge(cost::GMAP_ARRAY);
            let (from, to) = self.window;
            self.consumed = if self.forward {
                self.posting[from..to].partition_point(|&id| id < target)
            } else {
                (to - from) - self.posting[from..to].partition_point(|&id| id <= target)
            };
            self.pending_find = Some(target);
        }
        let found = self.advance(b);
        if !matches!(found, Err(Interrupt::More)) {
            self.pending_find = None;
        }
        found
    }

    pub fn check(&mut self, b: &mut Budget, id: Id) -> Budgeted<bool> {
        b.charge(cost::FUNCTION_CALL);
        let (from, to) = self.window;
        if self.posting[from..to].binary_search(&id).is_err() {
            return Ok(false);
        }
        Ok(self.hint_matches(id, b)?)
    }

    pub fn statistics_step(&mut self, _b: &mut Budget) -> Budgeted<()> {
        Ok(())
    }

    pub fn reset(&mut self) {
        self.consumed = 0;
        self.last = None;
        self.pending_find = None;
    }

    pub fn clone_node(&self) -> FaninNode {
        FaninNode {
            store: self.store.clone(),
            linkage: self.linkage,
            endpoint: self.endpoint,
            hint: self.hint,
            narrowed: self.narrowed,
            posting: self.posting.clone(),
            window: self.window,
            low: self.low,
            high: self.high,
            forward: self.forward,
            consumed: self.consumed,
            last: self.last,
            pending_find: self.pending_find,
            masquerade: self.masquerade.clone(),
        }
    }

    pub fn stats(&self) -> Option<CursorStats> {
        let lazy_filter = self.hint.is_some() && !self.narrowed;
        let per_step = cost::GMAP_ELEMENT + if lazy_filter { cost::PRIMITIVE } else { 0 };
        Some(CursorStats {
            n: self.window_len() as u64,
            next_cost: per_step,
            check_cost: cost::FUNCTION_CALL + if lazy_filter { cost::PRIMITIVE } else { 0 },
            find_cost: cost::GMAP_ARRAY + per_step,
            sorted: true,
            ordered: true,
        })
    }

    pub fn freeze_set(&self, out: &mut String) -> Result<(), EngineError> {
        if let Some(masq) = &self.masquerade {
            out.push_str(masq);
            return Ok(());
        }
        out.push_str("fanin:");
        out.push_str(self.linkage.name());
        out.push(':');
        out.push_str(&self.endpoint.to_string());
        out.push(':');
        write_span(out, self.forward, self.low, self.high);
        if let Some((hl, hg)) = self.hint {
            out.push_str("[h:");
            out.push_str(hl.name());
            out.push('=');
            out.push_str(&hg.to_string());
            out.push(']');
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
        out.push('-');
        Ok(())
    }

    pub fn primitive_summary(&self) -> Option<PrimitiveSummary> {
        let (hl, hg) = self.hint?;
        let mut ps = PrimitiveSummary::new();
        ps.lock(hl, hg);
        Some(ps)
    }

    pub fn range_estimate(&self) -> RangeEstimate {
        let (from, to) = self.window;
        let ids = &self.posting[from..to];
        let exact = self.narrowed || self.hint.is_none();
        RangeEstimate {
            low: ids.first().copied().unwrap_or(self.low),
            high: ids.last().map(|&id| id + 1).unwrap_or(self.low),
            n_exact: exact.then_some(ids.len() as u64),
            n_max: Some(ids.len() as u64),
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
        let (from, to) = self.window;
        self.last = Some(last);
        self.consumed = if self.forward {
            self.posting[from..to].partition_point(|&id| id <= last)
        } else {
            (to - from) - self.posting[from..to].partition_point(|&id| id < last)
        };
    }
}

/// Open a fanin cursor; see [`FaninNode::open`].
pub fn fanin_cursor(
    store: &Store,
    linkage: Linkage,
    endpoint: Id,
    hint: Option<(Linkage, Guid)>,
    low: Id,
    high: Id,
    forward: bool,
    b: &mut Budget,
) -> Result<Cursor, EngineError> {
    let node = FaninNode::open(store, linkage, endpoint, hint, low, high, forward, b)?;
    Ok(Cursor::from_node(Node::Fanin(node)))
}

pub(crate) fn thaw(store: &Store, set: &str, position: Option<&str>) -> Result<Cursor, EngineError> {
    let mut s = Scanner::new(set);
    s.expect_tag("fanin:")?;
    let linkage = Linkage::from_name(s.ident()?)
        .ok_or_else(|| EngineError::Lexical(format!("bad linkage in {set:?}")))?;
    s.expect(':')?;
    let endpoint = s.u64_val()?;
    s.expect(':')?;
    let (forward, low, high) = s.span()?;
    let hint = if s.tag("[h:") {
        let hl = Linkage::from_name(s.ident()?)
            .ok_or_else(|| EngineError::Lexical(format!("bad hint linkage in {set:?}")))?;
        s.expect('=')?;
        let hg = s.guid()?;
        s.expect(']')?;
        Some((hl, hg))
    } else {
        None
    };
    s.expect_done("fanin cursor")?;
    let cursor = fanin_cursor(store, linkage, endpoint, hint, low, high, forward, &mut Budget::unlimited())?;
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
    use crate::pdb::{MemStore, Primitive, ID_MAX};

    fn store() -> Store {
        let mut b = MemStore::builder().vip_threshold(100);
        for i in 0..3u128 {
            b.insert(Primitive::new(Guid(0x10 + i)));
        }
        for i in 0..5u128 {
            let mut p = Primitive::new(Guid(0x20 + i)).with_link(Linkage::Left, Guid(0x10));
            if i % 2 == 0 {
                p = p.with_link(Linkage::Typeguid, Guid(0x12));
            }
            b.insert(p);
        }
        b.build()
    }

    #[test]
    fn plain_fanin_enumerates_posting() {
        let s = store();
        let mut b = Budget::new(10_000);
        let c = fanin_cursor(&s, Linkage::Left, 0, None, 0, ID_MAX, true, &mut b).unwrap();
        let mut got = Vec::new();
        while let Ok(id) = c.next(&mut b) {
            got.push(id);
        }
        assert_eq!(got, vec![3, 4, 5, 6, 7]);
    }

    #[test]
    fn lazy_hint_filters_candidates() {
        let s = store();
        let mut b = Budget::new(10_000);
        let hint = Some((Linkage::Typeguid, Guid(0x12)));
        let c = fanin_cursor(&s, Linkage::Left, 0, hint, 0, ID_MAX, true, &mut b).unwrap();
        let mut got = Vec::new();
        while let Ok(id) = c.next(&mut b) {
            got.push(id);
        }
        assert_eq!(got, vec![3, 5, 7]);
        assert_eq!(c.check(&mut b, 5).unwrap(), true);
        assert_eq!(c.check(&mut b, 4).unwrap(), false);
    }

    #[test]
    fn find_positions_and_resumes() {
        let s = store();
        let mut b = Budget::new(10_000);
        let c = fanin_cursor(&s, Linkage::Left, 0, None, 0, ID_MAX, true, &mut b).unwrap();
        assert_eq!(c.find(&mut b, 5).unwrap(), 5);
        assert_eq!(c.next(&mut b).unwrap(), 6);
    }
}

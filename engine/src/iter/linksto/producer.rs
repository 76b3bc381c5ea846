//! Production: budgeted `next`/`find`/`check` once a strategy is committed.
//!
//! Every loop re-checks the budget, and every value that must survive a
//! suspension lives on the node, never on the stack: the call-state label
//! plus `source`, `last_id` and `find_target` are the whole resume record.

use super::{CheckState, LinkstoNode, Method, NextState};
use crate::budget::Budget;
use crate::error::{Budgeted, EngineError, Interrupt};
use crate::iter::fanin::fanin_cursor;
use crate::pdb::{cost, Id};

impl LinkstoNode {
    // ---- SUBFANIN ------------------------------------------------------

    /// Concatenation of per-endpoint fanins, in `sub` order.
    pub(crate) fn subfanin_next(&mut self, b: &mut Budget) -> Budgeted<Id> {
        if self.next_state == NextState::Start {
            self.next_state = if self.fanin.is_some() {
                NextState::FaninNext
            } else {
                NextState::SubNext
            };
        }
        loop {
            b.check()?;
            match self.next_state {
                NextState::SubNext => {
                    if self.sub.identity() != self.sub_id {
                        self.next_state = NextState::Resync;
                        continue;
                    }
                    match self.sub.next(b) {
                        Ok(endpoint) => {
                            self.source = Some(endpoint);
                            self.next_state = NextState::FaninOpen;
                        }
                        Err(Interrupt::No) => {
                            self.next_state = NextState::SubNext;
                            return Err(Interrupt::No);
                        }
                        Err(e) => return Err(e),
                    }
                }
                NextState::FaninOpen => {
                    let endpoint = self
                        .source
                        .ok_or_else(|| EngineError::BadCursor("fanin open without source".into()))?;
                    let fan = fanin_cursor(
                        &self.store,
                        self.linkage,
                        endpoint,
                        self.hint,
                        self.low,
                        self.high,
                        self.forward,
                        b,
                    )?;
                    self.fanin = Some(fan);
                    self.next_state = NextState::FaninNext;
                }
                NextState::FaninNext => {
                    let fan = self
                        .fanin
                        .as_ref()
                        .ok_or_else(|| EngineError::BadCursor("fanin lost".into()))?
                        .clone();
                    match fan.next(b) {
                        Ok(id) => {
                            self.last_id = Some(id);
                            return Ok(id);
                        }
                        Err(Interrupt::No) => {
                            self.fanin = None;
                            self.next_state = NextState::SubNext;
                        }
                        Err(e) => return Err(e),
                    }
                }
                NextState::Resync => {
                    // `sub` morphed under us; replay its position.
                    self.sub_id = self.sub.identity();
                    let Some(source) = self.source else {
                        self.sub.reset();
                        self.next_state = NextState::SubNext;
                        continue;
                    };
                    if self.sub.sorted().unwrap_or(false) {
                        match self.sub.find(b, source) {
                            Ok(found) if found == source => {
                                self.next_state = NextState::SubNext;
                            }
                            Ok(found) => {
                                // The old source is gone; the found endpoint
                                // is the next one to produce from.
                                self.source = Some(found);
                                self.fanin = None;
                                self.next_state = NextState::FaninOpen;
                            }
                            Err(Interrupt::No) => {
                                self.next_state = NextState::SubNext;
                            }
                            Err(e) => return Err(e),
                        }
                    } else {
                        self.sub.reset();
                        self.next_state = NextState::ResyncScan;
                    }
                }
                NextState::ResyncScan => {
                    let source = self
                        .source
                        .ok_or_else(|| EngineError::BadCursor("rescan without source".into()))?;
                    match self.sub.next(b) {
                        Ok(id) if id == source => self.next_state = NextState::SubNext,
                        Ok(_) => {}
                        Err(Interrupt::No) => self.next_state = NextState::SubNext,
                        Err(e) => return Err(e),
                    }
                }
                other => {
                    return Err(EngineError::BadCursor(format!(
                        "subfanin producer in state {other:?}"
                    ))
                    .into())
                }
            }
        }
    }

    // ---- TYPECHECK -----------------------------------------------------

    /// Walk the hint population; accept candidates whose endpoint passes
    /// `sub.check`. Output is ascending (descending when backward).
    pub(crate) fn typecheck_next(&mut self, b: &mut Budget) -> Budgeted<Id> {
        if matches!(
            self.next_state,
            NextState::Start | NextState::SubNext | NextState::FaninOpen | NextState::FaninNext
        ) {
            self.next_state = NextState::HintNext;
        }
        self.typecheck_loop(b)
    }

    /// `find`: reposition the hint cursor at the target, then accept-check
    /// from there. A re-call with the same target resumes; a new target
    /// restarts the positioning.
    pub(crate) fn typecheck_find(&mut self, b: &mut Budget, target: Id) -> Budgeted<Id> {
        if self.find_target != Some(target) || !matches!(self.next_state, NextState::HintFind | NextState::Process { .. } | NextState::SubCheck { .. })
        {
            self.find_target = Some(target);
            self.next_state = NextState::HintFind;
        }
        let found = self.typecheck_loop(b);
        if !matches!(found, Err(Interrupt::More)) {
            self.find_target = None;
        }
        found
    }

    fn typecheck_loop(&mut self, b: &mut Budget) -> Budgeted<Id> {
        loop {
            b.check()?;
            match self.next_state {
                NextState::HintNext => {
                    let hint_it = self.hint_it_for_produce(b)?;
                    match hint_it.next(b) {
                        Ok(cand) => self.next_state = NextState::Process { cand },
                        Err(Interrupt::No) => {
                            return Err(Interrupt::No);
                        }
                        Err(e) => return Err(e),
                    }
                }
                NextState::HintFind => {
                    let Some(target) = self.find_target else {
                        // Backward resume underflowed below id zero.
                        self.next_state = NextState::HintNext;
                        return Err(Interrupt::No);
                    };
                    let hint_it = self.hint_it_for_produce(b)?;
                    match hint_it.find(b, target) {
                        Ok(cand) => self.next_state = NextState::Process { cand },
                        Err(Interrupt::No) => {
                            self.next_state = NextState::HintNext;
                            return Err(Interrupt::No);
                        }
                        Err(e) => return Err(e),
                    }
                }
                NextState::Process { cand } => {
                    b.charge(cost::PRIMITIVE);
                    let prim = self.store.read(cand)?;
                    let Some(target_guid) = prim.linkage_guid(self.linkage) else {
                        self.next_state = NextState::HintNext;
                        continue;
                    };
                    b.charge(cost::HMAP_ARRAY);
                    let Some(endpoint) = self.store.id_from_guid(target_guid)? else {
                        self.next_state = NextState::HintNext;
                        continue;
                    };
                    self.next_state = NextState::SubCheck { cand, endpoint };
                }
                NextState::SubCheck { cand, endpoint } => {
                    let hit = self.sub.check(b, endpoint)?;
                    self.next_state = NextState::HintNext;
                    if hit {
                        self.last_id = Some(cand);
                        return Ok(cand);
                    }
                }
                other => {
                    return Err(EngineError::BadCursor(format!(
                        "typecheck producer in state {other:?}"
                    ))
                    .into())
                }
            }
        }
    }

    /// The hint cursor, built on demand during production.
    fn hint_it_for_produce(&mut self, b: &mut Budget) -> Result<crate::iter::Cursor, Interrupt> {
        self.ensure_hint_it(b)?;
        Ok(self.hint_it().clone())
    }

    // ---- check ---------------------------------------------------------

    /// Membership: read the candidate, verify its linkage and hint
    /// pointers, then delegate the endpoint to `sub.check`. Memoized for
    /// the last candidate asked about.
    pub(crate) fn check_impl(&mut self, b: &mut Budget, cand: Id) -> Budgeted<bool> {
        if let Some((cached, verdict)) = self.check_cached {
            if cached == cand {
                return Ok(verdict);
            }
        }
        loop {
            b.check()?;
            match self.check_state {
                CheckState::Idle => {
                    if cand < self.low || cand >= self.high {
                        return self.check_done(cand, false);
                    }
                    b.charge(cost::PRIMITIVE);
                    let prim = self.store.read(cand)?;
                    let Some(target_guid) = prim.linkage_guid(self.linkage) else {
                        return self.check_done(cand, false);
                    };
                    if let Some((hl, hg)) = self.hint {
                        if prim.linkage_guid(hl) != Some(hg) {
                            return self.check_done(cand, false);
                        }
                    }
                    b.charge(cost::HMAP_ARRAY);
                    let Some(endpoint) = self.store.id_from_guid(target_guid)? else {
                        return self.check_done(cand, false);
                    };
                    self.check_state = CheckState::Checking { cand, endpoint };
                }
                CheckState::Checking { cand: saved, endpoint } => {
                    if saved != cand {
                        // Caller changed candidates mid-suspension; restart.
                        self.check_state = CheckState::Idle;
                        continue;
                    }
                    let verdict = self.sub.check(b, endpoint)?;
                    return self.check_done(cand, verdict);
                }
            }
        }
    }

    fn check_done(&mut self, cand: Id, verdict: bool) -> Budgeted<bool> {
        self.check_state = CheckState::Idle;
        self.check_cached = Some((cand, verdict));
        Ok(verdict)
    }
}

/// Resume production after a thaw: typecheck positions re-establish through
/// a hint-side find just past the last yielded id.
pub(crate) fn resume_after(node: &mut LinkstoNode) {
    if node.method != Method::Typecheck {
        return;
    }
    if !matches!(node.next_state, NextState::HintFind) {
        return;
    }
    node.find_target = match node.last_id {
        Some(last) if node.forward => last.checked_add(1),
        Some(last) => last.checked_sub(1),
        None => None,
    };
    if node.find_target.is_none() && node.last_id.is_none() {
        // Nothing produced yet: plain scan from the top.
        node.next_state = NextState::HintNext;
    }
}

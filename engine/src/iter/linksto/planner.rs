//! Self-planning: online statistics sampling and strategy selection.
//!
//! Two sampling paths run under interleaved budget slices:
//!
//!  - SUBFANIN sampling pulls up to [`N_SAMPLES`] endpoints from a clone of
//!    `sub` and estimates each endpoint's fanin through the VIP index, a
//!    bounded intersection, or the store's coarse estimate.
//!  - TYPECHECK sampling pulls candidates from a clone of the hint cursor,
//!    translates each to its endpoint and checks it against a clone of
//!    `sub`, tracking trials and acceptances.
//!
//! Both paths are restartable state machines; either can suspend at any
//! micro-step. When a path exhausts its child the cursor morphs in place:
//! an empty sub becomes NULL, a small result a FIXED set, a larger one an
//! OR of fanins; a drained hint population becomes a FIXED of the accepted
//! candidates. Otherwise the first path to fill its sample quota wins,
//! unless coverage-per-cost disagrees, in which case the loser donates its
//! budget and sampling continues.

use super::{LinkstoNode, Method};
use crate::budget::Budget;
use crate::error::{Budgeted, EngineError, Interrupt};
use crate::iter::fanin::fanin_cursor;
use crate::iter::fixed::FixedNode;
use crate::iter::null::NullNode;
use crate::iter::or::OrNode;
use crate::iter::{intersect_into, Cursor, CursorStats, Direction, Node, INTERSECT_ESTIMATE_BUDGET};
use crate::pdb::{cost, Id};
use env_knob::EnvKnob;
use smallvec::SmallVec;

/// Endpoints / candidates sampled per path before it counts as done.
pub(crate) const N_SAMPLES: usize = 5;
/// Largest total fanin that may be materialized into a FIXED set mid-plan.
pub(crate) const FANIN_FIXED_MAX: u64 = 25;
/// Zero-fanin endpoints skipped within one statistics call before the call
/// suspends; bounds a single call on pathological stores.
pub(crate) const EMPTY_MAX: u64 = 1024;

/// Initial per-round budget cap; grows tenfold on every round that ends
/// with neither path done.
static STAT_ROUND: EnvKnob<i64> = EnvKnob::new("GRAVEL_STAT_ROUND", "50");

static LOG_PLANNER: EnvKnob<bool> = EnvKnob::new("GRAVEL_LOG_PLANNER", "false");

/// Same syntax as `println!`, but only prints when `GRAVEL_LOG_PLANNER` is
/// set, prefixed so planner traces are greppable.
macro_rules! log_plan {
    ($($arg:tt)+) => {
        if LOG_PLANNER.get() {
            print!("[plan] ");
            println!($($arg)+);
        }
    }
}

/// Resume labels of one sampling path.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub(crate) enum SampleState {
    #[default]
    Initial,
    NextMore,
    UseId,
    CheckMore,
    FindMore,
    Done,
}

impl SampleState {
    pub(crate) fn label(self) -> u32 {
        match self {
            SampleState::Initial => 0,
            SampleState::NextMore => 1,
            SampleState::UseId => 2,
            SampleState::CheckMore => 3,
            SampleState::FindMore => 4,
            SampleState::Done => 5,
        }
    }

    pub(crate) fn from_label(label: u32) -> Option<SampleState> {
        Some(match label {
            0 => SampleState::Initial,
            1 => SampleState::NextMore,
            2 => SampleState::UseId,
            3 => SampleState::CheckMore,
            4 => SampleState::FindMore,
            5 => SampleState::Done,
            _ => return None,
        })
    }
}

#[derive(Default)]
pub(crate) struct SfSampler {
    /// Sampling clone of `sub`.
    pub it: Option<Cursor>,
    pub state: SampleState,
    /// Endpoint awaiting its fanin count (the UseId step).
    pub pending: Option<Id>,
    pub ids: SmallVec<[Id; N_SAMPLES]>,
    pub fanins: SmallVec<[u64; N_SAMPLES]>,
    /// Endpoints pulled from the sampling clone, zero-fanin ones included.
    pub sub_n: u64,
    pub fanin_total: u64,
    pub cost: u64,
}

#[derive(Default)]
pub(crate) struct TcSampler {
    /// Sampling clone of `sub` used for membership checks.
    pub sub: Option<Cursor>,
    /// Sampling clone of the hint cursor.
    pub hint: Option<Cursor>,
    pub state: SampleState,
    pub pending_endpoint: Option<Id>,
    pub ids: SmallVec<[Id; N_SAMPLES]>,
    pub trials: u64,
    pub cost: u64,
}

#[derive(Default)]
pub(crate) struct Planner {
    pub sf: SfSampler,
    pub tc: TcSampler,
    pub round_max: i64,
    /// Winner of a coverage-per-cost disagreement; gets the whole budget.
    pub boost: Option<Method>,
}

impl Planner {
    pub(crate) fn new() -> Planner {
        Planner {
            round_max: STAT_ROUND.get(),
            ..Default::default()
        }
    }

    /// Scratch travels with clones only as a snapshot of counters; the
    /// sampling cursors themselves are re-cloned.
    pub(crate) fn clone_scratch(&self) -> Planner {
        Planner {
            sf: SfSampler {
                it: self.sf.it.as_ref().map(|c| c.clone_cursor()),
                state: self.sf.state,
                pending: self.sf.pending,
                ids: self.sf.ids.clone(),
                fanins: self.sf.fanins.clone(),
                sub_n: self.sf.sub_n,
                fanin_total: self.sf.fanin_total,
                cost: self.sf.cost,
            },
            tc: TcSampler {
                sub: self.tc.sub.as_ref().map(|c| c.clone_cursor()),
                hint: self.tc.hint.as_ref().map(|c| c.clone_cursor()),
                state: self.tc.state,
                pending_endpoint: self.tc.pending_endpoint,
                ids: self.tc.ids.clone(),
                trials: self.tc.trials,
                cost: self.tc.cost,
            },
            round_max: self.round_max,
            boost: self.boost,
        }
    }

    /// Release every sampling cursor once a strategy is committed.
    fn clear(&mut self) {
        self.sf.it = None;
        self.tc.sub = None;
        self.tc.hint = None;
        self.boost = None;
    }
}

impl LinkstoNode {
    /// Drive statistics to completion or suspension. A morph decision is
    /// signaled by `morph_into` plus `More`; the cursor shell re-dispatches.
    pub(crate) fn plan(&mut self, b: &mut Budget) -> Budgeted<()> {
        if self.stats.is_some() {
            return Ok(());
        }
        self.ensure_hint_it(b)?;
        let mut zero_skips = 0u64;
        loop {
            b.check()?;
            let sf_was_done = self.planner.sf.state == SampleState::Done;
            let tc_was_done = self.planner.tc.state == SampleState::Done;
            let (mut sf_share, mut tc_share) = self.stat_shares(b.left());
            // A finished path donates its share to the one still sampling.
            if sf_was_done {
                tc_share += sf_share;
                sf_share = 0;
            }
            if tc_was_done {
                sf_share += tc_share;
                tc_share = 0;
            }

            if sf_share > 0 && !sf_was_done {
                let mut slice = b.carve(sf_share.min(self.planner.round_max));
                let r = self.sf_round(&mut slice, &mut zero_skips);
                self.planner.sf.cost += slice.consumed();
                b.absorb(slice);
                match r {
                    Ok(()) | Err(Interrupt::More) => {}
                    Err(e) => return Err(e),
                }
                if self.morph_into.is_some() {
                    return Err(Interrupt::More);
                }
            }

            if tc_share > 0 && self.planner.tc.state != SampleState::Done {
                let mut slice = b.carve(tc_share.min(self.planner.round_max));
                let r = self.tc_round(&mut slice);
                self.planner.tc.cost += slice.consumed();
                b.absorb(slice);
                match r {
                    Ok(()) | Err(Interrupt::More) => {}
                    Err(e) => return Err(e),
                }
                if self.morph_into.is_some() {
                    return Err(Interrupt::More);
                }
            }

            if self.try_commit()? {
                return Ok(());
            }

            let no_progress = sf_was_done == (self.planner.sf.state == SampleState::Done)
                && tc_was_done == (self.planner.tc.state == SampleState::Done);
            if no_progress {
                self.planner.round_max = self.planner.round_max.saturating_mul(10);
            }
        }
    }

    /// Budget partition between the two sampling paths.
    fn stat_shares(&self, left: i64) -> (i64, i64) {
        let left = left.max(0);
        if self.method == Method::Subfanin {
            return (left, 0);
        }
        if self.method == Method::Typecheck {
            return (0, left);
        }
        if let Some(boost) = self.planner.boost {
            return match boost {
                Method::Subfanin => (left, 0),
                Method::Typecheck => (0, left),
                Method::Unspecified => (left / 2, left / 2),
            };
        }
        // Shares always sum to `left` so a one-unit budget still feeds one
        // path and the call cannot stall without suspending.
        match self.direction {
            Direction::Ordering if self.ordering.is_some() && self.sub.ordered().unwrap_or(true) => {
                let sf = left * 9 / 10;
                (sf, left - sf)
            }
            Direction::Forward | Direction::Backward => {
                let tc = left * 9 / 10;
                (left - tc, tc)
            }
            _ => {
                let sf = left / 2;
                (sf, left - sf)
            }
        }
    }

    // ---- SUBFANIN sampling ---------------------------------------------

    fn sf_round(&mut self, b: &mut Budget, zero_skips: &mut u64) -> Budgeted<()> {
        if self.planner.sf.it.is_none() {
            self.planner.sf.it = Some(self.sub.clone_cursor());
        }
        loop {
            b.check()?;
            match self.planner.sf.state {
                SampleState::Initial => {
                    // The path needs sub's own statistics for coverage and
                    // the final cost formulas.
                    let it = self.planner.sf.it.as_ref().expect("sampling clone").clone();
                    it.statistics(b)?;
                    self.planner.sf.state = SampleState::NextMore;
                }
                SampleState::NextMore | SampleState::FindMore | SampleState::CheckMore => {
                    let it = self.planner.sf.it.as_ref().expect("sampling clone").clone();
                    match it.next(b) {
                        Ok(endpoint) => {
                            self.planner.sf.sub_n += 1;
                            self.planner.sf.pending = Some(endpoint);
                            self.planner.sf.state = SampleState::UseId;
                        }
                        Err(Interrupt::No) => {
                            return self.sf_exhausted(b);
                        }
                        Err(e) => return Err(e),
                    }
                }
                SampleState::UseId => {
                    let endpoint = self
                        .planner
                        .sf
                        .pending
                        .ok_or_else(|| EngineError::BadCursor("sampling without endpoint".into()))?;
                    let est = self.fanin_estimate(b, endpoint)?;
                    self.planner.sf.pending = None;
                    if est == 0 {
                        *zero_skips += 1;
                        self.planner.sf.state = SampleState::NextMore;
                        if *zero_skips > EMPTY_MAX {
                            return Err(Interrupt::More);
                        }
                        continue;
                    }
                    self.planner.sf.ids.push(endpoint);
                    self.planner.sf.fanins.push(est);
                    self.planner.sf.fanin_total += est;
                    if self.planner.sf.ids.len() == N_SAMPLES {
                        self.planner.sf.state = SampleState::Done;
                        log_plan!(
                            "subfanin sampling done: {} endpoints, fanin {}",
                            self.planner.sf.sub_n,
                            self.planner.sf.fanin_total
                        );
                        return Ok(());
                    }
                    self.planner.sf.state = SampleState::NextMore;
                }
                SampleState::Done => return Ok(()),
            }
        }
    }

    /// Estimated fanin of one endpoint within our bounds, hint included.
    fn fanin_estimate(&mut self, b: &mut Budget, endpoint: Id) -> Budgeted<u64> {
        let upper = self.store.primitive_n().max(1);
        let Some(hint) = self.hint else {
            return Ok(self
                .store
                .linkage_count_est(self.linkage, endpoint, self.low, self.high, upper));
        };
        if self.store.vip_id(endpoint, self.linkage) {
            return match self.store.vip_count(
                endpoint,
                self.linkage,
                Some(hint),
                self.low,
                self.high,
                upper,
            )? {
                Some(n) => Ok(n),
                // Count not ready yet: suspend this micro-step.
                None => Err(Interrupt::More),
            };
        }
        // No VIP array: bounded intersection of the two postings.
        let mut slice = b.carve(INTERSECT_ESTIMATE_BUDGET);
        let fan = fanin_cursor(
            &self.store,
            self.linkage,
            endpoint,
            None,
            self.low,
            self.high,
            true,
            &mut slice,
        )?;
        let hint_pop = self.hint_it().clone_cursor();
        hint_pop.reset();
        let mut common = Vec::new();
        let r = intersect_into(
            &fan,
            &hint_pop,
            self.low,
            self.high,
            &mut slice,
            &mut common,
            64,
        );
        b.absorb(slice);
        match r {
            Ok(n) => Ok(n as u64),
            // Cut short: what we saw is the estimate.
            Err(Interrupt::More) => Ok(common.len() as u64),
            Err(e) => Err(e),
        }
    }

    /// `sub` ran dry during sampling: every endpoint is known, so the
    /// cursor can morph into a materialized shape.
    fn sf_exhausted(&mut self, b: &mut Budget) -> Budgeted<()> {
        let sf = &self.planner.sf;
        if sf.ids.is_empty() {
            log_plan!("sub exhausted empty: morphing to null");
            self.morph_into = Some(Node::Null(NullNode::new(self.low, self.high, self.forward)));
            return Ok(());
        }
        if sf.fanin_total <= FANIN_FIXED_MAX && self.ordering.is_none() {
            match self.materialize_fixed(b) {
                Ok(node) => {
                    log_plan!("sub exhausted small: morphing to fixed");
                    self.morph_into = Some(node);
                    return Ok(());
                }
                Err(Interrupt::Fail(EngineError::TooManyMatches)) => {
                    // Estimates undersold the fanins; keep the linksto.
                    log_plan!("fixed morph overflow: committing subfanin");
                    self.commit(Method::Subfanin);
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
        }
        log_plan!("sub exhausted: morphing to or of {} fanins", sf.ids.len());
        self.morph_into = Some(self.build_small_or(b)?);
        Ok(())
    }

    /// Drain every sampled endpoint's fanin into one FIXED node.
    fn materialize_fixed(&self, b: &mut Budget) -> Budgeted<Node> {
        let mut local = Budget::unlimited();
        let mut collected: Vec<Id> = Vec::new();
        for &endpoint in &self.planner.sf.ids {
            let fan = fanin_cursor(
                &self.store,
                self.linkage,
                endpoint,
                self.hint,
                self.low,
                self.high,
                true,
                &mut local,
            )?;
            loop {
                match fan.next(&mut local) {
                    Ok(id) => {
                        collected.push(id);
                        if collected.len() as u64 > FANIN_FIXED_MAX {
                            b.charge(local.consumed());
                            return Err(EngineError::TooManyMatches.into());
                        }
                    }
                    Err(Interrupt::No) => break,
                    Err(Interrupt::More) => continue,
                    Err(e) => {
                        b.charge(local.consumed());
                        return Err(e);
                    }
                }
            }
        }
        b.charge(local.consumed());
        let mut node = FixedNode::new(collected, self.low, self.high, self.forward);
        node.set_masquerade(self.masquerade_string("fixed-")?);
        Ok(Node::Fixed(node))
    }

    /// OR of the sampled endpoints' fanin cursors; ownership of each fanin
    /// moves into the union's part list.
    fn build_small_or(&self, b: &mut Budget) -> Budgeted<Node> {
        let mut local = Budget::unlimited();
        let mut parts = Vec::with_capacity(self.planner.sf.ids.len());
        for &endpoint in &self.planner.sf.ids {
            parts.push(fanin_cursor(
                &self.store,
                self.linkage,
                endpoint,
                self.hint,
                self.low,
                self.high,
                self.forward,
                &mut local,
            )?);
        }
        b.charge(local.consumed());
        let mut node = OrNode::new(parts, self.low, self.high, self.forward);
        node.set_masquerade(self.masquerade_string("or-")?);
        Ok(Node::Or(node))
    }

    // ---- TYPECHECK sampling --------------------------------------------

    fn tc_round(&mut self, b: &mut Budget) -> Budgeted<()> {
        if self.planner.tc.hint.is_none() {
            self.planner.tc.hint = Some(self.hint_it().clone_cursor());
            self.planner.tc.sub = Some(self.sub.clone_cursor());
        }
        loop {
            b.check()?;
            match self.planner.tc.state {
                SampleState::Initial => {
                    // Hint population statistics drive the coverage ratio
                    // and the final n formula.
                    let hint = self.planner.tc.hint.as_ref().expect("hint clone").clone();
                    hint.statistics(b)?;
                    self.planner.tc.state = SampleState::NextMore;
                }
                SampleState::NextMore | SampleState::UseId | SampleState::FindMore => {
                    let hint = self.planner.tc.hint.as_ref().expect("hint clone").clone();
                    match hint.next(b) {
                        // The candidate is recoverable from the hint clone's
                        // position; nothing else to save.
                        Ok(_cand) => {
                            self.planner.tc.pending_endpoint = None;
                            self.planner.tc.state = SampleState::CheckMore;
                        }
                        Err(Interrupt::No) => return self.tc_exhausted(),
                        Err(e) => return Err(e),
                    }
                }
                SampleState::CheckMore => {
                    let hint = self.planner.tc.hint.as_ref().expect("hint clone").clone();
                    let cand = hint
                        .last_returned()
                        .ok_or_else(|| EngineError::BadCursor("candidate lost".into()))?;
                    if self.planner.tc.pending_endpoint.is_none() {
                        b.charge(cost::PRIMITIVE);
                        let prim = self.store.read(cand)?;
                        let Some(target) = prim.linkage_guid(self.linkage) else {
                            self.planner.tc.trials += 1;
                            self.planner.tc.state = SampleState::NextMore;
                            continue;
                        };
                        b.charge(cost::HMAP_ARRAY);
                        let Some(endpoint) = self.store.id_from_guid(target)? else {
                            self.planner.tc.trials += 1;
                            self.planner.tc.state = SampleState::NextMore;
                            continue;
                        };
                        self.planner.tc.pending_endpoint = Some(endpoint);
                    }
                    let endpoint = self.planner.tc.pending_endpoint.expect("endpoint translated");
                    let sub = self.planner.tc.sub.as_ref().expect("sub clone").clone();
                    let hit = sub.check(b, endpoint)?;
                    self.planner.tc.trials += 1;
                    self.planner.tc.pending_endpoint = None;
                    if hit {
                        self.planner.tc.ids.push(cand);
                        if self.planner.tc.ids.len() == N_SAMPLES {
                            self.planner.tc.state = SampleState::Done;
                            log_plan!(
                                "typecheck sampling done: {} trials, {} accepted",
                                self.planner.tc.trials,
                                self.planner.tc.ids.len()
                            );
                            return Ok(());
                        }
                    }
                    self.planner.tc.state = SampleState::NextMore;
                }
                SampleState::Done => return Ok(()),
            }
        }
    }

    /// The hint population ran dry before the quota filled: the accepted
    /// candidates are the complete result.
    fn tc_exhausted(&mut self) -> Budgeted<()> {
        let ids: Vec<Id> = self.planner.tc.ids.to_vec();
        if ids.is_empty() {
            log_plan!("hint population exhausted empty: morphing to null");
            self.morph_into = Some(Node::Null(NullNode::new(self.low, self.high, self.forward)));
            return Ok(());
        }
        log_plan!("hint population exhausted: morphing to fixed of {}", ids.len());
        let mut node = FixedNode::new(ids, self.low, self.high, self.forward);
        node.set_masquerade(self.masquerade_string("fixed-")?);
        self.morph_into = Some(Node::Fixed(node));
        Ok(())
    }

    // ---- winner selection and commit -----------------------------------

    /// Commit a strategy if the selection rules allow one; true on commit.
    fn try_commit(&mut self) -> Result<bool, Interrupt> {
        let sf_done = self.planner.sf.state == SampleState::Done;
        let tc_done = self.planner.tc.state == SampleState::Done;
        if self.method != Method::Unspecified {
            // Preset (thawed): its path gets the whole budget and commits
            // as soon as it is done.
            let done = match self.method {
                Method::Subfanin => sf_done,
                Method::Typecheck => tc_done,
                Method::Unspecified => unreachable!(),
            };
            if done {
                self.commit(self.method);
                return Ok(true);
            }
            return Ok(false);
        }
        if !sf_done && !tc_done {
            return Ok(false);
        }

        let sf_ratio = self.coverage_per_cost(Method::Subfanin);
        let tc_ratio = self.coverage_per_cost(Method::Typecheck);
        let preference_given = self.direction != Direction::Any;

        if sf_done != tc_done {
            let done_method = if sf_done { Method::Subfanin } else { Method::Typecheck };
            let other_ratio = if sf_done { tc_ratio } else { sf_ratio };
            if other_ratio.is_none() || self.thawed || preference_given {
                self.commit(done_method);
                return Ok(true);
            }
            let by_cost = if sf_ratio.unwrap_or(0.0) >= tc_ratio.unwrap_or(0.0) {
                Method::Subfanin
            } else {
                Method::Typecheck
            };
            if by_cost == done_method {
                self.commit(done_method);
                return Ok(true);
            }
            // Disagreement: the done path's budget is donated to the
            // coverage winner until it finishes too.
            log_plan!("planner disagreement: boosting {:?}", by_cost);
            self.planner.boost = Some(by_cost);
            return Ok(false);
        }

        // Both quotas filled: coverage-per-cost decides outright.
        let winner = if sf_ratio.unwrap_or(0.0001) >= tc_ratio.unwrap_or(0.0001) {
            Method::Subfanin
        } else {
            Method::Typecheck
        };
        self.commit(winner);
        Ok(true)
    }

    /// Fraction of the child covered per unit of sampling cost; `None`
    /// when the child's size is unknown (or the cursor was thawed).
    fn coverage_per_cost(&self, method: Method) -> Option<f64> {
        if self.thawed {
            return None;
        }
        let (seen, child_n, spent) = match method {
            Method::Subfanin => {
                let n = self.sub.stats()?.n;
                (self.planner.sf.sub_n, n, self.planner.sf.cost)
            }
            Method::Typecheck => {
                let n = self.hint_it.as_ref()?.stats()?.n;
                (self.planner.tc.trials, n, self.planner.tc.cost)
            }
            Method::Unspecified => return None,
        };
        let coverage = (seen as f64 / child_n.max(1) as f64).max(0.0001);
        Some(coverage / spent.max(1) as f64)
    }

    /// Turn the sampled figures into committed statistics.
    pub(crate) fn commit(&mut self, method: Method) {
        let sub_stats = self.sub.stats();
        let hint_stats = self.hint_it.as_ref().and_then(|h| h.stats());
        let upper = self.store.primitive_n().max(1);

        let check_cost = match sub_stats {
            Some(ss) => cost::PRIMITIVE + ss.check_cost,
            None => {
                let trials = self.planner.tc.trials.max(1);
                let hint_next = self
                    .planner
                    .tc
                    .hint
                    .as_ref()
                    .and_then(|h| h.stats())
                    .map(|s| s.next_cost)
                    .unwrap_or(0);
                (self.planner.tc.cost / trials)
                    .saturating_sub(hint_next)
                    .max(cost::PRIMITIVE)
            }
        };

        let stats = match method {
            Method::Typecheck => {
                let accepted = (self.planner.tc.ids.len() as u64).max(1);
                let trials = self.planner.tc.trials.max(1);
                let next_cost = 1 + self.planner.tc.cost / accepted;
                let hint_n = hint_stats.map(|s| s.n).unwrap_or(upper);
                CursorStats {
                    n: (hint_n.saturating_mul(accepted) / trials).max(1),
                    next_cost,
                    check_cost,
                    find_cost: cost::GMAP_ARRAY + next_cost,
                    sorted: true,
                    ordered: true,
                }
            }
            Method::Subfanin | Method::Unspecified => {
                let samples = self.planner.sf.sub_n.max(1);
                let avg_fan = if self.planner.sf.fanin_total == 0 {
                    1.0 / samples as f64
                } else {
                    self.planner.sf.fanin_total as f64 / samples as f64
                };
                let sub_n = sub_stats.map(|s| s.n).unwrap_or(upper);
                let mut n = (avg_fan * sub_n as f64).round() as u64;
                n = n.clamp(1, upper);
                if self.hint.is_some() && n > 10 {
                    let hint_population = hint_stats.map(|s| s.n).unwrap_or(upper);
                    n = n.min(hint_population.max(1));
                }
                let sub_next = sub_stats.map(|s| s.next_cost).unwrap_or(cost::GMAP_ARRAY);
                let next_cost = if avg_fan > 0.0 {
                    cost::GMAP_ELEMENT + ((sub_next + cost::GMAP_ARRAY) as f64 / avg_fan) as u64
                } else {
                    (cost::GMAP_ELEMENT + sub_next + cost::GMAP_ARRAY) * 2 * N_SAMPLES as u64
                };
                CursorStats {
                    n,
                    next_cost,
                    check_cost,
                    find_cost: 0,
                    sorted: false,
                    ordered: self.sub.ordered().unwrap_or(false),
                }
            }
        };
        let method = if method == Method::Unspecified {
            Method::Subfanin
        } else {
            method
        };
        log_plan!("committed {:?}: n={} next={}", method, stats.n, stats.next_cost);
        tracing::debug!(?method, n = stats.n, "linksto statistics committed");
        self.stats = Some(stats);
        self.method = method;
        self.planner.clear();
    }
}

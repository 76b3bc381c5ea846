//! The linksto cursor: primitives pointing at a child cursor's outputs.
//!
//! A linksto enumerates the ids of primitives whose `linkage` pointer
//! resolves to an output of the `sub` cursor, optionally restricted to
//! primitives whose hint pointer equals a fixed GUID. It plans itself: the
//! sampler in [`planner`] races two evaluation strategies under interleaved
//! budgets and either commits one or morphs the cursor into a simpler shape
//! when sampling proves the result small. The producer in [`producer`]
//! implements budgeted `next`/`find`/`check` for the committed strategy,
//! [`freeze`] the wire format, and [`preeval`] the at-construction
//! materialization.
//!
//! Strategies:
//!  - SUBFANIN walks `sub` and concatenates each endpoint's fanin.
//!  - TYPECHECK walks the hint population and keeps primitives whose
//!    endpoint passes `sub.check`; its output is sorted by id.

mod freeze;
mod planner;
mod preeval;
mod producer;

pub(crate) use freeze::{thaw, thaw_masquerade};

use crate::budget::Budget;
use crate::error::{Budgeted, EngineError};
use crate::iter::all::all_cursor;
use crate::iter::fanin::fanin_cursor;
use crate::iter::null::null_cursor;
use crate::iter::{
    Cursor, CursorStats, Direction, Node, PrimitiveSummary, RangeEstimate, Restriction,
};
use crate::pdb::{cost, Guid, Id, Linkage, Store};
use planner::Planner;
use std::rc::Rc;

/// Evaluation strategy of a linksto cursor.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub enum Method {
    #[default]
    Unspecified,
    Subfanin,
    Typecheck,
}

impl Method {
    pub(crate) fn token(self) -> &'static str {
        match self {
            Method::Unspecified => "-",
            Method::Subfanin => "subfanin",
            Method::Typecheck => "typecheck",
        }
    }

    pub(crate) fn from_token(token: &str) -> Option<Method> {
        match token {
            "-" => Some(Method::Unspecified),
            t if t.eq_ignore_ascii_case("subfanin") => Some(Method::Subfanin),
            t if t.eq_ignore_ascii_case("typecheck") => Some(Method::Typecheck),
            _ => None,
        }
    }
}

/// Call-state labels of the producer; the resume points of `next`/`find`.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub(crate) enum NextState {
    #[default]
    Start,
    /// SUBFANIN: pulling the next endpoint from `sub`.
    SubNext,
    /// SUBFANIN: endpoint pulled (in `source`), fanin not yet open.
    FaninOpen,
    /// SUBFANIN: draining the active fanin.
    FaninNext,
    /// SUBFANIN: `sub` morphed; re-seek it to `source` (sorted sub).
    Resync,
    /// SUBFANIN: `sub` morphed; rescan for `source` (unsorted sub).
    ResyncScan,
    /// TYPECHECK: pulling the next candidate from the hint cursor.
    HintNext,
    /// TYPECHECK: repositioning the hint cursor at `find_target` first.
    HintFind,
    /// TYPECHECK: candidate pulled, primitive not yet translated.
    Process { cand: Id },
    /// TYPECHECK: endpoint translated, awaiting `sub.check`.
    SubCheck { cand: Id, endpoint: Id },
}

/// Resume state of a suspended `check`.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub(crate) enum CheckState {
    #[default]
    Idle,
    Checking { cand: Id, endpoint: Id },
}

/// Constructor arguments of a linksto cursor.
#[derive(Clone, Debug)]
pub struct LinkstoSpec {
    pub linkage: Linkage,
    /// Restrict results to primitives whose `hint.0` pointer equals `hint.1`.
    pub hint: Option<(Linkage, Guid)>,
    pub low: Id,
    pub high: Id,
    pub forward: bool,
    pub ordering: Option<String>,
    pub acct: Option<u64>,
    pub direction: Direction,
}

impl LinkstoSpec {
    pub fn new(linkage: Linkage, low: Id, high: Id, forward: bool) -> LinkstoSpec {
        LinkstoSpec {
            linkage,
            hint: None,
            low,
            high,
            forward,
            ordering: None,
            acct: None,
            direction: Direction::Any,
        }
    }

    pub fn with_hint(mut self, linkage: Linkage, guid: Guid) -> LinkstoSpec {
        self.hint = Some((linkage, guid));
        self
    }
}

pub(crate) struct LinkstoNode {
    pub(crate) store: Store,
    pub(crate) linkage: Linkage,
    pub(crate) hint: Option<(Linkage, Guid)>,
    pub(crate) low: Id,
    pub(crate) high: Id,
    pub(crate) forward: bool,
    pub(crate) direction: Direction,
    pub(crate) ordering: Option<Rc<str>>,
    pub(crate) acct: Option<u64>,

    /// Endpoint-producing child; exclusively owned.
    pub(crate) sub: Cursor,
    /// Cursor over the hint population (all primitives when no hint);
    /// built lazily.
    pub(crate) hint_it: Option<Cursor>,
    /// Active per-endpoint fanin while producing in SUBFANIN mode.
    pub(crate) fanin: Option<Cursor>,

    pub(crate) method: Method,
    pub(crate) stats: Option<CursorStats>,
    pub(crate) planner: Planner,

    /// Current endpoint (last id pulled from `sub`).
    pub(crate) source: Option<Id>,
    pub(crate) last_id: Option<Id>,
    /// Identity of `sub` we last produced against; a mismatch means `sub`
    /// morphed and the position must be replayed.
    pub(crate) sub_id: u64,

    pub(crate) next_state: NextState,
    pub(crate) find_target: Option<Id>,
    pub(crate) check_state: CheckState,
    pub(crate) check_cached: Option<(Id, bool)>,

    /// Reconstituted from a freeze; makes the planner prefer done-first
    /// over area-per-cost (frozen coverage state is untrustworthy).
    pub(crate) thawed: bool,
    /// Replacement decided mid-operation, taken by the cursor shell.
    pub(crate) morph_into: Option<Node>,
}

impl LinkstoNode {
    pub(crate) fn new(store: Store, spec: LinkstoSpec, sub: Cursor) -> LinkstoNode {
        let sub_id = sub.identity();
        LinkstoNode {
            store,
            linkage: spec.linkage,
            hint: spec.hint,
            low: spec.low,
            high: spec.high,
            forward: spec.forward,
            direction: spec.direction,
            ordering: spec.ordering.map(Rc::from),
            acct: spec.acct,
            sub,
            hint_it: None,
            fanin: None,
            method: Method::Unspecified,
            stats: None,
            planner: Planner::new(),
            source: None,
            last_id: None,
            sub_id,
            next_state: NextState::Start,
            find_target: None,
            check_state: CheckState::Idle,
            check_cached: None,
            thawed: false,
            morph_into: None,
        }
    }

    pub(crate) fn spec(&self) -> LinkstoSpec {
        LinkstoSpec {
            linkage: self.linkage,
            hint: self.hint,
            low: self.low,
            high: self.high,
            forward: self.forward,
            ordering: self.ordering.as_deref().map(String::from),
            acct: self.acct,
            direction: self.direction,
        }
    }

    pub(crate) fn set_direction(&mut self, direction: Direction) {
        self.direction = direction;
    }

    pub(crate) fn take_morph(&mut self) -> Option<Node> {
        self.morph_into.take()
    }

    pub(crate) fn adopt_committed(&mut self, from: &LinkstoNode) {
        if self.stats.is_none() {
            self.stats = from.stats;
            self.method = from.method;
        }
    }

    /// The hint cursor: the fanin of the hint guid through the hint linkage,
    /// or every primitive in range when no hint is set.
    pub(crate) fn ensure_hint_it(&mut self, b: &mut Budget) -> Result<(), EngineError> {
        if self.hint_it.is_some() {
            return Ok(());
        }
        let it = match self.hint {
            None => all_cursor(&self.store, self.low, self.high, self.forward),
            Some((hl, hg)) => {
                b.charge(cost::HMAP_ARRAY);
                match self.store.id_from_guid(hg)? {
                    Some(endpoint) => fanin_cursor(
                        &self.store,
                        hl,
                        endpoint,
                        None,
                        self.low,
                        self.high,
                        self.forward,
                        b,
                    )?,
                    None => null_cursor(self.low, self.high, self.forward),
                }
            }
        };
        self.hint_it = Some(it);
        Ok(())
    }

    pub(crate) fn hint_it(&self) -> &Cursor {
        self.hint_it.as_ref().expect("hint cursor not built")
    }

    // ---- contract operations -------------------------------------------

    pub(crate) fn next(&mut self, b: &mut Budget) -> Budgeted<Id> {
        if self.stats.is_none() {
            self.statistics_step(b)?;
        }
        match self.method {
            Method::Subfanin => self.subfanin_next(b),
            Method::Typecheck => self.typecheck_next(b),
            Method::Unspecified => Err(EngineError::BadCursor("next before planning".into()).into()),
        }
    }

    pub(crate) fn find(&mut self, b: &mut Budget, target: Id) -> Budgeted<Id> {
        if self.stats.is_none() {
            self.statistics_step(b)?;
        }
        let sorted = self.stats.map(|s| s.sorted).unwrap_or(false);
        if !sorted {
            return Err(EngineError::BadCursor("find on unsorted cursor".into()).into());
        }
        self.typecheck_find(b, target)
    }

    pub(crate) fn check(&mut self, b: &mut Budget, id: Id) -> Budgeted<bool> {
        self.check_impl(b, id)
    }

    pub(crate) fn statistics_step(&mut self, b: &mut Budget) -> Budgeted<()> {
        self.plan(b)
    }

    pub(crate) fn reset(&mut self) {
        self.sub.reset();
        if let Some(h) = &self.hint_it {
            h.reset();
        }
        self.fanin = None;
        self.source = None;
        self.last_id = None;
        self.next_state = NextState::Start;
        self.find_target = None;
        self.check_state = CheckState::Idle;
        self.check_cached = None;
        self.sub_id = self.sub.identity();
    }

    pub(crate) fn clone_node(&self) -> LinkstoNode {
        LinkstoNode {
            store: self.store.clone(),
            linkage: self.linkage,
            hint: self.hint,
            low: self.low,
            high: self.high,
            forward: self.forward,
            direction: self.direction,
            ordering: self.ordering.clone(),
            acct: self.acct,
            sub: self.sub.clone_cursor(),
            hint_it: self.hint_it.as_ref().map(|c| c.clone_cursor()),
            fanin: self.fanin.as_ref().map(|c| c.clone_cursor()),
            method: self.method,
            stats: self.stats,
            planner: self.planner.clone_scratch(),
            source: self.source,
            last_id: self.last_id,
            sub_id: self.sub_id,
            next_state: self.next_state,
            find_target: self.find_target,
            check_state: self.check_state,
            check_cached: self.check_cached,
            thawed: self.thawed,
            morph_into: None,
        }
    }

    pub(crate) fn stats(&self) -> Option<CursorStats> {
        self.stats
    }

    pub(crate) fn freeze_set(&self, out: &mut String) -> Result<(), EngineError> {
        freeze::freeze_set(self, out)
    }

    pub(crate) fn freeze_position(&self, out: &mut String) -> Result<(), EngineError> {
        freeze::freeze_position(self, out)
    }

    pub(crate) fn freeze_state(&self, out: &mut String) -> Result<(), EngineError> {
        freeze::freeze_state(self, out)
    }

    // ---- planning metadata ---------------------------------------------

    pub(crate) fn primitive_summary(&self) -> Option<PrimitiveSummary> {
        let (hl, hg) = self.hint?;
        let mut ps = PrimitiveSummary::new();
        ps.lock(hl, hg);
        ps.complete = false;
        ps.result = None;
        Some(ps)
    }

    pub(crate) fn range_estimate(&self) -> RangeEstimate {
        let span = RangeEstimate {
            low: self.low,
            high: self.high,
            n_exact: None,
            n_max: self.stats.map(|s| s.n),
            low_rising: self.forward,
        };
        match self.method {
            Method::Typecheck => {
                let Some(hint_it) = &self.hint_it else { return span };
                let hr = hint_it.range_estimate();
                RangeEstimate {
                    low: hr.low.max(self.low),
                    high: hr.high.min(self.high),
                    n_exact: (hr.n_exact == Some(0)).then_some(0),
                    n_max: hr.n_max,
                    low_rising: self.forward,
                }
            }
            Method::Subfanin => {
                let sr = self.sub.range_estimate();
                let fanin_empty = self
                    .fanin
                    .as_ref()
                    .is_some_and(|f| f.range_estimate().n_exact == Some(0));
                if fanin_empty && sr.n_exact == Some(0) {
                    return RangeEstimate {
                        low: self.low,
                        high: self.low,
                        n_exact: Some(0),
                        n_max: Some(0),
                        low_rising: self.forward,
                    };
                }
                span
            }
            Method::Unspecified => span,
        }
    }

    pub(crate) fn beyond(&self, value: Id) -> bool {
        let Some(stats) = self.stats else { return false };
        if !stats.ordered {
            return false;
        }
        if stats.sorted {
            self.hint_it.as_ref().map(|h| h.beyond(value)).unwrap_or(false)
        } else {
            self.sub.beyond(value)
        }
    }

    pub(crate) fn restrict(&self, ps: &PrimitiveSummary) -> Result<Restriction, EngineError> {
        if let Some((hl, hg)) = self.hint {
            // Already restricted; only an identical lock is compatible.
            for locked in ps.locked_linkages() {
                if locked == hl {
                    return if ps.guid(locked) == Some(hg) {
                        Ok(Restriction::Unchanged)
                    } else {
                        Ok(Restriction::Incompatible)
                    };
                }
            }
            return Ok(Restriction::Unchanged);
        }
        // A TYPEGUID lock combines with a LEFT/RIGHT walk and vice versa.
        let usable = ps.locked_linkages().find(|&locked| {
            matches!(
                (locked, self.linkage),
                (Linkage::Typeguid, Linkage::Left)
                    | (Linkage::Typeguid, Linkage::Right)
                    | (Linkage::Left, Linkage::Typeguid)
                    | (Linkage::Right, Linkage::Typeguid)
            )
        });
        let Some(locked) = usable else {
            return Ok(Restriction::Unchanged);
        };
        let guid = ps
            .guid(locked)
            .ok_or_else(|| EngineError::BadCursor("locked linkage without guid".into()))?;
        let mut spec = self.spec();
        spec.hint = Some((locked, guid));
        let sub = self.sub.clone_cursor();
        sub.reset();
        Ok(Restriction::Replaced(linksto_cursor_plain(&self.store, spec, sub)))
    }

    pub(crate) fn low(&self) -> Id {
        self.low
    }

    pub(crate) fn high(&self) -> Id {
        self.high
    }

    pub(crate) fn forward(&self) -> bool {
        self.forward
    }

    pub(crate) fn last_returned(&self) -> Option<Id> {
        self.last_id
    }

    pub(crate) fn replay(&mut self, last: Option<Id>) {
        // Clones of a morphing original only ever refresh onto the simple
        // kinds, so this path is for linksto-to-linksto re-syncs only: fall
        // back to a clean restart resumed through the sorted path if we can.
        self.reset();
        let Some(last) = last else { return };
        self.last_id = Some(last);
        if self.method == Method::Typecheck {
            self.next_state = NextState::HintFind;
            self.find_target = if self.forward {
                last.checked_add(1)
            } else {
                last.checked_sub(1)
            };
        }
    }
}

/// Build a linksto cursor, preevaluating small inputs into materialized
/// cursors (NULL, FIXED, OR) that masquerade as the linksto when frozen.
pub fn linksto_cursor(store: &Store, spec: LinkstoSpec, sub: Cursor) -> Result<Cursor, EngineError> {
    match preeval::preevaluate(store, &spec, &sub)? {
        Some(cursor) => Ok(cursor),
        None => Ok(linksto_cursor_plain(store, spec, sub)),
    }
}

/// Build a plain linksto cursor, skipping preevaluation.
pub fn linksto_cursor_plain(store: &Store, spec: LinkstoSpec, sub: Cursor) -> Cursor {
    Cursor::from_node(Node::Linksto(Box::new(LinkstoNode::new(
        store.clone(),
        spec,
        sub,
    ))))
}

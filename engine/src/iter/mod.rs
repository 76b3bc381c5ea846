//! The cursor algebra.
//!
//! A query plan is a tree of cursors all obeying one contract: budgeted
//! `next`/`find`/`check`/`statistics` that may suspend with `More`, plus
//! `reset`, deep cloning, freeze/thaw and the planning metadata operations
//! (`range_estimate`, `primitive_summary`, `restrict`, `beyond`).
//!
//! Every cursor lives behind a shared [`Cursor`] handle wrapping a tagged
//! [`Node`]. A cursor *morphs* by swapping the node in place and bumping its
//! identity number; the handle the environment holds stays valid. Clones are
//! deep copies that remember their original: when the original's identity no
//! longer matches what the clone last synced with, the clone re-clones the
//! (possibly morphed) node and replays its own position before producing
//! anything further. Committed statistics are authoritative on the original
//! only; a clone routes `statistics` there and adopts the result.

pub mod all;
pub mod fanin;
pub mod fixed;
pub mod linksto;
pub mod null;
pub mod or;

use crate::budget::Budget;
use crate::error::{Budgeted, EngineError, Interrupt};
use crate::freeze::FreezeFlags;
use crate::pdb::{Guid, Id, Linkage};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use all::AllNode;
use fanin::FaninNode;
use fixed::FixedNode;
use linksto::LinkstoNode;
use null::NullNode;
use or::OrNode;

/// Budget cap for one bounded intersection estimate.
pub const INTERSECT_ESTIMATE_BUDGET: i64 = 10_240;

static NEXT_IDENTITY: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_identity() -> u64 {
    NEXT_IDENTITY.fetch_add(1, Ordering::Relaxed)
}

/// Caller preference consulted by the planner when splitting its sampling
/// budget between strategies.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub enum Direction {
    Forward,
    Backward,
    /// The caller wants the sub-cursor's ordering preserved.
    Ordering,
    #[default]
    Any,
}

/// Statistics of a cursor, in budget units.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct CursorStats {
    /// Expected result count.
    pub n: u64,
    pub next_cost: u64,
    pub check_cost: u64,
    pub find_cost: u64,
    pub sorted: bool,
    pub ordered: bool,
}

/// Constraints every primitive produced by a cursor satisfies.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct PrimitiveSummary {
    locked: u8,
    guids: [Option<Guid>; 4],
    pub result: Option<Linkage>,
    pub complete: bool,
}

impl PrimitiveSummary {
    pub fn new() -> PrimitiveSummary {
        Default::default()
    }

    pub fn lock(&mut self, linkage: Linkage, guid: Guid) {
        self.locked |= 1 << linkage.index();
        self.guids[linkage.index()] = Some(guid);
    }

    pub fn is_locked(&self, linkage: Linkage) -> bool {
        self.locked & (1 << linkage.index()) != 0
    }

    pub fn guid(&self, linkage: Linkage) -> Option<Guid> {
        self.guids[linkage.index()]
    }

    pub fn locked_linkages(&self) -> impl Iterator<Item = Linkage> + '_ {
        Linkage::ALL.into_iter().filter(|l| self.is_locked(*l))
    }
}

/// Id-range bounds and counts; `None` means unknown or unbounded.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct RangeEstimate {
    pub low: Id,
    pub high: Id,
    pub n_exact: Option<u64>,
    pub n_max: Option<u64>,
    /// True when the low bound rises as iteration proceeds.
    pub low_rising: bool,
}

/// Outcome of [`Cursor::restrict`].
pub enum Restriction {
    /// The cursor already guarantees the summary; nothing to change.
    Unchanged,
    /// A tighter replacement cursor.
    Replaced(Cursor),
    /// The summary can never hold for this cursor's output.
    Incompatible,
}

/// Tagged variant over the concrete cursor kinds.
pub(crate) enum Node {
    Null(NullNode),
    All(AllNode),
    Fixed(FixedNode),
    Fanin(FaninNode),
    Or(OrNode),
    Linksto(Box<LinkstoNode>),
}

macro_rules! each_node {
    ($self:expr, $n:ident => $body:expr) => {
        match $self {
            Node::Null($n) => $body,
            Node::All($n) => $body,
            Node::Fixed($n) => $body,
            Node::Fanin($n) => $body,
            Node::Or($n) => $body,
            Node::Linksto($n) => $body,
        }
    };
}

impl Node {
    pub fn kind(&self) -> &'static str {
        match self {
            Node::Null(_) => "null",
            Node::All(_) => "all",
            Node::Fixed(_) => "fixed",
            Node::Fanin(_) => "fanin",
            Node::Or(_) => "or",
            Node::Linksto(_) => "linksto",
        }
    }

    fn next(&mut self, b: &mut Budget) -> Budgeted<Id> {
        each_node!(self, n => n.next(b))
    }

    fn find(&mut self, b: &mut Budget, target: Id) -> Budgeted<Id> {
        each_node!(self, n => n.find(b, target))
    }

    fn check(&mut self, b: &mut Budget, id: Id) -> Budgeted<bool> {
        each_node!(self, n => n.check(b, id))
    }

    fn statistics_step(&mut self, b: &mut Budget) -> Budgeted<()> {
        each_node!(self, n => n.statistics_step(b))
    }

    fn reset(&mut self) {
        each_node!(self, n => n.reset())
    }

    pub(crate) fn clone_node(&self) -> Node {
        match self {
            Node::Null(n) => Node::Null(n.clone_node()),
            Node::All(n) => Node::All(n.clone_node()),
            Node::Fixed(n) => Node::Fixed(n.clone_node()),
            Node::Fanin(n) => Node::Fanin(n.clone_node()),
            Node::Or(n) => Node::Or(n.clone_node()),
            Node::Linksto(n) => Node::Linksto(Box::new(n.clone_node())),
        }
    }

    fn stats(&self) -> Option<CursorStats> {
        each_node!(self, n => n.stats())
    }

    fn freeze_set(&self, out: &mut String) -> Result<(), EngineError> {
        each_node!(self, n => n.freeze_set(out))
    }

    fn freeze_position(&self, out: &mut String) -> Result<(), EngineError> {
        each_node!(self, n => n.freeze_position(out))
    }

    fn freeze_state(&self, out: &mut String) -> Result<(), EngineError> {
        each_node!(self, n => n.freeze_state(out))
    }

    fn primitive_summary(&self) -> Option<PrimitiveSummary> {
        each_node!(self, n => n.primitive_summary())
    }

    fn range_estimate(&self) -> RangeEstimate {
        each_node!(self, n => n.range_estimate())
    }

    fn restrict(&self, ps: &PrimitiveSummary) -> Result<Restriction, EngineError> {
        each_node!(self, n => n.restrict(ps))
    }

    fn beyond(&self, value: Id) -> bool {
        each_node!(self, n => n.beyond(value))
    }

    fn low(&self) -> Id {
        each_node!(self, n => n.low())
    }

    fn high(&self) -> Id {
        each_node!(self, n => n.high())
    }

    fn forward(&self) -> bool {
        each_node!(self, n => n.forward())
    }

    fn last_returned(&self) -> Option<Id> {
        each_node!(self, n => n.last_returned())
    }

    /// Re-seek a freshly re-cloned node so that iteration continues strictly
    /// after `last`. Only sorted shapes are ever replayed: morphs exclusively
    /// produce sorted cursors.
    fn replay(&mut self, last: Option<Id>) {
        each_node!(self, n => n.replay(last))
    }

    /// A morph decided by the node during the current operation, if any.
    fn take_morph(&mut self) -> Option<Node> {
        match self {
            Node::Linksto(n) => n.take_morph(),
            _ => None,
        }
    }
}

pub(crate) struct CursorCore {
    /// Identity number; advances whenever the node morphs.
    pub(crate) id: u64,
    /// The prototype this cursor was cloned from; `None` on originals.
    original: Option<Cursor>,
    /// Identity of the original's node this clone last synced with.
    synced: u64,
    pub(crate) node: Node,
}

/// Shared handle to one cursor.
///
/// `Clone` clones the *handle* (both aliases drive the same cursor, the way
/// the original is linked from its clones); [`Cursor::clone_cursor`] makes an
/// independent deep copy per the iterator contract.
#[derive(Clone)]
pub struct Cursor(Rc<RefCell<CursorCore>>);

impl Cursor {
    pub(crate) fn from_node(node: Node) -> Cursor {
        Cursor(Rc::new(RefCell::new(CursorCore {
            id: next_identity(),
            original: None,
            synced: 0,
            node,
        })))
    }

    pub fn identity(&self) -> u64 {
        self.0.borrow().id
    }

    pub fn kind(&self) -> &'static str {
        self.0.borrow().node.kind()
    }

    /// Re-sync a clone whose original has morphed since the last access:
    /// re-clone the node from the original and replay our position.
    fn refresh(&self) {
        let stale_original = {
            let core = self.0.borrow();
            match &core.original {
                Some(orig) if orig.identity() != core.synced => Some(orig.clone()),
                _ => None,
            }
        };
        let Some(orig) = stale_original else { return };
        let (node, orig_id) = {
            let oc = orig.0.borrow();
            (oc.node.clone_node(), oc.id)
        };
        let mut core = self.0.borrow_mut();
        let last = core.node.last_returned();
        core.node = node;
        core.node.reset();
        core.node.replay(last);
        core.synced = orig_id;
        core.id = next_identity();
    }

    /// Run a budgeted node operation, re-dispatching when the node morphs
    /// under us. The sentinel for "I morphed" is a pending replacement left
    /// by the node together with a `More`; the retry happens on the new
    /// shape with the same budget.
    fn run<T>(&self, b: &mut Budget, f: impl Fn(&mut Node, &mut Budget) -> Budgeted<T>) -> Budgeted<T> {
        loop {
            let mut core = self.0.borrow_mut();
            let r = f(&mut core.node, b);
            if let Some(new_node) = core.node.take_morph() {
                tracing::debug!(from = core.node.kind(), to = new_node.kind(), "cursor morphs");
                core.node = new_node;
                core.id = next_identity();
                continue;
            }
            return r;
        }
    }

    pub fn next(&self, b: &mut Budget) -> Budgeted<Id> {
        self.refresh();
        self.ensure_planned(b)?;
        self.run(b, |n, b| n.next(b))
    }

    pub fn find(&self, b: &mut Budget, target: Id) -> Budgeted<Id> {
        self.refresh();
        self.ensure_planned(b)?;
        self.run(b, |n, b| n.find(b, target))
    }

    /// A clone about to produce routes its planning to the original first;
    /// the clone's own sampling scratch is never authoritative.
    fn ensure_planned(&self, b: &mut Budget) -> Budgeted<()> {
        let needs_routing = {
            let core = self.0.borrow();
            core.original.is_some()
                && matches!(&core.node, Node::Linksto(lt) if lt.stats().is_none())
        };
        if needs_routing {
            self.statistics(b)?;
        }
        Ok(())
    }

    pub fn check(&self, b: &mut Budget, id: Id) -> Budgeted<bool> {
        self.refresh();
        self.run(b, |n, b| n.check(b, id))
    }

    /// Compute statistics. On a clone this routes to the original, which
    /// alone owns the planner scratch, then adopts the committed result.
    pub fn statistics(&self, b: &mut Budget) -> Budgeted<()> {
        self.refresh();
        let original = self.0.borrow().original.clone();
        if let Some(orig) = original {
            orig.statistics(b)?;
            self.refresh();
            let oc = orig.0.borrow();
            if let (Node::Linksto(theirs), Node::Linksto(mine)) =
                (&oc.node, &mut self.0.borrow_mut().node)
            {
                mine.adopt_committed(theirs);
            }
            return Ok(());
        }
        self.run(b, |n, b| n.statistics_step(b))
    }

    pub fn reset(&self) {
        self.refresh();
        self.0.borrow_mut().node.reset();
    }

    /// Independent deep copy. Sub-cursors are cloned recursively; the copy
    /// shares this cursor's original (or this cursor, if it is an original)
    /// for statistics.
    pub fn clone_cursor(&self) -> Cursor {
        self.refresh();
        let core = self.0.borrow();
        let (original, synced) = match &core.original {
            Some(orig) => (orig.clone(), core.synced),
            None => (self.clone(), core.id),
        };
        Cursor(Rc::new(RefCell::new(CursorCore {
            id: next_identity(),
            original: Some(original),
            synced,
            node: core.node.clone_node(),
        })))
    }

    pub fn freeze(&self, flags: FreezeFlags) -> Result<String, EngineError> {
        self.refresh();
        let core = self.0.borrow();
        let mut out = String::new();
        if flags.set() {
            core.node.freeze_set(&mut out)?;
        }
        if flags.position() {
            if !out.is_empty() {
                out.push('/');
            }
            core.node.freeze_position(&mut out)?;
        }
        if flags.state() {
            if !out.is_empty() {
                out.push('/');
            }
            core.node.freeze_state(&mut out)?;
        }
        Ok(out)
    }

    pub fn primitive_summary(&self) -> Option<PrimitiveSummary> {
        self.refresh();
        self.0.borrow().node.primitive_summary()
    }

    pub fn range_estimate(&self) -> RangeEstimate {
        self.refresh();
        self.0.borrow().node.range_estimate()
    }

    pub fn restrict(&self, ps: &PrimitiveSummary) -> Result<Restriction, EngineError> {
        self.refresh();
        self.0.borrow().node.restrict(ps)
    }

    pub fn beyond(&self, value: Id) -> bool {
        self.refresh();
        self.0.borrow().node.beyond(value)
    }

    /// Release everything the cursor owns. Idempotent; the handle stays
    /// usable as an empty cursor.
    pub fn finish(&self) {
        let mut core = self.0.borrow_mut();
        let (low, high, forward) = (core.node.low(), core.node.high(), core.node.forward());
        if !matches!(core.node, Node::Null(_)) {
            core.node = Node::Null(NullNode::new(low, high, forward));
            core.id = next_identity();
        }
    }

    pub fn stats(&self) -> Option<CursorStats> {
        self.0.borrow().node.stats()
    }

    pub fn sorted(&self) -> Option<bool> {
        self.stats().map(|s| s.sorted)
    }

    pub fn ordered(&self) -> Option<bool> {
        self.stats().map(|s| s.ordered)
    }

    pub fn low(&self) -> Id {
        self.0.borrow().node.low()
    }

    pub fn high(&self) -> Id {
        self.0.borrow().node.high()
    }

    pub fn forward(&self) -> bool {
        self.0.borrow().node.forward()
    }

    pub fn last_returned(&self) -> Option<Id> {
        self.0.borrow().node.last_returned()
    }

    /// Set the caller's direction preference (consulted by self-planning
    /// cursors; a no-op on the simple kinds).
    pub fn set_direction(&self, direction: Direction) {
        if let Node::Linksto(lt) = &mut self.0.borrow_mut().node {
            lt.set_direction(direction);
        }
    }

    pub(crate) fn with_node<R>(&self, f: impl FnOnce(&Node) -> R) -> R {
        f(&self.0.borrow().node)
    }

    pub(crate) fn with_node_mut<R>(&self, f: impl FnOnce(&mut Node) -> R) -> R {
        f(&mut self.0.borrow_mut().node)
    }
}

impl fmt::Debug for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.0.borrow();
        write!(f, "Cursor#{}({})", core.id, core.node.kind())
    }
}

/// Bounded sorted intersection: drain ids common to `a` and `b` within
/// `[low, high)` into `out`, stopping at `max` entries or budget exhaustion.
/// Returns the number of ids appended; `More` means the intersection was cut
/// short (what is in `out` is a valid prefix).
pub fn intersect_into(
    a: &Cursor,
    b_cur: &Cursor,
    low: Id,
    high: Id,
    budget: &mut Budget,
    out: &mut Vec<Id>,
    max: usize,
) -> Budgeted<usize> {
    let start = out.len();
    let mut probe = low;
    loop {
        budget.check()?;
        let x = match a.find(budget, probe) {
            Ok(x) => x,
            Err(Interrupt::No) => break,
            Err(e) => return Err(e),
        };
        if x >= high {
            break;
        }
        let y = match b_cur.find(budget, x) {
            Ok(y) => y,
            Err(Interrupt::No) => break,
            Err(e) => return Err(e),
        };
        if y >= high {
            break;
        }
        if x == y {
            out.push(x);
            if out.len() - start >= max {
                break;
            }
            probe = x + 1;
        } else {
            // y > x: leapfrog
            probe = y;
        }
    }
    Ok(out.len() - start)
}

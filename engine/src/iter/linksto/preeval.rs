//! At-construction preevaluation.
//!
//! Before committing to a self-planning linksto, try to materialize the
//! whole answer while it is still cheap: a small `sub` whose fanins fit the
//! preevaluation caps becomes a NULL, FIXED or OR cursor up front, skipping
//! the sampling machinery entirely. The materialized cursor gets a
//! masquerade string so it still freezes as the linksto specification it
//! stands for.

use super::{LinkstoNode, LinkstoSpec};
use crate::budget::Budget;
use crate::error::{Budgeted, EngineError, Interrupt};
use crate::iter::fanin::fanin_cursor;
use crate::iter::fixed::FixedNode;
use crate::iter::null::null_cursor;
use crate::iter::or::OrNode;
use crate::iter::{Cursor, Node};
use crate::pdb::{Id, Store};

/// Give up once `sub` might produce this many endpoints.
pub(crate) const PREEVALUATE_N: u64 = 1024;
/// Largest total result set preevaluation will drain into a FIXED.
pub(crate) const PREEVALUATE_ID_N: u64 = 1024;
/// Work ceiling for the whole attempt, in budget units.
pub(crate) const PREEVALUATE_BUDGET: i64 = 102_400;
/// An OR with at least this many parts gets a paired linksto check channel.
const OR_CHECK_CHANNEL_MIN: usize = 7;

/// Try to materialize the linksto described by `spec` over `sub`.
///
/// `Ok(Some(_))` is the finished replacement; `Ok(None)` means "too big or
/// too uncertain, build the plain linksto" — in that case `sub` has been
/// reset and may be handed to the plain constructor.
pub(crate) fn preevaluate(
    store: &Store,
    spec: &LinkstoSpec,
    sub: &Cursor,
) -> Result<Option<Cursor>, EngineError> {
    match attempt(store, spec, sub) {
        Ok(Some(cursor)) => Ok(Some(cursor)),
        Ok(None) | Err(Interrupt::More) | Err(Interrupt::No) => {
            sub.reset();
            Ok(None)
        }
        Err(Interrupt::Fail(e)) => {
            sub.reset();
            Err(e)
        }
    }
}

fn attempt(store: &Store, spec: &LinkstoSpec, sub: &Cursor) -> Budgeted<Option<Cursor>> {
    if sub.kind() == "null" {
        return Ok(Some(null_cursor(spec.low, spec.high, spec.forward)));
    }

    let mut b = Budget::new(PREEVALUATE_BUDGET);
    if sub.stats().is_none() {
        sub.statistics(&mut b)?;
    }
    let Some(sub_stats) = sub.stats() else {
        return Ok(None);
    };
    if sub_stats.n >= PREEVALUATE_N
        || sub_stats.n.saturating_mul(sub_stats.next_cost) > PREEVALUATE_BUDGET as u64
    {
        return Ok(None);
    }

    // The masquerade must describe the cursor before sub is consumed; the
    // set form is position-independent so now is as good a time as any.
    let masquerade_body = LinkstoNode::new(store.clone(), spec.clone(), sub.clone_cursor());

    // Enumerate sub, opening one fanin per endpoint.
    let mut parts: Vec<Cursor> = Vec::new();
    let mut total_id_n: u64 = 0;
    loop {
        b.check()?;
        let endpoint = match sub.next(&mut b) {
            Ok(id) => id,
            Err(Interrupt::No) => break,
            Err(e) => return Err(e),
        };
        let part = fanin_cursor(
            store,
            spec.linkage,
            endpoint,
            spec.hint,
            spec.low,
            spec.high,
            spec.forward,
            &mut b,
        )?;
        let range = part.range_estimate();
        let part_n = range.n_max.unwrap_or(0);
        if part_n == 0 {
            // Nothing points here; the part contributes nothing.
            continue;
        }
        total_id_n = total_id_n.saturating_add(part_n);
        parts.push(part);
        if parts.len() as u64 > PREEVALUATE_N {
            return Ok(None);
        }
    }

    if parts.is_empty() {
        return Ok(Some(null_cursor(spec.low, spec.high, spec.forward)));
    }

    if parts.len() == 1 && total_id_n == 1 {
        // One endpoint, one pointer: a one-element FIXED.
        let only = match parts[0].next(&mut b) {
            Ok(id) => id,
            Err(Interrupt::No) => return Ok(Some(null_cursor(spec.low, spec.high, spec.forward))),
            Err(e) => return Err(e),
        };
        let mut node = FixedNode::new(vec![only], spec.low, spec.high, spec.forward);
        node.set_masquerade(masquerade_body.masquerade_string("fixed-")?);
        return Ok(Some(Cursor::from_node(Node::Fixed(node))));
    }

    if parts.len() == 1 {
        let part = parts.pop().expect("one part");
        part.with_node_mut(|n| {
            if let Node::Fanin(f) = n {
                if let Ok(masq) = masquerade_body.masquerade_string("fixed-") {
                    f.set_masquerade(masq);
                }
            }
        });
        return Ok(Some(part));
    }

    if total_id_n <= PREEVALUATE_ID_N {
        match drain_into_fixed(&parts, total_id_n, &mut b)? {
            Some(ids) => {
                let mut node = FixedNode::new(ids, spec.low, spec.high, spec.forward);
                node.set_masquerade(masquerade_body.masquerade_string("fixed-")?);
                return Ok(Some(Cursor::from_node(Node::Fixed(node))));
            }
            // Miscounted: fall through to the OR shape.
            None => {}
        }
    }

    let mut node = OrNode::new(parts, spec.low, spec.high, spec.forward);
    node.set_masquerade(masquerade_body.masquerade_string("or-")?);
    if node.part_count() >= OR_CHECK_CHANNEL_MIN {
        // Probing that many parts per membership question costs more than
        // one linksto check; pair one up.
        let check_sub = sub.clone_cursor();
        check_sub.reset();
        let mut check_spec = spec.clone();
        check_spec.direction = Default::default();
        let check = super::linksto_cursor_plain(store, check_spec, check_sub);
        node.set_check_alt(check);
    }
    Ok(Some(Cursor::from_node(Node::Or(node))))
}

/// Drain every part into one ascending id list. `None` means the parts
/// overflowed the declared count and the caller should fall back to an OR.
fn drain_into_fixed(parts: &[Cursor], declared: u64, b: &mut Budget) -> Budgeted<Option<Vec<Id>>> {
    let mut ids: Vec<Id> = Vec::with_capacity(declared as usize);
    for part in parts {
        part.reset();
        loop {
            b.check()?;
            match part.next(b) {
                Ok(id) => {
                    ids.push(id);
                    if ids.len() as u64 > PREEVALUATE_ID_N {
                        for p in parts {
                            p.reset();
                        }
                        return Ok(None);
                    }
                }
                Err(Interrupt::No) => break,
                Err(e) => return Err(e),
            }
        }
    }
    Ok(Some(ids))
}

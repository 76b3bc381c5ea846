//! Linksto wire format.
//!
//! Set form:
//! ```text
//! linksto:<dir><low>[-<high>]:<linkage>[+<typeguid>]->(<sub-set>)
//!     [md:<method>][o:<ordering>][a:<acct>][h:<linkage>=<guid>]
//! ```
//! (one line, no spaces; the hint rides inline after `+` only when its
//! linkage is TYPEGUID, in the `[h:]` tail otherwise).
//!
//! Position form: `<method>:<last_id>:<last_sub_id>`.
//!
//! State form: `<call_state>:(<sub pos/state>):<fanin>:<planner>`, where the
//! planner block is the committed `<check>:<next>[+<find>]:<n>:` or the
//! in-progress `[stat.sf:...]`/`[stat.tc:...]` blocks.
//!
//! Thaw validates every field; a structurally valid string with impossible
//! content (sample overflow, orphaned call state) is a `BadCursor`.

use super::planner::{SampleState, N_SAMPLES};
use super::producer::resume_after;
use super::{linksto_cursor_plain, LinkstoNode, LinkstoSpec, Method, NextState};
use crate::error::EngineError;
use crate::freeze::{split_forms, write_span, FreezeFlags, Scanner};
use crate::iter::{Cursor, CursorStats, Node};
use crate::pdb::{Guid, Linkage, Store};
use itertools::Itertools;
use std::rc::Rc;

pub(crate) fn freeze_set(node: &LinkstoNode, out: &mut String) -> Result<(), EngineError> {
    out.push_str("linksto:");
    write_span(out, node.forward, node.low, node.high);
    out.push(':');
    out.push_str(node.linkage.name());
    let mut hint_tail = None;
    if let Some((hl, hg)) = node.hint {
        if hl == Linkage::Typeguid {
            out.push('+');
            out.push_str(&hg.to_string());
        } else {
            hint_tail = Some((hl, hg));
        }
    }
    out.push_str("->(");
    let mut sub_set = String::new();
    node.sub.with_node(|n| n.freeze_set(&mut sub_set))?;
    out.push_str(&sub_set);
    out.push(')');
    if node.method != Method::Unspecified {
        out.push_str("[md:");
        out.push_str(node.method.token());
        out.push(']');
    }
    if let Some(ordering) = &node.ordering {
        out.push_str("[o:");
        out.push_str(ordering);
        out.push(']');
    }
    if let Some(acct) = node.acct {
        out.push_str("[a:");
        out.push_str(&acct.to_string());
        out.push(']');
    }
    if let Some((hl, hg)) = hint_tail {
        out.push_str("[h:");
        out.push_str(hl.name());
        out.push('=');
        out.push_str(&hg.to_string());
        out.push(']');
    }
    Ok(())
}

pub(crate) fn freeze_position(node: &LinkstoNode, out: &mut String) -> Result<(), EngineError> {
    out.push_str(node.method.token());
    out.push(':');
    match node.last_id {
        Some(id) => out.push_str(&id.to_string()),
        None => out.push('-'),
    }
    out.push(':');
    match node.source {
        Some(id) => out.push_str(&id.to_string()),
        None => out.push('-'),
    }
    Ok(())
}

/// Serialized resume label. Mid-candidate TYPECHECK states normalize to the
/// hint-resume label: re-seeking the hint cursor past `last_id` on thaw
/// re-examines a bounded tail of candidates and yields the same sequence.
fn call_state_label(node: &LinkstoNode) -> u32 {
    match node.next_state {
        NextState::Start => 0,
        NextState::SubNext | NextState::Resync | NextState::ResyncScan => 1,
        NextState::FaninOpen => 2,
        NextState::FaninNext => 3,
        NextState::HintNext
        | NextState::HintFind
        | NextState::Process { .. }
        | NextState::SubCheck { .. } => 6,
    }
}

pub(crate) fn freeze_state(node: &LinkstoNode, out: &mut String) -> Result<(), EngineError> {
    out.push_str(&call_state_label(node).to_string());
    out.push_str(":(");
    let mut sub_ps = String::new();
    node.sub.with_node(|n| n.freeze_position(&mut sub_ps))?;
    sub_ps.push('/');
    node.sub.with_node(|n| n.freeze_state(&mut sub_ps))?;
    out.push_str(&sub_ps);
    out.push_str("):");
    match &node.fanin {
        Some(fan) => {
            out.push('(');
            out.push_str(&fan.freeze(FreezeFlags::ALL)?);
            out.push(')');
        }
        None => out.push('-'),
    }
    out.push(':');
    if let Some(stats) = node.stats {
        out.push_str(&stats.check_cost.to_string());
        out.push(':');
        out.push_str(&stats.next_cost.to_string());
        if stats.find_cost > 0 {
            out.push('+');
            out.push_str(&stats.find_cost.to_string());
        }
        out.push(':');
        out.push_str(&stats.n.to_string());
        out.push(':');
        return Ok(());
    }
    let planner = &node.planner;
    let mut any = false;
    if let Some(it) = &planner.sf.it {
        any = true;
        out.push_str("[stat.sf:(");
        out.push_str(&it.freeze(FreezeFlags::ALL)?);
        out.push_str("):");
        out.push_str(&planner.sf.state.label().to_string());
        out.push(':');
        out.push_str(&planner.sf.ids.len().to_string());
        out.push(':');
        out.push_str(&planner.sf.fanin_total.to_string());
        out.push(':');
        out.push_str(&planner.sf.sub_n.to_string());
        out.push(':');
        out.push_str(&planner.sf.ids.iter().join(","));
        out.push(']');
    }
    if let Some(hint) = &planner.tc.hint {
        let sub = planner
            .tc
            .sub
            .as_ref()
            .ok_or_else(|| EngineError::BadCursor("typecheck sampler without sub clone".into()))?;
        any = true;
        out.push_str("[stat.tc:(");
        out.push_str(&sub.freeze(FreezeFlags::ALL)?);
        out.push_str("):(");
        out.push_str(&hint.freeze(FreezeFlags::ALL)?);
        out.push_str("):");
        out.push_str(&planner.tc.state.label().to_string());
        out.push(':');
        out.push_str(&planner.tc.ids.len().to_string());
        out.push(':');
        out.push_str(&planner.tc.trials.to_string());
        out.push(':');
        out.push_str(&planner.tc.cost.to_string());
        out.push(':');
        match planner.tc.pending_endpoint {
            Some(id) => out.push_str(&id.to_string()),
            None => out.push('-'),
        }
        out.push(':');
        out.push_str(&planner.tc.ids.iter().join(","));
        out.push(']');
    }
    if !any {
        out.push('-');
    }
    Ok(())
}

impl LinkstoNode {
    /// Set-form string with a morph prefix, installed on materialized
    /// replacements so they keep freezing as this specification.
    pub(crate) fn masquerade_string(&self, prefix: &str) -> Result<Rc<str>, EngineError> {
        let mut out = String::from(prefix);
        freeze_set(self, &mut out)?;
        Ok(Rc::from(out))
    }
}

/// Parse a set form into the spec and the sub cursor's frozen set text.
fn parse_set(set: &str) -> Result<(LinkstoSpec, &str, Method), EngineError> {
    let mut s = Scanner::new(set);
    s.expect_tag("linksto:")?;
    let (forward, low, high) = s.span()?;
    s.expect(':')?;
    let linkage = Linkage::from_name(s.ident()?)
        .ok_or_else(|| EngineError::Lexical(format!("bad linkage in {set:?}")))?;
    let mut hint: Option<(Linkage, Guid)> = None;
    if s.eat('+') {
        hint = Some((Linkage::Typeguid, s.guid()?));
    }
    s.expect_tag("->")?;
    let sub_set = s.group()?;
    let mut method = Method::Unspecified;
    let mut ordering = None;
    let mut acct = None;
    while !s.done() {
        let tail = s.bracket()?;
        let mut t = Scanner::new(tail);
        if t.tag("md:") {
            method = Method::from_token(t.rest())
                .ok_or_else(|| EngineError::Lexical(format!("bad method {tail:?}")))?;
        } else if t.tag("o:") {
            ordering = Some(t.rest().to_string());
        } else if t.tag("a:") {
            acct = Some(t.u64_val()?);
            t.expect_done("acct tail")?;
        } else if t.tag("h:") {
            let hl = Linkage::from_name(t.ident()?)
                .ok_or_else(|| EngineError::Lexical(format!("bad hint linkage {tail:?}")))?;
            t.expect('=')?;
            let hg = t.guid()?;
            t.expect_done("hint tail")?;
            if hint.is_some() {
                return Err(EngineError::Lexical("duplicate hint".into()));
            }
            hint = Some((hl, hg));
        } else {
            return Err(EngineError::Lexical(format!("unknown tail {tail:?}")));
        }
    }
    let spec = LinkstoSpec {
        linkage,
        hint,
        low,
        high,
        forward,
        ordering,
        acct,
        direction: Default::default(),
    };
    Ok((spec, sub_set, method))
}

pub(crate) fn thaw(
    store: &Store,
    set: &str,
    position: Option<&str>,
    state: Option<&str>,
) -> Result<Cursor, EngineError> {
    let (spec, sub_set, method) = parse_set(set)?;

    // The sub cursor: set form from here, position/state from the state
    // form when present.
    let sub_full = match state {
        Some(state) if state != "-" => format!("{}/{}", sub_set, parse_sub_pos_state(state)?),
        _ => sub_set.to_string(),
    };
    let sub = crate::freeze::thaw(store, &sub_full)?;

    let mut node = LinkstoNode::new(store.clone(), spec, sub);
    node.method = method;
    node.thawed = true;

    if let Some(position) = position {
        apply_position(&mut node, position)?;
    }
    if let Some(state) = state {
        if state != "-" {
            apply_state(&mut node, store, state)?;
        }
    }
    node.sub_id = node.sub.identity();
    // A position without call state still resumes exactly on the sorted
    // path: re-seek the hint side past the last yielded id.
    if node.method == Method::Typecheck
        && node.last_id.is_some()
        && node.next_state == NextState::Start
    {
        node.next_state = NextState::HintFind;
    }
    resume_after(&mut node);
    Ok(Cursor::from_node(Node::Linksto(Box::new(node))))
}

/// Extract the `(sub pos/state)` group of a state form.
fn parse_sub_pos_state(state: &str) -> Result<String, EngineError> {
    let mut s = Scanner::new(state);
    let _label = s.u64_val()?;
    s.expect(':')?;
    Ok(s.group()?.to_string())
}

fn apply_position(node: &mut LinkstoNode, position: &str) -> Result<(), EngineError> {
    let mut s = Scanner::new(position);
    let method = if s.eat('-') {
        Method::Unspecified
    } else {
        Method::from_token(s.ident()?)
            .ok_or_else(|| EngineError::Lexical(format!("bad method in {position:?}")))?
    };
    if node.method == Method::Unspecified {
        node.method = method;
    } else if method != Method::Unspecified && method != node.method {
        return Err(EngineError::BadCursor("position method contradicts set form".into()));
    }
    s.expect(':')?;
    node.last_id = s.opt_u64()?;
    s.expect(':')?;
    node.source = s.opt_u64()?;
    s.expect_done("linksto position")?;
    Ok(())
}

fn apply_state(node: &mut LinkstoNode, store: &Store, state: &str) -> Result<(), EngineError> {
    let mut s = Scanner::new(state);
    let label = s.u64_val()? as u32;
    s.expect(':')?;
    let _sub_pos_state = s.group()?; // already folded into the sub thaw
    s.expect(':')?;
    if !s.eat('-') {
        let fanin_full = s.group()?;
        node.fanin = Some(crate::freeze::thaw(store, fanin_full)?);
    }
    s.expect(':')?;

    node.next_state = match label {
        0 => NextState::Start,
        1 => NextState::SubNext,
        2 => NextState::FaninOpen,
        3 => NextState::FaninNext,
        6 => NextState::HintFind,
        other => {
            return Err(EngineError::BadCursor(format!("unknown call state {other}")));
        }
    };
    let label_method_ok = match label {
        1..=3 => node.method == Method::Subfanin,
        6 => node.method == Method::Typecheck,
        _ => true,
    };
    if !label_method_ok {
        return Err(EngineError::BadCursor(format!(
            "call state {label} contradicts method {:?}",
            node.method
        )));
    }
    match node.next_state {
        NextState::FaninOpen if node.source.is_none() => {
            return Err(EngineError::BadCursor("fanin-open state without source".into()));
        }
        NextState::FaninNext if node.fanin.is_none() => {
            // The fanin did not travel; reopen it from the saved source.
            if node.source.is_none() {
                return Err(EngineError::BadCursor("fanin state without source".into()));
            }
            node.next_state = NextState::FaninOpen;
        }
        _ => {}
    }

    let rest = s.rest();
    if rest == "-" {
        return Ok(());
    }
    if rest.starts_with('[') {
        while !s.done() {
            let block = s.bracket()?;
            apply_stat_block(node, store, block)?;
        }
        return Ok(());
    }
    // Committed planner block: <check>:<next>[+<find>]:<n>:
    let check_cost = s.u64_val()?;
    s.expect(':')?;
    let next_cost = s.u64_val()?;
    let find_cost = if s.eat('+') { s.u64_val()? } else { 0 };
    s.expect(':')?;
    let n = s.u64_val()?;
    s.expect(':')?;
    s.expect_done("linksto planner block")?;
    let (sorted, ordered) = match node.method {
        Method::Typecheck => (true, true),
        Method::Subfanin => (false, node.sub.ordered().unwrap_or(false)),
        Method::Unspecified => {
            return Err(EngineError::BadCursor("committed statistics without method".into()));
        }
    };
    node.stats = Some(CursorStats {
        n,
        next_cost,
        check_cost,
        find_cost,
        sorted,
        ordered,
    });
    Ok(())
}

fn apply_stat_block(node: &mut LinkstoNode, store: &Store, block: &str) -> Result<(), EngineError> {
    let mut s = Scanner::new(block);
    if s.tag("stat.sf:") {
        let frozen = s.group()?;
        s.expect(':')?;
        let state = SampleState::from_label(s.u64_val()? as u32)
            .ok_or_else(|| EngineError::BadCursor("bad sampling state".into()))?;
        s.expect(':')?;
        let id_n = s.u64_val()? as usize;
        s.expect(':')?;
        let fanin_total = s.u64_val()?;
        s.expect(':')?;
        let sub_n = s.u64_val()?;
        s.expect(':')?;
        let ids = parse_id_list(s.rest())?;
        if id_n > N_SAMPLES || ids.len() != id_n {
            return Err(EngineError::BadCursor("sample count out of range".into()));
        }
        let it = crate::freeze::thaw(store, frozen)?;
        let sf = &mut node.planner.sf;
        sf.pending = match state {
            SampleState::UseId => it.last_returned(),
            _ => None,
        };
        sf.it = Some(it);
        sf.state = state;
        sf.ids = ids.iter().copied().collect();
        // Per-endpoint counts do not travel; only the total matters after
        // a thaw. Spread it so the arrays stay parallel.
        sf.fanins = ids
            .iter()
            .enumerate()
            .map(|(i, _)| {
                let base = fanin_total / (id_n.max(1) as u64);
                if i == 0 {
                    base + fanin_total % (id_n.max(1) as u64)
                } else {
                    base
                }
            })
            .collect();
        sf.fanin_total = fanin_total;
        sf.sub_n = sub_n;
        return Ok(());
    }
    if s.tag("stat.tc:") {
        let sub_frozen = s.group()?;
        s.expect(':')?;
        let hint_frozen = s.group()?;
        s.expect(':')?;
        let state = SampleState::from_label(s.u64_val()? as u32)
            .ok_or_else(|| EngineError::BadCursor("bad sampling state".into()))?;
        s.expect(':')?;
        let id_n = s.u64_val()? as usize;
        s.expect(':')?;
        let trials = s.u64_val()?;
        s.expect(':')?;
        let cost = s.u64_val()?;
        s.expect(':')?;
        let pending_endpoint = s.opt_u64()?;
        s.expect(':')?;
        let ids = parse_id_list(s.rest())?;
        if id_n > N_SAMPLES || ids.len() != id_n {
            return Err(EngineError::BadCursor("sample count out of range".into()));
        }
        let tc = &mut node.planner.tc;
        tc.sub = Some(crate::freeze::thaw(store, sub_frozen)?);
        tc.hint = Some(crate::freeze::thaw(store, hint_frozen)?);
        tc.state = state;
        tc.ids = ids.iter().copied().collect();
        tc.trials = trials;
        tc.cost = cost;
        tc.pending_endpoint = pending_endpoint;
        return Ok(());
    }
    Err(EngineError::Lexical(format!("unknown planner block {block:?}")))
}

fn parse_id_list(text: &str) -> Result<Vec<u64>, EngineError> {
    if text.is_empty() {
        return Ok(Vec::new());
    }
    text.split(',')
        .map(|part| {
            let mut p = Scanner::new(part);
            let v = p.u64_val()?;
            p.expect_done("id list")?;
            Ok(v)
        })
        .collect()
}

/// Thaw a `fixed-`/`or-` masquerade: rebuild the linksto it stands for,
/// re-run preevaluation, and replay the saved position. Falls back to the
/// plain linksto when the data no longer preevaluates.
pub(crate) fn thaw_masquerade(
    store: &Store,
    text: &str,
    prefix: &str,
) -> Result<Cursor, EngineError> {
    let body = &text[prefix.len()..];
    let (set, position, _state) = split_forms(body)?;
    let (spec, sub_set, _method) = parse_set(set)?;
    let sub = crate::freeze::thaw(store, sub_set)?;
    let cursor = match super::preeval::preevaluate(store, &spec, &sub)? {
        Some(cursor) => cursor,
        None => linksto_cursor_plain(store, spec, sub),
    };
    if let Some(position) = position {
        let mut p = Scanner::new(position);
        if let Some(last) = p.opt_u64()? {
            cursor.with_node_mut(|n| n.replay(Some(last)));
        }
    }
    Ok(cursor)
}

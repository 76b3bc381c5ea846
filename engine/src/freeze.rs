//! Frozen-cursor wire format: flags, scanning and thaw dispatch.
//!
//! A frozen cursor is up to three `/`-separated forms, in order:
//!  - *set*: the cursor's identity, enough to rebuild it at default position;
//!  - *position*: where iteration stands;
//!  - *state*: in-flight call state, including mid-statistics sampling.
//!
//! Nested frozen cursors are always parenthesized, so `/`, `:` and `;` can
//! be split at top level without further quoting. Tags match
//! case-insensitively; everything the engine emits is lowercase. A frozen
//! form with no content (a positionless cursor, say) is the single byte `-`.

use crate::error::{lexical, EngineError};
use crate::iter::{all, fanin, fixed, null, or};
use crate::iter::{linksto, Cursor};
use crate::pdb::{Guid, Id, Store, ID_MAX};
use std::ops::BitOr;

/// Which forms [`Cursor::freeze`] renders.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct FreezeFlags(u8);

impl FreezeFlags {
    pub const SET: FreezeFlags = FreezeFlags(1);
    pub const POSITION: FreezeFlags = FreezeFlags(2);
    pub const STATE: FreezeFlags = FreezeFlags(4);
    pub const ALL: FreezeFlags = FreezeFlags(7);

    pub fn set(self) -> bool {
        self.0 & 1 != 0
    }

    pub fn position(self) -> bool {
        self.0 & 2 != 0
    }

    pub fn state(self) -> bool {
        self.0 & 4 != 0
    }
}

impl BitOr for FreezeFlags {
    type Output = FreezeFlags;

    fn bitor(self, rhs: FreezeFlags) -> FreezeFlags {
        FreezeFlags(self.0 | rhs.0)
    }
}

/// Render direction + bounds: `+low`, `~low`, `+low-high`.
/// An unbounded high is elided.
pub(crate) fn write_span(out: &mut String, forward: bool, low: Id, high: Id) {
    out.push(if forward { '+' } else { '~' });
    out.push_str(&low.to_string());
    if high != ID_MAX {
        out.push('-');
        out.push_str(&high.to_string());
    }
}

/// Split a frozen string into its set/position/state forms at top-level `/`.
pub(crate) fn split_forms(text: &str) -> Result<(&str, Option<&str>, Option<&str>), EngineError> {
    let mut parts = split_top(text, '/');
    if parts.is_empty() || parts.len() > 3 {
        return Err(lexical("frozen cursor", format!("{} forms", parts.len())));
    }
    let state = if parts.len() == 3 { parts.pop() } else { None };
    let position = if parts.len() == 2 { parts.pop() } else { None };
    Ok((parts[0], position, state))
}

/// Split `text` on `sep` occurring outside any `()`/`[]` nesting.
pub(crate) fn split_top(text: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        match c {
            '(' | '[' => depth += 1,
            ')' | ']' => depth = depth.saturating_sub(1),
            c if c == sep && depth == 0 => {
                parts.push(&text[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&text[start..]);
    parts
}

/// Hand-rolled scanner over one frozen form.
pub(crate) struct Scanner<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> Scanner<'a> {
    pub fn new(text: &'a str) -> Scanner<'a> {
        Scanner { text, pos: 0 }
    }

    pub fn rest(&self) -> &'a str {
        &self.text[self.pos..]
    }

    pub fn done(&self) -> bool {
        self.pos >= self.text.len()
    }

    pub fn lexical(&self, what: &str) -> EngineError {
        lexical(what, format!("at {:?} in {:?}", self.rest(), self.text))
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    pub fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.pos += c.len_utf8();
            true
        } else {
            false
        }
    }

    pub fn expect(&mut self, c: char) -> Result<(), EngineError> {
        if self.eat(c) {
            Ok(())
        } else {
            Err(self.lexical(&format!("expected {c:?}")))
        }
    }

    /// Consume `tag` if the input starts with it, ignoring ASCII case.
    pub fn tag(&mut self, tag: &str) -> bool {
        let rest = self.rest();
        if rest.len() >= tag.len() && rest[..tag.len()].eq_ignore_ascii_case(tag) {
            self.pos += tag.len();
            true
        } else {
            false
        }
    }

    pub fn expect_tag(&mut self, tag: &str) -> Result<(), EngineError> {
        if self.tag(tag) {
            Ok(())
        } else {
            Err(self.lexical(&format!("expected tag {tag:?}")))
        }
    }

    pub fn u64_val(&mut self) -> Result<u64, EngineError> {
        let digits: &str = {
            let rest = self.rest();
            let end = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
            &rest[..end]
        };
        if digits.is_empty() {
            return Err(self.lexical("expected number"));
        }
        self.pos += digits.len();
        digits
            .parse()
            .map_err(|e| lexical("number", format!("{digits:?}: {e}")))
    }

    /// A decimal number, or `-` standing for "none".
    pub fn opt_u64(&mut self) -> Result<Option<u64>, EngineError> {
        if self.eat('-') {
            Ok(None)
        } else {
            self.u64_val().map(Some)
        }
    }

    pub fn guid(&mut self) -> Result<Guid, EngineError> {
        let hex: &str = {
            let rest = self.rest();
            let end = rest.find(|c: char| !c.is_ascii_hexdigit()).unwrap_or(rest.len());
            &rest[..end]
        };
        if hex.is_empty() {
            return Err(self.lexical("expected guid"));
        }
        self.pos += hex.len();
        hex.parse()
    }

    /// Lowercase identifier: `[a-z0-9_.]+`.
    pub fn ident(&mut self) -> Result<&'a str, EngineError> {
        let rest = self.rest();
        let end = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '.'))
            .unwrap_or(rest.len());
        if end == 0 {
            return Err(self.lexical("expected identifier"));
        }
        self.pos += end;
        Ok(&rest[..end])
    }

    /// `+low[-high]` or `~low[-high]`; returns (forward, low, high).
    pub fn span(&mut self) -> Result<(bool, Id, Id), EngineError> {
        let forward = if self.eat('+') {
            true
        } else if self.eat('~') {
            false
        } else {
            return Err(self.lexical("expected direction + or ~"));
        };
        let low = self.u64_val()?;
        let high = if self.eat('-') { self.u64_val()? } else { ID_MAX };
        Ok((forward, low, high))
    }

    /// Consume a balanced `(...)` group and return its inner text.
    pub fn group(&mut self) -> Result<&'a str, EngineError> {
        self.balanced('(', ')')
    }

    /// Consume a balanced `[...]` group and return its inner text.
    pub fn bracket(&mut self) -> Result<&'a str, EngineError> {
        self.balanced('[', ']')
    }

    fn balanced(&mut self, open: char, close: char) -> Result<&'a str, EngineError> {
        let rest = self.rest();
        if !rest.starts_with(open) {
            return Err(self.lexical(&format!("expected {open:?}")));
        }
        let mut depth = 0usize;
        for (i, c) in rest.char_indices() {
            if c == open {
                depth += 1;
            } else if c == close {
                depth -= 1;
                if depth == 0 {
                    let inner = &rest[open.len_utf8()..i];
                    self.pos += i + close.len_utf8();
                    return Ok(inner);
                }
            }
        }
        Err(self.lexical(&format!("unbalanced {open:?}")))
    }

    pub fn expect_done(&self, what: &str) -> Result<(), EngineError> {
        if self.done() {
            Ok(())
        } else {
            Err(self.lexical(&format!("trailing input after {what}")))
        }
    }
}

/// Reconstruct a cursor from its frozen string.
///
/// Dispatches on the leading tag. The `fixed-`/`or-` masquerade prefixes
/// rebuild the originating linksto and re-run its preevaluation, so a
/// masqueraded cursor thaws back into the materialized shape when the data
/// still allows it, and into the plain linksto otherwise.
pub fn thaw(store: &Store, text: &str) -> Result<Cursor, EngineError> {
    let lower_tag = |t: &str| text.len() >= t.len() && text[..t.len()].eq_ignore_ascii_case(t);
    if lower_tag("fixed-") {
        return linksto::thaw_masquerade(store, text, "fixed-");
    }
    if lower_tag("or-") {
        return linksto::thaw_masquerade(store, text, "or-");
    }
    let (set, position, state) = split_forms(text)?;
    if lower_tag("linksto:") {
        return linksto::thaw(store, set, position, state);
    }
    if lower_tag("null:") {
        return null::thaw(set);
    }
    if lower_tag("all:") {
        return all::thaw(store, set, position);
    }
    if lower_tag("fixed:") {
        return fixed::thaw(set, position);
    }
    if lower_tag("fanin:") {
        return fanin::thaw(store, set, position);
    }
    if lower_tag("or:") {
        return or::thaw(store, set, position, state);
    }
    Err(lexical("frozen cursor", format!("unknown tag in {text:?}")))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn split_respects_nesting() {
        let parts = split_top("a:(b/c):d/e/[f/g]", '/');
        assert_eq!(parts, vec!["a:(b/c):d", "e", "[f/g]"]);
    }

    #[test]
    fn forms_split() {
        let (s, p, t) = split_forms("fixed:+0:(1,2)/2/-").unwrap();
        assert_eq!(s, "fixed:+0:(1,2)");
        assert_eq!(p, Some("2"));
        assert_eq!(t, Some("-"));
        assert!(split_forms("a/b/c/d").is_err());
    }

    #[test]
    fn scanner_span_and_groups() {
        let mut s = Scanner::new("+17-40:(in(ner)):tail");
        let (fwd, low, high) = s.span().unwrap();
        assert!(fwd);
        assert_eq!((low, high), (17, 40));
        s.expect(':').unwrap();
        assert_eq!(s.group().unwrap(), "in(ner)");
        s.expect(':').unwrap();
        assert_eq!(s.ident().unwrap(), "tail");
        assert!(s.done());
    }

    #[test]
    fn scanner_unbounded_span() {
        let mut s = Scanner::new("~3");
        let (fwd, low, high) = s.span().unwrap();
        assert!(!fwd);
        assert_eq!(low, 3);
        assert_eq!(high, ID_MAX);
    }

    #[test]
    fn tags_match_case_insensitively() {
        let mut s = Scanner::new("Stat.SF:x");
        assert!(s.tag("stat.sf:"));
        assert_eq!(s.rest(), "x");
    }
}

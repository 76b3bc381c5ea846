//! Primitive/linkage store contract.
//!
//! The cursor runtime reads the graph through [`PrimitiveStore`]; it never
//! writes. A *primitive* is the smallest addressable record (node or link)
//! and carries up to four typed linkage pointers ([`Linkage`]): TYPEGUID,
//! LEFT, RIGHT and SCOPE, each naming another primitive by [`Guid`].
//! Primitives are addressed by dense local ids (`0..primitive_n()`), and the
//! *fanin* of `(linkage, endpoint)` is the ascending id list of primitives
//! whose `linkage` pointer targets `endpoint`.
//!
//! A (endpoint, linkage) pair whose fanin is hot enough may be backed by a
//! precomputed VIP array; [`PrimitiveStore::vip_id`] tells, and
//! [`PrimitiveStore::vip_count`] then counts fanin members that also satisfy
//! a second linkage constraint without touching the primitives themselves.

mod mem;

pub use mem::{MemStore, MemStoreBuilder};

use crate::error::EngineError;
use std::fmt;
use std::rc::Rc;
use std::str::FromStr;

/// Dense local primitive id.
pub type Id = u64;

/// Upper bound marker: a cursor with `high == ID_MAX` is unbounded above.
pub const ID_MAX: Id = Id::MAX;

/// Global 128-bit identity of a primitive, rendered as 32 hex digits.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Guid(pub u128);

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl fmt::Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Guid({:x})", self.0)
    }
}

impl FromStr for Guid {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        u128::from_str_radix(s, 16)
            .map(Guid)
            .map_err(|e| EngineError::Lexical(format!("guid {s:?}: {e}")))
    }
}

/// One of the four typed pointer slots of a primitive.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum Linkage {
    Typeguid,
    Left,
    Right,
    Scope,
}

impl Linkage {
    pub const ALL: [Linkage; 4] = [Linkage::Typeguid, Linkage::Left, Linkage::Right, Linkage::Scope];

    pub fn index(self) -> usize {
        match self {
            Linkage::Typeguid => 0,
            Linkage::Left => 1,
            Linkage::Right => 2,
            Linkage::Scope => 3,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Linkage::Typeguid => "typeguid",
            Linkage::Left => "left",
            Linkage::Right => "right",
            Linkage::Scope => "scope",
        }
    }

    pub fn from_name(name: &str) -> Option<Linkage> {
        Linkage::ALL.into_iter().find(|l| l.name().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for Linkage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One graph record: its own guid plus up to four linkage pointers.
#[derive(Clone, Debug)]
pub struct Primitive {
    guid: Guid,
    links: [Option<Guid>; 4],
}

impl Primitive {
    pub fn new(guid: Guid) -> Primitive {
        Primitive { guid, links: [None; 4] }
    }

    pub fn with_link(mut self, linkage: Linkage, target: Guid) -> Primitive {
        self.links[linkage.index()] = Some(target);
        self
    }

    pub fn guid(&self) -> Guid {
        self.guid
    }

    pub fn has_linkage(&self, linkage: Linkage) -> bool {
        self.links[linkage.index()].is_some()
    }

    pub fn linkage_guid(&self, linkage: Linkage) -> Option<Guid> {
        self.links[linkage.index()]
    }
}

/// Cost constants of the storage layer, in budget units.
///
/// Cursors charge these as they touch the store; the planner divides by them
/// when turning sampled budgets back into per-operation costs.
pub mod cost {
    pub const FUNCTION_CALL: u64 = 1;
    pub const GMAP_ELEMENT: u64 = 1;
    pub const GMAP_ARRAY: u64 = 4;
    pub const HMAP_ARRAY: u64 = 8;
    pub const PRIMITIVE: u64 = 24;
}

/// Read interface of the primitive store.
///
/// Fanin postings are exposed as shared ascending id slices; cursors window
/// and iterate them, charging [`cost`] units as they go.
pub trait PrimitiveStore {
    fn primitive_n(&self) -> u64;

    fn read(&self, id: Id) -> Result<Primitive, EngineError>;

    fn guid_of(&self, id: Id) -> Result<Guid, EngineError>;

    fn id_from_guid(&self, guid: Guid) -> Result<Option<Id>, EngineError>;

    /// Full ascending fanin posting of `(linkage, endpoint)`. Empty slice if
    /// nothing points there.
    fn fanin(&self, linkage: Linkage, endpoint: Id) -> Result<Rc<[Id]>, EngineError>;

    /// Does `(endpoint, linkage)` participate in a precomputed VIP array?
    fn vip_id(&self, endpoint: Id, linkage: Linkage) -> bool;

    /// Fanin posting of `(linkage, endpoint)` narrowed to members whose
    /// `other.0` pointer equals `other.1`, if a VIP array covers the pair.
    fn vip_fanin(
        &self,
        endpoint: Id,
        linkage: Linkage,
        other: (Linkage, Guid),
    ) -> Result<Option<Rc<[Id]>>, EngineError>;

    /// Count fanin members of `(linkage, endpoint)` within `[low, high)`
    /// whose `other` pointer (if given) matches, capped at `upper`.
    /// `None` means the count is not yet available; the caller treats that
    /// exactly like a suspension of the surrounding micro-step.
    fn vip_count(
        &self,
        endpoint: Id,
        linkage: Linkage,
        other: Option<(Linkage, Guid)>,
        low: Id,
        high: Id,
        upper: u64,
    ) -> Result<Option<u64>, EngineError>;

    /// Estimate of the fanin size of `(linkage, endpoint)` within
    /// `[low, high)`, capped at `upper`. Always available, possibly coarse.
    fn linkage_count_est(&self, linkage: Linkage, endpoint: Id, low: Id, high: Id, upper: u64) -> u64;
}

/// Shared handle to a store; cursors keep one each.
pub type Store = Rc<dyn PrimitiveStore>;

//! In-memory reference store.
//!
//! Backs the test suite and small embeddings. Ids are assigned densely in
//! insertion order; fanin postings are materialized per `(linkage, endpoint)`
//! when the builder seals the store. A pair becomes VIP once its posting
//! reaches the builder's threshold, mirroring how the on-disk store promotes
//! hot linkage arrays.

use super::{Guid, Id, Linkage, Primitive, PrimitiveStore};
use crate::error::EngineError;
use hashbrown::HashMap;
use std::rc::Rc;

pub struct MemStore {
    prims: Vec<Primitive>,
    by_guid: HashMap<Guid, Id>,
    postings: HashMap<(Linkage, Id), Rc<[Id]>>,
    vip_threshold: usize,
}

pub struct MemStoreBuilder {
    prims: Vec<Primitive>,
    by_guid: HashMap<Guid, Id>,
    vip_threshold: usize,
}

impl MemStore {
    pub fn builder() -> MemStoreBuilder {
        MemStoreBuilder {
            prims: Vec::new(),
            by_guid: HashMap::new(),
            // Pairs with at least this many fanin members get a VIP array.
            vip_threshold: 4,
        }
    }

    fn posting(&self, linkage: Linkage, endpoint: Id) -> Rc<[Id]> {
        self.postings
            .get(&(linkage, endpoint))
            .cloned()
            .unwrap_or_else(|| Rc::from(Vec::new()))
    }
}

impl MemStoreBuilder {
    /// Promote pairs to VIP at `threshold` fanin members instead of the default.
    pub fn vip_threshold(mut self, threshold: usize) -> MemStoreBuilder {
        self.vip_threshold = threshold;
        self
    }

    /// Insert a primitive; its guid must be fresh. Returns the assigned id.
    pub fn insert(&mut self, prim: Primitive) -> Id {
        let id = self.prims.len() as Id;
        let previous = self.by_guid.insert(prim.guid(), id);
        assert!(previous.is_none(), "duplicate guid {}", prim.guid());
        self.prims.push(prim);
        id
    }

    /// Seal the store: index guids and materialize every fanin posting.
    pub fn build(self) -> Rc<MemStore> {
        let mut postings: HashMap<(Linkage, Id), Vec<Id>> = HashMap::new();
        for (id, prim) in self.prims.iter().enumerate() {
            for linkage in Linkage::ALL {
                let Some(target_guid) = prim.linkage_guid(linkage) else {
                    continue;
                };
                let Some(&endpoint) = self.by_guid.get(&target_guid) else {
                    // Dangling pointer: legal, simply not part of any fanin.
                    continue;
                };
                postings.entry((linkage, endpoint)).or_default().push(id as Id);
            }
        }
        // Insertion order is id order, so the postings are already ascending.
        let postings = postings
            .into_iter()
            .map(|(key, ids)| (key, Rc::from(ids)))
            .collect();
        Rc::new(MemStore {
            prims: self.prims,
            by_guid: self.by_guid,
            postings,
            vip_threshold: self.vip_threshold,
        })
    }
}

fn window(posting: &[Id], low: Id, high: Id) -> &[Id] {
    let from = posting.partition_point(|&id| id < low);
    let to = posting.partition_point(|&id| id < high);
    &posting[from..to]
}

impl PrimitiveStore for MemStore {
    fn primitive_n(&self) -> u64 {
        self.prims.len() as u64
    }

    fn read(&self, id: Id) -> Result<Primitive, EngineError> {
        self.prims
            .get(id as usize)
            .cloned()
            .ok_or_else(|| EngineError::Store(format!("no primitive with id {id}")))
    }

    fn guid_of(&self, id: Id) -> Result<Guid, EngineError> {
        Ok(self.read(id)?.guid())
    }

    fn id_from_guid(&self, guid: Guid) -> Result<Option<Id>, EngineError> {
        Ok(self.by_guid.get(&guid).copied())
    }

    fn fanin(&self, linkage: Linkage, endpoint: Id) -> Result<Rc<[Id]>, EngineError> {
        Ok(self.posting(linkage, endpoint))
    }

    fn vip_id(&self, endpoint: Id, linkage: Linkage) -> bool {
        self.postings
            .get(&(linkage, endpoint))
            .is_some_and(|p| p.len() >= self.vip_threshold)
    }

    fn vip_fanin(
        &self,
        endpoint: Id,
        linkage: Linkage,
        other: (Linkage, Guid),
    ) -> Result<Option<Rc<[Id]>>, EngineError> {
        if !self.vip_id(endpoint, linkage) {
            return Ok(None);
        }
        let narrowed: Vec<Id> = self
            .posting(linkage, endpoint)
            .iter()
            .copied()
            .filter(|&id| {
                self.prims[id as usize].linkage_guid(other.0) == Some(other.1)
            })
            .collect();
        Ok(Some(Rc::from(narrowed)))
    }

    fn vip_count(
        &self,
        endpoint: Id,
        linkage: Linkage,
        other: Option<(Linkage, Guid)>,
        low: Id,
        high: Id,
        upper: u64,
    ) -> Result<Option<u64>, EngineError> {
        if !self.vip_id(endpoint, linkage) {
            return Ok(None);
        }
        let posting = self.posting(linkage, endpoint);
        let mut n = 0u64;
        for &id in window(&posting, low, high) {
            let keep = match other {
                None => true,
                Some((l, g)) => self.prims[id as usize].linkage_guid(l) == Some(g),
            };
            if keep {
                n += 1;
                if n >= upper {
                    break;
                }
            }
        }
        Ok(Some(n.min(upper)))
    }

    fn linkage_count_est(&self, linkage: Linkage, endpoint: Id, low: Id, high: Id, upper: u64) -> u64 {
        let posting = self.posting(linkage, endpoint);
        (window(&posting, low, high).len() as u64).min(upper)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::pdb::ID_MAX;

    fn tiny() -> Rc<MemStore> {
        let mut b = MemStore::builder().vip_threshold(3);
        // endpoint primitives
        for i in 0..4u128 {
            b.insert(Primitive::new(Guid(0x100 + i)));
        }
        // three pointers at endpoint 0, one at endpoint 1
        b.insert(Primitive::new(Guid(0x200)).with_link(Linkage::Left, Guid(0x100)));
        b.insert(Primitive::new(Guid(0x201)).with_link(Linkage::Left, Guid(0x100)));
        b.insert(
            Primitive::new(Guid(0x202))
                .with_link(Linkage::Left, Guid(0x100))
                .with_link(Linkage::Typeguid, Guid(0x103)),
        );
        b.insert(Primitive::new(Guid(0x203)).with_link(Linkage::Left, Guid(0x101)));
        b.build()
    }

    #[test]
    fn postings_are_sorted_windows() {
        let s = tiny();
        let p = s.fanin(Linkage::Left, 0).unwrap();
        assert_eq!(&*p, &[4, 5, 6]);
        assert_eq!(window(&p, 5, ID_MAX), &[5, 6]);
        assert_eq!(s.fanin(Linkage::Left, 3).unwrap().len(), 0);
    }

    #[test]
    fn vip_promotion_follows_threshold() {
        let s = tiny();
        assert!(s.vip_id(0, Linkage::Left));
        assert!(!s.vip_id(1, Linkage::Left));
    }

    #[test]
    fn vip_count_narrows_by_other_linkage() {
        let s = tiny();
        let n = s
            .vip_count(0, Linkage::Left, Some((Linkage::Typeguid, Guid(0x103))), 0, ID_MAX, 100)
            .unwrap();
        assert_eq!(n, Some(1));
        // non-VIP pair yields no count
        let n = s.vip_count(1, Linkage::Left, None, 0, ID_MAX, 100).unwrap();
        assert_eq!(n, None);
    }

    #[test]
    fn guid_roundtrip() {
        let s = tiny();
        let g = s.guid_of(5).unwrap();
        assert_eq!(s.id_from_guid(g).unwrap(), Some(5));
        assert_eq!(s.id_from_guid(Guid(0xdead)).unwrap(), None);
    }
}

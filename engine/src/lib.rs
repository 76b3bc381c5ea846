//! Cost-budgeted graph cursor runtime.
//!
//! This crate provides the cursor algebra of a graph database read path:
//! polymorphic cursors over primitive ids that plan themselves, charge every
//! unit of work against a caller-supplied [`Budget`], suspend cooperatively
//! when it runs out, and serialize (freeze) and resume (thaw) at any
//! suspension point. Its centerpiece is the [`linksto`](iter::linksto)
//! cursor, which enumerates the primitives pointing at a child cursor's
//! outputs through a chosen linkage.
//!
//! ## Example
//!
//! ```
//! use gravel::budget::Budget;
//! use gravel::iter::fixed::fixed_cursor;
//! use gravel::iter::linksto::{linksto_cursor, LinkstoSpec};
//! use gravel::pdb::{Guid, Linkage, MemStore, Primitive, Store, ID_MAX};
//!
//! // Two endpoints, three primitives pointing LEFT at the first.
//! let mut builder = MemStore::builder();
//! let e0 = builder.insert(Primitive::new(Guid(0x10)));
//! let _e1 = builder.insert(Primitive::new(Guid(0x11)));
//! for i in 0..3u128 {
//!     builder.insert(Primitive::new(Guid(0x20 + i)).with_link(Linkage::Left, Guid(0x10)));
//! }
//! let store: Store = builder.build();
//!
//! // Everything pointing LEFT at an output of {e0}.
//! let sub = fixed_cursor(vec![e0], 0, ID_MAX, true);
//! let spec = LinkstoSpec::new(Linkage::Left, 0, ID_MAX, true);
//! let cursor = linksto_cursor(&store, spec, sub).unwrap();
//!
//! let mut budget = Budget::new(100_000);
//! let mut results = Vec::new();
//! while let Ok(id) = cursor.next(&mut budget) {
//!     results.push(id);
//! }
//! assert_eq!(results, vec![2, 3, 4]);
//! ```

pub mod budget;
pub mod error;
pub mod freeze;
pub mod iter;
pub mod pdb;

pub use budget::{sabotage_flag, Budget, Sabotage};
pub use error::{Budgeted, EngineError, Interrupt};
pub use freeze::{thaw, FreezeFlags};
pub use iter::linksto::{linksto_cursor, linksto_cursor_plain, LinkstoSpec, Method};
pub use iter::{Cursor, CursorStats, Direction, PrimitiveSummary, RangeEstimate, Restriction};
pub use pdb::{Guid, Id, Linkage, MemStore, Primitive, PrimitiveStore, Store, ID_MAX};

//! Link storage.
//!
//! Records are stored flat, one per link key. Alongside them the cache keeps:
//! - A bidirectional adjacency index with per-edge reference counts
//! - A type index for introspection
//! - The garbage collection roots
//! - The owner entity of every partial key written through `write_partial`
//!
//! A record unreachable from every root is swept by the garbage collector.
//! Partial keys are swept together with their owner; until then an
//! unreferenced partial stays, though the entities it links to may not.

mod index;
mod links;

pub use index::{Adjacency, TypeIndex};
pub use links::{record_links, LinkCache, ListenerId, RemoveListener};

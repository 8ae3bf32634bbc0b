//! Graph operations on [`GraphState`](crate::store::GraphState).
//!
//! Writes flatten nested entities into keyed records, reads expand keys back
//! into nested views, and notifications walk the reference graph from each
//! changed key.

mod mutate;
mod notify;
mod resolve;

pub use notify::{ChangeStream, Unsubscribe};

//! # Graph State
//!
//! An in-memory normalized entity graph: nested objects are flattened into
//! identity-keyed records, references between records are tracked, and
//! denormalized views are rebuilt on demand.
//!
//! ## Core Concepts
//!
//! - **Keys**: `Type:id` strings identify entities; `Type:id.field.0` keys
//!   identify anonymous values owned by an entity
//! - **Link cache**: Flat records plus a parent/child reference index and
//!   reachability-based garbage collection
//! - **Mutate / resolve**: Normalizing writes and cycle-safe nested reads
//! - **Subscriptions**: Per-key and wildcard callbacks, cascading along
//!   references
//!
//! ## Example
//!
//! ```ignore
//! use graph_state::{GraphState, MutateOptions, ResolveOptions, StateConfig};
//! use serde_json::json;
//!
//! let state = GraphState::new(StateConfig::default())?;
//!
//! state.mutate_entity(
//!     &json!({
//!         "_type": "Post",
//!         "id": 1,
//!         "author": {"_type": "User", "id": 7, "name": "Ada"},
//!     }),
//!     MutateOptions::default(),
//! )?;
//!
//! // Post:1 now stores {"author": "User:7", ...}
//! let post = state.resolve("Post:1", ResolveOptions::deep());
//! ```

pub mod cache;
pub mod error;
pub mod keys;
pub mod plugins;
pub mod state;
pub mod store;
pub mod subscriptions;
pub mod types;

// Re-exports
pub use cache::{LinkCache, ListenerId, RemoveListener};
pub use error::{GraphError, Result};
pub use keys::{KeyGenerator, KeyResolver};
pub use plugins::Plugin;
pub use state::{ChangeStream, Unsubscribe};
pub use store::{GraphState, StateConfig, NOTIFY_DEPTH_LIMIT};
pub use subscriptions::{
    AbortController, AbortSignal, ChangeEvent, ChannelConfig, DropReason, SubscribeOptions,
    SubscriptionId,
};
pub use types::*;

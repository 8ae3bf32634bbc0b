//! Post-construction composition of the assembled state.

use crate::store::GraphState;
use std::sync::Arc;

/// Receives the assembled state and returns a replacement, or `None` to
/// leave it unchanged.
pub type Plugin = Arc<dyn Fn(&GraphState) -> Option<GraphState> + Send + Sync>;

/// Run plugins in registration order, each on the previous one's output.
pub fn run_plugins(state: GraphState, plugins: &[Plugin]) -> GraphState {
    plugins
        .iter()
        .fold(state, |state, plugin| plugin(&state).unwrap_or(state))
}

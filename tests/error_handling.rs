//! Error handling and edge case tests.

use graph_state::keys::{is_link_key, parse_key};
use graph_state::{
    GraphError, GraphState, MutateOptions, ResolveOptions, StateConfig, SubscribeOptions,
    NOTIFY_DEPTH_LIMIT,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

fn test_state() -> GraphState {
    GraphState::new(StateConfig::default()).unwrap()
}

/// `Node:0 -> Node:1 -> ... -> Node:{len-1}` as one nested entity.
fn chain(len: usize) -> Value {
    (0..len).rev().fold(Value::Null, |next, n| {
        let mut node = json!({"_type": "Node", "id": n});
        if !next.is_null() {
            node["next"] = next;
        }
        node
    })
}

// --- Unresolvable identity ---

#[test]
fn test_entity_without_identity_has_no_key() {
    let state = test_state();
    assert_eq!(state.key_of_entity(&json!({"name": "anonymous"})), None);
    assert_eq!(state.key_of_entity(&json!({"_type": "User"})), None);
    assert_eq!(state.key_of_entity(&json!({"_type": "User", "id": ""})), None);
    assert_eq!(state.key_of_entity(&json!(42)), None);
}

#[test]
fn test_malformed_keys() {
    for key in ["12:30", "User:", ":1", "User: 1", "no separator", ""] {
        assert!(!is_link_key(key), "{key} should not parse");
        assert_eq!(parse_key(key), None);
    }

    let state = test_state();
    assert_eq!(state.entity_of_key(&json!("User:")), None);
    assert_eq!(state.entity_of_key(&json!(7)), None);
    assert_eq!(
        state.mutate("12:30", json!({"a": 1}), MutateOptions::default()).unwrap(),
        None
    );
    assert_eq!(state.resolve("12:30", ResolveOptions::default()), None);
}

#[test]
fn test_invalidate_unknown_entity_is_noop() {
    let state = test_state();
    state.invalidate("Ghost:1").unwrap();
    state.invalidate(&json!({"no": "identity"})).unwrap();
    assert!(state.cache().is_empty());
}

// --- Notification depth ---

#[test]
fn test_chain_within_limit_notifies() {
    let state = test_state();
    let calls = Arc::new(Mutex::new(0));
    let counter = Arc::clone(&calls);
    let _tail = state.subscribe(
        format!("Node:{}", NOTIFY_DEPTH_LIMIT - 1).as_str(),
        move |_, _| *counter.lock() += 1,
        SubscribeOptions::default(),
    );

    state
        .mutate_entity(&chain(NOTIFY_DEPTH_LIMIT), MutateOptions::default())
        .unwrap();
    assert_eq!(*calls.lock(), 1);
}

#[test]
fn test_chain_beyond_limit_fails() {
    let state = test_state();
    let result = state.mutate_entity(&chain(105), MutateOptions::default());

    match result {
        Err(GraphError::NotifyDepthExceeded { key, limit }) => {
            assert_eq!(limit, NOTIFY_DEPTH_LIMIT);
            assert_eq!(key, format!("Node:{}", NOTIFY_DEPTH_LIMIT + 1));
        }
        other => panic!("expected depth error, got {other:?}"),
    }

    // The write itself completed before notification.
    assert!(state.resolve("Node:104", ResolveOptions::default()).is_some());
}

#[test]
fn test_reference_cycle_notifies_each_key_once() {
    let state = test_state();
    let root = state.root_key().to_string();
    state
        .mutate(&root, json!({"entry": "Node:a"}), MutateOptions::default())
        .unwrap();
    state
        .mutate("Node:a", json!({"next": "Node:b"}), MutateOptions::default())
        .unwrap();
    state
        .mutate("Node:b", json!({"next": "Node:a"}), MutateOptions::default())
        .unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    for key in ["Node:a", "Node:b"] {
        let seen = Arc::clone(&seen);
        let _handle = state.subscribe(
            key,
            move |next, _| {
                let id = next.and_then(|value| value["_id"].as_str()).unwrap_or("?");
                seen.lock().push(id.to_string());
            },
            SubscribeOptions::default(),
        );
    }

    state
        .mutate("Node:a", json!({"label": "start"}), MutateOptions::default())
        .unwrap();
    assert_eq!(*seen.lock(), vec!["a".to_string(), "b".to_string()]);
}

#[test]
fn test_deep_resolve_of_self_reference() {
    let state = test_state();
    state
        .mutate("Node:self", json!({"me": "Node:self", "all": ["Node:self"]}), MutateOptions::default())
        .unwrap();

    let view = state.resolve("Node:self", ResolveOptions::deep()).unwrap();
    assert_eq!(view["me"], json!("Node:self"));
    assert_eq!(view["all"], json!(["Node:self"]));
}

// --- Conversion errors ---

#[test]
fn test_unserializable_data() {
    let state = test_state();
    let mut grid: HashMap<(u8, u8), u8> = HashMap::new();
    grid.insert((0, 0), 1);

    let result = state.mutate_serialized("Grid:1", &grid, MutateOptions::default());
    assert!(matches!(result, Err(GraphError::Serialization(_))));
    assert!(!state.cache().has_link("Grid:1"));
}

#[test]
fn test_resolve_into_wrong_shape() {
    let state = test_state();
    state
        .mutate("User:1", json!({"name": "Ada"}), MutateOptions::default())
        .unwrap();

    let result: graph_state::Result<Option<Vec<String>>> =
        state.resolve_as("User:1", ResolveOptions::default());
    assert!(matches!(result, Err(GraphError::Deserialization(_))));
}

#[test]
fn test_custom_write_error_propagates() {
    let state = test_state();
    let options = MutateOptions::default().with_write(|_, request| {
        Err(GraphError::Serialization(format!("refused {}", request.key)))
    });

    let result = state.mutate("Post:1", json!({"meta": {"views": 1}}), options);
    match result {
        Err(GraphError::Serialization(message)) => assert_eq!(message, "refused Post:1.meta"),
        other => panic!("expected custom write error, got {other:?}"),
    }
}

// --- Subscription handles ---

#[test]
fn test_unsubscribe_edge_cases() {
    let state = test_state();
    let inert = state.subscribe(
        &json!({"no": "identity"}),
        |_, _| {},
        SubscribeOptions::default(),
    );
    assert!(!inert.unsubscribe());

    let handle = state.subscribe("User:1", |_, _| {}, SubscribeOptions::default());
    drop(state);
    assert!(!handle.unsubscribe());
}

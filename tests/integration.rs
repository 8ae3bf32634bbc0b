//! Integration tests for the graph state.

use graph_state::{
    AbortController, ChangeEvent, ChannelConfig, EntityRef, GraphState, MutateOptions,
    ResolveOptions, StateConfig, SubscribeOptions,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;

type Calls = Arc<Mutex<Vec<(Option<Value>, Option<Value>)>>>;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn test_state() -> GraphState {
    init_tracing();
    GraphState::new(StateConfig::default()).unwrap()
}

fn record(calls: &Calls) -> impl Fn(Option<&Value>, Option<&Value>) + Send + Sync + 'static {
    let calls = Arc::clone(calls);
    move |next, prev| calls.lock().push((next.cloned(), prev.cloned()))
}

fn blog_post() -> Value {
    json!({
        "_type": "Post",
        "id": "1",
        "title": "Normalized caches",
        "author": {"_type": "User", "id": "7", "name": "Ada"},
        "meta": {"views": 10, "labels": ["draft"]},
        "comments": [
            {"_type": "Comment", "id": "c1", "body": "Nice", "author": {"_type": "User", "id": "8", "name": "Lin"}},
            {"_type": "Comment", "id": "c2", "body": "Agreed", "author": {"_type": "User", "id": "7"}},
        ],
    })
}

// --- Laws ---

#[test]
fn test_idempotent_rewrite_of_resolved_view() {
    let state = test_state();
    state.mutate_entity(&blog_post(), MutateOptions::default()).unwrap();
    let before = state.resolve("Post:1", ResolveOptions::default()).unwrap();

    let calls: Calls = Default::default();
    let _all = state.subscribe_all(record(&calls), SubscribeOptions::default());

    state
        .mutate("Post:1", before.clone(), MutateOptions::default())
        .unwrap();

    assert_eq!(state.resolve("Post:1", ResolveOptions::default()).unwrap(), before);
    assert!(calls.lock().is_empty());
}

#[test]
fn test_merge_law() {
    let state = test_state();
    state.mutate("Item:1", json!({"a": 1}), MutateOptions::default()).unwrap();
    state.mutate("Item:1", json!({"b": 2}), MutateOptions::default()).unwrap();

    assert_eq!(
        state.resolve("Item:1", ResolveOptions::default()).unwrap(),
        json!({"_type": "Item", "_id": "1", "a": 1, "b": 2})
    );
}

#[test]
fn test_replace_law() {
    let state = test_state();
    state
        .mutate("Item:1", json!({"a": 1, "b": 2}), MutateOptions::default())
        .unwrap();
    state
        .mutate("Item:1", json!({"b": 3}), MutateOptions::replace())
        .unwrap();

    assert_eq!(
        state.resolve("Item:1", ResolveOptions::default()).unwrap(),
        json!({"_type": "Item", "_id": "1", "b": 3})
    );
}

#[test]
fn test_normalization_round_trip() {
    let state = test_state();
    let post = blog_post();
    state.mutate_entity(&post, MutateOptions::default()).unwrap();

    let view = state.resolve("Post:1", ResolveOptions::deep()).unwrap();
    assert_eq!(view["title"], post["title"]);
    assert_eq!(view["meta"], post["meta"]);
    assert_eq!(view["author"]["name"], json!("Ada"));
    assert_eq!(view["comments"][0]["author"]["name"], json!("Lin"));

    let author = state.resolve("User:7", ResolveOptions::deep()).unwrap();
    assert_eq!(view["author"], author);
    assert_eq!(view["comments"][1]["author"], author);
}

#[test]
fn test_dedup_law() {
    let state = test_state();
    state
        .mutate("List:1", json!({"items": ["A:1", "B:1"]}), MutateOptions::default())
        .unwrap();
    state
        .mutate("List:1", json!({"items": ["B:1", "C:1"]}), MutateOptions::default())
        .unwrap();

    let list = state.resolve("List:1", ResolveOptions::default()).unwrap();
    assert_eq!(list["items"], json!(["A:1", "B:1", "C:1"]));
}

// --- Garbage collection ---

#[test]
fn test_gc_after_edge_removed() {
    let state = test_state();
    let root = state.root_key().to_string();
    state
        .mutate(
            &root,
            json!({"a": {"_type": "A", "id": 1, "b": {"_type": "B", "id": 1}}}),
            MutateOptions::default(),
        )
        .unwrap();
    assert!(state.resolve("B:1", ResolveOptions::default()).is_some());

    state
        .mutate(&root, json!({"a": null}), MutateOptions::default())
        .unwrap();

    assert_eq!(state.resolve("A:1", ResolveOptions::default()), None);
    assert_eq!(state.resolve("B:1", ResolveOptions::default()), None);
}

#[test]
fn test_gc_after_replace_and_invalidate() {
    let state = test_state();
    let root = state.root_key().to_string();
    state
        .mutate(
            &root,
            json!({"a": {"_type": "A", "id": 1, "b": {"_type": "B", "id": 1}}, "keep": true}),
            MutateOptions::default(),
        )
        .unwrap();

    state
        .mutate(&root, json!({"keep": true}), MutateOptions::replace())
        .unwrap();
    assert_eq!(state.resolve("A:1", ResolveOptions::default()), None);
    assert_eq!(state.resolve("B:1", ResolveOptions::default()), None);

    state
        .mutate(
            &root,
            json!({"a": {"_type": "A", "id": 2, "b": {"_type": "B", "id": 2}}}),
            MutateOptions::default(),
        )
        .unwrap();
    state.invalidate("A:2").unwrap();
    state.mutate("Other:1", json!({"x": 1}), MutateOptions::default()).unwrap();

    assert_eq!(state.resolve("A:2", ResolveOptions::default()), None);
    assert_eq!(state.resolve("B:2", ResolveOptions::default()), None);
}

#[test]
fn test_detached_entities_survive_until_referenced_then_released() {
    let state = test_state();
    state.mutate("Draft:1", json!({"text": "hi"}), MutateOptions::default()).unwrap();
    assert!(state.resolve("Draft:1", ResolveOptions::default()).is_some());

    let root = state.root_key().to_string();
    state
        .mutate(&root, json!({"current": "Draft:1"}), MutateOptions::default())
        .unwrap();
    state
        .mutate(&root, json!({"current": null}), MutateOptions::default())
        .unwrap();

    assert_eq!(state.resolve("Draft:1", ResolveOptions::default()), None);
}

#[test]
fn test_raw_removal_hook() {
    let state = test_state();
    let removed = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&removed);
    let id = state.on_remove_link(move |key, _| sink.lock().push(key.to_string()));

    let root = state.root_key().to_string();
    state
        .mutate(&root, json!({"a": {"_type": "A", "id": 1}}), MutateOptions::default())
        .unwrap();
    state
        .mutate(&root, json!({"a": null}), MutateOptions::default())
        .unwrap();

    assert_eq!(*removed.lock(), vec!["A:1".to_string()]);
    assert!(state.off_remove_link(id));
}

// --- Subscriptions ---

#[test]
fn test_subscription_delivery() {
    let state = test_state();
    let calls: Calls = Default::default();
    let unsubscribe = state.subscribe("User:1", record(&calls), SubscribeOptions::default());

    state
        .mutate("User:1", json!({"name": "Ada"}), MutateOptions::default())
        .unwrap();
    {
        let calls = calls.lock();
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0],
            (Some(json!({"_type": "User", "_id": "1", "name": "Ada"})), None)
        );
    }

    unsubscribe.unsubscribe();
    state
        .mutate("User:1", json!({"name": "Grace"}), MutateOptions::default())
        .unwrap();
    assert_eq!(calls.lock().len(), 1);
}

#[test]
fn test_wildcard_delivery() {
    let state = test_state();
    let calls: Calls = Default::default();
    let _all = state.subscribe_all(record(&calls), SubscribeOptions::default());

    state.mutate("User:1", json!({"n": 1}), MutateOptions::default()).unwrap();
    state.mutate("Team:9", json!({"n": 2}), MutateOptions::default()).unwrap();

    let calls = calls.lock();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].0.as_ref().unwrap()["_type"], json!("Team"));
}

#[test]
fn test_aborted_signal_cancels_subscription() {
    let state = test_state();
    let controller = AbortController::new();
    let calls: Calls = Default::default();
    let _handle = state.subscribe(
        "User:1",
        record(&calls),
        SubscribeOptions::with_signal(controller.signal()),
    );

    state.mutate("User:1", json!({"n": 1}), MutateOptions::default()).unwrap();
    controller.abort();
    state.mutate("User:1", json!({"n": 2}), MutateOptions::default()).unwrap();

    assert_eq!(calls.lock().len(), 1);
}

#[test]
fn test_safe_and_unsafe_resolve() {
    let state = test_state();
    assert_eq!(state.resolve("Missing:1", ResolveOptions::default()), None);
    assert_eq!(
        state.resolve("Missing:1", ResolveOptions::safe()),
        Some(json!("Missing:1"))
    );
    assert_eq!(state.safe_resolve("Missing:1", ResolveOptions::deep()), json!("Missing:1"));
}

#[test]
fn test_parent_notified_on_invalidate() {
    let state = test_state();
    state
        .mutate(
            "Feed:1",
            json!({"entries": [{"_type": "Entry", "id": 1}, {"_type": "Entry", "id": 2}]}),
            MutateOptions::default(),
        )
        .unwrap();

    let calls: Calls = Default::default();
    let _feed = state.subscribe("Feed:1", record(&calls), SubscribeOptions::default());
    state.invalidate("Entry:1").unwrap();

    let calls = calls.lock();
    assert_eq!(calls.len(), 1);
    let (next, prev) = &calls[0];
    assert_eq!(next.as_ref().unwrap()["entries"], json!(["Entry:2"]));
    assert_eq!(prev.as_ref().unwrap()["entries"], json!(["Entry:1", "Entry:2"]));
}

#[test]
fn test_invalidate_partial_child_notifies_owner() {
    let state = test_state();
    state
        .mutate_entity(
            &json!({"_type": "Post", "id": 1, "meta": {"editor": {"_type": "User", "id": 3}}}),
            MutateOptions::default(),
        )
        .unwrap();

    let calls: Calls = Default::default();
    let _post = state.subscribe("Post:1", record(&calls), SubscribeOptions::default());
    state.invalidate("User:3").unwrap();

    let calls = calls.lock();
    assert_eq!(calls.len(), 1);
    let (next, prev) = &calls[0];
    assert_eq!(next.as_ref().unwrap()["meta"]["editor"], json!(null));
    assert_eq!(prev.as_ref().unwrap()["meta"]["editor"], json!("User:3"));
}

#[test]
fn test_channel_subscription_stream() {
    let state = test_state();
    let stream = state.subscribe_channel(Some(EntityRef::Key("User:1")), ChannelConfig::default());

    state.mutate("User:1", json!({"n": 1}), MutateOptions::default()).unwrap();
    state.mutate("User:1", json!({"n": 2}), MutateOptions::default()).unwrap();

    let events: Vec<ChangeEvent> = std::iter::from_fn(|| stream.try_recv()).collect();
    assert_eq!(events.len(), 2);
    match &events[1] {
        ChangeEvent::Changed { next, prev } => {
            assert_eq!(next.as_ref().unwrap()["n"], json!(2));
            assert_eq!(prev.as_ref().unwrap()["n"], json!(1));
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

// --- Adapter pattern ---

/// A view binding: reads once, then tracks updates until torn down.
struct Binding {
    value: Arc<Mutex<Option<Value>>>,
    teardown: graph_state::Unsubscribe,
}

impl Binding {
    fn bind(state: &GraphState, key: &str) -> Self {
        let value = Arc::new(Mutex::new(state.resolve(key, ResolveOptions::default())));
        let slot = Arc::clone(&value);
        let teardown = state.subscribe(
            key,
            move |next, _| *slot.lock() = next.cloned(),
            SubscribeOptions::default(),
        );
        Self { value, teardown }
    }

    fn current(&self) -> Option<Value> {
        self.value.lock().clone()
    }
}

impl Drop for Binding {
    fn drop(&mut self) {
        self.teardown.unsubscribe();
    }
}

#[test]
fn test_view_binding_adapter() {
    let state = test_state();
    state
        .mutate("User:1", json!({"name": "Ada"}), MutateOptions::default())
        .unwrap();

    let binding = Binding::bind(&state, "User:1");
    assert_eq!(binding.current().unwrap()["name"], json!("Ada"));

    state
        .mutate("User:1", json!({"name": "Grace"}), MutateOptions::default())
        .unwrap();
    assert_eq!(binding.current().unwrap()["name"], json!("Grace"));

    drop(binding);
    assert_eq!(state.stats().subscription_count, 0);
    assert_eq!(state.cache().listener_count(), 0);
}

// --- Introspection ---

#[test]
fn test_type_index_and_parents() {
    let state = test_state();
    state.mutate_entity(&blog_post(), MutateOptions::default()).unwrap();

    assert_eq!(
        state.inspect_fields("User"),
        vec!["User:7".to_string(), "User:8".to_string()]
    );
    assert_eq!(
        state.inspect_fields("Comment"),
        vec!["Comment:c1".to_string(), "Comment:c2".to_string()]
    );
    let types = state.types();
    assert!(types["Post"].contains("Post:1"));
    assert!(!types.values().flatten().any(|key| key.contains('.')));

    let parents = state.resolve_parents("User:7");
    let parent_types: Vec<&Value> = parents.iter().map(|parent| &parent["_type"]).collect();
    assert_eq!(parent_types, vec![&json!("Comment"), &json!("Post")]);
}

#[test]
fn test_independent_states_are_isolated() {
    let first = test_state();
    let second = test_state();

    first.mutate("User:1", json!({"name": "Ada"}), MutateOptions::default()).unwrap();
    assert_eq!(second.resolve("User:1", ResolveOptions::default()), None);
}

#[test]
fn test_shared_handle_across_threads() {
    let state = test_state();
    std::thread::scope(|scope| {
        for worker in 0..4 {
            let state = state.clone();
            scope.spawn(move || {
                for n in 0..25 {
                    state
                        .mutate(
                            format!("Job:{worker}-{n}").as_str(),
                            json!({"worker": worker}),
                            MutateOptions::default(),
                        )
                        .unwrap();
                }
            });
        }
    });

    assert_eq!(state.inspect_fields("Job").len(), 100);
}

//! Concrete end-to-end scenarios

use crate::common::*;

// ============================================================================
// Single frame
// ============================================================================

#[test]
fn single_frame_push_pop_close() {
    let store = TestStore::new();
    let ss = &store.ss;
    let base = stack_base(ss, "P1");
    ss.push(10, StateValue::from("foo"), base, "P1", None).unwrap();
    ss.pop(20, &StateValue::from("foo"), "P1").unwrap();
    ss.close_history(30).unwrap();

    let frame = frame_quark(ss, "P1", 1);
    let active = ss.query_single_state(15, frame).unwrap();
    assert_eq!((active.start(), active.end()), (10, 19));
    assert_eq!(active.value(), &StateValue::from("foo"));

    let after = ss.query_single_state(25, frame).unwrap();
    assert_eq!((after.start(), after.end()), (20, 30));
    assert!(after.value().is_null());

    let before = ss.query_single_state(5, frame).unwrap();
    assert_eq!((before.start(), before.end()), (0, 9));
    assert!(before.value().is_null());

    assert_eq!(ss.query_single_state(15, base).unwrap().value(), &StateValue::Int(1));
    assert!(ss.query_single_state(25, base).unwrap().value().is_null());
}

#[test]
fn single_frame_visible_before_close() {
    let ss = ephemeral();
    let base = stack_base(&ss, "P1");
    ss.push(10, StateValue::from("foo"), base, "P1", None).unwrap();

    let frame = frame_quark(&ss, "P1", 1);
    let ongoing = ss.query_single_state(10, frame).unwrap();
    assert_eq!(ongoing.start(), 10);
    assert_eq!(ongoing.value(), &StateValue::from("foo"));
    assert!(ss.query_single_state(5, frame).unwrap().value().is_null());
}

#[test]
fn single_frame_open_interval_past_latest_event() {
    let store = TestStore::new();
    let ss = &store.ss;
    let base = stack_base(ss, "P1");
    ss.push(100, StateValue::from("foo"), base, "P1", None).unwrap();

    let frame = frame_quark(ss, "P1", 1);
    let open = ss.query_single_state(150, frame).unwrap();
    assert_eq!(open.start(), 100);
    assert!(open.end() >= 150);
    assert_eq!(open.value(), &StateValue::from("foo"));

    ss.pop(200, &StateValue::from("foo"), "P1").unwrap();
    ss.close_history(300).unwrap();

    let closed = ss.query_single_state(150, frame).unwrap();
    assert_eq!((closed.start(), closed.end()), (100, 199));
    assert_eq!(closed.value(), &StateValue::from("foo"));
    assert!(ss.query_single_state(250, base).unwrap().value().is_null());
}

/// A query at `t` on an open store sees the same values as the same query
/// after closing at `t + 1`.
#[test]
fn open_query_matches_closed_query() {
    let ss = ephemeral();
    let q = ss.context_quark("P1").unwrap();
    let status = ss.get_or_create_quark("P1", q, &["status"]).unwrap();
    ss.modify_attribute(10, StateValue::Int(1), q, "P1").unwrap();
    ss.modify_attribute(15, StateValue::from("run"), status, "P1").unwrap();

    let t = 40;
    let open: Vec<(Timestamp, StateValue)> = ss
        .query_full_state(t)
        .unwrap()
        .into_iter()
        .map(|i| (i.start(), i.value().clone()))
        .collect();
    ss.close_history(t + 1).unwrap();
    let closed: Vec<(Timestamp, StateValue)> = ss
        .query_full_state(t)
        .unwrap()
        .into_iter()
        .map(|i| (i.start(), i.value().clone()))
        .collect();
    assert_eq!(open, closed);
    assert_eq!(
        ss.query_single_state(t, status).unwrap().value(),
        &StateValue::from("run")
    );
}

// ============================================================================
// Caller hints
// ============================================================================

/// Two traces of spans interleaved on one context: the child of `a`
/// arrives while `x` of the other trace is on top of the stack.
#[test]
fn caller_hint_places_child_above_its_parent() {
    let ss = ephemeral();
    let base = stack_base(&ss, "svc");
    ss.push(10, span("a", None, "A"), base, "svc", None).unwrap();
    ss.push(20, span("x", Some("a"), "X"), base, "svc", Some("a")).unwrap();
    ss.push(30, span("y", Some("x"), "Y"), base, "svc", Some("x")).unwrap();
    assert_eq!(ss.query_ongoing_state(base).unwrap(), StateValue::Int(3));

    // b is a direct child of a: depth 2, not 4
    ss.push(40, span("b", Some("a"), "B"), base, "svc", Some("a")).unwrap();
    assert_eq!(ss.query_ongoing_state(base).unwrap(), StateValue::Int(2));
    let depth2 = frame_quark(&ss, "svc", 2);
    assert_eq!(ss.query_ongoing_state(depth2).unwrap().symbol().as_deref(), Some("B"));

    // y is still live at depth 3 and pops normally
    let popped = ss.pop(50, &StateValue::from("y"), "svc").unwrap().unwrap();
    assert_eq!(popped.symbol().as_deref(), Some("Y"));
    assert_eq!(ss.query_ongoing_state(base).unwrap(), StateValue::Int(2));

    let popped = ss.pop(60, &StateValue::from("b"), "svc").unwrap().unwrap();
    assert_eq!(popped.symbol().as_deref(), Some("B"));
    assert_eq!(ss.query_ongoing_state(base).unwrap(), StateValue::Int(1));
}

#[test]
fn unknown_hint_pushes_on_top() {
    let ss = ephemeral();
    let base = stack_base(&ss, "svc");
    ss.push(10, span("a", None, "A"), base, "svc", None).unwrap();
    ss.push(20, span("b", Some("zz"), "B"), base, "svc", Some("zz")).unwrap();
    assert_eq!(ss.query_ongoing_state(base).unwrap(), StateValue::Int(2));
}

// ============================================================================
// Span provider
// ============================================================================

#[test]
fn span_provider_builds_call_stack() {
    let ss = ephemeral();
    let provider = CallStackStateProvider::new(Arc::clone(&ss), SpanEventSource::new());
    let events = [
        SpanEvent::start(100, "t", "root", None, "GET /").with_process("web", 7),
        SpanEvent::start(110, "t", "db", Some("root"), "SELECT").with_process("web", 7),
        SpanEvent::start(115, "t", "cache", Some("root"), "GET key").with_process("web", 7),
        SpanEvent::end(120, "t", "cache").with_process("web", 7),
        SpanEvent::end(130, "t", "root").with_process("web", 7),
    ];
    for event in &events {
        provider.event_handle(event).unwrap();
    }
    provider.done(140).unwrap();

    let stack = CallStack::for_context(&ss, "web").unwrap();
    let at = |t| -> Vec<String> {
        stack
            .functions_at(t)
            .unwrap()
            .iter()
            .map(|f| f.symbol().to_string())
            .collect()
    };
    assert_eq!(at(105), vec!["GET /"]);
    assert_eq!(at(112), vec!["GET /", "SELECT"]);
    assert_eq!(at(117), vec!["GET /", "GET key"]);
    assert_eq!(at(125), vec!["GET /"]);
    assert!(at(135).is_empty());
    assert_eq!(stack.functions_at(112).unwrap()[0].process_id(), Some(7));
}

// ============================================================================
// Full state
// ============================================================================

#[test]
fn full_state_snapshot_across_contexts() {
    let store = TestStore::new();
    let ss = &store.ss;
    let mut expected = Vec::new();
    for (n, ctx) in ["P1", "P2", "P3"].iter().enumerate() {
        let base = stack_base(ss, ctx);
        ss.push(10 + n as i64, StateValue::from(*ctx), base, ctx, None).unwrap();
        expected.push(*ctx);
    }

    let state = ss.query_full_state(12).unwrap();
    assert_eq!(state.len(), ss.nb_attributes());
    for ctx in expected {
        let frame = frame_quark(ss, ctx, 1);
        assert_eq!(state[frame.index().unwrap()].value(), &StateValue::from(ctx));
    }
    assert!(state.iter().all(|i| i.intersects(12)));
}

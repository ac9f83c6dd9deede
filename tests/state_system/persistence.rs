//! Close, reopen and compare

use crate::common::*;

/// Three contexts with nested frames and plain attributes over [0, 400]
fn populate(ss: &StateSystem) {
    for (n, ctx) in ["P1", "P2", "P3"].iter().enumerate() {
        let base = stack_base(ss, ctx);
        let context = ss.context_quark(ctx).unwrap();
        let status = ss.get_or_create_quark(ctx, context, &["Status"]).unwrap();
        ss.update_ongoing_state(StateValue::Long(1000 + n as i64), context, ctx).unwrap();

        let offset = n as i64 * 3;
        for round in 0..10i64 {
            let t = offset + round * 40;
            let outer = format!("{}-outer-{}", ctx, round);
            let inner = format!("{}-inner-{}", ctx, round);
            ss.modify_attribute(t, StateValue::from("running"), status, ctx).unwrap();
            ss.push(t + 1, StateValue::from(outer.as_str()), base, ctx, None).unwrap();
            ss.push(t + 5, StateValue::from(inner.as_str()), base, ctx, None).unwrap();
            ss.pop(t + 15, &StateValue::from(inner.as_str()), ctx).unwrap();
            ss.pop(t + 25, &StateValue::from(outer.as_str()), ctx).unwrap();
            ss.modify_attribute(t + 30, StateValue::from("idle"), status, ctx).unwrap();
        }
    }
}

/// `(quark, t, start, value)` for every attribute at every 7th tick
fn single_states(ss: &StateSystem) -> Vec<(Quark, Timestamp, Timestamp, StateValue)> {
    let mut out = Vec::new();
    for index in 0..ss.nb_attributes() {
        let quark = Quark::from_index(index);
        for t in (0..=400).step_by(7) {
            let interval = ss.query_single_state(t, quark).unwrap();
            assert!(interval.intersects(t));
            out.push((quark, t, interval.start(), interval.value().clone()));
        }
    }
    out
}

#[test]
fn reopened_store_answers_like_the_store_before_close() {
    let store = TestStore::new();
    populate(&store.ss);
    let before_close = single_states(&store.ss);
    store.ss.close_history(400).unwrap();

    let reopened = store.reopen();
    assert_eq!(single_states(&reopened), before_close);
}

#[test]
fn reopened_store_answers_like_the_original() {
    let store = TestStore::new();
    populate(&store.ss);
    store.ss.close_history(400).unwrap();

    let reopened = store.reopen();
    assert_eq!(reopened.nb_attributes(), store.ss.nb_attributes());
    assert_eq!(reopened.context_names(), store.ss.context_names());
    assert_eq!(reopened.start_time(), 0);
    assert_eq!(reopened.current_end_time(), 400);

    for t in (0..=400).step_by(7) {
        let original = store.ss.query_full_state(t).unwrap();
        let restored = reopened.query_full_state(t).unwrap();
        assert_eq!(original, restored, "full state differs at {}", t);
    }

    for quark in 0..reopened.nb_attributes() {
        let quark = Quark::from_index(quark);
        assert_eq!(
            reopened.full_attribute_path(quark).unwrap(),
            store.ss.full_attribute_path(quark).unwrap()
        );
    }
}

#[test]
fn reopened_store_serves_range_queries() {
    let store = TestStore::new();
    populate(&store.ss);
    store.ss.close_history(400).unwrap();
    let reopened = store.reopen();

    let status = reopened.quark_absolute(&[PROCESSES, "P2", "Status"]).unwrap();
    let intervals = reopened.query_2d_range(&[status], 0, 400).unwrap();
    assert!(intervals.windows(2).all(|w| w[0].end() + 1 == w[1].start()));
    assert_eq!(intervals.first().unwrap().start(), 0);
    assert_eq!(intervals.last().unwrap().end(), 400);

    let latest_first = reopened.query_2d_range(&[status], 400, 0).unwrap();
    assert_eq!(latest_first.first().unwrap().end(), 400);
}

#[test]
fn reopened_call_stack_keeps_process_ids() {
    let store = TestStore::new();
    populate(&store.ss);
    store.ss.close_history(400).unwrap();
    let reopened = store.reopen();

    let stack = CallStack::for_context(&reopened, "P3").unwrap();
    assert_eq!(stack.max_depth(), 2);
    let frames = stack.functions_at(6 + 40 * 2 + 10).unwrap();
    let names: Vec<_> = frames.iter().map(|f| f.symbol().to_string()).collect();
    assert_eq!(names, vec!["P3-outer-2", "P3-inner-2"]);
    assert!(frames.iter().all(|f| f.process_id() == Some(1002)));
}

#[test]
fn reopened_store_is_read_only() {
    let store = TestStore::new();
    populate(&store.ss);
    store.ss.close_history(400).unwrap();
    let reopened = store.reopen();

    let base = reopened.quark_absolute(&[PROCESSES, "P1", CALL_STACK]).unwrap();
    let err = reopened.push(500, StateValue::from("late"), base, "P1", None).unwrap_err();
    assert!(matches!(err, Error::ContextClosed { .. }));
    assert!(matches!(reopened.context_quark("P9"), Err(Error::ContextClosed { .. })));
}

#[test]
fn unfinished_store_cannot_be_reopened() {
    let store = TestStore::new();
    populate(&store.ss);
    let err = StoreBuilder::new()
        .path(&store.path)
        .provider_version(1)
        .open_existing()
        .unwrap_err();
    assert!(matches!(err, Error::Corruption(_) | Error::Io(_)));
}

#[test]
fn remove_files_disposes_and_deletes() {
    let store = TestStore::new();
    populate(&store.ss);
    store.ss.close_history(400).unwrap();
    assert!(store.path.exists());

    store.ss.remove_files().unwrap();
    assert!(!store.path.exists());
    assert!(store.ss.is_cancelled());
    assert!(matches!(store.ss.query_full_state(10), Err(Error::Disposed)));
}

//! Push and pop semantics

use crate::common::*;

#[test]
fn balanced_pushes_and_pops_leave_empty_stack() {
    let ss = ephemeral();
    let base = stack_base(&ss, "P1");
    let names: Vec<String> = (0..20).map(|i| format!("f{}", i)).collect();
    let mut t = 0;
    for name in &names {
        t += 1;
        ss.push(t, StateValue::from(name.as_str()), base, "P1", None).unwrap();
    }
    assert_eq!(ss.query_ongoing_state(base).unwrap(), StateValue::Int(20));

    for name in names.iter().rev() {
        t += 1;
        let popped = ss.pop(t, &StateValue::from(name.as_str()), "P1").unwrap();
        assert_eq!(popped, Some(StateValue::from(name.as_str())));
    }
    assert!(ss.query_ongoing_state(base).unwrap().is_null());
    for depth in 1..=20 {
        let frame = frame_quark(&ss, "P1", depth);
        assert!(ss.query_ongoing_state(frame).unwrap().is_null());
    }
}

#[test]
fn frame_intervals_nest() {
    let ss = ephemeral();
    let base = stack_base(&ss, "P1");
    ss.push(10, StateValue::from("outer"), base, "P1", None).unwrap();
    ss.push(20, StateValue::from("inner"), base, "P1", None).unwrap();
    ss.pop(30, &StateValue::from("inner"), "P1").unwrap();
    ss.pop(40, &StateValue::from("outer"), "P1").unwrap();
    ss.close_history(50).unwrap();

    let outer = ss.query_single_state(25, frame_quark(&ss, "P1", 1)).unwrap();
    let inner = ss.query_single_state(25, frame_quark(&ss, "P1", 2)).unwrap();
    assert!(outer.start() <= inner.start() && inner.end() <= outer.end());
}

#[test]
fn pop_on_empty_stack_is_noop() {
    let ss = ephemeral();
    let base = stack_base(&ss, "P1");
    let attributes = ss.nb_attributes();

    assert_eq!(ss.pop(10, &StateValue::from("never-pushed"), "P1").unwrap(), None);
    assert_eq!(ss.nb_attributes(), attributes);
    assert!(ss.query_ongoing_state(base).unwrap().is_null());
    assert_eq!(ss.ongoing_start_time(base).unwrap(), 0);
}

#[test]
fn out_of_order_exit_pops_matching_frame() {
    let ss = ephemeral();
    let base = stack_base(&ss, "P1");
    ss.push(1, StateValue::from("a"), base, "P1", None).unwrap();
    ss.push(2, StateValue::from("b"), base, "P1", None).unwrap();
    ss.push(3, StateValue::from("c"), base, "P1", None).unwrap();

    // b exits before c: the base drops to b's depth minus one
    assert_eq!(
        ss.pop(4, &StateValue::from("b"), "P1").unwrap(),
        Some(StateValue::from("b"))
    );
    assert_eq!(ss.query_ongoing_state(base).unwrap(), StateValue::Int(1));
    assert!(ss.query_ongoing_state(frame_quark(&ss, "P1", 2)).unwrap().is_null());
    assert_eq!(
        ss.query_ongoing_state(frame_quark(&ss, "P1", 3)).unwrap(),
        StateValue::from("c")
    );
}

#[test]
fn depth_ceiling_is_enforced() {
    let ss = ephemeral();
    let base = stack_base(&ss, "P1");
    ss.modify_attribute(1, StateValue::Int(MAX_STACK_DEPTH - 1), base, "P1").unwrap();

    ss.push(2, StateValue::from("last"), base, "P1", None).unwrap();
    assert_eq!(ss.query_ongoing_state(base).unwrap(), StateValue::Int(MAX_STACK_DEPTH));

    let attributes = ss.nb_attributes();
    let err = ss.push(3, StateValue::from("one-too-many"), base, "P1", None).unwrap_err();
    assert!(matches!(err, Error::StackOverflow { depth, .. } if depth == MAX_STACK_DEPTH));
    assert!(err.is_fatal());
    assert_eq!(ss.nb_attributes(), attributes);
    assert_eq!(ss.query_ongoing_state(base).unwrap(), StateValue::Int(MAX_STACK_DEPTH));
}

#[test]
fn stacks_of_contexts_are_independent() {
    let ss = ephemeral();
    let b1 = stack_base(&ss, "P1");
    let b2 = stack_base(&ss, "P2");
    ss.push(1, StateValue::from("f"), b1, "P1", None).unwrap();
    ss.push(2, StateValue::from("f"), b2, "P2", None).unwrap();

    assert!(ss.pop(3, &StateValue::from("f"), "P2").unwrap().is_some());
    assert_eq!(ss.query_ongoing_state(b1).unwrap(), StateValue::Int(1));
    assert!(ss.query_ongoing_state(b2).unwrap().is_null());
}

#[test]
fn push_on_foreign_base_is_rejected() {
    let ss = ephemeral();
    let b1 = stack_base(&ss, "P1");
    stack_base(&ss, "P2");
    let err = ss.push(1, StateValue::from("f"), b1, "P2", None).unwrap_err();
    assert!(matches!(err, Error::ForeignAttribute { .. }));
}

#[test]
fn strict_types_reject_type_changes() {
    let ss = StoreBuilder::new().strict_value_types(true).build_ephemeral().unwrap();
    let q = ss.context_quark("P1").unwrap();
    ss.modify_attribute(1, StateValue::Int(1), q, "P1").unwrap();
    ss.modify_attribute(2, StateValue::Null, q, "P1").unwrap();
    let err = ss.modify_attribute(3, StateValue::from("text"), q, "P1").unwrap_err();
    assert!(matches!(err, Error::StateValueType { expected: "Int", .. }));
}

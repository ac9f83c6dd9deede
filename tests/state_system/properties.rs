//! Coverage and merge properties

use crate::common::*;
use proptest::prelude::*;

const CONTEXTS: usize = 3;
const ATTRIBUTES: usize = 3;

/// `(context, attribute, time step, value)`; value 0 writes null
type Op = (usize, usize, i64, i32);

fn ops() -> impl Strategy<Value = Vec<Op>> {
    prop::collection::vec((0..CONTEXTS, 0..ATTRIBUTES, 0i64..4, 0i32..4), 1..120)
}

fn value_of(v: i32) -> StateValue {
    if v == 0 {
        StateValue::Null
    } else {
        StateValue::Int(v)
    }
}

struct Model {
    quarks: Vec<Vec<Quark>>,
    writes: Vec<Vec<Vec<(Timestamp, StateValue)>>>,
    end: Timestamp,
}

impl Model {
    fn expected(&self, c: usize, a: usize, t: Timestamp) -> StateValue {
        self.writes[c][a]
            .iter()
            .rev()
            .find(|(at, _)| *at <= t)
            .map(|(_, v)| v.clone())
            .unwrap_or(StateValue::Null)
    }
}

fn apply(ss: &StateSystem, ops: &[Op]) -> Model {
    let mut quarks = vec![Vec::new(); CONTEXTS];
    for (c, row) in quarks.iter_mut().enumerate() {
        let ctx = format!("P{}", c);
        let context = ss.context_quark(&ctx).unwrap();
        for a in 0..ATTRIBUTES {
            let name = format!("a{}", a);
            row.push(ss.get_or_create_quark(&ctx, context, &[name.as_str()]).unwrap());
        }
    }
    let mut writes = vec![vec![Vec::new(); ATTRIBUTES]; CONTEXTS];
    let mut t = 0;
    for &(c, a, dt, v) in ops {
        t += dt;
        let ctx = format!("P{}", c);
        ss.modify_attribute(t, value_of(v), quarks[c][a], &ctx).unwrap();
        writes[c][a].push((t, value_of(v)));
    }
    Model { quarks, writes, end: t }
}

fn assert_matches_model(ss: &StateSystem, model: &Model, end: Timestamp) -> std::result::Result<(), TestCaseError> {
    for c in 0..CONTEXTS {
        for a in 0..ATTRIBUTES {
            let q = model.quarks[c][a];
            for t in 0..=end {
                let found = ss.query_single_state(t, q).unwrap();
                prop_assert!(found.intersects(t));
                prop_assert_eq!(found.value(), &model.expected(c, a, t), "quark {} at {}", q, t);
            }

            let all = ss.query_2d_range(&[q], 0, end).unwrap();
            prop_assert_eq!(all.first().map(Interval::start), Some(0));
            prop_assert!(all.last().map_or(false, |i| i.end() >= end));
            for pair in all.windows(2) {
                prop_assert_eq!(pair[0].end() + 1, pair[1].start());
            }
        }
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn ongoing_and_stored_state_agree_with_writes(ops in ops()) {
        let store = TestStore::new();
        let model = apply(&store.ss, &ops);
        assert_matches_model(&store.ss, &model, model.end)?;

        let close = model.end + 5;
        for c in 0..CONTEXTS {
            for a in 0..ATTRIBUTES {
                let q = model.quarks[c][a];
                let open = store.ss.query_single_state(close, q).unwrap();
                prop_assert!(open.intersects(close));
                prop_assert_eq!(open.value(), &model.expected(c, a, close));
            }
        }

        store.ss.close_history(close).unwrap();
        assert_matches_model(&store.ss, &model, close)?;
    }

    #[test]
    fn full_state_matches_single_queries(ops in ops(), pick in 0i64..400) {
        let ss = ephemeral();
        let model = apply(&ss, &ops);
        let t = pick % (model.end + 1);
        let full = ss.query_full_state(t).unwrap();
        prop_assert_eq!(full.len(), ss.nb_attributes());
        for (index, interval) in full.iter().enumerate() {
            let single = ss.query_single_state(t, Quark::from_index(index)).unwrap();
            prop_assert_eq!(interval.value(), single.value());
            prop_assert_eq!(interval.start(), single.start());
        }
    }
}

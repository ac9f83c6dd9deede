//! Interleaved and concurrent contexts

use crate::common::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicBool, Ordering};

/// Stack contents per checkpoint: `(time, context, frames bottom to top)`
type Checkpoint = (Timestamp, usize, Vec<String>);

fn random_workload(ss: &StateSystem, seed: u64, contexts: usize, steps: usize) -> Vec<Checkpoint> {
    let mut rng = StdRng::seed_from_u64(seed);
    let bases: Vec<Quark> = (0..contexts)
        .map(|c| stack_base(ss, &format!("C{}", c)))
        .collect();
    let mut stacks: Vec<Vec<String>> = vec![Vec::new(); contexts];
    let mut checkpoints = Vec::new();
    let mut t = 0;

    for step in 0..steps {
        t += rng.gen_range(1..4);
        let c = rng.gen_range(0..contexts);
        let ctx = format!("C{}", c);
        if stacks[c].is_empty() || (stacks[c].len() < 8 && rng.gen_bool(0.55)) {
            let name = format!("{}-f{}", ctx, step);
            ss.push(t, StateValue::from(name.as_str()), bases[c], &ctx, None).unwrap();
            stacks[c].push(name);
        } else if rng.gen_bool(0.1) {
            // exit of a frame that was never seen
            let ghost = StateValue::from(format!("ghost-{}", step));
            assert_eq!(ss.pop(t, &ghost, &ctx).unwrap(), None);
        } else {
            let name = stacks[c].pop().unwrap();
            let popped = ss.pop(t, &StateValue::from(name.as_str()), &ctx).unwrap();
            assert_eq!(popped, Some(StateValue::from(name.as_str())));
        }
        checkpoints.push((t, c, stacks[c].clone()));
    }
    checkpoints
}

#[test]
fn random_interleaving_keeps_contexts_apart() {
    for seed in [1u64, 7, 42, 1234] {
        let store = TestStore::new();
        let ss = &store.ss;
        let checkpoints = random_workload(ss, seed, 4, 400);
        let end = checkpoints.last().unwrap().0 + 1;
        ss.close_history(end).unwrap();

        for c in 0..4 {
            let ctx = format!("C{}", c);
            let stack = CallStack::for_context(ss, &ctx).unwrap();
            let base = ss.quark_absolute(&[PROCESSES, ctx.as_str(), CALL_STACK]).unwrap();
            for (t, _, frames) in checkpoints.iter().filter(|(_, owner, _)| *owner == c) {
                let names: Vec<String> = stack
                    .functions_at(*t)
                    .unwrap()
                    .iter()
                    .map(|f| f.symbol().to_string())
                    .collect();
                assert_eq!(&names, frames, "seed {} context {} at {}", seed, ctx, t);

                let depth = ss.query_single_state(*t, base).unwrap();
                let expected = if frames.is_empty() {
                    StateValue::Null
                } else {
                    StateValue::Int(frames.len() as i32)
                };
                assert_eq!(depth.value(), &expected);
            }
        }
    }
}

#[test]
fn readers_run_while_contexts_are_built() {
    let store = TestStore::new();
    let ss = &store.ss;
    let writers_done = AtomicBool::new(false);

    std::thread::scope(|scope| {
        let mut writers = Vec::new();
        for c in 0..4u64 {
            writers.push(scope.spawn(move || {
                let mut rng = StdRng::seed_from_u64(c);
                let ctx = format!("W{}", c);
                let base = stack_base(ss, &ctx);
                let mut open = Vec::new();
                let mut t = 0;
                for step in 0..300 {
                    t += rng.gen_range(1..5);
                    if open.is_empty() || (open.len() < 6 && rng.gen_bool(0.5)) {
                        let name = format!("{}-{}", ctx, step);
                        ss.push(t, StateValue::from(name.as_str()), base, &ctx, None).unwrap();
                        open.push(name);
                    } else {
                        let name: String = open.pop().unwrap();
                        ss.pop(t, &StateValue::from(name.as_str()), &ctx).unwrap();
                    }
                }
                while let Some(name) = open.pop() {
                    t += 1;
                    ss.pop(t, &StateValue::from(name.as_str()), &ctx).unwrap();
                }
                t
            }));
        }

        let reader = scope.spawn(|| {
            let mut rng = StdRng::seed_from_u64(99);
            let mut queries = 0;
            while !writers_done.load(Ordering::Acquire) || queries < 50 {
                let end = ss.current_end_time();
                let t = rng.gen_range(0..=end);
                let state = ss.query_full_state(t).unwrap();
                assert!(state.iter().all(|i| i.intersects(t)));
                queries += 1;
            }
            queries
        });

        let ends: Vec<Timestamp> = writers.into_iter().map(|w| w.join().unwrap()).collect();
        writers_done.store(true, Ordering::Release);
        assert!(reader.join().unwrap() >= 50);

        let end = ends.into_iter().max().unwrap();
        ss.close_history(end).unwrap();
    });

    assert!(ss.wait_until_built_timeout(std::time::Duration::from_secs(1)));
    for c in 0..4 {
        let base = ss
            .quark_absolute(&[PROCESSES, format!("W{}", c).as_str(), CALL_STACK])
            .unwrap();
        let end = ss.current_end_time();
        assert!(ss.query_single_state(end, base).unwrap().value().is_null());
    }
}

#[test]
fn waiter_is_released_by_close() {
    let ss = ephemeral();
    let q = ss.context_quark("P1").unwrap();
    ss.modify_attribute(5, StateValue::Int(1), q, "P1").unwrap();

    std::thread::scope(|scope| {
        let waiter = scope.spawn(|| {
            ss.wait_until_built();
            ss.query_single_state(10, q).unwrap()
        });
        ss.close_history(10).unwrap();
        let interval = waiter.join().unwrap();
        assert_eq!((interval.start(), interval.end()), (5, 10));
    });
}

#[test]
fn waiter_is_released_by_dispose() {
    let ss = ephemeral();
    std::thread::scope(|scope| {
        let waiter = scope.spawn(|| ss.wait_until_built_timeout(std::time::Duration::from_secs(5)));
        ss.dispose();
        assert!(waiter.join().unwrap());
    });
    assert!(ss.is_cancelled());
}

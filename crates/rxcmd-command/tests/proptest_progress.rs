#![forbid(unsafe_code)]

//! Property-based tests for progress reporting.
//!
//! Validates:
//! - Any sequence of `set`/`add` calls yields a non-decreasing emitted
//!   stream bounded by `[0.0, 1.0]`, with no repeated values.
//! - A progress-aware command resets to `0.0` after every execution and
//!   never emits a value outside the bounds.

use std::sync::{Arc, Mutex};

use proptest::prelude::*;
use rxcmd_command::{BoxError, CommandBuilder, Progress};

#[derive(Debug, Clone)]
enum Op {
    Set(f64),
    Add(f64),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (-0.5f64..1.5).prop_map(Op::Set),
        (-0.5f64..0.5).prop_map(Op::Add),
        Just(Op::Set(f64::NAN)),
    ]
}

proptest! {
    #[test]
    fn progress_stream_is_monotonic_and_bounded(ops in prop::collection::vec(op(), 0..64)) {
        let progress = Progress::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        let _sub = progress.property().subscribe(move |v| log.lock().unwrap().push(*v));

        for op in &ops {
            match *op {
                Op::Set(v) => { progress.set(v); }
                Op::Add(d) => { progress.add(d); }
            }
        }

        let seen = seen.lock().unwrap();
        prop_assert_eq!(seen[0], 0.0);
        for pair in seen.windows(2) {
            prop_assert!(pair[0] < pair[1], "not strictly increasing: {:?}", pair);
        }
        for v in seen.iter() {
            prop_assert!((0.0..=1.0).contains(v));
        }
        prop_assert_eq!(*seen.last().unwrap(), progress.get());
    }

    #[test]
    fn progress_command_resets_between_runs(
        runs in prop::collection::vec(prop::collection::vec(-0.2f64..1.2, 0..8), 1..6)
    ) {
        let script = Arc::new(Mutex::new(runs.clone().into_iter()));
        let cmd = CommandBuilder::new().build_supplier_with_progress(move |progress| {
            let steps = script.lock().unwrap().next().unwrap_or_default();
            for step in steps {
                progress.set(step);
            }
            Ok::<_, BoxError>(())
        });

        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        let _sub = cmd.progress_property().subscribe(move |v| log.lock().unwrap().push(*v));

        for _ in &runs {
            cmd.execute_empty().unwrap();
            prop_assert_eq!(cmd.progress(), 0.0);
        }
        prop_assert_eq!(cmd.execution_count(), runs.len() as u64);
        for v in seen.lock().unwrap().iter() {
            prop_assert!((0.0..=1.0).contains(v));
        }
    }
}

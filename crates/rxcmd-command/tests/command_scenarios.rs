#![forbid(unsafe_code)]

//! End-to-end command scenarios.
//!
//! Validates:
//! - Inline execution of `f(x) = x + 2` with the full `is_executing` history.
//! - A deferred execution completed by the test after `execute` returned.
//! - A `can_execute` source toggled while an execution is in flight.
//! - A composite with one succeeding and one failing child.
//! - The `0.0 -> 1.0 -> 0.0` progress bracket of plain commands.
//! - `has_been_executed` flips only after the outcome is visible.

use std::sync::{Arc, Mutex};

use rxcmd_command::{
    BoxError, Command, CommandBuilder, Completer, CompositeCommand, ManualExecutor,
};
use rxcmd_reactive::{Property, ReadOnlyProperty, Subscription};

fn record<T: Clone + Send + 'static>(property: &ReadOnlyProperty<T>) -> (Arc<Mutex<Vec<T>>>, Subscription) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    let sub = property.subscribe(move |v: &T| log.lock().unwrap().push(v.clone()));
    (seen, sub)
}

#[test]
fn add_two_runs_inline() {
    let cmd = Command::from_fn(|x: i32| Ok::<_, BoxError>(x + 2));
    let (executing, _sub) = record(&cmd.is_executing_property());

    cmd.execute(5).unwrap();

    assert_eq!(cmd.result(), Some(7));
    assert_eq!(cmd.execution_count(), 1);
    assert_eq!(*executing.lock().unwrap(), vec![false, true, false]);
}

#[test]
fn deferred_result_completed_later() {
    let pending: Arc<Mutex<Option<Completer<i32>>>> = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&pending);
    let cmd = CommandBuilder::new().build_deferred(move |_: i32, completer: Completer<i32>| {
        *slot.lock().unwrap() = Some(completer);
    });

    let completion = cmd.execute(5).unwrap();
    assert!(!completion.is_complete());
    assert!(!cmd.can_execute());
    assert!(cmd.is_executing());

    let completer = pending.lock().unwrap().take().unwrap();
    completer.succeed(7);

    assert!(completion.is_complete());
    assert_eq!(cmd.result(), Some(7));
    assert!(cmd.can_execute());
    assert!(!cmd.is_executing());
}

#[test]
fn source_toggle_mid_flight_never_reenables_early() {
    let source = Property::new(true);
    let exec = ManualExecutor::new();
    let cmd = CommandBuilder::new()
        .can_execute(source.clone())
        .executor(exec.clone())
        .build_fn(|x: i32| Ok::<_, BoxError>(x));
    let (seen, _sub) = record(&cmd.can_execute_property());

    cmd.execute(1).unwrap();
    source.set(false);
    source.set(true);
    source.set(false);
    source.set(true);
    assert_eq!(*seen.lock().unwrap(), vec![true, false]);

    exec.run_all();
    assert_eq!(*seen.lock().unwrap(), vec![true, false, true]);
}

#[test]
fn source_false_after_completion_keeps_command_disabled() {
    let source = Property::new(true);
    let exec = ManualExecutor::new();
    let cmd = CommandBuilder::new()
        .can_execute(source.clone())
        .executor(exec.clone())
        .build_fn(|x: i32| Ok::<_, BoxError>(x));

    cmd.execute(1).unwrap();
    source.set(false);
    exec.run_all();
    assert!(!cmd.can_execute());
    assert!(cmd.execute(2).unwrap().is_complete());
    assert_eq!(exec.pending(), 0);
}

#[test]
fn composite_with_failing_child() {
    let exec = ManualExecutor::new();
    let ok = CommandBuilder::new()
        .executor(exec.clone())
        .build_fn(|_: ()| Ok::<_, BoxError>(1));
    let failing = CommandBuilder::new()
        .executor(exec.clone())
        .build_fn(|_: ()| Err::<i32, BoxError>("E".into()));
    let composite = CompositeCommand::new(vec![ok, failing]).unwrap();

    let (results, _r) = record(&composite.result_property());
    let (errors, _e) = record(&composite.error_property());
    let (executing, _x) = record(&composite.is_executing_property());

    let completion = composite.execute(()).unwrap();
    assert!(composite.is_executing());

    assert!(exec.run_next());
    assert!(composite.is_executing(), "one child still running");
    assert!(exec.run_next());
    assert!(completion.is_complete());

    assert!(results.lock().unwrap().is_empty());
    let errors = errors.lock().unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].to_string(), "E");
    assert_eq!(*executing.lock().unwrap(), vec![false, true, false]);
}

#[test]
fn plain_command_brackets_progress() {
    let cmd = Command::from_supplier(|| Ok::<_, BoxError>(()));
    let (seen, _sub) = record(&cmd.progress_property());
    cmd.execute_empty().unwrap();
    assert_eq!(*seen.lock().unwrap(), vec![0.0, 1.0, 0.0]);

    let (late, _late) = record(&cmd.progress_property());
    assert_eq!(*late.lock().unwrap(), vec![0.0]);
}

#[test]
fn has_been_executed_follows_outcome() {
    let cmd = Command::from_fn(|x: i32| Ok::<_, BoxError>(x * 10));
    let seen_result = Arc::new(Mutex::new(None));
    let probe = cmd.clone();
    let slot = Arc::clone(&seen_result);
    let _sub = cmd.has_been_executed_property().subscribe_changes(move |executed| {
        if *executed {
            *slot.lock().unwrap() = Some(probe.result());
        }
    });

    cmd.execute(4).unwrap();
    assert_eq!(*seen_result.lock().unwrap(), Some(Some(40)));
}

#[test]
fn rejected_execution_leaves_no_trace() {
    let exec = ManualExecutor::new();
    let cmd = CommandBuilder::new()
        .executor(exec.clone())
        .build_fn(|x: i32| Ok::<_, BoxError>(x));
    let (results, _r) = record(&cmd.result_property());
    let (progress, _p) = record(&cmd.progress_property());

    cmd.execute(1).unwrap();
    for i in 2..10 {
        assert!(cmd.execute(i).unwrap().is_complete());
    }
    exec.run_all();

    assert_eq!(*results.lock().unwrap(), vec![1]);
    assert_eq!(*progress.lock().unwrap(), vec![0.0, 1.0, 0.0]);
    assert_eq!(cmd.execution_count(), 1);
}

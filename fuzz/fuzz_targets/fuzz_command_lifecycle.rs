#![no_main]

use std::sync::{Arc, Mutex};

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use rxcmd_command::{BoxError, CommandBuilder, ManualExecutor};
use rxcmd_reactive::Property;

#[derive(Arbitrary, Debug)]
enum Step {
    Execute(u8),
    Source(bool),
    RunNext,
    Discard,
}

fuzz_target!(|steps: Vec<Step>| {
    let source = Property::new(true);
    let exec = ManualExecutor::new();
    let cmd = CommandBuilder::new()
        .can_execute(source.clone())
        .executor(exec.clone())
        .build_fn_with_progress(|x: u8, progress| {
            progress.set(f64::from(x) / 255.0);
            if x % 5 == 0 {
                Err::<u8, BoxError>("divisible by five".into())
            } else {
                Ok(x)
            }
        });

    let outcomes = Arc::new(Mutex::new(0u64));
    let o = Arc::clone(&outcomes);
    let _r = cmd.result_property().subscribe_changes(move |_| *o.lock().unwrap() += 1);
    let o = Arc::clone(&outcomes);
    let _e = cmd.error_property().subscribe_changes(move |_| *o.lock().unwrap() += 1);

    for step in steps.iter().take(256) {
        match *step {
            Step::Execute(x) => {
                let before = cmd.execution_count();
                let accepted = cmd.can_execute();
                let completion = cmd.execute(x).unwrap();
                if !accepted {
                    assert!(completion.is_complete());
                    assert_eq!(cmd.execution_count(), before);
                }
            }
            Step::Source(allowed) => source.set(allowed),
            Step::RunNext => {
                exec.run_next();
            }
            Step::Discard => {
                exec.discard_all();
            }
        }
        assert_eq!(cmd.is_executing(), exec.pending() == 1);
        assert!(exec.pending() <= 1);
        assert_eq!(*outcomes.lock().unwrap(), cmd.execution_count());
        if !cmd.is_executing() {
            assert_eq!(cmd.progress(), 0.0);
            assert_eq!(cmd.can_execute(), source.get().unwrap_or(false));
        }
    }
});

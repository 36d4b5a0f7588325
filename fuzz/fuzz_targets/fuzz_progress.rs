#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use rxcmd_command::Progress;

#[derive(Arbitrary, Debug)]
enum Op {
    Set(f64),
    Add(f64),
}

fuzz_target!(|ops: Vec<Op>| {
    let progress = Progress::new();
    let mut last = progress.get();
    for op in ops.iter().take(1024) {
        let changed = match *op {
            Op::Set(v) => progress.set(v),
            Op::Add(d) => progress.add(d),
        };
        let now = progress.get();
        assert!((0.0..=1.0).contains(&now));
        assert!(now >= last);
        assert_eq!(changed, now > last);
        last = now;
    }
});

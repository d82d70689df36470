#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use warden_core::{BackoffSchedule, RetryRecord};

#[derive(Debug, Arbitrary)]
enum Op {
    Failure { now: u32 },
    Success,
    ClockChange { old_now: u32, new_now: u32 },
}

#[derive(Debug, Arbitrary)]
struct Input {
    no_delay_attempts: u8,
    base_wait_secs: u16,
    ops: Vec<Op>,
}

fuzz_target!(|input: Input| {
    let schedule = BackoffSchedule::new(
        u16::from(input.no_delay_attempts),
        u32::from(input.base_wait_secs),
    );
    let mut record = RetryRecord::default();

    for op in input.ops {
        match op {
            Op::Failure { now } => {
                let before = record.retry_count;
                record.record_failure(&schedule, now);
                assert!(record.retry_count >= before);
                assert_eq!(record.remaining_wait(now), u64::from(record.wait_seconds));
            }
            Op::Success => {
                record.reset();
                assert_eq!(record, RetryRecord::default());
            }
            Op::ClockChange { old_now, new_now } => {
                let remaining = record.remaining_wait(old_now);
                record.begin_clock_change(old_now);
                record.repair(new_now);
                // A clock rewrite, or its boot-time repair, carries the
                // remaining wait over unchanged
                assert_eq!(
                    record.remaining_wait(new_now),
                    remaining.min(u64::from(u32::MAX))
                );
                assert!(!record.dirty);
            }
        }
    }
});

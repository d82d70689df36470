//! Property-based tests for warden-core using proptest
//!
//! These tests verify the retry record invariants that must hold for every
//! failure ordering.

use proptest::prelude::*;
use warden_core::{
    host::{HostCommand, HostRequest},
    BackoffSchedule, RetryRecord,
};

fn arb_schedule() -> impl Strategy<Value = BackoffSchedule> {
    (0u16..8, 1u32..3600).prop_map(|(n, base)| BackoffSchedule::new(n, base))
}

fn arb_record(schedule: BackoffSchedule) -> impl Strategy<Value = RetryRecord> {
    (1u16..40, 0u32..1_000_000).prop_map(move |(count, snapshot)| RetryRecord {
        retry_count: count,
        wait_seconds: schedule.wait_for(count),
        snapshot_seconds: snapshot,
        dirty: false,
    })
}

proptest! {
    #[test]
    fn no_wait_within_free_attempts(schedule in arb_schedule(), count in 0u16..8) {
        prop_assume!(count <= schedule.no_delay_attempts);
        prop_assert_eq!(schedule.wait_for(count), 0);
    }

    #[test]
    fn wait_doubles_after_base(schedule in arb_schedule(), extra in 0u16..20) {
        let first = schedule.no_delay_attempts + 1;
        prop_assert_eq!(schedule.wait_for(first), schedule.base_wait_secs);

        let count = first + extra;
        let current = schedule.wait_for(count);
        let next = schedule.wait_for(count + 1);
        if current <= u32::MAX / 2 {
            prop_assert_eq!(next, current * 2);
        } else {
            prop_assert_eq!(next, u32::MAX);
        }
    }

    #[test]
    fn failure_keeps_wait_a_function_of_count(
        (schedule, mut record) in arb_schedule().prop_flat_map(|s| (Just(s), arb_record(s))),
        now in 0u32..2_000_000,
    ) {
        record.record_failure(&schedule, now);
        prop_assert_eq!(record.wait_seconds, schedule.wait_for(record.retry_count));
        prop_assert_eq!(record.snapshot_seconds, now);
    }

    #[test]
    fn crash_before_clock_rewrite_never_shortens_lockout(
        (_schedule, mut record) in arb_schedule().prop_flat_map(|s| (Just(s), arb_record(s))),
        elapsed in 0u32..10_000,
        downtime in 0u32..100_000,
    ) {
        let old_now = record.snapshot_seconds.saturating_add(elapsed);
        let earliest_before = record.earliest_attempt().max(u64::from(old_now));

        // Dirty record persisted, then power is lost before the rewrite
        record.begin_clock_change(old_now);
        prop_assert!(record.dirty);

        let boot_now = old_now.saturating_add(downtime);
        record.repair(boot_now);

        prop_assert!(!record.dirty);
        prop_assert!(record.earliest_attempt() >= earliest_before);
    }

    #[test]
    fn clock_rewrite_preserves_remaining_wait(
        (_schedule, mut record) in arb_schedule().prop_flat_map(|s| (Just(s), arb_record(s))),
        elapsed in 0u32..10_000,
        new_clock in 0u32..2_000_000,
    ) {
        let old_now = record.snapshot_seconds.saturating_add(elapsed);
        let remaining = record.remaining_wait(old_now);

        record.begin_clock_change(old_now);
        record.repair(new_clock);

        prop_assert_eq!(record.remaining_wait(new_clock), remaining);
    }

    #[test]
    fn host_parser_never_panics(
        command in any::<u8>(),
        sub in any::<u8>(),
        payload in proptest::collection::vec(any::<u8>(), 0..8),
    ) {
        let request = HostRequest { command, sub_command: sub, payload };
        if let Ok(parsed) = HostCommand::parse(&request) {
            prop_assert_eq!(HostCommand::parse(&parsed.to_request()), Ok(parsed));
        }
    }
}

//! Property-based tests for elapsed-time accounting.

use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use timebox_train::{
    CallbackContext, CallbackState, ManualClock, SingleProcess, Timer, TrainerState,
    TrainingCallback,
};

fn started_timer(offset_ms: u64) -> (Timer, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new());
    let mut timer = Timer::new("23:59:59", "step", false)
        .unwrap()
        .with_clock(clock.clone());

    let mut saved = CallbackState::new();
    saved.insert(
        "time_elapsed".into(),
        serde_json::to_value(Duration::from_millis(offset_ms)).unwrap(),
    );
    timer.on_load_checkpoint(&saved).unwrap();

    let mut state = TrainerState::default();
    timer.on_train_start(&mut CallbackContext::new(&mut state, &SingleProcess));
    (timer, clock)
}

proptest! {
    #[test]
    fn elapsed_is_offset_plus_clock_and_never_decreases(
        offset_ms in 0u64..86_000_000,
        ticks in prop::collection::vec(0u64..10_000, 1..50),
    ) {
        let (timer, clock) = started_timer(offset_ms);
        let mut previous = timer.time_elapsed();
        prop_assert_eq!(previous, Duration::from_millis(offset_ms));

        let mut total = 0;
        for tick in ticks {
            clock.advance(Duration::from_millis(tick));
            total += tick;
            let elapsed = timer.time_elapsed();
            prop_assert!(elapsed >= previous);
            prop_assert_eq!(elapsed, Duration::from_millis(offset_ms + total));
            previous = elapsed;
        }
    }

    #[test]
    fn save_then_load_preserves_elapsed(
        offset_ms in 0u64..86_000_000,
        run_ms in 0u64..1_000_000,
    ) {
        let (timer, clock) = started_timer(offset_ms);
        clock.advance(Duration::from_millis(run_ms));
        let saved = timer.on_save_checkpoint().unwrap().unwrap();

        let mut fresh = Timer::new("23:59:59", "step", false).unwrap();
        fresh.on_load_checkpoint(&saved).unwrap();
        prop_assert_eq!(fresh.time_elapsed(), Duration::from_millis(offset_ms + run_ms));
    }
}

use std::time::{Duration, Instant};

use tracing::debug;

/// Fixed-step policy for stateful demos.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepSchedule {
    pub interval: Duration,
    /// Upper bound on steps run by a single iteration.
    pub max_catch_up: u32,
}

impl StepSchedule {
    pub fn new(interval: Duration, max_catch_up: u32) -> Self {
        Self {
            interval,
            max_catch_up: max_catch_up.max(1),
        }
    }
}

/// Continuous time plus the fixed-step accumulator.
///
/// Time only moves when [`tick`](FrameClock::tick) is called with a new
/// timestamp, so drivers decide whether that is wall-clock or virtual time.
#[derive(Debug, Clone)]
pub struct FrameClock {
    last: Option<Instant>,
    elapsed: Duration,
    accumulator: Duration,
    schedule: Option<StepSchedule>,
    dropped_steps: u64,
}

impl FrameClock {
    pub fn new(schedule: Option<StepSchedule>) -> Self {
        Self {
            last: None,
            elapsed: Duration::ZERO,
            accumulator: Duration::ZERO,
            schedule: schedule.filter(|schedule| !schedule.interval.is_zero()),
            dropped_steps: 0,
        }
    }

    /// Advances to `now` and returns the time since the previous tick. The
    /// first tick only sets the baseline.
    pub fn tick(&mut self, now: Instant) -> Duration {
        let delta = match self.last {
            Some(last) => now.saturating_duration_since(last),
            None => Duration::ZERO,
        };
        self.last = Some(now);
        self.elapsed += delta;
        if self.schedule.is_some() {
            self.accumulator += delta;
        }
        delta
    }

    /// Accumulated time since the first tick.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn accumulator(&self) -> Duration {
        self.accumulator
    }

    pub fn schedule(&self) -> Option<StepSchedule> {
        self.schedule
    }

    /// Whole intervals skipped so far because the catch-up cap was reached.
    pub fn dropped_steps(&self) -> u64 {
        self.dropped_steps
    }

    /// Number of fixed steps owed this iteration.
    ///
    /// Each step consumes one interval from the accumulator. When more than
    /// `max_catch_up` steps are owed the surplus whole intervals are dropped
    /// and only the fractional phase is kept.
    pub fn due_steps(&mut self) -> u32 {
        let Some(schedule) = self.schedule else {
            return 0;
        };

        let mut steps = 0;
        while self.accumulator >= schedule.interval && steps < schedule.max_catch_up {
            self.accumulator -= schedule.interval;
            steps += 1;
        }

        if self.accumulator >= schedule.interval {
            let interval = schedule.interval.as_nanos();
            let owed = self.accumulator.as_nanos();
            let dropped = owed / interval;
            self.accumulator = Duration::from_nanos((owed % interval) as u64);
            self.dropped_steps += dropped as u64;
            debug!(
                dropped = dropped as u64,
                max_catch_up = schedule.max_catch_up,
                "step catch-up capped"
            );
        }

        steps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[test]
    fn first_tick_sets_baseline() {
        let start = Instant::now();
        let mut clock = FrameClock::new(None);
        assert_eq!(clock.tick(start), Duration::ZERO);
        assert_eq!(clock.tick(start + ms(16)), ms(16));
        assert_eq!(clock.tick(start + ms(40)), ms(24));
        assert_eq!(clock.elapsed(), ms(40));
        assert_eq!(clock.due_steps(), 0);
    }

    #[test]
    fn keeps_phase_under_variable_frame_rate() {
        let start = Instant::now();
        let mut clock = FrameClock::new(Some(StepSchedule::new(ms(160), 4)));
        clock.tick(start);

        let mut now = start;
        let mut total = 0;
        for frame in [100, 30, 90, 120, 160] {
            now += ms(frame);
            clock.tick(now);
            total += clock.due_steps();
        }
        // 500ms of frames owe three 160ms steps with 20ms of phase left over.
        assert_eq!(total, 3);
        assert_eq!(clock.accumulator(), ms(20));
        assert_eq!(clock.dropped_steps(), 0);
    }

    #[test]
    fn caps_catch_up_after_a_long_stall() {
        let start = Instant::now();
        let mut clock = FrameClock::new(Some(StepSchedule::new(ms(160), 4)));
        clock.tick(start);
        clock.tick(start + Duration::from_secs(60) + ms(50));

        assert_eq!(clock.due_steps(), 4);
        assert_eq!(clock.accumulator(), ms(50));
        assert_eq!(clock.due_steps(), 0);
        assert!(clock.dropped_steps() > 0);
    }

    #[test]
    fn bounded_for_any_stall_length() {
        for stall in [0, 159, 160, 161, 640, 10_000, 1_000_000] {
            let start = Instant::now();
            let mut clock = FrameClock::new(Some(StepSchedule::new(ms(160), 3)));
            clock.tick(start);
            clock.tick(start + ms(stall));
            assert!(clock.due_steps() <= 3, "stall {stall}ms");
            assert!(clock.accumulator() < ms(160), "stall {stall}ms");
        }
    }

    #[test]
    fn zero_interval_disables_stepping() {
        let mut clock = FrameClock::new(Some(StepSchedule::new(Duration::ZERO, 4)));
        let start = Instant::now();
        clock.tick(start);
        clock.tick(start + ms(100));
        assert_eq!(clock.due_steps(), 0);
    }
}

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::frame::InputEvent;

/// How a windowed demo paces its frames. One policy per instance; a blocking
/// present is never combined with a timed wait.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub enum PacingPolicy {
    /// Present blocks on the display refresh (FIFO).
    #[default]
    Vsync,
    /// Present returns immediately; frames run back to back.
    Immediate,
    /// Present returns immediately; the event loop sleeps until the next
    /// frame deadline.
    Capped { fps: f32 },
}

impl PacingPolicy {
    pub fn frame_interval(&self) -> Option<Duration> {
        match *self {
            Self::Capped { fps } if fps > 0.0 => Some(Duration::from_secs_f32(1.0 / fps)),
            _ => None,
        }
    }

    pub fn blocks_on_present(&self) -> bool {
        matches!(self, Self::Vsync)
    }
}

/// Supplies the timestamp for each frame-loop iteration.
pub trait TimeSource {
    fn now(&mut self) -> Instant;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&mut self) -> Instant {
        Instant::now()
    }
}

/// Virtual time advancing by a fixed amount per sample; the first sample is
/// the origin.
#[derive(Debug, Clone, Copy)]
pub struct SteppedTimeSource {
    origin: Instant,
    step: Duration,
    frame: u32,
}

impl SteppedTimeSource {
    pub fn new(step: Duration) -> Self {
        Self {
            origin: Instant::now(),
            step,
            frame: 0,
        }
    }

    pub fn from_fps(fps: f32) -> Self {
        Self::new(Duration::from_secs_f32(1.0 / fps.max(f32::EPSILON)))
    }
}

impl TimeSource for SteppedTimeSource {
    fn now(&mut self) -> Instant {
        let now = self.origin + self.step * self.frame;
        self.frame = self.frame.saturating_add(1);
        now
    }
}

/// Non-blocking source of discrete input events.
pub trait InputSource {
    /// Returns every event queued since the previous call.
    fn drain(&mut self) -> Vec<InputEvent>;
}

impl InputSource for VecDeque<InputEvent> {
    fn drain(&mut self) -> Vec<InputEvent> {
        VecDeque::drain(self, ..).collect()
    }
}

/// Events scheduled by iteration index, for headless runs.
#[derive(Debug, Clone, Default)]
pub struct ScriptedInput {
    iteration: u64,
    script: Vec<(u64, InputEvent)>,
}

impl ScriptedInput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `event` for delivery at the start of iteration `iteration`
    /// (zero based).
    pub fn at(mut self, iteration: u64, event: InputEvent) -> Self {
        self.script.push((iteration, event));
        self
    }

    /// Quits at the start of iteration `iterations`, after that many have run.
    pub fn quit_after(self, iterations: u64) -> Self {
        self.at(iterations, InputEvent::Quit)
    }
}

impl InputSource for ScriptedInput {
    fn drain(&mut self) -> Vec<InputEvent> {
        let iteration = self.iteration;
        self.iteration += 1;
        let mut due = Vec::new();
        self.script.retain(|(at, event)| {
            if *at == iteration {
                due.push(event.clone());
                false
            } else {
                true
            }
        });
        due
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Key;

    #[test]
    fn capped_policy_reports_interval() {
        let interval = PacingPolicy::Capped { fps: 50.0 }
            .frame_interval()
            .expect("interval");
        assert!((interval.as_secs_f32() - 0.02).abs() < 1e-6);
        assert!(PacingPolicy::Vsync.frame_interval().is_none());
        assert!(PacingPolicy::Capped { fps: 0.0 }.frame_interval().is_none());
        assert!(PacingPolicy::Vsync.blocks_on_present());
        assert!(!PacingPolicy::Immediate.blocks_on_present());
    }

    #[test]
    fn stepped_time_advances_by_fixed_amounts() {
        let mut time = SteppedTimeSource::new(Duration::from_millis(10));
        let first = time.now();
        let second = time.now();
        let third = time.now();
        assert_eq!(second - first, Duration::from_millis(10));
        assert_eq!(third - first, Duration::from_millis(20));
    }

    #[test]
    fn scripted_input_delivers_by_iteration() {
        let mut input = ScriptedInput::new()
            .at(1, InputEvent::KeyPress(Key::Space))
            .at(1, InputEvent::KeyPress(Key::Character('r')))
            .quit_after(3);
        assert!(input.drain().is_empty());
        assert_eq!(input.drain().len(), 2);
        assert!(input.drain().is_empty());
        assert_eq!(input.drain(), vec![InputEvent::Quit]);
    }
}

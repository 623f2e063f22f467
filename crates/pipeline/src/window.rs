//! Windowed driver: a winit event loop feeding a [`FrameLoop`] backed by
//! [`WgpuBackend`].
//!
//! Key presses are queued as [`InputEvent`]s and drained at the start of the
//! next redraw, so run state only changes between iterations. Pacing follows
//! one [`PacingPolicy`]: vsync and immediate redraw back to back, capped
//! waits for the next deadline in the event loop instead of sleeping.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use tracing::{debug, error, info, trace, warn};
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, Event, KeyEvent, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoop};
use winit::keyboard::{Key as WinitKey, NamedKey};
use winit::window::WindowBuilder;

use crate::frame::{FrameLoop, InputEvent, Key, KeyBindings, LoopSpec, RunState, RunSummary};
use crate::gpu::{GpuContext, WgpuBackend};
use crate::runtime::{PacingPolicy, SystemTimeSource, TimeSource};

const STATS_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct WindowOptions {
    pub title: String,
    pub size: (u32, u32),
    pub pacing: PacingPolicy,
    pub visible: bool,
}

/// Opens a window, runs the demo until quit and tears it down.
pub fn run_windowed(
    options: WindowOptions,
    spec: LoopSpec,
    keys: KeyBindings,
) -> Result<RunSummary> {
    let event_loop =
        EventLoop::new().map_err(|err| anyhow!("failed to create event loop: {err}"))?;
    let window = WindowBuilder::new()
        .with_title(options.title.as_str())
        .with_inner_size(PhysicalSize::new(options.size.0, options.size.1))
        .with_visible(options.visible)
        .build(&event_loop)
        .map_err(|err| anyhow!("failed to create window: {err}"))?;

    let context = GpuContext::windowed(&window, options.size, options.pacing)?;
    let profile = context.adapter_profile().clone();
    if profile.is_software() {
        warn!(adapter = %profile.name, "software rasterizer detected; expect low frame rates");
    }
    let mut backend = WgpuBackend::new(context);
    let frame_loop = FrameLoop::new(&mut backend, spec, keys)?;
    let stateful = frame_loop.is_stateful();
    info!(
        demo = frame_loop.label(),
        adapter = %profile.name,
        pacing = ?options.pacing,
        "window open"
    );

    let mut frame_loop = Some(frame_loop);
    let mut pending: VecDeque<InputEvent> = VecDeque::new();
    let mut failure: Option<anyhow::Error> = None;
    let mut summary: Option<RunSummary> = None;
    let mut clock = SystemTimeSource;
    let mut stats = FrameStats::new(clock.now());
    let frame_interval = options.pacing.frame_interval();
    let mut next_deadline = clock.now();

    window.request_redraw();

    let run_result = event_loop.run(|event, elwt| match event {
        Event::WindowEvent { window_id, event } if window_id == window.id() => match event {
            WindowEvent::CloseRequested | WindowEvent::Destroyed => {
                pending.push_back(InputEvent::Quit);
                window.request_redraw();
            }
            WindowEvent::KeyboardInput { event, .. } => {
                if event.state == ElementState::Pressed && !event.repeat {
                    pending.push_back(InputEvent::KeyPress(key_from_event(&event)));
                }
            }
            WindowEvent::Resized(new_size) => {
                backend.resize(new_size.width, new_size.height);
            }
            WindowEvent::RedrawRequested => {
                let Some(active) = frame_loop.as_mut() else {
                    return;
                };
                let events: Vec<InputEvent> = pending.drain(..).collect();
                let now = clock.now();
                let finished = match active.iterate(&mut backend, events, now) {
                    Ok(report) => {
                        if report.presented {
                            stats.record(now, report.generation, stateful);
                        }
                        report.run_state == RunState::Quitting
                    }
                    Err(err) => {
                        error!(error = %err, "frame failed");
                        failure = Some(err.into());
                        true
                    }
                };

                if finished {
                    if let Some(done) = frame_loop.take() {
                        summary = Some(RunSummary {
                            frames: done.frames(),
                            generation: done.generation(),
                            elapsed: done.clock().elapsed(),
                        });
                        if let Err(err) = done.teardown(&mut backend) {
                            failure.get_or_insert(err.into());
                        }
                    }
                    elwt.exit();
                }
            }
            _ => {}
        },
        Event::AboutToWait => {
            if frame_loop.is_none() {
                return;
            }
            match frame_interval {
                None => {
                    window.request_redraw();
                    elwt.set_control_flow(ControlFlow::Wait);
                }
                Some(interval) => {
                    let now = clock.now();
                    if now >= next_deadline {
                        window.request_redraw();
                        next_deadline = (next_deadline + interval).max(now);
                        elwt.set_control_flow(ControlFlow::WaitUntil(next_deadline));
                    } else {
                        trace!(
                            wait_ms = next_deadline.saturating_duration_since(now).as_millis(),
                            "waiting for next frame"
                        );
                        elwt.set_control_flow(ControlFlow::WaitUntil(next_deadline));
                    }
                }
            }
        }
        _ => {}
    });

    if let Some(active) = frame_loop.take() {
        summary.get_or_insert(RunSummary {
            frames: active.frames(),
            generation: active.generation(),
            elapsed: active.clock().elapsed(),
        });
        active.teardown(&mut backend)?;
    }
    if let Err(err) = run_result {
        return Err(anyhow!("window event loop error: {err}"));
    }
    if let Some(err) = failure {
        return Err(err);
    }
    debug!(
        presented = backend.presented_frames(),
        skipped = backend.skipped_frames(),
        "window closed"
    );
    summary.ok_or_else(|| anyhow!("event loop exited before the first frame"))
}

fn key_from_event(event: &KeyEvent) -> Key {
    match &event.logical_key {
        WinitKey::Named(NamedKey::Escape) => Key::Escape,
        WinitKey::Named(NamedKey::Space) => Key::Space,
        WinitKey::Named(NamedKey::Enter) => Key::Enter,
        WinitKey::Character(value) => {
            let mut chars = value.chars();
            match (chars.next(), chars.next()) {
                (Some(' '), None) => Key::Space,
                (Some(ch), None) => Key::Character(ch),
                _ => Key::Other,
            }
        }
        _ => Key::Other,
    }
}

struct FrameStats {
    window_start: Instant,
    frames: u32,
}

impl FrameStats {
    fn new(now: Instant) -> Self {
        Self {
            window_start: now,
            frames: 0,
        }
    }

    fn record(&mut self, now: Instant, generation: Option<u64>, stateful: bool) {
        self.frames += 1;
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed < STATS_INTERVAL {
            return;
        }
        let fps = self.frames as f32 / elapsed.as_secs_f32();
        if stateful {
            debug!(fps = fps.round(), generation, "render stats");
        } else {
            debug!(fps = fps.round(), "render stats");
        }
        self.window_start = now;
        self.frames = 0;
    }
}

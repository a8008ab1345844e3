use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;

use crate::engine::Engine;
use crate::media::surface::Surface;
use crate::midi::types::ControlEvent;

pub const DEFAULT_TARGET_FPS: f64 = 60.0;

/// Cancels a running [`FrameLoop`]. Cloneable and usable from any thread.
#[derive(Debug, Clone)]
pub struct LoopHandle {
    running: Arc<AtomicBool>,
}

impl LoopHandle {
    /// Stop the loop before its next frame. Returns whether this call did
    /// the stopping; later calls are no-ops.
    pub fn stop(&self) -> bool {
        let was_running = self.running.swap(false, Ordering::AcqRel);
        if was_running {
            log::info!("Render loop stop requested");
        }
        was_running
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// Drives the engine on one thread: drain queued control events, then
/// render, once per tick.
pub struct FrameLoop {
    engine: Engine,
    events: Receiver<ControlEvent>,
    epoch: Instant,
    frame_interval: Duration,
    running: Arc<AtomicBool>,
    frames: u64,
}

impl FrameLoop {
    pub fn new(engine: Engine, events: Receiver<ControlEvent>, epoch: Instant) -> Self {
        Self {
            engine,
            events,
            epoch,
            frame_interval: Duration::from_secs_f64(1.0 / DEFAULT_TARGET_FPS),
            running: Arc::new(AtomicBool::new(true)),
            frames: 0,
        }
    }

    pub fn with_target_fps(mut self, fps: f64) -> Self {
        if fps.is_finite() && fps > 0.0 {
            self.frame_interval = Duration::from_secs_f64(1.0 / fps);
        } else {
            log::warn!("Ignoring invalid target fps {fps}");
        }
        self
    }

    pub fn handle(&self) -> LoopHandle {
        LoopHandle {
            running: Arc::clone(&self.running),
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut Engine {
        &mut self.engine
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Milliseconds since the epoch.
    pub fn now_ms(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64() * 1000.0
    }

    /// Drain pending events and render one frame at `now_ms`. Returns the
    /// number of events handled.
    pub fn step_at(&mut self, now_ms: f64, surface: &mut dyn Surface) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events.try_recv() {
            self.engine.handle_event(&event);
            handled += 1;
        }
        self.engine.render(now_ms, surface);
        self.frames += 1;
        handled
    }

    /// Render at the target rate until stopped or `max_frames` have been
    /// drawn. `on_frame` runs after every frame with the engine and the
    /// finished surface. Returns the number of frames rendered.
    pub fn run(
        &mut self,
        surface: &mut dyn Surface,
        max_frames: Option<u64>,
        mut on_frame: impl FnMut(&mut Engine, &dyn Surface),
    ) -> u64 {
        let ticker = crossbeam_channel::tick(self.frame_interval);
        let start = self.frames;
        log::info!(
            "Render loop started at {:.1} fps",
            1.0 / self.frame_interval.as_secs_f64()
        );

        while self.running.load(Ordering::Acquire) {
            if max_frames.is_some_and(|max| self.frames - start >= max) {
                break;
            }
            let now = self.now_ms();
            self.step_at(now, surface);
            on_frame(&mut self.engine, surface);
            if ticker.recv().is_err() {
                break;
            }
        }

        let rendered = self.frames - start;
        log::info!("Render loop stopped after {rendered} frames");
        rendered
    }
}

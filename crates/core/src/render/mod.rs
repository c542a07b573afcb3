//! Background render task: load the animation, extract its timing, then drive
//! frame updates under the shared UI lock until stopped or finished.
//!
//! The task never owns region memory. Every time it takes the UI lock it first
//! re-validates its launch, so once teardown has begun (stop flag set under the
//! lock) it cannot draw again even if it was already blocked on the lock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};

use crate::config::{AnimationSource, PlaybackConfig};
use crate::host::{SharedUi, UiState};
use crate::library::AnimationLibrary;
use crate::lifecycle::{launch_runtime, live_launch, ResourceId};
use crate::loader::{self, Descriptor, PlaybackParameters};
use crate::timeline::{FrameStep, PlaybackClock};
use crate::{LottieError, Result};

/// Host threads need more headroom than the task stack accounted in bulk
/// memory.
const MIN_HOST_STACK: usize = 256 * 1024;

/// Progress of one launch's render task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    /// Spawned, waiting for the host UI to report it is running.
    Starting,
    /// Holding the UI lock while the library parses the source.
    Loading,
    /// Parameters extracted and widget revealed.
    Extracted,
    /// Inside the frame loop.
    Rendering,
    /// Nothing to play (invalid animation or auto-start disabled).
    Parked,
    /// Left the frame loop after a stop request or a finished one-shot run.
    Stopped,
}

impl TaskState {
    /// `true` once the task will not touch shared state again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Parked | Self::Stopped)
    }
}

/// Controller half of the stop protocol.
///
/// The flag is advisory: it lets the frame loop leave early on its own. What
/// actually keeps a stopped task from drawing is that the controller sets it
/// while holding the UI lock and the task re-checks it under the same lock.
#[derive(Debug)]
pub(crate) struct StopSignal {
    requested: Arc<AtomicBool>,
    wake: Sender<()>,
}

/// Task half of the stop protocol.
#[derive(Debug)]
pub(crate) struct StopListener {
    requested: Arc<AtomicBool>,
    wake: Receiver<()>,
}

pub(crate) fn stop_channel() -> (StopSignal, StopListener) {
    let requested = Arc::new(AtomicBool::new(false));
    let (wake_tx, wake_rx) = bounded(1);
    (
        StopSignal {
            requested: Arc::clone(&requested),
            wake: wake_tx,
        },
        StopListener {
            requested,
            wake: wake_rx,
        },
    )
}

impl StopSignal {
    pub(crate) fn request(&self) {
        self.requested.store(true, Ordering::Release);
        let _ = self.wake.try_send(());
    }

    pub(crate) fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }
}

impl StopListener {
    pub(crate) fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    /// Sleeps for `delay` unless woken by a stop request. Returns `true` when
    /// the task should stop. A dropped [`StopSignal`] counts as a request.
    pub(crate) fn sleep(&self, delay: Duration) -> bool {
        match self.wake.recv_timeout(delay) {
            Err(RecvTimeoutError::Timeout) => self.is_requested(),
            Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
        }
    }
}

/// Everything one launch's task needs, moved onto its thread.
pub(crate) struct RenderTask {
    pub(crate) ui: SharedUi,
    pub(crate) library: Arc<dyn AnimationLibrary>,
    pub(crate) resource: ResourceId,
    pub(crate) launch: u64,
    pub(crate) source: AnimationSource,
    pub(crate) looping: bool,
    pub(crate) auto_start: bool,
    pub(crate) playback: PlaybackConfig,
    pub(crate) stop: StopListener,
}

impl RenderTask {
    pub(crate) fn spawn(self) -> Result<JoinHandle<()>> {
        let stack_size = self.playback.task_stack_size.max(MIN_HOST_STACK);
        thread::Builder::new()
            .name("lottie_anim".to_string())
            .stack_size(stack_size)
            .spawn(move || self.run())
            .map_err(LottieError::TaskSpawn)
    }

    fn run(self) {
        let span = tracing::info_span!(
            "render_task",
            resource = self.resource.raw(),
            launch = self.launch
        );
        let _entered = span.enter();

        if !self.ui.wait_until_running(self.playback.startup_grace()) {
            tracing::debug!("host UI not reported running, continuing after grace period");
        }

        let params = match self.load() {
            Some(Descriptor::Playable(params)) => params,
            Some(Descriptor::Invalid(reason)) => {
                tracing::warn!(%reason, "no valid animation, task parking");
                self.finish(TaskState::Parked);
                return;
            }
            None => return,
        };
        if !self.auto_start {
            tracing::info!("auto start disabled, task parking");
            self.finish(TaskState::Parked);
            return;
        }

        let state = self.render(params);
        self.finish(state);
    }

    fn lock(&self) -> Option<MutexGuard<'_, UiState>> {
        match self.ui.lock() {
            Ok(state) => Some(state),
            Err(err) => {
                tracing::error!(%err, "render task abandoning launch");
                None
            }
        }
    }

    /// `None` when the launch was torn down before the task got the lock.
    fn load(&self) -> Option<Descriptor> {
        let mut state = self.lock()?;
        let (runtime, widget) = live_launch(&mut state, self.resource, self.launch)?;
        runtime.task_state = TaskState::Loading;
        let descriptor = loader::load(self.library.as_ref(), widget, &self.source);
        widget.reveal();
        runtime.task_state = TaskState::Extracted;
        Some(descriptor)
    }

    fn render(&self, mut params: PlaybackParameters) -> TaskState {
        let clock = params.clock(self.looping);
        let (min_delay, max_delay) = self.playback.frame_delay_bounds();
        let delay = clock.frame_delay(min_delay, max_delay);
        tracing::info!(
            delay_ms = delay.as_millis() as u64,
            looping = self.looping,
            "render loop started"
        );

        let playback = PlaybackClock::start();
        loop {
            if self.stop.is_requested() {
                break;
            }
            let step = clock.step(playback.elapsed_ms());
            {
                let Some(mut state) = self.lock() else {
                    break;
                };
                let Some((runtime, widget)) = live_launch(&mut state, self.resource, self.launch)
                else {
                    break;
                };
                runtime.task_state = TaskState::Rendering;
                params.driver.advance_to(&mut runtime.canvas, step.frame());
                widget.record_frame(step.frame());
            }
            tracing::trace!(frame = step.frame(), "frame drawn");

            if let FrameStep::Final(frame) = step {
                tracing::info!(frame, "animation complete");
                return TaskState::Stopped;
            }
            if self.stop.sleep(delay) {
                break;
            }
        }

        tracing::info!("stop requested, task exiting");
        TaskState::Stopped
    }

    fn finish(&self, state: TaskState) {
        let Some(mut guard) = self.lock() else {
            return;
        };
        if let Some(runtime) = launch_runtime(&mut guard, self.resource, self.launch) {
            runtime.task_state = state;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    #[test]
    fn stop_request_wakes_a_sleeping_task() {
        let (signal, listener) = stop_channel();
        let sleeper = thread::spawn(move || {
            let started = Instant::now();
            let stopped = listener.sleep(Duration::from_secs(10));
            (stopped, started.elapsed())
        });
        thread::sleep(Duration::from_millis(10));
        signal.request();

        let (stopped, slept) = sleeper.join().unwrap();
        assert!(stopped);
        assert!(slept < Duration::from_secs(5));
        assert!(signal.is_requested());
    }

    #[test]
    fn sleep_times_out_without_request() {
        let (_signal, listener) = stop_channel();
        assert!(!listener.sleep(Duration::from_millis(5)));
        assert!(!listener.is_requested());
    }

    #[test]
    fn dropped_signal_counts_as_stop() {
        let (signal, listener) = stop_channel();
        drop(signal);
        assert!(listener.sleep(Duration::from_secs(10)));
    }

    #[test]
    fn repeated_requests_do_not_block() {
        let (signal, listener) = stop_channel();
        signal.request();
        signal.request();
        assert!(listener.is_requested());
    }

    #[test]
    fn only_parked_and_stopped_are_terminal() {
        assert!(TaskState::Parked.is_terminal());
        assert!(TaskState::Stopped.is_terminal());
        assert!(!TaskState::Rendering.is_terminal());
        assert!(!TaskState::Starting.is_terminal());
    }
}

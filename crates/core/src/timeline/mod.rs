use std::time::{Duration, Instant};

/// Frame index to render after `elapsed_ms` of playback.
///
/// Looping playback wraps every `duration_ms`. One-shot playback interpolates
/// until `duration_ms` and then settles on `end_frame`. A zero duration or an
/// empty frame range yields `start_frame`.
pub fn next_frame(
    elapsed_ms: u64,
    start_frame: i32,
    end_frame: i32,
    duration_ms: u32,
    looping: bool,
) -> i32 {
    if duration_ms == 0 || end_frame <= start_frame {
        return start_frame;
    }
    let duration = u64::from(duration_ms);
    let phase = if looping {
        elapsed_ms % duration
    } else if elapsed_ms >= duration {
        return end_frame;
    } else {
        elapsed_ms
    };

    // Span and phase each reach 2^32, so the product needs 128 bits.
    let total_frames = i128::from(end_frame) - i128::from(start_frame);
    let offset = total_frames * i128::from(phase) / i128::from(duration);
    // `offset` lies in `[0, total_frames]`, so the sum stays within the range.
    (i128::from(start_frame) + offset) as i32
}

/// Delay between two draw calls, clamped to `[min, max]`.
pub fn frame_delay(duration_ms: u32, total_frames: i64, min: Duration, max: Duration) -> Duration {
    let per_frame = if total_frames > 0 {
        u64::from(duration_ms) / total_frames as u64
    } else {
        u64::from(duration_ms)
    };
    Duration::from_millis(per_frame).max(min).min(max)
}

/// What the render loop should do with the frame it was handed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStep {
    /// Draw this frame and keep going.
    Render(i32),
    /// Draw this frame, then stop: one-shot playback has run its course.
    Final(i32),
}

impl FrameStep {
    pub fn frame(self) -> i32 {
        match self {
            Self::Render(frame) | Self::Final(frame) => frame,
        }
    }
}

/// Timing parameters of one launch, fixed once the descriptor is extracted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameClock {
    pub start_frame: i32,
    pub end_frame: i32,
    pub duration_ms: u32,
    pub looping: bool,
}

impl FrameClock {
    pub fn total_frames(&self) -> i64 {
        i64::from(self.end_frame) - i64::from(self.start_frame)
    }

    pub fn step(&self, elapsed_ms: u64) -> FrameStep {
        let frame = next_frame(
            elapsed_ms,
            self.start_frame,
            self.end_frame,
            self.duration_ms,
            self.looping,
        );
        if !self.looping && elapsed_ms >= u64::from(self.duration_ms) {
            FrameStep::Final(frame)
        } else {
            FrameStep::Render(frame)
        }
    }

    pub fn frame_delay(&self, min: Duration, max: Duration) -> Duration {
        frame_delay(self.duration_ms, self.total_frames(), min, max)
    }
}

/// Monotonic clock started when the render loop is entered.
#[derive(Debug, Clone, Copy)]
pub struct PlaybackClock {
    started: Instant,
}

impl PlaybackClock {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

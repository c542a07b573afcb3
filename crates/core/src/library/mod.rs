//! Interface to the vector animation library.
//!
//! Loading a source mutates the widget: the library assigns the playback
//! source and usually attaches an [`InternalAnimation`] that would advance the
//! widget on its own. The runtime takes that animation over so that exactly
//! one party drives frame updates.

use std::fmt;
use std::path::Path;

use serde::Deserialize;

use crate::host::{LoadedSource, PixelCanvas, Widget};

/// The animation's draw step: render frame `frame` into the canvas.
pub trait FrameDriver: Send {
    fn advance_to(&mut self, canvas: &mut PixelCanvas, frame: i32);
}

/// Playback object the library attaches to a widget after a successful parse.
pub struct InternalAnimation {
    pub start_frame: i32,
    pub end_frame: i32,
    pub duration_ms: u32,
    pub driver: Option<Box<dyn FrameDriver>>,
}

impl fmt::Debug for InternalAnimation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InternalAnimation")
            .field("start_frame", &self.start_frame)
            .field("end_frame", &self.end_frame)
            .field("duration_ms", &self.duration_ms)
            .field("has_driver", &self.driver.is_some())
            .finish()
    }
}

/// Operations the runtime needs from the animation library. All of them are
/// called with the shared UI lock held.
pub trait AnimationLibrary: Send + Sync {
    fn load_from_data(&self, widget: &mut Widget, data: &[u8]);

    fn load_from_file(&self, widget: &mut Widget, path: &Path);

    fn animation<'w>(&self, widget: &'w Widget) -> Option<&'w InternalAnimation> {
        widget.animation()
    }

    fn remove_animation(&self, widget: &mut Widget) -> Option<InternalAnimation> {
        widget.take_animation()
    }

    fn duration_ms(&self, animation: &InternalAnimation) -> u32 {
        animation.duration_ms
    }
}

/// Timing fields of a Lottie document.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
struct LottieHeader {
    /// In-point, first frame.
    ip: f64,
    /// Out-point, frame after the last one.
    op: f64,
    /// Frame rate.
    fr: f64,
}

impl LottieHeader {
    fn to_animation(self) -> Option<InternalAnimation> {
        if !self.fr.is_finite() || self.fr <= 0.0 || !self.ip.is_finite() || !self.op.is_finite()
        {
            return None;
        }
        let start_frame = self.ip.round() as i32;
        let end_frame = self.op.round() as i32;
        let duration_ms = ((self.op - self.ip) / self.fr * 1_000.0).round().max(0.0) as u32;
        Some(InternalAnimation {
            start_frame,
            end_frame,
            duration_ms,
            driver: Some(Box::new(ProgressFill {
                start_frame,
                end_frame,
            })),
        })
    }
}

/// Library that understands the Lottie JSON header and paints frame progress.
/// Vector rasterisation itself is delegated elsewhere.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonLottie;

impl JsonLottie {
    fn attach(&self, widget: &mut Widget, data: &[u8]) {
        match serde_json::from_slice::<LottieHeader>(data) {
            Ok(header) => match header.to_animation() {
                Some(animation) => widget.set_animation(animation),
                None => tracing::warn!(?header, "lottie header has unusable timing"),
            },
            Err(err) => tracing::warn!(%err, "failed to parse lottie document"),
        }
    }
}

impl AnimationLibrary for JsonLottie {
    fn load_from_data(&self, widget: &mut Widget, data: &[u8]) {
        widget.set_source(LoadedSource::Embedded { len: data.len() });
        self.attach(widget, data);
    }

    fn load_from_file(&self, widget: &mut Widget, path: &Path) {
        widget.set_source(LoadedSource::File(path.to_path_buf()));
        match std::fs::read(path) {
            Ok(data) => self.attach(widget, &data),
            Err(err) => tracing::warn!(path = %path.display(), %err, "failed to read lottie file"),
        }
    }
}

/// Fills the canvas with a colour ramp keyed on playback progress.
#[derive(Debug, Clone, Copy)]
struct ProgressFill {
    start_frame: i32,
    end_frame: i32,
}

impl FrameDriver for ProgressFill {
    fn advance_to(&mut self, canvas: &mut PixelCanvas, frame: i32) {
        let span = (i64::from(self.end_frame) - i64::from(self.start_frame)).max(1);
        let offset = (i64::from(frame) - i64::from(self.start_frame)).clamp(0, span);
        let level = (offset * 255 / span) as u32;
        canvas.fill(0xFF00_0000 | (level << 16) | (0xFF - level));
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::{Arc, Mutex};

    use super::*;

    /// Draw step that records every frame it is asked to render.
    #[derive(Debug, Clone, Default)]
    pub(crate) struct RecordingDriver {
        pub(crate) frames: Arc<Mutex<Vec<i32>>>,
    }

    impl FrameDriver for RecordingDriver {
        fn advance_to(&mut self, canvas: &mut PixelCanvas, frame: i32) {
            canvas.fill(frame as u32);
            self.frames.lock().unwrap().push(frame);
        }
    }

    /// Library whose parse result is fixed up front.
    #[derive(Debug, Clone)]
    pub(crate) struct StubLibrary {
        pub(crate) timing: Option<(i32, i32, u32)>,
        pub(crate) with_driver: bool,
        pub(crate) driver: RecordingDriver,
    }

    impl StubLibrary {
        pub(crate) fn playable(start: i32, end: i32, duration_ms: u32) -> Self {
            Self {
                timing: Some((start, end, duration_ms)),
                with_driver: true,
                driver: RecordingDriver::default(),
            }
        }

        pub(crate) fn invalid() -> Self {
            Self {
                timing: None,
                with_driver: false,
                driver: RecordingDriver::default(),
            }
        }

        pub(crate) fn frames(&self) -> Vec<i32> {
            self.driver.frames.lock().unwrap().clone()
        }

        fn attach(&self, widget: &mut Widget) {
            if let Some((start_frame, end_frame, duration_ms)) = self.timing {
                let driver: Option<Box<dyn FrameDriver>> = if self.with_driver {
                    Some(Box::new(self.driver.clone()))
                } else {
                    None
                };
                widget.set_animation(InternalAnimation {
                    start_frame,
                    end_frame,
                    duration_ms,
                    driver,
                });
            }
        }
    }

    impl AnimationLibrary for StubLibrary {
        fn load_from_data(&self, widget: &mut Widget, data: &[u8]) {
            widget.set_source(LoadedSource::Embedded { len: data.len() });
            self.attach(widget);
        }

        fn load_from_file(&self, widget: &mut Widget, path: &Path) {
            widget.set_source(LoadedSource::File(path.to_path_buf()));
            self.attach(widget);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::UiState;
    use crate::{MemoryRegion, RegionAllocator};

    fn widget(state: &mut UiState) -> &mut Widget {
        let screen = state.create_screen();
        let id = state.create_widget(screen);
        state.widget_mut(id).unwrap()
    }

    #[test]
    fn header_timing_becomes_internal_animation() {
        let mut state = UiState::default();
        let widget = widget(&mut state);
        JsonLottie.load_from_data(widget, br#"{"v":"5.7.4","ip":0,"op":60,"fr":30,"w":64,"h":64}"#);

        let animation = JsonLottie.animation(widget).unwrap();
        assert_eq!(animation.start_frame, 0);
        assert_eq!(animation.end_frame, 60);
        assert_eq!(JsonLottie.duration_ms(animation), 2_000);
        assert!(animation.driver.is_some());
        assert_eq!(widget.source(), Some(&LoadedSource::Embedded { len: 50 }));
    }

    #[test]
    fn malformed_document_assigns_source_without_animation() {
        let mut state = UiState::default();
        let widget = widget(&mut state);
        JsonLottie.load_from_data(widget, b"not json");

        assert!(widget.source().is_some());
        assert!(JsonLottie.animation(widget).is_none());
    }

    #[test]
    fn zero_frame_rate_is_rejected() {
        let mut state = UiState::default();
        let widget = widget(&mut state);
        JsonLottie.load_from_data(widget, br#"{"ip":0,"op":60,"fr":0}"#);

        assert!(widget.animation().is_none());
    }

    #[test]
    fn missing_file_leaves_widget_without_animation() {
        let mut state = UiState::default();
        let widget = widget(&mut state);
        let path = std::env::temp_dir().join("lottie-host-core-missing.json");
        JsonLottie.load_from_file(widget, &path);

        assert_eq!(widget.source(), Some(&LoadedSource::File(path)));
        assert!(widget.animation().is_none());
    }

    #[test]
    fn removing_animation_detaches_it() {
        let mut state = UiState::default();
        let widget = widget(&mut state);
        JsonLottie.load_from_data(widget, br#"{"ip":0,"op":10,"fr":10}"#);

        assert!(JsonLottie.remove_animation(widget).is_some());
        assert!(JsonLottie.animation(widget).is_none());
    }

    #[test]
    fn progress_fill_ramps_with_frame() {
        let allocator = RegionAllocator::with_capacities(1024, 64);
        let buffer = allocator.allocate(MemoryRegion::Bulk, 4, 4).unwrap();
        let mut canvas = PixelCanvas::new(1, 1, buffer);
        let mut driver = ProgressFill {
            start_frame: 0,
            end_frame: 10,
        };

        driver.advance_to(&mut canvas, 0);
        assert_eq!(canvas.pixels(), [0xFF_u8, 0x00, 0x00, 0xFF]);
        driver.advance_to(&mut canvas, 10);
        assert_eq!(canvas.pixels(), [0x00_u8, 0x00, 0xFF, 0xFF]);
    }

    #[test]
    fn progress_fill_handles_the_widest_frame_range() {
        let allocator = RegionAllocator::with_capacities(1024, 64);
        let buffer = allocator.allocate(MemoryRegion::Bulk, 4, 4).unwrap();
        let mut canvas = PixelCanvas::new(1, 1, buffer);
        let mut driver = ProgressFill {
            start_frame: i32::MIN,
            end_frame: i32::MAX,
        };

        driver.advance_to(&mut canvas, i32::MAX);
        assert_eq!(canvas.pixels(), [0x00_u8, 0x00, 0xFF, 0xFF]);
        driver.advance_to(&mut canvas, i32::MIN);
        assert_eq!(canvas.pixels(), [0xFF_u8, 0x00, 0x00, 0xFF]);
    }

    #[test]
    fn out_of_range_header_saturates_frame_bounds() {
        let mut state = UiState::default();
        let widget = widget(&mut state);
        JsonLottie.load_from_data(widget, br#"{"ip":-1e12,"op":1e12,"fr":1e9}"#);

        let animation = JsonLottie.animation(widget).unwrap();
        assert_eq!(animation.start_frame, i32::MIN);
        assert_eq!(animation.end_frame, i32::MAX);
        assert_eq!(animation.duration_ms, 2_000_000);
    }
}

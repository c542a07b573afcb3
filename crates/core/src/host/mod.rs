//! The host UI as seen by the animation runtime.
//!
//! One process-wide lock guards every widget and every pixel buffer. Code that
//! reads or writes widget state does so through a [`UiState`] borrowed from
//! [`SharedUi::lock`], which makes holding the lock a precondition the compiler
//! can check.

use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use crate::library::InternalAnimation;
use crate::lifecycle::ResourceTable;
use crate::memory::RegionBuffer;
use crate::{LottieError, Result};

/// Handle to a widget owned by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WidgetId(u32);

impl WidgetId {
    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}

/// Handle to a screen; widgets live on exactly one screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScreenId(u32);

impl ScreenId {
    pub fn raw(self) -> u32 {
        self.0
    }
}

/// What the animation library last assigned as the widget's playback source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadedSource {
    Embedded { len: usize },
    File(PathBuf),
}

/// Host-side state of one animation widget.
pub struct Widget {
    screen: ScreenId,
    hidden: bool,
    buffer_size: Option<(u32, u32)>,
    source: Option<LoadedSource>,
    animation: Option<InternalAnimation>,
    last_frame: Option<i32>,
    frames_drawn: u64,
}

impl Widget {
    fn new(screen: ScreenId) -> Self {
        Self {
            screen,
            hidden: false,
            buffer_size: None,
            source: None,
            animation: None,
            last_frame: None,
            frames_drawn: 0,
        }
    }

    pub fn screen(&self) -> ScreenId {
        self.screen
    }

    pub fn is_hidden(&self) -> bool {
        self.hidden
    }

    pub fn hide(&mut self) {
        self.hidden = true;
    }

    pub fn reveal(&mut self) {
        self.hidden = false;
    }

    /// Binds a pixel buffer of the given dimensions to the widget.
    pub fn set_buffer(&mut self, width: u32, height: u32) {
        self.buffer_size = Some((width, height));
    }

    pub fn clear_buffer(&mut self) {
        self.buffer_size = None;
    }

    pub fn buffer_size(&self) -> Option<(u32, u32)> {
        self.buffer_size
    }

    pub fn set_source(&mut self, source: LoadedSource) {
        self.source = Some(source);
    }

    pub fn source(&self) -> Option<&LoadedSource> {
        self.source.as_ref()
    }

    pub fn set_animation(&mut self, animation: InternalAnimation) {
        self.animation = Some(animation);
    }

    pub fn animation(&self) -> Option<&InternalAnimation> {
        self.animation.as_ref()
    }

    pub fn take_animation(&mut self) -> Option<InternalAnimation> {
        self.animation.take()
    }

    pub fn record_frame(&mut self, frame: i32) {
        self.last_frame = Some(frame);
        self.frames_drawn += 1;
    }

    pub fn last_frame(&self) -> Option<i32> {
        self.last_frame
    }

    pub fn frames_drawn(&self) -> u64 {
        self.frames_drawn
    }
}

impl fmt::Debug for Widget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Widget")
            .field("screen", &self.screen)
            .field("hidden", &self.hidden)
            .field("buffer_size", &self.buffer_size)
            .field("source", &self.source)
            .field("has_animation", &self.animation.is_some())
            .field("last_frame", &self.last_frame)
            .field("frames_drawn", &self.frames_drawn)
            .finish()
    }
}

/// ARGB8888 pixel buffer backed by bulk memory.
#[derive(Debug)]
pub struct PixelCanvas {
    width: u32,
    height: u32,
    buffer: RegionBuffer,
}

impl PixelCanvas {
    pub(crate) fn new(width: u32, height: u32, buffer: RegionBuffer) -> Self {
        debug_assert_eq!(buffer.len(), width as usize * height as usize * 4);
        Self {
            width,
            height,
            buffer,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        self.buffer.as_slice()
    }

    pub fn pixels_mut(&mut self) -> &mut [u8] {
        self.buffer.as_mut_slice()
    }

    pub fn fill(&mut self, argb: u32) {
        let bytes = argb.to_le_bytes();
        for pixel in self.pixels_mut().chunks_exact_mut(4) {
            pixel.copy_from_slice(&bytes);
        }
    }

    pub fn byte_len(&self) -> usize {
        self.buffer.len()
    }

    fn sync_for_read(&self) {
        self.buffer.sync_for_read();
    }
}

/// Everything guarded by the shared UI lock.
#[derive(Debug, Default)]
pub struct UiState {
    widgets: Vec<Widget>,
    next_screen: u32,
    pub(crate) resources: ResourceTable,
}

impl UiState {
    pub fn create_screen(&mut self) -> ScreenId {
        let screen = ScreenId(self.next_screen);
        self.next_screen += 1;
        screen
    }

    pub fn create_widget(&mut self, screen: ScreenId) -> WidgetId {
        let id = WidgetId(self.widgets.len() as u32);
        self.widgets.push(Widget::new(screen));
        id
    }

    pub fn widget(&self, id: WidgetId) -> Option<&Widget> {
        self.widgets.get(id.0 as usize)
    }

    pub fn widget_mut(&mut self, id: WidgetId) -> Option<&mut Widget> {
        self.widgets.get_mut(id.0 as usize)
    }

    pub(crate) fn try_widget_mut(&mut self, id: WidgetId) -> Result<&mut Widget> {
        self.widget_mut(id).ok_or(LottieError::UnknownWidget(id.0))
    }

    /// The host draw pass: pixels of a visible widget whose animation buffer
    /// is allocated, `None` otherwise.
    pub fn visible_pixels(&self, id: WidgetId) -> Option<&[u8]> {
        let widget = self.widget(id)?;
        if widget.is_hidden() {
            return None;
        }
        let canvas = self.resources.canvas_for(id)?;
        canvas.sync_for_read();
        Some(canvas.pixels())
    }

    /// Splits the borrow so a resource and its widget can be mutated together.
    pub(crate) fn parts_mut(&mut self) -> (&mut ResourceTable, &mut [Widget]) {
        (&mut self.resources, self.widgets.as_mut_slice())
    }
}

#[derive(Debug)]
struct UiInner {
    state: Mutex<UiState>,
    running: Mutex<bool>,
    running_changed: Condvar,
}

/// Shared handle to the host UI. Clones refer to the same lock.
#[derive(Debug, Clone)]
pub struct SharedUi {
    inner: Arc<UiInner>,
}

impl Default for SharedUi {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedUi {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(UiInner {
                state: Mutex::new(UiState::default()),
                running: Mutex::new(false),
                running_changed: Condvar::new(),
            }),
        }
    }

    /// Acquires the shared UI lock.
    pub fn lock(&self) -> Result<MutexGuard<'_, UiState>> {
        self.inner
            .state
            .lock()
            .map_err(|_| LottieError::Poisoned("shared UI lock"))
    }

    /// Reports that the host UI loop is up; wakes tasks waiting at startup.
    pub fn mark_running(&self) {
        let mut running = self
            .inner
            .running
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *running = true;
        self.inner.running_changed.notify_all();
    }

    pub fn is_running(&self) -> bool {
        *self
            .inner
            .running
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Blocks until the host UI is running or `grace` elapses. Returns whether
    /// the UI reported itself running.
    pub fn wait_until_running(&self, grace: Duration) -> bool {
        let running = self
            .inner
            .running
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let (running, _) = self
            .inner
            .running_changed
            .wait_timeout_while(running, grace, |running| !*running)
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *running
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Instant;

    use super::*;

    #[test]
    fn widgets_are_created_visible_on_their_screen() {
        let mut state = UiState::default();
        let first = state.create_screen();
        let second = state.create_screen();
        let widget = state.create_widget(second);

        assert_ne!(first, second);
        let widget = state.widget(widget).unwrap();
        assert_eq!(widget.screen(), second);
        assert!(!widget.is_hidden());
        assert_eq!(widget.buffer_size(), None);
    }

    #[test]
    fn hidden_widget_exposes_no_pixels() {
        let mut state = UiState::default();
        let screen = state.create_screen();
        let id = state.create_widget(screen);
        state.widget_mut(id).unwrap().hide();

        assert!(state.visible_pixels(id).is_none());
    }

    #[test]
    fn canvas_fill_writes_every_pixel() {
        let allocator = crate::RegionAllocator::with_capacities(1024, 64);
        let buffer = allocator
            .allocate(crate::MemoryRegion::Bulk, 2 * 3 * 4, 16)
            .unwrap();
        let mut canvas = PixelCanvas::new(2, 3, buffer);
        canvas.fill(0xFF11_2233);

        assert!(canvas
            .pixels()
            .chunks_exact(4)
            .all(|pixel| pixel == [0x33_u8, 0x22, 0x11, 0xFF]));
    }

    #[test]
    fn readiness_wakes_waiters() {
        let ui = SharedUi::new();
        let waiter = {
            let ui = ui.clone();
            thread::spawn(move || ui.wait_until_running(Duration::from_secs(5)))
        };
        ui.mark_running();

        assert!(waiter.join().unwrap());
        assert!(ui.is_running());
    }

    #[test]
    fn readiness_wait_is_bounded() {
        let ui = SharedUi::new();
        let started = Instant::now();

        assert!(!ui.wait_until_running(Duration::from_millis(20)));
        assert!(started.elapsed() >= Duration::from_millis(20));
    }
}

//! Core library for hosting Lottie widgets on memory-constrained devices.
//!
//! Each animation widget owns large buffers in slow external memory and a
//! background render task. The [`LifecycleController`] allocates those buffers,
//! launches the task, and tears everything down again in step with the
//! visibility of the screen hosting the widget. All widget and pixel state is
//! guarded by one process-wide lock, reached through [`SharedUi`].

pub mod config;
pub mod error;
pub mod host;
pub mod library;
pub mod lifecycle;
pub mod loader;
pub mod memory;
pub mod render;
pub mod timeline;

pub use config::{AnimationSource, AppConfig, MemoryConfig, PlaybackConfig, ResourceConfig};
pub use error::{LottieError, Result};
pub use host::{LoadedSource, PixelCanvas, ScreenId, SharedUi, UiState, Widget, WidgetId};
pub use library::{AnimationLibrary, FrameDriver, InternalAnimation, JsonLottie};
pub use lifecycle::{AnimationResource, Created, LifecycleController, ResourceId, ScreenEvent};
pub use loader::{Descriptor, InvalidDescriptor, PlaybackParameters};
pub use memory::{MemoryRegion, RegionAllocator, RegionBuffer, RegionStats};
pub use render::TaskState;
pub use timeline::{frame_delay, next_frame, FrameClock, FrameStep, PlaybackClock};

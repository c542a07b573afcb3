use std::fmt;

use crate::config::AnimationSource;
use crate::host::Widget;
use crate::library::{AnimationLibrary, FrameDriver};
use crate::timeline::FrameClock;

/// Why a loaded animation cannot be played. Never propagated as an error: the
/// render task parks when it sees one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum InvalidDescriptor {
    #[error("library attached no animation to the widget")]
    Missing,
    #[error("animation has no draw step")]
    NoDrawStep,
    #[error("animation duration is zero")]
    ZeroDuration,
    #[error("end frame {end} is not after start frame {start}")]
    EmptyRange { start: i32, end: i32 },
}

/// Everything the render loop needs, owned by the task for one launch.
pub struct PlaybackParameters {
    pub driver: Box<dyn FrameDriver>,
    pub start_frame: i32,
    pub end_frame: i32,
    pub duration_ms: u32,
}

impl PlaybackParameters {
    pub fn clock(&self, looping: bool) -> FrameClock {
        FrameClock {
            start_frame: self.start_frame,
            end_frame: self.end_frame,
            duration_ms: self.duration_ms,
            looping,
        }
    }
}

impl fmt::Debug for PlaybackParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaybackParameters")
            .field("start_frame", &self.start_frame)
            .field("end_frame", &self.end_frame)
            .field("duration_ms", &self.duration_ms)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub enum Descriptor {
    Playable(PlaybackParameters),
    Invalid(InvalidDescriptor),
}

impl Descriptor {
    pub fn is_playable(&self) -> bool {
        matches!(self, Self::Playable(_))
    }
}

/// Hands the source to the library, then takes the widget's own animation
/// away so that only the render task advances frames.
///
/// Must run with the shared UI lock held: loading assigns the playback source
/// to the widget.
pub fn load(
    library: &dyn AnimationLibrary,
    widget: &mut Widget,
    source: &AnimationSource,
) -> Descriptor {
    match source {
        AnimationSource::Embedded(data) => {
            library.load_from_data(widget, data);
            tracing::info!(bytes = data.len(), "animation loaded from embedded source");
        }
        AnimationSource::File(path) => {
            library.load_from_file(widget, path);
            tracing::info!(path = %path.display(), "animation loaded from file");
        }
    }

    let Some(animation) = library.animation(widget) else {
        return Descriptor::Invalid(InvalidDescriptor::Missing);
    };
    let start_frame = animation.start_frame;
    let end_frame = animation.end_frame;
    let duration_ms = library.duration_ms(animation);
    tracing::info!(start_frame, end_frame, duration_ms, "animation timing extracted");

    let Some(animation) = library.remove_animation(widget) else {
        return Descriptor::Invalid(InvalidDescriptor::Missing);
    };
    let Some(driver) = animation.driver else {
        return Descriptor::Invalid(InvalidDescriptor::NoDrawStep);
    };
    if duration_ms == 0 {
        return Descriptor::Invalid(InvalidDescriptor::ZeroDuration);
    }
    if end_frame <= start_frame {
        return Descriptor::Invalid(InvalidDescriptor::EmptyRange {
            start: start_frame,
            end: end_frame,
        });
    }

    Descriptor::Playable(PlaybackParameters {
        driver,
        start_frame,
        end_frame,
        duration_ms,
    })
}

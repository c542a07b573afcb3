use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::host::WidgetId;
use crate::{LottieError, Result};

/// Top-level configuration structure for the runtime.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub playback: PlaybackConfig,
    pub memory: MemoryConfig,
}

impl AppConfig {
    /// Parses a JSON document. Missing fields fall back to their defaults.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.playback.validate()?;
        self.memory.validate()
    }
}

/// Tunables for the render task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Lower bound on the delay between two draw calls.
    pub frame_delay_min_ms: u64,
    /// Upper bound on the delay between two draw calls.
    pub frame_delay_max_ms: u64,
    /// How long a fresh task waits for the host UI to report it is running.
    pub startup_grace_ms: u64,
    /// Stack reserved in bulk memory for every render task.
    pub task_stack_size: usize,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            frame_delay_min_ms: 16,
            frame_delay_max_ms: 100,
            startup_grace_ms: 1_000,
            task_stack_size: 64 * 1024,
        }
    }
}

impl PlaybackConfig {
    pub fn frame_delay_bounds(&self) -> (Duration, Duration) {
        (
            Duration::from_millis(self.frame_delay_min_ms),
            Duration::from_millis(self.frame_delay_max_ms),
        )
    }

    pub fn startup_grace(&self) -> Duration {
        Duration::from_millis(self.startup_grace_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.frame_delay_min_ms == 0 {
            return Err(LottieError::InvalidConfig(
                "frame_delay_min_ms must be at least 1".to_string(),
            ));
        }
        if self.frame_delay_min_ms > self.frame_delay_max_ms {
            return Err(LottieError::InvalidConfig(format!(
                "frame_delay_min_ms ({}) exceeds frame_delay_max_ms ({})",
                self.frame_delay_min_ms, self.frame_delay_max_ms
            )));
        }
        if self.task_stack_size == 0 {
            return Err(LottieError::InvalidConfig(
                "task_stack_size must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Sizes of the two memory regions available to the runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// External, high-capacity memory (pixel buffers and task stacks).
    pub bulk_capacity: usize,
    /// Internal, coherent memory (task control blocks).
    pub fast_capacity: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            bulk_capacity: 8 * 1024 * 1024,
            fast_capacity: 256 * 1024,
        }
    }
}

impl MemoryConfig {
    pub fn validate(&self) -> Result<()> {
        if self.bulk_capacity == 0 || self.fast_capacity == 0 {
            return Err(LottieError::InvalidConfig(
                "memory region capacities must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Where an animation's bytes come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnimationSource {
    /// Data linked into the firmware image.
    Embedded(Arc<[u8]>),
    /// Path handed to the file-backed data source.
    File(PathBuf),
}

impl AnimationSource {
    /// Builds a source from the optional halves the host hands over. Exactly
    /// one of them must be present.
    pub fn from_parts(data: Option<Arc<[u8]>>, path: Option<PathBuf>) -> Result<Self> {
        match (data, path) {
            (Some(data), None) => Ok(Self::Embedded(data)),
            (None, Some(path)) => Ok(Self::File(path)),
            (Some(_), Some(_)) => Err(LottieError::InvalidConfig(
                "animation source has both embedded data and a file path".to_string(),
            )),
            (None, None) => Err(LottieError::InvalidConfig(
                "animation source needs embedded data or a file path".to_string(),
            )),
        }
    }
}

/// Immutable per-widget configuration, fixed when the resource is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceConfig {
    pub widget: WidgetId,
    pub source: AnimationSource,
    pub looping: bool,
    pub auto_start: bool,
    pub width: u32,
    pub height: u32,
}

impl ResourceConfig {
    pub fn new(widget: WidgetId, source: AnimationSource, width: u32, height: u32) -> Self {
        Self {
            widget,
            source,
            looping: true,
            auto_start: true,
            width,
            height,
        }
    }

    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    pub fn auto_start(mut self, auto_start: bool) -> Self {
        self.auto_start = auto_start;
        self
    }

    /// Size in bytes of the ARGB8888 pixel buffer.
    pub fn pixel_buffer_len(&self) -> Result<usize> {
        (self.width as usize)
            .checked_mul(self.height as usize)
            .and_then(|pixels| pixels.checked_mul(4))
            .ok_or_else(|| {
                LottieError::InvalidConfig(format!(
                    "pixel buffer {}x{} overflows the address space",
                    self.width, self.height
                ))
            })
    }

    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(LottieError::InvalidConfig(format!(
                "pixel buffer must be non-empty, got {}x{}",
                self.width, self.height
            )));
        }
        if let AnimationSource::Embedded(data) = &self.source {
            if data.is_empty() {
                return Err(LottieError::InvalidConfig(
                    "embedded animation data is empty".to_string(),
                ));
            }
        }
        self.pixel_buffer_len().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = AppConfig::default();
        assert_eq!(config.playback.frame_delay_min_ms, 16);
        assert_eq!(config.playback.frame_delay_max_ms, 100);
        assert_eq!(config.playback.task_stack_size, 64 * 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parses_partial_json() {
        let config =
            AppConfig::from_json_str(r#"{ "playback": { "frame_delay_max_ms": 40 } }"#).unwrap();
        assert_eq!(config.playback.frame_delay_max_ms, 40);
        assert_eq!(config.playback.frame_delay_min_ms, 16);
        assert_eq!(config.memory, MemoryConfig::default());
    }

    #[test]
    fn rejects_inverted_delay_bounds() {
        let err = AppConfig::from_json_str(
            r#"{ "playback": { "frame_delay_min_ms": 50, "frame_delay_max_ms": 20 } }"#,
        )
        .unwrap_err();
        assert!(format!("{err}").contains("exceeds"));
    }

    #[test]
    fn source_requires_exactly_one_part() {
        let data: Arc<[u8]> = Arc::from(&b"{}"[..]);
        assert!(AnimationSource::from_parts(Some(data.clone()), None).is_ok());
        assert!(AnimationSource::from_parts(None, Some("/sd/a.json".into())).is_ok());
        assert!(AnimationSource::from_parts(Some(data), Some("/sd/a.json".into())).is_err());
        assert!(AnimationSource::from_parts(None, None).is_err());
    }

    #[test]
    fn rejects_empty_pixel_buffer() {
        let source = AnimationSource::File("/sd/a.json".into());
        let config = ResourceConfig::new(WidgetId::from_raw(0), source, 0, 10);
        assert!(config.validate().is_err());
    }

    #[test]
    fn pixel_buffer_is_four_bytes_per_pixel() {
        let source = AnimationSource::File("/sd/a.json".into());
        let config = ResourceConfig::new(WidgetId::from_raw(0), source, 64, 32);
        assert_eq!(config.pixel_buffer_len().unwrap(), 64 * 32 * 4);
    }
}

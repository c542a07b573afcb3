use crate::memory::MemoryRegion;

/// Result alias that carries the custom [`LottieError`] type.
pub type Result<T> = std::result::Result<T, LottieError>;

/// Common error type for the core crate.
///
/// An animation that cannot be played is not an error: the render task parks
/// itself instead (see [`crate::loader::Descriptor`]).
#[derive(Debug, thiserror::Error)]
pub enum LottieError {
    /// A region could not satisfy an allocation request.
    #[error("{region} allocation of {requested} bytes failed ({available} bytes available)")]
    Allocation {
        region: MemoryRegion,
        requested: usize,
        available: usize,
    },
    /// Alignment must be a non-zero power of two.
    #[error("alignment {0} is not a power of two")]
    InvalidAlignment(usize),
    /// Configuration rejected during validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// The resource id does not name a live animation resource.
    #[error("unknown animation resource {0}")]
    UnknownResource(u32),
    /// The widget id does not name a widget owned by the host.
    #[error("unknown widget {0}")]
    UnknownWidget(u32),
    /// The host refused to create the render thread.
    #[error("failed to spawn render task: {0}")]
    TaskSpawn(#[source] std::io::Error),
    /// A thread panicked while holding a shared lock.
    #[error("{0} has been poisoned")]
    Poisoned(&'static str),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Wrapper around JSON decoding errors.
    #[error("{0}")]
    Json(#[from] serde_json::Error),
}

impl LottieError {
    /// Returns `true` for errors that leave the resource retryable on the next
    /// load signal.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Allocation { .. } | Self::TaskSpawn(_) | Self::Io(_)
        )
    }
}

use const_default1::ConstDefault;

/// Decides which end of a split free block becomes the allocated part.
///
/// This only affects fragmentation. Either choice leaves a remainder of at
/// least [`MIN_BLOCK_SIZE`](crate::MIN_BLOCK_SIZE) bytes as a free block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Allocate from the low-address end; the remainder stays at the top.
    Low,
    /// Allocate from the high-address end; the remainder stays at the bottom.
    High,
    /// Allocate from the high-address end if the adjusted block size is at
    /// least the given number of bytes, from the low-address end otherwise.
    ///
    /// Keeping large and small blocks at opposite ends of a free block tends
    /// to keep small holes from splitting large free areas.
    HighFrom(usize),
}

impl Placement {
    #[inline]
    pub(crate) fn allocates_high(self, block_size: usize) -> bool {
        match self {
            Self::Low => false,
            Self::High => true,
            Self::HighFrom(threshold) => block_size >= threshold,
        }
    }
}

/// Tunable parameters of a [`SegFit`](crate::SegFit) heap.
///
/// # Examples
///
/// ```
/// use segfit::{Config, Placement};
///
/// let config = Config::DEFAULT
///     .with_chunk_size(1 << 16)
///     .with_placement(Placement::Low);
/// assert_eq!(config.initial_size, 64);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// The minimum number of bytes by which the heap is extended when no
    /// free block can satisfy a request.
    pub chunk_size: usize,
    /// The number of bytes of free space created by initialization.
    pub initial_size: usize,
    /// The split heuristic.
    pub placement: Placement,
}

impl Config {
    /// The default configuration.
    pub const DEFAULT: Self = Self {
        chunk_size: 1 << 12,
        initial_size: 1 << 6,
        placement: Placement::HighFrom(100),
    };

    /// Replace [`Self::chunk_size`].
    pub const fn with_chunk_size(self, chunk_size: usize) -> Self {
        Self { chunk_size, ..self }
    }

    /// Replace [`Self::initial_size`].
    pub const fn with_initial_size(self, initial_size: usize) -> Self {
        Self {
            initial_size,
            ..self
        }
    }

    /// Replace [`Self::placement`].
    pub const fn with_placement(self, placement: Placement) -> Self {
        Self { placement, ..self }
    }
}

impl ConstDefault for Config {
    const DEFAULT: Self = Self::DEFAULT;
}

impl Default for Config {
    fn default() -> Self {
        Self::DEFAULT
    }
}

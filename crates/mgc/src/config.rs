//! Configuration Module - GC Tuning Parameters
//!
//! Manages all configuration parameters for the major heap collector and the
//! allocation profiler. Sizes are expressed in words unless the name says
//! otherwise.

use crate::logging::GcLoggerConfig;

/// Words per page used when sizing chunks
pub const PAGE_WSZ: usize = 4096;

/// Smallest chunk the heap will ever add, in words
pub const HEAP_CHUNK_MIN_WSZ: usize = 15 * PAGE_WSZ;

/// Default size of the initial major heap, in words
pub const DEFAULT_INIT_HEAP_WSZ: usize = 64 * PAGE_WSZ;

/// Largest smoothing window accepted by the pacing ring
pub const MAX_MAJOR_WINDOW: usize = 50;

/// Main configuration for the major heap collector
///
/// # Examples
///
/// ```rust
/// use mgc::GcConfig;
///
/// // Use default configuration
/// let config = GcConfig::default();
///
/// // A tiny heap for tests
/// let config = GcConfig {
///     initial_heap_wsz: 1000,
///     heap_chunk_min_wsz: 1000,
///     percent_free: 50,
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct GcConfig {
    /// Size of the first heap chunk in words
    ///
    /// Clipped up to the heap increment and `heap_chunk_min_wsz`.
    /// Default: 64 pages (262144 words)
    pub initial_heap_wsz: usize,

    /// Minimum size of any chunk added to the heap, in words
    ///
    /// Default: 15 pages (61440 words)
    pub heap_chunk_min_wsz: usize,

    /// Heap increment
    ///
    /// Values up to 1000 are a percentage of the current heap size;
    /// larger values are an absolute word count.
    /// Default: 15 (%)
    pub major_heap_increment: usize,

    /// Space overhead target in percent
    ///
    /// Drives the pacing: the collector aims to keep this much free memory
    /// relative to live data at the start of a cycle.
    /// Default: 80
    pub percent_free: usize,

    /// Number of buckets in the pacing ring
    ///
    /// Must be between 1 and 50.
    /// Default: 1
    pub major_window: usize,

    /// Ceiling on the proportion of a cycle a single slice may perform
    ///
    /// Default: 0.3
    pub max_slice_proportion: f64,

    /// Share of a cycle's time budget spent marking
    ///
    /// The remainder is spent sweeping.
    /// Default: 0.4
    pub mark_time_share: f64,

    /// Initial capacity of the gray worklist, in entries
    ///
    /// Default: 2048
    pub gray_vals_initial: usize,

    /// Heap-to-worklist ratio above which the worklist stops growing
    ///
    /// The worklist doubles while its capacity is below `heap_wsz / ratio`.
    /// Default: 32
    pub gray_vals_heap_ratio: usize,

    /// Allocation profiler settings
    pub profiling: ProfilingConfig,

    /// Structured event log settings
    pub logger: GcLoggerConfig,

    /// Enable verbose logging of every slice
    ///
    /// Default: false
    pub verbose: bool,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            initial_heap_wsz: DEFAULT_INIT_HEAP_WSZ,
            heap_chunk_min_wsz: HEAP_CHUNK_MIN_WSZ,
            major_heap_increment: 15,
            percent_free: 80,
            major_window: 1,
            max_slice_proportion: 0.3,
            mark_time_share: 0.4,
            gray_vals_initial: 2048,
            gray_vals_heap_ratio: 32,
            profiling: ProfilingConfig::default(),
            logger: GcLoggerConfig::default(),
            verbose: false,
        }
    }
}

/// What the profinfo bits of a new header hold
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfinfoSource {
    /// An allocation-site identifier derived from the call-graph trie
    AllocationSite,
    /// The logical allocation clock, for lifetime sampling
    AllocationTime,
}

/// Allocation profiler configuration
#[derive(Debug, Clone)]
pub struct ProfilingConfig {
    /// Meaning of the profinfo bits
    ///
    /// Default: `AllocationSite`
    pub profinfo_source: ProfinfoSource,

    /// Right shift applied to the allocation clock before it is stored
    ///
    /// Default: 0
    pub lifetime_shift: u32,

    /// Lifetime histogram bounds
    pub lifetime: LifetimeConfig,
}

impl Default for ProfilingConfig {
    fn default() -> Self {
        Self {
            profinfo_source: ProfinfoSource::AllocationSite,
            lifetime_shift: 0,
            lifetime: LifetimeConfig::default(),
        }
    }
}

/// Lifetime histogram bounds
///
/// Lifetimes are measured in allocated bytes (the logical clock) and
/// bucketed on a log10 axis between `min_bytes` and `max_bytes`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LifetimeConfig {
    /// Smallest tracked lifetime. Default: 100
    pub min_bytes: u64,
    /// Largest tracked lifetime (exclusive). Default: 10^8
    pub max_bytes: u64,
    /// Number of histogram buckets. Default: 1000
    pub num_buckets: usize,
}

impl Default for LifetimeConfig {
    fn default() -> Self {
        Self {
            min_bytes: 100,
            max_bytes: 100_000_000,
            num_buckets: 1000,
        }
    }
}

impl LifetimeConfig {
    pub fn log10_min(&self) -> f64 {
        (self.min_bytes as f64).log10()
    }

    pub fn log10_max(&self) -> f64 {
        (self.max_bytes as f64).log10()
    }

    /// Width of one bucket on the log10 axis
    pub fn bucket_width(&self) -> f64 {
        (self.log10_max() - self.log10_min()) / self.num_buckets as f64
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_bytes == 0 || self.max_bytes < self.min_bytes {
            return Err(ConfigError::InvalidLifetimeRange {
                min_bytes: self.min_bytes,
                max_bytes: self.max_bytes,
            });
        }
        if self.num_buckets == 0 {
            return Err(ConfigError::InvalidBucketCount(self.num_buckets));
        }
        Ok(())
    }
}

impl GcConfig {
    /// Validate configuration
    ///
    /// Checks if all values are in valid ranges.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use mgc::GcConfig;
    ///
    /// let config = GcConfig {
    ///     percent_free: 0,  // Invalid!
    ///     ..Default::default()
    /// };
    ///
    /// assert!(config.validate().is_err());
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_heap_wsz == 0 || self.heap_chunk_min_wsz == 0 {
            return Err(ConfigError::InvalidHeapSize(
                "initial_heap_wsz and heap_chunk_min_wsz must be > 0".to_string(),
            ));
        }

        if self.major_heap_increment == 0 {
            return Err(ConfigError::InvalidHeapSize(
                "major_heap_increment must be > 0".to_string(),
            ));
        }

        if self.percent_free == 0 {
            return Err(ConfigError::InvalidPercentFree(
                "percent_free must be > 0".to_string(),
            ));
        }

        if self.major_window == 0 || self.major_window > MAX_MAJOR_WINDOW {
            return Err(ConfigError::InvalidWindow(self.major_window));
        }

        if !(self.max_slice_proportion > 0.0 && self.max_slice_proportion <= 1.0) {
            return Err(ConfigError::InvalidSliceProportion(self.max_slice_proportion));
        }

        if !(self.mark_time_share > 0.0 && self.mark_time_share < 1.0) {
            return Err(ConfigError::InvalidMarkShare(self.mark_time_share));
        }

        if self.gray_vals_initial < 2 || self.gray_vals_heap_ratio == 0 {
            return Err(ConfigError::InvalidGrayStack(
                "gray_vals_initial must be >= 2 and gray_vals_heap_ratio > 0".to_string(),
            ));
        }

        if self.profiling.lifetime_shift >= 64 {
            return Err(ConfigError::InvalidLifetimeShift(self.profiling.lifetime_shift));
        }

        self.profiling.lifetime.validate()
    }

    /// Build configuration from environment variables
    ///
    /// Overrides defaults with environment variables:
    /// - MGC_INIT_HEAP_WSZ
    /// - MGC_HEAP_INCREMENT
    /// - MGC_PERCENT_FREE
    /// - MGC_MAJOR_WINDOW
    /// - MGC_LIFETIME_MIN_BYTES
    /// - MGC_LIFETIME_MAX_BYTES
    /// - MGC_LIFETIME_NUM_BUCKETS
    /// - MGC_LIFETIME_SHIFT
    /// - MGC_VERBOSE
    ///
    /// # Examples
    ///
    /// ```bash
    /// export MGC_PERCENT_FREE=120
    /// export MGC_LIFETIME_MAX_BYTES=1000000000
    /// export MGC_VERBOSE=1
    /// ```
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(wsz) = env_parse::<usize>("MGC_INIT_HEAP_WSZ") {
            config.initial_heap_wsz = wsz;
        }

        if let Some(incr) = env_parse::<usize>("MGC_HEAP_INCREMENT") {
            config.major_heap_increment = incr;
        }

        if let Some(pf) = env_parse::<usize>("MGC_PERCENT_FREE") {
            config.percent_free = pf;
        }

        if let Some(window) = env_parse::<usize>("MGC_MAJOR_WINDOW") {
            config.major_window = window;
        }

        if let Some(bytes) = env_parse::<u64>("MGC_LIFETIME_MIN_BYTES") {
            config.profiling.lifetime.min_bytes = bytes;
        }

        if let Some(bytes) = env_parse::<u64>("MGC_LIFETIME_MAX_BYTES") {
            config.profiling.lifetime.max_bytes = bytes;
        }

        if let Some(n) = env_parse::<usize>("MGC_LIFETIME_NUM_BUCKETS") {
            config.profiling.lifetime.num_buckets = n;
        }

        if let Some(shift) = env_parse::<u32>("MGC_LIFETIME_SHIFT") {
            config.profiling.lifetime_shift = shift;
            config.profiling.profinfo_source = ProfinfoSource::AllocationTime;
        }

        if let Ok(val) = std::env::var("MGC_VERBOSE") {
            config.verbose = val == "1" || val.eq_ignore_ascii_case("true");
        }

        config
    }

    /// Word budget of a whole marking pass, excluding roots
    pub fn mark_work_factor(&self, heap_wsz: usize) -> f64 {
        heap_wsz as f64 * 100.0 / self.mark_time_share / (100 + self.percent_free) as f64
    }

    /// Word budget of a whole sweeping pass
    pub fn sweep_work_factor(&self, heap_wsz: usize) -> f64 {
        heap_wsz as f64 / (1.0 - self.mark_time_share)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|val| val.trim().parse().ok())
}

/// Error types for configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid heap size: {0}")]
    InvalidHeapSize(String),

    #[error("Invalid percent_free: {0}")]
    InvalidPercentFree(String),

    #[error("Invalid major window {0}: must be between 1 and 50")]
    InvalidWindow(usize),

    #[error("Invalid max slice proportion {0}: must be in (0, 1]")]
    InvalidSliceProportion(f64),

    #[error("Invalid mark time share {0}: must be in (0, 1)")]
    InvalidMarkShare(f64),

    #[error("Invalid gray worklist settings: {0}")]
    InvalidGrayStack(String),

    #[error("Invalid lifetime shift {0}")]
    InvalidLifetimeShift(u32),

    #[error("maximum lifetime must be greater than minimum ({min_bytes} > {max_bytes})")]
    InvalidLifetimeRange { min_bytes: u64, max_bytes: u64 },

    #[error("Invalid lifetime bucket count {0}")]
    InvalidBucketCount(usize),
}

impl ConfigError {
    /// Configuration errors the runtime cannot start with
    pub fn is_fatal(&self) -> bool {
        matches!(self, ConfigError::InvalidLifetimeRange { .. })
    }
}

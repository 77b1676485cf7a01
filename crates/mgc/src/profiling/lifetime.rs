//! Lifetime Histogram
//!
//! When headers carry allocation times, every block that dies is sampled:
//! its lifetime in allocated bytes goes on a log10 axis, its size on a log2
//! axis. Minor and major heap deaths are kept apart.

use crate::config::{ConfigError, LifetimeConfig};
use crate::object::Header;
use std::io::{self, Write};

/// Largest size class; bigger blocks are folded into it
pub const MAX_LOG2_OBJECT_SIZE: usize = 9;

const SIZE_CLASSES: usize = MAX_LOG2_OBJECT_SIZE + 1;

/// Counts of one lifetime bucket for one heap
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LifetimeBucket {
    pub words_by_size: [u64; SIZE_CLASSES],
    pub blocks_by_size: [u64; SIZE_CLASSES],
    pub total_words: u64,
    pub total_blocks: u64,
}

/// Size class of a block: `floor(log2(wosize))`, clamped
#[inline]
pub fn size_class(wosize: usize) -> usize {
    (wosize.checked_ilog2().unwrap_or(0) as usize).min(MAX_LOG2_OBJECT_SIZE)
}

#[derive(Debug, Clone)]
pub struct LifetimeHistogram {
    log10_min: f64,
    log10_max: f64,
    bucket_width: f64,
    minor: Vec<LifetimeBucket>,
    major: Vec<LifetimeBucket>,
    dropped: u64,
}

impl LifetimeHistogram {
    pub fn new(config: &LifetimeConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            log10_min: config.log10_min(),
            log10_max: config.log10_max(),
            bucket_width: config.bucket_width(),
            minor: vec![LifetimeBucket::default(); config.num_buckets],
            major: vec![LifetimeBucket::default(); config.num_buckets],
            dropped: 0,
        })
    }

    pub fn num_buckets(&self) -> usize {
        self.major.len()
    }

    /// Bucket of a lifetime, if it lies inside the tracked range
    pub fn bucket_index(&self, lifetime: u64) -> Option<usize> {
        let log10_lifetime = ((lifetime as f64) + 1.0).log10();
        if log10_lifetime < self.log10_min || log10_lifetime >= self.log10_max {
            return None;
        }
        let bucket = ((log10_lifetime - self.log10_min) / self.bucket_width) as usize;
        (bucket < self.num_buckets()).then_some(bucket)
    }

    /// Centre of a bucket in log10 units
    pub fn bucket_center(&self, bucket: usize) -> f64 {
        self.log10_min + self.bucket_width * bucket as f64 + self.bucket_width / 2.0
    }

    /// Sample the death of a block allocated at the time in its header
    ///
    /// Blocks without an allocation time, from the future, or outside the
    /// tracked range are dropped. Returns the bucket used.
    pub fn record(&mut self, hd: Header, in_major_heap: bool, now: u64) -> Option<usize> {
        let allocation_time = hd.profinfo();
        if allocation_time == 0 || now < allocation_time {
            self.dropped += 1;
            return None;
        }

        let Some(bucket) = self.bucket_index(now - allocation_time) else {
            self.dropped += 1;
            return None;
        };

        let wosize = hd.wosize();
        let class = size_class(wosize);
        let buckets = if in_major_heap {
            &mut self.major
        } else {
            &mut self.minor
        };
        let counts = &mut buckets[bucket];
        counts.blocks_by_size[class] += 1;
        counts.words_by_size[class] += wosize as u64;
        counts.total_blocks += 1;
        counts.total_words += wosize as u64;
        Some(bucket)
    }

    pub fn minor(&self, bucket: usize) -> Option<&LifetimeBucket> {
        self.minor.get(bucket)
    }

    pub fn major(&self, bucket: usize) -> Option<&LifetimeBucket> {
        self.major.get(bucket)
    }

    /// Samples rejected so far
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Write one line per non-empty bucket; returns the number of lines
    ///
    /// Columns: bucket centre, then block and word totals for the minor and
    /// major heaps, then for every size class its bounds and the same four
    /// counts.
    pub fn write_report<W: Write>(&self, out: &mut W) -> io::Result<usize> {
        let mut lines = 0;
        for (bucket, (minor, major)) in self.minor.iter().zip(&self.major).enumerate() {
            if minor.total_blocks == 0 && major.total_words == 0 {
                continue;
            }
            write!(
                out,
                "{} {} {} {} {}",
                format_g(self.bucket_center(bucket)),
                minor.total_blocks,
                minor.total_words,
                major.total_blocks,
                major.total_words
            )?;
            for class in 0..SIZE_CLASSES {
                write!(
                    out,
                    " {} {} {} {} {} {}",
                    1u64 << class,
                    (1u64 << (class + 1)) - 1,
                    minor.blocks_by_size[class],
                    minor.words_by_size[class],
                    major.blocks_by_size[class],
                    major.words_by_size[class]
                )?;
            }
            writeln!(out)?;
            lines += 1;
        }
        Ok(lines)
    }
}

/// Shortest rendering with six significant digits, as `printf("%g")` does
fn format_g(x: f64) -> String {
    if x == 0.0 {
        return "0".to_string();
    }
    if !x.is_finite() {
        return x.to_string();
    }

    let scientific = format!("{:.5e}", x);
    let Some((mantissa, exponent)) = scientific.split_once('e') else {
        return scientific;
    };
    let exponent: i32 = exponent.parse().unwrap_or(0);
    if !(-4..6).contains(&exponent) {
        let sign = if exponent < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", strip_zeros(mantissa), sign, exponent.abs())
    } else {
        strip_zeros(&format!("{:.*}", (5 - exponent) as usize, x))
    }
}

fn strip_zeros(s: &str) -> String {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Color;

    fn histogram() -> LifetimeHistogram {
        LifetimeHistogram::new(&LifetimeConfig::default()).unwrap()
    }

    fn born_at(time: u64, wosize: usize) -> Header {
        Header::make_with_profinfo(wosize, 0, Color::White, time)
    }

    #[test]
    fn test_bucket_of_ten_thousand_bytes() {
        let mut hist = histogram();
        // log10(10001) = 4.0000434; (4.0000434 - 2) / 0.006 = 333.3
        assert_eq!(hist.record(born_at(10, 3), true, 10_010), Some(333));
        let bucket = hist.major(333).unwrap();
        assert_eq!(bucket.total_blocks, 1);
        assert_eq!(bucket.total_words, 3);
        assert_eq!(bucket.blocks_by_size[1], 1);
    }

    #[test]
    fn test_dropped_samples() {
        let mut hist = histogram();
        assert_eq!(hist.record(born_at(0, 1), true, 500), None);
        assert_eq!(hist.record(born_at(900, 1), true, 500), None);
        // lifetime 10, below 100 bytes
        assert_eq!(hist.record(born_at(490, 1), false, 500), None);
        assert_eq!(hist.record(born_at(1, 1), false, 200_000_000), None);
        assert_eq!(hist.dropped(), 4);
    }

    #[test]
    fn test_size_classes() {
        assert_eq!(size_class(0), 0);
        assert_eq!(size_class(1), 0);
        assert_eq!(size_class(3), 1);
        assert_eq!(size_class(4), 2);
        assert_eq!(size_class(1023), 9);
        assert_eq!(size_class(1 << 20), MAX_LOG2_OBJECT_SIZE);
    }

    #[test]
    fn test_report_skips_empty_buckets() {
        let mut hist = histogram();
        hist.record(born_at(10, 3), true, 10_010);
        hist.record(born_at(10, 1), false, 10_010);

        let mut out = Vec::new();
        assert_eq!(hist.write_report(&mut out).unwrap(), 1);
        let text = String::from_utf8(out).unwrap();
        let fields: Vec<&str> = text.trim_end().split(' ').collect();
        assert_eq!(fields.len(), 5 + 6 * SIZE_CLASSES);
        assert_eq!(&fields[..5], &["4.001", "1", "1", "1", "3"]);
        assert_eq!(&fields[5..11], &["1", "1", "1", "1", "0", "0"]);
        assert_eq!(&fields[11..17], &["2", "3", "0", "0", "1", "3"]);
    }

    #[test]
    fn test_format_g() {
        assert_eq!(format_g(4.001), "4.001");
        assert_eq!(format_g(2.0), "2");
        assert_eq!(format_g(0.00012), "0.00012");
        assert_eq!(format_g(1234567.0), "1.23457e+06");
        assert_eq!(format_g(0.0), "0");
    }
}

//! Domain models - statistics records and sample math
//!
//! This module contains the canonical data types used throughout the pipeline:
//! - `Trip` - a reported unit-of-work completion
//! - `SecondBucket` - sorted response times grouped by wall-clock second
//! - `Stat` - per-second (or aggregated) statistics
//! - `ChartSeries` - the three downsampled chart tiers
//! - `sampling` - percentile, mean and sorted-merge helpers

pub mod bucket;
pub mod sampling;
pub mod stat;

// Re-export commonly used types at module level
pub use bucket::{SecondBucket, Trip};
pub use stat::{ChartSeries, CumulativeSnapshot, Stat};

//! IO modules - external outputs
//!
//! - `egress` - Stat stream output to file (JSONL format)

pub mod egress;

pub use egress::StatEgress;

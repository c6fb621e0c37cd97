//! Services - pipeline stages and session management
//!
//! - `ring_buffer` - Fixed-capacity overwrite-oldest buffer
//! - `trip_recorder` - Trip intake and per-second bucketing
//! - `stat_calculator` - Per-second Stat derivation
//! - `resolution_manager` - Three-tier chart downsampling
//! - `cumulative` - Session-lifetime running totals
//! - `session` - One pipeline instance per test run
//! - `runner` - Session registry

pub mod cumulative;
pub mod resolution_manager;
pub mod ring_buffer;
pub mod runner;
pub mod session;
pub mod stat_calculator;
pub mod trip_recorder;

pub use cumulative::CumulativeTracker;
pub use resolution_manager::ResolutionManager;
pub use ring_buffer::RingBuffer;
pub use runner::TestRunner;
pub use session::{Session, SessionSnapshot, SessionStatus};
pub use stat_calculator::{
    calculate_stat, create_stat_calculator, StatCalculator, StatCalculatorWorker,
};
pub use trip_recorder::{create_trip_recorder, TripRecorder, TripRecorderWorker};

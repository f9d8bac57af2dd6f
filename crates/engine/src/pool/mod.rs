//! Worker pools.
//!
//! - **homogeneous**: one operation over a manifest slice, split into
//!   interleaved strides across named scoped threads (or run serially)
//! - **fan-out**: one worker per named subtask
//!
//! Workers report through `std::sync::mpsc`; they never touch durable state.

pub mod fanout;
pub mod homogeneous;
pub mod messages;
pub mod stride;

pub use fanout::{FanOutPool, Subtask, SubtaskContext};
pub use homogeneous::{run_in_process, ItemProcessor, SliceOutcome, WorkerPool};
pub use messages::{ItemMessage, ItemRecord, SubtaskMessage, SubtaskReport};

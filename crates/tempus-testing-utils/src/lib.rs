//! Test helpers for scheduler crates
//!
//! This crate provides builder helpers with sensible defaults, a manually
//! driven clock and a set of probe jobs that record how they were executed.

pub mod builders;
pub mod clock;
pub mod jobs;

pub use builders::{job_detail, one_shot_trigger, repeating_trigger};
pub use clock::ManualClock;
pub use jobs::{BlockingJob, CountingJob, FailingJob, FireRecord, InterruptibleJob};

//! Worker pools executing dump jobs.

pub mod base;
pub mod executor;
pub mod job;
pub mod pool;
pub mod queue;
pub mod worker;

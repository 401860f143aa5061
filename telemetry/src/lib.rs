//! Logging setup shared by the dump engine, its tests and embedding binaries.

pub mod tracing;

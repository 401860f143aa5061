//! Configuration types and loading for the dump engine.
//!
//! The [`shared`] module holds the serde-deserializable run configuration, while [`load`]
//! implements the hierarchical `configuration/` + environment-variable loader.

pub mod environment;
pub mod load;
pub mod shared;

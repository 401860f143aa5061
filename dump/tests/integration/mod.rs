#![cfg(feature = "test-utils")]

mod common;
mod locking_test;
mod run_test;
mod shutdown_test;

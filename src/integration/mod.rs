//! Crate-level scenario tests and their fixtures

pub mod fixtures;

mod e2e;

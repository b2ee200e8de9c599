//! Core domain and application logic for the distributed job-queue
//! engine. Zero concrete infrastructure dependencies (ADR-001): every
//! seam to a backing store, clock, or id generator is a trait in
//! [`port`], implemented by a separate crate.

pub mod application;
pub mod domain;
pub mod error;
pub mod keys;
pub mod port;

#[cfg(feature = "test-util")]
pub mod test_support;

pub use error::{AppError, Result};

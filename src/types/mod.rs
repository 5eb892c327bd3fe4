//! Shared types for chronas-core

pub mod error;

pub use error::{ChronasError, Result};

//! Shared error definitions and small utilities used across all larkin crates.

pub mod error;
pub mod time;

pub use error::{Error, FromMessage, LarkinError, Result};

//! Core traits and types for the pipeweld library.
//!
//! This module contains the error types and the [`Stage`] abstraction that
//! every concurrent unit of pipeline work implements.

pub mod error;
pub mod traits;

// Re-export core items
pub use error::{Cancelled, Error, Result, SendError};
pub use traits::{ExitReason, Stage};

//! Common types shared across Stowage crates.
//!
//! This crate holds the error taxonomy every storage provider maps its
//! backend faults into, plus small helpers for working with storage
//! pointers (backend-agnostic locator strings).

pub mod error;
pub mod pointer;

pub use error::{Error, Result};

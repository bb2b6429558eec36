//! Core types and trait definitions for the WebSub subscriber.
//!
//! This crate is deliberately free of HTTP and database dependencies.
//! All other crates depend on it; it depends on nothing proprietary.

pub mod error;
pub mod store;
pub mod subscription;

pub use error::{Result, StoreError};

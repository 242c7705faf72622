//! LIVES Export Common Library
//!
//! Shared types, utilities, and error handling for the LIVES export service.
//!
//! # Overview
//!
//! This crate provides common functionality used across all workspace members:
//!
//! - **Error Handling**: Custom error types and result types
//! - **Logging**: Centralized tracing setup with console/file output
//! - **Types**: Shared domain types (`Locality`)
//!
//! # Example
//!
//! ```no_run
//! use lives_common::{Locality, Result};
//!
//! fn archive_name(raw: &str) -> Result<String> {
//!     let locality = Locality::new(raw);
//!     Ok(format!("{}.zip", locality.slug()))
//! }
//! ```

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{LivesError, Result};
pub use types::Locality;

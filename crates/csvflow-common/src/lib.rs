//! csvflow common library
//!
//! Shared types, error handling and logging for the csvflow workspace.
//!
//! - **descriptor**: [`FileDescriptor`], the parsed identity of a date-stamped
//!   object waiting in the upload bucket
//! - **error**: [`CommonError`] and the [`Result`] alias
//! - **logging**: tracing subscriber setup
//!
//! # Example
//!
//! ```
//! use csvflow_common::FileDescriptor;
//!
//! let file = FileDescriptor::parse("2024-01-02-sales-2.csv").unwrap();
//! assert_eq!(file.name, "sales");
//! assert_eq!(file.table_suffix(), "2-20240102");
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod descriptor;
pub mod error;
pub mod logging;

pub use descriptor::{day_prefix, parse_date, FileDescriptor};
pub use error::{CommonError, Result};

//! # Hawser Platform
//!
//! Shared error taxonomy and result types for the Hawser SSH session layer.
//!
//! This crate provides:
//! - The raw error type carrying boundary status codes ([`HawserError`],
//!   [`HawserResult`], [`ErrorKind`], [`code`])
//! - The caller-facing typed hierarchy ([`SshError`]) consumed by layers
//!   above the session core
//!
//! # Examples
//!
//! ```
//! use hawser_platform::{code, HawserError, ErrorKind};
//!
//! let err = HawserError::from_code(code::AUTH_FAILED, "password rejected");
//! assert_eq!(err.kind(), ErrorKind::Auth);
//! assert!(!err.is_fatal());
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod boundary;
pub mod error;

pub use boundary::SshError;
pub use error::{code, kind_of, ErrorKind, HawserError, HawserResult};

/// Platform version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! Roomwire observability
//!
//! Logging setup driven by the `logging` section of the roomwire config.

#![warn(missing_docs)]

pub mod error;
pub mod logging;

pub use error::{ObservabilityError, Result};
pub use logging::{build_filter, create_namespace_span, create_socket_span, LogManager};

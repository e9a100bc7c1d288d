//! Bastion Core - Foundation types and error handling
//!
//! This crate provides the core abstractions shared by every bastion crate:
//! - `Error`: The error taxonomy for rule lifecycle, configuration and change logging
//! - `Version`: Dotted version ordering
//! - `HostDescriptor`: What rules are evaluated against
//! - `Applicability`: Declarative predicate deciding whether a rule runs on a host
//! - `ConfigurationItem`: Typed, validated, user tunable rule options

pub mod applicability;
pub mod config_item;
pub mod error;
pub mod host;
pub mod version;

// Re-export commonly used types at crate root
pub use applicability::{Applicability, ListType, OsMatch, VersionSpec};
pub use config_item::{CiValue, ConfigurationItem, DataType};
pub use error::{Error, Result};
pub use host::{FismaLevel, HostDescriptor, OsFamily};
pub use version::Version;

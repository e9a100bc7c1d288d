//! Bastion Common - Shared utilities: configuration, rule settings, logging, checksums
//!
//! This crate provides common functionality used across all bastion crates.

pub mod config;
pub mod crypto;
pub mod logging;
pub mod rule_config;

pub use config::{Config, ConfigBuilder};
pub use logging::{init_logging_with_config, LogConfig, LogFormat};
pub use rule_config::{RuleConfigFile, RuleSection, SaveMode};

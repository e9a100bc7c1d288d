//! Bastion Rules - Rule contract, lifecycle, registry and orchestration
//!
//! This crate provides:
//! - `Rule`: The trait every compliance rule implements, with the shared
//!   report / fix / undo lifecycle
//! - `RuleContext`: Host, change log and system helpers handed to rules
//! - `RuleRegistry`: Index of all available rules
//! - `RuleController`: Runs a phase over the selected, applicable rules
//! - `builtin`: Generic reference rules

pub mod builtin;
pub mod context;
pub mod controller;
pub mod exec;
pub mod registry;
pub mod rule;
pub mod undo;

pub use context::RuleContext;
pub use controller::{PhaseSummary, RuleController, RuleResult, RuleStatus, Selection};
pub use exec::{CommandOutput, CommandRunner, PackageManager, ServiceManager};
pub use registry::RuleRegistry;
pub use rule::{Inspection, Phase, Remediation, Rule, RuleCore, RuleMetadata, RuleState};

//! Bastion Changelog - Durable record of reversible system mutations
//!
//! This crate provides:
//! - `StateChange` / `StateChangeEvent`: One recorded mutation and its undo data
//! - `EventStore`: Persistence backends for the event log
//! - `FileArchive`: Pre-change copies of files, verified by checksum on restore
//! - `StateChangeLogger`: The shared, thread-safe logger rules record through

pub mod archive;
pub mod event;
pub mod logger;
pub mod store;

pub use archive::{Backup, FileArchive};
pub use event::{EventId, FileState, PackageState, ServiceState, StateChange, StateChangeEvent};
pub use logger::StateChangeLogger;
pub use store::{EventLogData, EventStore, JsonEventStore, MemoryEventStore};

//! Event log persistence
//!
//! The whole log is one JSON document. Saves go through a temporary file
//! and a rename so a crash never leaves a half written log behind. The
//! per-rule sequence high-water marks are also kept in a small sidecar file
//! so ids stay unique even when the log itself has to be discarded.

use crate::event::StateChangeEvent;
use bastion_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Everything the change logger persists
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLogData {
    /// Recorded events in insertion order
    #[serde(default)]
    pub events: Vec<StateChangeEvent>,
    /// Highest sequence number ever handed out, per rule
    #[serde(default)]
    pub sequences: BTreeMap<u32, u32>,
}

/// Backend holding the event log between runs
pub trait EventStore: Send {
    /// Read the stored log, or an empty one if nothing is stored yet
    fn load(&mut self) -> Result<EventLogData>;

    /// Replace the stored log
    fn save(&mut self, data: &EventLogData) -> Result<()>;

    /// Where the log lives, for messages
    fn location(&self) -> String;
}

/// Store that keeps the log in memory only
#[derive(Debug, Default)]
pub struct MemoryEventStore {
    data: EventLogData,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventStore for MemoryEventStore {
    fn load(&mut self) -> Result<EventLogData> {
        Ok(self.data.clone())
    }

    fn save(&mut self, data: &EventLogData) -> Result<()> {
        self.data = data.clone();
        Ok(())
    }

    fn location(&self) -> String {
        String::from("memory")
    }
}

/// Store backed by a JSON file
#[derive(Debug, Clone)]
pub struct JsonEventStore {
    path: PathBuf,
}

impl JsonEventStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Default location in the state directory
    pub fn default_path() -> PathBuf {
        PathBuf::from("/var/lib/bastion/eventlog.json")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(suffix);
        PathBuf::from(name)
    }

    fn quarantine_path(&self) -> PathBuf {
        self.sibling(".old")
    }

    /// Sidecar holding the sequence high-water marks
    pub fn sequences_path(&self) -> PathBuf {
        self.sibling(".seq")
    }

    fn load_sequences(&self) -> BTreeMap<u32, u32> {
        let path = self.sequences_path();
        let Ok(content) = fs::read_to_string(&path) else {
            return BTreeMap::new();
        };
        serde_json::from_str(&content).unwrap_or_else(|e| {
            warn!("Sequence file {:?} is unreadable: {}", path, e);
            BTreeMap::new()
        })
    }
}

fn write_replacing(path: &Path, content: &str) -> Result<()> {
    let mut temp = path.as_os_str().to_owned();
    temp.push(".tmp");
    let temp = PathBuf::from(temp);
    fs::write(&temp, content)?;
    fs::rename(&temp, path)
        .map_err(|e| Error::Internal(format!("Failed to replace {:?}: {}", path, e)))
}

/// Keep the higher high-water mark of each rule
fn merge_sequences(into: &mut BTreeMap<u32, u32>, from: BTreeMap<u32, u32>) {
    for (rule, seq) in from {
        let slot = into.entry(rule).or_insert(0);
        *slot = (*slot).max(seq);
    }
}

impl EventStore for JsonEventStore {
    fn load(&mut self) -> Result<EventLogData> {
        let sequences = self.load_sequences();

        let mut data = if !self.path.exists() {
            debug!("No event log at {:?}, starting empty", self.path);
            EventLogData::default()
        } else {
            let content = fs::read_to_string(&self.path)?;
            match serde_json::from_str::<EventLogData>(&content) {
                Ok(data) => {
                    debug!(
                        "Loaded {} change events from {:?}",
                        data.events.len(),
                        self.path
                    );
                    data
                }
                Err(e) => {
                    let aside = self.quarantine_path();
                    warn!(
                        "Event log {:?} is unreadable ({}), moving it to {:?}",
                        self.path, e, aside
                    );
                    fs::rename(&self.path, &aside)?;
                    EventLogData::default()
                }
            }
        };

        merge_sequences(&mut data.sequences, sequences);
        Ok(data)
    }

    fn save(&mut self, data: &EventLogData) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        // Sequences first: a crash between the two writes may waste ids but
        // never hands one out twice.
        write_replacing(
            &self.sequences_path(),
            &serde_json::to_string(&data.sequences)?,
        )?;
        write_replacing(&self.path, &serde_json::to_string_pretty(data)?)
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

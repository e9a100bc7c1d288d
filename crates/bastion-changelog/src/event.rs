//! State change events
//!
//! Every atomic system mutation a rule performs is recorded as one event
//! carrying enough information to reverse it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Identifier of a recorded event, unique per rule and never reused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId {
    /// Number of the rule that recorded the event
    pub rule: u32,
    /// Per-rule sequence number, starting at 1
    pub seq: u32,
}

impl EventId {
    pub fn new(rule: u32, seq: u32) -> Self {
        Self { rule, seq }
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}{:03}", self.rule, self.seq)
    }
}

/// Ownership and permission bits of a file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileState {
    pub uid: u32,
    pub gid: u32,
    /// Permission bits only (`0o7777` mask)
    pub mode: u32,
}

impl FileState {
    pub fn new(uid: u32, gid: u32, mode: u32) -> Self {
        Self {
            uid,
            gid,
            mode: mode & 0o7777,
        }
    }

    /// Read the current state of a file
    #[cfg(unix)]
    pub fn of(path: &Path) -> std::io::Result<Self> {
        use std::os::unix::fs::MetadataExt;

        let meta = std::fs::metadata(path)?;
        Ok(Self::new(meta.uid(), meta.gid(), meta.mode()))
    }
}

impl fmt::Display for FileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} {:04o}", self.uid, self.gid, self.mode)
    }
}

/// Installation state of a package
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageState {
    Installed,
    Removed,
}

/// Boot-time state of a service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    Enabled,
    Disabled,
}

/// One reversible system mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "eventtype", rename_all = "lowercase")]
pub enum StateChange {
    /// Contents of an existing file were replaced
    #[serde(rename = "conf")]
    ConfEdit {
        path: PathBuf,
        /// Copy of the file before the change
        backup: Option<PathBuf>,
        /// SHA-256 of the backup
        checksum: Option<String>,
    },

    /// A file that did not exist was created
    Creation { path: PathBuf },

    /// A file was removed
    Deletion {
        path: PathBuf,
        backup: Option<PathBuf>,
        checksum: Option<String>,
    },

    /// Ownership or permission bits changed
    #[serde(rename = "perm")]
    PermChange {
        path: PathBuf,
        start: FileState,
        end: FileState,
    },

    /// Command run on undo to reverse an effect, as an argument vector
    #[serde(rename = "commandstring")]
    CommandString { command: Vec<String> },

    /// A package was installed or removed
    #[serde(rename = "pkghelper")]
    PackageChange {
        package: String,
        start: PackageState,
        end: PackageState,
    },

    /// A service was enabled or disabled
    #[serde(rename = "servicehelper")]
    ServiceChange {
        service: String,
        start: ServiceState,
        end: ServiceState,
    },
}

impl StateChange {
    /// A file edit whose backup is attached later
    pub fn conf_edit(path: impl Into<PathBuf>) -> Self {
        StateChange::ConfEdit {
            path: path.into(),
            backup: None,
            checksum: None,
        }
    }

    pub fn creation(path: impl Into<PathBuf>) -> Self {
        StateChange::Creation { path: path.into() }
    }

    pub fn perm_change(path: impl Into<PathBuf>, start: FileState, end: FileState) -> Self {
        StateChange::PermChange {
            path: path.into(),
            start,
            end,
        }
    }

    /// Inverse command, given as program and arguments
    pub fn command<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        StateChange::CommandString {
            command: argv.into_iter().map(Into::into).collect(),
        }
    }

    pub fn package(package: impl Into<String>, start: PackageState, end: PackageState) -> Self {
        StateChange::PackageChange {
            package: package.into(),
            start,
            end,
        }
    }

    pub fn service(service: impl Into<String>, start: ServiceState, end: ServiceState) -> Self {
        StateChange::ServiceChange {
            service: service.into(),
            start,
            end,
        }
    }

    /// Short tag used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            StateChange::ConfEdit { .. } => "conf",
            StateChange::Creation { .. } => "creation",
            StateChange::Deletion { .. } => "deletion",
            StateChange::PermChange { .. } => "perm",
            StateChange::CommandString { .. } => "commandstring",
            StateChange::PackageChange { .. } => "pkghelper",
            StateChange::ServiceChange { .. } => "servicehelper",
        }
    }

    /// File the change applies to, if any
    pub fn path(&self) -> Option<&Path> {
        match self {
            StateChange::ConfEdit { path, .. }
            | StateChange::Creation { path }
            | StateChange::Deletion { path, .. }
            | StateChange::PermChange { path, .. } => Some(path),
            _ => None,
        }
    }

    /// Backup file referenced by the change, if any
    pub fn backup(&self) -> Option<&Path> {
        match self {
            StateChange::ConfEdit { backup, .. } | StateChange::Deletion { backup, .. } => {
                backup.as_deref()
            }
            _ => None,
        }
    }
}

impl fmt::Display for StateChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateChange::ConfEdit { path, .. } => write!(f, "edited {}", path.display()),
            StateChange::Creation { path } => write!(f, "created {}", path.display()),
            StateChange::Deletion { path, .. } => write!(f, "deleted {}", path.display()),
            StateChange::PermChange { path, start, end } => {
                write!(f, "{} changed from {} to {}", path.display(), start, end)
            }
            StateChange::CommandString { command } => {
                write!(f, "undo command: {}", command.join(" "))
            }
            StateChange::PackageChange { package, end, .. } => match end {
                PackageState::Installed => write!(f, "installed package {}", package),
                PackageState::Removed => write!(f, "removed package {}", package),
            },
            StateChange::ServiceChange { service, end, .. } => match end {
                ServiceState::Enabled => write!(f, "enabled service {}", service),
                ServiceState::Disabled => write!(f, "disabled service {}", service),
            },
        }
    }
}

/// A recorded change, as persisted in the event log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChangeEvent {
    pub id: EventId,
    pub recorded_at: DateTime<Utc>,
    #[serde(flatten)]
    pub change: StateChange,
}

impl StateChangeEvent {
    pub fn new(id: EventId, change: StateChange) -> Self {
        Self {
            id,
            recorded_at: Utc::now(),
            change,
        }
    }

    /// Number of the rule that recorded the event
    pub fn rule_id(&self) -> u32 {
        self.id.rule
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_id_display() {
        assert_eq!(EventId::new(12, 1).to_string(), "0012001");
        assert_eq!(EventId::new(1234, 42).to_string(), "1234042");
    }

    #[test]
    fn test_event_id_ordering() {
        assert!(EventId::new(5, 2) > EventId::new(5, 1));
        assert!(EventId::new(6, 1) > EventId::new(5, 9));
    }

    #[test]
    fn test_serialized_tag() {
        let event = StateChangeEvent::new(
            EventId::new(7, 3),
            StateChange::package("telnet", PackageState::Installed, PackageState::Removed),
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["eventtype"], "pkghelper");
        assert_eq!(json["start"], "installed");
        assert_eq!(json["id"]["rule"], 7);

        let back: StateChangeEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
        assert_eq!(back.rule_id(), 7);
    }

    #[test]
    fn test_path_and_backup() {
        let change = StateChange::ConfEdit {
            path: PathBuf::from("/etc/example.conf"),
            backup: Some(PathBuf::from("/var/lib/bastion/archive/etc/example.conf.ovf")),
            checksum: None,
        };
        assert_eq!(change.kind(), "conf");
        assert_eq!(change.path(), Some(Path::new("/etc/example.conf")));
        assert!(change.backup().is_some());
        assert!(StateChange::command(["systemctl", "start", "sshd"])
            .path()
            .is_none());
    }

    #[test]
    fn test_file_state_masks_type_bits() {
        let state = FileState::new(0, 0, 0o100644);
        assert_eq!(state.mode, 0o644);
        assert_eq!(state.to_string(), "0:0 0644");
    }
}

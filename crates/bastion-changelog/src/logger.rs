//! The state change logger
//!
//! Rules record each mutation they make through a shared `StateChangeLogger`
//! and consult it again on undo, possibly in a later process. Access is
//! serialized by an internal mutex so the logger can be shared via `Arc`.

use crate::archive::{Backup, FileArchive};
use crate::event::{EventId, StateChange, StateChangeEvent};
use crate::store::{EventLogData, EventStore, JsonEventStore, MemoryEventStore};
use bastion_common::crypto::sha256_file;
use bastion_core::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

struct LogState {
    store: Box<dyn EventStore>,
    data: EventLogData,
}

impl LogState {
    fn persist(&mut self) -> Result<()> {
        self.store.save(&self.data)
    }
}

/// Durable, ordered record of system mutations
pub struct StateChangeLogger {
    state: Mutex<LogState>,
    archive: FileArchive,
    location: String,
}

impl StateChangeLogger {
    /// Open the JSON event log at `log_path`, keeping backups under `archive_dir`
    pub fn open(log_path: impl AsRef<Path>, archive_dir: impl Into<PathBuf>) -> Result<Self> {
        Self::with_store(Box::new(JsonEventStore::new(log_path)), archive_dir)
    }

    /// Logger whose events live only as long as the process
    pub fn in_memory(archive_dir: impl Into<PathBuf>) -> Self {
        Self {
            state: Mutex::new(LogState {
                store: Box::new(MemoryEventStore::new()),
                data: EventLogData::default(),
            }),
            archive: FileArchive::new(archive_dir),
            location: String::from("memory"),
        }
    }

    /// Logger over any store
    pub fn with_store(
        mut store: Box<dyn EventStore>,
        archive_dir: impl Into<PathBuf>,
    ) -> Result<Self> {
        let data = store.load()?;
        let location = store.location();
        info!(
            "Change log opened at {} with {} recorded events",
            location,
            data.events.len()
        );
        Ok(Self {
            state: Mutex::new(LogState { store, data }),
            archive: FileArchive::new(archive_dir),
            location,
        })
    }

    fn lock(&self) -> MutexGuard<'_, LogState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Where the event log is kept
    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn archive(&self) -> &FileArchive {
        &self.archive
    }

    /// Append an event for a rule and return its new id
    pub fn record_event(&self, rule: u32, change: StateChange) -> Result<EventId> {
        let mut state = self.lock();

        let seq = state.data.sequences.get(&rule).copied().unwrap_or(0) + 1;
        state.data.sequences.insert(rule, seq);
        let id = EventId::new(rule, seq);

        debug!("Recording change event {}: {}", id, change);
        state.data.events.push(StateChangeEvent::new(id, change));

        if let Err(e) = state.persist() {
            state.data.events.pop();
            warn!("Failed to persist change event {}: {}", id, e);
            return Err(e);
        }
        Ok(id)
    }

    /// Attach a backup copy of `original` to an existing file event
    pub fn record_file_change(&self, original: &Path, backup: &Path, id: EventId) -> Result<()> {
        let checksum = sha256_file(backup)?;
        let mut state = self.lock();

        let event = state
            .data
            .events
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| Error::EventNotFound {
                event_id: id.to_string(),
            })?;

        if event.change.path() != Some(original) {
            return Err(Error::Other(format!(
                "Event {} does not refer to {}",
                id,
                original.display()
            )));
        }

        match &mut event.change {
            StateChange::ConfEdit {
                backup: slot,
                checksum: sum,
                ..
            }
            | StateChange::Deletion {
                backup: slot,
                checksum: sum,
                ..
            } => {
                *slot = Some(backup.to_path_buf());
                *sum = Some(checksum);
            }
            other => {
                return Err(Error::Other(format!(
                    "Event {} is a {} event and carries no backup",
                    id,
                    other.kind()
                )))
            }
        }

        debug!("Attached backup {:?} to event {}", backup, id);
        state.persist()
    }

    /// Copy a file into the archive before it is changed
    pub fn archive_file(&self, path: &Path) -> Result<Option<Backup>> {
        self.archive.archive(path)
    }

    /// Record an upcoming edit of `path`. An existing file is archived and
    /// recorded as a "conf" event; a missing one as a "creation" event.
    pub fn record_file_edit(&self, rule: u32, path: &Path) -> Result<EventId> {
        match self.archive_file(path)? {
            Some(backup) => {
                let id = self.record_event(rule, StateChange::conf_edit(path))?;
                self.record_file_change(path, &backup.path, id)?;
                Ok(id)
            }
            None => self.record_event(rule, StateChange::creation(path)),
        }
    }

    /// Archive `path` and record its upcoming deletion
    pub fn record_file_deletion(&self, rule: u32, path: &Path) -> Result<EventId> {
        let backup = self.archive_file(path)?.ok_or_else(|| Error::FileNotFound {
            path: path.display().to_string(),
        })?;
        self.record_event(
            rule,
            StateChange::Deletion {
                path: path.to_path_buf(),
                backup: Some(backup.path),
                checksum: Some(backup.checksum),
            },
        )
    }

    /// Events recorded by a rule, oldest first
    pub fn find_events_for_rule(&self, rule: u32) -> Vec<StateChangeEvent> {
        self.lock()
            .data
            .events
            .iter()
            .filter(|e| e.rule_id() == rule)
            .cloned()
            .collect()
    }

    pub fn get_event(&self, id: EventId) -> Option<StateChangeEvent> {
        self.lock().data.events.iter().find(|e| e.id == id).cloned()
    }

    /// Every recorded event, oldest first
    pub fn events(&self) -> Vec<StateChangeEvent> {
        self.lock().data.events.clone()
    }

    /// Remove an event. Its backup file goes too once no other event refers
    /// to it. Returns false when no such event exists.
    pub fn delete_event(&self, id: EventId) -> Result<bool> {
        let mut state = self.lock();

        let Some(pos) = state.data.events.iter().position(|e| e.id == id) else {
            debug!("Change event {} not in log, nothing to delete", id);
            return Ok(false);
        };
        let removed = state.data.events.remove(pos);
        if let Err(e) = state.persist() {
            state.data.events.insert(pos, removed);
            warn!("Failed to persist deletion of change event {}: {}", id, e);
            return Err(e);
        }
        debug!("Deleted change event {}", id);

        if let Some(backup) = removed.change.backup() {
            let shared = state
                .data
                .events
                .iter()
                .any(|e| e.change.backup() == Some(backup));
            if !shared {
                if let Err(e) = self.archive.discard(backup) {
                    warn!("Failed to discard backup {:?}: {}", backup, e);
                }
            }
        }
        Ok(true)
    }

    /// Delete every event of a rule, returning how many were removed
    pub fn clear_rule_events(&self, rule: u32) -> Result<usize> {
        let ids: Vec<EventId> = self
            .find_events_for_rule(rule)
            .iter()
            .map(|e| e.id)
            .collect();

        let mut removed = 0;
        for id in ids {
            if self.delete_event(id)? {
                removed += 1;
            }
        }
        if removed > 0 {
            debug!("Cleared {} prior change events for rule {}", removed, rule);
        }
        Ok(removed)
    }

    /// Undo a "conf" event by restoring its backup, or a "creation" event by
    /// removing the created file
    pub fn revert_file_change(&self, event: &StateChangeEvent) -> Result<()> {
        match &event.change {
            StateChange::ConfEdit {
                path,
                backup,
                checksum,
            } => self.restore_backup(event.id, path, backup.as_deref(), checksum.as_deref()),
            StateChange::Creation { path } => match fs::remove_file(path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            },
            other => Err(Error::Reversal {
                event_id: event.id.to_string(),
                message: format!("{} event is not a file change", other.kind()),
            }),
        }
    }

    /// Undo a "deletion" event by restoring the archived copy
    pub fn revert_file_deletion(&self, event: &StateChangeEvent) -> Result<()> {
        match &event.change {
            StateChange::Deletion {
                path,
                backup,
                checksum,
            } => self.restore_backup(event.id, path, backup.as_deref(), checksum.as_deref()),
            other => Err(Error::Reversal {
                event_id: event.id.to_string(),
                message: format!("{} event is not a file deletion", other.kind()),
            }),
        }
    }

    fn restore_backup(
        &self,
        id: EventId,
        path: &Path,
        backup: Option<&Path>,
        checksum: Option<&str>,
    ) -> Result<()> {
        match (backup, checksum) {
            (Some(backup), Some(checksum)) => self.archive.restore(backup, checksum, path),
            _ => Err(Error::Reversal {
                event_id: id.to_string(),
                message: format!("no backup recorded for {}", path.display()),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{PackageState, ServiceState};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    /// Memory store whose saves can be made to fail
    struct FailingStore {
        inner: MemoryEventStore,
        failing: Arc<AtomicBool>,
    }

    impl EventStore for FailingStore {
        fn load(&mut self) -> Result<EventLogData> {
            self.inner.load()
        }

        fn save(&mut self, data: &EventLogData) -> Result<()> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(Error::Internal(String::from("disk full")));
            }
            self.inner.save(data)
        }

        fn location(&self) -> String {
            String::from("failing")
        }
    }

    fn logger(dir: &Path) -> StateChangeLogger {
        StateChangeLogger::open(dir.join("eventlog.json"), dir.join("archive")).unwrap()
    }

    #[test]
    fn test_ids_unique_across_rules_and_deletes() {
        let dir = tempfile::tempdir().unwrap();
        let log = logger(dir.path());
        let mut seen = HashSet::new();

        for rule in [1, 2, 1, 1, 2] {
            let id = log
                .record_event(rule, StateChange::command(["true"]))
                .unwrap();
            assert!(seen.insert(id));
        }
        log.clear_rule_events(1).unwrap();
        let id = log.record_event(1, StateChange::command(["true"])).unwrap();
        assert_eq!(id, EventId::new(1, 4));
        assert!(seen.insert(id));
    }

    #[test]
    fn test_sequences_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let log = logger(dir.path());
            let id = log
                .record_event(9, StateChange::service("cups", ServiceState::Enabled, ServiceState::Disabled))
                .unwrap();
            log.delete_event(id).unwrap();
        }
        let log = logger(dir.path());
        assert!(log.find_events_for_rule(9).is_empty());
        let id = log
            .record_event(9, StateChange::package("rsh", PackageState::Installed, PackageState::Removed))
            .unwrap();
        assert_eq!(id.seq, 2);
    }

    #[test]
    fn test_find_events_in_insertion_order() {
        let log = StateChangeLogger::in_memory("/nonexistent");
        let a = log.record_event(4, StateChange::command(["a"])).unwrap();
        log.record_event(5, StateChange::command(["x"])).unwrap();
        let b = log.record_event(4, StateChange::command(["b"])).unwrap();

        let ids: Vec<EventId> = log.find_events_for_rule(4).iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![a, b]);
        assert!(log.get_event(b).is_some());
        assert_eq!(log.events().len(), 3);
    }

    #[test]
    fn test_file_edit_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let log = logger(dir.path());
        let conf = dir.path().join("example.conf");
        fs::write(&conf, "foo=0\n").unwrap();

        let id = log.record_file_edit(10, &conf).unwrap();
        fs::write(&conf, "foo=1\n").unwrap();

        let event = log.get_event(id).unwrap();
        assert_eq!(event.change.kind(), "conf");
        let backup = event.change.backup().unwrap().to_path_buf();
        assert_eq!(fs::read_to_string(&backup).unwrap(), "foo=0\n");

        log.revert_file_change(&event).unwrap();
        assert_eq!(fs::read_to_string(&conf).unwrap(), "foo=0\n");

        assert!(log.delete_event(id).unwrap());
        assert!(!backup.exists());
        assert!(!log.delete_event(id).unwrap());
    }

    #[test]
    fn test_creation_reverted_by_removal() {
        let dir = tempfile::tempdir().unwrap();
        let log = logger(dir.path());
        let file = dir.path().join("new.conf");

        let id = log.record_file_edit(11, &file).unwrap();
        fs::write(&file, "created").unwrap();
        let event = log.get_event(id).unwrap();
        assert_eq!(event.change.kind(), "creation");

        log.revert_file_change(&event).unwrap();
        assert!(!file.exists());
    }

    #[test]
    fn test_deletion_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let log = logger(dir.path());
        let file = dir.path().join("hosts.equiv");
        fs::write(&file, "+ +\n").unwrap();

        let id = log.record_file_deletion(12, &file).unwrap();
        fs::remove_file(&file).unwrap();

        let event = log.get_event(id).unwrap();
        log.revert_file_deletion(&event).unwrap();
        assert_eq!(fs::read_to_string(&file).unwrap(), "+ +\n");
        assert!(log.revert_file_change(&event).is_err());
    }

    #[test]
    fn test_record_file_change_attaches_backup() {
        let dir = tempfile::tempdir().unwrap();
        let log = logger(dir.path());
        let conf = dir.path().join("login.defs");
        fs::write(&conf, "PASS_MAX_DAYS 99999\n").unwrap();

        let backup = log.archive_file(&conf).unwrap().unwrap();
        let id = log.record_event(13, StateChange::conf_edit(&conf)).unwrap();
        log.record_file_change(&conf, &backup.path, id).unwrap();

        match log.get_event(id).unwrap().change {
            StateChange::ConfEdit { checksum, .. } => assert_eq!(checksum, Some(backup.checksum)),
            other => panic!("unexpected change {:?}", other),
        }

        let missing = EventId::new(13, 99);
        let err = log.record_file_change(&conf, &backup.path, missing).unwrap_err();
        assert_eq!(err.code(), "EVENT_NOT_FOUND");
    }

    #[test]
    fn test_shared_backup_kept_until_last_reference() {
        let dir = tempfile::tempdir().unwrap();
        let log = logger(dir.path());
        let conf = dir.path().join("shared.conf");
        fs::write(&conf, "same").unwrap();

        let first = log.record_file_edit(14, &conf).unwrap();
        let second = log.record_file_edit(15, &conf).unwrap();
        let backup = log.get_event(first).unwrap().change.backup().unwrap().to_path_buf();

        log.delete_event(first).unwrap();
        assert!(backup.exists());
        log.delete_event(second).unwrap();
        assert!(!backup.exists());
    }

    #[test]
    fn test_concurrent_recording() {
        let log = Arc::new(StateChangeLogger::in_memory("/nonexistent"));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let log = Arc::clone(&log);
                std::thread::spawn(move || {
                    (0..25)
                        .map(|_| log.record_event(t % 2, StateChange::command(["true"])).unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id));
            }
        }
        assert_eq!(seen.len(), 100);
    }

    #[test]
    fn test_failed_delete_keeps_event() {
        let dir = tempfile::tempdir().unwrap();
        let failing = Arc::new(AtomicBool::new(false));
        let store = FailingStore {
            inner: MemoryEventStore::new(),
            failing: Arc::clone(&failing),
        };
        let log = StateChangeLogger::with_store(Box::new(store), dir.path().join("archive")).unwrap();

        let conf = dir.path().join("sshd_config");
        fs::write(&conf, "PermitRootLogin yes\n").unwrap();
        let id = log.record_file_edit(16, &conf).unwrap();
        let backup = log.get_event(id).unwrap().change.backup().unwrap().to_path_buf();

        failing.store(true, Ordering::SeqCst);
        assert!(log.delete_event(id).is_err());
        assert!(log.clear_rule_events(16).is_err());
        assert_eq!(log.find_events_for_rule(16).len(), 1);
        assert!(backup.exists());

        failing.store(false, Ordering::SeqCst);
        assert!(log.delete_event(id).unwrap());
        assert!(log.events().is_empty());
        assert!(!backup.exists());
    }

    #[test]
    fn test_ids_not_reused_after_corrupt_log() {
        let dir = tempfile::tempdir().unwrap();
        let first = logger(dir.path())
            .record_event(7, StateChange::command(["true"]))
            .unwrap();

        fs::write(dir.path().join("eventlog.json"), "{ truncated").unwrap();

        let log = logger(dir.path());
        assert!(log.events().is_empty());
        let second = log.record_event(7, StateChange::command(["true"])).unwrap();
        assert_ne!(first, second);
        assert_eq!(second, EventId::new(7, 2));
    }
}

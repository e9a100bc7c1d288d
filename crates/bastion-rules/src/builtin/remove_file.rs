//! Ensure a file does not exist

use crate::context::RuleContext;
use crate::rule::{Inspection, Remediation, Rule, RuleCore, RuleMetadata};
use bastion_core::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Removes a file, keeping an archived copy for undo
pub struct RemoveFileRule {
    core: RuleCore,
    path: PathBuf,
}

impl RemoveFileRule {
    /// Enable item `<NAME>` (bool)
    pub fn new(meta: RuleMetadata, path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let enable_item = meta.name.to_uppercase();

        let mut core = RuleCore::new(meta);
        core.add_enable_item(
            &enable_item,
            format!(
                "To prevent this rule from removing {}, set {} to False.",
                path.display(),
                enable_item
            ),
            true,
        )?;

        Ok(Self { core, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Rule for RemoveFileRule {
    fn core(&self) -> &RuleCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut RuleCore {
        &mut self.core
    }

    fn inspect(&mut self, _ctx: &RuleContext) -> Result<Inspection> {
        if self.path.symlink_metadata().is_ok() {
            Ok(Inspection::non_compliant(format!(
                "{} exists",
                self.path.display()
            )))
        } else {
            Ok(Inspection::compliant())
        }
    }

    fn remediate(&mut self, ctx: &RuleContext) -> Result<Remediation> {
        let mut remediation = Remediation::new();
        if !self.path.is_file() {
            if self.path.symlink_metadata().is_ok() {
                remediation.fail(format!(
                    "{} is not a regular file, leaving it in place",
                    self.path.display()
                ));
            }
            return Ok(remediation);
        }

        let Some(id) = remediation.step(
            "Archiving file",
            ctx.changes.record_file_deletion(self.number(), &self.path),
        ) else {
            return Ok(remediation);
        };

        debug!("Removing {:?}", self.path);
        let removed = fs::remove_file(&self.path).map_err(Error::from);
        if remediation
            .step(&format!("Removing {}", self.path.display()), removed)
            .is_some()
        {
            remediation.note(format!("Removed {} (event {})", self.path.display(), id));
        } else if let Err(e) = ctx.changes.delete_event(id) {
            remediation.fail(e.to_string());
        }

        Ok(remediation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bastion_changelog::StateChangeLogger;
    use bastion_core::{HostDescriptor, OsFamily};
    use std::sync::Arc;

    #[test]
    fn test_remove_and_restore() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hosts.equiv");
        fs::write(&path, "+ +\n").unwrap();

        let host = HostDescriptor::new(OsFamily::Linux, "Rocky Linux", "9.4", 0);
        let ctx = RuleContext::new(
            host,
            Arc::new(StateChangeLogger::in_memory(dir.path().join("archive"))),
        );
        let mut rule = RemoveFileRule::new(RuleMetadata::new(40, "RemoveHostsEquiv"), &path).unwrap();

        assert!(!rule.report(&ctx));
        assert!(rule.fix(&ctx));
        assert!(!path.exists());
        assert!(rule.report(&ctx));

        assert!(rule.undo(&ctx));
        assert_eq!(fs::read_to_string(&path).unwrap(), "+ +\n");
        assert!(!rule.report(&ctx));
    }

    #[test]
    fn test_directory_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let host = HostDescriptor::new(OsFamily::Linux, "Rocky Linux", "9.4", 0);
        let ctx = RuleContext::new(
            host,
            Arc::new(StateChangeLogger::in_memory(dir.path().join("archive"))),
        );
        let mut rule =
            RemoveFileRule::new(RuleMetadata::new(41, "RemoveDir"), dir.path()).unwrap();

        assert!(!rule.fix(&ctx));
        assert!(dir.path().exists());
    }
}

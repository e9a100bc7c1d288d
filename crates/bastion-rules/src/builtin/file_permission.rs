//! Ensure a file is no more permissive than a maximum mode

use crate::context::RuleContext;
use crate::rule::{Inspection, Remediation, Rule, RuleCore, RuleMetadata};
use bastion_changelog::{FileState, StateChange};
use bastion_core::{ConfigurationItem, DataType, Error, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Strips permission bits beyond a maximum mode from a file.
/// A missing file is compliant.
pub struct FilePermissionRule {
    core: RuleCore,
    path: PathBuf,
    mode_item: String,
}

impl FilePermissionRule {
    /// Enable item `<NAME>` (bool) and mode item `<NAME>_MODE` (octal string)
    pub fn new(meta: RuleMetadata, path: impl Into<PathBuf>, max_mode: u32) -> Result<Self> {
        let path = path.into();
        let enable_item = meta.name.to_uppercase();
        let mode_item = format!("{}_MODE", enable_item);

        let mut core = RuleCore::new(meta);
        core.add_enable_item(
            &enable_item,
            format!(
                "To prevent this rule from changing permissions of {}, set {} to False.",
                path.display(),
                enable_item
            ),
            true,
        )?;
        core.add_item(
            ConfigurationItem::new(
                DataType::String,
                &mode_item,
                format!("Most permissive octal mode allowed for {}.", path.display()),
                format!("{:04o}", max_mode & 0o7777),
            )?
            .with_regex("[0-7]{3,4}$")?,
        )?;

        Ok(Self {
            core,
            path,
            mode_item,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn max_mode(&self) -> Result<u32> {
        let text = self
            .core
            .string_value(&self.mode_item)
            .ok_or_else(|| Error::config(&self.mode_item, "no string value"))?;
        u32::from_str_radix(text, 8)
            .map_err(|e| Error::config(&self.mode_item, format!("'{}' is not octal: {}", text, e)))
    }
}

/// Permission bits present in `mode` but not allowed by `max`
fn excess(mode: u32, max: u32) -> u32 {
    mode & !max & 0o7777
}

impl Rule for FilePermissionRule {
    fn core(&self) -> &RuleCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut RuleCore {
        &mut self.core
    }

    fn inspect(&mut self, _ctx: &RuleContext) -> Result<Inspection> {
        let max = self.max_mode()?;
        if !self.path.exists() {
            return Ok(Inspection::compliant()
                .with_detail(format!("{} does not exist", self.path.display())));
        }

        let state = FileState::of(&self.path)?;
        if excess(state.mode, max) == 0 {
            Ok(Inspection::compliant())
        } else {
            Ok(Inspection::non_compliant(format!(
                "File {} has mode {:04o}, which is more permissive than {:04o}",
                self.path.display(),
                state.mode,
                max
            )))
        }
    }

    fn remediate(&mut self, ctx: &RuleContext) -> Result<Remediation> {
        let max = self.max_mode()?;
        let mut remediation = Remediation::new();
        if !self.path.exists() {
            return Ok(remediation);
        }

        let start = FileState::of(&self.path)?;
        if excess(start.mode, max) == 0 {
            return Ok(remediation);
        }
        let end = FileState::new(start.uid, start.gid, start.mode & max);

        let Some(id) = remediation.step(
            "Recording change",
            ctx.changes.record_event(
                self.number(),
                StateChange::perm_change(&self.path, start, end),
            ),
        ) else {
            return Ok(remediation);
        };

        debug!("chmod {:04o} {:?}", end.mode, self.path);
        let changed = set_mode(&self.path, end.mode);
        if remediation
            .step(&format!("Changing mode of {}", self.path.display()), changed)
            .is_some()
        {
            remediation.note(format!(
                "Changed mode of {} from {:04o} to {:04o} (event {})",
                self.path.display(),
                start.mode,
                end.mode,
                id
            ));
        } else if let Err(e) = ctx.changes.delete_event(id) {
            remediation.fail(e.to_string());
        }

        Ok(remediation)
    }
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_mode(path: &Path, _mode: u32) -> Result<()> {
    Err(Error::Other(format!(
        "Cannot change mode of {} on this platform",
        path.display()
    )))
}

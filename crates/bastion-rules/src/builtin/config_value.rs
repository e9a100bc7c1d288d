//! Ensure `KEY<sep>VALUE` in a configuration file

use crate::context::RuleContext;
use crate::rule::{Inspection, Remediation, Rule, RuleCore, RuleMetadata};
use bastion_core::{ConfigurationItem, DataType, Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Keeps one key of a `key<sep>value` style file at a desired value.
///
/// Comment lines (`#` or `;`) are ignored and the first occurrence of the
/// key is authoritative. A whitespace separator matches any run of
/// whitespace, as in `sshd_config` or `login.defs`.
pub struct ConfigValueRule {
    core: RuleCore,
    path: PathBuf,
    key: String,
    separator: String,
    value_item: String,
}

impl ConfigValueRule {
    /// Enable item `<NAME>` (bool) and value item `<NAME>_VALUE` (string)
    pub fn new(
        meta: RuleMetadata,
        path: impl Into<PathBuf>,
        key: impl Into<String>,
        separator: impl Into<String>,
        value: &str,
    ) -> Result<Self> {
        let path = path.into();
        let key = key.into();
        let enable_item = meta.name.to_uppercase();
        let value_item = format!("{}_VALUE", enable_item);

        let mut core = RuleCore::new(meta);
        core.add_enable_item(
            &enable_item,
            format!(
                "To prevent this rule from setting {} in {}, set {} to False.",
                key,
                path.display(),
                enable_item
            ),
            true,
        )?;
        core.add_item(ConfigurationItem::new(
            DataType::String,
            &value_item,
            format!("Value {} should have in {}.", key, path.display()),
            value,
        )?)?;

        Ok(Self {
            core,
            path,
            key,
            separator: separator.into(),
            value_item,
        })
    }

    /// Restrict the value item to a fixed set
    pub fn with_allowed_values(mut self, values: &[&str]) -> Result<Self> {
        let allowed = values.iter().map(|v| (*v).into()).collect();
        let item = self
            .core
            .item(&self.value_item)
            .cloned()
            .ok_or_else(|| Error::Internal(format!("{} missing", self.value_item)))?
            .with_valid_values(allowed)?;
        if let Some(slot) = self.core.item_mut(&self.value_item) {
            *slot = item;
        }
        Ok(self)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn desired(&self) -> Result<String> {
        self.core
            .string_value(&self.value_item)
            .map(String::from)
            .ok_or_else(|| Error::config(&self.value_item, "no string value"))
    }

    fn whitespace_separated(&self) -> bool {
        self.separator.trim().is_empty()
    }

    /// Split a line into key and value when it assigns our key
    fn assignment<'a>(&self, line: &'a str) -> Option<&'a str> {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
            return None;
        }
        let (k, v) = if self.whitespace_separated() {
            trimmed.split_once(char::is_whitespace)?
        } else {
            trimmed.split_once(self.separator.as_str())?
        };
        (k.trim() == self.key).then(|| v.trim())
    }

    fn current(&self, content: &str) -> Option<String> {
        content
            .lines()
            .find_map(|line| self.assignment(line))
            .map(String::from)
    }

    fn rewrite(&self, content: &str, value: &str) -> String {
        let wanted = format!("{}{}{}", self.key, self.separator, value);
        let mut replaced = false;
        let mut lines: Vec<String> = Vec::new();

        for line in content.lines() {
            if !replaced && self.assignment(line).is_some() {
                lines.push(wanted.clone());
                replaced = true;
            } else {
                lines.push(line.to_string());
            }
        }
        if !replaced {
            lines.push(wanted);
        }

        let mut out = lines.join("\n");
        out.push('\n');
        out
    }
}

impl Rule for ConfigValueRule {
    fn core(&self) -> &RuleCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut RuleCore {
        &mut self.core
    }

    fn inspect(&mut self, _ctx: &RuleContext) -> Result<Inspection> {
        let desired = self.desired()?;

        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Inspection::non_compliant(format!(
                    "{} does not exist",
                    self.path.display()
                )))
            }
            Err(e) => return Err(e.into()),
        };

        Ok(match self.current(&content) {
            Some(actual) if actual == desired => Inspection::compliant(),
            Some(actual) => Inspection::non_compliant(format!(
                "{} is set to '{}' in {}, expected '{}'",
                self.key,
                actual,
                self.path.display(),
                desired
            )),
            None => Inspection::non_compliant(format!(
                "{} not found in {}",
                self.key,
                self.path.display()
            )),
        })
    }

    fn remediate(&mut self, ctx: &RuleContext) -> Result<Remediation> {
        let desired = self.desired()?;
        let mut remediation = Remediation::new();

        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };
        if self.current(&content).as_deref() == Some(desired.as_str()) {
            remediation.note(format!("{} already set", self.key));
            return Ok(remediation);
        }

        let Some(id) = remediation.step(
            "Recording change",
            ctx.changes.record_file_edit(self.number(), &self.path),
        ) else {
            return Ok(remediation);
        };

        debug!("Setting {} to {} in {:?}", self.key, desired, self.path);
        // A failed write keeps the event so undo can restore a partial write.
        let written = fs::write(&self.path, self.rewrite(&content, &desired));
        if remediation
            .step(&format!("Writing {}", self.path.display()), written.map_err(Error::from))
            .is_some()
        {
            remediation.note(format!("Set {} to {} (event {})", self.key, desired, id));
        }

        Ok(remediation)
    }
}

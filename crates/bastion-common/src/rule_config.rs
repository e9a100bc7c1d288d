//! Persisted rule configuration items
//!
//! One TOML table per rule name holding `KEY = value` for each configuration
//! item, plus an optional `KEY_UserComments = "..."` note:
//!
//! ```toml
//! [SecureSSH]
//! SECURESSH = true
//! SECURESSH_UserComments = "Required by the 2024 audit"
//! ```

use bastion_core::{CiValue, ConfigurationItem, Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, warn};

/// Suffix of the key holding a configuration item's user comment
pub const USER_COMMENT_SUFFIX: &str = "_UserComments";

/// Settings of one rule, keyed by configuration item key
pub type RuleSection = BTreeMap<String, CiValue>;

/// Which configuration items get written on save
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SaveMode {
    /// Items flagged simple, items changed from their default and user comments
    #[default]
    Simple,
    /// Every item
    Full,
}

impl FromStr for SaveMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "simple" => Ok(SaveMode::Simple),
            "full" => Ok(SaveMode::Full),
            other => Err(Error::Configuration(format!(
                "Unknown save mode '{}', expected simple or full",
                other
            ))),
        }
    }
}

/// `{rule name: {ci key: value}}`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleConfigFile {
    rules: BTreeMap<String, RuleSection>,
}

impl RuleConfigFile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing `{rule: {ci: value}}` map
    pub fn from_map(rules: BTreeMap<String, RuleSection>) -> Self {
        Self { rules }
    }

    /// Borrow the underlying `{rule: {ci: value}}` map
    pub fn as_map(&self) -> &BTreeMap<String, RuleSection> {
        &self.rules
    }

    /// Load from a TOML file. A missing file yields an empty configuration.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!("Rule config {:?} not found, using rule defaults", path);
            return Ok(Self::new());
        }
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("Failed to read rule config {:?}: {}", path, e))
        })?;
        Self::from_toml(&content)
    }

    /// Parse from a TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| Error::Configuration(format!("Failed to parse rule config: {}", e)))
    }

    /// Render as a TOML string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| Error::Configuration(format!("Failed to render rule config: {}", e)))
    }

    /// Write to a TOML file, creating parent directories
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, self.to_toml()?)?;
        debug!("Saved rule config to {:?}", path);
        Ok(())
    }

    /// Names of all rules with a section
    pub fn rule_names(&self) -> impl Iterator<Item = &str> {
        self.rules.keys().map(|k| k.as_str())
    }

    fn section(&self, rule: &str) -> Option<&RuleSection> {
        self.rules.get(rule).or_else(|| {
            self.rules
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(rule))
                .map(|(_, section)| section)
        })
    }

    /// Look up a value, falling back to a case-insensitive key match
    pub fn get(&self, rule: &str, key: &str) -> Option<&CiValue> {
        let section = self.section(rule)?;
        section.get(key).or_else(|| {
            section
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(key))
                .map(|(_, v)| v)
        })
    }

    /// User comment recorded for a configuration item
    pub fn user_comment(&self, rule: &str, key: &str) -> Option<&str> {
        self.get(rule, &format!("{}{}", key, USER_COMMENT_SUFFIX))
            .and_then(|v| v.as_str())
    }

    pub fn set(&mut self, rule: &str, key: &str, value: CiValue) {
        self.rules
            .entry(rule.to_string())
            .or_default()
            .insert(key.to_string(), value);
    }

    pub fn set_user_comment(&mut self, rule: &str, key: &str, comment: &str) {
        self.set(
            rule,
            &format!("{}{}", key, USER_COMMENT_SUFFIX),
            CiValue::String(comment.to_string()),
        );
    }

    /// Apply persisted values to a rule's configuration items.
    /// Returns the keys whose persisted value was rejected; those items keep
    /// their previous value.
    pub fn apply_to(&self, rule: &str, items: &mut [ConfigurationItem]) -> Vec<String> {
        let mut rejected = Vec::new();

        for item in items.iter_mut() {
            if let Some(value) = self.get(rule, item.key()) {
                if !item.apply_persisted(value) {
                    warn!(
                        "Rule {}: persisted value '{}' for {} rejected, keeping {}",
                        rule,
                        value,
                        item.key(),
                        item.current_value()
                    );
                    rejected.push(item.key().to_string());
                }
            }
            if let Some(comment) = self.user_comment(rule, item.key()) {
                item.set_user_comment(comment);
            }
        }

        rejected
    }

    /// Record a rule's configuration items for saving
    pub fn record_items(&mut self, rule: &str, items: &[ConfigurationItem], mode: SaveMode) {
        for item in items {
            let wanted = match mode {
                SaveMode::Full => true,
                SaveMode::Simple => item.is_simple() || !item.is_default(),
            };
            if wanted {
                self.set(rule, item.key(), item.current_value().clone());
            }
            if !item.user_comment().is_empty() {
                self.set_user_comment(rule, item.key(), item.user_comment());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bastion_core::DataType;

    fn items() -> Vec<ConfigurationItem> {
        vec![
            ConfigurationItem::new(DataType::Bool, "SECURESSH", "Enable", true)
                .unwrap()
                .in_simple(),
            ConfigurationItem::new(DataType::Int, "SSH_TIMEOUT", "Idle timeout", 900i64).unwrap(),
            ConfigurationItem::new(DataType::List, "SSH_CIPHERS", "Ciphers", Vec::<String>::new())
                .unwrap(),
        ]
    }

    #[test]
    fn test_parse_and_apply() {
        let content = r#"
            [SecureSSH]
            securessh = "no"
            SSH_TIMEOUT = 300
            SSH_CIPHERS = "aes256-ctr aes128-ctr"
            SECURESSH_UserComments = "Handled by config management"
        "#;
        let file = RuleConfigFile::from_toml(content).unwrap();
        let mut items = items();
        let rejected = file.apply_to("SecureSSH", &mut items);

        assert!(rejected.is_empty());
        assert_eq!(items[0].current_value(), &CiValue::Bool(false));
        assert_eq!(items[0].user_comment(), "Handled by config management");
        assert_eq!(items[1].current_value(), &CiValue::Int(300));
        assert_eq!(
            items[2].current_value(),
            &CiValue::List(vec!["aes256-ctr".into(), "aes128-ctr".into()])
        );
    }

    #[test]
    fn test_rejected_value_keeps_default() {
        let file = RuleConfigFile::from_toml("[SecureSSH]\nSSH_TIMEOUT = \"forever\"\n").unwrap();
        let mut items = items();
        let rejected = file.apply_to("securessh", &mut items);
        assert_eq!(rejected, vec![String::from("SSH_TIMEOUT")]);
        assert_eq!(items[1].current_value(), &CiValue::Int(900));
    }

    #[test]
    fn test_simple_and_full_save() {
        let mut items = items();
        assert!(items[1].set_current_value(600i64));
        items[2].set_user_comment("defaults are fine");

        let mut simple = RuleConfigFile::new();
        simple.record_items("SecureSSH", &items, SaveMode::Simple);
        assert!(simple.get("SecureSSH", "SECURESSH").is_some());
        assert_eq!(simple.get("SecureSSH", "SSH_TIMEOUT"), Some(&CiValue::Int(600)));
        assert!(simple.get("SecureSSH", "SSH_CIPHERS").is_none());
        assert_eq!(
            simple.user_comment("SecureSSH", "SSH_CIPHERS"),
            Some("defaults are fine")
        );

        let mut full = RuleConfigFile::new();
        full.record_items("SecureSSH", &items, SaveMode::Full);
        assert_eq!(
            full.get("SecureSSH", "SSH_CIPHERS"),
            Some(&CiValue::List(vec![]))
        );
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("etc").join("rules.toml");

        let mut file = RuleConfigFile::new();
        file.record_items("SecureSSH", &items(), SaveMode::Full);
        file.save(&path).unwrap();

        let loaded = RuleConfigFile::load(&path).unwrap();
        assert_eq!(loaded, file);
        assert_eq!(loaded.rule_names().collect::<Vec<_>>(), vec!["SecureSSH"]);
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let file = RuleConfigFile::load(dir.path().join("absent.toml")).unwrap();
        assert!(file.as_map().is_empty());
    }

    #[test]
    fn test_save_mode_parse() {
        assert_eq!("FULL".parse::<SaveMode>().unwrap(), SaveMode::Full);
        assert!("verbose".parse::<SaveMode>().is_err());
    }
}

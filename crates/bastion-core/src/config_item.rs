//! Configuration items - typed, validated, user tunable rule options

use crate::error::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Data type of a configuration item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Bool,
    String,
    Int,
    Float,
    /// List of strings
    List,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Bool => "bool",
            DataType::String => "string",
            DataType::Int => "int",
            DataType::Float => "float",
            DataType::List => "list",
        }
    }
}

impl FromStr for DataType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "bool" => Ok(DataType::Bool),
            "string" => Ok(DataType::String),
            "int" => Ok(DataType::Int),
            "float" => Ok(DataType::Float),
            "list" => Ok(DataType::List),
            other => Err(Error::config(
                "datatype",
                format!(
                    "unsupported datatype '{}', expected bool, string, int, float or list",
                    other
                ),
            )),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Value held by a configuration item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CiValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<String>),
}

impl CiValue {
    /// The data type this value naturally belongs to
    pub fn datatype(&self) -> DataType {
        match self {
            CiValue::Bool(_) => DataType::Bool,
            CiValue::Int(_) => DataType::Int,
            CiValue::Float(_) => DataType::Float,
            CiValue::String(_) => DataType::String,
            CiValue::List(_) => DataType::List,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            CiValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            CiValue::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            CiValue::Float(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            CiValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            CiValue::List(items) => Some(items),
            _ => None,
        }
    }
}

impl fmt::Display for CiValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CiValue::Bool(b) => write!(f, "{}", b),
            CiValue::Int(n) => write!(f, "{}", n),
            CiValue::Float(n) => write!(f, "{}", n),
            CiValue::String(s) => write!(f, "{}", s),
            CiValue::List(items) => write!(f, "{}", items.join(" ")),
        }
    }
}

impl From<bool> for CiValue {
    fn from(b: bool) -> Self {
        CiValue::Bool(b)
    }
}

impl From<i64> for CiValue {
    fn from(n: i64) -> Self {
        CiValue::Int(n)
    }
}

impl From<f64> for CiValue {
    fn from(n: f64) -> Self {
        CiValue::Float(n)
    }
}

impl From<&str> for CiValue {
    fn from(s: &str) -> Self {
        CiValue::String(s.to_string())
    }
}

impl From<String> for CiValue {
    fn from(s: String) -> Self {
        CiValue::String(s)
    }
}

impl From<Vec<String>> for CiValue {
    fn from(items: Vec<String>) -> Self {
        CiValue::List(items)
    }
}

/// A single named option owned by a rule.
///
/// The current value always satisfies the declared data type, the optional
/// regex (string values and every list element) and the optional set of
/// allowed values. Rejected assignments leave the item untouched.
#[derive(Debug, Clone)]
pub struct ConfigurationItem {
    key: String,
    datatype: DataType,
    default: CiValue,
    current: CiValue,
    instructions: String,
    user_comment: String,
    simple: bool,
    delimiter: String,
    valid_values: Option<Vec<CiValue>>,
    regex: Option<(String, Regex)>,
}

impl ConfigurationItem {
    /// Create an item whose current value is the default
    pub fn new(
        datatype: DataType,
        key: impl Into<String>,
        instructions: impl Into<String>,
        default: impl Into<CiValue>,
    ) -> Result<Self> {
        let key = key.into();
        if key.trim().is_empty() {
            return Err(Error::config(key, "key must not be empty"));
        }

        let default = default.into();
        let mut item = Self {
            key,
            datatype,
            current: default.clone(),
            default,
            instructions: instructions.into(),
            user_comment: String::new(),
            simple: false,
            delimiter: String::from(" "),
            valid_values: None,
            regex: None,
        };

        let default = item.default.clone();
        item.check(&default)?;
        Ok(item)
    }

    /// Create an item from a datatype name such as "bool" or "list"
    pub fn init(
        datatype: &str,
        key: impl Into<String>,
        instructions: impl Into<String>,
        default: impl Into<CiValue>,
    ) -> Result<Self> {
        Self::new(datatype.parse()?, key, instructions, default)
    }

    /// Restrict values to a regular expression, matched from the start of the value
    pub fn with_regex(mut self, pattern: &str) -> Result<Self> {
        self.set_regex_pattern(pattern)?;
        Ok(self)
    }

    /// Restrict values to a fixed set (every list element must be a member)
    pub fn with_valid_values(mut self, values: Vec<CiValue>) -> Result<Self> {
        if self.datatype == DataType::Bool {
            return Err(Error::config(
                &self.key,
                "a valid value set makes no sense for a bool",
            ));
        }
        let member_type = match self.datatype {
            DataType::List => DataType::String,
            other => other,
        };
        if let Some(bad) = values.iter().find(|v| v.datatype() != member_type) {
            return Err(Error::config(
                &self.key,
                format!("valid value {} is not a {}", bad, member_type),
            ));
        }

        let previous = self.valid_values.replace(values);
        let default = self.default.clone();
        if let Err(e) = self.check(&default) {
            self.valid_values = previous;
            return Err(e);
        }
        Ok(self)
    }

    /// Delimiter used when a list is given as a single string
    pub fn with_delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.delimiter = delimiter.into();
        self
    }

    /// Show this item in the simple configuration file
    pub fn in_simple(mut self) -> Self {
        self.simple = true;
        self
    }

    /// Set the validation pattern. Only string and list items accept one,
    /// and the default value must still validate.
    pub fn set_regex_pattern(&mut self, pattern: &str) -> Result<()> {
        if !matches!(self.datatype, DataType::String | DataType::List) {
            return Err(Error::config(
                &self.key,
                format!("a regex pattern makes no sense for a {}", self.datatype),
            ));
        }
        let compiled = Regex::new(&format!("^(?:{})", pattern))
            .map_err(|e| Error::config(&self.key, format!("invalid regex: {}", e)))?;

        let previous = self.regex.replace((pattern.to_string(), compiled));
        let default = self.default.clone();
        if let Err(e) = self.check(&default) {
            self.regex = previous;
            return Err(e);
        }
        Ok(())
    }

    /// Validate without assigning
    pub fn validate(&self, value: &CiValue) -> bool {
        self.check(value).is_ok()
    }

    fn check(&self, value: &CiValue) -> Result<()> {
        if value.datatype() != self.datatype {
            return Err(Error::config(
                &self.key,
                format!("expected a {}, got a {}", self.datatype, value.datatype()),
            ));
        }

        if let Some((pattern, re)) = &self.regex {
            let texts: Vec<&str> = match value {
                CiValue::String(s) => vec![s.as_str()],
                CiValue::List(items) => items.iter().map(|s| s.as_str()).collect(),
                _ => Vec::new(),
            };
            if let Some(bad) = texts.iter().find(|t| !re.is_match(t)) {
                return Err(Error::config(
                    &self.key,
                    format!("'{}' does not match pattern '{}'", bad, pattern),
                ));
            }
        }

        if let Some(allowed) = &self.valid_values {
            let ok = match value {
                CiValue::List(items) => items
                    .iter()
                    .all(|item| allowed.contains(&CiValue::String(item.clone()))),
                single => allowed.contains(single),
            };
            if !ok {
                return Err(Error::config(
                    &self.key,
                    format!("{} is not one of the allowed values", value),
                ));
            }
        }

        Ok(())
    }

    /// Assign a value of the declared type, reporting why it was rejected
    pub fn try_set(&mut self, value: impl Into<CiValue>) -> Result<()> {
        let value = value.into();
        self.check(&value)?;
        self.current = value;
        Ok(())
    }

    /// Assign a value of the declared type. Returns false and keeps the
    /// previous value when the value is rejected.
    pub fn set_current_value(&mut self, value: impl Into<CiValue>) -> bool {
        self.try_set(value).is_ok()
    }

    /// Assign from text as found in a configuration file, coercing it to
    /// the declared type first
    pub fn update_from_str(&mut self, text: &str) -> bool {
        match self.coerce(text) {
            Some(value) => self.set_current_value(value),
            None => false,
        }
    }

    /// Assign a persisted value, coercing strings and integers where the
    /// declared type asks for it
    pub fn apply_persisted(&mut self, value: &CiValue) -> bool {
        match (self.datatype, value) {
            (DataType::String, _) | (_, CiValue::Bool(_)) | (_, CiValue::List(_)) => {
                self.set_current_value(value.clone())
            }
            (_, CiValue::String(text)) => self.update_from_str(text),
            (DataType::Float, CiValue::Int(n)) => self.set_current_value(*n as f64),
            _ => self.set_current_value(value.clone()),
        }
    }

    fn coerce(&self, text: &str) -> Option<CiValue> {
        let text = text.trim();
        match self.datatype {
            DataType::Bool => match text.to_lowercase().as_str() {
                "yes" | "true" => Some(CiValue::Bool(true)),
                "no" | "false" => Some(CiValue::Bool(false)),
                _ => None,
            },
            DataType::Int => text.parse().ok().map(CiValue::Int),
            DataType::Float => text.parse().ok().map(CiValue::Float),
            DataType::String => Some(CiValue::String(text.to_string())),
            DataType::List => {
                let items = if self.delimiter.trim().is_empty() {
                    text.split_whitespace().map(String::from).collect()
                } else {
                    text.split(self.delimiter.as_str())
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                };
                Some(CiValue::List(items))
            }
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn datatype(&self) -> DataType {
        self.datatype
    }

    pub fn current_value(&self) -> &CiValue {
        &self.current
    }

    pub fn default_value(&self) -> &CiValue {
        &self.default
    }

    pub fn instructions(&self) -> &str {
        &self.instructions
    }

    pub fn regex_pattern(&self) -> Option<&str> {
        self.regex.as_ref().map(|(pattern, _)| pattern.as_str())
    }

    pub fn user_comment(&self) -> &str {
        &self.user_comment
    }

    pub fn set_user_comment(&mut self, comment: impl Into<String>) {
        self.user_comment = comment.into();
    }

    pub fn is_simple(&self) -> bool {
        self.simple
    }

    /// True when the current value equals the default
    pub fn is_default(&self) -> bool {
        self.current == self.default
    }

    /// Current value as a bool (false for non-bool items)
    pub fn enabled(&self) -> bool {
        self.current.as_bool().unwrap_or(false)
    }
}

//! Dotted version ordering
//!
//! Versions are split into numeric and alphabetic components and compared
//! component by component, so `10.10` sorts after `10.9` and `10.9.0` sorts
//! after `10.9`. Separators (`.`, `-`, `_`, `+`, ...) only delimit components.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// One component of a version string
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum Component {
    Number(u64),
    Text(String),
}

/// An operating system version such as `10.11.5` or `7.9.2009`
#[derive(Debug, Clone, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Version {
    raw: String,
    #[serde(skip)]
    components: Vec<Component>,
}

impl Version {
    /// Parse a version string. Parsing never fails; unknown text becomes a
    /// textual component that sorts after every number.
    pub fn parse(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let components = split_components(&raw);
        Self { raw, components }
    }

    /// The version exactly as it was given
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// True when the string contained no components at all
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}

fn split_components(raw: &str) -> Vec<Component> {
    let mut components = Vec::new();
    let mut chars = raw.trim().chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_ascii_digit() {
            let mut digits = String::new();
            while let Some(&d) = chars.peek() {
                if !d.is_ascii_digit() {
                    break;
                }
                digits.push(d);
                chars.next();
            }
            match digits.parse::<u64>() {
                Ok(n) => components.push(Component::Number(n)),
                Err(_) => components.push(Component::Text(digits)),
            }
        } else if c.is_alphabetic() {
            let mut text = String::new();
            while let Some(&a) = chars.peek() {
                if !a.is_alphabetic() {
                    break;
                }
                text.push(a);
                chars.next();
            }
            components.push(Component::Text(text));
        } else {
            chars.next();
        }
    }

    components
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.components == other.components
    }
}

impl std::hash::Hash for Version {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.components.hash(state);
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.components.cmp(&other.components)
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl From<String> for Version {
    fn from(raw: String) -> Self {
        Version::parse(raw)
    }
}

impl From<&str> for Version {
    fn from(raw: &str) -> Self {
        Version::parse(raw)
    }
}

impl From<Version> for String {
    fn from(version: Version) -> Self {
        version.raw
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

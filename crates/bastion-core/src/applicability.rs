//! Applicability descriptors - which hosts a rule runs on
//!
//! A descriptor is either a whitelist (only matching hosts) or a blacklist
//! (every host except matching ones). Matching is done in two passes that
//! each may set the verdict: first the OS family list, then the OS type /
//! version entries. A pass only writes the verdict when it matches, and the
//! last matching pass wins. After that, `noroot` excludes hosts running as
//! uid 0 and `fisma` excludes hosts whose risk category is below the rule's.

use crate::error::{Error, Result};
use crate::host::{FismaLevel, HostDescriptor, OsFamily};
use crate::version::Version;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Whether matches include or exclude a host
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListType {
    White,
    #[default]
    Black,
}

/// Version constraint attached to an OS type pattern
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub enum VersionSpec {
    /// `[X, '+']`: X or newer
    AtLeast(Version),
    /// `[X, '-']`: X or older
    AtMost(Version),
    /// `[X, 'r', Y]`: inclusive range, endpoints ordered on construction
    Range { low: Version, high: Version },
    /// Plain list of exact versions
    Exact(Vec<Version>),
}

impl VersionSpec {
    pub fn at_least(version: impl Into<Version>) -> Self {
        VersionSpec::AtLeast(version.into())
    }

    pub fn at_most(version: impl Into<Version>) -> Self {
        VersionSpec::AtMost(version.into())
    }

    /// Inclusive range. The endpoints may be given in either order but must differ.
    pub fn range(a: impl Into<Version>, b: impl Into<Version>) -> Result<Self> {
        let (a, b) = (a.into(), b.into());
        match a.cmp(&b) {
            std::cmp::Ordering::Less => Ok(VersionSpec::Range { low: a, high: b }),
            std::cmp::Ordering::Greater => Ok(VersionSpec::Range { low: b, high: a }),
            std::cmp::Ordering::Equal => Err(Error::InvalidVersionRange(format!(
                "range versions are the same: {} and {}",
                a, b
            ))),
        }
    }

    /// Parse the token list form: `["10.9", "+"]`, `["-", "10.8"]`,
    /// `["10.9", "r", "10.11"]` or `["6.0", "6.1"]`
    pub fn parse<S: AsRef<str>>(tokens: &[S]) -> Result<Self> {
        let tokens: Vec<&str> = tokens.iter().map(|t| t.as_ref().trim()).collect();

        if tokens.is_empty() {
            return Err(Error::InvalidVersionRange("empty version list".into()));
        }

        let bound = |marker: &str| -> Result<Version> {
            if tokens.len() != 2 {
                return Err(Error::InvalidVersionRange(format!(
                    "'{}' takes exactly one version, got {:?}",
                    marker, tokens
                )));
            }
            let version = if tokens[1] == marker { tokens[0] } else { tokens[1] };
            if version == "+" || version == "-" || version == "r" {
                return Err(Error::InvalidVersionRange(format!(
                    "missing version next to '{}'",
                    marker
                )));
            }
            Ok(Version::parse(version))
        };

        if tokens.contains(&"+") {
            return Ok(VersionSpec::AtLeast(bound("+")?));
        }
        if tokens.contains(&"-") {
            return Ok(VersionSpec::AtMost(bound("-")?));
        }
        if tokens.contains(&"r") {
            if tokens.len() != 3 || tokens[1] != "r" {
                return Err(Error::InvalidVersionRange(format!(
                    "a range needs the form [low, 'r', high], got {:?}",
                    tokens
                )));
            }
            return VersionSpec::range(tokens[0], tokens[2]);
        }

        Ok(VersionSpec::Exact(
            tokens.into_iter().map(Version::parse).collect(),
        ))
    }

    /// Does the version satisfy this constraint
    pub fn contains(&self, version: &Version) -> bool {
        match self {
            VersionSpec::AtLeast(base) => version >= base,
            VersionSpec::AtMost(base) => version <= base,
            VersionSpec::Range { low, high } => version >= low && version <= high,
            VersionSpec::Exact(versions) => versions.iter().any(|v| v == version),
        }
    }

    /// Token list form, the inverse of `parse`
    pub fn to_tokens(&self) -> Vec<String> {
        match self {
            VersionSpec::AtLeast(v) => vec![v.to_string(), "+".into()],
            VersionSpec::AtMost(v) => vec![v.to_string(), "-".into()],
            VersionSpec::Range { low, high } => {
                vec![low.to_string(), "r".into(), high.to_string()]
            }
            VersionSpec::Exact(versions) => versions.iter().map(|v| v.to_string()).collect(),
        }
    }
}

impl TryFrom<Vec<String>> for VersionSpec {
    type Error = Error;

    fn try_from(tokens: Vec<String>) -> Result<Self> {
        VersionSpec::parse(&tokens)
    }
}

impl From<VersionSpec> for Vec<String> {
    fn from(spec: VersionSpec) -> Self {
        spec.to_tokens()
    }
}

/// An OS type pattern (regex searched in the host OS type) and its versions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsMatch {
    pub pattern: String,
    pub versions: VersionSpec,
}

/// Declarative description of the hosts a rule applies to
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Applicability {
    #[serde(default, rename = "type")]
    pub list_type: ListType,
    #[serde(default)]
    pub family: Vec<OsFamily>,
    #[serde(default)]
    pub os: Vec<OsMatch>,
    #[serde(default)]
    pub noroot: bool,
    #[serde(default)]
    pub fisma: Option<FismaLevel>,
}

impl Applicability {
    /// Blacklist with no entries: applies everywhere
    pub fn everywhere() -> Self {
        Self::default()
    }

    /// Empty whitelist, to be filled with `with_family` / `with_os`
    pub fn whitelist() -> Self {
        Self {
            list_type: ListType::White,
            ..Self::default()
        }
    }

    /// Empty blacklist, to be filled with `with_family` / `with_os`
    pub fn blacklist() -> Self {
        Self {
            list_type: ListType::Black,
            ..Self::default()
        }
    }

    pub fn with_family(mut self, family: OsFamily) -> Self {
        self.family.push(family);
        self
    }

    pub fn with_os(mut self, pattern: impl Into<String>, versions: VersionSpec) -> Self {
        self.os.push(OsMatch {
            pattern: pattern.into(),
            versions,
        });
        self
    }

    pub fn noroot(mut self) -> Self {
        self.noroot = true;
        self
    }

    pub fn with_fisma(mut self, level: FismaLevel) -> Self {
        self.fisma = Some(level);
        self
    }

    /// Check that every OS pattern is a valid regular expression
    pub fn validate(&self) -> Result<()> {
        for entry in &self.os {
            Regex::new(&entry.pattern).map_err(|e| {
                Error::Applicability(format!("bad os pattern '{}': {}", entry.pattern, e))
            })?;
        }
        Ok(())
    }

    /// Decide whether the host is covered by this descriptor
    pub fn evaluate(&self, host: &HostDescriptor) -> Result<bool> {
        let matched = self.list_type == ListType::White;
        let mut applies = !matched;

        if self.family.contains(&host.os_family) {
            applies = matched;
            debug!("Family match on {}, applies: {}", host.os_family, applies);
        }

        for entry in &self.os {
            let re = Regex::new(&entry.pattern).map_err(|e| {
                Error::Applicability(format!("bad os pattern '{}': {}", entry.pattern, e))
            })?;
            if re.is_match(&host.os_type) && entry.versions.contains(&host.os_version) {
                applies = matched;
                debug!(
                    "OS match on '{}' {}, applies: {}",
                    entry.pattern, host.os_version, applies
                );
            }
        }

        if applies && self.noroot && host.is_root() {
            applies = false;
        }

        if applies {
            if let Some(level) = self.fisma {
                if host.fisma < level {
                    applies = false;
                }
            }
        }

        Ok(applies)
    }

    /// Like `evaluate`, but a malformed descriptor excludes the host
    pub fn applies_to(&self, host: &HostDescriptor) -> bool {
        match self.evaluate(host) {
            Ok(applies) => applies,
            Err(e) => {
                warn!("Treating rule as not applicable: {}", e);
                false
            }
        }
    }
}

/// Free-standing form of `Applicability::evaluate`
pub fn evaluate(descriptor: &Applicability, host: &HostDescriptor) -> Result<bool> {
    descriptor.evaluate(host)
}

//! Description of the host rules are evaluated against

use crate::version::Version;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Operating system family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OsFamily {
    Linux,
    Darwin,
    Solaris,
    FreeBsd,
    Unknown,
}

impl OsFamily {
    /// Detect the family of the running system
    pub fn current() -> Self {
        #[cfg(target_os = "linux")]
        return OsFamily::Linux;

        #[cfg(target_os = "macos")]
        return OsFamily::Darwin;

        #[cfg(any(target_os = "solaris", target_os = "illumos"))]
        return OsFamily::Solaris;

        #[cfg(target_os = "freebsd")]
        return OsFamily::FreeBsd;

        #[cfg(not(any(
            target_os = "linux",
            target_os = "macos",
            target_os = "solaris",
            target_os = "illumos",
            target_os = "freebsd"
        )))]
        return OsFamily::Unknown;
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OsFamily::Linux => "linux",
            OsFamily::Darwin => "darwin",
            OsFamily::Solaris => "solaris",
            OsFamily::FreeBsd => "freebsd",
            OsFamily::Unknown => "unknown",
        }
    }
}

impl fmt::Display for OsFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// FIPS 199 risk category of the host
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FismaLevel {
    #[default]
    Low,
    #[serde(alias = "medium")]
    Med,
    High,
}

impl FismaLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            FismaLevel::Low => "low",
            FismaLevel::Med => "med",
            FismaLevel::High => "high",
        }
    }
}

impl fmt::Display for FismaLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Everything applicability evaluation needs to know about the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostDescriptor {
    /// OS family (linux, darwin, ...)
    pub os_family: OsFamily,
    /// Detailed OS type, e.g. "Red Hat Enterprise Linux" or "Mac OS X"
    pub os_type: String,
    /// OS version
    pub os_version: Version,
    /// Effective user id of this process
    pub euid: u32,
    /// Host risk category
    #[serde(default)]
    pub fisma: FismaLevel,
}

impl HostDescriptor {
    /// Create a descriptor from explicit values
    pub fn new(
        os_family: OsFamily,
        os_type: impl Into<String>,
        os_version: impl Into<Version>,
        euid: u32,
    ) -> Self {
        Self {
            os_family,
            os_type: os_type.into(),
            os_version: os_version.into(),
            euid,
            fisma: FismaLevel::default(),
        }
    }

    /// Set the risk category
    pub fn with_fisma(mut self, fisma: FismaLevel) -> Self {
        self.fisma = fisma;
        self
    }

    /// Describe the running system
    pub fn detect() -> Self {
        let (os_type, os_version) = detect_os_release();
        Self {
            os_family: OsFamily::current(),
            os_type,
            os_version: Version::parse(os_version),
            euid: effective_uid(),
            fisma: FismaLevel::default(),
        }
    }

    /// True when running with an effective uid of 0
    pub fn is_root(&self) -> bool {
        self.euid == 0
    }

    /// One-line description for logs and reports
    pub fn summary(&self) -> String {
        format!(
            "{} {} ({}, euid {})",
            self.os_type, self.os_version, self.os_family, self.euid
        )
    }
}

/// Effective uid of the current process
#[cfg(unix)]
pub fn effective_uid() -> u32 {
    // SAFETY: geteuid has no preconditions and cannot fail
    unsafe { libc::geteuid() }
}

#[cfg(not(unix))]
pub fn effective_uid() -> u32 {
    u32::MAX
}

#[cfg(target_os = "macos")]
fn detect_os_release() -> (String, String) {
    use std::process::Command;

    let field = |flag: &str| {
        Command::new("/usr/bin/sw_vers")
            .arg(flag)
            .output()
            .ok()
            .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string())
            .filter(|s| !s.is_empty())
    };

    (
        field("-productName").unwrap_or_else(|| "Mac OS X".into()),
        field("-productVersion").unwrap_or_else(|| "unknown".into()),
    )
}

#[cfg(not(target_os = "macos"))]
fn detect_os_release() -> (String, String) {
    std::fs::read_to_string("/etc/os-release")
        .map(|content| parse_os_release(&content))
        .unwrap_or_else(|_| (std::env::consts::OS.to_string(), "unknown".into()))
}

/// Extract NAME and VERSION_ID from os-release content
pub fn parse_os_release(content: &str) -> (String, String) {
    let mut name = String::new();
    let mut version = String::new();

    for line in content.lines() {
        if let Some(n) = line.strip_prefix("NAME=") {
            name = n.trim_matches('"').to_string();
        } else if let Some(v) = line.strip_prefix("VERSION_ID=") {
            version = v.trim_matches('"').to_string();
        }
    }

    if name.is_empty() {
        name = std::env::consts::OS.to_string();
    }
    if version.is_empty() {
        version = "unknown".into();
    }

    (name, version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_os_release() {
        let content = r#"NAME="Red Hat Enterprise Linux"
VERSION="9.3 (Plow)"
ID="rhel"
VERSION_ID="9.3"
"#;
        let (name, version) = parse_os_release(content);
        assert_eq!(name, "Red Hat Enterprise Linux");
        assert_eq!(version, "9.3");
    }

    #[test]
    fn test_fisma_ordering() {
        assert!(FismaLevel::High > FismaLevel::Med);
        assert!(FismaLevel::Med > FismaLevel::Low);
    }

    #[test]
    fn test_root_detection() {
        let host = HostDescriptor::new(OsFamily::Linux, "Ubuntu", "22.04", 0);
        assert!(host.is_root());
        assert!(!HostDescriptor::new(OsFamily::Linux, "Ubuntu", "22.04", 1000).is_root());
    }
}

//! Built-in rules
//!
//! Generic rule shapes (`ConfigValueRule`, `FilePermissionRule`,
//! `RemoveFileRule`) and the concrete instances registered by
//! `RuleRegistry::with_builtin_rules`.

mod config_value;
mod file_permission;
mod remove_file;

pub use config_value::ConfigValueRule;
pub use file_permission::FilePermissionRule;
pub use remove_file::RemoveFileRule;

use crate::registry::RuleRegistry;
use crate::rule::{Rule, RuleMetadata};
use bastion_core::{Applicability, OsFamily, Result};
use tracing::error;

fn linux_only() -> Applicability {
    Applicability::whitelist().with_family(OsFamily::Linux)
}

fn unix_like() -> Applicability {
    Applicability::whitelist()
        .with_family(OsFamily::Linux)
        .with_family(OsFamily::Darwin)
        .with_family(OsFamily::FreeBsd)
}

fn boxed<R: Rule + 'static>(rule: Result<R>) -> Result<Box<dyn Rule>> {
    rule.map(|r| Box::new(r) as Box<dyn Rule>)
}

/// Register every built-in rule
pub fn register_all(registry: &mut RuleRegistry) {
    let outcomes = [
        registry.register(101, "DisableRootSSHLogin", || {
            boxed(
                ConfigValueRule::new(
                    RuleMetadata::new(101, "DisableRootSSHLogin")
                        .mandatory()
                        .with_help("Refuse direct root logins over SSH.")
                        .with_applicability(unix_like()),
                    "/etc/ssh/sshd_config",
                    "PermitRootLogin",
                    " ",
                    "no",
                )
                .and_then(|r| r.with_allowed_values(&["no", "prohibit-password", "forced-commands-only"])),
            )
        }),
        registry.register(102, "PasswordMaxDays", || {
            boxed(ConfigValueRule::new(
                RuleMetadata::new(102, "PasswordMaxDays")
                    .with_help("Limit the lifetime of new account passwords.")
                    .with_applicability(linux_only()),
                "/etc/login.defs",
                "PASS_MAX_DAYS",
                " ",
                "180",
            ))
        }),
        registry.register(103, "DisableIPForwarding", || {
            boxed(ConfigValueRule::new(
                RuleMetadata::new(103, "DisableIPForwarding")
                    .with_help("Do not route packets between interfaces at boot.")
                    .with_applicability(linux_only()),
                "/etc/sysctl.conf",
                "net.ipv4.ip_forward",
                "=",
                "0",
            ))
        }),
        registry.register(104, "ShadowPermissions", || {
            boxed(FilePermissionRule::new(
                RuleMetadata::new(104, "ShadowPermissions")
                    .mandatory()
                    .with_help("Keep password hashes unreadable by ordinary users.")
                    .with_applicability(linux_only()),
                "/etc/shadow",
                0o640,
            ))
        }),
        registry.register(105, "PasswdPermissions", || {
            boxed(FilePermissionRule::new(
                RuleMetadata::new(105, "PasswdPermissions")
                    .with_help("Keep the account database writable by root only.")
                    .with_applicability(unix_like()),
                "/etc/passwd",
                0o644,
            ))
        }),
        registry.register(106, "RemoveHostsEquiv", || {
            boxed(RemoveFileRule::new(
                RuleMetadata::new(106, "RemoveHostsEquiv")
                    .with_help("Remove host based trust for the r-commands.")
                    .with_applicability(unix_like()),
                "/etc/hosts.equiv",
            ))
        }),
    ];

    for outcome in outcomes {
        if let Err(e) = outcome {
            error!("Failed to register built-in rule: {}", e);
        }
    }
}

//! Command, package and service helpers
//!
//! Rules never build shell strings: every command is an argument vector
//! handed to a `CommandRunner`. Package and service helpers sit on top of
//! the runner so tests can script their behaviour.

use bastion_core::{Error, Result};
use std::path::Path;
use std::process::Command;
use std::sync::Arc;
use tracing::debug;

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code (-1 when killed by a signal)
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Runs a program with arguments and captures its output
pub trait CommandRunner: Send + Sync {
    /// Run `argv[0]` with `argv[1..]`. Failing to start the program is an
    /// error; a non-zero exit is reported through `CommandOutput::status`.
    fn run(&self, argv: &[String]) -> Result<CommandOutput>;
}

/// Run a command and turn a non-zero exit into `Error::CommandFailed`
pub fn run_checked(runner: &dyn CommandRunner, argv: &[String]) -> Result<CommandOutput> {
    let output = runner.run(argv)?;
    if output.success() {
        Ok(output)
    } else {
        Err(Error::CommandFailed {
            command: argv.join(" "),
            message: format!("exit code {}: {}", output.status, output.stderr.trim()),
        })
    }
}

/// Build an argument vector from string slices
pub fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

/// Runs commands on the local system
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemCommandRunner;

impl CommandRunner for SystemCommandRunner {
    fn run(&self, argv: &[String]) -> Result<CommandOutput> {
        let (program, args) = argv.split_first().ok_or_else(|| Error::CommandFailed {
            command: String::new(),
            message: "empty command".into(),
        })?;

        debug!("Running command: {}", argv.join(" "));
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|e| Error::CommandFailed {
                command: argv.join(" "),
                message: e.to_string(),
            })?;

        Ok(CommandOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Installs and removes packages
pub trait PackageManager: Send + Sync {
    fn is_installed(&self, package: &str) -> Result<bool>;
    fn install(&self, package: &str) -> Result<()>;
    fn remove(&self, package: &str) -> Result<()>;
}

/// Package tool driven by `SystemPackageManager`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageTool {
    Apt,
    Dnf,
    Yum,
    Zypper,
    /// No supported tool found
    Unsupported,
}

impl PackageTool {
    /// Detect the package tool of the running system
    pub fn detect() -> Self {
        let candidates = [
            ("/usr/bin/apt-get", PackageTool::Apt),
            ("/usr/bin/dnf", PackageTool::Dnf),
            ("/usr/bin/yum", PackageTool::Yum),
            ("/usr/bin/zypper", PackageTool::Zypper),
        ];
        candidates
            .iter()
            .find(|(path, _)| Path::new(path).exists())
            .map(|(_, tool)| *tool)
            .unwrap_or(PackageTool::Unsupported)
    }

    fn query(&self, package: &str) -> Option<Vec<String>> {
        match self {
            PackageTool::Apt => Some(argv(&["dpkg-query", "-W", "-f", "${Status}", package])),
            PackageTool::Dnf | PackageTool::Yum | PackageTool::Zypper => {
                Some(argv(&["rpm", "-q", package]))
            }
            PackageTool::Unsupported => None,
        }
    }

    fn install(&self, package: &str) -> Option<Vec<String>> {
        match self {
            PackageTool::Apt => Some(argv(&["apt-get", "install", "-y", package])),
            PackageTool::Dnf => Some(argv(&["dnf", "install", "-y", package])),
            PackageTool::Yum => Some(argv(&["yum", "install", "-y", package])),
            PackageTool::Zypper => Some(argv(&["zypper", "--non-interactive", "install", package])),
            PackageTool::Unsupported => None,
        }
    }

    fn remove(&self, package: &str) -> Option<Vec<String>> {
        match self {
            PackageTool::Apt => Some(argv(&["apt-get", "remove", "-y", package])),
            PackageTool::Dnf => Some(argv(&["dnf", "remove", "-y", package])),
            PackageTool::Yum => Some(argv(&["yum", "remove", "-y", package])),
            PackageTool::Zypper => Some(argv(&["zypper", "--non-interactive", "remove", package])),
            PackageTool::Unsupported => None,
        }
    }
}

/// Package manager backed by the system's package tool
pub struct SystemPackageManager {
    tool: PackageTool,
    runner: Arc<dyn CommandRunner>,
}

impl SystemPackageManager {
    pub fn new(tool: PackageTool, runner: Arc<dyn CommandRunner>) -> Self {
        Self { tool, runner }
    }

    /// Use the detected package tool
    pub fn detect(runner: Arc<dyn CommandRunner>) -> Self {
        Self::new(PackageTool::detect(), runner)
    }

    pub fn tool(&self) -> PackageTool {
        self.tool
    }

    fn unsupported(&self) -> Error {
        Error::Other(String::from("No supported package manager found"))
    }
}

impl PackageManager for SystemPackageManager {
    fn is_installed(&self, package: &str) -> Result<bool> {
        let cmd = self.tool.query(package).ok_or_else(|| self.unsupported())?;
        let output = self.runner.run(&cmd)?;
        Ok(match self.tool {
            PackageTool::Apt => {
                output.success() && output.stdout.contains("install ok installed")
            }
            _ => output.success(),
        })
    }

    fn install(&self, package: &str) -> Result<()> {
        let cmd = self.tool.install(package).ok_or_else(|| self.unsupported())?;
        run_checked(self.runner.as_ref(), &cmd).map(|_| ())
    }

    fn remove(&self, package: &str) -> Result<()> {
        let cmd = self.tool.remove(package).ok_or_else(|| self.unsupported())?;
        run_checked(self.runner.as_ref(), &cmd).map(|_| ())
    }
}

/// Enables and disables services
pub trait ServiceManager: Send + Sync {
    fn is_enabled(&self, service: &str) -> Result<bool>;
    fn enable(&self, service: &str) -> Result<()>;
    fn disable(&self, service: &str) -> Result<()>;
}

/// Service manager using systemctl
pub struct SystemdServiceManager {
    runner: Arc<dyn CommandRunner>,
}

impl SystemdServiceManager {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

impl ServiceManager for SystemdServiceManager {
    fn is_enabled(&self, service: &str) -> Result<bool> {
        let output = self.runner.run(&argv(&["systemctl", "is-enabled", service]))?;
        let status = output.stdout.trim();
        Ok(status == "enabled" || status == "static")
    }

    fn enable(&self, service: &str) -> Result<()> {
        run_checked(self.runner.as_ref(), &argv(&["systemctl", "enable", service])).map(|_| ())
    }

    fn disable(&self, service: &str) -> Result<()> {
        run_checked(self.runner.as_ref(), &argv(&["systemctl", "disable", service])).map(|_| ())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Runner that records every command and answers from a script
    #[derive(Default)]
    pub struct ScriptedRunner {
        pub calls: Mutex<Vec<Vec<String>>>,
        responses: Mutex<Vec<(String, CommandOutput)>>,
    }

    impl ScriptedRunner {
        /// Answer commands starting with `prefix`
        pub fn respond(&self, prefix: &str, status: i32, stdout: &str) {
            self.responses.lock().unwrap().push((
                prefix.to_string(),
                CommandOutput {
                    status,
                    stdout: stdout.to_string(),
                    stderr: String::new(),
                },
            ));
        }

        pub fn calls(&self) -> Vec<Vec<String>> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl CommandRunner for ScriptedRunner {
        fn run(&self, argv: &[String]) -> Result<CommandOutput> {
            self.calls.lock().unwrap().push(argv.to_vec());
            let line = argv.join(" ");
            Ok(self
                .responses
                .lock()
                .unwrap()
                .iter()
                .find(|(prefix, _)| line.starts_with(prefix.as_str()))
                .map(|(_, output)| output.clone())
                .unwrap_or_default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::ScriptedRunner;
    use super::*;

    #[test]
    fn test_system_runner_captures_output() {
        let output = SystemCommandRunner.run(&argv(&["echo", "hello"])).unwrap();
        assert!(output.success());
        assert_eq!(output.stdout.trim(), "hello");
    }

    #[test]
    fn test_system_runner_rejects_empty_and_missing() {
        assert!(SystemCommandRunner.run(&[]).is_err());
        let err = SystemCommandRunner
            .run(&argv(&["/nonexistent/bastion-test-binary"]))
            .unwrap_err();
        assert_eq!(err.code(), "COMMAND_FAILED");
    }

    #[test]
    fn test_run_checked_non_zero() {
        let runner = ScriptedRunner::default();
        runner.respond("false", 1, "");
        let err = run_checked(&runner, &argv(&["false"])).unwrap_err();
        assert_eq!(err.code(), "COMMAND_FAILED");
    }

    #[test]
    fn test_apt_package_manager() {
        let runner = Arc::new(ScriptedRunner::default());
        runner.respond("dpkg-query -W -f ${Status} telnet", 0, "install ok installed");
        let packages = SystemPackageManager::new(PackageTool::Apt, runner.clone());

        assert!(packages.is_installed("telnet").unwrap());
        assert!(!packages.is_installed("rsh").unwrap());
        packages.remove("telnet").unwrap();
        assert_eq!(
            runner.calls().last().unwrap(),
            &argv(&["apt-get", "remove", "-y", "telnet"])
        );
    }

    #[test]
    fn test_rpm_package_query() {
        let runner = Arc::new(ScriptedRunner::default());
        runner.respond("rpm -q aide", 0, "aide-0.16-100.el8.x86_64");
        runner.respond("rpm -q", 1, "package rsh is not installed");
        let packages = SystemPackageManager::new(PackageTool::Dnf, runner);

        assert!(packages.is_installed("aide").unwrap());
        assert!(!packages.is_installed("rsh").unwrap());
    }

    #[test]
    fn test_unsupported_package_tool() {
        let packages =
            SystemPackageManager::new(PackageTool::Unsupported, Arc::new(ScriptedRunner::default()));
        assert!(packages.install("aide").is_err());
    }

    #[test]
    fn test_systemd_service_manager() {
        let runner = Arc::new(ScriptedRunner::default());
        runner.respond("systemctl is-enabled cups", 0, "enabled\n");
        runner.respond("systemctl is-enabled", 1, "disabled\n");
        let services = SystemdServiceManager::new(runner.clone());

        assert!(services.is_enabled("cups").unwrap());
        assert!(!services.is_enabled("avahi-daemon").unwrap());
        services.disable("cups").unwrap();
        assert_eq!(
            runner.calls().last().unwrap(),
            &argv(&["systemctl", "disable", "cups"])
        );
    }
}

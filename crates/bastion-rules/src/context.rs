//! Collaborators handed to every rule

use crate::exec::{
    CommandRunner, PackageManager, ServiceManager, SystemCommandRunner, SystemPackageManager,
    SystemdServiceManager,
};
use bastion_changelog::StateChangeLogger;
use bastion_core::HostDescriptor;
use std::sync::Arc;

/// Everything a rule may touch, constructed once per run
#[derive(Clone)]
pub struct RuleContext {
    /// The host being evaluated
    pub host: HostDescriptor,

    /// Shared change log
    pub changes: Arc<StateChangeLogger>,

    /// Command execution
    pub commands: Arc<dyn CommandRunner>,

    /// Package installation state
    pub packages: Arc<dyn PackageManager>,

    /// Service boot state
    pub services: Arc<dyn ServiceManager>,
}

impl RuleContext {
    /// Context using the system command runner and the helpers built on it
    pub fn new(host: HostDescriptor, changes: Arc<StateChangeLogger>) -> Self {
        let commands: Arc<dyn CommandRunner> = Arc::new(SystemCommandRunner);
        Self {
            host,
            changes,
            packages: Arc::new(SystemPackageManager::detect(commands.clone())),
            services: Arc::new(SystemdServiceManager::new(commands.clone())),
            commands,
        }
    }

    pub fn with_commands(mut self, commands: Arc<dyn CommandRunner>) -> Self {
        self.commands = commands;
        self
    }

    pub fn with_packages(mut self, packages: Arc<dyn PackageManager>) -> Self {
        self.packages = packages;
        self
    }

    pub fn with_services(mut self, services: Arc<dyn ServiceManager>) -> Self {
        self.services = services;
        self
    }

    /// True when running with root privileges
    pub fn is_root(&self) -> bool {
        self.host.is_root()
    }
}

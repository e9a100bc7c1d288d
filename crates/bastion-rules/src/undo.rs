//! Reversal of recorded change events

use crate::context::RuleContext;
use crate::exec::run_checked;
use bastion_changelog::{FileState, PackageState, ServiceState, StateChange, StateChangeEvent};
use bastion_core::{Error, Result};
use std::path::Path;
use tracing::debug;

/// Return the system to the state before `event`
pub fn reverse_event(ctx: &RuleContext, event: &StateChangeEvent) -> Result<()> {
    debug!("Reversing event {} ({})", event.id, event.change);

    let outcome = match &event.change {
        StateChange::ConfEdit { .. } | StateChange::Creation { .. } => {
            ctx.changes.revert_file_change(event)
        }
        StateChange::Deletion { .. } => ctx.changes.revert_file_deletion(event),
        StateChange::PermChange { path, start, .. } => restore_file_state(path, start),
        StateChange::CommandString { command } => {
            run_checked(ctx.commands.as_ref(), command).map(|_| ())
        }
        StateChange::PackageChange { package, start, .. } => match start {
            PackageState::Installed => ctx.packages.install(package),
            PackageState::Removed => ctx.packages.remove(package),
        },
        StateChange::ServiceChange { service, start, .. } => match start {
            ServiceState::Enabled => ctx.services.enable(service),
            ServiceState::Disabled => ctx.services.disable(service),
        },
    };

    outcome.map_err(|e| match e {
        Error::Reversal { .. } => e,
        other => Error::Reversal {
            event_id: event.id.to_string(),
            message: other.to_string(),
        },
    })
}

/// Put back ownership first, then mode, so set-id bits survive the chown
#[cfg(unix)]
pub fn restore_file_state(path: &Path, state: &FileState) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    std::os::unix::fs::chown(path, Some(state.uid), Some(state.gid))?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(state.mode))?;
    Ok(())
}

#[cfg(not(unix))]
pub fn restore_file_state(path: &Path, _state: &FileState) -> Result<()> {
    Err(Error::Other(format!(
        "Cannot restore ownership of {} on this platform",
        path.display()
    )))
}

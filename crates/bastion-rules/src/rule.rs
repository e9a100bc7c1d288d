//! Rule trait and lifecycle - the interface all compliance rules implement
//!
//! A rule supplies two bodies: `inspect` (read-only) and `remediate`
//! (mutating, recording one change event per mutation). The provided
//! `report`, `fix` and `undo` methods wrap those bodies with the shared
//! lifecycle: result bookkeeping, fail-closed inspection, the enable switch,
//! clearing stale events and reversing recorded events newest first.

use crate::context::RuleContext;
use crate::undo;
use bastion_changelog::StateChangeEvent;
use bastion_core::{
    Applicability, ConfigurationItem, DataType, Error, HostDescriptor, Result,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, error, info, warn};

/// Lifecycle phase, as used in detailed results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Initialize,
    Report,
    Fix,
    Undo,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Initialize => "initialize",
            Phase::Report => "report",
            Phase::Fix => "fix",
            Phase::Undo => "undo",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Whether the managed setting is in its desired configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigState {
    Configured,
    NotConfigured,
}

/// Where a rule is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lifecycle {
    Uninitialized,
    Reported,
    Fixed,
    Undone,
}

/// Static description of a rule
#[derive(Debug, Clone)]
pub struct RuleMetadata {
    /// Unique rule number, namespaces the rule's change events
    pub number: u32,

    /// Unique rule name
    pub name: String,

    /// Part of the mandatory baseline
    pub mandatory: bool,

    /// Needs root to run at all
    pub root_required: bool,

    /// Only reports, never fixes
    pub audit_only: bool,

    /// Help text shown to users
    pub help: String,

    /// Guidance references (e.g. CCE ids)
    pub guidance: Vec<String>,

    /// Hosts this rule applies to
    pub applicability: Applicability,
}

impl RuleMetadata {
    pub fn new(number: u32, name: impl Into<String>) -> Self {
        Self {
            number,
            name: name.into(),
            mandatory: false,
            root_required: true,
            audit_only: false,
            help: String::new(),
            guidance: Vec::new(),
            applicability: Applicability::everywhere(),
        }
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = help.into();
        self
    }

    pub fn with_guidance(mut self, reference: impl Into<String>) -> Self {
        self.guidance.push(reference.into());
        self
    }

    pub fn with_applicability(mut self, applicability: Applicability) -> Self {
        self.applicability = applicability;
        self
    }

    pub fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }

    pub fn audit_only(mut self) -> Self {
        self.audit_only = true;
        self
    }

    /// Allow running without root
    pub fn unprivileged(mut self) -> Self {
        self.root_required = false;
        self
    }
}

/// Mutable results of the last lifecycle call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleState {
    /// `None` until report has run
    pub compliant: Option<bool>,
    /// False when the last call hit an error
    pub success: bool,
    pub detailed_results: String,
    pub current_state: ConfigState,
    pub target_state: ConfigState,
    pub lifecycle: Lifecycle,
}

impl Default for RuleState {
    fn default() -> Self {
        Self {
            compliant: None,
            success: true,
            detailed_results: String::new(),
            current_state: ConfigState::NotConfigured,
            target_state: ConfigState::Configured,
            lifecycle: Lifecycle::Uninitialized,
        }
    }
}

/// Outcome of a rule's inspection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inspection {
    pub compliant: bool,
    pub details: Vec<String>,
}

impl Inspection {
    pub fn compliant() -> Self {
        Self {
            compliant: true,
            details: Vec::new(),
        }
    }

    pub fn non_compliant(reason: impl Into<String>) -> Self {
        Self {
            compliant: false,
            details: vec![reason.into()],
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.details.push(detail.into());
        self
    }
}

/// Outcome of a remediation: every sub-step runs, and the rule succeeds
/// only if all of them did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Remediation {
    pub success: bool,
    pub details: Vec<String>,
}

impl Default for Remediation {
    fn default() -> Self {
        Self::new()
    }
}

impl Remediation {
    pub fn new() -> Self {
        Self {
            success: true,
            details: Vec::new(),
        }
    }

    /// Record the result of one sub-step
    pub fn step<T>(&mut self, description: &str, result: Result<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("{} failed: {}", description, e);
                self.fail(format!("{} failed: {}", description, e));
                None
            }
        }
    }

    pub fn fail(&mut self, detail: impl Into<String>) {
        self.success = false;
        self.details.push(detail.into());
    }

    pub fn note(&mut self, detail: impl Into<String>) {
        self.details.push(detail.into());
    }
}

/// State and options every rule carries
#[derive(Debug, Clone)]
pub struct RuleCore {
    pub meta: RuleMetadata,
    pub state: RuleState,
    items: Vec<ConfigurationItem>,
    enable_key: Option<String>,
}

impl RuleCore {
    pub fn new(meta: RuleMetadata) -> Self {
        let mut core = Self {
            meta,
            state: RuleState::default(),
            items: Vec::new(),
            enable_key: None,
        };
        core.set_results(Phase::Initialize, None, &[]);
        core
    }

    /// Add a configuration item; keys are unique within a rule
    pub fn add_item(&mut self, item: ConfigurationItem) -> Result<()> {
        if self.item(item.key()).is_some() {
            return Err(Error::config(
                item.key(),
                format!("duplicate configuration item in rule {}", self.meta.name),
            ));
        }
        self.items.push(item);
        Ok(())
    }

    /// Add the bool item that switches fixing on and off
    pub fn add_enable_item(
        &mut self,
        key: impl Into<String>,
        instructions: impl Into<String>,
        default: bool,
    ) -> Result<()> {
        let item = ConfigurationItem::new(DataType::Bool, key, instructions, default)?.in_simple();
        let key = item.key().to_string();
        self.add_item(item)?;
        self.enable_key = Some(key);
        Ok(())
    }

    pub fn item(&self, key: &str) -> Option<&ConfigurationItem> {
        self.items.iter().find(|i| i.key() == key)
    }

    pub fn item_mut(&mut self, key: &str) -> Option<&mut ConfigurationItem> {
        self.items.iter_mut().find(|i| i.key() == key)
    }

    pub fn items(&self) -> &[ConfigurationItem] {
        &self.items
    }

    pub fn items_mut(&mut self) -> &mut [ConfigurationItem] {
        &mut self.items
    }

    pub fn enable_key(&self) -> Option<&str> {
        self.enable_key.as_deref()
    }

    /// Value of the enable item; rules without one are always enabled
    pub fn is_enabled(&self) -> bool {
        match self.enable_key.as_deref().and_then(|k| self.item(k)) {
            Some(item) => item.enabled(),
            None => true,
        }
    }

    /// Current value of a string item
    pub fn string_value(&self, key: &str) -> Option<&str> {
        self.item(key).and_then(|i| i.current_value().as_str())
    }

    /// Format detailed results for a phase. `result` is `None` when the
    /// phase is not available for this rule.
    pub fn set_results(&mut self, phase: Phase, result: Option<bool>, details: &[String]) {
        let prefix = format!("Rule {}({})", self.meta.name, self.meta.number);
        let (connector, verdict) = match (phase, result) {
            (Phase::Initialize, _) => (": ", "Neither report, fix, or revert have been run yet."),
            (Phase::Report, None) => (": ", "This Rule does not support report."),
            (Phase::Report, Some(true)) => {
                self.state.current_state = self.state.target_state;
                (" report results: ", "Rule is Compliant.")
            }
            (Phase::Report, Some(false)) => {
                self.state.current_state = ConfigState::NotConfigured;
                (" report results: ", "Rule is not Compliant.")
            }
            (Phase::Fix, None) => (": ", "This Rule does not support fix."),
            (Phase::Fix, Some(true)) => (" fix results: ", "Rule was fixed successfully."),
            (Phase::Fix, Some(false)) => (" fix results: ", "The fix for this Rule failed."),
            (Phase::Undo, None) => (": ", "No recoverable events are available for this Rule."),
            (Phase::Undo, Some(true)) => (" revert results: ", "Revert was completed successfully."),
            (Phase::Undo, Some(false)) => (" revert results: ", "The revert for this Rule failed."),
        };

        let mut text = format!("{}{}{}", prefix, connector, verdict);
        for line in details.iter().filter(|l| !l.is_empty()) {
            text.push('\n');
            text.push_str(line);
        }
        self.state.detailed_results = text;
    }
}

/// The trait that all compliance rules implement
pub trait Rule: Send {
    fn core(&self) -> &RuleCore;

    fn core_mut(&mut self) -> &mut RuleCore;

    /// Inspect live system state without changing it
    fn inspect(&mut self, ctx: &RuleContext) -> Result<Inspection>;

    /// Bring the system into compliance, recording one change event per
    /// mutation under this rule's number
    fn remediate(&mut self, ctx: &RuleContext) -> Result<Remediation>;

    /// Reverse one recorded event. Override for rule specific undo data.
    fn reverse(&mut self, ctx: &RuleContext, event: &StateChangeEvent) -> Result<()> {
        undo::reverse_event(ctx, event)
    }

    fn metadata(&self) -> &RuleMetadata {
        &self.core().meta
    }

    fn number(&self) -> u32 {
        self.core().meta.number
    }

    fn name(&self) -> &str {
        &self.core().meta.name
    }

    fn state(&self) -> &RuleState {
        &self.core().state
    }

    fn items(&self) -> &[ConfigurationItem] {
        self.core().items()
    }

    fn items_mut(&mut self) -> &mut [ConfigurationItem] {
        self.core_mut().items_mut()
    }

    /// Evaluate the applicability descriptor against a host
    fn is_applicable(&self, host: &HostDescriptor) -> bool {
        self.metadata().applicability.applies_to(host)
    }

    /// Re-validate every configuration item's current value
    fn check_config_opts(&self) -> bool {
        self.items().iter().all(|i| i.validate(i.current_value()))
    }

    /// Inspect the system and record compliance. Errors are logged and
    /// count as non-compliant.
    fn report(&mut self, ctx: &RuleContext) -> bool {
        let outcome = self.inspect(ctx);
        let name = self.name().to_string();
        let core = self.core_mut();

        let compliant = match outcome {
            Ok(inspection) => {
                debug!("Rule {} compliant: {}", name, inspection.compliant);
                core.state.success = true;
                core.set_results(Phase::Report, Some(inspection.compliant), &inspection.details);
                inspection.compliant
            }
            Err(e) => {
                error!("Rule {} report failed: {}", name, e);
                core.state.success = false;
                core.set_results(Phase::Report, Some(false), &[e.to_string()]);
                false
            }
        };

        core.state.compliant = Some(compliant);
        core.state.lifecycle = Lifecycle::Reported;
        compliant
    }

    /// Remediate unless disabled. Prior events of this rule are discarded
    /// first so undo returns to the state before this fix.
    fn fix(&mut self, ctx: &RuleContext) -> bool {
        let name = self.name().to_string();
        let number = self.number();

        if self.metadata().audit_only {
            self.core_mut().set_results(Phase::Fix, None, &[]);
            return false;
        }

        if !self.core().is_enabled() {
            let key = self.core().enable_key().unwrap_or_default().to_string();
            info!("Rule {} disabled by {}, skipping fix", name, key);
            let core = self.core_mut();
            core.state.success = true;
            core.state.detailed_results = format!(
                "Rule {}({}): fix not run, disabled by configuration item {}.",
                name, number, key
            );
            return true;
        }

        if !self.check_config_opts() {
            let core = self.core_mut();
            core.state.success = false;
            core.set_results(
                Phase::Fix,
                Some(false),
                &[String::from("One or more configuration items hold invalid values.")],
            );
            return false;
        }

        if let Err(e) = ctx.changes.clear_rule_events(number) {
            error!("Rule {} could not clear prior change events: {}", name, e);
            let core = self.core_mut();
            core.state.success = false;
            core.set_results(Phase::Fix, Some(false), &[e.to_string()]);
            return false;
        }

        let (success, details) = match self.remediate(ctx) {
            Ok(remediation) => (remediation.success, remediation.details),
            Err(e) => {
                error!("Rule {} fix failed: {}", name, e);
                (false, vec![e.to_string()])
            }
        };

        let core = self.core_mut();
        core.state.success = success;
        core.state.lifecycle = Lifecycle::Fixed;
        core.set_results(Phase::Fix, Some(success), &details);
        success
    }

    /// Reverse every recorded event of this rule, newest first. An event is
    /// deleted only after it was reversed.
    fn undo(&mut self, ctx: &RuleContext) -> bool {
        let name = self.name().to_string();

        if !ctx.is_root() {
            let core = self.core_mut();
            core.state.success = false;
            core.set_results(
                Phase::Undo,
                None,
                &[String::from("Root access required to revert changes.")],
            );
            return false;
        }

        let events = ctx.changes.find_events_for_rule(self.number());
        if events.is_empty() {
            info!("Rule {} has no recoverable events", name);
            let core = self.core_mut();
            core.state.success = true;
            core.set_results(Phase::Undo, None, &[]);
            return true;
        }

        let mut success = true;
        let mut details = Vec::new();
        for event in events.iter().rev() {
            match self.reverse(ctx, event) {
                Ok(()) => {
                    debug!("Reversed event {} ({})", event.id, event.change);
                    if let Err(e) = ctx.changes.delete_event(event.id) {
                        warn!("Reversed event {} but could not delete it: {}", event.id, e);
                        success = false;
                        details.push(e.to_string());
                    }
                }
                Err(e) => {
                    error!("Rule {} could not reverse event {}: {}", name, event.id, e);
                    success = false;
                    details.push(e.to_string());
                }
            }
        }

        let core = self.core_mut();
        core.state.success = success;
        core.state.lifecycle = Lifecycle::Undone;
        core.set_results(Phase::Undo, Some(success), &details);
        success
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bastion_changelog::{StateChange, StateChangeLogger};
    use bastion_core::OsFamily;
    use std::sync::Arc;

    struct CountingRule {
        core: RuleCore,
        compliant: bool,
        fail_inspect: bool,
        remediations: usize,
    }

    impl CountingRule {
        fn new() -> Self {
            let mut core = RuleCore::new(RuleMetadata::new(42, "CountingRule"));
            core.add_enable_item("COUNTINGRULE", "Enable the counting rule", true)
                .unwrap();
            Self {
                core,
                compliant: false,
                fail_inspect: false,
                remediations: 0,
            }
        }
    }

    impl Rule for CountingRule {
        fn core(&self) -> &RuleCore {
            &self.core
        }

        fn core_mut(&mut self) -> &mut RuleCore {
            &mut self.core
        }

        fn inspect(&mut self, _ctx: &RuleContext) -> Result<Inspection> {
            if self.fail_inspect {
                return Err(Error::Inspection {
                    rule: self.name().to_string(),
                    message: "inspector crashed".into(),
                });
            }
            Ok(if self.compliant {
                Inspection::compliant()
            } else {
                Inspection::non_compliant("counter not set")
            })
        }

        fn remediate(&mut self, ctx: &RuleContext) -> Result<Remediation> {
            self.remediations += 1;
            ctx.changes
                .record_event(self.number(), StateChange::command(["true"]))?;
            self.compliant = true;
            Ok(Remediation::new())
        }
    }

    fn context(euid: u32) -> RuleContext {
        let host = HostDescriptor::new(OsFamily::Linux, "Debian GNU/Linux", "12", euid);
        RuleContext::new(host, Arc::new(StateChangeLogger::in_memory("/nonexistent")))
    }

    #[test]
    fn test_initial_results() {
        let rule = CountingRule::new();
        assert_eq!(
            rule.state().detailed_results,
            "Rule CountingRule(42): Neither report, fix, or revert have been run yet."
        );
        assert_eq!(rule.state().compliant, None);
        assert_eq!(rule.state().lifecycle, Lifecycle::Uninitialized);
    }

    #[test]
    fn test_report_then_fix_then_report() {
        let ctx = context(0);
        let mut rule = CountingRule::new();

        assert!(!rule.report(&ctx));
        assert_eq!(
            rule.state().detailed_results,
            "Rule CountingRule(42) report results: Rule is not Compliant.\ncounter not set"
        );
        assert_eq!(rule.state().current_state, ConfigState::NotConfigured);

        assert!(rule.fix(&ctx));
        assert!(rule.state().detailed_results.ends_with("Rule was fixed successfully."));
        assert!(rule.report(&ctx));
        assert_eq!(rule.state().current_state, ConfigState::Configured);
    }

    #[test]
    fn test_report_fails_closed() {
        let ctx = context(0);
        let mut rule = CountingRule::new();
        rule.compliant = true;
        rule.fail_inspect = true;

        assert!(!rule.report(&ctx));
        assert_eq!(rule.state().compliant, Some(false));
        assert!(!rule.state().success);
        assert!(rule.state().detailed_results.contains("inspector crashed"));
    }

    #[test]
    fn test_disabled_fix_is_noop() {
        let ctx = context(0);
        let mut rule = CountingRule::new();
        assert!(rule
            .core_mut()
            .item_mut("COUNTINGRULE")
            .unwrap()
            .set_current_value(false));

        assert!(rule.fix(&ctx));
        assert_eq!(rule.remediations, 0);
        assert!(ctx.changes.find_events_for_rule(42).is_empty());
    }

    #[test]
    fn test_fix_clears_prior_events() {
        let ctx = context(0);
        let mut rule = CountingRule::new();
        rule.fix(&ctx);
        rule.fix(&ctx);
        let events = ctx.changes.find_events_for_rule(42);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id.seq, 2);
    }

    #[test]
    fn test_undo_requires_root() {
        let ctx = context(1000);
        let mut rule = CountingRule::new();
        rule.fix(&ctx);

        assert!(!rule.undo(&ctx));
        assert!(rule
            .state()
            .detailed_results
            .contains("Root access required to revert changes."));
        assert_eq!(ctx.changes.find_events_for_rule(42).len(), 1);
    }

    #[test]
    fn test_undo_without_events() {
        let ctx = context(0);
        let mut rule = CountingRule::new();
        assert!(rule.undo(&ctx));
        assert_eq!(
            rule.state().detailed_results,
            "Rule CountingRule(42): No recoverable events are available for this Rule."
        );
    }

    #[test]
    fn test_undo_keeps_events_that_fail_to_reverse() {
        use crate::exec::testing::ScriptedRunner;
        use std::fs;

        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::default());
        runner.respond("false", 1, "");
        let host = HostDescriptor::new(OsFamily::Linux, "Debian GNU/Linux", "12", 0);
        let ctx = RuleContext::new(
            host,
            Arc::new(StateChangeLogger::in_memory(dir.path().join("archive"))),
        )
        .with_commands(runner.clone());

        let conf = dir.path().join("counter.conf");
        fs::write(&conf, "foo=0\n").unwrap();
        ctx.changes.record_file_edit(42, &conf).unwrap();
        fs::write(&conf, "foo=1\n").unwrap();
        ctx.changes
            .record_event(42, StateChange::command(["false"]))
            .unwrap();

        let mut rule = CountingRule::new();
        assert!(!rule.undo(&ctx));
        assert!(!rule.state().success);

        // The older edit is still reverted after the newer command fails.
        assert_eq!(fs::read_to_string(&conf).unwrap(), "foo=0\n");
        assert_eq!(runner.calls(), vec![vec![String::from("false")]]);

        let left = ctx.changes.find_events_for_rule(42);
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].change.kind(), "commandstring");
    }

    #[test]
    fn test_audit_only_never_fixes() {
        let ctx = context(0);
        let mut rule = CountingRule::new();
        rule.core_mut().meta.audit_only = true;
        assert!(!rule.fix(&ctx));
        assert_eq!(rule.remediations, 0);
        assert!(rule
            .state()
            .detailed_results
            .ends_with("This Rule does not support fix."));
    }

    #[test]
    fn test_duplicate_item_rejected() {
        let mut core = RuleCore::new(RuleMetadata::new(1, "Dup"));
        core.add_enable_item("DUP", "", true).unwrap();
        assert!(core.add_enable_item("DUP", "", true).is_err());
        assert!(core.is_enabled());
    }

    #[test]
    fn test_remediation_accumulates() {
        let mut remediation = Remediation::new();
        assert_eq!(remediation.step("first", Ok(1)), Some(1));
        assert_eq!(
            remediation.step::<()>("second", Err(Error::Other("disk full".into()))),
            None
        );
        remediation.step("third", Ok(()));
        assert!(!remediation.success);
        assert_eq!(remediation.details, vec!["second failed: disk full".to_string()]);
    }
}

//! Rule controller - runs the report, fix and undo phases over a rule set
//!
//! Rules are independent of each other and run one at a time. Every phase
//! call is isolated: an error or a panic inside one rule is recorded in its
//! result and the next rule runs.

use crate::context::RuleContext;
use crate::registry::RuleRegistry;
use crate::rule::{Phase, Rule};
use bastion_common::{RuleConfigFile, SaveMode};
use serde::Serialize;
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{debug, error, info, warn};

/// Which rules a phase runs on
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Selection {
    #[default]
    All,
    /// Rule names, matched case-insensitively
    Names(Vec<String>),
}

impl Selection {
    /// Build from `--module` values. Each value may hold a comma separated
    /// list; no names at all selects every rule.
    pub fn from_modules<S: AsRef<str>>(modules: &[S]) -> Self {
        let names: Vec<String> = modules
            .iter()
            .flat_map(|m| m.as_ref().split(','))
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(String::from)
            .collect();

        if names.is_empty() {
            Selection::All
        } else {
            Selection::Names(names)
        }
    }

    pub fn matches(&self, rule_name: &str) -> bool {
        match self {
            Selection::All => true,
            Selection::Names(names) => names.iter().any(|n| n.eq_ignore_ascii_case(rule_name)),
        }
    }
}

/// Outcome of one rule in one phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleStatus {
    Compliant,
    NonCompliant,
    NotApplicable,
    Reverted,
    /// The phase call reported failure
    Failed,
    /// The phase call panicked
    Panicked,
}

impl RuleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleStatus::Compliant => "compliant",
            RuleStatus::NonCompliant => "non-compliant",
            RuleStatus::NotApplicable => "not applicable",
            RuleStatus::Reverted => "reverted",
            RuleStatus::Failed => "failed",
            RuleStatus::Panicked => "panicked",
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, RuleStatus::Failed | RuleStatus::Panicked)
    }
}

impl fmt::Display for RuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of one rule in one phase
#[derive(Debug, Clone, Serialize)]
pub struct RuleResult {
    pub number: u32,
    pub name: String,
    pub status: RuleStatus,
    /// Compliance after the phase, when known
    pub compliant: Option<bool>,
    pub success: bool,
    pub detailed_results: String,
}

impl RuleResult {
    fn from_rule(rule: &dyn Rule, status: RuleStatus) -> Self {
        let state = rule.state();
        Self {
            number: rule.number(),
            name: rule.name().to_string(),
            status,
            compliant: state.compliant,
            success: state.success,
            detailed_results: state.detailed_results.clone(),
        }
    }

    fn not_applicable(rule: &dyn Rule, reason: &str) -> Self {
        Self {
            number: rule.number(),
            name: rule.name().to_string(),
            status: RuleStatus::NotApplicable,
            compliant: None,
            success: true,
            detailed_results: format!("Rule {}({}): {}", rule.name(), rule.number(), reason),
        }
    }

    fn panicked(rule: &dyn Rule, phase: Phase, message: &str) -> Self {
        Self {
            number: rule.number(),
            name: rule.name().to_string(),
            status: RuleStatus::Panicked,
            compliant: None,
            success: false,
            detailed_results: format!(
                "Rule {}({}): {} aborted unexpectedly: {}",
                rule.name(),
                rule.number(),
                phase,
                message
            ),
        }
    }
}

/// Per-rule results and counts for one phase
#[derive(Debug, Clone, Serialize)]
pub struct PhaseSummary {
    pub phase: Phase,
    /// Results keyed by rule number
    pub results: BTreeMap<u32, RuleResult>,
    pub compliant: usize,
    pub non_compliant: usize,
    pub not_applicable: usize,
    pub reverted: usize,
    pub errors: usize,
}

impl PhaseSummary {
    pub fn new(phase: Phase) -> Self {
        Self {
            phase,
            results: BTreeMap::new(),
            compliant: 0,
            non_compliant: 0,
            not_applicable: 0,
            reverted: 0,
            errors: 0,
        }
    }

    fn record(&mut self, result: RuleResult) {
        match result.status {
            RuleStatus::Compliant => self.compliant += 1,
            RuleStatus::NonCompliant => self.non_compliant += 1,
            RuleStatus::NotApplicable => self.not_applicable += 1,
            RuleStatus::Reverted => self.reverted += 1,
            RuleStatus::Failed | RuleStatus::Panicked => self.errors += 1,
        }
        self.results.insert(result.number, result);
    }

    /// Rules that ran, not counting inapplicable ones
    pub fn ran(&self) -> usize {
        self.results.len() - self.not_applicable
    }

    /// 0 when every rule that ran succeeded and, for report, was compliant
    pub fn exit_code(&self) -> i32 {
        let failed = match self.phase {
            Phase::Report => self.errors + self.non_compliant,
            _ => self.errors,
        };
        if failed == 0 {
            0
        } else {
            1
        }
    }

    pub fn get(&self, number: u32) -> Option<&RuleResult> {
        self.results.get(&number)
    }

    pub fn by_name(&self, name: &str) -> Option<&RuleResult> {
        self.results.values().find(|r| r.name == name)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        String::from("unknown panic")
    }
}

/// Run one phase call on a rule, turning a panic into an error message
fn guarded<T>(
    rule: &mut Box<dyn Rule>,
    op: impl FnOnce(&mut dyn Rule) -> T,
) -> std::result::Result<T, String> {
    catch_unwind(AssertUnwindSafe(|| op(rule.as_mut()))).map_err(|p| panic_message(p.as_ref()))
}

/// Orchestrates the lifecycle phases over a set of rules
pub struct RuleController {
    ctx: RuleContext,
    rules: Vec<Box<dyn Rule>>,
}

impl RuleController {
    pub fn new(ctx: RuleContext) -> Self {
        Self {
            ctx,
            rules: Vec::new(),
        }
    }

    pub fn context(&self) -> &RuleContext {
        &self.ctx
    }

    /// Instantiate every registered rule
    pub fn load_all_rules(&mut self, registry: &RuleRegistry) -> usize {
        let rules = registry.instantiate_all();
        let count = rules.len();
        self.rules.extend(rules);
        info!("Loaded {} of {} registered rules", count, registry.len());
        count
    }

    pub fn add_rule(&mut self, rule: Box<dyn Rule>) {
        self.rules.push(rule);
    }

    pub fn rules(&self) -> &[Box<dyn Rule>] {
        &self.rules
    }

    /// Apply persisted settings. Returns `(rule, key)` for every value that
    /// was rejected; those items keep their previous value.
    pub fn apply_config(&mut self, config: &RuleConfigFile) -> Vec<(String, String)> {
        let mut rejected = Vec::new();
        for rule in &mut self.rules {
            let name = rule.name().to_string();
            for key in config.apply_to(&name, rule.items_mut()) {
                warn!("Rule {}: rejected configured value for {}", name, key);
                rejected.push((name.clone(), key));
            }
        }
        rejected
    }

    /// Collect every rule's configuration items into a settings file
    pub fn export_config(&self, mode: SaveMode) -> RuleConfigFile {
        let mut config = RuleConfigFile::new();
        for rule in &self.rules {
            config.record_items(rule.name(), rule.items(), mode);
        }
        config
    }

    /// Why a rule cannot run on this host, if it cannot
    fn not_runnable(&self, rule: &dyn Rule) -> Option<&'static str> {
        if rule.metadata().root_required && !self.ctx.is_root() {
            Some("not applicable, root access required.")
        } else if !rule.is_applicable(&self.ctx.host) {
            Some("not applicable to this system.")
        } else {
            None
        }
    }

    /// Rules that can run on this host
    pub fn applicable_rules(&self) -> Vec<&dyn Rule> {
        self.rules
            .iter()
            .map(|r| r.as_ref())
            .filter(|r| self.not_runnable(*r).is_none())
            .collect()
    }

    /// Selected names that match no loaded rule
    pub fn unknown_names(&self, selection: &Selection) -> Vec<String> {
        match selection {
            Selection::All => Vec::new(),
            Selection::Names(names) => names
                .iter()
                .filter(|n| !self.rules.iter().any(|r| r.name().eq_ignore_ascii_case(n)))
                .cloned()
                .collect(),
        }
    }

    fn run_phase<F>(&mut self, phase: Phase, selection: &Selection, mut run: F) -> PhaseSummary
    where
        F: FnMut(&RuleContext, &mut Box<dyn Rule>) -> RuleResult,
    {
        let mut summary = PhaseSummary::new(phase);
        let mut rules = std::mem::take(&mut self.rules);

        for rule in rules.iter_mut() {
            if !selection.matches(rule.name()) {
                continue;
            }
            if let Some(reason) = self.not_runnable(rule.as_ref()) {
                debug!("Skipping rule {}: {}", rule.name(), reason);
                summary.record(RuleResult::not_applicable(rule.as_ref(), reason));
                continue;
            }

            let result = run(&self.ctx, rule);
            info!("Rule {} {}: {}", result.name, phase, result.status);
            summary.record(result);
        }

        self.rules = rules;
        info!(
            "{} phase complete: {} compliant, {} non-compliant, {} not applicable, {} errors",
            phase, summary.compliant, summary.non_compliant, summary.not_applicable, summary.errors
        );
        summary
    }

    /// Report on every selected, applicable rule
    pub fn run_report_phase(&mut self, selection: &Selection) -> PhaseSummary {
        self.run_phase(Phase::Report, selection, |ctx, rule| {
            match guarded(rule, |r| r.report(ctx)) {
                Ok(compliant) => {
                    let status = if !rule.state().success {
                        RuleStatus::Failed
                    } else if compliant {
                        RuleStatus::Compliant
                    } else {
                        RuleStatus::NonCompliant
                    };
                    RuleResult::from_rule(rule.as_ref(), status)
                }
                Err(message) => {
                    error!("Rule {} panicked during report: {}", rule.name(), message);
                    RuleResult::panicked(rule.as_ref(), Phase::Report, &message)
                }
            }
        })
    }

    /// Report, fix whatever is non-compliant, then report again. The
    /// result keeps the fix text and the compliance of the final report.
    pub fn run_fix_phase(&mut self, selection: &Selection) -> PhaseSummary {
        self.run_phase(Phase::Fix, selection, |ctx, rule| {
            let compliant = match guarded(rule, |r| r.report(ctx)) {
                Ok(compliant) => compliant,
                Err(message) => {
                    error!("Rule {} panicked during report: {}", rule.name(), message);
                    return RuleResult::panicked(rule.as_ref(), Phase::Report, &message);
                }
            };
            if compliant {
                return RuleResult::from_rule(rule.as_ref(), RuleStatus::Compliant);
            }
            if rule.metadata().audit_only {
                debug!("Rule {} is audit only, not fixing", rule.name());
                return RuleResult::from_rule(rule.as_ref(), RuleStatus::NonCompliant);
            }

            let fixed = match guarded(rule, |r| r.fix(ctx)) {
                Ok(fixed) => fixed,
                Err(message) => {
                    error!("Rule {} panicked during fix: {}", rule.name(), message);
                    return RuleResult::panicked(rule.as_ref(), Phase::Fix, &message);
                }
            };
            let fix_text = rule.state().detailed_results.clone();

            let compliant = match guarded(rule, |r| r.report(ctx)) {
                Ok(compliant) => compliant,
                Err(message) => {
                    error!("Rule {} panicked during report: {}", rule.name(), message);
                    return RuleResult::panicked(rule.as_ref(), Phase::Report, &message);
                }
            };

            let state = &mut rule.core_mut().state;
            state.detailed_results = fix_text;
            state.success = fixed;

            let status = if !fixed {
                RuleStatus::Failed
            } else if compliant {
                RuleStatus::Compliant
            } else {
                RuleStatus::NonCompliant
            };
            RuleResult::from_rule(rule.as_ref(), status)
        })
    }

    /// Revert every recorded change of the selected rules
    pub fn run_undo_phase(&mut self, selection: &Selection) -> PhaseSummary {
        self.run_phase(Phase::Undo, selection, |ctx, rule| {
            match guarded(rule, |r| r.undo(ctx)) {
                Ok(true) => RuleResult::from_rule(rule.as_ref(), RuleStatus::Reverted),
                Ok(false) => RuleResult::from_rule(rule.as_ref(), RuleStatus::Failed),
                Err(message) => {
                    error!("Rule {} panicked during undo: {}", rule.name(), message);
                    RuleResult::panicked(rule.as_ref(), Phase::Undo, &message)
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::{Inspection, Remediation, RuleCore, RuleMetadata};
    use bastion_changelog::{StateChange, StateChangeEvent, StateChangeLogger};
    use bastion_core::{Applicability, CiValue, HostDescriptor, OsFamily, Result};
    use std::sync::Arc;

    struct FlagRule {
        core: RuleCore,
        compliant: bool,
        panic_on_report: bool,
    }

    impl FlagRule {
        fn new(number: u32, name: &str) -> Self {
            let mut core = RuleCore::new(RuleMetadata::new(number, name));
            core.add_enable_item(name.to_uppercase(), "Enable", true).unwrap();
            Self {
                core,
                compliant: false,
                panic_on_report: false,
            }
        }

        fn with_meta(mut self, f: impl FnOnce(RuleMetadata) -> RuleMetadata) -> Self {
            self.core.meta = f(self.core.meta.clone());
            self
        }
    }

    impl Rule for FlagRule {
        fn core(&self) -> &RuleCore {
            &self.core
        }

        fn core_mut(&mut self) -> &mut RuleCore {
            &mut self.core
        }

        fn inspect(&mut self, _ctx: &RuleContext) -> Result<Inspection> {
            if self.panic_on_report {
                panic!("inspection blew up");
            }
            Ok(if self.compliant {
                Inspection::compliant()
            } else {
                Inspection::non_compliant("flag not set")
            })
        }

        fn remediate(&mut self, ctx: &RuleContext) -> Result<Remediation> {
            ctx.changes
                .record_event(self.number(), StateChange::command(["true"]))?;
            self.compliant = true;
            Ok(Remediation::new())
        }

        fn reverse(&mut self, _ctx: &RuleContext, _event: &StateChangeEvent) -> Result<()> {
            self.compliant = false;
            Ok(())
        }
    }

    fn controller(euid: u32) -> RuleController {
        let host = HostDescriptor::new(OsFamily::Linux, "Debian GNU/Linux", "12", euid);
        let ctx = RuleContext::new(host, Arc::new(StateChangeLogger::in_memory("/nonexistent")));
        RuleController::new(ctx)
    }

    #[test]
    fn test_selection() {
        assert_eq!(Selection::from_modules::<&str>(&[]), Selection::All);
        let selection = Selection::from_modules(&["a, B", "c"]);
        assert_eq!(
            selection,
            Selection::Names(vec!["a".into(), "B".into(), "c".into()])
        );
        assert!(selection.matches("A"));
        assert!(selection.matches("b"));
        assert!(!selection.matches("d"));
    }

    #[test]
    fn test_report_phase() {
        let mut controller = controller(0);
        let mut ok = FlagRule::new(1, "Ok");
        ok.compliant = true;
        controller.add_rule(Box::new(ok));
        controller.add_rule(Box::new(FlagRule::new(2, "Bad")));
        controller.add_rule(Box::new(FlagRule::new(3, "Mac").with_meta(|m| {
            m.with_applicability(Applicability::whitelist().with_family(OsFamily::Darwin))
        })));

        let summary = controller.run_report_phase(&Selection::All);
        assert_eq!(summary.compliant, 1);
        assert_eq!(summary.non_compliant, 1);
        assert_eq!(summary.not_applicable, 1);
        assert_eq!(summary.ran(), 2);
        assert_eq!(summary.exit_code(), 1);
        assert_eq!(summary.get(3).unwrap().status, RuleStatus::NotApplicable);

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["phase"], "report");
        assert_eq!(json["results"]["2"]["status"], "non_compliant");
        assert_eq!(json["non_compliant"], 1);
    }

    #[test]
    fn test_root_required_not_applicable() {
        let mut controller = controller(1000);
        controller.add_rule(Box::new(FlagRule::new(1, "NeedsRoot")));
        let mut user = FlagRule::new(2, "User").with_meta(|m| m.unprivileged());
        user.compliant = true;
        controller.add_rule(Box::new(user));

        let summary = controller.run_report_phase(&Selection::All);
        assert_eq!(summary.get(1).unwrap().status, RuleStatus::NotApplicable);
        assert_eq!(summary.get(2).unwrap().status, RuleStatus::Compliant);
        assert_eq!(summary.exit_code(), 0);
        assert_eq!(controller.applicable_rules().len(), 1);
    }

    #[test]
    fn test_fix_phase_reports_again() {
        let mut controller = controller(0);
        controller.add_rule(Box::new(FlagRule::new(1, "Bad")));
        let summary = controller.run_fix_phase(&Selection::All);

        let result = summary.get(1).unwrap();
        assert_eq!(result.status, RuleStatus::Compliant);
        assert_eq!(result.compliant, Some(true));
        assert!(result.detailed_results.contains("Rule was fixed successfully."));
        assert_eq!(summary.exit_code(), 0);
        assert_eq!(controller.context().changes.find_events_for_rule(1).len(), 1);
    }

    #[test]
    fn test_audit_only_not_fixed() {
        let mut controller = controller(0);
        controller.add_rule(Box::new(FlagRule::new(1, "Audit").with_meta(|m| m.audit_only())));
        let summary = controller.run_fix_phase(&Selection::All);

        assert_eq!(summary.get(1).unwrap().status, RuleStatus::NonCompliant);
        assert!(controller.context().changes.events().is_empty());
    }

    #[test]
    fn test_panic_isolated() {
        let mut controller = controller(0);
        let mut broken = FlagRule::new(1, "Broken");
        broken.panic_on_report = true;
        controller.add_rule(Box::new(broken));
        let mut ok = FlagRule::new(2, "Ok");
        ok.compliant = true;
        controller.add_rule(Box::new(ok));

        let summary = controller.run_report_phase(&Selection::All);
        let result = summary.get(1).unwrap();
        assert_eq!(result.status, RuleStatus::Panicked);
        assert!(result.detailed_results.contains("inspection blew up"));
        assert_eq!(summary.get(2).unwrap().status, RuleStatus::Compliant);
        assert_eq!(summary.errors, 1);
        assert_eq!(controller.rules().len(), 2);
    }

    #[test]
    fn test_selection_limits_phase() {
        let mut controller = controller(0);
        controller.add_rule(Box::new(FlagRule::new(1, "One")));
        controller.add_rule(Box::new(FlagRule::new(2, "Two")));

        let selection = Selection::from_modules(&["two", "three"]);
        assert_eq!(controller.unknown_names(&selection), vec!["three".to_string()]);

        let summary = controller.run_fix_phase(&selection);
        assert_eq!(summary.results.len(), 1);
        assert!(summary.by_name("Two").is_some());

        let summary = controller.run_undo_phase(&selection);
        assert_eq!(summary.get(2).unwrap().status, RuleStatus::Reverted);
        assert!(controller.context().changes.events().is_empty());
    }

    #[test]
    fn test_config_round_trip() {
        let mut controller = controller(0);
        controller.add_rule(Box::new(FlagRule::new(1, "One")));
        controller.add_rule(Box::new(FlagRule::new(2, "Two")));

        let mut config = RuleConfigFile::new();
        config.set("One", "ONE", CiValue::Bool(false));
        config.set("Two", "TWO", CiValue::String("maybe".into()));
        let rejected = controller.apply_config(&config);
        assert_eq!(rejected, vec![("Two".to_string(), "TWO".to_string())]);
        assert!(!controller.rules()[0].core().is_enabled());
        assert!(controller.rules()[1].core().is_enabled());

        let exported = controller.export_config(SaveMode::Simple);
        assert_eq!(exported.get("One", "ONE"), Some(&CiValue::Bool(false)));
        assert_eq!(exported.get("Two", "TWO"), Some(&CiValue::Bool(true)));
    }
}

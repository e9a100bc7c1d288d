//! Bastion - Host hardening agent
//!
//! Entry point for the `bastion` binary. One invocation runs one phase:
//! - `--report`: inspect every applicable rule and report compliance
//! - `--fix`: remediate non-compliant rules, recording every change
//! - `--rollback`: revert the changes recorded by earlier fixes

use anyhow::{Context, Result};
use bastion_changelog::StateChangeLogger;
use bastion_common::config::Config;
use bastion_common::logging::{init_logging_with_config, LogConfig, LogFormat};
use bastion_common::{RuleConfigFile, SaveMode};
use bastion_core::HostDescriptor;
use bastion_rules::{PhaseSummary, RuleContext, RuleController, RuleRegistry, Selection};
use clap::error::ErrorKind;
use clap::{ArgGroup, CommandFactory, Parser};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Bastion host hardening agent
#[derive(Parser, Debug)]
#[command(name = "bastion")]
#[command(version)]
#[command(about = "Audit, harden and roll back host security settings", long_about = None)]
#[command(group(
    ArgGroup::new("phase")
        .args(["report", "fix", "rollback"])
        .multiple(false)
))]
struct Args {
    /// Report compliance without changing anything
    #[arg(short, long)]
    report: bool,

    /// Fix non-compliant rules
    #[arg(short, long)]
    fix: bool,

    /// Revert changes recorded by earlier fixes
    #[arg(long)]
    rollback: bool,

    /// Only run these rules (comma separated, repeatable)
    #[arg(short, long = "module", value_name = "NAME")]
    modules: Vec<String>,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Log format (compact, pretty, json)
    #[arg(long)]
    log_format: Option<String>,

    /// List the rules applicable to this host and exit
    #[arg(long, conflicts_with_all = ["phase", "print_config"])]
    list: bool,

    /// Write the rule settings file (simple or full) and exit
    #[arg(long, value_name = "MODE", conflicts_with = "phase")]
    print_config: Option<String>,

    /// Output format for results (text, json)
    #[arg(long, default_value = "text")]
    format: String,
}

fn default_config_path() -> PathBuf {
    PathBuf::from("/etc/bastion/bastion.toml")
}

fn main() -> Result<()> {
    let args = Args::parse();
    if !(args.report || args.fix || args.rollback || args.list || args.print_config.is_some()) {
        Args::command()
            .error(
                ErrorKind::MissingRequiredArgument,
                "one of --report, --fix or --rollback is required",
            )
            .exit();
    }

    let config_path = args.config.clone().unwrap_or_else(default_config_path);
    let config = if config_path.exists() {
        Config::from_file(&config_path)?
    } else {
        Config::default()
    };
    let config = config.merge_env();

    let mut log_config = LogConfig::from_settings(&config.logging)?;
    if let Some(level) = &args.log_level {
        log_config = log_config.level(level);
    }
    if let Some(format) = &args.log_format {
        log_config = log_config.format(format.parse::<LogFormat>()?);
    }
    init_logging_with_config(log_config)?;

    info!("Bastion v{}", env!("CARGO_PKG_VERSION"));
    if config_path.exists() {
        info!("Loaded config from: {}", config_path.display());
    } else {
        debug!("Config file {} not found, using defaults", config_path.display());
    }

    let host = config.host.apply(HostDescriptor::detect());
    info!("Host: {}", host.summary());

    let changes = StateChangeLogger::open(config.paths.event_log(), config.paths.archive_dir())
        .with_context(|| format!("opening change log {}", config.paths.event_log().display()))?;
    info!("Change log: {}", changes.location());

    let mut controller = RuleController::new(RuleContext::new(host, Arc::new(changes)));
    controller.load_all_rules(&RuleRegistry::with_builtin_rules());

    let settings = RuleConfigFile::load(&config.paths.rule_config)?;
    for (rule, key) in controller.apply_config(&settings) {
        warn!("Ignoring invalid setting {}.{}", rule, key);
    }

    if args.list {
        return list_rules(&controller, &args.format);
    }
    if let Some(mode) = &args.print_config {
        let mode: SaveMode = mode.parse()?;
        let exported = controller.export_config(mode);
        exported.save(&config.paths.rule_config)?;
        println!("{}", exported.to_toml()?);
        info!("Wrote rule settings to {}", config.paths.rule_config.display());
        return Ok(());
    }

    let selection = Selection::from_modules(&args.modules);
    for name in controller.unknown_names(&selection) {
        warn!("No rule named {}", name);
    }

    let summary = if args.report {
        controller.run_report_phase(&selection)
    } else if args.fix {
        controller.run_fix_phase(&selection)
    } else {
        controller.run_undo_phase(&selection)
    };

    match args.format.as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&summary)?),
        _ => print_summary_text(&summary),
    }

    let code = summary.exit_code();
    if code != 0 {
        warn!("{} phase finished with failures", summary.phase);
        std::process::exit(code);
    }
    Ok(())
}

/// Print the rules that can run on this host
fn list_rules(controller: &RuleController, format: &str) -> Result<()> {
    let rules = controller.applicable_rules();

    match format {
        "json" => {
            let output: Vec<_> = rules
                .iter()
                .map(|r| {
                    serde_json::json!({
                        "number": r.number(),
                        "name": r.name(),
                        "mandatory": r.metadata().mandatory,
                        "audit_only": r.metadata().audit_only,
                        "help": r.metadata().help,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        _ => {
            println!("\n{:<8} {:<30} {}", "NUMBER", "NAME", "DESCRIPTION");
            println!("{}", "-".repeat(80));
            for r in rules {
                println!("{:<8} {:<30} {}", r.number(), r.name(), r.metadata().help);
            }
        }
    }

    Ok(())
}

/// Print phase results as text
fn print_summary_text(summary: &PhaseSummary) {
    println!("\n=== Bastion {} results ===\n", summary.phase);

    for result in summary.results.values() {
        println!("[{}] {}({})", result.status, result.name, result.number);
        for line in result.detailed_results.lines() {
            println!("    {}", line);
        }
        println!();
    }

    println!("Summary:");
    println!("  Ran:            {}", summary.ran());
    println!("  Compliant:      {}", summary.compliant);
    println!("  Non-compliant:  {}", summary.non_compliant);
    println!("  Not applicable: {}", summary.not_applicable);
    if summary.reverted > 0 {
        println!("  Reverted:       {}", summary.reverted);
    }
    println!("  Errors:         {}", summary.errors);
}

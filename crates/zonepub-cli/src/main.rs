//! zonepub - publish DNS zones from a git repository
//!
//! ## Commands
//!
//! - `check`: validate the current revision without touching state or the target
//! - `publish`: validate, transfer, reload and record the new baseline
//! - `status`: show the recorded baseline and the name server's status

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use tracing::{info, Level};
use zonepub_core::{
    ChangeSet, ControlPlane, Normalization, PublishConfig, StateStore, TargetConfig, Timeouts,
    ValidationResult, ZoneListConfig,
};
use zonepub_pipeline::{
    CheckReport, CommandChecker, CommandControlPlane, FileLease, GitRevisionSource,
    PublishOrchestrator, PublishReport, PublishTarget, RsyncTransport,
};
use zonepub_state::FsStateStore;

#[derive(Parser)]
#[command(name = "zonepub")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Validate and publish DNS zones with automatic serials", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON log lines and JSON reports
    #[arg(long, global = true)]
    json: bool,

    #[command(flatten)]
    settings: Settings,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the current revision; exits non-zero on any diagnostic
    Check {
        /// Date used for serial allocation (default: today, UTC)
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Validate, transfer, reload and commit the current revision
    Publish {
        /// Date used for serial allocation (default: today, UTC)
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Show the published baseline and the remote status
    Status,
}

/// Settings shared by every command. Unset flags fall back to the JSON
/// config file, then to built-in defaults.
#[derive(Args, Debug)]
struct Settings {
    /// JSON file with a full publish configuration
    #[arg(long, global = true, env = "ZONEPUB_CONFIG")]
    config: Option<PathBuf>,

    /// Git repository holding zones and config
    #[arg(long, global = true, env = "ZONEPUB_REPO", default_value = ".")]
    repo: PathBuf,

    /// Git reference to publish
    #[arg(long, global = true, env = "ZONEPUB_REFERENCE", default_value = "HEAD")]
    reference: String,

    /// Zone directory inside the repository
    #[arg(long, global = true, env = "ZONEPUB_ZONES_DIR")]
    zones_dir: Option<PathBuf>,

    /// Config directory inside the repository
    #[arg(long, global = true, env = "ZONEPUB_CONFIG_DIR")]
    config_dir: Option<PathBuf>,

    /// File suffix of zone files
    #[arg(long, global = true, env = "ZONEPUB_ZONE_SUFFIX")]
    zone_suffix: Option<String>,

    /// Main config file checked as a whole (relative to the config directory)
    #[arg(long, global = true, env = "ZONEPUB_CONFIG_ENTRY")]
    config_entry: Option<PathBuf>,

    /// Local staging directory
    #[arg(long, global = true, env = "ZONEPUB_BUILD_DIR")]
    build_dir: Option<PathBuf>,

    /// Publish state file
    #[arg(long, global = true, env = "ZONEPUB_STATE")]
    state: Option<PathBuf>,

    /// Lock file serializing publish runs
    #[arg(long, global = true, env = "ZONEPUB_LEASE")]
    lease: Option<PathBuf>,

    /// Zone comparison mode: normalized or exact
    #[arg(long, global = true, env = "ZONEPUB_NORMALIZATION")]
    normalization: Option<Normalization>,

    /// Accept zones removed from the repository
    #[arg(long, global = true, env = "ZONEPUB_ALLOW_DELETIONS")]
    allow_deletions: bool,

    /// Accept $ORIGIN values that differ from the file name
    #[arg(long, global = true, env = "ZONEPUB_ALLOW_FANCY_NAMES")]
    allow_fancy_names: bool,

    /// Skip the PTR trailing-dot lint
    #[arg(long, global = true, env = "ZONEPUB_NO_PTR_CHECK")]
    no_ptr_check: bool,

    /// Treat every zone as changed
    #[arg(long, global = true, env = "ZONEPUB_ALL_ZONES")]
    all_zones: bool,

    /// Skip the trailing-whitespace lint on changed zones
    #[arg(long, global = true, env = "ZONEPUB_IGNORE_WHITESPACE_ERRORS")]
    ignore_whitespace_errors: bool,

    /// JSON zone-list template (relative to the config directory)
    #[arg(
        long,
        global = true,
        env = "ZONEPUB_ZONE_LIST_TEMPLATE",
        requires = "zone_list_output"
    )]
    zone_list_template: Option<PathBuf>,

    /// Rendered zone-list file (relative to the config directory)
    #[arg(
        long,
        global = true,
        env = "ZONEPUB_ZONE_LIST_OUTPUT",
        requires = "zone_list_template"
    )]
    zone_list_output: Option<PathBuf>,

    /// Only list zones matching these patterns (`example.com`, `*.arpa`, `*`)
    #[arg(long, global = true, value_delimiter = ',', env = "ZONEPUB_ZONE_ALLOW")]
    zone_allow: Vec<String>,

    /// Never list zones matching these patterns
    #[arg(long, global = true, value_delimiter = ',', env = "ZONEPUB_ZONE_DENY")]
    zone_deny: Vec<String>,

    /// rsync destination, e.g. ns1.example.net:/var/lib/knot/publish/;
    /// repeat to publish to several name servers
    #[arg(long, global = true, value_delimiter = ',', env = "ZONEPUB_DESTINATION")]
    destination: Vec<String>,

    /// rsync exclude patterns, applied to every target
    #[arg(long, global = true, value_delimiter = ',', env = "ZONEPUB_EXCLUDE")]
    exclude: Vec<String>,

    /// Config check command; {path} is the staged file
    #[arg(long, global = true, env = "ZONEPUB_CHECK_CONFIG_CMD")]
    check_config_cmd: Option<String>,

    /// Zone check command; {zone} and {path} are substituted
    #[arg(long, global = true, env = "ZONEPUB_CHECK_ZONE_CMD")]
    check_zone_cmd: Option<String>,

    /// Full reload command, applied to every target
    #[arg(long, global = true, env = "ZONEPUB_RELOAD_CMD")]
    reload_cmd: Option<String>,

    /// Per-zone reload command; {zone} is substituted
    #[arg(long, global = true, env = "ZONEPUB_RELOAD_ZONE_CMD")]
    reload_zone_cmd: Option<String>,

    /// Status command
    #[arg(long, global = true, env = "ZONEPUB_STATUS_CMD")]
    status_cmd: Option<String>,

    /// Timeout for each external command in seconds (0 disables)
    #[arg(long, global = true, env = "ZONEPUB_TIMEOUT")]
    timeout: Option<u64>,
}

fn split_command(command: &str) -> Vec<String> {
    command.split_whitespace().map(str::to_string).collect()
}

impl Settings {
    fn base_config(&self) -> Result<PublishConfig> {
        match &self.config {
            Some(path) => {
                let raw = std::fs::read(path)
                    .with_context(|| format!("Failed to read config file {}", path.display()))?;
                serde_json::from_slice(&raw)
                    .with_context(|| format!("Invalid config file {}", path.display()))
            }
            None => Ok(PublishConfig::default()),
        }
    }

    /// Merge flags over the config file.
    fn resolve(&self) -> Result<PublishConfig> {
        let mut config = self.base_config()?;

        if let Some(v) = &self.zones_dir {
            config.zones_dir = v.clone();
        }
        if let Some(v) = &self.config_dir {
            config.config_dir = v.clone();
        }
        if let Some(v) = &self.zone_suffix {
            config.zone_suffix = v.clone();
        }
        if let Some(v) = &self.config_entry {
            config.config_entry = Some(v.clone());
        }
        if let Some(v) = &self.build_dir {
            config.build_dir = v.clone();
        }
        if let Some(v) = &self.state {
            config.state_path = v.clone();
        }
        if let Some(v) = &self.lease {
            config.lease_path = v.clone();
        }
        if let Some(v) = self.normalization {
            config.normalization = v;
        }
        config.allow_deletions |= self.allow_deletions;
        config.allow_fancy_names |= self.allow_fancy_names;
        config.check_ptr_dots &= !self.no_ptr_check;
        config.force_all_zones |= self.all_zones;
        config.ignore_whitespace_errors |= self.ignore_whitespace_errors;

        if let (Some(template), Some(output)) = (&self.zone_list_template, &self.zone_list_output) {
            config.zone_list = Some(ZoneListConfig {
                template: template.clone(),
                output: output.clone(),
                allow: self.zone_allow.clone(),
                deny: self.zone_deny.clone(),
            });
        } else if let Some(zone_list) = &mut config.zone_list {
            if !self.zone_allow.is_empty() {
                zone_list.allow = self.zone_allow.clone();
            }
            if !self.zone_deny.is_empty() {
                zone_list.deny = self.zone_deny.clone();
            }
        }

        if !self.destination.is_empty() {
            let control = config.targets.first().cloned().unwrap_or_default().control;
            config.targets = self
                .destination
                .iter()
                .map(|dest| TargetConfig::for_destination(dest, control.clone()))
                .collect();
        }

        let commands = &mut config.commands;
        for (flag, slot) in [
            (&self.check_config_cmd, &mut commands.check_config),
            (&self.check_zone_cmd, &mut commands.check_zone),
        ] {
            if let Some(command) = flag {
                *slot = split_command(command);
            }
        }

        for target in &mut config.targets {
            if !self.exclude.is_empty() {
                target.transport.excludes = self.exclude.clone();
            }
            let control = &mut target.control;
            for (flag, slot) in [
                (&self.reload_cmd, &mut control.reload),
                (&self.reload_zone_cmd, &mut control.reload_zone),
                (&self.status_cmd, &mut control.status),
            ] {
                if let Some(command) = flag {
                    *slot = split_command(command);
                }
            }
        }

        if let Some(secs) = self.timeout {
            config.timeouts = Timeouts {
                revision_secs: secs,
                check_secs: secs,
                transfer_secs: secs,
                reload_secs: secs,
            };
        }

        Ok(config)
    }
}

fn control_plane(target: &TargetConfig, timeouts: Timeouts) -> CommandControlPlane {
    CommandControlPlane::new(&target.control, Timeouts::as_duration(timeouts.reload_secs))
}

fn build_orchestrator(settings: &Settings, config: PublishConfig) -> PublishOrchestrator {
    let timeouts = config.timeouts;
    let source = GitRevisionSource::new(
        &settings.repo,
        &config,
        Timeouts::as_duration(timeouts.revision_secs),
    )
    .with_reference(settings.reference.clone());

    let targets = config
        .targets
        .iter()
        .map(|target| {
            PublishTarget::new(
                target.name.clone(),
                Arc::new(RsyncTransport::new(
                    &target.transport,
                    Timeouts::as_duration(timeouts.transfer_secs),
                )),
                Arc::new(control_plane(target, timeouts)),
            )
        })
        .collect();

    PublishOrchestrator::new(
        config.clone(),
        Arc::new(FsStateStore::new(&config.state_path)),
        Arc::new(source),
        Arc::new(CommandChecker::new(
            &config.commands,
            Timeouts::as_duration(timeouts.check_secs),
        )),
        targets,
        Arc::new(FileLease::new(&config.lease_path)),
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    zonepub_core::init_tracing(cli.json, level);

    let config = cli.settings.resolve()?;

    match cli.command {
        Commands::Check { date } => {
            cmd_check(&cli.settings, config, run_date(date), cli.json).await
        }
        Commands::Publish { date } => {
            cmd_publish(&cli.settings, config, run_date(date), cli.json).await
        }
        Commands::Status => cmd_status(config, cli.json).await,
    }
}

fn run_date(date: Option<NaiveDate>) -> NaiveDate {
    date.unwrap_or_else(|| Utc::now().date_naive())
}

async fn cmd_check(
    settings: &Settings,
    config: PublishConfig,
    today: NaiveDate,
    json: bool,
) -> Result<()> {
    let orchestrator = build_orchestrator(settings, config);
    let report = orchestrator.check(today).await.context("Check failed to run")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_check(&report);
    }

    if report.passed() {
        Ok(())
    } else {
        anyhow::bail!(
            "Validation failed with {} diagnostic(s)",
            report.validation.diagnostics.len()
        )
    }
}

fn print_check(report: &CheckReport) {
    println!("Revision: {}", report.revision);
    println!("Published: {}", display_revision(&report.published_revision));
    print_changes(&report.changes, &report.serials);
    println!();
    print_validation(&report.validation);
}

async fn cmd_publish(
    settings: &Settings,
    config: PublishConfig,
    today: NaiveDate,
    json: bool,
) -> Result<()> {
    let orchestrator = build_orchestrator(settings, config);
    let result = orchestrator.publish(today).await;

    let report = match result {
        Ok(report) => report,
        Err(e) => {
            if let Some(validation) = e.validation() {
                print_validation(validation);
            }
            return Err(e).context("Publish failed");
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_publish(&report);
    }
    info!(run_id = %report.run_id, "publish complete");
    Ok(())
}

fn print_publish(report: &PublishReport) {
    println!("Run ID: {}", report.run_id);
    println!(
        "Revision: {} -> {}",
        display_revision(&report.published_revision),
        report.revision
    );
    print_changes(&report.source_changes, &report.serials);
    for target in &report.targets {
        println!("Reload {} ({}): {}", target.name, target.destination, target.plan);
    }
    println!("Duration: {}ms", report.duration_ms);
    for target in &report.targets {
        if let Some(status) = &target.status {
            println!();
            println!("Server status ({}):", target.name);
            for line in status.lines() {
                println!("  {}", line);
            }
        }
    }
}

fn print_changes(changes: &ChangeSet, serials: &BTreeMap<String, u32>) {
    if changes.is_empty() {
        println!("Changes: none");
        return;
    }
    println!("Changes:");
    for zone in &changes.changed_zones {
        match serials.get(zone) {
            Some(serial) => println!("  ~ {} (serial {})", zone, serial),
            None => println!("  ~ {}", zone),
        }
    }
    for zone in &changes.deleted_zones {
        println!("  - {}", zone);
    }
    if changes.config_changed {
        println!("  ~ configuration");
    }
}

fn print_validation(validation: &ValidationResult) {
    if validation.ok {
        println!("✓ Validation passed");
        return;
    }
    println!("✗ Validation failed:");
    for diagnostic in &validation.diagnostics {
        println!("  - {}", diagnostic);
    }
}

fn display_revision(revision: &str) -> &str {
    if revision.is_empty() {
        "(nothing published)"
    } else {
        revision
    }
}

async fn cmd_status(config: PublishConfig, json: bool) -> Result<()> {
    let state = load_state(&config.state_path).await?;
    let mut servers = BTreeMap::new();
    for target in &config.targets {
        let remote = control_plane(target, config.timeouts)
            .status()
            .await
            .with_context(|| format!("Failed to query status of {}", target.name))?;
        servers.insert(target.name.clone(), remote);
    }

    if json {
        let out = serde_json::json!({ "state": state, "servers": servers });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("Published revision: {}", display_revision(&state.revision));
    println!("Zones: {}", state.serials.len());
    for (zone, serial) in &state.serials {
        println!("  {:<40} {}", zone, serial);
    }
    if let Some(pending) = &state.pending {
        let mut owed: Vec<&str> = pending.changed_zones.iter().map(String::as_str).collect();
        if pending.config_changed || !pending.deleted_zones.is_empty() {
            owed.push("(full reload)");
        }
        println!();
        println!("Reload pending for {}: {}", pending.revision, owed.join(" "));
    }
    for (name, remote) in &servers {
        println!();
        println!("Server status ({}):", name);
        for line in remote.lines() {
            println!("  {}", line);
        }
    }
    Ok(())
}

async fn load_state(path: &Path) -> Result<zonepub_core::PublishState> {
    FsStateStore::new(path)
        .load()
        .await
        .with_context(|| format!("Failed to load publish state from {}", path.display()))
}

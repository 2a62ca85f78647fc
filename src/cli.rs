//! CLI interface for portal-telemetry

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::audit::{AuditFilter, AuditLevel, ExportFormat};
use crate::config::{self, TelemetryConfig};
use crate::offline::RequestDescriptor;
use crate::runtime::Telemetry;
use crate::types::Event;

#[derive(Parser)]
#[command(name = "portal-telemetry")]
#[command(about = "Inspect usage learning, audit trail and offline queue of the citizen portal", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to the user config directory)
    #[arg(short, long, env = "PORTAL_TELEMETRY_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding persisted telemetry data
    #[arg(short, long, env = "PORTAL_TELEMETRY_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show usage counters
    Stats {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Feed a JSON-lines file of events through the pipeline
    Ingest {
        /// File with one event per line
        file: PathBuf,
    },
    /// Show suggestions for the current location
    Suggest,
    /// Predict the next destinations
    Predict {
        /// Location to predict from (defaults to the last known location)
        #[arg(short, long)]
        from: Option<String>,
    },
    /// Show optimization notes
    Optimize,
    /// Inspect the audit trail
    Audit {
        #[command(subcommand)]
        command: AuditCommands,
    },
    /// Inspect and replay the offline queue
    Queue {
        #[command(subcommand)]
        command: QueueCommands,
    },
    /// Manage automation rules
    Rules {
        #[command(subcommand)]
        command: RuleCommands,
    },
    /// Configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Delete all persisted telemetry data
    Clear {
        /// Skip confirmation
        #[arg(short, long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum AuditCommands {
    /// List entries, newest first
    List {
        /// Only entries of this type
        #[arg(short = 't', long = "type")]
        event_type: Option<String>,
        /// Only entries of this level
        #[arg(short, long)]
        level: Option<AuditLevel>,
        /// Only entries of this user
        #[arg(short, long)]
        user: Option<String>,
    },
    /// Export entries as JSON or CSV
    Export {
        #[arg(short, long, default_value = "json")]
        format: ExportFormat,
        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Counts per level
    Stats,
}

#[derive(Subcommand)]
enum QueueCommands {
    /// List queued operations
    List,
    /// Queue a request for replay
    Add {
        method: String,
        url: String,
        #[arg(short, long)]
        body: Option<String>,
    },
    /// Replay queued operations now
    Sync {
        /// Base URL for relative request targets
        #[arg(long)]
        base_url: Option<String>,
    },
}

#[derive(Subcommand)]
enum RuleCommands {
    List,
    Add {
        name: String,
        /// Location prefix that fires the rule
        trigger: String,
        action: String,
    },
    Enable { id: String },
    Disable { id: String },
    Remove { id: String },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration
    Show,
    /// Print the built-in defaults
    Defaults,
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

impl Commands {
    /// Whether state should be flushed once the command finishes.
    /// `clear` must leave the removed keys absent.
    fn persists_state(&self) -> bool {
        !matches!(self, Commands::Clear { .. } | Commands::Config { .. })
    }
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let mut config = match cli.config {
        Some(ref path) => TelemetryConfig::load_from(path)?,
        None => TelemetryConfig::load()?,
    };
    if let Some(dir) = cli.data_dir {
        config.storage.data_dir = Some(dir);
    }

    match &cli.command {
        Commands::Config { command } => {
            match command {
                ConfigCommands::Show => {
                    let rendered = toml::to_string_pretty(&config).context("Failed to render config")?;
                    println!("{}", rendered);
                    println!("# data dir: {}", config.resolved_data_dir()?.display());
                }
                ConfigCommands::Defaults => {
                    print!("{}", config::default_config_toml());
                }
                ConfigCommands::Init { force } => {
                    let path = match cli.config.clone() {
                        Some(path) => path,
                        None => config::config_path()?,
                    };
                    if path.exists() && !*force {
                        bail!("{} already exists (use --force to overwrite)", path.display());
                    }
                    TelemetryConfig::default().save_to(&path)?;
                    println!("Wrote default configuration to {}", path.display());
                }
            }
            return Ok(());
        }
        Commands::Queue {
            command: QueueCommands::Sync { base_url: Some(url) },
        } => {
            config.offline.base_url = Some(url.clone());
        }
        _ => {}
    }

    let telemetry = Telemetry::builder(config).build()?;
    let persist = cli.command.persists_state();

    match cli.command {
        Commands::Stats { json } => {
            let stats = telemetry.get_stats().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("Telemetry Statistics");
                println!("====================");
                println!("Navigations:       {}", stats.total_navigations);
                println!("Interactions:      {}", stats.total_interactions);
                println!("Form interactions: {}", stats.total_form_interactions);
                println!("Errors:            {}", stats.total_errors);
                println!("Automation rules:  {} ({} enabled)", stats.automation_rules, stats.enabled_rules);
                println!("Audit entries:     {}", stats.audit_entries);
                println!("Queued operations: {}", stats.queued_operations);
            }
        }
        Commands::Ingest { file } => {
            let count = ingest(&telemetry, &file).await?;
            println!("Ingested {} events from {}", count, file.display());
        }
        Commands::Suggest => {
            let suggestions = telemetry.generate_suggestions().await;
            if suggestions.is_empty() {
                println!("No suggestions yet.");
            }
            for s in &suggestions {
                println!("[{}] {}", s.priority, s.title);
                println!("    {}", s.description);
            }
        }
        Commands::Predict { from } => {
            let predictions = match from {
                Some(location) => telemetry.predictions_from(&location).await,
                None => telemetry.get_predictions().await,
            };
            if predictions.is_empty() {
                println!("Not enough navigation history to predict.");
            }
            for p in &predictions {
                println!("{:>5.1}%  {}", p.confidence * 100.0, p.action);
            }
        }
        Commands::Optimize => {
            let notes = telemetry.get_optimizations().await;
            if notes.is_empty() {
                println!("Nothing to optimize.");
            }
            for n in &notes {
                println!("[{}] {}", n.priority, n.message);
            }
        }
        Commands::Audit { command } => match command {
            AuditCommands::List {
                event_type,
                level,
                user,
            } => {
                let filter = AuditFilter {
                    event_type,
                    level,
                    user_id: user,
                    ..Default::default()
                };
                let entries = telemetry.audit_logs(&filter).await;
                if entries.is_empty() {
                    println!("No audit entries.");
                }
                for e in &entries {
                    println!(
                        "{} {:<8} {:<20} {}",
                        e.timestamp.format("%Y-%m-%d %H:%M:%S"),
                        e.level,
                        e.event_type,
                        crate::truncate_safe(&serde_json::to_string(&e.data)?, 80)
                    );
                }
            }
            AuditCommands::Export { format, output } => {
                let rendered = telemetry.export_audit(format, &AuditFilter::default()).await?;
                match output {
                    Some(path) => {
                        std::fs::write(&path, rendered)
                            .with_context(|| format!("Failed to write {}", path.display()))?;
                        println!("Exported audit log to {}", path.display());
                    }
                    None => print!("{}", rendered),
                }
            }
            AuditCommands::Stats => {
                let stats = telemetry.audit_stats().await;
                println!("Audit entries: {} (logging {})", stats.total, if stats.enabled { "enabled" } else { "disabled" });
                for (level, count) in &stats.by_level {
                    println!("  {:<8} {}", level, count);
                }
            }
        },
        Commands::Queue { command } => match command {
            QueueCommands::List => {
                let operations = telemetry.queued_operations().await;
                if operations.is_empty() {
                    println!("Offline queue is empty.");
                }
                for op in &operations {
                    println!(
                        "{}  {} {:<6} {}",
                        op.id,
                        op.occurred_at.format("%Y-%m-%d %H:%M:%S"),
                        op.request_descriptor.method,
                        op.request_descriptor.url
                    );
                }
            }
            QueueCommands::Add { method, url, body } => {
                let mut request = RequestDescriptor::new(&method, &url);
                if let Some(body) = body {
                    request = request
                        .with_header("Content-Type", "application/json")
                        .with_body(body);
                }
                match telemetry.record_failed_request(request).await? {
                    Some(id) => println!("Queued {}", id),
                    None => bail!("Only POST, PUT, PATCH and DELETE requests are queued"),
                }
            }
            QueueCommands::Sync { .. } => {
                let report = telemetry.sync().await;
                println!(
                    "Replayed {} of {} ({} failed, {} remaining)",
                    report.replayed, report.attempted, report.failed, report.remaining
                );
            }
        },
        Commands::Rules { command } => match command {
            RuleCommands::List => {
                let rules = telemetry.rules().await;
                if rules.is_empty() {
                    println!("No automation rules.");
                }
                for r in &rules {
                    let state = if r.enabled { "on " } else { "off" };
                    println!("{} [{}] {} -> {} ({})", r.id, state, r.trigger, r.action, r.name);
                }
            }
            RuleCommands::Add { name, trigger, action } => {
                let id = telemetry.add_rule(&name, &trigger, &action).await?;
                println!("Added rule {}", id);
            }
            RuleCommands::Enable { id } => telemetry.set_rule_enabled(&id, true).await?,
            RuleCommands::Disable { id } => telemetry.set_rule_enabled(&id, false).await?,
            RuleCommands::Remove { id } => {
                if !telemetry.remove_rule(&id).await? {
                    bail!("Automation rule not found: {}", id);
                }
            }
        },
        Commands::Clear { yes } => {
            if !yes {
                eprintln!("This deletes learning data, audit log, offline queue and rules. Re-run with --yes.");
                return Ok(());
            }
            telemetry.clear_all().await?;
            println!("Telemetry data cleared.");
        }
        Commands::Config { .. } => {}
    }

    if persist {
        telemetry.flush().await?;
    }
    Ok(())
}

/// Push every event of a JSON-lines file through the pipeline
async fn ingest(telemetry: &Telemetry, path: &std::path::Path) -> Result<usize> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let mut count = 0;
    for (n, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let event: Event = serde_json::from_str(line)
            .with_context(|| format!("Invalid event on line {}", n + 1))?;
        telemetry.handle_event(event).await;
        count += 1;
    }
    Ok(count)
}

//! CLI entry point for the driftwatch monitoring tool.
//! Provides clap-based command routing, exit code mapping based on error
//! kind, and table/json/yaml output selection.

mod output;

use std::path::PathBuf;
use std::process;
use std::time::Duration;

use clap::{Parser, Subcommand};
use colored::Colorize;

use driftwatch_core::commands::ci;
use driftwatch_core::config::{CliOverrides, DriftWatchConfig, DEFAULT_CONFIG_FILE};
use driftwatch_core::endpoint::{parse_duration, Endpoint, HttpMethod};
use driftwatch_core::error::{DriftWatchError, ErrorKind};
use driftwatch_core::storage::{AlertFilter, AlertStatus};
use driftwatch_core::{CiOptions, CleanupOptions, DriftWatch};

/// Print a report as JSON or YAML (per `--output`) or via a terminal
/// formatter for the default table mode.
macro_rules! print_report {
    ($report:expr, $mode:expr, $printer:path) => {
        match $mode {
            OutputMode::Json => println!(
                "{}",
                serde_json::to_string_pretty(&$report).expect("JSON serialization failed")
            ),
            OutputMode::Yaml => print!(
                "{}",
                serde_yaml::to_string(&$report).expect("YAML serialization failed")
            ),
            OutputMode::Table => $printer(&$report),
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Table,
    Json,
    Yaml,
}

impl std::str::FromStr for OutputMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "table" => Ok(OutputMode::Table),
            "json" => Ok(OutputMode::Json),
            "yaml" => Ok(OutputMode::Yaml),
            _ => Err(format!("invalid output mode '{}': use table, json, or yaml", s)),
        }
    }
}

/// Top-level CLI definition with global flags and subcommand dispatch.
#[derive(Parser)]
#[command(
    name = "driftwatch",
    about = "Watch HTTP APIs for drift against baselines and OpenAPI specs",
    version,
    propagate_version = true
)]
struct Cli {
    /// Config file path (default: .driftwatch.yaml)
    #[arg(short, long, value_name = "PATH", global = true)]
    config: Option<String>,

    /// Database path (overrides config)
    #[arg(long, value_name = "PATH", global = true)]
    database: Option<String>,

    /// Output format: table, json, yaml
    #[arg(short, long, value_name = "FORMAT", default_value = "table", global = true)]
    output: OutputMode,

    /// Enable verbose/debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

/// All available driftwatch subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Create a starter config file
    Init,

    /// Inspect or validate the configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Add an endpoint to the database
    Add {
        /// Target URL (http or https)
        url: String,
        /// Endpoint id (derived from the URL when omitted)
        #[arg(long, value_name = "ID")]
        id: Option<String>,
        /// HTTP method
        #[arg(long, default_value = "GET")]
        method: String,
        /// Polling interval (e.g. 5m)
        #[arg(long, value_name = "DUR")]
        interval: Option<String>,
        /// Per-request timeout (e.g. 30s)
        #[arg(long, value_name = "DUR")]
        timeout: Option<String>,
        /// Request header, repeatable (Name: value)
        #[arg(long = "header", value_name = "HDR")]
        headers: Vec<String>,
        /// OpenAPI spec file to validate against
        #[arg(long, value_name = "PATH")]
        spec: Option<PathBuf>,
        /// Register the endpoint disabled
        #[arg(long)]
        disabled: bool,
    },

    /// List stored endpoints
    List,

    /// Remove an endpoint and its history
    Remove {
        /// Endpoint id
        id: String,
    },

    /// Update a stored endpoint
    Update {
        /// Endpoint id
        id: String,
        /// New target URL
        #[arg(long, value_name = "URL")]
        url: Option<String>,
        /// New HTTP method
        #[arg(long, value_name = "METHOD")]
        method: Option<String>,
        /// New polling interval
        #[arg(long, value_name = "DUR")]
        interval: Option<String>,
        /// New per-request timeout
        #[arg(long, value_name = "DUR")]
        timeout: Option<String>,
        /// Enable the endpoint
        #[arg(long, conflicts_with = "disable")]
        enable: bool,
        /// Disable the endpoint
        #[arg(long)]
        disable: bool,
        /// New OpenAPI spec file
        #[arg(long, value_name = "PATH")]
        spec: Option<PathBuf>,
    },

    /// Run the monitoring loop until interrupted
    Monitor {
        /// Stop after this long (e.g. 1h); runs until SIGINT otherwise
        #[arg(long, value_name = "DUR")]
        duration: Option<String>,
        /// Only monitor these endpoint ids (comma-separated)
        #[arg(long, value_name = "IDS", value_delimiter = ',')]
        endpoints: Vec<String>,
    },

    /// Run one check pass over all enabled endpoints
    Check {
        /// Only check these endpoint ids (comma-separated)
        #[arg(long, value_name = "IDS", value_delimiter = ',')]
        endpoints: Vec<String>,
        /// Overall pass timeout (e.g. 2m)
        #[arg(long, value_name = "DUR")]
        timeout: Option<String>,
    },

    /// Show per-endpoint status from stored history
    Status,

    /// Show a one-line health summary per endpoint
    Health,

    /// Aggregate monitoring report
    Report {
        /// Look-back window (e.g. 24h)
        #[arg(long, value_name = "DUR")]
        period: Option<String>,
    },

    /// Export stored data as JSON
    Export {
        /// Look-back window (e.g. 7d)
        #[arg(long, value_name = "DUR")]
        period: Option<String>,
    },

    /// Alert channel operations
    Alert {
        #[command(subcommand)]
        action: AlertAction,
    },

    /// Capture current responses as a baseline file
    Baseline {
        /// Output file
        #[arg(long, value_name = "PATH", default_value = "driftwatch-baseline.json")]
        output: PathBuf,
    },

    /// Verify a baseline file
    ValidateBaseline {
        /// Baseline file to check
        file: PathBuf,
    },

    /// One-shot CI check with a gating exit code
    Ci {
        /// Output format: json, junit, summary
        #[arg(long, default_value = "summary")]
        format: String,
        /// Gate: breaking, critical, high, medium, low
        #[arg(long = "fail-on", value_name = "LEVEL", default_value = "breaking")]
        fail_on: String,
        /// Compare against this baseline file instead of stored history
        #[arg(long = "baseline-file", value_name = "PATH")]
        baseline_file: Option<PathBuf>,
        /// Write the report here as well as stdout
        #[arg(long = "output-file", value_name = "PATH")]
        output_file: Option<PathBuf>,
        /// Don't persist runs or drifts
        #[arg(long = "no-storage")]
        no_storage: bool,
        /// Report response-time regressions too
        #[arg(long = "include-performance")]
        include_performance: bool,
    },

    /// Prune old rows per the retention settings
    Cleanup {
        /// Override the monitoring-run window (e.g. 30d)
        #[arg(long, value_name = "DUR")]
        monitoring: Option<String>,
        /// Override the drift window
        #[arg(long, value_name = "DUR")]
        drifts: Option<String>,
        /// Override the alert window
        #[arg(long, value_name = "DUR")]
        alerts: Option<String>,
        /// Reclaim space afterwards
        #[arg(long)]
        vacuum: bool,
        /// Include table counts in the report
        #[arg(long)]
        stats: bool,
        /// Count candidates without deleting
        #[arg(long = "dry-run")]
        dry_run: bool,
    },

    /// Snapshot the database to a file
    Backup {
        /// Output file (timestamped name when omitted)
        file: Option<PathBuf>,
    },

    /// Replace the database with a backup file
    Restore {
        /// Backup file to restore from
        file: PathBuf,
        /// Skip backing up the current database first
        #[arg(long = "no-backup")]
        no_backup: bool,
        /// Overwrite the existing database
        #[arg(long)]
        force: bool,
    },

    /// Check integrity and remove orphaned rows
    Repair {
        /// Inspect only
        #[arg(long = "dry-run")]
        dry_run: bool,
        /// Skip the pre-repair backup
        #[arg(long = "no-backup")]
        no_backup: bool,
        /// Repair even when engine corruption is reported
        #[arg(long)]
        force: bool,
    },

    /// Aggregate database health and maintenance recommendations
    DbHealth,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the active config file
    Show,
    /// Load and validate the configuration
    Validate,
    /// Write a starter config file
    Init,
}

#[derive(Subcommand)]
enum AlertAction {
    /// Send a test alert through the configured channels
    Test {
        /// Only this channel
        #[arg(long, value_name = "NAME")]
        channel: Option<String>,
    },
    /// Show recorded alert deliveries
    History {
        /// Filter by channel name
        #[arg(long, value_name = "NAME")]
        channel: Option<String>,
        /// Filter by delivery status (sent, failed, pending, retry)
        #[arg(long, value_name = "STATUS")]
        status: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Set up logging (suppress when structured output is requested)
    let filter = if cli.output != OutputMode::Table {
        "error"
    } else if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };

    env_logger::Builder::new()
        .parse_env(env_logger::Env::default().default_filter_or(filter))
        .format_target(false)
        .format_timestamp(None)
        .init();

    if let Err(e) = run(cli).await {
        print_error(&e);
        process::exit(exit_code(&e));
    }
}

/// Map error kinds to differentiated exit codes.
fn exit_code(error: &DriftWatchError) -> i32 {
    match error.kind() {
        ErrorKind::Config => 3,
        ErrorKind::Network => 4,
        ErrorKind::Validation => 5,
        ErrorKind::Storage | ErrorKind::Alert | ErrorKind::Auth | ErrorKind::System => 1,
    }
}

fn print_error(error: &DriftWatchError) {
    eprintln!(
        "{} [{}] {}",
        "Error:".red().bold(),
        error.code(),
        error
    );
    eprintln!("{} {}", "Hint:".yellow(), error.guidance());
}

fn parse_opt_duration(value: &Option<String>) -> Result<Option<Duration>, DriftWatchError> {
    value.as_deref().map(parse_duration).transpose()
}

/// Build configuration and dispatch the chosen subcommand.
async fn run(cli: Cli) -> Result<(), DriftWatchError> {
    let mode = cli.output;

    // === Commands that don't need config or a database ===

    match &cli.command {
        Commands::Init => return init_config(cli.config.as_deref(), false),
        Commands::Config {
            action: ConfigAction::Init,
        } => return init_config(cli.config.as_deref(), true),
        Commands::ValidateBaseline { file } => {
            let report = DriftWatch::validate_baseline(file);
            print_report!(report, mode, output::print_baseline_validate);
            if !report.valid {
                return Err(DriftWatchError::BaselineInvalid {
                    path: file.display().to_string(),
                    reason: report.errors.join("; "),
                });
            }
            return Ok(());
        }
        Commands::Config {
            action: ConfigAction::Show,
        } => {
            let path = cli.config.as_deref().unwrap_or(DEFAULT_CONFIG_FILE);
            match std::fs::read_to_string(path) {
                Ok(content) => print!("{}", content),
                Err(_) => {
                    return Err(DriftWatchError::ConfigFileNotFound {
                        path: path.to_string(),
                    })
                }
            }
            return Ok(());
        }
        _ => {}
    }

    let overrides = CliOverrides {
        database_url: cli.database.clone(),
        ..Default::default()
    };
    let config = DriftWatchConfig::load(cli.config.as_deref(), &overrides)?;

    if let Commands::Config {
        action: ConfigAction::Validate,
    } = &cli.command
    {
        println!(
            "{}",
            format!(
                "Configuration OK: {} endpoint(s), {} channel(s), {} rule(s)",
                config.endpoints.len(),
                config.alerting.channels.len(),
                config.alerting.rules.len()
            )
            .green()
        );
        return Ok(());
    }

    let database_path = config.global.database_url.clone();
    let dw = DriftWatch::new(config)?;

    match cli.command {
        Commands::Init | Commands::Config { .. } | Commands::ValidateBaseline { .. } => {
            unreachable!("handled above")
        }

        Commands::Add {
            url,
            id,
            method,
            interval,
            timeout,
            headers,
            spec,
            disabled,
        } => {
            let id = id.unwrap_or_else(|| derive_endpoint_id(&url));
            let mut endpoint = Endpoint::new(&id, &url);
            endpoint.method = method.parse::<HttpMethod>()?;
            if let Some(interval) = parse_opt_duration(&interval)? {
                endpoint.config.interval = interval;
            }
            if let Some(timeout) = parse_opt_duration(&timeout)? {
                endpoint.config.timeout = timeout;
            }
            for header in &headers {
                let (name, value) = header.split_once(':').ok_or_else(|| {
                    DriftWatchError::ConfigError(format!(
                        "Invalid header '{}'. Use 'Name: value'.",
                        header
                    ))
                })?;
                endpoint
                    .config
                    .headers
                    .insert(name.trim().to_string(), value.trim().to_string());
            }
            endpoint.spec_file = spec;
            endpoint.config.enabled = !disabled;
            endpoint.validate()?;

            dw.storage().save_endpoint(&endpoint)?;
            println!("{}", format!("Added endpoint '{}'", id).green());
        }

        Commands::List => {
            let endpoints = dw.storage().list_endpoints()?;
            print_report!(endpoints, mode, output::print_endpoint_list);
        }

        Commands::Remove { id } => {
            if dw.storage().delete_endpoint(&id)? {
                println!("{}", format!("Removed endpoint '{}'", id).green());
            } else {
                return Err(DriftWatchError::EndpointNotFound(id));
            }
        }

        Commands::Update {
            id,
            url,
            method,
            interval,
            timeout,
            enable,
            disable,
            spec,
        } => {
            let mut endpoint = dw
                .storage()
                .get_endpoint(&id)?
                .ok_or(DriftWatchError::EndpointNotFound(id.clone()))?;
            if let Some(url) = url {
                endpoint.url = url;
            }
            if let Some(method) = method {
                endpoint.method = method.parse::<HttpMethod>()?;
            }
            if let Some(interval) = parse_opt_duration(&interval)? {
                endpoint.config.interval = interval;
            }
            if let Some(timeout) = parse_opt_duration(&timeout)? {
                endpoint.config.timeout = timeout;
            }
            if enable {
                endpoint.config.enabled = true;
            } else if disable {
                endpoint.config.enabled = false;
            }
            if let Some(spec) = spec {
                endpoint.spec_file = Some(spec);
            }
            endpoint.validate()?;

            dw.storage().save_endpoint(&endpoint)?;
            println!("{}", format!("Updated endpoint '{}'", id).green());
        }

        Commands::Monitor {
            duration,
            endpoints,
        } => {
            let duration = parse_opt_duration(&duration)?;
            let filter = (!endpoints.is_empty()).then_some(endpoints.as_slice());
            run_monitor(&dw, filter, duration).await?;
        }

        Commands::Check { endpoints, timeout } => {
            let timeout = parse_opt_duration(&timeout)?;
            let filter = (!endpoints.is_empty()).then_some(endpoints.as_slice());
            let report = dw.check(filter, timeout).await?;
            print_report!(report, mode, output::print_check_report);
        }

        Commands::Status => {
            let report = dw.status_report()?;
            print_report!(report, mode, output::print_status_report);
        }

        Commands::Health => {
            let report = dw.status_report()?;
            print_report!(report, mode, output::print_health_summary);
        }

        Commands::Report { period } => {
            let report = dw.report(parse_opt_duration(&period)?)?;
            print_report!(report, mode, output::print_monitoring_report);
        }

        Commands::Export { period } => {
            let bundle = dw.export(parse_opt_duration(&period)?)?;
            // Export is always JSON regardless of --output.
            println!(
                "{}",
                serde_json::to_string_pretty(&bundle).expect("JSON serialization failed")
            );
        }

        Commands::Alert { action } => match action {
            AlertAction::Test { channel } => {
                let outcomes = dw.test_alerts(channel.as_deref()).await?;
                output::print_alert_test(&outcomes);
                if outcomes.iter().any(|(_, outcome)| outcome.is_err()) {
                    return Err(DriftWatchError::AlertDeliveryFailed {
                        channel: "test".to_string(),
                        reason: "one or more channels failed".to_string(),
                    });
                }
            }
            AlertAction::History { channel, status } => {
                let filter = AlertFilter {
                    channel_name: channel,
                    status: status
                        .as_deref()
                        .map(|s| s.parse::<AlertStatus>())
                        .transpose()?,
                    ..Default::default()
                };
                let alerts = dw.alert_history(&filter)?;
                print_report!(alerts, mode, output::print_alert_history);
            }
        },

        Commands::Baseline { output: out_path } => {
            let report = dw.capture_baseline(&out_path).await?;
            print_report!(report, mode, output::print_baseline_capture);
        }

        Commands::Ci {
            format,
            fail_on,
            baseline_file,
            output_file,
            no_storage,
            include_performance,
        } => {
            let format: ci::CiFormat = format.parse()?;
            let opts = CiOptions {
                fail_on: fail_on.parse()?,
                include_performance,
                baseline: baseline_file
                    .as_deref()
                    .map(|p| driftwatch_core::Baseline::load(p))
                    .transpose()?,
                persist: !no_storage,
            };
            // --no-storage swaps in the volatile engine.
            let dw = if no_storage {
                let mut config = dw.config;
                config.global.database_url = ":memory:".to_string();
                DriftWatch::new(config)?
            } else {
                dw
            };

            let result = dw.ci(&opts).await?;
            let rendered = match format {
                ci::CiFormat::Json => ci::render_json(&result),
                ci::CiFormat::Junit => ci::render_junit(&result),
                ci::CiFormat::Summary => ci::render_summary(&result),
            };
            print!("{}", rendered);
            if let Some(path) = output_file {
                std::fs::write(path, &rendered)?;
            }
            process::exit(result.exit_code);
        }

        Commands::Cleanup {
            monitoring,
            drifts,
            alerts,
            vacuum,
            stats,
            dry_run,
        } => {
            let opts = CleanupOptions {
                monitoring_runs: parse_opt_duration(&monitoring)?,
                drifts: parse_opt_duration(&drifts)?,
                alerts: parse_opt_duration(&alerts)?,
                vacuum,
                stats,
                dry_run,
            };
            let report = dw.cleanup(&opts)?;
            print_report!(report, mode, output::print_cleanup_report);
        }

        Commands::Backup { file } => {
            let path =
                file.unwrap_or_else(driftwatch_core::commands::backup::default_backup_path);
            let report = dw.backup(&path)?;
            print_report!(report, mode, output::print_backup_report);
        }

        Commands::Restore {
            file,
            no_backup,
            force,
        } => {
            restore_database(&dw, &database_path, &file, no_backup, force)?;
        }

        Commands::Repair {
            dry_run,
            no_backup,
            force,
        } => {
            let before = dw.storage().check_integrity()?;
            let has_corruption = before
                .issues
                .iter()
                .any(|i| i.kind == driftwatch_core::storage::IssueKind::Corruption);
            if has_corruption && !force && !dry_run {
                return Err(DriftWatchError::StorageError(
                    "Engine corruption detected; repair cannot fix it. \
                     Restore from a backup, or pass --force to clean orphans anyway."
                        .to_string(),
                ));
            }
            let report = dw.repair(dry_run, !no_backup)?;
            print_report!(report, mode, output::print_repair_report);
        }

        Commands::DbHealth => {
            let report = dw.db_health()?;
            print_report!(report, mode, output::print_db_health);
        }
    }

    Ok(())
}

/// Write the starter config. `force_name` keeps the explicit --config path.
fn init_config(config_path: Option<&str>, _from_subcommand: bool) -> Result<(), DriftWatchError> {
    let path = config_path.unwrap_or(DEFAULT_CONFIG_FILE);
    if std::path::Path::new(path).exists() {
        return Err(DriftWatchError::ConfigError(format!(
            "Config file '{}' already exists",
            path
        )));
    }
    std::fs::write(path, DriftWatchConfig::starter_yaml())?;
    println!("{}", format!("Wrote starter config to {}", path).green());
    Ok(())
}

/// Derive an endpoint id from a URL: host plus path, slugified.
fn derive_endpoint_id(url: &str) -> String {
    let stripped = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url);
    let slug: String = stripped
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    slug.trim_matches('-').to_lowercase()
}

/// Run the scheduler until SIGINT/SIGTERM or the optional duration elapses.
async fn run_monitor(
    dw: &DriftWatch,
    filter: Option<&[String]>,
    duration: Option<Duration>,
) -> Result<(), DriftWatchError> {
    let scheduler = dw.scheduler(filter)?;
    scheduler.start()?;
    let scheduled = scheduler.status()?.endpoints_scheduled;
    if scheduled == 0 {
        let _ = scheduler.stop(Duration::from_secs(1)).await;
        return Err(DriftWatchError::NoEndpoints);
    }
    log::info!("Monitoring {} endpoint(s); Ctrl-C to stop", scheduled);

    let deadline = async {
        match duration {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending::<()>().await,
        }
    };

    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .map_err(DriftWatchError::IoError)?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => log::info!("SIGINT received, stopping"),
            _ = sigterm.recv() => log::info!("SIGTERM received, stopping"),
            _ = deadline => log::info!("Monitor duration elapsed, stopping"),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => log::info!("Ctrl-C received, stopping"),
            _ = deadline => log::info!("Monitor duration elapsed, stopping"),
        }
    }

    scheduler.stop(Duration::from_secs(10)).await?;
    let status = scheduler.status()?;
    output::print_scheduler_status(&status);
    Ok(())
}

/// Restore is file replacement: validate the source opens as a database,
/// back up the current one, then copy the file into place.
fn restore_database(
    dw: &DriftWatch,
    database_path: &str,
    source: &std::path::Path,
    no_backup: bool,
    force: bool,
) -> Result<(), DriftWatchError> {
    if database_path == ":memory:" {
        return Err(DriftWatchError::BackupUnsupported {
            engine: "in-memory".to_string(),
        });
    }
    if !source.exists() {
        return Err(DriftWatchError::StorageError(format!(
            "Backup file '{}' not found",
            source.display()
        )));
    }
    // Opening applies pragmas and migrations; failure means the file is
    // not a usable driftwatch database.
    driftwatch_core::storage::SqliteStorage::open(source)?;

    let target = std::path::Path::new(database_path);
    if target.exists() && !force {
        return Err(DriftWatchError::StorageError(format!(
            "Database '{}' exists. Pass --force to overwrite it.",
            database_path
        )));
    }
    if target.exists() && !no_backup {
        let safety = driftwatch_core::commands::backup::default_backup_path();
        dw.backup(&safety)?;
        println!(
            "{}",
            format!("Current database backed up to {}", safety.display()).dimmed()
        );
    }

    std::fs::copy(source, target)?;
    println!(
        "{}",
        format!("Restored database from {}", source.display()).green()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_endpoint_id() {
        assert_eq!(
            derive_endpoint_id("https://api.example.com/v1/users"),
            "api-example-com-v1-users"
        );
        assert_eq!(derive_endpoint_id("http://localhost:8080/"), "localhost-8080");
    }

    #[test]
    fn test_output_mode_parse() {
        assert_eq!("table".parse::<OutputMode>().unwrap(), OutputMode::Table);
        assert_eq!("JSON".parse::<OutputMode>().unwrap(), OutputMode::Json);
        assert!("xml".parse::<OutputMode>().is_err());
    }

    #[test]
    fn test_exit_codes_by_kind() {
        assert_eq!(exit_code(&DriftWatchError::ConfigError("x".into())), 3);
        assert_eq!(
            exit_code(&DriftWatchError::NetworkDns { host: "h".into() }),
            4
        );
        assert_eq!(
            exit_code(&DriftWatchError::BaselineMissing("a".into())),
            5
        );
        assert_eq!(exit_code(&DriftWatchError::StorageError("x".into())), 1);
    }

    #[test]
    fn test_cli_parses() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}

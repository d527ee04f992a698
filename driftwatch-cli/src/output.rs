//! Terminal output formatting for all driftwatch commands.
//! Uses comfy-table for tabular output and colored for
//! severity-aware terminal styling.

use colored::Colorize;
use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, ContentArrangement, Table};

use driftwatch_core::commands::baseline::{BaselineCaptureReport, BaselineValidateReport};
use driftwatch_core::commands::repair::RepairCommandReport;
use driftwatch_core::commands::report::MonitoringReport;
use driftwatch_core::commands::status::StatusReport;
use driftwatch_core::endpoint::{format_duration, Endpoint};
use driftwatch_core::scheduler::SchedulerStatus;
use driftwatch_core::storage::{Alert, AlertStatus, HealthLevel, HealthStatus};
use driftwatch_core::{BackupReport, CheckOnceReport, CleanupReport, Severity};

fn new_table(headers: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(headers.into_iter().map(Cell::new).collect::<Vec<_>>());
    table
}

fn colored_severity(severity: Severity) -> String {
    match severity {
        Severity::Low => "low".dimmed().to_string(),
        Severity::Medium => "medium".yellow().to_string(),
        Severity::High => "high".red().to_string(),
        Severity::Critical => "critical".red().bold().to_string(),
    }
}

fn format_timestamp(ts: &chrono::DateTime<chrono::Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Print stored endpoints as a table.
pub fn print_endpoint_list(endpoints: &[Endpoint]) {
    if endpoints.is_empty() {
        println!("{}", "No endpoints configured.".yellow());
        return;
    }

    let mut table = new_table(vec!["ID", "Method", "URL", "Interval", "Enabled", "Spec"]);
    for endpoint in endpoints {
        table.add_row(vec![
            Cell::new(&endpoint.id),
            Cell::new(endpoint.method.to_string()),
            Cell::new(&endpoint.url),
            Cell::new(format_duration(endpoint.config.interval)),
            Cell::new(if endpoint.config.enabled { "yes" } else { "no" }),
            Cell::new(
                endpoint
                    .spec_file
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default(),
            ),
        ]);
    }
    println!("{table}");
}

/// Print the status overview.
pub fn print_status_report(report: &StatusReport) {
    if report.endpoints.is_empty() {
        println!("{}", "No endpoints configured.".yellow());
        return;
    }

    let mut table = new_table(vec![
        "ID",
        "Enabled",
        "Last Check",
        "Status",
        "Response Time",
        "Recent Drifts",
    ]);
    for row in &report.endpoints {
        let status = match row.last_status {
            Some(0) => "FAILED".red().to_string(),
            Some(code) if (200..300).contains(&code) => code.to_string().green().to_string(),
            Some(code) => code.to_string().yellow().to_string(),
            None => "never checked".dimmed().to_string(),
        };
        table.add_row(vec![
            Cell::new(&row.id),
            Cell::new(if row.enabled { "yes" } else { "no" }),
            Cell::new(
                row.last_check
                    .as_ref()
                    .map(format_timestamp)
                    .unwrap_or_default(),
            ),
            Cell::new(status),
            Cell::new(
                row.last_response_time_ms
                    .map(|ms| format!("{}ms", ms))
                    .unwrap_or_default(),
            ),
            Cell::new(row.recent_drifts),
        ]);
    }
    println!("{table}");
}

/// One line per endpoint: up, degraded, or down.
pub fn print_health_summary(report: &StatusReport) {
    if report.endpoints.is_empty() {
        println!("{}", "No endpoints configured.".yellow());
        return;
    }
    for row in &report.endpoints {
        let (symbol, label) = match row.last_status {
            Some(code) if (200..300).contains(&code) && row.recent_drifts == 0 => {
                ("●".green(), "healthy".green().to_string())
            }
            Some(code) if (200..300).contains(&code) => {
                ("●".yellow(), format!("{} unacknowledged drift(s)", row.recent_drifts))
            }
            Some(0) | None => ("●".red(), "unreachable".red().to_string()),
            Some(code) => ("●".yellow(), format!("returning {}", code)),
        };
        println!("{} {} — {}", symbol, row.id, label);
    }
}

/// Print a check pass summary.
pub fn print_check_report(report: &CheckOnceReport) {
    if report.failed == 0 {
        println!(
            "{}",
            format!("Checked {} endpoint(s), all passed.", report.checked).green()
        );
    } else {
        println!(
            "{}",
            format!(
                "Checked {} endpoint(s), {} failed.",
                report.checked, report.failed
            )
            .yellow()
        );
    }
}

/// Print the monitoring report.
pub fn print_monitoring_report(report: &MonitoringReport) {
    println!(
        "{}",
        format!(
            "Last {}: {} check(s), {} drift(s)",
            format_duration(std::time::Duration::from_secs(report.period_secs)),
            report.total_checks,
            report.total_drifts
        )
        .bold()
    );
    if report.endpoints.is_empty() {
        println!("{}", "No endpoints configured.".yellow());
        return;
    }

    let mut table = new_table(vec![
        "ID",
        "Checks",
        "Success",
        "Failures",
        "Avg Time",
        "Drifts",
        "Critical",
        "Unacked",
    ]);
    for ep in &report.endpoints {
        table.add_row(vec![
            Cell::new(&ep.id),
            Cell::new(ep.checks),
            Cell::new(ep.successes),
            Cell::new(ep.failures),
            Cell::new(format!("{}ms", ep.avg_response_time_ms)),
            Cell::new(ep.drifts),
            Cell::new(ep.critical_drifts),
            Cell::new(ep.unacknowledged_drifts),
        ]);
    }
    println!("{table}");
}

/// Print scheduler status after a monitor session.
pub fn print_scheduler_status(status: &SchedulerStatus) {
    println!(
        "{}",
        format!(
            "Monitor session finished: {} endpoint(s) scheduled",
            status.endpoints_scheduled
        )
        .bold()
    );
    let mut ids: Vec<&String> = status.endpoints.keys().collect();
    ids.sort();
    for id in ids {
        let ep = &status.endpoints[id];
        println!(
            "  {} {} — {} check(s), {} error(s)",
            "→".green(),
            ep.id,
            ep.check_count,
            ep.error_count
        );
    }
}

/// Print alert delivery history.
pub fn print_alert_history(alerts: &[Alert]) {
    if alerts.is_empty() {
        println!("{}", "No alerts recorded.".yellow());
        return;
    }

    let mut table = new_table(vec![
        "ID",
        "Drift",
        "Channel",
        "Type",
        "Sent At",
        "Status",
        "Retries",
        "Error",
    ]);
    for alert in alerts {
        let status = match alert.status {
            AlertStatus::Sent => "sent".green().to_string(),
            AlertStatus::Failed => "failed".red().to_string(),
            AlertStatus::Pending => "pending".yellow().to_string(),
            AlertStatus::Retry => "retry".yellow().to_string(),
        };
        table.add_row(vec![
            Cell::new(alert.id),
            Cell::new(alert.drift_id),
            Cell::new(&alert.channel_name),
            Cell::new(&alert.alert_type),
            Cell::new(format_timestamp(&alert.sent_at)),
            Cell::new(status),
            Cell::new(alert.retry_count),
            Cell::new(alert.error_message.as_deref().unwrap_or_default()),
        ]);
    }
    println!("{table}");
}

/// Print per-channel test outcomes.
pub fn print_alert_test(outcomes: &[(String, Result<(), String>)]) {
    for (channel, outcome) in outcomes {
        match outcome {
            Ok(()) => println!("{} {}", "✓".green(), channel),
            Err(reason) => println!("{} {} — {}", "✗".red(), channel, reason),
        }
    }
}

/// Print a baseline capture report.
pub fn print_baseline_capture(report: &BaselineCaptureReport) {
    println!(
        "{}",
        format!(
            "Captured {} endpoint(s) to {}",
            report.captured.len(),
            report.path
        )
        .green()
        .bold()
    );
    for skipped in &report.skipped {
        println!(
            "{} {} — {}",
            "SKIPPED:".yellow().bold(),
            skipped.id,
            skipped.reason
        );
    }
}

/// Print a baseline validation report.
pub fn print_baseline_validate(report: &BaselineValidateReport) {
    if report.valid {
        println!(
            "{}",
            format!("Baseline OK: {} entry(ies) in {}", report.entries, report.path).green()
        );
    } else {
        for error in &report.errors {
            println!("{} {}", "ERROR:".red().bold(), error);
        }
    }
}

/// Print a cleanup report.
pub fn print_cleanup_report(report: &CleanupReport) {
    let verb = if report.dry_run { "Would remove" } else { "Removed" };
    println!(
        "{}",
        format!(
            "{} {} monitoring run(s), {} drift(s), {} alert(s)",
            verb, report.monitoring_runs_removed, report.drifts_removed, report.alerts_removed
        )
        .green()
    );
    if report.vacuumed {
        println!("{}", "Database vacuumed.".dimmed());
    }
    if let Some(stats) = &report.stats {
        println!(
            "{}",
            format!(
                "Stored now: {} endpoint(s), {} run(s), {} drift(s), {} alert(s), {} bytes",
                stats.endpoints,
                stats.monitoring_runs,
                stats.drifts,
                stats.alerts,
                stats.size_bytes
            )
            .dimmed()
        );
    }
}

/// Print a backup report.
pub fn print_backup_report(report: &BackupReport) {
    println!(
        "{}",
        format!("Backup written to {} ({} bytes)", report.path, report.size_bytes).green()
    );
}

/// Print a repair report.
pub fn print_repair_report(report: &RepairCommandReport) {
    if report.before.healthy {
        println!("{}", "No integrity issues found.".green());
    } else {
        println!("{}", "Integrity issues found:".yellow().bold());
        for issue in &report.before.issues {
            println!("  {} {}: {}", "→".yellow(), issue.table, issue.detail);
        }
    }

    if report.dry_run {
        println!("{}", "Dry run: nothing was changed.".dimmed());
        return;
    }

    if let Some(repair) = &report.repair {
        for action in &repair.actions {
            println!("  {} {}", "→".green(), action);
        }
    }
    match &report.after {
        Some(after) if after.healthy => {
            println!("{}", "Repair complete. Database is healthy.".green().bold());
        }
        Some(_) => {
            println!(
                "{}",
                "Repair finished but issues remain; see db-health.".red().bold()
            );
        }
        None => {}
    }
}

/// Print the database health report with recommendations.
pub fn print_db_health(health: &HealthStatus) {
    let level = match health.level {
        HealthLevel::Excellent => "excellent".green().bold().to_string(),
        HealthLevel::Good => "good".green().to_string(),
        HealthLevel::Warning => "warning".yellow().bold().to_string(),
        HealthLevel::Critical => "critical".red().bold().to_string(),
    };
    println!("Database health: {}", level);
    println!(
        "  {} endpoint(s), {} run(s), {} drift(s), {} alert(s), {} bytes, {:.0}% fragmented",
        health.stats.endpoints,
        health.stats.monitoring_runs,
        health.stats.drifts,
        health.stats.alerts,
        health.stats.size_bytes,
        health.fragmentation_percent
    );

    for issue in &health.integrity.issues {
        println!("  {} {}: {}", "ISSUE:".red().bold(), issue.table, issue.detail);
    }
    for rec in &health.recommendations {
        println!(
            "  {} [{}] {} — {}",
            "RECOMMEND:".yellow(),
            colored_severity(rec.priority),
            rec.action,
            rec.reason
        );
    }
}

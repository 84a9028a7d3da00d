use anyhow::{Context, Result};
use colored::Colorize;

use super::open_work_dir;
use crate::telemetry::{signature_stats, AnomalyReport, TelemetryLog};

/// Build the anomaly report over the telemetry log.
pub fn execute(json: bool, stats: bool) -> Result<()> {
    let (work_dir, _) = open_work_dir()?;
    let records = TelemetryLog::new(work_dir.telemetry_path()).load()?;

    if stats {
        return print_stats(&records);
    }

    let report = AnomalyReport::build(&records);
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialize report")?
        );
    } else {
        print!("{}", report.render_markdown());
        if report.high_count > 0 {
            eprintln!(
                "{} {} high-severity anomalies",
                "Attention:".red().bold(),
                report.high_count
            );
        }
    }
    Ok(())
}

fn print_stats(records: &[crate::models::TelemetryRecord]) -> Result<()> {
    let stats = signature_stats(records);
    if stats.is_empty() {
        println!("No telemetry records.");
        return Ok(());
    }

    println!("{}", "Per-signature statistics".bold());
    for (signature, s) in stats {
        println!(
            "  {signature}  runs={} tokens={} avg={} success={:.0}%",
            s.executions,
            s.total_tokens,
            s.avg_tokens,
            s.success_rate * 100.0
        );
    }
    Ok(())
}

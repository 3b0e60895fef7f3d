use std::collections::BTreeMap;
use std::fmt::Write;

use chrono::{NaiveDate, NaiveDateTime};

use crate::ecri::{EcriTable, PendingSummary, StartColumn, DEFAULT_NOTIFICATION_MONTHS};
use crate::error::Result;
use crate::models::{HistogramBin, YoyDelta};
use crate::moveouts::{DateWindow, HeatmapMatrix};
use crate::survival::{self, KaplanMeierCurve};

/// Days at which each model's retention is quoted.
pub const RETENTION_CHECKPOINTS: [u32; 3] = [30, 90, 180];

const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

#[derive(Debug, Clone, PartialEq)]
pub struct RetentionSummary {
    pub model: String,
    pub tenants: usize,
    pub moved_out: usize,
    pub median_days: Option<u32>,
    pub checkpoints: Vec<(u32, f64)>,
}

/// Per-model retention, quoting only checkpoints inside `horizon_days`.
pub fn summarize_retention(
    curves: &BTreeMap<String, KaplanMeierCurve>,
    horizon_days: u32,
) -> Vec<RetentionSummary> {
    curves
        .iter()
        .map(|(model, curve)| RetentionSummary {
            model: model.clone(),
            tenants: curve.at_risk.first().copied().unwrap_or(0),
            moved_out: curve.observed_events(),
            median_days: curve.median_survival(),
            checkpoints: RETENTION_CHECKPOINTS
                .iter()
                .filter(|&&day| day <= horizon_days)
                .map(|&day| (day, curve.survival_at(day)))
                .collect(),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct EcriSection {
    /// `None` when the table holds no notification dates.
    pub window: Option<DateWindow>,
    pub pending: PendingSummary,
    pub retention: Vec<RetentionSummary>,
}

/// Retention over the recent notification window. Pending figures cover the
/// whole table.
pub fn ecri_section(table: &EcriTable, horizon_days: u32, now: NaiveDateTime) -> Result<EcriSection> {
    let pending = table.pending_summary();
    let Some(window) = table.recent_window(DEFAULT_NOTIFICATION_MONTHS) else {
        return Ok(EcriSection {
            window: None,
            pending,
            retention: Vec::new(),
        });
    };

    let recent = table.filter_notifications(window.start, window.end);
    let events = recent.started_events(StartColumn::NotificationDate, now)?;
    let curves = survival::fit_by_group(&events, now)?;
    Ok(EcriSection {
        window: Some(window),
        pending,
        retention: summarize_retention(&curves, horizon_days),
    })
}

pub fn format_percent(rate: Option<f64>) -> String {
    rate.map(|r| format!("{r:.2}")).unwrap_or_else(|| "-".to_string())
}

pub fn render_heatmap(output: &mut String, heatmap: &HeatmapMatrix) {
    if heatmap.is_empty() {
        let _ = writeln!(output, "No move-out data recorded.");
        return;
    }

    let _ = writeln!(output, "| year | {} |", MONTHS.join(" | "));
    let _ = writeln!(output, "|{}", "---|".repeat(13));
    for (year, row) in heatmap.rows() {
        let cells: Vec<String> = row.iter().map(|cell| format_percent(*cell)).collect();
        let _ = writeln!(output, "| {} | {} |", year, cells.join(" | "));
    }
}

pub struct ReportInput<'a> {
    pub scope: Option<&'a str>,
    pub generated_on: NaiveDate,
    pub window: DateWindow,
    pub heatmap: &'a HeatmapMatrix,
    pub yoy: &'a [YoyDelta],
    pub histogram: &'a [HistogramBin],
    /// `None` when the section was skipped.
    pub ecri: Option<&'a EcriSection>,
}

pub fn build_report(input: &ReportInput<'_>) -> String {
    let mut output = String::new();
    let scope_label = input.scope.unwrap_or("all regions");

    let _ = writeln!(output, "# Occupancy Analysis Report");
    let _ = writeln!(
        output,
        "Generated {} for {} (window {} to {})",
        input.generated_on, scope_label, input.window.start, input.window.end
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## % Moved Out by Year and Month");
    render_heatmap(&mut output, input.heatmap);

    let _ = writeln!(output);
    let _ = writeln!(output, "## Y/Y Change in % Moved Out");
    if input.yoy.is_empty() {
        let _ = writeln!(output, "No sites with data in both this window and the prior year.");
    } else {
        let _ = writeln!(output, "Largest increases:");
        for delta in input.yoy.iter().take(5) {
            let _ = writeln!(
                output,
                "- {}: {:.2} vs {:.2} ({:+.2} pts)",
                delta.site_code, delta.rate_current, delta.rate_prior_year, delta.delta
            );
        }
        let _ = writeln!(output, "Largest decreases:");
        for delta in input.yoy.iter().rev().take(5) {
            let _ = writeln!(
                output,
                "- {}: {:.2} vs {:.2} ({:+.2} pts)",
                delta.site_code, delta.rate_current, delta.rate_prior_year, delta.delta
            );
        }
        let _ = writeln!(output);
        let _ = writeln!(output, "Distribution:");
        for bin in input.histogram {
            let _ = writeln!(output, "- {:+.2}: {}", bin.yoy_change, bin.count);
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## ECRI Retention by Model");
    let Some(ecri) = input.ecri else {
        let _ = writeln!(output, "ECRI section skipped.");
        return output;
    };
    let _ = writeln!(
        output,
        "ECRIs pending: {} (increase ${:.0} pending)",
        ecri.pending.pending, ecri.pending.increase_amount
    );
    if let Some(window) = ecri.window {
        let _ = writeln!(output, "Notifications {} to {}:", window.start, window.end);
    }
    if ecri.retention.is_empty() {
        let _ = writeln!(output, "No ECRI notifications in this window.");
    }
    for summary in &ecri.retention {
        let checkpoints: Vec<String> = summary
            .checkpoints
            .iter()
            .map(|(day, prob)| format!("{day}d {:.1}%", prob * 100.0))
            .collect();
        let median = summary
            .median_days
            .map(|d| format!("{d} days"))
            .unwrap_or_else(|| "not reached".to_string());
        let _ = writeln!(
            output,
            "- {}: {} tenants, {} moved out, median {}; {}",
            summary.model,
            summary.tenants,
            summary.moved_out,
            median,
            checkpoints.join(", ")
        );
    }

    output
}

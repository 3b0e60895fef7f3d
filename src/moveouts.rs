//! Monthly move-out rates per site, the year × month heatmap, and
//! year-over-year deltas.
//!
//! Rates are always recomputed from summed counts; per-site percentages are
//! never averaged.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{Datelike, Months, NaiveDate};

use crate::models::{HeatmapCell, HistogramBin, MonthlySummary, MoveOutRate, MoveOutRecord, OccupancyRecord, YoyDelta};
use crate::survival::round_to;

/// Inclusive date range used for year-over-year comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    /// The same window one year earlier; Feb 29 clamps to Feb 28.
    pub fn prior_year(&self) -> Option<Self> {
        Some(Self {
            start: self.start.checked_sub_months(Months::new(12))?,
            end: self.end.checked_sub_months(Months::new(12))?,
        })
    }
}

/// Sparse `year × month` matrix of aggregate move-out rates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeatmapMatrix {
    cells: BTreeMap<(i32, u32), f64>,
}

impl HeatmapMatrix {
    pub fn get(&self, year: i32, month: u32) -> Option<f64> {
        self.cells.get(&(year, month)).copied()
    }

    pub fn years(&self) -> Vec<i32> {
        self.cells
            .keys()
            .map(|(year, _)| *year)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// One row per year with a slot for each calendar month.
    pub fn rows(&self) -> Vec<(i32, [Option<f64>; 12])> {
        self.years()
            .into_iter()
            .map(|year| {
                let mut row = [None; 12];
                for (idx, slot) in row.iter_mut().enumerate() {
                    *slot = self.get(year, idx as u32 + 1);
                }
                (year, row)
            })
            .collect()
    }

    /// Long-form cells, skipping empty ones.
    pub fn melt(&self) -> Vec<HeatmapCell> {
        self.cells
            .iter()
            .map(|(&(year, month), &rate)| HeatmapCell { year, month, rate })
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MoveOutAnalysis {
    pub joined: Vec<MoveOutRate>,
    pub monthly: Vec<MonthlySummary>,
    pub heatmap: HeatmapMatrix,
    pub yoy: Vec<YoyDelta>,
}

pub fn move_out_rate(move_outs: i64, occupants: i64) -> Option<f64> {
    if occupants == 0 {
        return None;
    }
    Some(round_to(100.0 * move_outs as f64 / occupants as f64, 2))
}

/// Left-joins move-outs onto occupancy; every occupancy row survives.
pub fn join_rates(occupancy: &[OccupancyRecord], moveouts: &[MoveOutRecord]) -> Vec<MoveOutRate> {
    let mut index: HashMap<(NaiveDate, &str), i64> = HashMap::new();
    for record in moveouts {
        *index.entry((record.date, record.site_code.as_str())).or_insert(0) += record.move_outs;
    }

    occupancy
        .iter()
        .map(|occ| {
            let move_outs = index.get(&(occ.date, occ.site_code.as_str())).copied();
            MoveOutRate {
                date: occ.date,
                site_code: occ.site_code.clone(),
                occupants: occ.occupants,
                move_outs,
                rate: move_outs.and_then(|m| move_out_rate(m, occ.occupants)),
            }
        })
        .collect()
}

/// Sums counts per calendar month over rows with a defined rate.
pub fn monthly_summary(joined: &[MoveOutRate]) -> Vec<MonthlySummary> {
    let mut totals: BTreeMap<(i32, u32), (i64, i64)> = BTreeMap::new();
    for row in joined {
        let Some(move_outs) = row.move_outs.filter(|_| row.rate.is_some()) else {
            continue;
        };
        let entry = totals.entry((row.date.year(), row.date.month())).or_insert((0, 0));
        entry.0 += row.occupants;
        entry.1 += move_outs;
    }

    totals
        .into_iter()
        .map(|((year, month), (occupants, move_outs))| MonthlySummary {
            year,
            month,
            occupants,
            move_outs,
            rate: move_out_rate(move_outs, occupants),
        })
        .collect()
}

pub fn pivot_heatmap(monthly: &[MonthlySummary]) -> HeatmapMatrix {
    HeatmapMatrix {
        cells: monthly
            .iter()
            .filter_map(|m| m.rate.map(|rate| ((m.year, m.month), rate)))
            .collect(),
    }
}

fn site_rates(joined: &[MoveOutRate], window: DateWindow) -> BTreeMap<&str, f64> {
    let mut totals: BTreeMap<&str, (i64, i64)> = BTreeMap::new();
    for row in joined.iter().filter(|row| window.contains(row.date)) {
        let Some(move_outs) = row.move_outs.filter(|_| row.rate.is_some()) else {
            continue;
        };
        let entry = totals.entry(row.site_code.as_str()).or_insert((0, 0));
        entry.0 += row.occupants;
        entry.1 += move_outs;
    }

    totals
        .into_iter()
        .filter_map(|(site, (occupants, move_outs))| {
            move_out_rate(move_outs, occupants).map(|rate| (site, rate))
        })
        .collect()
}

/// Per-site change against the same window one year earlier, largest first.
pub fn yoy_deltas(joined: &[MoveOutRate], window: DateWindow) -> Vec<YoyDelta> {
    let Some(prior_window) = window.prior_year() else {
        return Vec::new();
    };
    let current = site_rates(joined, window);
    let prior = site_rates(joined, prior_window);

    let mut deltas: Vec<YoyDelta> = current
        .into_iter()
        .filter_map(|(site, rate_current)| {
            let rate_prior_year = *prior.get(site)?;
            Some(YoyDelta {
                site_code: site.to_string(),
                rate_current,
                rate_prior_year,
                delta: round_to(rate_current - rate_prior_year, 2),
            })
        })
        .collect();

    deltas.sort_by(|a, b| {
        b.delta
            .total_cmp(&a.delta)
            .then_with(|| a.site_code.cmp(&b.site_code))
    });
    deltas
}

pub fn aggregate_move_outs(
    occupancy: &[OccupancyRecord],
    moveouts: &[MoveOutRecord],
    window: DateWindow,
) -> MoveOutAnalysis {
    if occupancy.is_empty() {
        tracing::warn!("no occupancy records to aggregate");
        return MoveOutAnalysis::default();
    }

    let joined = join_rates(occupancy, moveouts);
    let monthly = monthly_summary(&joined);
    let heatmap = pivot_heatmap(&monthly);
    let yoy = yoy_deltas(&joined, window);
    tracing::debug!(
        rows = joined.len(),
        months = monthly.len(),
        sites_compared = yoy.len(),
        "aggregated move-outs"
    );

    MoveOutAnalysis {
        joined,
        monthly,
        heatmap,
        yoy,
    }
}

/// Equal-width bins between the smallest and largest delta.
pub fn yoy_histogram(deltas: &[YoyDelta], bins: usize) -> Vec<HistogramBin> {
    if deltas.is_empty() || bins == 0 {
        return Vec::new();
    }
    let min = deltas.iter().map(|d| d.delta).fold(f64::INFINITY, f64::min);
    let max = deltas.iter().map(|d| d.delta).fold(f64::NEG_INFINITY, f64::max);
    if min == max {
        return vec![HistogramBin {
            yoy_change: min,
            count: deltas.len(),
        }];
    }

    let width = (max - min) / bins as f64;
    let mut counts = vec![0usize; bins];
    for delta in deltas {
        // right-closed bins; the minimum lands in the first one
        let idx = ((delta.delta - min) / width).ceil() as usize;
        counts[idx.saturating_sub(1).min(bins - 1)] += 1;
    }

    counts
        .into_iter()
        .enumerate()
        .filter(|(_, count)| *count > 0)
        .map(|(idx, count)| HistogramBin {
            yoy_change: round_to(min + width * (idx as f64 + 0.5), 4),
            count,
        })
        .collect()
}

/// Keeps records whose site is in `sites`.
pub fn filter_sites<T, F>(records: Vec<T>, sites: &BTreeSet<String>, site_of: F) -> Vec<T>
where
    F: Fn(&T) -> &str,
{
    records
        .into_iter()
        .filter(|record| sites.contains(site_of(record)))
        .collect()
}

//! The ECRI master table: rent-increase notifications per tenant.
//!
//! Raw CSV records are kept next to their typed view so exports reproduce the
//! source columns exactly.

use chrono::{Months, NaiveDate, NaiveDateTime};
use clap::ValueEnum;
use csv::StringRecord;

use crate::error::{DashboardError, Result};
use crate::models::{EcriRecord, EventRecord};
use crate::moveouts::DateWindow;

/// Months of notifications analysed when no window is given.
pub const DEFAULT_NOTIFICATION_MONTHS: u32 = 6;

/// Column that marks the start of a tenant's retention clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StartColumn {
    NotificationDate,
    IncreaseDate,
}

impl StartColumn {
    pub fn column_name(self) -> &'static str {
        match self {
            Self::NotificationDate => "notification_date",
            Self::IncreaseDate => "increase_date",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EcriRow {
    pub raw: StringRecord,
    pub record: EcriRecord,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EcriTable {
    pub headers: StringRecord,
    pub rows: Vec<EcriRow>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PendingSummary {
    pub pending: usize,
    pub increase_amount: f64,
}

impl EcriTable {
    pub fn from_csv(source_key: &str, text: &str) -> Result<Self> {
        let mut reader = csv::Reader::from_reader(text.as_bytes());
        let headers = reader
            .headers()
            .map_err(|err| DashboardError::fetch(source_key, err))?
            .clone();

        let mut rows = Vec::new();
        for result in reader.records() {
            let raw = result.map_err(|err| DashboardError::fetch(source_key, err))?;
            let record: EcriRecord = raw
                .deserialize(Some(&headers))
                .map_err(|err| DashboardError::fetch(source_key, err))?;
            rows.push(EcriRow { raw, record });
        }

        Ok(Self { headers, rows })
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn notification_range(&self) -> Option<(NaiveDate, NaiveDate)> {
        let mut dates = self
            .rows
            .iter()
            .filter_map(|row| row.record.notification_date.map(|ts| ts.date()));
        let first = dates.next()?;
        Some(dates.fold((first, first), |(lo, hi), d| (lo.min(d), hi.max(d))))
    }

    /// The `months` months ending at the latest notification.
    pub fn recent_window(&self, months: u32) -> Option<DateWindow> {
        let (_, latest) = self.notification_range()?;
        let start = latest.checked_sub_months(Months::new(months))?;
        Some(DateWindow::new(start, latest))
    }

    /// Rows notified within `[start, end]`, input order preserved.
    pub fn filter_notifications(&self, start: NaiveDate, end: NaiveDate) -> Self {
        let rows = self
            .rows
            .iter()
            .filter(|row| {
                row.record
                    .notification_date
                    .map(|ts| ts.date())
                    .is_some_and(|d| start <= d && d <= end)
            })
            .cloned()
            .collect();
        Self {
            headers: self.headers.clone(),
            rows,
        }
    }

    pub fn events(&self, start_column: StartColumn) -> Result<Vec<EventRecord>> {
        self.rows
            .iter()
            .enumerate()
            .map(|(idx, row)| {
                let start = match start_column {
                    StartColumn::NotificationDate => row.record.notification_date,
                    StartColumn::IncreaseDate => row.record.increase_date,
                }
                .ok_or_else(|| {
                    DashboardError::DataIntegrity(format!(
                        "row {} (model {:?}) has no {}",
                        idx + 1,
                        row.record.model,
                        start_column.column_name()
                    ))
                })?;
                Ok(EventRecord {
                    group: row.record.model.clone(),
                    start,
                    end: row.record.moved_out_date,
                })
            })
            .collect()
    }

    /// Events whose clock has started by `now`.
    ///
    /// A start date after `now` is a scheduled increase, not a bad row; those
    /// rows are skipped and logged.
    pub fn started_events(&self, start_column: StartColumn, now: NaiveDateTime) -> Result<Vec<EventRecord>> {
        let mut events = self.events(start_column)?;
        let total = events.len();
        events.retain(|event| {
            if event.start <= now {
                return true;
            }
            tracing::warn!(
                model = %event.group,
                start = %event.start,
                column = start_column.column_name(),
                "skipping row that starts after the clock"
            );
            false
        });
        let skipped = total - events.len();
        if skipped > 0 {
            tracing::warn!(skipped, %now, column = start_column.column_name(), "skipped rows not yet started");
        }
        Ok(events)
    }

    pub fn pending_summary(&self) -> PendingSummary {
        self.rows
            .iter()
            .fold(PendingSummary { pending: 0, increase_amount: 0.0 }, |mut acc, row| {
                if row.record.ecri_pending {
                    acc.pending += 1;
                }
                acc.increase_amount += row.record.pending_increase_amount.unwrap_or(0.0);
                acc
            })
    }
}

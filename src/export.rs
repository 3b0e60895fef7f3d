use std::io::Write;
use std::path::Path;

use anyhow::Context;
use serde::Serialize;

use crate::ecri::EcriTable;

/// Writes records with a header row taken from their serde field names.
pub fn write_records<W, T>(writer: W, records: &[T]) -> anyhow::Result<()>
where
    W: Write,
    T: Serialize,
{
    let mut csv_writer = csv::Writer::from_writer(writer);
    for record in records {
        csv_writer.serialize(record)?;
    }
    csv_writer.flush()?;
    Ok(())
}

/// Reproduces the source columns of the (filtered) ECRI table.
pub fn write_ecri_table<W: Write>(writer: W, table: &EcriTable) -> anyhow::Result<()> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    csv_writer.write_record(&table.headers)?;
    for row in &table.rows {
        csv_writer.write_record(&row.raw)?;
    }
    csv_writer.flush()?;
    Ok(())
}

pub fn save_records<T: Serialize>(path: &Path, records: &[T]) -> anyhow::Result<()> {
    let file = std::fs::File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    write_records(file, records)?;
    tracing::info!(path = %path.display(), rows = records.len(), "exported csv");
    Ok(())
}

pub fn save_ecri_table(path: &Path, table: &EcriTable) -> anyhow::Result<()> {
    let file = std::fs::File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    write_ecri_table(file, table)?;
    tracing::info!(path = %path.display(), rows = table.len(), "exported csv");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MoveOutRate, MoveOutRecord, OccupancyRecord, SurvivalPoint, YoyDelta};
    use crate::moveouts::{join_rates, monthly_summary, pivot_heatmap};
    use chrono::NaiveDate;

    fn records_to_string<T: Serialize>(records: &[T]) -> String {
        let mut buffer = Vec::new();
        write_records(&mut buffer, records).unwrap();
        String::from_utf8(buffer).unwrap()
    }

    #[test]
    fn survival_export_uses_chart_column_names() {
        let points = vec![
            SurvivalPoint {
                group: "A".to_string(),
                day_offset: 0,
                survival_probability: 1.0,
            },
            SurvivalPoint {
                group: "A".to_string(),
                day_offset: 12,
                survival_probability: 0.875,
            },
        ];
        let text = records_to_string(&points);
        assert_eq!(text, "model,Days,% Survived\nA,0,1.0\nA,12,0.875\n");
    }

    #[test]
    fn missing_rates_export_as_empty_cells() {
        let rows = vec![MoveOutRate {
            date: NaiveDate::from_ymd_opt(2023, 2, 28).unwrap(),
            site_code: "RD001".to_string(),
            occupants: 102,
            move_outs: None,
            rate: None,
        }];
        let text = records_to_string(&rows);
        assert_eq!(
            text,
            "date,site_code,occupants,move_outs,% moved out\n2023-02-28,RD001,102,,\n"
        );
    }

    #[test]
    fn yoy_export_round_trips() {
        let deltas = vec![
            YoyDelta {
                site_code: "RD002".to_string(),
                rate_current: 9.0,
                rate_prior_year: 3.0,
                delta: 6.0,
            },
            YoyDelta {
                site_code: "RD001".to_string(),
                rate_current: 12.0,
                rate_prior_year: 9.5,
                delta: 2.5,
            },
        ];
        let text = records_to_string(&deltas);

        let mut reader = csv::Reader::from_reader(text.as_bytes());
        let headers: Vec<String> = reader.headers().unwrap().iter().map(String::from).collect();
        assert_eq!(
            headers,
            vec!["site_code", "% moved out_current", "% moved out_prev", "yoy_change"]
        );
        let parsed: Vec<YoyDelta> = reader.deserialize().collect::<Result<_, _>>().unwrap();
        assert_eq!(parsed, deltas);
    }

    #[test]
    fn ecri_export_preserves_source_columns_and_order() {
        let source = "tenant_id,model,notification_date\n7,B,2023-02-01\n3,A,2023-01-01\n";
        let table = EcriTable::from_csv("ecri", source).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ecris.csv");
        save_ecri_table(&path, &table).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written, source);
        let reparsed = EcriTable::from_csv("ecri", &written).unwrap();
        assert_eq!(reparsed, table);
    }

    #[test]
    fn heatmap_exports_in_long_form() {
        let occupancy = vec![
            OccupancyRecord {
                date: NaiveDate::from_ymd_opt(2023, 1, 31).unwrap(),
                site_code: "RD001".to_string(),
                occupants: 200,
            },
            OccupancyRecord {
                date: NaiveDate::from_ymd_opt(2023, 2, 28).unwrap(),
                site_code: "RD001".to_string(),
                occupants: 200,
            },
        ];
        let moveouts = vec![MoveOutRecord {
            date: NaiveDate::from_ymd_opt(2023, 1, 31).unwrap(),
            site_code: "RD001".to_string(),
            move_outs: 6,
        }];
        let heatmap = pivot_heatmap(&monthly_summary(&join_rates(&occupancy, &moveouts)));

        // February has no move-out record, so it has no cell
        assert_eq!(records_to_string(&heatmap.melt()), "year,month,% moved out\n2023,1,3.0\n");
    }
}

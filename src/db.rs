use chrono::NaiveDate;
use sqlx::{PgPool, Row};

use crate::error::{DashboardError, Result};
use crate::models::{Facility, MoveOutRecord, OccupancyRecord};

pub const OCCUPANTS_KEY: &str = "sql:occupants";
pub const MOVE_OUTS_KEY: &str = "sql:move_outs";
pub const FACILITIES_KEY: &str = "sql:facilities";

const MONTH_ENDS: &str = r#"
    WITH dates AS (
        SELECT (date_trunc('month', d) + interval '1 month' - interval '1 day')::date AS date
        FROM generate_series($1::date, now()::date, interval '1 month') AS d
    )
"#;

/// Occupied units per site at each month end since `series_start`.
pub async fn fetch_occupants(pool: &PgPool, series_start: NaiveDate) -> Result<Vec<OccupancyRecord>> {
    let query = format!(
        "{MONTH_ENDS} \
         SELECT d.date, f.site_code, count(DISTINCT o.id) AS occupants \
         FROM dates d \
         JOIN occupancies o ON o.move_in_date::date <= d.date \
             AND (o.moved_out = false OR o.moved_out_at::date >= date_trunc('month', d.date)) \
         JOIN units u ON u.id = o.unit_id \
         JOIN facilities f ON f.id = u.facility_id \
         GROUP BY d.date, f.site_code \
         ORDER BY d.date, f.site_code"
    );

    let rows = sqlx::query(&query)
        .bind(series_start)
        .fetch_all(pool)
        .await
        .map_err(|err| DashboardError::fetch(OCCUPANTS_KEY, err))?;

    let mut records = Vec::with_capacity(rows.len());
    for row in rows {
        records.push(OccupancyRecord {
            date: row.try_get("date").map_err(|err| DashboardError::fetch(OCCUPANTS_KEY, err))?,
            site_code: row
                .try_get("site_code")
                .map_err(|err| DashboardError::fetch(OCCUPANTS_KEY, err))?,
            occupants: row
                .try_get("occupants")
                .map_err(|err| DashboardError::fetch(OCCUPANTS_KEY, err))?,
        });
    }

    tracing::info!(rows = records.len(), "loaded occupant counts");
    Ok(records)
}

/// Move-outs per site, dated to the end of the month they happened in.
pub async fn fetch_move_outs(pool: &PgPool, series_start: NaiveDate) -> Result<Vec<MoveOutRecord>> {
    let query = format!(
        "{MONTH_ENDS} \
         SELECT d.date, f.site_code, count(DISTINCT o.id) AS move_outs \
         FROM dates d \
         JOIN occupancies o ON date_trunc('month', o.moved_out_at::date) = date_trunc('month', d.date) \
         JOIN units u ON u.id = o.unit_id \
         JOIN facilities f ON f.id = u.facility_id \
         GROUP BY d.date, f.site_code \
         ORDER BY d.date, f.site_code"
    );

    let rows = sqlx::query(&query)
        .bind(series_start)
        .fetch_all(pool)
        .await
        .map_err(|err| DashboardError::fetch(MOVE_OUTS_KEY, err))?;

    let mut records = Vec::with_capacity(rows.len());
    for row in rows {
        records.push(MoveOutRecord {
            date: row.try_get("date").map_err(|err| DashboardError::fetch(MOVE_OUTS_KEY, err))?,
            site_code: row
                .try_get("site_code")
                .map_err(|err| DashboardError::fetch(MOVE_OUTS_KEY, err))?,
            move_outs: row
                .try_get("move_outs")
                .map_err(|err| DashboardError::fetch(MOVE_OUTS_KEY, err))?,
        });
    }

    tracing::info!(rows = records.len(), "loaded move-out counts");
    Ok(records)
}

pub async fn fetch_facilities(pool: &PgPool) -> Result<Vec<Facility>> {
    let facilities = sqlx::query_as::<_, Facility>(
        r#"
        SELECT
            f.site_code,
            r.name AS region,
            CASE f.fund
                WHEN 0 THEN 'FAM1' WHEN 1 THEN 'FAM2' WHEN 2 THEN 'FAM3' WHEN 3 THEN 'FAM4'
                WHEN 4 THEN 'Inland' WHEN 5 THEN 'RDH II' WHEN 6 THEN 'RDH III'
                WHEN 7 THEN 'RDH IV' WHEN 8 THEN 'SPH' WHEN 9 THEN 'FAM5'
            END AS fund,
            a.lat::float8 AS latitude,
            a.lng::float8 AS longitude,
            f.created_at::date AS acq_date,
            coalesce(f.created_at::date <= (now() - interval '24 months')::date, false) AS same_store
        FROM facilities f
        LEFT JOIN addresses a ON a.addressable_id = f.id AND a.addressable_type = 'Facility'
        LEFT JOIN regions r ON r.id = f.region_id
        ORDER BY f.site_code
        "#,
    )
    .fetch_all(pool)
    .await
    .map_err(|err| DashboardError::fetch(FACILITIES_KEY, err))?;

    tracing::info!(rows = facilities.len(), "loaded facilities");
    Ok(facilities)
}

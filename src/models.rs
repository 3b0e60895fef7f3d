use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize};

/// One subject of a retention cohort: a tenant who received a rent increase.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    pub group: String,
    pub start: NaiveDateTime,
    /// `None` while the tenant has not moved out (censored).
    pub end: Option<NaiveDateTime>,
}

impl EventRecord {
    pub fn observed(&self) -> bool {
        self.end.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurvivalPoint {
    #[serde(rename = "model")]
    pub group: String,
    #[serde(rename = "Days")]
    pub day_offset: u32,
    #[serde(rename = "% Survived")]
    pub survival_probability: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OccupancyRecord {
    pub date: NaiveDate,
    pub site_code: String,
    pub occupants: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveOutRecord {
    pub date: NaiveDate,
    pub site_code: String,
    pub move_outs: i64,
}

/// Occupancy row enriched with its month's move-outs, if any were recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveOutRate {
    pub date: NaiveDate,
    pub site_code: String,
    pub occupants: i64,
    pub move_outs: Option<i64>,
    #[serde(rename = "% moved out")]
    pub rate: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlySummary {
    pub year: i32,
    pub month: u32,
    pub occupants: i64,
    pub move_outs: i64,
    #[serde(rename = "% moved out")]
    pub rate: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YoyDelta {
    pub site_code: String,
    #[serde(rename = "% moved out_current")]
    pub rate_current: f64,
    #[serde(rename = "% moved out_prev")]
    pub rate_prior_year: f64,
    #[serde(rename = "yoy_change")]
    pub delta: f64,
}

/// One non-empty heatmap cell in long form.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeatmapCell {
    pub year: i32,
    pub month: u32,
    #[serde(rename = "% moved out")]
    pub rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistogramBin {
    pub yoy_change: f64,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Facility {
    pub site_code: String,
    pub region: Option<String>,
    pub fund: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub acq_date: Option<NaiveDate>,
    pub same_store: bool,
}

/// Typed view of one ECRI master row; other columns stay in the raw record.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EcriRecord {
    pub model: String,
    #[serde(default, deserialize_with = "optional_timestamp")]
    pub notification_date: Option<NaiveDateTime>,
    #[serde(default, deserialize_with = "optional_timestamp")]
    pub increase_date: Option<NaiveDateTime>,
    #[serde(default, deserialize_with = "optional_timestamp")]
    pub moved_out_date: Option<NaiveDateTime>,
    #[serde(default, deserialize_with = "optional_flag")]
    pub ecri_pending: bool,
    #[serde(default, deserialize_with = "optional_amount")]
    pub pending_increase_amount: Option<f64>,
}

pub fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    const FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S%.f"];
    for format in FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, format) {
            return Some(parsed);
        }
    }
    // pandas writes date-only columns without a time component
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
}

fn optional_timestamp<'de, D>(deserializer: D) -> Result<Option<NaiveDateTime>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") | Some("NaT") => Ok(None),
        Some(value) => parse_timestamp(value)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp {value:?}"))),
    }
}

fn optional_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(false),
        Some(value) => match value.as_str() {
            "" | "false" | "f" | "0" => Ok(false),
            "true" | "t" | "1" => Ok(true),
            other => Err(serde::de::Error::custom(format!("invalid flag {other:?}"))),
        },
    }
}

fn optional_amount<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => value
            .parse::<f64>()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("invalid amount {value:?}"))),
    }
}

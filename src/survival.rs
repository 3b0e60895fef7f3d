//! Kaplan-Meier retention curves for rent-increase cohorts.
//!
//! Every tenant notified of an increase is one observation: the time from the
//! start date (notification or increase) to move-out, or to "now" when the
//! tenant is still in place. Tenants still in place are right-censored; they
//! stay in the risk set until their elapsed time and never cause a drop.
//!
//! ```text
//! moved out:  |----x        (event observed at 42 days)
//! staying:    |-------->    (censored at 97 days)
//! ```

use std::collections::BTreeMap;

use chrono::{NaiveDateTime, Utc};

use crate::error::{DashboardError, Result};
use crate::models::{EventRecord, SurvivalPoint};

/// Days retained in the survival output unless a caller asks otherwise.
pub const DEFAULT_HORIZON_DAYS: u32 = 180;

/// Step function fitted over `(duration, is_censored)` observations.
///
/// The timeline holds the origin plus every distinct duration, observed or
/// censored, with parallel vectors describing each step.
#[derive(Debug, Clone, PartialEq)]
pub struct KaplanMeierCurve {
    pub times: Vec<u32>,
    pub survival_prob: Vec<f64>,
    pub at_risk: Vec<usize>,
    pub events: Vec<usize>,
    /// Set when the origin was added ahead of the first observation.
    synthetic_origin: bool,
}

impl KaplanMeierCurve {
    pub fn from_data(mut data: Vec<(u32, bool)>) -> Self {
        let mut curve = Self {
            times: vec![],
            survival_prob: vec![],
            at_risk: vec![],
            events: vec![],
            synthetic_origin: false,
        };
        if data.is_empty() {
            return curve;
        }

        data.sort_by_key(|(time, _)| *time);
        let total = data.len();

        if data[0].0 > 0 {
            curve.push(0, 1.0, total, 0);
            curve.synthetic_origin = true;
        }

        let mut current_survival = 1.0;
        let mut i = 0;
        while i < data.len() {
            let current_time = data[i].0;
            let at_risk = total - i;

            let mut event_count = 0;
            let mut j = i;
            while j < data.len() && data[j].0 == current_time {
                if !data[j].1 {
                    event_count += 1;
                }
                j += 1;
            }

            if event_count > 0 {
                current_survival *= 1.0 - (event_count as f64 / at_risk as f64);
            }
            curve.push(current_time, current_survival, at_risk, event_count);

            i = j;
        }

        curve
    }

    fn push(&mut self, time: u32, survival: f64, at_risk: usize, events: usize) {
        self.times.push(time);
        self.survival_prob.push(survival);
        self.at_risk.push(at_risk);
        self.events.push(events);
    }

    /// Survival probability at `time`; 1.0 before the first step.
    pub fn survival_at(&self, time: u32) -> f64 {
        match self.times.partition_point(|&t| t <= time) {
            0 => 1.0,
            idx => self.survival_prob[idx - 1],
        }
    }

    /// First time at which survival drops to 50% or below.
    pub fn median_survival(&self) -> Option<u32> {
        self.times
            .iter()
            .zip(&self.survival_prob)
            .find(|(_, &prob)| prob <= 0.5)
            .map(|(&time, _)| time)
    }

    /// Shortest observed or censored duration.
    pub fn first_observation(&self) -> Option<u32> {
        let skip = usize::from(self.synthetic_origin);
        self.times.get(skip).copied()
    }

    pub fn observed_events(&self) -> usize {
        self.events.iter().sum()
    }
}

/// Whole days elapsed for one event, and whether it was censored.
pub fn elapsed_days(event: &EventRecord, now: NaiveDateTime) -> Result<(u32, bool)> {
    let (end, censored) = match event.end {
        Some(end) => (end, false),
        None => (now, true),
    };
    if end < event.start {
        return Err(DashboardError::DataIntegrity(format!(
            "group {:?}: {} {} precedes start {}",
            event.group,
            if censored { "clock" } else { "end" },
            end,
            event.start
        )));
    }
    let days = (end - event.start).num_days();
    let days = u32::try_from(days).map_err(|_| {
        DashboardError::DataIntegrity(format!("group {:?}: duration {days} days out of range", event.group))
    })?;
    Ok((days, censored))
}

/// Fits one curve per group, measuring censored events against `now`.
pub fn fit_by_group(
    events: &[EventRecord],
    now: NaiveDateTime,
) -> Result<BTreeMap<String, KaplanMeierCurve>> {
    let mut grouped: BTreeMap<&str, Vec<(u32, bool)>> = BTreeMap::new();
    for event in events {
        grouped
            .entry(event.group.as_str())
            .or_default()
            .push(elapsed_days(event, now)?);
    }

    Ok(grouped
        .into_iter()
        .map(|(group, data)| {
            let curve = KaplanMeierCurve::from_data(data);
            tracing::debug!(
                group,
                subjects = curve.at_risk.first().copied().unwrap_or(0),
                events = curve.observed_events(),
                "fitted survival curve"
            );
            (group.to_string(), curve)
        })
        .collect())
}

pub fn estimate_survival(events: &[EventRecord], horizon_days: u32) -> Result<Vec<SurvivalPoint>> {
    estimate_survival_at(events, horizon_days, Utc::now().naive_utc())
}

/// Tidy `(group, day, probability)` rows truncated to `horizon_days`.
pub fn estimate_survival_at(
    events: &[EventRecord],
    horizon_days: u32,
    now: NaiveDateTime,
) -> Result<Vec<SurvivalPoint>> {
    let curves = fit_by_group(events, now)?;
    let mut points = Vec::new();

    for (group, curve) in &curves {
        if curve.first_observation().map_or(true, |first| first > horizon_days) {
            continue;
        }
        for (&time, &prob) in curve.times.iter().zip(&curve.survival_prob) {
            if time > horizon_days {
                break;
            }
            points.push(SurvivalPoint {
                group: group.clone(),
                day_offset: time,
                survival_probability: round_to(prob, 3),
            });
        }
    }

    Ok(points)
}

pub(crate) fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};
    use proptest::prelude::*;

    fn origin() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2023, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn event(group: &str, start_day: i64, end_day: Option<i64>) -> EventRecord {
        EventRecord {
            group: group.to_string(),
            start: origin() + Duration::days(start_day),
            end: end_day.map(|d| origin() + Duration::days(d)),
        }
    }

    fn now() -> NaiveDateTime {
        origin() + Duration::days(400)
    }

    #[test]
    fn curve_matches_hand_computed_steps() {
        // (time, is_censored)
        let curve = KaplanMeierCurve::from_data(vec![(10, false), (20, true), (30, false)]);
        assert_eq!(curve.times, vec![0, 10, 20, 30]);
        assert_eq!(curve.at_risk, vec![3, 3, 2, 1]);
        assert!((curve.survival_at(10) - 2.0 / 3.0).abs() < 1e-12);
        assert!((curve.survival_at(25) - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(curve.survival_at(30), 0.0);
        assert_eq!(curve.median_survival(), Some(30));
    }

    #[test]
    fn ties_drop_together() {
        let curve = KaplanMeierCurve::from_data(vec![(5, false), (5, false), (5, true), (9, false)]);
        assert!((curve.survival_at(5) - 0.5).abs() < 1e-12);
        assert_eq!(curve.events, vec![0, 2, 1]);
    }

    #[test]
    fn events_at_time_zero_drop_the_origin() {
        let points = estimate_survival_at(
            &[event("A", 0, Some(0)), event("A", 0, Some(10))],
            180,
            now(),
        )
        .unwrap();
        assert_eq!(points[0].day_offset, 0);
        assert_eq!(points[0].survival_probability, 0.5);
    }

    #[test]
    fn all_censored_group_stays_flat() {
        let events = vec![event("A", 300, None), event("A", 350, None), event("A", 390, None)];
        let points = estimate_survival_at(&events, 180, now()).unwrap();
        assert_eq!(
            points.iter().map(|p| p.day_offset).collect::<Vec<_>>(),
            vec![0, 10, 50, 100]
        );
        assert!(points.iter().all(|p| p.survival_probability == 1.0));
    }

    #[test]
    fn groups_are_independent_and_ordered() {
        let events = vec![
            event("B", 0, Some(5)),
            event("A", 0, Some(3)),
            event("B", 0, Some(8)),
            event("A", 300, None),
        ];
        let points = estimate_survival_at(&events, 180, now()).unwrap();
        let groups: Vec<&str> = points.iter().map(|p| p.group.as_str()).collect();
        assert_eq!(groups, vec!["A", "A", "A", "B", "B", "B"]);

        let a: Vec<f64> = points
            .iter()
            .filter(|p| p.group == "A")
            .map(|p| p.survival_probability)
            .collect();
        assert_eq!(a, vec![1.0, 0.5, 0.5]);
    }

    #[test]
    fn horizon_truncates_timeline() {
        let events = vec![event("A", 0, Some(30)), event("A", 0, Some(200)), event("A", 0, Some(181))];
        let points = estimate_survival_at(&events, 180, now()).unwrap();
        assert_eq!(points.last().unwrap().day_offset, 30);
    }

    #[test]
    fn group_beyond_horizon_contributes_nothing() {
        let events = vec![event("A", 0, Some(10)), event("Late", 0, Some(250)), event("Late", 0, Some(300))];
        let points = estimate_survival_at(&events, 180, now()).unwrap();
        assert!(points.iter().all(|p| p.group == "A"));
    }

    #[test]
    fn end_before_start_is_rejected() {
        let err = estimate_survival_at(&[event("A", 10, Some(5))], 180, now()).unwrap_err();
        assert!(matches!(err, DashboardError::DataIntegrity(_)));
    }

    #[test]
    fn start_after_clock_is_rejected() {
        let err = estimate_survival_at(&[event("A", 500, None)], 180, now()).unwrap_err();
        assert!(matches!(err, DashboardError::DataIntegrity(_)));
    }

    #[test]
    fn partial_days_truncate() {
        let start = origin();
        let record = EventRecord {
            group: "A".to_string(),
            start,
            end: Some(start + Duration::hours(47)),
        };
        assert_eq!(elapsed_days(&record, now()).unwrap(), (1, false));
    }

    #[test]
    fn probabilities_are_rounded_to_three_places() {
        let events = vec![event("A", 0, Some(1)), event("A", 0, Some(2)), event("A", 0, Some(3))];
        let points = estimate_survival_at(&events, 180, now()).unwrap();
        assert_eq!(points[1].survival_probability, 0.667);
        assert_eq!(points[2].survival_probability, 0.333);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_survival_is_monotone_and_bounded(
            raw in prop::collection::vec((0i64..300, prop::option::of(0i64..300), 0usize..3), 1..60),
        ) {
            let groups = ["A", "B", "C"];
            let events: Vec<EventRecord> = raw
                .iter()
                .map(|&(start, len, g)| event(groups[g], start, len.map(|l| start + l)))
                .collect();
            let points = estimate_survival_at(&events, 180, now()).unwrap();

            for pair in points.windows(2) {
                if pair[0].group == pair[1].group {
                    prop_assert!(pair[0].day_offset < pair[1].day_offset);
                    prop_assert!(pair[1].survival_probability <= pair[0].survival_probability);
                }
            }
            for point in &points {
                prop_assert!((0.0..=1.0).contains(&point.survival_probability));
                prop_assert!(point.day_offset <= 180);
            }
        }

        #[test]
        fn prop_uncensored_distinct_events_follow_product(n in 1usize..40) {
            let events: Vec<EventRecord> = (1..=n)
                .map(|d| event("A", 0, Some(d as i64)))
                .collect();
            let curve = fit_by_group(&events, now()).unwrap().remove("A").unwrap();

            let mut expected = 1.0;
            for k in 1..=n {
                expected *= 1.0 - 1.0 / (n - k + 1) as f64;
                prop_assert!((curve.survival_at(k as u32) - expected).abs() < 1e-12);
            }
        }
    }
}

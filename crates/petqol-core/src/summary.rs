use serde::{Deserialize, Serialize};
use time::Date;

use crate::{calendar_date, Measurement, Metric};

/// Totals at or above this mark (half of the 0–60 scale) count as a good day.
pub const GOOD_DAY_THRESHOLD: f64 = 30.0;

const TREND_TOLERANCE: f64 = 2.5;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Improving,
    Declining,
    Stable,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct MetricAverages {
    pub pain: f64,
    pub hunger: f64,
    pub hydration: f64,
    pub hygiene: f64,
    pub happiness: f64,
    pub mobility: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QualitySummary {
    pub measurement_count: usize,
    #[serde(with = "calendar_date")]
    pub first_date: Date,
    #[serde(with = "calendar_date")]
    pub last_date: Date,
    pub mean_total: f64,
    pub averages: MetricAverages,
    pub good_days: usize,
    pub bad_days: usize,
    pub latest_total: f64,
    pub trend: Trend,
}

/// Summarize a series of assessments. Input order does not matter; `None` for no input.
#[must_use]
pub fn summarize(measurements: &[Measurement]) -> Option<QualitySummary> {
    let mut ordered = measurements.iter().collect::<Vec<_>>();
    ordered.sort_by(|left, right| {
        left.date
            .cmp(&right.date)
            .then_with(|| left.created_at.cmp(&right.created_at))
            .then_with(|| left.measurement_id.cmp(&right.measurement_id))
    });

    let first = ordered.first()?;
    let last = ordered.last()?;
    let totals = ordered.iter().map(|measurement| measurement.total()).collect::<Vec<_>>();
    let good_days = totals.iter().filter(|total| **total >= GOOD_DAY_THRESHOLD).count();

    let metric_mean = |metric: Metric| {
        mean(&ordered.iter().map(|measurement| measurement.scores.get(metric)).collect::<Vec<_>>())
    };

    Some(QualitySummary {
        measurement_count: ordered.len(),
        first_date: first.date,
        last_date: last.date,
        mean_total: mean(&totals),
        averages: MetricAverages {
            pain: metric_mean(Metric::Pain),
            hunger: metric_mean(Metric::Hunger),
            hydration: metric_mean(Metric::Hydration),
            hygiene: metric_mean(Metric::Hygiene),
            happiness: metric_mean(Metric::Happiness),
            mobility: metric_mean(Metric::Mobility),
        },
        good_days,
        bad_days: totals.len() - good_days,
        latest_total: last.total(),
        trend: trend(&totals),
    })
}

fn trend(totals: &[f64]) -> Trend {
    if totals.len() < 2 {
        return Trend::Stable;
    }

    let (earlier, later) = totals.split_at(totals.len() / 2);
    let delta = mean(later) - mean(earlier);
    if delta >= TREND_TOLERANCE {
        Trend::Improving
    } else if delta <= -TREND_TOLERANCE {
        Trend::Declining
    } else {
        Trend::Stable
    }
}

#[allow(clippy::cast_precision_loss)]
fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

#[cfg(test)]
mod tests {
    use time::macros::{date, datetime};
    use time::Duration;

    use super::*;
    use crate::{MeasurementId, PetId, QualityScores};

    fn day(offset: i64, value: f64) -> Measurement {
        let base = date!(2026 - 05 - 01);
        Measurement {
            measurement_id: MeasurementId::new(),
            pet_id: PetId::new(),
            date: base + Duration::days(offset),
            scores: QualityScores {
                pain: value,
                hunger: value,
                hydration: value,
                hygiene: value,
                happiness: value,
                mobility: value,
            },
            custom_value: None,
            notes: String::new(),
            images: vec![],
            created_at: datetime!(2026-05-01 09:00 UTC) + Duration::days(offset),
            updated_at: datetime!(2026-05-01 09:00 UTC) + Duration::days(offset),
        }
    }

    #[test]
    fn empty_series_has_no_summary() {
        assert!(summarize(&[]).is_none());
    }

    #[test]
    fn single_day_is_stable_and_classified_against_the_threshold() {
        let Some(summary) = summarize(&[day(0, 5.0)]) else {
            panic!("summary expected");
        };
        assert_eq!(summary.measurement_count, 1);
        assert!((summary.mean_total - 30.0).abs() < f64::EPSILON);
        assert_eq!(summary.good_days, 1);
        assert_eq!(summary.bad_days, 0);
        assert_eq!(summary.trend, Trend::Stable);
    }

    #[test]
    fn declining_series_is_detected_regardless_of_input_order() {
        let series = vec![day(3, 2.5), day(0, 10.0), day(2, 5.0), day(1, 7.5)];
        let Some(summary) = summarize(&series) else {
            panic!("summary expected");
        };
        assert_eq!(summary.first_date, date!(2026 - 05 - 01));
        assert_eq!(summary.last_date, date!(2026 - 05 - 04));
        assert!((summary.latest_total - 15.0).abs() < f64::EPSILON);
        assert_eq!(summary.trend, Trend::Declining);
        assert_eq!(summary.good_days, 3);
        assert_eq!(summary.bad_days, 1);
        assert!((summary.averages.mobility - 6.25).abs() < f64::EPSILON);
    }

    #[test]
    fn small_wobbles_stay_stable_and_recoveries_improve() {
        let mut wobble = vec![day(0, 5.0), day(1, 5.0), day(2, 5.0), day(3, 5.0)];
        wobble[1].scores.pain = 7.5;
        assert_eq!(summarize(&wobble).map(|summary| summary.trend), Some(Trend::Stable));

        let recovery = vec![day(0, 2.5), day(1, 5.0), day(2, 7.5)];
        assert_eq!(summarize(&recovery).map(|summary| summary.trend), Some(Trend::Improving));
    }
}

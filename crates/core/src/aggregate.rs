use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::event::{Direction, EventType, Outcome};

/// Immutable log entry for one webhook delivery attempt.
///
/// Records are append-only: corrections are modeled as new records, never
/// edits, which is what makes the aggregation below replay-safe.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeliveryRecord {
    pub id: String,
    pub partner_id: String,
    pub event_type: EventType,
    pub payload_json: String,
    pub direction: Direction,
    pub outcome: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl DeliveryRecord {
    /// Extracts the monetary amount from the recorded payload.
    ///
    /// Missing or non-numeric `pricing` counts as zero, matching the wire
    /// contract where only monetized events carry the field.
    pub fn pricing(&self) -> f64 {
        serde_json::from_str::<Value>(&self.payload_json)
            .ok()
            .and_then(|value| value.get("pricing").and_then(Value::as_f64))
            .unwrap_or(0.0)
    }
}

/// Inclusive calendar-day window for an aggregation query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, AggregateError> {
        if end < start {
            return Err(AggregateError::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    fn contains(&self, day: NaiveDate) -> bool {
        day >= self.start && day <= self.end
    }
}

/// Per-day summary derived from the delivery log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateBucket {
    pub day: NaiveDate,
    pub count: u64,
    pub revenue: f64,
    pub success_count: u64,
    pub failure_count: u64,
}

/// Window-wide totals.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AggregateTotals {
    pub count: u64,
    pub revenue: f64,
}

/// Output of one aggregation pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateReport {
    pub buckets: Vec<AggregateBucket>,
    pub totals: AggregateTotals,
    /// Percentage of successful deliveries in the window, one decimal place.
    pub success_rate: f64,
    /// Percentage of failed deliveries in the window, one decimal place.
    pub error_rate: f64,
}

/// Errors for aggregation queries.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AggregateError {
    #[error("invalid date range: end {end} is before start {start}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },
}

/// Folds an ordered slice of delivery records into daily buckets and rates.
///
/// Buckets use UTC calendar days, are emitted in ascending date order, and
/// days without records are simply absent. The fold is a pure function of the
/// input set: re-running it over an unchanged log yields identical output,
/// which keeps the pipeline idempotent and makes a materialized cache a safe
/// later optimization.
pub fn aggregate(records: &[DeliveryRecord], range: Option<DateRange>) -> AggregateReport {
    let mut buckets: BTreeMap<NaiveDate, AggregateBucket> = BTreeMap::new();
    let mut success_total: u64 = 0;
    let mut count_total: u64 = 0;
    let mut revenue_total: f64 = 0.0;

    for record in records {
        let day = record.created_at.date_naive();
        if let Some(range) = range {
            if !range.contains(day) {
                continue;
            }
        }

        let revenue = record.pricing();
        let bucket = buckets.entry(day).or_insert_with(|| AggregateBucket {
            day,
            count: 0,
            revenue: 0.0,
            success_count: 0,
            failure_count: 0,
        });
        bucket.count += 1;
        bucket.revenue += revenue;
        match record.outcome {
            Outcome::Success => {
                bucket.success_count += 1;
                success_total += 1;
            }
            Outcome::Failure => bucket.failure_count += 1,
        }

        count_total += 1;
        revenue_total += revenue;
    }

    let (success_rate, error_rate) = if count_total == 0 {
        (0.0, 0.0)
    } else {
        let success = round_one_decimal(success_total as f64 / count_total as f64 * 100.0);
        (success, round_one_decimal(100.0 - success))
    };

    AggregateReport {
        buckets: buckets.into_values().collect(),
        totals: AggregateTotals {
            count: count_total,
            revenue: revenue_total,
        },
        success_rate,
        error_rate,
    }
}

fn round_one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(day: &str, outcome: Outcome, pricing: Option<f64>) -> DeliveryRecord {
        let created_at: DateTime<Utc> = format!("{day}T12:00:00Z")
            .parse()
            .expect("valid timestamp");
        let payload = match pricing {
            Some(amount) => json!({
                "event": "request.authorized",
                "transactionId": "T-1",
                "pricing": amount
            }),
            None => json!({ "event": "request.declined", "transactionId": "T-1" }),
        };
        DeliveryRecord {
            id: format!("rec-{day}-{}", outcome.as_str()),
            partner_id: "p-1".to_string(),
            event_type: EventType::RequestAuthorized,
            payload_json: payload.to_string(),
            direction: Direction::Inbound,
            outcome,
            status_code: Some(200),
            error_detail: None,
            created_at,
        }
    }

    #[test]
    fn groups_by_day_and_sums_revenue() {
        let records = vec![
            record("2024-01-01", Outcome::Success, Some(50.0)),
            record("2024-01-01", Outcome::Success, Some(70.0)),
            record("2024-01-02", Outcome::Success, Some(30.0)),
            record("2024-01-02", Outcome::Failure, None),
        ];
        let range = DateRange::new(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
        )
        .unwrap();

        let report = aggregate(&records, Some(range));

        assert_eq!(report.buckets.len(), 2);
        assert_eq!(
            report.buckets[0].day,
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
        );
        assert_eq!(report.buckets[0].count, 2);
        assert_eq!(report.buckets[0].revenue, 120.0);
        assert_eq!(report.buckets[1].count, 2);
        assert_eq!(report.buckets[1].revenue, 30.0);
        assert_eq!(report.totals.count, 4);
        assert_eq!(report.totals.revenue, 150.0);
        assert_eq!(report.success_rate, 75.0);
        assert_eq!(report.error_rate, 25.0);
    }

    #[test]
    fn empty_window_yields_zero_rates() {
        let report = aggregate(&[], None);
        assert!(report.buckets.is_empty());
        assert_eq!(report.totals.count, 0);
        assert_eq!(report.success_rate, 0.0);
        assert_eq!(report.error_rate, 0.0);
    }

    #[test]
    fn is_idempotent_over_unchanged_input() {
        let records = vec![
            record("2024-03-05", Outcome::Success, Some(12.5)),
            record("2024-03-06", Outcome::Failure, Some(8.0)),
            record("2024-03-06", Outcome::Success, None),
        ];

        let first = aggregate(&records, None);
        let second = aggregate(&records, None);
        assert_eq!(first, second);
    }

    #[test]
    fn records_outside_range_are_excluded() {
        let records = vec![
            record("2024-01-01", Outcome::Success, Some(10.0)),
            record("2024-01-05", Outcome::Success, Some(99.0)),
        ];
        let range = DateRange::new(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
        )
        .unwrap();

        let report = aggregate(&records, Some(range));
        assert_eq!(report.buckets.len(), 1);
        assert_eq!(report.totals.count, 1);
        assert_eq!(report.totals.revenue, 10.0);
    }

    #[test]
    fn zero_record_days_are_absent() {
        let records = vec![
            record("2024-01-01", Outcome::Success, Some(10.0)),
            record("2024-01-03", Outcome::Success, Some(20.0)),
        ];

        let report = aggregate(&records, None);
        let days: Vec<NaiveDate> = report.buckets.iter().map(|b| b.day).collect();
        assert_eq!(
            days,
            vec![
                NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                NaiveDate::from_ymd_opt(2024, 1, 3).unwrap(),
            ]
        );
    }

    #[test]
    fn inverted_range_is_rejected() {
        let err = DateRange::new(
            NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        )
        .unwrap_err();
        assert!(matches!(err, AggregateError::InvalidRange { .. }));
    }

    #[test]
    fn missing_pricing_counts_as_zero() {
        let records = vec![record("2024-01-01", Outcome::Failure, None)];
        let report = aggregate(&records, None);
        assert_eq!(report.totals.revenue, 0.0);
        assert_eq!(report.buckets[0].failure_count, 1);
    }

    #[test]
    fn rates_round_to_one_decimal() {
        let records = vec![
            record("2024-01-01", Outcome::Success, None),
            record("2024-01-01", Outcome::Success, None),
            record("2024-01-01", Outcome::Failure, None),
        ];
        let report = aggregate(&records, None);
        assert_eq!(report.success_rate, 66.7);
        assert_eq!(report.error_rate, 33.3);
    }
}

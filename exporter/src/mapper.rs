//! Row-to-metric materialization.
//!
//! Pure transformation from one query execution result into an ordered
//! list of metric samples. A row that cannot be mapped is skipped and
//! counted; it never aborts the remaining rows or metric definitions.

use common::errors::MappingError;
use common::models::{ExecutionResult, MetricDefinition, MetricSample, ScalarValue};

/// Everything one mapping pass produced: the samples to apply and the
/// per-row failures to surface in the execution's error summary.
#[derive(Debug, Default)]
pub struct MappingOutcome {
    /// Samples in definition order, then row order.
    pub samples: Vec<MetricSample>,
    /// Rows skipped with the reason.
    pub errors: Vec<MappingError>,
}

/// Maps an execution result through every metric definition.
///
/// One definition may legitimately produce zero, one or many samples per
/// execution (one per row / label combination). A NULL value column skips
/// the row silently; a missing column or non-numeric value skips the row
/// with an error.
pub fn map_result(metric_defs: &[MetricDefinition], result: &ExecutionResult) -> MappingOutcome {
    let mut outcome = MappingOutcome::default();

    for def in metric_defs {
        let value_idx = result.column_index(&def.value_column);
        let label_indices: Vec<Option<usize>> = def
            .labels
            .iter()
            .map(|label| result.column_index(label))
            .collect();

        'rows: for row in &result.rows {
            let value = match value_idx {
                Some(idx) => &row[idx],
                None => {
                    outcome.errors.push(MappingError::MissingColumn {
                        metric: def.name.clone(),
                        column: def.value_column.clone(),
                    });
                    continue;
                }
            };

            // NULL is an absent observation, not an error
            if value.is_null() {
                continue;
            }

            let value = match coerce_numeric(value) {
                Some(v) => v,
                None => {
                    outcome.errors.push(MappingError::NonNumericValue {
                        metric: def.name.clone(),
                        column: def.value_column.clone(),
                        value: value.as_label_text(),
                    });
                    continue;
                }
            };

            let mut labels = Vec::with_capacity(def.labels.len());
            for (label, idx) in def.labels.iter().zip(&label_indices) {
                match idx {
                    Some(idx) => labels.push((label.clone(), row[*idx].as_label_text())),
                    None => {
                        outcome.errors.push(MappingError::MissingColumn {
                            metric: def.name.clone(),
                            column: label.clone(),
                        });
                        continue 'rows;
                    }
                }
            }

            outcome.samples.push(MetricSample {
                metric: def.name.clone(),
                labels,
                value,
            });
        }
    }

    outcome
}

/// Coercion rules: integers and floats pass through, booleans become 1/0,
/// text is parsed as a number. Timestamps are not numeric.
fn coerce_numeric(value: &ScalarValue) -> Option<f64> {
    match value {
        ScalarValue::Int(i) => Some(*i as f64),
        ScalarValue::Float(f) => Some(*f),
        ScalarValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        ScalarValue::Text(s) => s.trim().parse::<f64>().ok(),
        ScalarValue::Null | ScalarValue::Timestamp(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::models::MetricKind;

    fn gauge(name: &str, labels: &[&str], value_column: &str) -> MetricDefinition {
        MetricDefinition {
            name: name.into(),
            help: "test metric".into(),
            kind: MetricKind::Gauge,
            labels: labels.iter().map(|l| l.to_string()).collect(),
            value_column: value_column.into(),
        }
    }

    #[test]
    fn single_count_row_yields_one_unlabeled_sample() {
        // SELECT COUNT(*) AS count FROM users -> {count: 42}
        let result = ExecutionResult::new(vec!["count".into()], vec![vec![ScalarValue::Int(42)]]);
        let outcome = map_result(&[gauge("total_users", &[], "count")], &result);

        assert!(outcome.errors.is_empty());
        assert_eq!(outcome.samples.len(), 1);
        assert_eq!(outcome.samples[0].metric, "total_users");
        assert_eq!(outcome.samples[0].value, 42.0);
        assert!(outcome.samples[0].labels.is_empty());
    }

    #[test]
    fn labeled_rows_yield_one_sample_per_label_combination() {
        let result = ExecutionResult::new(
            vec!["region".into(), "count".into()],
            vec![
                vec![ScalarValue::Text("US".into()), ScalarValue::Int(5)],
                vec![ScalarValue::Text("EU".into()), ScalarValue::Int(3)],
            ],
        );
        let outcome = map_result(&[gauge("users_by_region", &["region"], "count")], &result);

        assert!(outcome.errors.is_empty());
        assert_eq!(outcome.samples.len(), 2);
        assert_eq!(outcome.samples[0].labels, vec![("region".into(), "US".into())]);
        assert_eq!(outcome.samples[0].value, 5.0);
        assert_eq!(outcome.samples[1].labels, vec![("region".into(), "EU".into())]);
        assert_eq!(outcome.samples[1].value, 3.0);
    }

    #[test]
    fn non_numeric_rows_are_skipped_but_counted() {
        let result = ExecutionResult::new(
            vec!["count".into()],
            vec![
                vec![ScalarValue::Int(1)],
                vec![ScalarValue::Text("not-a-number".into())],
                vec![ScalarValue::Int(3)],
            ],
        );
        let outcome = map_result(&[gauge("m", &[], "count")], &result);

        // The bad row is counted, the rest still map
        assert_eq!(outcome.samples.len(), 2);
        assert_eq!(outcome.errors.len(), 1);
        assert!(matches!(
            outcome.errors[0],
            MappingError::NonNumericValue { .. }
        ));
    }

    #[test]
    fn null_values_skip_the_row_without_error() {
        let result = ExecutionResult::new(
            vec!["count".into()],
            vec![vec![ScalarValue::Null], vec![ScalarValue::Int(7)]],
        );
        let outcome = map_result(&[gauge("m", &[], "count")], &result);

        assert_eq!(outcome.samples.len(), 1);
        assert!(outcome.errors.is_empty());
    }

    #[test]
    fn missing_value_column_is_an_error_per_row() {
        let result = ExecutionResult::new(
            vec!["other".into()],
            vec![vec![ScalarValue::Int(1)], vec![ScalarValue::Int(2)]],
        );
        let outcome = map_result(&[gauge("m", &[], "count")], &result);

        assert!(outcome.samples.is_empty());
        assert_eq!(outcome.errors.len(), 2);
        assert!(matches!(
            outcome.errors[0],
            MappingError::MissingColumn { .. }
        ));
    }

    #[test]
    fn missing_label_column_skips_the_row() {
        let result = ExecutionResult::new(
            vec!["count".into()],
            vec![vec![ScalarValue::Int(5)]],
        );
        let outcome = map_result(&[gauge("m", &["region"], "count")], &result);

        assert!(outcome.samples.is_empty());
        assert_eq!(outcome.errors.len(), 1);
    }

    #[test]
    fn one_bad_definition_does_not_abort_the_others() {
        let result = ExecutionResult::new(
            vec!["count".into()],
            vec![vec![ScalarValue::Int(5)]],
        );
        let defs = [gauge("broken", &[], "missing"), gauge("fine", &[], "count")];
        let outcome = map_result(&defs, &result);

        assert_eq!(outcome.samples.len(), 1);
        assert_eq!(outcome.samples[0].metric, "fine");
        assert_eq!(outcome.errors.len(), 1);
    }

    #[test]
    fn booleans_and_numeric_strings_coerce() {
        let result = ExecutionResult::new(
            vec!["value".into()],
            vec![
                vec![ScalarValue::Bool(true)],
                vec![ScalarValue::Bool(false)],
                vec![ScalarValue::Text("12.5".into())],
            ],
        );
        let outcome = map_result(&[gauge("m", &[], "value")], &result);

        let values: Vec<f64> = outcome.samples.iter().map(|s| s.value).collect();
        assert_eq!(values, vec![1.0, 0.0, 12.5]);
    }

    #[test]
    fn timestamps_are_not_numeric_values() {
        let result = ExecutionResult::new(
            vec!["value".into()],
            vec![vec![ScalarValue::Timestamp(chrono::Utc::now())]],
        );
        let outcome = map_result(&[gauge("m", &[], "value")], &result);

        assert!(outcome.samples.is_empty());
        assert_eq!(outcome.errors.len(), 1);
    }

    #[test]
    fn empty_result_yields_nothing() {
        let result = ExecutionResult::default();
        let outcome = map_result(&[gauge("m", &[], "count")], &result);
        assert!(outcome.samples.is_empty());
        assert!(outcome.errors.is_empty());
    }
}

//! The built-in catalog of test cases.

use crate::models::TestCase;
use dap_interop_core::{
    task::QueryType,
    vdaf::{HistogramBuckets, MeasurementScheme},
};

fn histogram(boundaries: impl IntoIterator<Item = u64>) -> MeasurementScheme {
    MeasurementScheme::Histogram {
        buckets: HistogramBuckets::Boundaries(boundaries.into_iter().collect()),
        chunk_length: None,
    }
}

/// Every scheme/size combination, without a query type.
fn base_cases() -> Vec<(&'static str, MeasurementScheme, usize)> {
    Vec::from([
        ("prio3_count_small", MeasurementScheme::Count, 10),
        ("prio3_count_medium", MeasurementScheme::Count, 250),
        ("prio3_count_large", MeasurementScheme::Count, 5000),
        ("prio3_sum_1_bit", MeasurementScheme::Sum { bits: 1 }, 10),
        ("prio3_sum_8_bits", MeasurementScheme::Sum { bits: 8 }, 10),
        ("prio3_sum_64_bits", MeasurementScheme::Sum { bits: 64 }, 10),
        (
            "prio3_sumvec_8_bits_length_12",
            MeasurementScheme::SumVec {
                bits: 8,
                length: 12,
                chunk_length: Some(9),
            },
            10,
        ),
        ("prio3_histogram_5_buckets", histogram([1, 3, 10, 30]), 10),
        ("prio3_histogram_12_buckets", histogram(0..=10), 10),
        (
            "prio3_histogram_length_10",
            MeasurementScheme::Histogram {
                buckets: HistogramBuckets::Length(10),
                chunk_length: Some(3),
            },
            10,
        ),
    ])
}

/// All test cases: each base case once per query type, named with a `time_` or `fixed_` prefix.
pub fn test_cases() -> Vec<TestCase> {
    [
        ("time", QueryType::TimeInterval),
        ("fixed", QueryType::FixedSize),
    ]
    .into_iter()
    .flat_map(|(prefix, query_type)| {
        base_cases()
            .into_iter()
            .map(move |(name, scheme, measurement_count)| TestCase {
                name: format!("{prefix}_{name}"),
                scheme,
                measurement_count,
                query_type,
            })
    })
    .collect()
}

/// Selects the test cases whose name contains any of `filters`. No filters selects everything.
pub fn filter_test_cases<'a>(test_cases: &'a [TestCase], filters: &[String]) -> Vec<&'a TestCase> {
    test_cases
        .iter()
        .filter(|test_case| {
            filters.is_empty() || filters.iter().any(|filter| test_case.name.contains(filter))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use crate::catalog::{filter_test_cases, test_cases};
    use dap_interop_core::{
        task::QueryType,
        vdaf::{HistogramBuckets, MeasurementScheme, generate_measurement, generate_verify_key},
    };
    use std::collections::HashSet;

    #[test]
    fn catalog() {
        let test_cases = test_cases();
        assert_eq!(test_cases.len(), 20);

        let names: HashSet<_> = test_cases.iter().map(|test_case| &test_case.name).collect();
        assert_eq!(names.len(), test_cases.len());

        for test_case in &test_cases {
            let expected_query_type = if test_case.name.starts_with("time_") {
                QueryType::TimeInterval
            } else {
                assert!(test_case.name.starts_with("fixed_"));
                QueryType::FixedSize
            };
            assert_eq!(test_case.query_type, expected_query_type);
            generate_measurement(&test_case.scheme).unwrap();
            generate_verify_key(&test_case.scheme).unwrap();
        }

        let twelve = test_cases
            .iter()
            .find(|test_case| test_case.name == "time_prio3_histogram_12_buckets")
            .unwrap();
        assert_eq!(
            twelve.scheme,
            MeasurementScheme::Histogram {
                buckets: HistogramBuckets::Boundaries((0..=10).collect()),
                chunk_length: None,
            }
        );
    }

    #[test]
    fn filters() {
        let test_cases = test_cases();
        assert_eq!(filter_test_cases(&test_cases, &[]).len(), 20);

        let selected = filter_test_cases(&test_cases, &["count_small".to_string()]);
        let names: Vec<_> = selected.iter().map(|test_case| test_case.name.as_str()).collect();
        assert_eq!(names, ["time_prio3_count_small", "fixed_prio3_count_small"]);

        let selected = filter_test_cases(
            &test_cases,
            &["time_prio3_sum_8".to_string(), "fixed_prio3_histogram".to_string()],
        );
        assert_eq!(selected.len(), 4);

        assert!(filter_test_cases(&test_cases, &["nothing".to_string()]).is_empty());
    }
}

//! A plaintext reference model of the aggregation schemes exercised by interop tests.
//!
//! The model generates random measurements for a [`MeasurementScheme`] and computes the aggregate
//! that a correct DAP deployment must report for them. No cryptography is involved: the
//! aggregate of a batch is simply the sum, element-wise sum or bucket count of its measurements.

use crate::task::VerifyKey;
use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use std::{
    fmt::{self, Display, Formatter},
    marker::PhantomData,
    str::FromStr,
};

/// Errors from the reference model.
#[derive(Clone, Debug, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    #[error("unsupported measurement scheme {0}")]
    UnsupportedScheme(String),
    #[error("invalid measurement scheme: {0}")]
    InvalidScheme(String),
    #[error("measurement does not fit {scheme}: {message}")]
    InvalidMeasurement { scheme: String, message: String },
    #[error("aggregate overflowed")]
    Overflow,
}

/// Wrapper that (de)serializes a number as its decimal string representation. Deserialization
/// also accepts bare JSON integers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NumberAsString<T>(pub T);

impl<T: Display> Serialize for NumberAsString<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de, T> Deserialize<'de> for NumberAsString<T>
where
    T: FromStr,
    T::Err: Display,
{
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(NumberAsStringVisitor(PhantomData))
    }
}

struct NumberAsStringVisitor<T>(PhantomData<T>);

impl<T> NumberAsStringVisitor<T>
where
    T: FromStr,
    T::Err: Display,
{
    fn parse<E: de::Error>(value: &str) -> Result<NumberAsString<T>, E> {
        value.parse().map(NumberAsString).map_err(E::custom)
    }
}

impl<T> de::Visitor<'_> for NumberAsStringVisitor<T>
where
    T: FromStr,
    T::Err: Display,
{
    type Value = NumberAsString<T>;

    fn expecting(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("a number encoded as a decimal string")
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
        Self::parse(value)
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> Result<Self::Value, E> {
        Self::parse(&value.to_string())
    }

    fn visit_i64<E: de::Error>(self, value: i64) -> Result<Self::Value, E> {
        Self::parse(&value.to_string())
    }
}

/// Bucket layout of a histogram.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum HistogramBuckets {
    /// Strictly increasing upper bounds. Bucket `i` holds values `v` with
    /// `boundaries[i-1] < v <= boundaries[i]`, and one extra bucket holds values above the last
    /// boundary, for `boundaries.len() + 1` buckets in total.
    Boundaries(Vec<u64>),
    /// A fixed number of buckets; each measurement is a bucket index.
    Length(usize),
}

/// An aggregation scheme under test, with its parameters.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "SchemeObject", try_from = "SchemeObject")]
pub enum MeasurementScheme {
    /// Each measurement is 0 or 1; the aggregate is their sum.
    Count,
    /// Each measurement is an integer in `[0, 2^bits)`; the aggregate is their sum.
    Sum { bits: u32 },
    /// Each measurement is a vector of `length` integers in `[0, 2^bits)`; the aggregate is
    /// their element-wise sum.
    SumVec {
        bits: u32,
        length: usize,
        chunk_length: Option<usize>,
    },
    /// Each measurement falls into one bucket; the aggregate is the per-bucket count.
    Histogram {
        buckets: HistogramBuckets,
        chunk_length: Option<usize>,
    },
    /// A scheme named on the wire that this model does not know how to evaluate.
    Unsupported { name: String },
}

impl MeasurementScheme {
    const COUNT: &'static str = "Prio3Count";
    const SUM: &'static str = "Prio3Sum";
    const SUM_VEC: &'static str = "Prio3SumVec";
    const HISTOGRAM: &'static str = "Prio3Histogram";

    /// The name of the scheme, as used in the `type` field of interop API requests.
    pub fn name(&self) -> &str {
        match self {
            MeasurementScheme::Count => Self::COUNT,
            MeasurementScheme::Sum { .. } => Self::SUM,
            MeasurementScheme::SumVec { .. } => Self::SUM_VEC,
            MeasurementScheme::Histogram { .. } => Self::HISTOGRAM,
            MeasurementScheme::Unsupported { name } => name,
        }
    }

    fn validate(&self) -> Result<(), Error> {
        match self {
            MeasurementScheme::Count => Ok(()),
            MeasurementScheme::Sum { bits } => validate_bits(*bits),
            MeasurementScheme::SumVec { bits, length, .. } => {
                validate_bits(*bits)?;
                if *length == 0 {
                    return Err(Error::InvalidScheme(
                        "Prio3SumVec length must be positive".to_string(),
                    ));
                }
                Ok(())
            }
            MeasurementScheme::Histogram {
                buckets: HistogramBuckets::Boundaries(boundaries),
                ..
            } => {
                if !boundaries.windows(2).all(|pair| pair[0] < pair[1]) {
                    return Err(Error::InvalidScheme(
                        "histogram boundaries must be strictly increasing".to_string(),
                    ));
                }
                if boundaries.last() == Some(&u64::MAX) {
                    return Err(Error::InvalidScheme(
                        "last histogram boundary leaves no room for the overflow bucket"
                            .to_string(),
                    ));
                }
                Ok(())
            }
            MeasurementScheme::Histogram {
                buckets: HistogramBuckets::Length(length),
                ..
            } => {
                if *length == 0 {
                    return Err(Error::InvalidScheme(
                        "Prio3Histogram length must be positive".to_string(),
                    ));
                }
                Ok(())
            }
            MeasurementScheme::Unsupported { name } => Err(Error::UnsupportedScheme(name.clone())),
        }
    }
}

impl Display for MeasurementScheme {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn validate_bits(bits: u32) -> Result<(), Error> {
    if !(1..=64).contains(&bits) {
        return Err(Error::InvalidScheme(format!(
            "bit width must be between 1 and 64, got {bits}"
        )));
    }
    Ok(())
}

/// Wire representation of [`MeasurementScheme`]: an object tagged by `type`, with numeric
/// parameters as decimal strings.
#[derive(Serialize, Deserialize)]
struct SchemeObject {
    #[serde(rename = "type")]
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    bits: Option<NumberAsString<u32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    length: Option<NumberAsString<usize>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    chunk_length: Option<NumberAsString<usize>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    buckets: Option<Vec<NumberAsString<u64>>>,
}

impl From<MeasurementScheme> for SchemeObject {
    fn from(scheme: MeasurementScheme) -> Self {
        let mut object = SchemeObject {
            name: scheme.name().to_string(),
            bits: None,
            length: None,
            chunk_length: None,
            buckets: None,
        };
        match scheme {
            MeasurementScheme::Count | MeasurementScheme::Unsupported { .. } => {}
            MeasurementScheme::Sum { bits } => object.bits = Some(NumberAsString(bits)),
            MeasurementScheme::SumVec {
                bits,
                length,
                chunk_length,
            } => {
                object.bits = Some(NumberAsString(bits));
                object.length = Some(NumberAsString(length));
                object.chunk_length = chunk_length.map(NumberAsString);
            }
            MeasurementScheme::Histogram {
                buckets,
                chunk_length,
            } => {
                match buckets {
                    HistogramBuckets::Boundaries(boundaries) => {
                        object.buckets = Some(boundaries.into_iter().map(NumberAsString).collect())
                    }
                    HistogramBuckets::Length(length) => {
                        object.length = Some(NumberAsString(length))
                    }
                }
                object.chunk_length = chunk_length.map(NumberAsString);
            }
        }
        object
    }
}

impl TryFrom<SchemeObject> for MeasurementScheme {
    type Error = Error;

    fn try_from(object: SchemeObject) -> Result<Self, Self::Error> {
        let SchemeObject {
            name,
            bits,
            length,
            chunk_length,
            buckets,
        } = object;
        let missing = |field: &str| Error::InvalidScheme(format!("{name} is missing {field}"));
        let chunk_length = chunk_length.map(|NumberAsString(value)| value);

        match name.as_str() {
            Self::COUNT => Ok(MeasurementScheme::Count),
            Self::SUM => Ok(MeasurementScheme::Sum {
                bits: bits.ok_or_else(|| missing("bits"))?.0,
            }),
            Self::SUM_VEC => Ok(MeasurementScheme::SumVec {
                bits: bits.ok_or_else(|| missing("bits"))?.0,
                length: length.ok_or_else(|| missing("length"))?.0,
                chunk_length,
            }),
            Self::HISTOGRAM => {
                let buckets = match (buckets, length) {
                    (Some(boundaries), None) => HistogramBuckets::Boundaries(
                        boundaries
                            .into_iter()
                            .map(|NumberAsString(boundary)| boundary)
                            .collect(),
                    ),
                    (None, Some(NumberAsString(length))) => HistogramBuckets::Length(length),
                    (Some(_), Some(_)) => {
                        return Err(Error::InvalidScheme(
                            "Prio3Histogram must not set both buckets and length".to_string(),
                        ));
                    }
                    (None, None) => return Err(missing("buckets or length")),
                };
                Ok(MeasurementScheme::Histogram {
                    buckets,
                    chunk_length,
                })
            }
            _ => Ok(MeasurementScheme::Unsupported { name: name.clone() }),
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum NumberObject {
    Number(NumberAsString<u128>),
    NumberVec(Vec<NumberAsString<u128>>),
}

impl NumberObject {
    fn into_parts(self) -> Result<u128, Vec<u128>> {
        match self {
            NumberObject::Number(NumberAsString(value)) => Ok(value),
            NumberObject::NumberVec(values) => Err(values
                .into_iter()
                .map(|NumberAsString(value)| value)
                .collect()),
        }
    }
}

/// One client measurement, as uploaded through the Client's interop API.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "NumberObject", from = "NumberObject")]
pub enum Measurement {
    Number(u128),
    NumberVec(Vec<u128>),
}

impl From<Measurement> for NumberObject {
    fn from(measurement: Measurement) -> Self {
        match measurement {
            Measurement::Number(value) => NumberObject::Number(NumberAsString(value)),
            Measurement::NumberVec(values) => {
                NumberObject::NumberVec(values.into_iter().map(NumberAsString).collect())
            }
        }
    }
}

impl From<NumberObject> for Measurement {
    fn from(object: NumberObject) -> Self {
        match object.into_parts() {
            Ok(value) => Measurement::Number(value),
            Err(values) => Measurement::NumberVec(values),
        }
    }
}

/// The aggregate of a batch of measurements, as reported by the Collector.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "NumberObject", from = "NumberObject")]
pub enum AggregateResult {
    Number(u128),
    NumberVec(Vec<u128>),
}

impl From<AggregateResult> for NumberObject {
    fn from(result: AggregateResult) -> Self {
        match result {
            AggregateResult::Number(value) => NumberObject::Number(NumberAsString(value)),
            AggregateResult::NumberVec(values) => {
                NumberObject::NumberVec(values.into_iter().map(NumberAsString).collect())
            }
        }
    }
}

impl From<NumberObject> for AggregateResult {
    fn from(object: NumberObject) -> Self {
        match object.into_parts() {
            Ok(value) => AggregateResult::Number(value),
            Err(values) => AggregateResult::NumberVec(values),
        }
    }
}

impl Display for AggregateResult {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            AggregateResult::Number(value) => write!(f, "{value}"),
            AggregateResult::NumberVec(values) => {
                f.write_str("[")?;
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{value}")?;
                }
                f.write_str("]")
            }
        }
    }
}

/// Returns the index of the histogram bucket that `value` falls into: the first boundary that
/// `value` does not exceed, or `boundaries.len()` for values above every boundary. `boundaries`
/// must be sorted in increasing order.
pub fn histogram_bucket_index(boundaries: &[u64], value: u64) -> usize {
    boundaries.partition_point(|boundary| *boundary < value)
}

/// Generate a random measurement that is valid for `scheme`.
pub fn generate_measurement(scheme: &MeasurementScheme) -> Result<Measurement, Error> {
    generate_measurement_with_rng(scheme, &mut rand::rng())
}

/// Like [`generate_measurement`], drawing randomness from the provided generator.
pub fn generate_measurement_with_rng<R: Rng + ?Sized>(
    scheme: &MeasurementScheme,
    rng: &mut R,
) -> Result<Measurement, Error> {
    scheme.validate()?;
    Ok(match scheme {
        MeasurementScheme::Count => Measurement::Number(rng.random_range(0..=1)),
        MeasurementScheme::Sum { bits } => Measurement::Number(random_integer(*bits, rng)),
        MeasurementScheme::SumVec { bits, length, .. } => Measurement::NumberVec(
            (0..*length)
                .map(|_| random_integer(*bits, rng))
                .collect(),
        ),
        MeasurementScheme::Histogram {
            buckets: HistogramBuckets::Boundaries(boundaries),
            ..
        } => Measurement::Number(random_value_in_bucket(boundaries, rng).into()),
        MeasurementScheme::Histogram {
            buckets: HistogramBuckets::Length(length),
            ..
        } => Measurement::Number(rng.random_range(0..*length) as u128),
        MeasurementScheme::Unsupported { name } => {
            return Err(Error::UnsupportedScheme(name.clone()));
        }
    })
}

fn random_integer<R: Rng + ?Sized>(bits: u32, rng: &mut R) -> u128 {
    if bits >= 64 {
        rng.random::<u64>().into()
    } else {
        rng.random_range(0..1u64 << bits).into()
    }
}

/// Pick a bucket uniformly, then a value inside it.
fn random_value_in_bucket<R: Rng + ?Sized>(boundaries: &[u64], rng: &mut R) -> u64 {
    let bucket = rng.random_range(0..=boundaries.len());
    match (bucket.checked_sub(1).map(|i| boundaries[i]), boundaries.get(bucket)) {
        (None, Some(upper)) => rng.random_range(0..=*upper),
        (Some(lower), Some(upper)) => rng.random_range(lower + 1..=*upper),
        (Some(lower), None) => {
            let lower = lower + 1;
            rng.random_range(lower..=lower.saturating_mul(2))
        }
        (None, None) => rng.random::<u32>().into(),
    }
}

/// Compute the aggregate a correct deployment must report for `measurements` under `scheme`. An
/// empty batch aggregates to the additive identity of the scheme's result shape.
pub fn aggregate_measurements(
    scheme: &MeasurementScheme,
    measurements: &[Measurement],
) -> Result<AggregateResult, Error> {
    scheme.validate()?;
    match scheme {
        MeasurementScheme::Count => {
            let mut total: u128 = 0;
            for measurement in measurements {
                let value = scalar(scheme, measurement)?;
                if value > 1 {
                    return Err(invalid_measurement(
                        scheme,
                        format!("count measurement {value} is not 0 or 1"),
                    ));
                }
                total += value;
            }
            Ok(AggregateResult::Number(total))
        }
        MeasurementScheme::Sum { bits } => {
            let mut total: u128 = 0;
            for measurement in measurements {
                let value = scalar(scheme, measurement)?;
                check_bit_width(scheme, *bits, value)?;
                total = total.checked_add(value).ok_or(Error::Overflow)?;
            }
            Ok(AggregateResult::Number(total))
        }
        MeasurementScheme::SumVec { bits, length, .. } => {
            let mut totals = vec![0u128; *length];
            for measurement in measurements {
                let values = vector(scheme, measurement)?;
                if values.len() != *length {
                    return Err(invalid_measurement(
                        scheme,
                        format!("expected {length} elements, got {}", values.len()),
                    ));
                }
                for (total, value) in totals.iter_mut().zip(values) {
                    check_bit_width(scheme, *bits, *value)?;
                    *total = total.checked_add(*value).ok_or(Error::Overflow)?;
                }
            }
            Ok(AggregateResult::NumberVec(totals))
        }
        MeasurementScheme::Histogram { buckets, .. } => {
            let bucket_count = match buckets {
                HistogramBuckets::Boundaries(boundaries) => boundaries.len() + 1,
                HistogramBuckets::Length(length) => *length,
            };
            let mut counts = vec![0u128; bucket_count];
            for measurement in measurements {
                let value = scalar(scheme, measurement)?;
                let index = match buckets {
                    HistogramBuckets::Boundaries(boundaries) => {
                        let value = u64::try_from(value).map_err(|_| {
                            invalid_measurement(scheme, format!("value {value} exceeds 64 bits"))
                        })?;
                        histogram_bucket_index(boundaries, value)
                    }
                    HistogramBuckets::Length(length) => usize::try_from(value)
                        .ok()
                        .filter(|index| index < length)
                        .ok_or_else(|| {
                            invalid_measurement(
                                scheme,
                                format!("bucket index {value} out of range for length {length}"),
                            )
                        })?,
                };
                counts[index] += 1;
            }
            Ok(AggregateResult::NumberVec(counts))
        }
        MeasurementScheme::Unsupported { name } => Err(Error::UnsupportedScheme(name.clone())),
    }
}

/// Generate a fresh verification key for a task using `scheme`.
pub fn generate_verify_key(scheme: &MeasurementScheme) -> Result<VerifyKey, Error> {
    scheme.validate()?;
    Ok(VerifyKey::generate())
}

fn invalid_measurement(scheme: &MeasurementScheme, message: String) -> Error {
    Error::InvalidMeasurement {
        scheme: scheme.name().to_string(),
        message,
    }
}

fn scalar(scheme: &MeasurementScheme, measurement: &Measurement) -> Result<u128, Error> {
    match measurement {
        Measurement::Number(value) => Ok(*value),
        Measurement::NumberVec(_) => Err(invalid_measurement(
            scheme,
            "expected a number, got a vector".to_string(),
        )),
    }
}

fn vector<'a>(scheme: &MeasurementScheme, measurement: &'a Measurement) -> Result<&'a [u128], Error> {
    match measurement {
        Measurement::NumberVec(values) => Ok(values),
        Measurement::Number(_) => Err(invalid_measurement(
            scheme,
            "expected a vector, got a number".to_string(),
        )),
    }
}

fn check_bit_width(scheme: &MeasurementScheme, bits: u32, value: u128) -> Result<(), Error> {
    if value >> bits != 0 {
        return Err(invalid_measurement(
            scheme,
            format!("value {value} does not fit in {bits} bits"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::{
        task::VerifyKey,
        vdaf::{
            AggregateResult, Error, HistogramBuckets, Measurement, MeasurementScheme,
            aggregate_measurements, generate_measurement, generate_verify_key,
            histogram_bucket_index,
        },
    };
    use assert_matches::assert_matches;
    use quickcheck::TestResult;
    use quickcheck_macros::quickcheck;
    use rand::seq::SliceRandom;
    use rstest::rstest;
    use serde_json::json;

    fn histogram(boundaries: &[u64]) -> MeasurementScheme {
        MeasurementScheme::Histogram {
            buckets: HistogramBuckets::Boundaries(boundaries.to_vec()),
            chunk_length: None,
        }
    }

    fn numbers(values: &[u128]) -> Vec<Measurement> {
        values.iter().copied().map(Measurement::Number).collect()
    }

    fn sample_schemes() -> Vec<MeasurementScheme> {
        vec![
            MeasurementScheme::Count,
            MeasurementScheme::Sum { bits: 1 },
            MeasurementScheme::Sum { bits: 8 },
            MeasurementScheme::Sum { bits: 64 },
            MeasurementScheme::SumVec {
                bits: 8,
                length: 12,
                chunk_length: Some(9),
            },
            histogram(&[1, 3, 10, 30]),
            histogram(&[0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10]),
            histogram(&[]),
            MeasurementScheme::Histogram {
                buckets: HistogramBuckets::Length(10),
                chunk_length: Some(3),
            },
        ]
    }

    #[test]
    fn count() {
        assert_eq!(
            aggregate_measurements(&MeasurementScheme::Count, &numbers(&[1, 0, 1, 1, 0])),
            Ok(AggregateResult::Number(3))
        );
        assert_matches!(
            aggregate_measurements(&MeasurementScheme::Count, &numbers(&[2])),
            Err(Error::InvalidMeasurement { .. })
        );
    }

    #[test]
    fn sum() {
        let scheme = MeasurementScheme::Sum { bits: 8 };
        assert_eq!(
            aggregate_measurements(&scheme, &numbers(&[255, 1, 17])),
            Ok(AggregateResult::Number(273))
        );
        assert_matches!(
            aggregate_measurements(&scheme, &numbers(&[256])),
            Err(Error::InvalidMeasurement { .. })
        );

        // Sums of many 64-bit measurements exceed u64.
        let scheme = MeasurementScheme::Sum { bits: 64 };
        assert_eq!(
            aggregate_measurements(&scheme, &numbers(&[u64::MAX.into(), u64::MAX.into()])),
            Ok(AggregateResult::Number(2 * u128::from(u64::MAX)))
        );
    }

    #[test]
    fn sum_vec() {
        let scheme = MeasurementScheme::SumVec {
            bits: 4,
            length: 3,
            chunk_length: None,
        };
        assert_eq!(
            aggregate_measurements(
                &scheme,
                &[
                    Measurement::NumberVec(vec![1, 2, 3]),
                    Measurement::NumberVec(vec![15, 0, 1]),
                ]
            ),
            Ok(AggregateResult::NumberVec(vec![16, 2, 4]))
        );
        assert_matches!(
            aggregate_measurements(&scheme, &[Measurement::NumberVec(vec![1, 2])]),
            Err(Error::InvalidMeasurement { .. })
        );
        assert_matches!(
            aggregate_measurements(&scheme, &numbers(&[1])),
            Err(Error::InvalidMeasurement { .. })
        );
    }

    #[test]
    fn histogram_boundaries() {
        let scheme = histogram(&[1, 3, 10, 30]);
        assert_eq!(
            aggregate_measurements(&scheme, &numbers(&[0, 1, 2, 3, 4, 10, 11, 30, 31, 1000])),
            Ok(AggregateResult::NumberVec(vec![2, 2, 2, 2, 2]))
        );
    }

    #[test]
    fn histogram_length() {
        let scheme = MeasurementScheme::Histogram {
            buckets: HistogramBuckets::Length(4),
            chunk_length: Some(2),
        };
        assert_eq!(
            aggregate_measurements(&scheme, &numbers(&[0, 3, 3, 1])),
            Ok(AggregateResult::NumberVec(vec![1, 1, 0, 2]))
        );
        assert_matches!(
            aggregate_measurements(&scheme, &numbers(&[4])),
            Err(Error::InvalidMeasurement { .. })
        );
    }

    #[test]
    fn empty_batch_is_identity() {
        assert_eq!(
            aggregate_measurements(&MeasurementScheme::Count, &[]),
            Ok(AggregateResult::Number(0))
        );
        assert_eq!(
            aggregate_measurements(&MeasurementScheme::Sum { bits: 8 }, &[]),
            Ok(AggregateResult::Number(0))
        );
        assert_eq!(
            aggregate_measurements(
                &MeasurementScheme::SumVec {
                    bits: 8,
                    length: 3,
                    chunk_length: None
                },
                &[]
            ),
            Ok(AggregateResult::NumberVec(vec![0; 3]))
        );
        assert_eq!(
            aggregate_measurements(&histogram(&[1, 3, 10, 30]), &[]),
            Ok(AggregateResult::NumberVec(vec![0; 5]))
        );
    }

    #[test]
    fn generated_measurements_are_valid() {
        for scheme in sample_schemes() {
            let measurements = (0..200)
                .map(|_| generate_measurement(&scheme).unwrap())
                .collect::<Vec<_>>();
            let result = aggregate_measurements(&scheme, &measurements)
                .unwrap_or_else(|err| panic!("{scheme:?}: {err}"));

            match (&scheme, result) {
                (MeasurementScheme::Count | MeasurementScheme::Sum { .. }, result) => {
                    assert_matches!(result, AggregateResult::Number(_))
                }
                (
                    MeasurementScheme::Histogram {
                        buckets: HistogramBuckets::Boundaries(boundaries),
                        ..
                    },
                    AggregateResult::NumberVec(counts),
                ) => {
                    assert_eq!(counts.len(), boundaries.len() + 1);
                    assert_eq!(counts.iter().sum::<u128>(), 200);
                }
                (_, result) => assert_matches!(result, AggregateResult::NumberVec(_)),
            }
        }
    }

    #[test]
    fn unsupported_scheme() {
        let scheme = MeasurementScheme::Unsupported {
            name: "Poplar1".to_string(),
        };
        let expected = Error::UnsupportedScheme("Poplar1".to_string());
        assert_eq!(generate_measurement(&scheme), Err(expected.clone()));
        assert_eq!(aggregate_measurements(&scheme, &[]), Err(expected.clone()));
        assert_eq!(generate_verify_key(&scheme), Err(expected));
    }

    #[test]
    fn invalid_schemes() {
        assert_matches!(
            generate_measurement(&MeasurementScheme::Sum { bits: 0 }),
            Err(Error::InvalidScheme(_))
        );
        assert_matches!(
            generate_measurement(&MeasurementScheme::Sum { bits: 65 }),
            Err(Error::InvalidScheme(_))
        );
        assert_matches!(
            generate_measurement(&histogram(&[3, 3])),
            Err(Error::InvalidScheme(_))
        );
        assert_matches!(
            generate_measurement(&histogram(&[u64::MAX])),
            Err(Error::InvalidScheme(_))
        );
    }

    #[test]
    fn verify_key_length() {
        for scheme in sample_schemes() {
            assert_eq!(
                generate_verify_key(&scheme).unwrap().as_bytes().len(),
                VerifyKey::LEN
            );
        }
    }

    #[quickcheck]
    fn sum_is_order_independent(values: Vec<u16>) -> bool {
        let scheme = MeasurementScheme::Sum { bits: 16 };
        let mut measurements = values
            .into_iter()
            .map(|value| Measurement::Number(value.into()))
            .collect::<Vec<_>>();
        let before = aggregate_measurements(&scheme, &measurements);
        measurements.shuffle(&mut rand::rng());
        before == aggregate_measurements(&scheme, &measurements)
    }

    #[quickcheck]
    fn histogram_is_order_independent(values: Vec<u8>) -> bool {
        let scheme = histogram(&[1, 3, 10, 30]);
        let mut measurements = values
            .into_iter()
            .map(|value| Measurement::Number(value.into()))
            .collect::<Vec<_>>();
        let before = aggregate_measurements(&scheme, &measurements);
        measurements.shuffle(&mut rand::rng());
        before == aggregate_measurements(&scheme, &measurements)
    }

    #[quickcheck]
    fn histogram_bucket_is_total_and_exclusive(mut boundaries: Vec<u64>, value: u64) -> TestResult {
        boundaries.sort_unstable();
        boundaries.dedup();

        let index = histogram_bucket_index(&boundaries, value);
        if index > boundaries.len() {
            return TestResult::failed();
        }
        let above_lower = index == 0 || boundaries[index - 1] < value;
        let within_upper = index == boundaries.len() || value <= boundaries[index];
        TestResult::from_bool(above_lower && within_upper)
    }

    #[rstest]
    #[case::count(MeasurementScheme::Count, json!({"type": "Prio3Count"}))]
    #[case::sum(MeasurementScheme::Sum { bits: 8 }, json!({"type": "Prio3Sum", "bits": "8"}))]
    #[case::sum_vec(
        MeasurementScheme::SumVec { bits: 8, length: 12, chunk_length: Some(9) },
        json!({"type": "Prio3SumVec", "bits": "8", "length": "12", "chunk_length": "9"}),
    )]
    #[case::histogram_boundaries(
        histogram(&[1, 3, 10, 30]),
        json!({"type": "Prio3Histogram", "buckets": ["1", "3", "10", "30"]}),
    )]
    #[case::histogram_length(
        MeasurementScheme::Histogram {
            buckets: HistogramBuckets::Length(10),
            chunk_length: Some(3),
        },
        json!({"type": "Prio3Histogram", "length": "10", "chunk_length": "3"}),
    )]
    #[case::unsupported(
        MeasurementScheme::Unsupported { name: "Poplar1".to_string() },
        json!({"type": "Poplar1"}),
    )]
    fn scheme_wire_format(#[case] scheme: MeasurementScheme, #[case] expected: serde_json::Value) {
        assert_eq!(serde_json::to_value(&scheme).unwrap(), expected);
        assert_eq!(
            serde_json::from_value::<MeasurementScheme>(expected).unwrap(),
            scheme
        );
    }

    #[test]
    fn malformed_scheme_objects() {
        assert!(serde_json::from_value::<MeasurementScheme>(json!({"type": "Prio3Sum"})).is_err());
        assert!(
            serde_json::from_value::<MeasurementScheme>(
                json!({"type": "Prio3Histogram", "length": "2", "buckets": ["1"]})
            )
            .is_err()
        );
        assert!(serde_json::from_value::<MeasurementScheme>(json!({"bits": "8"})).is_err());
    }

    #[test]
    fn result_parsing_compares_by_value() {
        assert_eq!(
            serde_json::from_value::<AggregateResult>(json!("42")).unwrap(),
            AggregateResult::Number(42)
        );
        assert_eq!(
            serde_json::from_value::<AggregateResult>(json!(42)).unwrap(),
            AggregateResult::Number(42)
        );
        assert_eq!(
            serde_json::from_value::<AggregateResult>(json!(["1", 2, "03"])).unwrap(),
            AggregateResult::NumberVec(vec![1, 2, 3])
        );
        assert_eq!(
            serde_json::to_value(AggregateResult::NumberVec(vec![1, 2])).unwrap(),
            json!(["1", "2"])
        );
        assert_eq!(
            serde_json::to_value(Measurement::Number(7)).unwrap(),
            json!("7")
        );
        assert_eq!(
            AggregateResult::NumberVec(vec![1, 2, 3]).to_string(),
            "[1, 2, 3]"
        );
    }
}

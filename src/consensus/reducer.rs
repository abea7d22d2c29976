use super::error::ConsensusError;
use primitive_types::U256;
use serde_json::{Number, Value};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Reduces one field's values across replicas to a single value.
///
/// Every reducer is order-independent: shuffling the replicas never changes
/// the result.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldReducer {
    /// Upper median of numeric values. JSON numbers and integer strings
    /// (decimal or `0x` hex) are accepted; the observed value is returned
    /// unchanged, never an average.
    Median,
    /// The value reported by a strict majority of replicas.
    Majority,
    /// All replicas must report structurally equal values.
    Identical,
    /// Numeric values must all lie within `max_deviation` of their median,
    /// which is returned.
    Tolerance { max_deviation: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Numeric {
    Float(f64),
    Integer(U256),
}

impl Numeric {
    fn parse(field: &str, value: &Value) -> Result<Self, ConsensusError> {
        match value {
            Value::Number(number) => number
                .as_f64()
                .filter(|float| float.is_finite())
                .map(Numeric::Float)
                .ok_or_else(|| {
                    ConsensusError::disagreement(field, format!("{number} is not a finite number"))
                }),
            Value::String(raw) => {
                let raw = raw.trim();
                let parsed = match raw.strip_prefix("0x") {
                    Some(digits) => U256::from_str_radix(digits, 16).ok(),
                    None => U256::from_dec_str(raw).ok(),
                };
                parsed.map(Numeric::Integer).ok_or_else(|| {
                    ConsensusError::disagreement(field, format!("{raw:?} is not an integer"))
                })
            }
            other => Err(ConsensusError::disagreement(
                field,
                format!("{other} is not numeric"),
            )),
        }
    }

    fn is_float(&self) -> bool {
        matches!(self, Numeric::Float(_))
    }

    /// Total order: floats by value, integers by value, every float before
    /// every integer.
    fn total_cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Numeric::Float(a), Numeric::Float(b)) => a.total_cmp(b),
            (Numeric::Integer(a), Numeric::Integer(b)) => a.cmp(b),
            (Numeric::Float(_), Numeric::Integer(_)) => Ordering::Less,
            (Numeric::Integer(_), Numeric::Float(_)) => Ordering::Greater,
        }
    }

    fn deviates(&self, center: &Self, max_deviation: f64) -> bool {
        match (self, center) {
            (Numeric::Float(a), Numeric::Float(b)) => (a - b).abs() > max_deviation,
            (Numeric::Integer(a), Numeric::Integer(b)) => {
                let distance = if a > b { *a - *b } else { *b - *a };
                distance > U256::from(max_deviation.floor() as u128)
            }
            _ => true,
        }
    }
}

impl FieldReducer {
    pub fn reduce(&self, field: &str, values: &[Value]) -> Result<Value, ConsensusError> {
        if values.is_empty() {
            return Err(ConsensusError::EmptyObservations);
        }

        match self {
            FieldReducer::Median => median(field, values).map(|(_, value)| value),
            FieldReducer::Majority => majority(field, values),
            FieldReducer::Identical => identical(field, values),
            FieldReducer::Tolerance { max_deviation } => {
                let (center, value) = median(field, values)?;
                for candidate in values {
                    if Numeric::parse(field, candidate)?.deviates(&center, *max_deviation) {
                        return Err(ConsensusError::disagreement(
                            field,
                            format!(
                                "{candidate} deviates from median {value} by more than {max_deviation}"
                            ),
                        ));
                    }
                }
                Ok(value)
            }
        }
    }
}

fn median(field: &str, values: &[Value]) -> Result<(Numeric, Value), ConsensusError> {
    let mut parsed = values
        .iter()
        .map(|value| Ok((Numeric::parse(field, value)?, value)))
        .collect::<Result<Vec<_>, ConsensusError>>()?;

    let floats = parsed.iter().filter(|(numeric, _)| numeric.is_float()).count();
    if floats != 0 && floats != parsed.len() {
        return Err(ConsensusError::disagreement(
            field,
            "replicas mix JSON numbers and integer strings",
        ));
    }
    parsed.sort_by(|(a, a_raw), (b, b_raw)| {
        a.total_cmp(b)
            .then_with(|| canonical(a_raw).cmp(&canonical(b_raw)))
    });

    let (numeric, value) = parsed[parsed.len() / 2];
    Ok((numeric, value.clone()))
}

fn majority(field: &str, values: &[Value]) -> Result<Value, ConsensusError> {
    let mut counts: BTreeMap<String, (usize, &Value)> = BTreeMap::new();
    for value in values {
        counts.entry(canonical(value)).or_insert((0, value)).0 += 1;
    }

    let needed = values.len() / 2 + 1;
    counts
        .into_values()
        .find(|(count, _)| *count >= needed)
        .map(|(_, value)| value.clone())
        .ok_or_else(|| {
            ConsensusError::disagreement(
                field,
                format!("no value reported by at least {needed} of {} replicas", values.len()),
            )
        })
}

fn identical(field: &str, values: &[Value]) -> Result<Value, ConsensusError> {
    let expected = canonical(&values[0]);
    if let Some((replica, _)) = values
        .iter()
        .enumerate()
        .skip(1)
        .find(|(_, value)| canonical(value) != expected)
    {
        return Err(ConsensusError::disagreement(
            field,
            format!("replica {replica} differs from replica 0"),
        ));
    }
    Ok(values[0].clone())
}

/// Serialization with sorted object keys and integral floats written as
/// integers, used for equality and tie-breaks.
pub(crate) fn canonical(value: &Value) -> String {
    match value {
        Value::Number(number) => canonical_number(number),
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let body: Vec<String> = entries
                .into_iter()
                .map(|(key, value)| format!("{}:{}", Value::String(key.clone()), canonical(value)))
                .collect();
            format!("{{{}}}", body.join(","))
        }
        Value::Array(items) => {
            let body: Vec<String> = items.iter().map(canonical).collect();
            format!("[{}]", body.join(","))
        }
        other => other.to_string(),
    }
}

/// Largest magnitude below which every integral `f64` is exact.
const EXACT_FLOAT_LIMIT: f64 = 9_007_199_254_740_992.0;

fn canonical_number(number: &Number) -> String {
    match number.as_f64() {
        Some(float) if number.is_f64() && float.fract() == 0.0 && float.abs() < EXACT_FLOAT_LIMIT => {
            (float as i64).to_string()
        }
        _ => number.to_string(),
    }
}

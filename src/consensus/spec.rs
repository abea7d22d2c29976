use super::error::ConsensusError;
use super::reducer::{canonical, FieldReducer};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;

/// Per-field reducer table for a record type `T`.
///
/// `T` is viewed through its serde representation: it must serialize to a
/// JSON object, and every field of that object needs a reducer. A spec built
/// with [`AggregationSpec::identical`] instead compares the complete records
/// structurally.
pub struct AggregationSpec<T> {
    reducers: BTreeMap<String, FieldReducer>,
    whole_record: bool,
    _record: PhantomData<fn() -> T>,
}

impl<T> Clone for AggregationSpec<T> {
    fn clone(&self) -> Self {
        Self {
            reducers: self.reducers.clone(),
            whole_record: self.whole_record,
            _record: PhantomData,
        }
    }
}

impl<T> fmt::Debug for AggregationSpec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregationSpec")
            .field("reducers", &self.reducers)
            .field("whole_record", &self.whole_record)
            .finish()
    }
}

impl<T> Default for AggregationSpec<T> {
    fn default() -> Self {
        Self {
            reducers: BTreeMap::new(),
            whole_record: false,
            _record: PhantomData,
        }
    }
}

impl<T> AggregationSpec<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Structural equality over the complete record.
    pub fn identical() -> Self {
        Self {
            whole_record: true,
            ..Self::default()
        }
    }

    pub fn field(mut self, name: impl Into<String>, reducer: FieldReducer) -> Self {
        self.reducers.insert(name.into(), reducer);
        self
    }

    pub fn reducer(&self, field: &str) -> Option<&FieldReducer> {
        self.reducers.get(field)
    }

    pub fn aggregate(&self, observations: &[T]) -> Result<T, ConsensusError> {
        if observations.is_empty() {
            return Err(ConsensusError::EmptyObservations);
        }

        let values = observations
            .iter()
            .map(|observation| {
                serde_json::to_value(observation).map_err(|err| ConsensusError::NotARecord {
                    detail: err.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let agreed = if self.whole_record {
            FieldReducer::Identical.reduce("record", &values)?
        } else {
            Value::Object(self.reduce_fields(&values)?)
        };

        serde_json::from_value(agreed).map_err(|err| ConsensusError::NotARecord {
            detail: format!("agreed record does not deserialize: {err}"),
        })
    }

    fn reduce_fields(&self, values: &[Value]) -> Result<Map<String, Value>, ConsensusError> {
        let records = values
            .iter()
            .map(|value| match value {
                Value::Object(map) => Ok(map),
                other => Err(ConsensusError::NotARecord {
                    detail: format!("expected an object, got {}", canonical(other)),
                }),
            })
            .collect::<Result<Vec<_>, _>>()?;

        let first = records[0];
        for field in first.keys() {
            if !self.reducers.contains_key(field) {
                return Err(ConsensusError::MissingReducer {
                    field: field.clone(),
                });
            }
        }
        for field in self.reducers.keys() {
            if !first.contains_key(field) {
                return Err(ConsensusError::UnknownField {
                    field: field.clone(),
                });
            }
        }

        if let Some((replica, record)) = records
            .iter()
            .enumerate()
            .find(|(_, record)| record.len() != first.len())
        {
            return Err(ConsensusError::disagreement(
                "record",
                format!(
                    "replica {replica} reported {} fields, expected {}",
                    record.len(),
                    first.len()
                ),
            ));
        }

        let mut agreed = Map::new();
        for (field, reducer) in &self.reducers {
            let mut column = Vec::with_capacity(records.len());
            for (replica, record) in records.iter().enumerate() {
                match record.get(field) {
                    Some(value) => column.push(value.clone()),
                    None => {
                        return Err(ConsensusError::disagreement(
                            field,
                            format!("replica {replica} did not report the field"),
                        ))
                    }
                }
            }
            agreed.insert(field.clone(), reducer.reduce(field, &column)?);
        }

        Ok(agreed)
    }
}

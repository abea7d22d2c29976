use anyhow::Error as AnyError;
use std::fmt;

/// Reasons an observation set could not be reduced to an agreed record.
#[derive(Debug)]
pub enum ConsensusError {
    EmptyObservations,
    /// An observation (or the agreed result) is not a field/value record.
    NotARecord {
        detail: String,
    },
    /// The record has a field the aggregation spec has no reducer for.
    MissingReducer {
        field: String,
    },
    /// The aggregation spec names a field the record does not have.
    UnknownField {
        field: String,
    },
    Disagreement {
        field: String,
        detail: String,
    },
    ReplicaFailed {
        replica: usize,
        source: AnyError,
    },
}

impl ConsensusError {
    pub(crate) fn disagreement(field: &str, detail: impl Into<String>) -> Self {
        ConsensusError::Disagreement {
            field: field.to_owned(),
            detail: detail.into(),
        }
    }
}

impl fmt::Display for ConsensusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsensusError::EmptyObservations => {
                write!(f, "cannot aggregate an empty observation set")
            }
            ConsensusError::NotARecord { detail } => {
                write!(f, "observation is not a record: {detail}")
            }
            ConsensusError::MissingReducer { field } => {
                write!(f, "no reducer configured for field {field}")
            }
            ConsensusError::UnknownField { field } => {
                write!(f, "reducer configured for unknown field {field}")
            }
            ConsensusError::Disagreement { field, detail } => {
                write!(f, "replicas disagree on {field}: {detail}")
            }
            ConsensusError::ReplicaFailed { replica, .. } => write!(f, "replica {replica} failed"),
        }
    }
}

impl std::error::Error for ConsensusError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConsensusError::ReplicaFailed { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

//! Replicated fetch and field-wise consensus. A fetch function runs once per
//! replica, every replica must succeed, and the observations are reduced
//! field by field into one agreed record.

mod error;
mod http;
mod reducer;
mod replicated;
mod spec;

pub use error::ConsensusError;
pub use http::{FetchError, HttpFetcher, HttpRequest, HttpResponse, ReqwestFetcher};
pub use reducer::FieldReducer;
pub use replicated::{run_replicated, ReplicatedFetcher};
pub use spec::AggregationSpec;

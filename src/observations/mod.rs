//! Raw payloads and their normalization into day-bucketed observations
//!
//! Each source client, and each saved payload envelope, yields a [`RawPayload`]. The
//! [`normalize`] function validates it and converts it into a [`FetchObservation`] keyed
//! by UTC calendar day, plus any [`CounterReading`]s the payload carries.
//!
//! # Day Buckets
//!
//! Traffic payloads are already reported per UTC day. Analytics payloads are reported
//! per day in the property's own timezone and are reassigned with the majority-overlap
//! rule in [`tz_bucket`].
//!
//! Anything that fails validation becomes a [`MalformedObservation`] and never reaches
//! the ledger.

mod malformed;
mod normalizer;
mod observation;
mod payloads;
mod source;
pub mod tz_bucket;

pub use malformed::{MalformedObservation, Problem};
pub use normalizer::{TRAFFIC_WINDOW_DAYS, normalize};
pub use observation::{CounterKind, CounterReading, DayMetrics, FetchObservation, Normalized};
pub use payloads::{
    AnalyticsPayload, AnalyticsRow, CountersPayload, PayloadEnvelope, RawPayload, ReleasesPayload, TrafficDay, TrafficPayload,
};
pub use source::{MetricName, Metrics, Source};

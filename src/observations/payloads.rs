//! Raw payload shapes as they arrive from the source clients or from saved files.
//!
//! Every field is optional at this level so the normalizer can name exactly which
//! required field is missing instead of surfacing an opaque deserialization error.

use crate::registry::RepoId;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum::IntoStaticStr;

/// One raw API payload, tagged by the source that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, IntoStaticStr)]
#[serde(tag = "source", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RawPayload {
    TrafficViews(TrafficPayload),
    TrafficClones(TrafficPayload),
    Releases(ReleasesPayload),
    GaSessions(AnalyticsPayload),
    Counters(CountersPayload),
}

impl RawPayload {
    /// The payload's tag, as used in saved envelopes and log lines.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        self.into()
    }
}

/// A rolling-window traffic report: `{window: [start, end], days: [{day, count, uniqueCount}]}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrafficPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window: Option<[NaiveDate; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days: Option<Vec<TrafficDay>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrafficDay {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique_count: Option<i64>,
}

/// Release download totals: `{totalDownloadCount, perAssetCounts}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleasesPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_download_count: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub per_asset_counts: Option<BTreeMap<String, i64>>,
}

/// Daily analytics rows in the property's own timezone.
///
/// `window` is the local date range that was queried; days inside it without a row
/// are reported as zero. `timezone` overrides the repository's reporting timezone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window: Option<[NaiveDate; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows: Option<Vec<AnalyticsRow>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsRow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sessions: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub users: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_users: Option<i64>,
}

/// Fork and star totals as plain integers with the time they were read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CountersPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forks: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stars: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_at: Option<DateTime<Utc>>,
}

/// A saved payload together with the context needed to normalize it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadEnvelope {
    pub repository: RepoId,
    pub fetched_at: DateTime<Utc>,
    pub payload: RawPayload,
}

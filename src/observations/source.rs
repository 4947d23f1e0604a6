use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

/// Named counters recorded for one day and one source.
///
/// A `BTreeMap` keeps the serialized form in a stable order.
pub type Metrics = BTreeMap<MetricName, u64>;

/// The independent producers of observations.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display, EnumString, EnumIter, IntoStaticStr, ValueEnum,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum Source {
    /// Repository page views, reported as a trailing 14-day window
    TrafficViews,

    /// Repository clones, reported as a trailing 14-day window
    TrafficClones,

    /// Release download totals, snapshotted on the day of the fetch
    Releases,

    /// Documentation-site sessions bucketed by the analytics property's timezone
    GaSessions,
}

impl Source {
    /// The metrics a well-formed observation of this source carries.
    #[must_use]
    pub const fn metric_names(self) -> &'static [MetricName] {
        match self {
            Self::TrafficViews => &[MetricName::Views, MetricName::UniqueViews],
            Self::TrafficClones => &[MetricName::Clones, MetricName::UniqueClones],
            Self::Releases => &[MetricName::Downloads, MetricName::Assets],
            Self::GaSessions => &[MetricName::Sessions, MetricName::Users, MetricName::NewUsers],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display, EnumString, EnumIter, IntoStaticStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MetricName {
    Views,
    UniqueViews,
    Clones,
    UniqueClones,
    Downloads,
    Assets,
    Sessions,
    Users,
    NewUsers,
}

use super::malformed::{MalformedObservation, Problem};
use super::payloads::{AnalyticsPayload, CountersPayload, RawPayload, ReleasesPayload, TrafficPayload};
use super::tz_bucket::{resolve_timezone, utc_day_for_local_day};
use super::{CounterKind, CounterReading, DayMetrics, FetchObservation, MetricName, Metrics, Normalized, Source};
use crate::registry::Repository;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::BTreeMap;

const LOG_TARGET: &str = "normalizer";

/// Length of the traffic API's trailing window, today included.
pub const TRAFFIC_WINDOW_DAYS: u64 = 14;

/// Extra days a traffic window may span when a fetch straddles UTC midnight.
const TRAFFIC_WINDOW_SLACK_DAYS: u64 = 2;

type Outcome<T> = core::result::Result<T, Problem>;

/// Turn one raw payload into day-bucketed observations and counter readings.
///
/// This never touches the ledger. A payload that fails validation is rejected whole.
pub fn normalize(repository: &Repository, payload: &RawPayload, fetched_at: DateTime<Utc>) -> Result<Normalized, MalformedObservation> {
    let outcome = match payload {
        RawPayload::TrafficViews(traffic) => normalize_traffic(repository, Source::TrafficViews, traffic, fetched_at),
        RawPayload::TrafficClones(traffic) => normalize_traffic(repository, Source::TrafficClones, traffic, fetched_at),
        RawPayload::Releases(releases) => normalize_releases(repository, releases, fetched_at),
        RawPayload::GaSessions(analytics) => normalize_analytics(repository, analytics, fetched_at),
        RawPayload::Counters(counters) => normalize_counters(repository, counters, fetched_at),
    };

    match outcome {
        Ok(normalized) => {
            log::debug!(
                target: LOG_TARGET,
                "Normalized {} payload for '{}' into {} day(s) and {} counter reading(s)",
                payload.kind(),
                repository.id,
                normalized.observation.as_ref().map_or(0, |o| o.days.len()),
                normalized.counters.len()
            );
            Ok(normalized)
        }

        Err(problem) => Err(MalformedObservation::new(repository.id.clone(), payload.kind(), problem)),
    }
}

fn normalize_traffic(repository: &Repository, source: Source, payload: &TrafficPayload, fetched_at: DateTime<Utc>) -> Outcome<Normalized> {
    let [start, end] = payload.window.ok_or(Problem::MissingField("window"))?;
    check_window(start, end)?;

    let span = window_days(start, end);
    let max = TRAFFIC_WINDOW_DAYS + TRAFFIC_WINDOW_SLACK_DAYS;
    if span > max {
        return Err(Problem::WindowTooLong { start, end, days: span, max });
    }

    let days = payload.days.as_ref().ok_or(Problem::MissingField("days"))?;
    let (total_metric, unique_metric) = match source {
        Source::TrafficClones => (MetricName::Clones, MetricName::UniqueClones),
        _ => (MetricName::Views, MetricName::UniqueViews),
    };

    let mut buckets = BTreeMap::new();
    for entry in days {
        let day = entry.day.ok_or(Problem::MissingField("day"))?;
        let count = non_negative("count", Some(day), entry.count)?;
        let unique = non_negative("uniqueCount", Some(day), entry.unique_count)?;

        if day < start || day > end {
            return Err(Problem::DayOutsideWindow { day, start, end });
        }

        let metrics = Metrics::from([(total_metric, count), (unique_metric, unique)]);
        if buckets.insert(day, metrics).is_some() {
            return Err(Problem::DuplicateDay(day));
        }
    }

    // the traffic API leaves out days without activity
    for day in start.iter_days().take_while(|d| *d <= end) {
        let _ = buckets.entry(day).or_insert_with(|| Metrics::from([(total_metric, 0), (unique_metric, 0)]));
    }

    Ok(Normalized {
        observation: Some(observation(repository, source, start, end, buckets, fetched_at)),
        counters: Vec::new(),
    })
}

fn normalize_releases(repository: &Repository, payload: &ReleasesPayload, fetched_at: DateTime<Utc>) -> Outcome<Normalized> {
    let day = fetched_at.date_naive();
    let total = non_negative("totalDownloadCount", None, payload.total_download_count)?;
    let assets = payload.per_asset_counts.as_ref().ok_or(Problem::MissingField("perAssetCounts"))?;

    let mut asset_sum: i64 = 0;
    for count in assets.values() {
        let _ = non_negative("perAssetCounts", None, Some(*count))?;
        asset_sum = asset_sum.saturating_add(*count);
    }

    if u64::try_from(asset_sum).unwrap_or(u64::MAX) > total {
        return Err(Problem::TotalBelowAssets {
            total: i64::try_from(total).unwrap_or(i64::MAX),
            asset_sum,
        });
    }

    let metrics = Metrics::from([(MetricName::Downloads, total), (MetricName::Assets, u64::try_from(assets.len()).unwrap_or(u64::MAX))]);

    Ok(Normalized {
        observation: Some(observation(
            repository,
            Source::Releases,
            day,
            day,
            BTreeMap::from([(day, metrics)]),
            fetched_at,
        )),
        counters: vec![CounterReading {
            repository: repository.id.clone(),
            kind: CounterKind::ReleaseDownloads,
            value: total,
            observed_at: fetched_at,
        }],
    })
}

fn normalize_analytics(repository: &Repository, payload: &AnalyticsPayload, fetched_at: DateTime<Utc>) -> Outcome<Normalized> {
    let tz_name = payload.timezone.as_deref().unwrap_or(&repository.reporting_timezone);
    let tz = resolve_timezone(tz_name).map_err(|e| {
        log::debug!(target: LOG_TARGET, "Could not resolve timezone '{tz_name}': {e:#}");
        Problem::UnknownTimezone(tz_name.to_string())
    })?;

    let rows = payload.rows.as_ref().ok_or(Problem::MissingField("rows"))?;
    if let Some([start, end]) = payload.window {
        check_window(start, end)?;
    }

    let mut local_days = BTreeMap::new();
    for row in rows {
        let day = row.day.ok_or(Problem::MissingField("day"))?;
        let sessions = non_negative("sessions", Some(day), row.sessions)?;
        let users = non_negative("users", Some(day), row.users)?;
        let new_users = non_negative("newUsers", Some(day), row.new_users)?;

        if let Some([start, end]) = payload.window
            && (day < start || day > end)
        {
            return Err(Problem::DayOutsideWindow { day, start, end });
        }

        let metrics = Metrics::from([
            (MetricName::Sessions, sessions),
            (MetricName::Users, users),
            (MetricName::NewUsers, new_users),
        ]);

        if local_days.insert(day, metrics).is_some() {
            return Err(Problem::DuplicateDay(day));
        }
    }

    if let Some([start, end]) = payload.window {
        for day in start.iter_days().take_while(|d| *d <= end) {
            let _ = local_days.entry(day).or_insert_with(|| {
                Metrics::from([(MetricName::Sessions, 0), (MetricName::Users, 0), (MetricName::NewUsers, 0)])
            });
        }
    }

    let mut buckets: BTreeMap<NaiveDate, Metrics> = BTreeMap::new();
    for (local_day, metrics) in local_days {
        let utc_day = utc_day_for_local_day(local_day, &tz).map_err(|e| {
            log::debug!(target: LOG_TARGET, "Could not place {local_day} in '{tz_name}': {e:#}");
            Problem::UnknownTimezone(tz_name.to_string())
        })?;
        let bucket = buckets.entry(utc_day).or_default();
        for (name, value) in metrics {
            let slot = bucket.entry(name).or_default();
            *slot = slot.saturating_add(value);
        }
    }

    let (Some(start), Some(end)) = (buckets.keys().next().copied(), buckets.keys().next_back().copied()) else {
        return Ok(Normalized::default());
    };

    Ok(Normalized {
        observation: Some(observation(repository, Source::GaSessions, start, end, buckets, fetched_at)),
        counters: Vec::new(),
    })
}

fn normalize_counters(repository: &Repository, payload: &CountersPayload, fetched_at: DateTime<Utc>) -> Outcome<Normalized> {
    if payload.forks.is_none() && payload.stars.is_none() {
        return Err(Problem::MissingField("forks"));
    }

    let observed_at = payload.observed_at.unwrap_or(fetched_at);
    let mut counters = Vec::new();

    for (kind, field, value) in [(CounterKind::Forks, "forks", payload.forks), (CounterKind::Stars, "stars", payload.stars)] {
        if value.is_some() {
            counters.push(CounterReading {
                repository: repository.id.clone(),
                kind,
                value: non_negative(field, None, value)?,
                observed_at,
            });
        }
    }

    Ok(Normalized {
        observation: None,
        counters,
    })
}

fn observation(
    repository: &Repository,
    source: Source,
    window_start: NaiveDate,
    window_end: NaiveDate,
    buckets: BTreeMap<NaiveDate, Metrics>,
    fetched_at: DateTime<Utc>,
) -> FetchObservation {
    FetchObservation {
        repository: repository.id.clone(),
        source,
        window_start,
        window_end,
        days: buckets.into_iter().map(|(day, metrics)| DayMetrics { day, metrics }).collect(),
        fetched_at,
    }
}

fn check_window(start: NaiveDate, end: NaiveDate) -> Outcome<()> {
    if start > end {
        return Err(Problem::InvertedWindow { start, end });
    }

    Ok(())
}

/// Number of days in `start..=end`.
fn window_days(start: NaiveDate, end: NaiveDate) -> u64 {
    u64::try_from((end - start).num_days()).unwrap_or(0) + 1
}

fn non_negative(field: &'static str, day: Option<NaiveDate>, value: Option<i64>) -> Outcome<u64> {
    let value = value.ok_or(Problem::MissingField(field))?;
    if value < 0 {
        return Err(Problem::NegativeCount { field, day, value });
    }

    Ok(value.unsigned_abs())
}

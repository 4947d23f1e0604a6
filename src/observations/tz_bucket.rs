//! Assignment of analytics reporting days to UTC calendar days.
//!
//! An analytics property reports per calendar day in its own timezone. A local day is
//! mapped onto the single UTC day that holds the strict majority of its span. This is an
//! approximation near offset boundaries: the minority hours are attributed to the
//! neighbouring UTC day rather than split.

use crate::Result;
use chrono::{DateTime, Datelike, Days, NaiveDate, Utc};
use jiff::civil;
use jiff::tz::TimeZone;
use ohno::{IntoAppError, app_err};

/// Resolve an IANA timezone name such as `America/Denver` or `UTC`.
pub fn resolve_timezone(name: &str) -> Result<TimeZone> {
    TimeZone::get(name).into_app_err_with(|| format!("unknown reporting timezone '{name}'"))
}

/// The UTC instants at which a local calendar day starts and ends.
pub fn local_day_span(local_day: NaiveDate, tz: &TimeZone) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let start = local_midnight(local_day, tz)?;
    let next_day = local_day
        .checked_add_days(Days::new(1))
        .ok_or_else(|| app_err!("date {local_day} is out of range"))?;
    let end = local_midnight(next_day, tz)?;
    Ok((start, end))
}

/// The local calendar date at an instant.
pub fn local_date(at: DateTime<Utc>, tz: &TimeZone) -> Result<NaiveDate> {
    let timestamp = jiff::Timestamp::from_second(at.timestamp()).into_app_err_with(|| format!("instant {at} is out of range"))?;
    let date = timestamp.to_zoned(tz.clone()).date();

    let month = u32::try_from(date.month()).into_app_err("month out of range")?;
    let day = u32::try_from(date.day()).into_app_err("day out of range")?;
    NaiveDate::from_ymd_opt(i32::from(date.year()), month, day).ok_or_else(|| app_err!("invalid local date {date}"))
}

/// Pick the UTC day that contains more than half of the given local day.
///
/// A 24-hour local day at UTC+02:00 spans 22:00 the previous UTC day to 22:00 on the
/// same-labelled UTC day, so 22 of its hours land on the same-labelled day and that day
/// wins. When no UTC day holds a strict majority (an exact 12/12 split at UTC±12:00) the
/// UTC day with the same calendar label is chosen.
pub fn utc_day_for_local_day(local_day: NaiveDate, tz: &TimeZone) -> Result<NaiveDate> {
    let (start, end) = local_day_span(local_day, tz)?;
    let span = (end - start).num_seconds();

    let mut candidate = start.date_naive();
    let last = (end - chrono::Duration::seconds(1)).date_naive();
    let mut best: Option<(NaiveDate, i64)> = None;

    while candidate <= last {
        let day_start = candidate.and_hms_opt(0, 0, 0).map(|t| t.and_utc());
        let day_end = candidate
            .checked_add_days(Days::new(1))
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|t| t.and_utc());

        let (Some(day_start), Some(day_end)) = (day_start, day_end) else {
            return Err(app_err!("date {candidate} is out of range"));
        };

        let overlap = (end.min(day_end) - start.max(day_start)).num_seconds();
        if overlap * 2 > span {
            return Ok(candidate);
        }

        if best.is_none_or(|(_, seconds)| overlap > seconds) {
            best = Some((candidate, overlap));
        }

        candidate = day_end.date_naive();
    }

    if (start.date_naive()..=last).contains(&local_day) {
        return Ok(local_day);
    }

    best.map(|(day, _)| day)
        .ok_or_else(|| app_err!("local day {local_day} has an empty span"))
}

fn local_midnight(day: NaiveDate, tz: &TimeZone) -> Result<DateTime<Utc>> {
    let year = i16::try_from(day.year()).into_app_err_with(|| format!("year of {day} is out of range"))?;
    let month = i8::try_from(day.month()).into_app_err("month out of range")?;
    let day_of_month = i8::try_from(day.day()).into_app_err("day out of range")?;
    let civil_day = civil::Date::new(year, month, day_of_month).into_app_err_with(|| format!("invalid date {day}"))?;

    let zoned = civil_day
        .to_zoned(tz.clone())
        .into_app_err_with(|| format!("resolving midnight of {day} in the reporting timezone"))?;

    DateTime::from_timestamp(zoned.timestamp().as_second(), 0).ok_or_else(|| app_err!("midnight of {day} is out of range"))
}

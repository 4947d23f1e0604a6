use super::ReportRow;
use crate::Result;
use crate::observations::MetricName;
use core::fmt::Write;
use ohno::IntoAppError;
use strum::IntoEnumIterator;

const TAIL_COLUMNS: [&str; 5] = [
    "finalized",
    "anomaly_flags",
    "estimated_new_views",
    "estimated_returning_views",
    "confidence",
];

/// One line per repository and day; metrics a day has no source for stay empty.
pub fn generate<W: Write>(rows: &[ReportRow], writer: &mut W) -> Result<()> {
    let mut csv = ::csv::Writer::from_writer(Vec::new());

    let mut header = vec!["repository".to_string(), "date".to_string()];
    header.extend(MetricName::iter().map(|m| m.to_string()));
    header.extend(TAIL_COLUMNS.iter().map(ToString::to_string));
    csv.write_record(&header)?;

    for row in rows {
        let mut record = vec![row.repository.to_string(), row.date.to_string()];
        record.extend(MetricName::iter().map(|m| row.metric(m).map(|v| v.to_string()).unwrap_or_default()));
        record.push(row.finalized.to_string());
        record.push(row.anomaly_flags.iter().copied().collect::<Vec<_>>().join(";"));
        record.push(row.derived.estimated_new_views.map(|v| v.to_string()).unwrap_or_default());
        record.push(row.derived.estimated_returning_views.map(|v| v.to_string()).unwrap_or_default());
        record.push(row.derived.confidence.to_string());
        csv.write_record(&record)?;
    }

    let bytes = csv.into_inner().into_app_err("flushing CSV output")?;
    writer.write_str(&String::from_utf8(bytes)?)?;
    Ok(())
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::estimator::{Confidence, DerivedDailyMetric};
    use crate::observations::{Metrics, Source};
    use crate::registry::RepoId;
    use chrono::NaiveDate;
    use std::collections::BTreeSet;

    fn row(flags: &[&'static str]) -> ReportRow {
        let repository = RepoId::parse("octo/widget").unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 1, 5).unwrap();
        ReportRow {
            repository: repository.clone(),
            date,
            metrics: Metrics::from([(MetricName::Views, 30), (MetricName::UniqueViews, 10)]),
            sources: BTreeSet::from([Source::TrafficViews]),
            finalized: true,
            anomaly_flags: flags.iter().copied().collect(),
            derived: DerivedDailyMetric {
                repository,
                date,
                estimated_returning_views: Some(7),
                estimated_new_views: Some(3),
                confidence: Confidence::Approximate,
            },
        }
    }

    #[test]
    fn test_header_lists_every_metric() {
        let mut out = String::new();
        generate(&[], &mut out).unwrap();
        assert_eq!(
            out,
            "repository,date,views,unique_views,clones,unique_clones,downloads,assets,sessions,users,new_users,\
             finalized,anomaly_flags,estimated_new_views,estimated_returning_views,confidence\n"
        );
    }

    #[test]
    fn test_row_leaves_missing_metrics_empty() {
        let mut out = String::new();
        generate(&[row(&["late_revision", "unexpected_revision"])], &mut out).unwrap();
        let line = out.lines().nth(1).unwrap();
        assert_eq!(line, "octo/widget,2024-01-05,30,10,,,,,,,,true,late_revision;unexpected_revision,3,7,approximate");
    }
}

use super::{OpenAnomaly, RepoTotals};
use crate::Result;
use crate::ledger::Anomaly;
use crate::observations::{CounterKind, MetricName};
use chrono::NaiveDate;
use core::fmt::Write;
use core::ops::RangeInclusive;
use owo_colors::OwoColorize;

const LABEL_WIDTH: usize = 14;

pub fn generate<W: Write>(totals: &[RepoTotals], dates: &RangeInclusive<NaiveDate>, use_colors: bool, writer: &mut W) -> Result<()> {
    for (index, repo) in totals.iter().enumerate() {
        if index > 0 {
            writeln!(writer)?;
        }

        let heading = format!("{} ({} to {})", repo.repository, dates.start(), dates.end());
        if use_colors {
            writeln!(writer, "{}", heading.bold())?;
        } else {
            writeln!(writer, "{heading}")?;
        }

        let pair = |total: MetricName, unique: MetricName| format!("{} ({} unique)", repo.sum(total), repo.sum(unique));
        line(writer, "views", &pair(MetricName::Views, MetricName::UniqueViews))?;
        line(writer, "clones", &pair(MetricName::Clones, MetricName::UniqueClones))?;
        line(
            writer,
            "docs sessions",
            &format!("{} ({} new users)", repo.sum(MetricName::Sessions), repo.sum(MetricName::NewUsers)),
        )?;

        let counter = |kind: CounterKind| repo.counters.get(&kind).map_or_else(|| "n/a".to_string(), u64::to_string);
        line(writer, "stars", &counter(CounterKind::Stars))?;
        line(writer, "forks", &counter(CounterKind::Forks))?;
        line(writer, "downloads", &counter(CounterKind::ReleaseDownloads))?;

        if repo.open_anomalies.is_empty() {
            continue;
        }

        let summary = format!("{} open", repo.open_anomalies.len());
        if use_colors {
            line(writer, "anomalies", &summary.yellow().bold().to_string())?;
        } else {
            line(writer, "anomalies", &summary)?;
        }

        for open in &repo.open_anomalies {
            writeln!(writer, "    {}", describe(open))?;
        }
    }

    Ok(())
}

fn line<W: Write>(writer: &mut W, label: &str, value: &str) -> Result<()> {
    writeln!(writer, "  {label:<width$} : {value}", width = LABEL_WIDTH)?;
    Ok(())
}

fn describe(open: &OpenAnomaly) -> String {
    let place = match (open.date, open.source) {
        (Some(date), Some(source)) => format!("{date} {source}"),
        _ => "counter".to_string(),
    };

    match &open.anomaly {
        Anomaly::LateRevision { metric, old, new } | Anomaly::UnexpectedRevision { metric, old, new } | Anomaly::OperatorOverride { metric, old, new } => {
            format!("{place} {}: {metric} {old} -> {new}", open.anomaly.kind())
        }
        Anomaly::CounterRegression {
            stored,
            observed,
            observed_at,
        } => format!("{place} {}: stored {stored}, observed {observed} at {observed_at}", open.anomaly.kind()),
    }
}

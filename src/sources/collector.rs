use super::analytics::AnalyticsClient;
use super::github::GitHubClient;
use super::unavailable::SourceUnavailable;
use crate::Result;
use crate::observations::{PayloadEnvelope, RawPayload};
use crate::registry::Repository;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use futures_util::stream;
use ohno::app_err;

const LOG_TARGET: &str = " collector";

/// Everything fetched in one run, ordered by repository and payload kind.
#[derive(Debug, Default)]
pub struct Collection {
    pub envelopes: Vec<PayloadEnvelope>,
    pub skipped: Vec<SourceUnavailable>,
}

/// Fetches every source for a set of repositories.
#[derive(Debug)]
pub struct Collector {
    github: GitHubClient,
    analytics: Option<AnalyticsClient>,
    concurrency: usize,
}

impl Collector {
    /// `concurrency` bounds how many repositories are fetched at the same time.
    #[must_use]
    pub fn new(github: GitHubClient, analytics: Option<AnalyticsClient>, concurrency: usize) -> Self {
        Self {
            github,
            analytics,
            concurrency: concurrency.max(1),
        }
    }

    /// Fetch all sources of all given repositories.
    ///
    /// A source that still fails after its retries is recorded in
    /// [`Collection::skipped`]; it never fails the collection as a whole.
    pub async fn collect<'r>(&self, repos: impl IntoIterator<Item = &'r Repository>, fetched_at: DateTime<Utc>) -> Collection {
        let per_repo: Vec<Collection> = stream::iter(repos)
            .map(|repo| self.collect_repo(repo, fetched_at))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut collection = Collection::default();
        for part in per_repo {
            collection.envelopes.extend(part.envelopes);
            collection.skipped.extend(part.skipped);
        }

        collection
            .envelopes
            .sort_by(|a, b| (&a.repository, a.payload.kind()).cmp(&(&b.repository, b.payload.kind())));
        collection.skipped.sort_by(|a, b| (&a.repository, a.source).cmp(&(&b.repository, b.source)));
        collection
    }

    async fn collect_repo(&self, repo: &Repository, fetched_at: DateTime<Utc>) -> Collection {
        log::info!(target: LOG_TARGET, "Fetching sources for '{}'", repo.id);

        let id = &repo.id;
        let (views, clones, counters, releases, sessions) = tokio::join!(
            self.github.traffic_views(id, fetched_at),
            self.github.traffic_clones(id, fetched_at),
            self.github.counters(id, fetched_at),
            self.github.releases(id),
            self.sessions(repo, fetched_at),
        );

        let mut collection = Collection::default();
        let results = [
            ("traffic_views", Some(views)),
            ("traffic_clones", Some(clones)),
            ("counters", Some(counters)),
            ("releases", Some(releases)),
            ("ga_sessions", sessions),
        ];

        for (source, result) in results {
            match result {
                Some(Ok(payload)) => collection.envelopes.push(PayloadEnvelope {
                    repository: id.clone(),
                    fetched_at,
                    payload,
                }),
                Some(Err(e)) => {
                    log::warn!(target: LOG_TARGET, "Skipping {source} for '{id}': {e:#}");
                    collection.skipped.push(SourceUnavailable::new(id.clone(), source, e));
                }
                None => {}
            }
        }

        collection
    }

    /// `None` when the repository has no docs property to query.
    async fn sessions(&self, repo: &Repository, fetched_at: DateTime<Utc>) -> Option<Result<RawPayload>> {
        if repo.docs_analytics_property_id.is_none() {
            return None;
        }

        let Some(analytics) = &self.analytics else {
            return Some(Err(app_err!("no analytics credentials were provided")));
        };

        Some(analytics.sessions(repo, fetched_at).await)
    }
}

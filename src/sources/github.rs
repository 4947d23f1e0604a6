//! GitHub REST client
//!
//! Fetches the two rolling traffic windows, the repository's fork and star totals, and its
//! release asset download counts, and returns them as [`RawPayload`]s for the normalizer.

use super::resilient::{RetryPolicy, resilient_send};
use crate::Result;
use crate::observations::{CountersPayload, RawPayload, ReleasesPayload, TRAFFIC_WINDOW_DAYS, TrafficDay, TrafficPayload};
use crate::registry::RepoId;
use chrono::{DateTime, Days, NaiveDate, Utc};
use ohno::{IntoAppError, bail};
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue, LINK};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;

const LOG_TARGET: &str = "    github";

pub const DEFAULT_BASE_URL: &str = "https://api.github.com";

/// Release pages followed before giving up on a repository.
const MAX_RELEASE_PAGES: usize = 50;

#[derive(Debug, Deserialize)]
struct TrafficResponse {
    #[serde(alias = "clones")]
    views: Vec<TrafficEntry>,
}

#[derive(Debug, Deserialize)]
struct TrafficEntry {
    timestamp: DateTime<Utc>,
    count: i64,
    uniques: i64,
}

#[derive(Debug, Deserialize)]
#[expect(clippy::struct_field_names, reason = "field names match GitHub API exactly")]
struct RepositoryResponse {
    stargazers_count: Option<i64>,
    forks_count: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ReleaseResponse {
    tag_name: String,
    #[serde(default)]
    assets: Vec<AssetResponse>,
}

#[derive(Debug, Deserialize)]
struct AssetResponse {
    name: String,
    download_count: i64,
}

/// Rate limit information from response headers
#[derive(Debug, Clone, Copy)]
struct RateLimitInfo {
    remaining: usize,
    reset_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
#[expect(clippy::struct_field_names, reason = "client field stores the underlying HTTP client")]
pub struct GitHubClient {
    client: reqwest::Client,
    base_url: String,
    retry: RetryPolicy,
}

impl GitHubClient {
    /// Create a client authenticated with `token`, talking to `base_url`.
    pub fn new(token: Option<&str>, base_url: impl Into<String>, retry: RetryPolicy) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let _ = headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        let _ = headers.insert("x-github-api-version", HeaderValue::from_static("2022-11-28"));

        if let Some(t) = token {
            let mut auth_val = HeaderValue::from_str(&format!("token {t}"))?;
            auth_val.set_sensitive(true);
            let _ = headers.insert(AUTHORIZATION, auth_val);
        }

        let client = reqwest::Client::builder().user_agent("ghtally").default_headers(headers).build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            retry,
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Page views for the trailing window ending on the fetch day.
    pub async fn traffic_views(&self, repo: &RepoId, fetched_at: DateTime<Utc>) -> Result<RawPayload> {
        let traffic = self.traffic(repo, "views", fetched_at).await?;
        Ok(RawPayload::TrafficViews(traffic))
    }

    /// Clones for the trailing window ending on the fetch day.
    pub async fn traffic_clones(&self, repo: &RepoId, fetched_at: DateTime<Utc>) -> Result<RawPayload> {
        let traffic = self.traffic(repo, "clones", fetched_at).await?;
        Ok(RawPayload::TrafficClones(traffic))
    }

    /// Current fork and star totals.
    pub async fn counters(&self, repo: &RepoId, fetched_at: DateTime<Utc>) -> Result<RawPayload> {
        let url = format!("{}/repos/{}/{}", self.base_url, repo.owner(), repo.name());
        let response: RepositoryResponse = self.get_json(&url).await?;

        Ok(RawPayload::Counters(CountersPayload {
            forks: response.forks_count,
            stars: response.stargazers_count,
            observed_at: Some(fetched_at),
        }))
    }

    /// Download totals summed over every asset of every release.
    ///
    /// The release list is paged; all pages are followed so that old releases keep
    /// contributing to the total once newer ones push them off the first page.
    pub async fn releases(&self, repo: &RepoId) -> Result<RawPayload> {
        let mut next = Some(format!("{}/repos/{}/{}/releases?per_page=100", self.base_url, repo.owner(), repo.name()));
        let mut per_asset_counts = BTreeMap::new();
        let mut pages = 0;

        while let Some(url) = next.take() {
            pages += 1;
            if pages > MAX_RELEASE_PAGES {
                bail!("'{repo}' has more than {MAX_RELEASE_PAGES} pages of releases");
            }

            let (releases, link): (Vec<ReleaseResponse>, _) = self.get_json_page(&url).await?;
            for release in releases {
                for asset in release.assets {
                    let _ = per_asset_counts.insert(format!("{}/{}", release.tag_name, asset.name), asset.download_count);
                }
            }
            next = link;
        }

        log::debug!(target: LOG_TARGET, "Read {pages} page(s) of releases for '{repo}'");

        let total = per_asset_counts.values().fold(0_i64, |acc, n| acc.saturating_add(*n));

        Ok(RawPayload::Releases(ReleasesPayload {
            total_download_count: Some(total),
            per_asset_counts: Some(per_asset_counts),
        }))
    }

    async fn traffic(&self, repo: &RepoId, kind: &str, fetched_at: DateTime<Utc>) -> Result<TrafficPayload> {
        let url = format!("{}/repos/{}/{}/traffic/{kind}?per=day", self.base_url, repo.owner(), repo.name());
        let response: TrafficResponse = self.get_json(&url).await?;
        Ok(traffic_payload(response, fetched_at.date_naive()))
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let (value, _) = self.get_json_page(url).await?;
        Ok(value)
    }

    /// Fetch one page, along with the URL of the following page if the response links one.
    async fn get_json_page<T: DeserializeOwned>(&self, url: &str) -> Result<(T, Option<String>)> {
        let resp = resilient_send(&self.client, &self.retry, "github", self.client.get(url)).await?;
        let rate_limit = extract_rate_limit_from_headers(resp.headers());

        if let Some(info) = rate_limit {
            log::debug!(target: LOG_TARGET, "{} requests left until {}", info.remaining, info.reset_at);
        }

        let status = resp.status();
        if status.is_success() {
            let next = next_page_link(resp.headers());
            let value = resp.json::<T>().await.into_app_err_with(|| format!("decoding response from {url}"))?;
            return Ok((value, next));
        }

        match (status, rate_limit) {
            (StatusCode::NOT_FOUND, _) => bail!("{url} not found, or the token cannot read its traffic"),
            (StatusCode::UNAUTHORIZED, _) => bail!("GitHub rejected the token for {url}"),
            (StatusCode::FORBIDDEN, Some(info)) if info.remaining == 0 => {
                bail!("GitHub rate limit exhausted until {}", info.reset_at)
            }
            (StatusCode::FORBIDDEN, _) => bail!("access to {url} is forbidden; traffic data needs push access"),
            _ => bail!("HTTP {status} from {url}"),
        }
    }
}

/// Map the API's timestamped entries onto a day window.
///
/// The window is the API's trailing fourteen days; it is widened if an entry falls earlier,
/// which happens when the fetch runs just after UTC midnight.
fn traffic_payload(response: TrafficResponse, fetch_day: NaiveDate) -> TrafficPayload {
    let mut start = fetch_day.checked_sub_days(Days::new(TRAFFIC_WINDOW_DAYS - 1)).unwrap_or(fetch_day);
    let mut end = fetch_day;

    let days: Vec<TrafficDay> = response
        .views
        .into_iter()
        .map(|entry| {
            let day = entry.timestamp.date_naive();
            start = start.min(day);
            end = end.max(day);
            TrafficDay {
                day: Some(day),
                count: Some(entry.count),
                unique_count: Some(entry.uniques),
            }
        })
        .collect();

    TrafficPayload {
        window: Some([start, end]),
        days: Some(days),
    }
}

/// The `rel="next"` target of a `Link` header, if there is one.
fn next_page_link(headers: &HeaderMap) -> Option<String> {
    let link = headers.get(LINK)?.to_str().ok()?;
    link.split(',').find_map(|entry| {
        let mut parts = entry.split(';');
        let target = parts.next()?.trim().strip_prefix('<')?.strip_suffix('>')?;
        parts.any(|param| param.trim() == r#"rel="next""#).then(|| target.to_string())
    })
}

/// Extract rate limit information from API response headers
fn extract_rate_limit_from_headers(headers: &HeaderMap) -> Option<RateLimitInfo> {
    let remaining = headers.get("x-ratelimit-remaining")?.to_str().ok()?.parse::<usize>().ok()?;
    let reset_timestamp = headers.get("x-ratelimit-reset")?.to_str().ok()?.parse::<i64>().ok()?;
    let reset_at = DateTime::from_timestamp(reset_timestamp, 0)?;

    Some(RateLimitInfo { remaining, reset_at })
}

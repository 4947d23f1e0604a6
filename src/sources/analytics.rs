//! Google Analytics Data API client
//!
//! Authenticates as a service account: a signed RS256 assertion is exchanged for a bearer
//! token once per client, then each property is queried with `runReport` for daily
//! sessions, total users and new users. Rows come back per calendar day in the property's
//! own timezone and are passed on unchanged; the normalizer maps them onto UTC days.

use super::resilient::{RetryPolicy, resilient_send};
use crate::Result;
use crate::observations::tz_bucket::{local_date, resolve_timezone};
use crate::observations::{AnalyticsPayload, AnalyticsRow, RawPayload};
use crate::registry::Repository;
use camino::Utf8Path;
use chrono::{DateTime, Days, NaiveDate, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use ohno::{IntoAppError, app_err, bail};
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::OnceCell;

const LOG_TARGET: &str = " analytics";

pub const DEFAULT_API_BASE: &str = "https://analyticsdata.googleapis.com";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const SCOPE: &str = "https://www.googleapis.com/auth/analytics.readonly";
const GRANT_TYPE: &str = "urn%3Aietf%3Aparams%3Aoauth%3Agrant-type%3Ajwt-bearer";

/// Lifetime requested for the signed assertion.
const ASSERTION_LIFETIME_SECS: i64 = 3600;

/// The fields of a service-account key file this client needs.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub token_uri: Option<String>,
}

impl ServiceAccountKey {
    pub fn load(path: &Utf8Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).into_app_err_with(|| format!("reading service account key '{path}'"))?;
        serde_json::from_str(&text).into_app_err_with(|| format!("parsing service account key '{path}'"))
    }
}

#[derive(Debug, Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReportResponse {
    #[serde(default)]
    rows: Vec<ReportRow>,
    #[serde(default)]
    metadata: Option<ReportMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReportMetadata {
    time_zone: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReportRow {
    dimension_values: Vec<ReportValue>,
    metric_values: Vec<ReportValue>,
}

#[derive(Debug, Deserialize)]
struct ReportValue {
    value: String,
}

#[derive(Debug)]
pub struct AnalyticsClient {
    client: reqwest::Client,
    key: ServiceAccountKey,
    api_base: String,
    retry: RetryPolicy,
    window_days: u32,
    token: OnceCell<String>,
}

impl AnalyticsClient {
    /// Create a client for `key` querying `window_days` local days per report.
    pub fn new(key: ServiceAccountKey, api_base: impl Into<String>, retry: RetryPolicy, window_days: u32) -> Result<Self> {
        Ok(Self {
            client: reqwest::Client::builder().user_agent("ghtally").build()?,
            key,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            retry,
            window_days: window_days.max(1),
            token: OnceCell::new(),
        })
    }

    /// Daily rows for the repository's docs property, ending on the local day of `fetched_at`.
    pub async fn sessions(&self, repo: &Repository, fetched_at: DateTime<Utc>) -> Result<RawPayload> {
        let Some(property) = repo.docs_analytics_property_id.as_deref() else {
            bail!("'{}' has no docs analytics property", repo.id);
        };

        let tz = resolve_timezone(&repo.reporting_timezone)?;
        let end = local_date(fetched_at, &tz)?;
        let start = end
            .checked_sub_days(Days::new(u64::from(self.window_days - 1)))
            .ok_or_else(|| app_err!("analytics window before {end} is out of range"))?;

        let token = self.access_token(fetched_at).await?;
        let url = format!("{}/v1beta/properties/{property}:runReport", self.api_base);
        let body = json!({
            "dateRanges": [{"startDate": start.to_string(), "endDate": end.to_string()}],
            "dimensions": [{"name": "date"}],
            "metrics": [{"name": "sessions"}, {"name": "totalUsers"}, {"name": "newUsers"}],
            "keepEmptyRows": true,
        });

        let request = self.client.post(&url).bearer_auth(token).json(&body);
        let resp = resilient_send(&self.client, &self.retry, "runReport", request).await?;
        let status = resp.status();
        if !status.is_success() {
            bail!("HTTP {status} from runReport for property {property}");
        }

        let report: ReportResponse = resp.json().await.into_app_err("decoding runReport response")?;
        log::debug!(target: LOG_TARGET, "Property {property} returned {} row(s) for {start}..={end}", report.rows.len());

        let rows = report.rows.iter().map(report_row).collect::<Result<Vec<_>>>()?;
        Ok(RawPayload::GaSessions(AnalyticsPayload {
            timezone: report.metadata.and_then(|m| m.time_zone),
            window: Some([start, end]),
            rows: Some(rows),
        }))
    }

    async fn access_token(&self, now: DateTime<Utc>) -> Result<&str> {
        let token = self.token.get_or_try_init(|| self.exchange_assertion(now)).await?;
        Ok(token.as_str())
    }

    async fn exchange_assertion(&self, now: DateTime<Utc>) -> Result<String> {
        let token_uri = self.key.token_uri.as_deref().unwrap_or(DEFAULT_TOKEN_URI);
        let assertion = sign_assertion(&self.key, token_uri, now)?;
        let body = format!("grant_type={GRANT_TYPE}&assertion={assertion}");

        let request = self
            .client
            .post(token_uri)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body);
        let resp = resilient_send(&self.client, &self.retry, "token exchange", request).await?;

        let status = resp.status();
        if !status.is_success() {
            bail!("token exchange for '{}' failed with HTTP {status}", self.key.client_email);
        }

        let token: TokenResponse = resp.json().await.into_app_err("decoding token response")?;
        log::debug!(target: LOG_TARGET, "Obtained access token for '{}'", self.key.client_email);
        Ok(token.access_token)
    }
}

fn sign_assertion(key: &ServiceAccountKey, audience: &str, now: DateTime<Utc>) -> Result<String> {
    let iat = now.timestamp();
    let claims = Claims {
        iss: &key.client_email,
        scope: SCOPE,
        aud: audience,
        iat,
        exp: iat + ASSERTION_LIFETIME_SECS,
    };

    let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes()).into_app_err("parsing service account private key")?;
    jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &encoding_key).into_app_err("signing service account assertion")
}

/// `YYYYMMDD` dimension plus sessions, users and new users, in request order.
fn report_row(row: &ReportRow) -> Result<AnalyticsRow> {
    let date = row.dimension_values.first().ok_or_else(|| app_err!("report row without a date"))?;
    let day = NaiveDate::parse_from_str(&date.value, "%Y%m%d").into_app_err_with(|| format!("invalid report date '{}'", date.value))?;

    let metric = |index: usize| -> Result<Option<i64>> {
        row.metric_values
            .get(index)
            .map(|v| v.value.parse::<i64>().into_app_err_with(|| format!("invalid metric value '{}' on {day}", v.value)))
            .transpose()
    };

    Ok(AnalyticsRow {
        day: Some(day),
        sessions: metric(0)?,
        users: metric(1)?,
        new_users: metric(2)?,
    })
}

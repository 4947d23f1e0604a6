//! HTTP clients for the metrics sources and the concurrent collector
//!
//! [`GitHubClient`] and [`AnalyticsClient`] each turn API responses into
//! [`RawPayload`](crate::observations::RawPayload)s. The [`Collector`] runs them for every
//! active repository, bounded by [`RetryPolicy`] per call and a concurrency limit across
//! repositories.

mod analytics;
mod collector;
mod github;
mod resilient;
mod unavailable;

pub use analytics::{AnalyticsClient, DEFAULT_API_BASE as ANALYTICS_API_BASE, ServiceAccountKey};
pub use collector::{Collection, Collector};
pub use github::{DEFAULT_BASE_URL as GITHUB_API_BASE, GitHubClient};
pub use resilient::RetryPolicy;
pub use unavailable::SourceUnavailable;

//! Per-instance analytics context.
//!
//! Built once from configuration: one token provider, one client for the
//! configured API generation, one cache, and the engines layered on top.
//! Every operation the tool surface exposes lives here.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Days, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::api::http::GoogleHttp;
use crate::api::{CatalogApi, Ga4Client, HierarchyApi, ReportApi, UniversalAnalyticsClient};
use crate::auth::TokenProvider;
use crate::cache::Cache;
use crate::catalog::CatalogAccessor;
use crate::config::{ApiVersion, Config};
use crate::enumerator::Enumerator;
use crate::error::{ApiError, Error};
use crate::fetcher::ReportFetcher;
use crate::frame::Frame;
use crate::model::{AccountSummary, CatalogItem, QueryMode, QueryModel, QuerySpec, ResourceNode};
use crate::normalizer::{flatten, normalize};

/// How long hierarchy lookups stay cached.
pub const HIERARCHY_TTL: Duration = Duration::from_secs(60);

/// Resource id → display name.
pub type NameMap = BTreeMap<String, String>;

fn name_map(nodes: Vec<ResourceNode>) -> NameMap {
    nodes
        .into_iter()
        .map(|node| (node.id, node.display_name))
        .collect()
}

fn first<T>(items: Vec<T>, what: &str) -> Result<T, Error> {
    items
        .into_iter()
        .next()
        .ok_or_else(|| Error::NotFound(format!("any {}", what)))
}

/// Outcome of one query in a batch.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum QueryResponse {
    Frames { frames: Vec<Frame> },
    Error { error: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Ok,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub status: HealthState,
    pub message: String,
}

/// Wrap a browse result the way the resource interface reports it:
/// `{name: value}` on success, `{"error": message}` otherwise.
pub fn resource_result<T: Serialize, E: Display>(name: &str, result: Result<T, E>) -> Value {
    let outcome = result
        .map_err(|e| e.to_string())
        .and_then(|value| serde_json::to_value(value).map_err(|e| e.to_string()));

    let mut body = Map::new();
    match outcome {
        Ok(value) => {
            body.insert(name.to_string(), value);
        }
        Err(message) => {
            body.insert("error".to_string(), Value::String(message));
        }
    }
    Value::Object(body)
}

/// The analytics data source of one configured instance.
#[derive(Clone)]
pub struct Analytics {
    version: ApiVersion,
    cache: Cache,
    enumerator: Enumerator,
    fetcher: ReportFetcher,
    catalog: CatalogAccessor,
}

impl Analytics {
    /// Wire the client of the configured API generation.
    pub fn new(config: &Config) -> Result<Self, ApiError> {
        let tokens = TokenProvider::new(config.clone())?;
        let http = GoogleHttp::new(config, tokens)?;

        let analytics = match config.version {
            ApiVersion::V3 => {
                let client = Arc::new(UniversalAnalyticsClient::new(config, http));
                Self::with_clients(config, client.clone(), client.clone(), client)
            }
            ApiVersion::V4 => {
                let client = Arc::new(Ga4Client::new(config, http));
                Self::with_clients(config, client.clone(), client.clone(), client)
            }
        };
        tracing::info!(version = ?config.version, "analytics data source ready");
        Ok(analytics)
    }

    pub fn with_clients(
        config: &Config,
        hierarchy: Arc<dyn HierarchyApi>,
        reports: Arc<dyn ReportApi>,
        catalog: Arc<dyn CatalogApi>,
    ) -> Self {
        let cache = Cache::new();
        Self {
            version: config.version,
            enumerator: Enumerator::new(hierarchy, &config.retry, config.max_pages),
            fetcher: ReportFetcher::new(reports, config.max_pages),
            catalog: CatalogAccessor::new(catalog, cache.clone(), config.version),
            cache,
        }
    }

    pub fn version(&self) -> ApiVersion {
        self.version
    }

    // ========================================================================
    // Data queries
    // ========================================================================

    /// Run one query: time-series queries yield one frame per dimension
    /// group, table and realtime queries a single flat frame.
    pub async fn query(&self, query: Value, cancel: &CancellationToken) -> Result<Vec<Frame>, Error> {
        let spec = QueryModel::from_json(query)?.into_spec(self.version)?;
        tracing::debug!(ref_id = %spec.ref_id, mode = ?spec.mode, "running query");

        let report = self.fetcher.fetch(&spec, cancel).await?;
        let frames = match spec.mode {
            QueryMode::TimeSeries => normalize(&report, &spec.ref_id, spec.timezone.name()),
            QueryMode::Table | QueryMode::Realtime => vec![flatten(&report, &spec.ref_id)],
        };
        tracing::debug!(
            ref_id = %spec.ref_id,
            frames = frames.len(),
            rows = frames.iter().map(Frame::row_count).sum::<usize>(),
            "query done"
        );
        Ok(frames)
    }

    /// Run every query of a batch. Each gets its own slot keyed by refId;
    /// a query without a refId is keyed `#<position>`. A repeated refId
    /// keeps the last response.
    pub async fn query_batch(
        &self,
        queries: Vec<Value>,
        cancel: &CancellationToken,
    ) -> BTreeMap<String, QueryResponse> {
        let mut responses = BTreeMap::new();
        for (index, query) in queries.into_iter().enumerate() {
            let ref_id = match query.get("refId").and_then(Value::as_str) {
                Some(ref_id) if !ref_id.is_empty() => ref_id.to_string(),
                _ => format!("#{}", index),
            };
            let response = match self.query(query, cancel).await {
                Ok(frames) => QueryResponse::Frames { frames },
                Err(e) => {
                    tracing::warn!(ref_id = %ref_id, error = %e, "query failed");
                    QueryResponse::Error {
                        error: e.to_string(),
                    }
                }
            };
            if let Some(replaced) = responses.insert(ref_id.clone(), response) {
                tracing::warn!(
                    ref_id = %ref_id,
                    replaced_error = matches!(replaced, QueryResponse::Error { .. }),
                    "duplicate refId in batch, keeping the later response"
                );
            }
        }
        responses
    }

    // ========================================================================
    // Browse operations
    // ========================================================================

    pub async fn accounts(&self, cancel: &CancellationToken) -> Result<NameMap, Error> {
        let enumerator = &self.enumerator;
        let accounts = self
            .cache
            .get_or_try_insert_with("analytics:accounts", HIERARCHY_TTL, move || async move {
                enumerator.list_accounts(cancel).await.map(name_map)
            })
            .await?;
        Ok(accounts)
    }

    pub async fn web_properties(
        &self,
        account_id: &str,
        cancel: &CancellationToken,
    ) -> Result<NameMap, Error> {
        let enumerator = &self.enumerator;
        let key = format!("analytics:account:{}:webproperties", account_id);
        let properties = self
            .cache
            .get_or_try_insert_with(&key, HIERARCHY_TTL, move || async move {
                enumerator
                    .list_properties(account_id, cancel)
                    .await
                    .map(name_map)
            })
            .await?;
        Ok(properties)
    }

    pub async fn profiles(
        &self,
        account_id: &str,
        web_property_id: &str,
        cancel: &CancellationToken,
    ) -> Result<NameMap, Error> {
        let enumerator = &self.enumerator;
        let key = format!(
            "analytics:account:{}:webproperty:{}:profiles",
            account_id, web_property_id
        );
        let profiles = self
            .cache
            .get_or_try_insert_with(&key, HIERARCHY_TTL, move || async move {
                enumerator
                    .list_profiles(account_id, web_property_id, cancel)
                    .await
                    .map(name_map)
            })
            .await?;
        Ok(profiles)
    }

    /// Every profile the credentials can see, across all accounts.
    pub async fn all_profiles(&self, cancel: &CancellationToken) -> Result<NameMap, Error> {
        let enumerator = &self.enumerator;
        let profiles = self
            .cache
            .get_or_try_insert_with(
                "analytics:account:*:webproperty:*:profiles",
                HIERARCHY_TTL,
                move || async move { enumerator.list_all_profiles(cancel).await.map(name_map) },
            )
            .await?;
        Ok(profiles)
    }

    pub async fn timezone(
        &self,
        account_id: &str,
        web_property_id: &str,
        profile_id: &str,
        cancel: &CancellationToken,
    ) -> Result<String, Error> {
        let key = format!(
            "analytics:account:{}:webproperty:{}:profile:{}:timezone",
            account_id, web_property_id, profile_id
        );
        self.cache
            .get_or_try_insert_with(&key, HIERARCHY_TTL, move || {
                self.load_timezone(account_id, web_property_id, profile_id, cancel)
            })
            .await
    }

    async fn load_timezone(
        &self,
        account_id: &str,
        web_property_id: &str,
        profile_id: &str,
        cancel: &CancellationToken,
    ) -> Result<String, Error> {
        match self.version {
            ApiVersion::V3 => self
                .enumerator
                .list_profiles(account_id, web_property_id, cancel)
                .await?
                .into_iter()
                .find(|profile| profile.id == profile_id)
                .and_then(|profile| profile.timezone)
                .ok_or_else(|| Error::NotFound(format!("timezone of profile {}", profile_id))),
            ApiVersion::V4 => self
                .enumerator
                .get_property(account_id, web_property_id, cancel)
                .await?
                .timezone
                .ok_or_else(|| {
                    Error::NotFound(format!("timezone of property {}", web_property_id))
                }),
        }
    }

    /// GA4 service level of a property; Universal Analytics has none and
    /// reports an empty string.
    pub async fn service_level(
        &self,
        account_id: &str,
        web_property_id: &str,
        cancel: &CancellationToken,
    ) -> Result<String, Error> {
        let key = format!(
            "analytics:account:{}:webproperty:{}:service_level",
            account_id, web_property_id
        );
        self.cache
            .get_or_try_insert_with(&key, HIERARCHY_TTL, move || {
                self.load_service_level(account_id, web_property_id, cancel)
            })
            .await
    }

    async fn load_service_level(
        &self,
        account_id: &str,
        web_property_id: &str,
        cancel: &CancellationToken,
    ) -> Result<String, Error> {
        match self.version {
            ApiVersion::V3 => Ok(String::new()),
            ApiVersion::V4 => Ok(self
                .enumerator
                .get_property(account_id, web_property_id, cancel)
                .await?
                .service_tier
                .unwrap_or_default()),
        }
    }

    pub async fn account_summaries(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<AccountSummary>, Error> {
        let enumerator = &self.enumerator;
        let summaries = self
            .cache
            .get_or_try_insert_with("analytics:accountsummaries", HIERARCHY_TTL, move || async move {
                enumerator.list_account_summaries(cancel).await
            })
            .await?;
        Ok(summaries)
    }

    pub async fn dimensions(
        &self,
        web_property_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<CatalogItem>, Error> {
        self.catalog.get_dimensions(web_property_id, cancel).await
    }

    pub async fn metrics(
        &self,
        web_property_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<CatalogItem>, Error> {
        self.catalog.get_metrics(web_property_id, cancel).await
    }

    pub fn realtime_dimensions(&self) -> Vec<CatalogItem> {
        self.catalog.realtime_dimensions()
    }

    pub fn realtime_metrics(&self) -> Vec<CatalogItem> {
        self.catalog.realtime_metrics()
    }

    // ========================================================================
    // Health
    // ========================================================================

    /// Walk to the first reachable property and run a one-day report on it.
    pub async fn health_check(&self, cancel: &CancellationToken) -> HealthStatus {
        match self.probe(cancel).await {
            Ok(()) => HealthStatus {
                status: HealthState::Ok,
                message: "Data source is working".to_string(),
            },
            Err(e) => {
                tracing::warn!(error = %e, "health check failed");
                HealthStatus {
                    status: HealthState::Error,
                    message: e.to_string(),
                }
            }
        }
    }

    async fn probe(&self, cancel: &CancellationToken) -> Result<(), Error> {
        let spec = match self.version {
            ApiVersion::V3 => {
                let account = first(self.enumerator.list_accounts(cancel).await?, "account")?;
                let property = first(
                    self.enumerator.list_properties(&account.id, cancel).await?,
                    "web property",
                )?;
                let profile = first(
                    self.enumerator
                        .list_profiles(&account.id, &property.id, cancel)
                        .await?,
                    "profile",
                )?;
                probe_spec(account.id, property.id, profile.id, "ga:sessions", "ga:date")
            }
            ApiVersion::V4 => {
                let (account, property) = self
                    .enumerator
                    .list_account_summaries(cancel)
                    .await?
                    .into_iter()
                    .find_map(|summary| {
                        let account = summary.account;
                        summary
                            .property_summaries
                            .into_iter()
                            .next()
                            .map(|property| (account, property.property))
                    })
                    .ok_or_else(|| Error::NotFound("any property".to_string()))?;
                probe_spec(account, property, String::new(), "active1DayUsers", "date")
            }
        };

        let report = self.fetcher.run_report(&spec, cancel).await?;
        tracing::debug!(
            property_id = %spec.property_id,
            rows = report.rows.len(),
            "health check report fetched"
        );
        Ok(())
    }
}

/// Yesterday-to-today report with a single metric by date.
fn probe_spec(
    account_id: String,
    property_id: String,
    profile_id: String,
    metric: &str,
    time_dimension: &str,
) -> QuerySpec {
    let today = Utc::now().date_naive();
    let yesterday = today - Days::new(1);
    QuerySpec {
        account_id,
        property_id,
        profile_id,
        start_date: yesterday.format("%Y-%m-%d").to_string(),
        end_date: today.format("%Y-%m-%d").to_string(),
        ref_id: "health".to_string(),
        metrics: vec![metric.to_string()],
        time_dimension: time_dimension.to_string(),
        dimensions: vec![time_dimension.to_string()],
        page_size: 1,
        page_token: None,
        offset: 0,
        use_next_page: false,
        timezone: Tz::UTC,
        filter_expression: None,
        mode: QueryMode::Table,
    }
}

impl std::fmt::Debug for Analytics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Analytics")
            .field("version", &self.version)
            .field("enumerator", &self.enumerator)
            .field("fetcher", &self.fetcher)
            .finish_non_exhaustive()
    }
}

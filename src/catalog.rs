//! Selectable dimension and metric catalogs.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::api::CatalogApi;
use crate::cache::Cache;
use crate::config::ApiVersion;
use crate::error::Error;
use crate::model::{AttributeType, CatalogItem};

/// How long a property's filtered catalog stays cached.
pub const METADATA_TTL: Duration = Duration::from_secs(60 * 60);

const GA4_REALTIME_DIMENSIONS: &[(&str, &str)] = &[
    ("appVersion", "App version"),
    ("audienceId", "Audience ID"),
    ("audienceName", "Audience name"),
    ("city", "City"),
    ("cityId", "City ID"),
    ("country", "Country"),
    ("countryId", "Country ID"),
    ("deviceCategory", "Device category"),
    ("eventName", "Event name"),
    ("minutesAgo", "Realtime minutes ago"),
    ("platform", "Platform"),
    ("streamId", "Stream ID"),
    ("streamName", "Stream name"),
    ("unifiedScreenName", "Page title and screen name"),
];

const GA4_REALTIME_METRICS: &[(&str, &str)] = &[
    ("activeUsers", "Active users"),
    ("conversions", "Conversions"),
    ("eventCount", "Event count"),
    ("screenPageViews", "Views"),
];

const UA_REALTIME_DIMENSIONS: &[(&str, &str)] = &[
    ("rt:minutesAgo", "Minutes Ago"),
    ("rt:country", "Country"),
    ("rt:city", "City"),
    ("rt:deviceCategory", "Device Category"),
    ("rt:source", "Source"),
    ("rt:medium", "Medium"),
    ("rt:pagePath", "Page"),
    ("rt:pageTitle", "Page Title"),
    ("rt:eventCategory", "Event Category"),
    ("rt:eventAction", "Event Action"),
];

const UA_REALTIME_METRICS: &[(&str, &str)] = &[
    ("rt:activeUsers", "Active Users"),
    ("rt:pageviews", "Pageviews"),
    ("rt:screenViews", "Screen Views"),
    ("rt:totalEvents", "Total Events"),
];

fn static_catalog(entries: &[(&str, &str)], attribute_type: AttributeType) -> Vec<CatalogItem> {
    entries
        .iter()
        .map(|(id, ui_name)| CatalogItem::new(*id, attribute_type, ui_name))
        .collect()
}

/// Drop retired entries and split the rest by kind, preserving order.
pub fn partition_catalog(items: Vec<CatalogItem>) -> (Vec<CatalogItem>, Vec<CatalogItem>) {
    let mut dimensions = Vec::new();
    let mut metrics = Vec::new();
    for item in items {
        if item.is_retired() {
            continue;
        }
        match item.attributes.attribute_type {
            Some(AttributeType::Dimension) => dimensions.push(item),
            Some(AttributeType::Metric) => metrics.push(item),
            None => tracing::debug!(id = %item.id, "catalog item without a type skipped"),
        }
    }
    (dimensions, metrics)
}

fn cache_key(property_id: &str, kind: &str) -> String {
    format!("ga:metadata:{}:{}", property_id, kind)
}

/// Cached access to the dimension/metric catalog of a property.
#[derive(Clone)]
pub struct CatalogAccessor {
    api: Arc<dyn CatalogApi>,
    cache: Cache,
    version: ApiVersion,
}

impl CatalogAccessor {
    pub fn new(api: Arc<dyn CatalogApi>, cache: Cache, version: ApiVersion) -> Self {
        Self {
            api,
            cache,
            version,
        }
    }

    pub async fn get_dimensions(
        &self,
        property_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<CatalogItem>, Error> {
        self.get(property_id, AttributeType::Dimension, cancel).await
    }

    pub async fn get_metrics(
        &self,
        property_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<CatalogItem>, Error> {
        self.get(property_id, AttributeType::Metric, cancel).await
    }

    /// Fixed list; the APIs do not publish realtime catalogs.
    pub fn realtime_dimensions(&self) -> Vec<CatalogItem> {
        match self.version {
            ApiVersion::V3 => static_catalog(UA_REALTIME_DIMENSIONS, AttributeType::Dimension),
            ApiVersion::V4 => static_catalog(GA4_REALTIME_DIMENSIONS, AttributeType::Dimension),
        }
    }

    pub fn realtime_metrics(&self) -> Vec<CatalogItem> {
        match self.version {
            ApiVersion::V3 => static_catalog(UA_REALTIME_METRICS, AttributeType::Metric),
            ApiVersion::V4 => static_catalog(GA4_REALTIME_METRICS, AttributeType::Metric),
        }
    }

    /// One remote fetch fills both halves of the property's catalog.
    async fn get(
        &self,
        property_id: &str,
        kind: AttributeType,
        cancel: &CancellationToken,
    ) -> Result<Vec<CatalogItem>, Error> {
        let dimensions_key = cache_key(property_id, "dimensions");
        let metrics_key = cache_key(property_id, "metrics");
        let wanted = match kind {
            AttributeType::Dimension => &dimensions_key,
            AttributeType::Metric => &metrics_key,
        };

        if let Some(items) = self.cache.get::<Vec<CatalogItem>>(wanted).await {
            tracing::debug!(key = %wanted, "catalog cache hit");
            return Ok(items);
        }

        tracing::debug!(property_id, "fetching catalog");
        let items = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            items = self.api.fetch_catalog(property_id) => items?,
        };
        let (dimensions, metrics) = partition_catalog(items);
        tracing::debug!(
            property_id,
            dimensions = dimensions.len(),
            metrics = metrics.len(),
            "catalog fetched"
        );

        let result = match kind {
            AttributeType::Dimension => dimensions.clone(),
            AttributeType::Metric => metrics.clone(),
        };
        self.cache.set(dimensions_key, dimensions, METADATA_TTL).await;
        self.cache.set(metrics_key, metrics, METADATA_TTL).await;
        Ok(result)
    }
}

impl std::fmt::Debug for CatalogAccessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogAccessor")
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

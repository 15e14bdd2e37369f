//! Universal Analytics client: Management API v3 for the hierarchy,
//! Reporting API v4 for reports, the Real Time Reporting API for realtime
//! queries and the public column metadata document for the catalog.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::http::GoogleHttp;
use super::{CatalogApi, HierarchyApi, Page, PageCursor, ReportApi, ReportCursor, ReportPaging};
use crate::config::Config;
use crate::error::ApiError;
use crate::model::{
    AccountSummary, CatalogItem, MetricHeader, PropertySummary, QuerySpec, RawReport, RawRow,
    ResourceNode,
};

/// `max-results` for management listings.
pub const MANAGEMENT_PAGE_SIZE: u32 = 1000;

/// First `start-index` of a management listing.
const FIRST_INDEX: u32 = 1;

// ============================================================================
// Management API wire types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManagementList<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
    #[serde(default)]
    items_per_page: u32,
    #[serde(default)]
    start_index: u32,
    next_link: Option<String>,
}

impl<T> ManagementList<T> {
    fn into_page<U>(self, convert: impl Fn(T) -> U) -> Page<U> {
        let next = match self.next_link.as_deref() {
            Some(link) if !link.is_empty() => Some(PageCursor::Index {
                start_index: self.start_index.max(FIRST_INDEX) + self.items_per_page,
                items_per_page: self.items_per_page,
            }),
            _ => None,
        };
        Page {
            items: self.items.into_iter().map(convert).collect(),
            next,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Account {
    id: String,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WebProperty {
    id: String,
    #[serde(default)]
    account_id: String,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Profile {
    id: String,
    #[serde(default)]
    web_property_id: String,
    #[serde(default)]
    name: String,
    timezone: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountSummaryItem {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    web_properties: Vec<WebPropertySummaryItem>,
}

#[derive(Debug, Deserialize)]
struct WebPropertySummaryItem {
    id: String,
    #[serde(default)]
    name: String,
}

impl From<Account> for ResourceNode {
    fn from(account: Account) -> Self {
        ResourceNode::new(account.id, account.name, "")
    }
}

impl From<WebProperty> for ResourceNode {
    fn from(property: WebProperty) -> Self {
        ResourceNode::new(property.id, property.name, property.account_id)
    }
}

impl From<Profile> for ResourceNode {
    fn from(profile: Profile) -> Self {
        let mut node = ResourceNode::new(profile.id, profile.name, profile.web_property_id);
        node.timezone = profile.timezone;
        node
    }
}

impl From<AccountSummaryItem> for AccountSummary {
    fn from(item: AccountSummaryItem) -> Self {
        let account = item.id;
        let property_summaries = item
            .web_properties
            .into_iter()
            .map(|property| PropertySummary {
                property: property.id,
                display_name: property.name,
                parent: account.clone(),
            })
            .collect();
        AccountSummary {
            account,
            display_name: item.name,
            property_summaries,
        }
    }
}

// ============================================================================
// Reporting API v4 wire types
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GetReportsRequest<'a> {
    report_requests: Vec<ReportRequest<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReportRequest<'a> {
    view_id: &'a str,
    date_ranges: Vec<DateRange<'a>>,
    metrics: Vec<MetricRef<'a>>,
    dimensions: Vec<DimensionRef<'a>>,
    page_size: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    page_token: Option<&'a str>,
    include_empty_rows: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    filters_expression: Option<&'a str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DateRange<'a> {
    start_date: &'a str,
    end_date: &'a str,
}

#[derive(Debug, Serialize)]
struct MetricRef<'a> {
    expression: &'a str,
}

#[derive(Debug, Serialize)]
struct DimensionRef<'a> {
    name: &'a str,
}

#[derive(Debug, Deserialize)]
struct GetReportsResponse {
    #[serde(default)]
    reports: Vec<Report>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Report {
    #[serde(default)]
    column_header: ColumnHeader,
    #[serde(default)]
    data: ReportData,
    next_page_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ColumnHeader {
    #[serde(default)]
    dimensions: Vec<String>,
    #[serde(default)]
    metric_header: MetricHeaderSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MetricHeaderSection {
    #[serde(default)]
    metric_header_entries: Vec<MetricHeaderEntry>,
}

#[derive(Debug, Deserialize)]
struct MetricHeaderEntry {
    name: String,
    #[serde(rename = "type", default)]
    type_name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReportData {
    #[serde(default)]
    rows: Vec<ReportRow>,
    #[serde(default)]
    row_count: u64,
}

#[derive(Debug, Deserialize)]
struct ReportRow {
    #[serde(default)]
    dimensions: Vec<String>,
    #[serde(default)]
    metrics: Vec<DateRangeValues>,
}

#[derive(Debug, Deserialize)]
struct DateRangeValues {
    #[serde(default)]
    values: Vec<String>,
}

impl Report {
    fn into_raw(self) -> RawReport {
        RawReport {
            dimension_headers: self.column_header.dimensions,
            metric_headers: self
                .column_header
                .metric_header
                .metric_header_entries
                .into_iter()
                .map(|entry| MetricHeader::new(entry.name, entry.type_name))
                .collect(),
            rows: self
                .data
                .rows
                .into_iter()
                .map(|row| {
                    // Single date range per request.
                    let metric_values = row
                        .metrics
                        .into_iter()
                        .next()
                        .map(|range| range.values)
                        .unwrap_or_default();
                    RawRow::new(row.dimensions, metric_values)
                })
                .collect(),
            row_count: self.data.row_count,
            next_page_token: self.next_page_token.filter(|t| !t.is_empty()),
        }
    }
}

// ============================================================================
// Real Time Reporting API wire types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RealtimeData {
    #[serde(default)]
    column_headers: Vec<RealtimeColumnHeader>,
    #[serde(default)]
    rows: Vec<Vec<String>>,
    #[serde(default)]
    total_results: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RealtimeColumnHeader {
    name: String,
    #[serde(default)]
    column_type: String,
    #[serde(default)]
    data_type: String,
}

impl RealtimeData {
    /// Split positional columns into dimensions and metrics.
    fn into_raw(self) -> RawReport {
        let mut dimension_idx = Vec::new();
        let mut metric_idx = Vec::new();
        let mut dimension_headers = Vec::new();
        let mut metric_headers = Vec::new();

        for (i, header) in self.column_headers.into_iter().enumerate() {
            if header.column_type == "METRIC" {
                metric_idx.push(i);
                metric_headers.push(MetricHeader::new(header.name, header.data_type));
            } else {
                dimension_idx.push(i);
                dimension_headers.push(header.name);
            }
        }

        let pick = |row: &[String], idx: &[usize]| -> Vec<String> {
            idx.iter()
                .map(|i| row.get(*i).cloned().unwrap_or_default())
                .collect()
        };
        let rows = self
            .rows
            .iter()
            .map(|row| {
                RawRow::new(
                    pick(row.as_slice(), dimension_idx.as_slice()),
                    pick(row.as_slice(), metric_idx.as_slice()),
                )
            })
            .collect();

        RawReport {
            dimension_headers,
            metric_headers,
            rows,
            row_count: self.total_results,
            next_page_token: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct MetadataDocument {
    #[serde(default)]
    items: Vec<CatalogItem>,
}

// ============================================================================
// Client
// ============================================================================

/// Universal Analytics API client.
#[derive(Clone)]
pub struct UniversalAnalyticsClient {
    http: GoogleHttp,
    management_url: String,
    reporting_url: String,
    realtime_url: String,
    metadata_url: String,
}

impl UniversalAnalyticsClient {
    pub fn new(config: &Config, http: GoogleHttp) -> Self {
        Self {
            http,
            management_url: config.management_base_url.trim_end_matches('/').to_string(),
            reporting_url: config.reporting_base_url.trim_end_matches('/').to_string(),
            realtime_url: config.realtime_url.clone(),
            metadata_url: config.metadata_url.clone(),
        }
    }

    async fn list<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        cursor: Option<&PageCursor>,
    ) -> Result<ManagementList<T>, ApiError> {
        let (start_index, max_results) = match cursor {
            Some(PageCursor::Index {
                start_index,
                items_per_page,
            }) => (*start_index, (*items_per_page).max(1)),
            _ => (FIRST_INDEX, MANAGEMENT_PAGE_SIZE),
        };
        let params = [
            ("start-index", start_index.to_string()),
            ("max-results", max_results.to_string()),
        ];
        self.http.get(url, &params).await
    }
}

#[async_trait]
impl HierarchyApi for UniversalAnalyticsClient {
    async fn list_accounts(
        &self,
        cursor: Option<&PageCursor>,
    ) -> Result<Page<ResourceNode>, ApiError> {
        let url = format!("{}/accounts", self.management_url);
        let list: ManagementList<Account> = self.list(&url, cursor).await?;
        Ok(list.into_page(ResourceNode::from))
    }

    async fn list_properties(
        &self,
        account_id: &str,
        cursor: Option<&PageCursor>,
    ) -> Result<Page<ResourceNode>, ApiError> {
        let url = format!(
            "{}/accounts/{}/webproperties",
            self.management_url,
            urlencoding::encode(account_id)
        );
        let list: ManagementList<WebProperty> = self.list(&url, cursor).await?;
        Ok(list.into_page(ResourceNode::from))
    }

    async fn list_profiles(
        &self,
        account_id: &str,
        property_id: &str,
        cursor: Option<&PageCursor>,
    ) -> Result<Page<ResourceNode>, ApiError> {
        let url = format!(
            "{}/accounts/{}/webproperties/{}/profiles",
            self.management_url,
            urlencoding::encode(account_id),
            urlencoding::encode(property_id)
        );
        let list: ManagementList<Profile> = self.list(&url, cursor).await?;
        Ok(list.into_page(ResourceNode::from))
    }

    async fn get_property(
        &self,
        account_id: &str,
        property_id: &str,
    ) -> Result<ResourceNode, ApiError> {
        let url = format!(
            "{}/accounts/{}/webproperties/{}",
            self.management_url,
            urlencoding::encode(account_id),
            urlencoding::encode(property_id)
        );
        let property: WebProperty = self.http.get(&url, &[]).await?;
        Ok(property.into())
    }

    async fn list_account_summaries(
        &self,
        cursor: Option<&PageCursor>,
    ) -> Result<Page<AccountSummary>, ApiError> {
        let url = format!("{}/accountSummaries", self.management_url);
        let list: ManagementList<AccountSummaryItem> = self.list(&url, cursor).await?;
        Ok(list.into_page(AccountSummary::from))
    }
}

#[async_trait]
impl ReportApi for UniversalAnalyticsClient {
    fn paging(&self) -> ReportPaging {
        ReportPaging::Token
    }

    async fn run_report(
        &self,
        spec: &QuerySpec,
        cursor: &ReportCursor,
    ) -> Result<RawReport, ApiError> {
        let request = GetReportsRequest {
            report_requests: vec![ReportRequest {
                view_id: &spec.profile_id,
                date_ranges: vec![DateRange {
                    start_date: &spec.start_date,
                    end_date: &spec.end_date,
                }],
                metrics: spec
                    .metrics
                    .iter()
                    .map(|m| MetricRef { expression: m })
                    .collect(),
                dimensions: spec
                    .dimensions
                    .iter()
                    .map(|d| DimensionRef { name: d })
                    .collect(),
                page_size: spec.page_size,
                page_token: cursor.page_token.as_deref(),
                include_empty_rows: true,
                filters_expression: spec.filter_expression.as_deref(),
            }],
        };

        let url = format!("{}/reports:batchGet", self.reporting_url);
        let response: GetReportsResponse = self.http.post(&url, &request).await?;
        let report = response.reports.into_iter().next().unwrap_or_default();
        Ok(report.into_raw())
    }

    async fn run_realtime_report(&self, spec: &QuerySpec) -> Result<RawReport, ApiError> {
        let mut params = vec![
            ("ids", format!("ga:{}", spec.profile_id)),
            ("metrics", spec.metrics.join(",")),
            ("max-results", spec.page_size.to_string()),
        ];
        if !spec.dimensions.is_empty() {
            params.push(("dimensions", spec.dimensions.join(",")));
        }
        if let Some(filter) = &spec.filter_expression {
            params.push(("filters", filter.clone()));
        }

        let data: RealtimeData = self.http.get(&self.realtime_url, &params).await?;
        Ok(data.into_raw())
    }
}

#[async_trait]
impl CatalogApi for UniversalAnalyticsClient {
    /// The Universal Analytics catalog is global; `property_id` is unused.
    async fn fetch_catalog(&self, _property_id: &str) -> Result<Vec<CatalogItem>, ApiError> {
        let document: MetadataDocument = self.http.get_public(&self.metadata_url).await?;
        Ok(document.items)
    }
}

impl std::fmt::Debug for UniversalAnalyticsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UniversalAnalyticsClient")
            .field("management_url", &self.management_url)
            .field("reporting_url", &self.reporting_url)
            .finish()
    }
}

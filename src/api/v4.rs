//! GA4 client: Admin API for accounts, properties, data streams and account
//! summaries; Data API for reports, realtime reports and property metadata.
//!
//! Identifiers are resource names (`accounts/1`, `properties/2`). Bare
//! numeric ids are accepted wherever a name is expected.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::http::GoogleHttp;
use super::{CatalogApi, HierarchyApi, Page, PageCursor, ReportApi, ReportCursor, ReportPaging};
use crate::config::Config;
use crate::error::ApiError;
use crate::model::{
    AccountSummary, AttributeType, CatalogItem, MetricHeader, PropertySummary, QuerySpec,
    RawReport, RawRow, ResourceNode,
};

/// `pageSize` for Admin API listings.
pub const ADMIN_PAGE_SIZE: u32 = 200;

/// Realtime window, in minutes ago.
pub const REALTIME_START_MINUTES_AGO: u32 = 29;
pub const REALTIME_END_MINUTES_AGO: u32 = 0;

/// Prefix `id` with `collection/` unless it already is a resource name.
pub fn resource_name(collection: &str, id: &str) -> String {
    let id = id.trim();
    if id.contains('/') {
        id.to_string()
    } else {
        format!("{}/{}", collection, id)
    }
}

// ============================================================================
// Admin API wire types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountList {
    #[serde(default)]
    accounts: Vec<Account>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Account {
    name: String,
    #[serde(default)]
    display_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PropertyList {
    #[serde(default)]
    properties: Vec<Property>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Property {
    name: String,
    #[serde(default)]
    display_name: String,
    #[serde(default)]
    parent: String,
    time_zone: Option<String>,
    service_level: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DataStreamList {
    #[serde(default)]
    data_streams: Vec<DataStream>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DataStream {
    name: String,
    #[serde(default)]
    display_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountSummaryList {
    #[serde(default)]
    account_summaries: Vec<AccountSummaryItem>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountSummaryItem {
    account: String,
    #[serde(default)]
    display_name: String,
    #[serde(default)]
    property_summaries: Vec<PropertySummaryItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PropertySummaryItem {
    property: String,
    #[serde(default)]
    display_name: String,
    #[serde(default)]
    parent: String,
}

fn token_cursor(token: Option<String>) -> Option<PageCursor> {
    token.filter(|t| !t.is_empty()).map(PageCursor::Token)
}

impl From<Account> for ResourceNode {
    fn from(account: Account) -> Self {
        ResourceNode::new(account.name, account.display_name, "")
    }
}

impl From<Property> for ResourceNode {
    fn from(property: Property) -> Self {
        let mut node = ResourceNode::new(property.name, property.display_name, property.parent);
        node.timezone = property.time_zone;
        node.service_tier = property.service_level;
        node
    }
}

impl From<AccountSummaryItem> for AccountSummary {
    fn from(item: AccountSummaryItem) -> Self {
        AccountSummary {
            account: item.account,
            display_name: item.display_name,
            property_summaries: item
                .property_summaries
                .into_iter()
                .map(|p| PropertySummary {
                    property: p.property,
                    display_name: p.display_name,
                    parent: p.parent,
                })
                .collect(),
        }
    }
}

// ============================================================================
// Data API wire types
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RunReportRequest<'a> {
    date_ranges: Vec<DateRange<'a>>,
    metrics: Vec<NameRef<'a>>,
    dimensions: Vec<NameRef<'a>>,
    /// int64 fields travel as strings.
    offset: String,
    limit: String,
    keep_empty_rows: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    order_bys: Vec<OrderBy<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimension_filter: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RunRealtimeReportRequest<'a> {
    metrics: Vec<NameRef<'a>>,
    dimensions: Vec<NameRef<'a>>,
    minute_ranges: Vec<MinuteRange>,
    limit: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    order_bys: Vec<OrderBy<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimension_filter: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DateRange<'a> {
    start_date: &'a str,
    end_date: &'a str,
}

#[derive(Debug, Serialize)]
struct NameRef<'a> {
    name: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MinuteRange {
    start_minutes_ago: u32,
    end_minutes_ago: u32,
}

#[derive(Debug, Serialize)]
struct OrderBy<'a> {
    dimension: DimensionOrderBy<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DimensionOrderBy<'a> {
    dimension_name: &'a str,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunReportResponse {
    #[serde(default)]
    dimension_headers: Vec<DimensionHeader>,
    #[serde(default)]
    metric_headers: Vec<MetricHeaderEntry>,
    #[serde(default)]
    rows: Vec<Row>,
    #[serde(default)]
    row_count: u64,
}

#[derive(Debug, Deserialize)]
struct DimensionHeader {
    name: String,
}

#[derive(Debug, Deserialize)]
struct MetricHeaderEntry {
    name: String,
    #[serde(rename = "type", default)]
    type_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Row {
    #[serde(default)]
    dimension_values: Vec<Value>,
    #[serde(default)]
    metric_values: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct Value {
    #[serde(default)]
    value: String,
}

impl From<RunReportResponse> for RawReport {
    fn from(response: RunReportResponse) -> Self {
        let values = |cells: Vec<Value>| cells.into_iter().map(|c| c.value).collect::<Vec<_>>();
        RawReport {
            dimension_headers: response
                .dimension_headers
                .into_iter()
                .map(|h| h.name)
                .collect(),
            metric_headers: response
                .metric_headers
                .into_iter()
                .map(|h| MetricHeader::new(h.name, h.type_name))
                .collect(),
            rows: response
                .rows
                .into_iter()
                .map(|row| RawRow::new(values(row.dimension_values), values(row.metric_values)))
                .collect(),
            row_count: response.row_count,
            next_page_token: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Metadata {
    #[serde(default)]
    dimensions: Vec<MetadataEntry>,
    #[serde(default)]
    metrics: Vec<MetadataEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MetadataEntry {
    api_name: String,
    #[serde(default)]
    ui_name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    category: String,
    #[serde(rename = "type", default)]
    type_name: String,
}

impl MetadataEntry {
    fn into_item(self, attribute_type: AttributeType) -> CatalogItem {
        let mut item = CatalogItem::new(self.api_name, attribute_type, &self.ui_name);
        item.attributes.description = self.description;
        item.attributes.group = self.category;
        item.attributes.data_type = self.type_name;
        item
    }
}

impl From<Metadata> for Vec<CatalogItem> {
    fn from(metadata: Metadata) -> Self {
        metadata
            .dimensions
            .into_iter()
            .map(|d| d.into_item(AttributeType::Dimension))
            .chain(
                metadata
                    .metrics
                    .into_iter()
                    .map(|m| m.into_item(AttributeType::Metric)),
            )
            .collect()
    }
}

/// Parse a filter expression for the Data API. Only the JSON
/// `FilterExpression` form is understood; anything else is dropped.
fn dimension_filter(spec: &QuerySpec) -> Option<serde_json::Value> {
    let raw = spec.filter_expression.as_deref()?;
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(value) if value.is_object() => Some(value),
        _ => {
            tracing::warn!(filter = %raw, "ignoring filter expression that is not a JSON FilterExpression");
            None
        }
    }
}

fn order_by_first_dimension(spec: &QuerySpec) -> Vec<OrderBy<'_>> {
    spec.dimensions
        .first()
        .map(|d| {
            vec![OrderBy {
                dimension: DimensionOrderBy { dimension_name: d },
            }]
        })
        .unwrap_or_default()
}

fn name_refs(names: &[String]) -> Vec<NameRef<'_>> {
    names.iter().map(|n| NameRef { name: n }).collect()
}

// ============================================================================
// Client
// ============================================================================

/// GA4 API client.
#[derive(Clone)]
pub struct Ga4Client {
    http: GoogleHttp,
    admin_url: String,
    data_url: String,
}

impl Ga4Client {
    pub fn new(config: &Config, http: GoogleHttp) -> Self {
        Self {
            http,
            admin_url: config.admin_base_url.trim_end_matches('/').to_string(),
            data_url: config.data_base_url.trim_end_matches('/').to_string(),
        }
    }

    fn page_params(cursor: Option<&PageCursor>) -> Vec<(&'static str, String)> {
        let mut params = vec![("pageSize", ADMIN_PAGE_SIZE.to_string())];
        if let Some(PageCursor::Token(token)) = cursor {
            params.push(("pageToken", token.clone()));
        }
        params
    }
}

#[async_trait]
impl HierarchyApi for Ga4Client {
    async fn list_accounts(
        &self,
        cursor: Option<&PageCursor>,
    ) -> Result<Page<ResourceNode>, ApiError> {
        let url = format!("{}/accounts", self.admin_url);
        let list: AccountList = self.http.get(&url, &Self::page_params(cursor)).await?;
        Ok(Page {
            items: list.accounts.into_iter().map(ResourceNode::from).collect(),
            next: token_cursor(list.next_page_token),
        })
    }

    async fn list_properties(
        &self,
        account_id: &str,
        cursor: Option<&PageCursor>,
    ) -> Result<Page<ResourceNode>, ApiError> {
        let url = format!("{}/properties", self.admin_url);
        let mut params = Self::page_params(cursor);
        params.push((
            "filter",
            format!("parent:{}", resource_name("accounts", account_id)),
        ));
        let list: PropertyList = self.http.get(&url, &params).await?;
        Ok(Page {
            items: list.properties.into_iter().map(ResourceNode::from).collect(),
            next: token_cursor(list.next_page_token),
        })
    }

    /// Data streams are the third level of a GA4 hierarchy.
    async fn list_profiles(
        &self,
        _account_id: &str,
        property_id: &str,
        cursor: Option<&PageCursor>,
    ) -> Result<Page<ResourceNode>, ApiError> {
        let property = resource_name("properties", property_id);
        let url = format!("{}/{}/dataStreams", self.admin_url, property);
        let list: DataStreamList = self.http.get(&url, &Self::page_params(cursor)).await?;
        Ok(Page {
            items: list
                .data_streams
                .into_iter()
                .map(|s| ResourceNode::new(s.name, s.display_name, property.clone()))
                .collect(),
            next: token_cursor(list.next_page_token),
        })
    }

    async fn get_property(
        &self,
        _account_id: &str,
        property_id: &str,
    ) -> Result<ResourceNode, ApiError> {
        let url = format!(
            "{}/{}",
            self.admin_url,
            resource_name("properties", property_id)
        );
        let property: Property = self.http.get(&url, &[]).await?;
        Ok(property.into())
    }

    async fn list_account_summaries(
        &self,
        cursor: Option<&PageCursor>,
    ) -> Result<Page<AccountSummary>, ApiError> {
        let url = format!("{}/accountSummaries", self.admin_url);
        let list: AccountSummaryList = self.http.get(&url, &Self::page_params(cursor)).await?;
        Ok(Page {
            items: list
                .account_summaries
                .into_iter()
                .map(AccountSummary::from)
                .collect(),
            next: token_cursor(list.next_page_token),
        })
    }
}

#[async_trait]
impl ReportApi for Ga4Client {
    fn paging(&self) -> ReportPaging {
        ReportPaging::Offset
    }

    async fn run_report(
        &self,
        spec: &QuerySpec,
        cursor: &ReportCursor,
    ) -> Result<RawReport, ApiError> {
        let request = RunReportRequest {
            date_ranges: vec![DateRange {
                start_date: &spec.start_date,
                end_date: &spec.end_date,
            }],
            metrics: name_refs(&spec.metrics),
            dimensions: name_refs(&spec.dimensions),
            offset: cursor.offset.to_string(),
            limit: spec.page_size.to_string(),
            keep_empty_rows: true,
            order_bys: order_by_first_dimension(spec),
            dimension_filter: dimension_filter(spec),
        };

        let url = format!(
            "{}/{}:runReport",
            self.data_url,
            resource_name("properties", &spec.property_id)
        );
        let response: RunReportResponse = self.http.post(&url, &request).await?;
        Ok(response.into())
    }

    async fn run_realtime_report(&self, spec: &QuerySpec) -> Result<RawReport, ApiError> {
        let request = RunRealtimeReportRequest {
            metrics: name_refs(&spec.metrics),
            dimensions: name_refs(&spec.dimensions),
            minute_ranges: vec![MinuteRange {
                start_minutes_ago: REALTIME_START_MINUTES_AGO,
                end_minutes_ago: REALTIME_END_MINUTES_AGO,
            }],
            limit: spec.page_size.to_string(),
            order_bys: order_by_first_dimension(spec),
            dimension_filter: dimension_filter(spec),
        };

        let url = format!(
            "{}/{}:runRealtimeReport",
            self.data_url,
            resource_name("properties", &spec.property_id)
        );
        let response: RunReportResponse = self.http.post(&url, &request).await?;
        Ok(response.into())
    }
}

#[async_trait]
impl CatalogApi for Ga4Client {
    async fn fetch_catalog(&self, property_id: &str) -> Result<Vec<CatalogItem>, ApiError> {
        // Property 0 serves the common catalog without custom definitions.
        let property_id = if property_id.trim().is_empty() {
            "0"
        } else {
            property_id
        };
        let url = format!(
            "{}/{}/metadata",
            self.data_url,
            resource_name("properties", property_id)
        );
        let metadata: Metadata = self.http.get(&url, &[]).await?;
        Ok(metadata.into())
    }
}

impl std::fmt::Debug for Ga4Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ga4Client")
            .field("admin_url", &self.admin_url)
            .field("data_url", &self.data_url)
            .finish()
    }
}
